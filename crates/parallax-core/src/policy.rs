//! Comparison policy carried by observations
//!
//! The policy bundles the three functions an observation needs to judge
//! another one: ignorers, the comparator and the cleaner. Observations hold
//! it by `Arc`, so derived observations (mapped, settled) keep the policy
//! that was active when the original was captured.

use crate::observation::Observation;
use std::fmt;
use std::sync::Arc;

/// Equality used for returned values
pub type Comparator<V> = Arc<dyn Fn(&V, &V) -> bool + Send + Sync>;

/// Predicate excluding a control/candidate pair from comparison
pub type Ignorer<V, E> = Arc<dyn Fn(&Observation<V, E>, &Observation<V, E>) -> bool + Send + Sync>;

/// Renders a returned value for review
pub type Cleaner<V> = Arc<dyn Fn(&V) -> String + Send + Sync>;

/// Ignorers, comparator and cleaner for one value type
pub struct Policy<V, E> {
    comparator: Comparator<V>,
    ignorers: Vec<Ignorer<V, E>>,
    cleaner: Cleaner<V>,
}

impl<V, E> Policy<V, E>
where
    V: fmt::Debug + 'static,
{
    /// Default policy: `PartialEq` comparison, no ignorers, `Debug` rendering
    #[must_use]
    pub fn new() -> Self
    where
        V: PartialEq,
    {
        Self {
            comparator: Arc::new(|a: &V, b: &V| a == b),
            ignorers: Vec::new(),
            cleaner: Arc::new(|value: &V| format!("{value:?}")),
        }
    }

    /// Policy for observations that are never compared
    ///
    /// Nothing matches under it.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            comparator: Arc::new(|_: &V, _: &V| false),
            ignorers: Vec::new(),
            cleaner: Arc::new(|value: &V| format!("{value:?}")),
        }
    }
}

impl<V, E> Policy<V, E> {
    /// With a comparator
    #[inline]
    #[must_use]
    pub fn with_comparator(mut self, comparator: impl Fn(&V, &V) -> bool + Send + Sync + 'static) -> Self {
        self.set_comparator(comparator);
        self
    }

    /// With an additional ignorer
    #[inline]
    #[must_use]
    pub fn with_ignorer(
        mut self,
        ignorer: impl Fn(&Observation<V, E>, &Observation<V, E>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.push_ignorer(ignorer);
        self
    }

    /// With a cleaner
    #[inline]
    #[must_use]
    pub fn with_cleaner(mut self, cleaner: impl Fn(&V) -> String + Send + Sync + 'static) -> Self {
        self.set_cleaner(cleaner);
        self
    }

    /// Replace the comparator
    pub fn set_comparator(&mut self, comparator: impl Fn(&V, &V) -> bool + Send + Sync + 'static) {
        self.comparator = Arc::new(comparator);
    }

    /// Append an ignorer; earlier ignorers are consulted first
    pub fn push_ignorer(
        &mut self,
        ignorer: impl Fn(&Observation<V, E>, &Observation<V, E>) -> bool + Send + Sync + 'static,
    ) {
        self.ignorers.push(Arc::new(ignorer));
    }

    /// Replace the cleaner
    pub fn set_cleaner(&mut self, cleaner: impl Fn(&V) -> String + Send + Sync + 'static) {
        self.cleaner = Arc::new(cleaner);
    }

    /// Number of registered ignorers
    #[inline]
    #[must_use]
    pub fn ignorer_count(&self) -> usize {
        self.ignorers.len()
    }

    pub(crate) fn compare(&self, a: &V, b: &V) -> bool {
        (self.comparator)(a, b)
    }

    /// True on the first ignorer that returns true
    pub(crate) fn ignores(&self, control: &Observation<V, E>, candidate: &Observation<V, E>) -> bool {
        self.ignorers.iter().any(|ignorer| ignorer(control, candidate))
    }

    pub(crate) fn clean(&self, value: &V) -> String {
        (self.cleaner)(value)
    }
}

impl<V, E> Default for Policy<V, E>
where
    V: PartialEq + fmt::Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> Clone for Policy<V, E> {
    fn clone(&self) -> Self {
        Self {
            comparator: Arc::clone(&self.comparator),
            ignorers: self.ignorers.clone(),
            cleaner: Arc::clone(&self.cleaner),
        }
    }
}

impl<V, E> fmt::Debug for Policy<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("ignorers", &self.ignorers.len())
            .finish_non_exhaustive()
    }
}
