//! Classified outcome of one experiment run

use crate::observation::Observation;
use crate::outcome::{Fault, Value};
use crate::subscriber::{Context, ExperimentInfo};

/// Control, candidates and their ignored/matched/mismatched partition
///
/// The partition is computed once, at construction. Every candidate lands in
/// exactly one of the three sets and each set keeps candidate order.
#[derive(Debug, Clone)]
pub struct ExperimentResult<U, E> {
    experiment: ExperimentInfo,
    control: Observation<U, E>,
    candidates: Vec<Observation<U, E>>,
    ignored: Vec<usize>,
    matched: Vec<usize>,
    mismatched: Vec<usize>,
}

impl<U: Value, E: Fault> ExperimentResult<U, E> {
    /// Classify `candidates` against `control`
    ///
    /// Ignorers and the comparator are user code; a panic in either
    /// propagates to the caller.
    #[must_use]
    pub fn new(
        experiment: ExperimentInfo,
        control: Observation<U, E>,
        candidates: Vec<Observation<U, E>>,
    ) -> Self {
        let mut ignored = Vec::new();
        let mut matched = Vec::new();
        let mut mismatched = Vec::new();

        for (index, candidate) in candidates.iter().enumerate() {
            if control.ignores(candidate) {
                ignored.push(index);
            } else if control.matches(candidate) {
                matched.push(index);
            } else {
                mismatched.push(index);
            }
        }

        Self {
            experiment,
            control,
            candidates,
            ignored,
            matched,
            mismatched,
        }
    }

    /// Experiment that produced this result
    #[inline]
    #[must_use]
    pub fn experiment(&self) -> &ExperimentInfo {
        &self.experiment
    }

    /// Experiment name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.experiment.name
    }

    /// Context snapshot taken when the run started
    #[inline]
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.experiment.context
    }

    /// Control observation
    #[inline]
    #[must_use]
    pub fn control(&self) -> &Observation<U, E> {
        &self.control
    }

    /// Candidate observations in execution order
    #[inline]
    #[must_use]
    pub fn candidates(&self) -> &[Observation<U, E>] {
        &self.candidates
    }

    /// Candidates excluded by an ignorer
    #[must_use]
    pub fn ignored(&self) -> Vec<&Observation<U, E>> {
        self.pick(&self.ignored)
    }

    /// Candidates equivalent to the control
    #[must_use]
    pub fn matched(&self) -> Vec<&Observation<U, E>> {
        self.pick(&self.matched)
    }

    /// Candidates that differ from the control
    #[must_use]
    pub fn mismatched(&self) -> Vec<&Observation<U, E>> {
        self.pick(&self.mismatched)
    }

    /// True when no candidate mismatched
    #[inline]
    #[must_use]
    pub fn all_matched(&self) -> bool {
        self.mismatched.is_empty()
    }

    fn pick(&self, indices: &[usize]) -> Vec<&Observation<U, E>> {
        indices.iter().map(|&index| &self.candidates[index]).collect()
    }
}
