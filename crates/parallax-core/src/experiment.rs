//! Experiment: registration, configuration and the run protocol
//!
//! An [`Experiment`] runs every registered behavior once, in random order,
//! hands the observations to the comparison pipeline and returns the
//! control's own outcome. Candidates can never change what the caller sees:
//! their errors and panics are captured, and failures in user callbacks are
//! reported to subscribers as [`StageError`](crate::stage::StageError)s.
//!
//! ```
//! use parallax_core::Experiment;
//!
//! let mut experiment = Experiment::<i32, String>::new("widget-count");
//! experiment.use_control(|| Ok(2 + 2))?;
//! experiment.candidate(|| Ok(2 * 2))?;
//!
//! assert_eq!(experiment.run(|_| true)?, Ok(4));
//! # Ok::<(), parallax_core::ExperimentError>(())
//! ```

use crate::error::ExperimentError;
use crate::measurement::{Clock, SystemClock};
use crate::observation::{Observation, Timing};
use crate::outcome::{Fault, Outcome, Pending, Value};
use crate::pipeline::{Mapper, Pipeline};
use crate::policy::Policy;
use crate::runtime;
use crate::stage::Stage;
use crate::subscriber::{Context, ExperimentInfo, Notifier, SkipReason, Subscriber};
use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Name of the control behavior
pub const CONTROL: &str = "control";

/// Name used by [`Experiment::candidate`]
pub const DEFAULT_CANDIDATE: &str = "candidate";

/// Plain experiment settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentOptions {
    /// Settle in-flight outcomes before comparing
    pub run_async: bool,
}

impl ExperimentOptions {
    /// With async settling
    #[inline]
    #[must_use]
    pub fn with_async(mut self, run_async: bool) -> Self {
        self.run_async = run_async;
        self
    }
}

/// Registered unit of work
enum Behavior<T, E> {
    Blocking(Box<dyn Fn() -> Result<T, E> + Send + Sync>),
    Deferred(Box<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>),
}

impl<T: Value, E: Fault> Behavior<T, E> {
    /// Invoke once for observation; deferred work is captured unsettled
    fn observe(&self) -> Outcome<T, E> {
        match self {
            Behavior::Blocking(block) => Outcome::from_result(block()),
            Behavior::Deferred(block) => Outcome::Pending(Pending::new(block())),
        }
    }

    fn is_deferred(&self) -> bool {
        matches!(self, Behavior::Deferred(_))
    }

    /// Invoke directly, blocking on deferred work
    fn call(&self) -> Result<T, E> {
        match self {
            Behavior::Blocking(block) => block(),
            Behavior::Deferred(block) => runtime::wait(block()),
        }
    }

    async fn call_async(&self) -> Result<T, E> {
        match self {
            Behavior::Blocking(block) => block(),
            Behavior::Deferred(block) => block().await,
        }
    }
}

/// A control behavior, candidate behaviors and how to compare them
///
/// `T` is what behaviors return, `E` their error and `U` the value compared
/// after mapping (defaults to `T`).
pub struct Experiment<T, E, U = T> {
    name: Arc<str>,
    behaviors: IndexMap<String, Behavior<T, E>>,
    options: ExperimentOptions,
    skipper: Box<dyn Fn() -> bool + Send + Sync>,
    mapper: Mapper<T, U>,
    policy: Policy<U, E>,
    context: Context,
    subscribers: Vec<Arc<dyn Subscriber<U, E>>>,
    clock: Arc<dyn Clock>,
}

impl<T, E> Experiment<T, E>
where
    T: Value + PartialEq,
    E: Fault,
{
    /// Create an experiment comparing raw values with `PartialEq`
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::with_policy(name, |value| value, Policy::new())
    }
}

impl<T, E, U> Experiment<T, E, U>
where
    T: Value,
    E: Fault,
    U: Value + PartialEq,
{
    /// Create an experiment comparing mapped values with `PartialEq`
    #[must_use]
    pub fn with_mapper(name: impl Into<Arc<str>>, mapper: impl Fn(T) -> U + Send + Sync + 'static) -> Self {
        Self::with_policy(name, mapper, Policy::new())
    }
}

impl<T, E, U> Experiment<T, E, U>
where
    T: Value,
    E: Fault,
    U: Value,
{
    /// Create an experiment with an explicit mapper and comparison policy
    #[must_use]
    pub fn with_policy(
        name: impl Into<Arc<str>>,
        mapper: impl Fn(T) -> U + Send + Sync + 'static,
        policy: Policy<U, E>,
    ) -> Self {
        Self {
            name: name.into(),
            behaviors: IndexMap::new(),
            options: ExperimentOptions::default(),
            skipper: Box::new(|| false),
            mapper: Arc::new(mapper),
            policy,
            context: Context::new(),
            subscribers: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Experiment name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered behavior names in registration order
    pub fn behavior_names(&self) -> impl Iterator<Item = &str> {
        self.behaviors.keys().map(String::as_str)
    }

    /// True once a control behavior is registered
    #[inline]
    #[must_use]
    pub fn has_control(&self) -> bool {
        self.behaviors.contains_key(CONTROL)
    }

    /// Current options
    #[inline]
    #[must_use]
    pub fn options(&self) -> ExperimentOptions {
        self.options
    }

    /// Replace all options at once
    pub fn set_options(&mut self, options: ExperimentOptions) -> &mut Self {
        self.options = options;
        self
    }

    /// Whether in-flight outcomes are settled before comparison
    #[inline]
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.options.run_async
    }

    /// Comparison policy applied to mapped values
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &Policy<U, E> {
        &self.policy
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Register the control behavior
    ///
    /// # Errors
    ///
    /// [`ExperimentError::DuplicateBehavior`] if a control already exists.
    pub fn use_control(
        &mut self,
        block: impl Fn() -> Result<T, E> + Send + Sync + 'static,
    ) -> Result<&mut Self, ExperimentError> {
        self.try_candidate(CONTROL, block)
    }

    /// Register a control behavior that returns a future
    ///
    /// # Errors
    ///
    /// [`ExperimentError::DuplicateBehavior`] if a control already exists.
    pub fn use_control_async<F, Fut>(&mut self, block: F) -> Result<&mut Self, ExperimentError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.try_candidate_async(CONTROL, block)
    }

    /// Register a candidate behavior under the default name
    ///
    /// # Errors
    ///
    /// [`ExperimentError::DuplicateBehavior`] if the default candidate exists.
    pub fn candidate(
        &mut self,
        block: impl Fn() -> Result<T, E> + Send + Sync + 'static,
    ) -> Result<&mut Self, ExperimentError> {
        self.try_candidate(DEFAULT_CANDIDATE, block)
    }

    /// Register a named behavior
    ///
    /// # Errors
    ///
    /// [`ExperimentError::DuplicateBehavior`] if `name` is taken.
    pub fn try_candidate(
        &mut self,
        name: impl Into<String>,
        block: impl Fn() -> Result<T, E> + Send + Sync + 'static,
    ) -> Result<&mut Self, ExperimentError> {
        self.register(name.into(), Behavior::Blocking(Box::new(block)))
    }

    /// Register a named behavior that returns a future
    ///
    /// The future is created when the behavior runs and awaited when the
    /// outcome is settled or replayed.
    ///
    /// # Errors
    ///
    /// [`ExperimentError::DuplicateBehavior`] if `name` is taken.
    pub fn try_candidate_async<F, Fut>(
        &mut self,
        name: impl Into<String>,
        block: F,
    ) -> Result<&mut Self, ExperimentError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.register(name.into(), Behavior::Deferred(Box::new(move || block().boxed())))
    }

    fn register(&mut self, name: String, behavior: Behavior<T, E>) -> Result<&mut Self, ExperimentError> {
        if self.behaviors.contains_key(&name) {
            return Err(ExperimentError::DuplicateBehavior(name));
        }
        self.behaviors.insert(name, behavior);
        Ok(self)
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------

    /// Settle in-flight outcomes before comparison (default: off)
    pub fn set_async(&mut self, run_async: bool) -> &mut Self {
        self.options.run_async = run_async;
        self
    }

    /// Skip the experiment when `skipper` returns true (default: never)
    pub fn skip_when(&mut self, skipper: impl Fn() -> bool + Send + Sync + 'static) -> &mut Self {
        self.skipper = Box::new(skipper);
        self
    }

    /// Replace the mapper applied before comparison
    pub fn map(&mut self, mapper: impl Fn(T) -> U + Send + Sync + 'static) -> &mut Self {
        self.mapper = Arc::new(mapper);
        self
    }

    /// Add an ignorer; any ignorer returning true excludes the candidate
    pub fn ignore(
        &mut self,
        ignorer: impl Fn(&Observation<U, E>, &Observation<U, E>) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.policy.push_ignorer(ignorer);
        self
    }

    /// Replace the comparator used for returned values
    pub fn compare(&mut self, comparator: impl Fn(&U, &U) -> bool + Send + Sync + 'static) -> &mut Self {
        self.policy.set_comparator(comparator);
        self
    }

    /// Replace the cleaner used when inspecting returned values
    pub fn clean(&mut self, cleaner: impl Fn(&U) -> String + Send + Sync + 'static) -> &mut Self {
        self.policy.set_cleaner(cleaner);
        self
    }

    /// Use another clock for timing behaviors
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) -> &mut Self {
        self.clock = clock;
        self
    }

    /// Add an event subscriber; subscribers are notified in order
    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber<U, E>>) -> &mut Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Current context
    #[inline]
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Merge entries into the context, overwriting existing keys
    pub fn merge_context<K, V>(&mut self, patch: impl IntoIterator<Item = (K, V)>) -> &Context
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        for (key, value) in patch {
            self.context.insert(key.into(), value.into());
        }
        &self.context
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    /// Run the experiment and return the control's outcome
    ///
    /// `sampler` receives the experiment name and decides whether candidates
    /// run at all. Without async mode the comparison pipeline finishes before
    /// this returns. With async mode it settles candidates off the caller's
    /// path: spawned on the current tokio runtime, or on a dedicated thread
    /// when there is none. A panicking control panics here as well.
    ///
    /// A deferred control is blocked on. On a multi-threaded runtime the
    /// worker is handed over while waiting; a current-thread runtime cannot
    /// drive the control while blocked, so use [`Experiment::run_async`]
    /// there.
    ///
    /// # Errors
    ///
    /// [`ExperimentError::MissingControl`] if no control was registered.
    /// [`ExperimentError::BlockingInRuntime`] if the control is deferred and
    /// the current runtime is current-thread; nothing runs in that case. The
    /// inner result is exactly what the control returned.
    pub fn run(&self, sampler: impl Fn(&str) -> bool) -> Result<Result<T, E>, ExperimentError> {
        let control = self.behaviors.get(CONTROL).ok_or(ExperimentError::MissingControl)?;
        if control.is_deferred() && !runtime::can_block() {
            return Err(ExperimentError::BlockingInRuntime);
        }
        let notifier = self.notifier();

        if let Some(reason) = self.skip_reason(&notifier, &sampler) {
            self.notify_skip(&notifier, reason);
            return Ok(control.call());
        }

        let (control, candidates) = self.observe_all().ok_or(ExperimentError::MissingControl)?;
        let work = self.pipeline(notifier).run(control.clone(), candidates);
        if self.options.run_async {
            runtime::detach(work);
        } else {
            futures::executor::block_on(work);
        }

        Ok(control.evaluation())
    }

    /// Async form of [`Experiment::run`]
    ///
    /// In-flight control work is awaited instead of blocked on. With async
    /// mode the pipeline is detached the same way as in [`Experiment::run`],
    /// so awaiting this never waits on a candidate.
    ///
    /// # Errors
    ///
    /// [`ExperimentError::MissingControl`] if no control was registered.
    pub async fn run_async(&self, sampler: impl Fn(&str) -> bool) -> Result<Result<T, E>, ExperimentError> {
        let control = self.behaviors.get(CONTROL).ok_or(ExperimentError::MissingControl)?;
        let notifier = self.notifier();

        if let Some(reason) = self.skip_reason(&notifier, &sampler) {
            self.notify_skip(&notifier, reason);
            return Ok(control.call_async().await);
        }

        let (control, candidates) = self.observe_all().ok_or(ExperimentError::MissingControl)?;
        let work = self.pipeline(notifier).run(control.clone(), candidates);
        if self.options.run_async {
            runtime::detach(work);
        } else {
            work.await;
        }

        Ok(control.resolve().await)
    }

    fn notifier(&self) -> Notifier<U, E> {
        let info = ExperimentInfo::new(Arc::clone(&self.name), self.context.clone());
        Notifier::new(info, self.subscribers.clone().into())
    }

    fn pipeline(&self, notifier: Notifier<U, E>) -> Pipeline<T, E, U> {
        Pipeline::new(
            notifier,
            Arc::clone(&self.mapper),
            Arc::new(self.policy.clone()),
            self.options.run_async,
        )
    }

    /// First skip condition that holds, by fixed priority
    ///
    /// Every condition is evaluated. A failing sampler or skipper is
    /// reported and counts as not skipping.
    fn skip_reason(&self, notifier: &Notifier<U, E>, sampler: &dyn Fn(&str) -> bool) -> Option<SkipReason> {
        let no_behaviors = self.behaviors.len() < 2;
        let not_sampled = notifier
            .isolate(Stage::Sampler, || Ok(!sampler(&self.name)))
            .unwrap_or(false);
        let skipped = notifier
            .isolate(Stage::Skipper, || Ok((self.skipper)()))
            .unwrap_or(false);

        if no_behaviors {
            Some(SkipReason::NoBehaviors)
        } else if not_sampled {
            Some(SkipReason::SamplerDeclined)
        } else if skipped {
            Some(SkipReason::SkipperRequested)
        } else {
            None
        }
    }

    fn notify_skip(&self, notifier: &Notifier<U, E>, reason: SkipReason) {
        tracing::debug!(experiment = %self.name, %reason, "experiment skipped");
        notifier.isolate(Stage::SkipHandler, || notifier.skip(reason));
    }

    /// Run every behavior once in random order
    ///
    /// Returns the control observation and the candidates in execution order.
    fn observe_all(&self) -> Option<(Observation<T, E>, Vec<Observation<T, E>>)> {
        let raw = Arc::new(Policy::unconfigured());
        let mut order: Vec<_> = self.behaviors.iter().collect();
        order.shuffle(&mut rand::rng());

        let mut control = None;
        let mut candidates = Vec::with_capacity(order.len().saturating_sub(1));
        for (name, behavior) in order {
            let observation = Observation::with_timing(
                name.as_str(),
                Timing::Benchmark(Arc::clone(&self.clock)),
                Arc::clone(&raw),
                || behavior.observe(),
            );
            tracing::trace!(
                experiment = %self.name,
                behavior = %name,
                duration_ms = observation.duration_ms(),
                "behavior observed"
            );

            if name == CONTROL {
                control = Some(observation);
            } else {
                candidates.push(observation);
            }
        }

        control.map(|control| (control, candidates))
    }
}

impl<T, E, U> fmt::Debug for Experiment<T, E, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("behaviors", &self.behaviors.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .field("context", &self.context)
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}
