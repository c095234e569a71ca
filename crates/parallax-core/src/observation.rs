//! Observations of a single behavior execution
//!
//! An [`Observation`] runs its block exactly once, when it is built, and
//! keeps what happened: the returned value, the behavior's own error, or a
//! panic, together with how long it took. Derived observations are produced
//! by [`Observation::settle`] (await in-flight work) and
//! [`Observation::map`] (transform the value); both keep the original name,
//! start time and policy.

use crate::measurement::{Clock, Measurement, SystemClock};
use crate::outcome::{Fault, Outcome, Pending, Value};
use crate::policy::Policy;
use crate::runtime;
use crate::stage;
use chrono::{DateTime, Utc};
use std::fmt;
use std::panic;
use std::sync::Arc;
use std::time::Duration;

/// How a new observation is timed
#[derive(Debug, Clone)]
pub enum Timing<'a> {
    /// Start a fresh stopwatch on the clock
    Benchmark(Arc<dyn Clock>),
    /// Extend an earlier measurement over the block
    Remeasure(&'a Measurement),
    /// Keep an earlier measurement as-is
    Preserve(&'a Measurement),
}

impl Timing<'_> {
    fn measure<R>(self, block: impl FnOnce() -> R) -> (R, Measurement) {
        match self {
            Timing::Benchmark(clock) => Measurement::benchmark(clock, block),
            Timing::Remeasure(measurement) => measurement.remeasure(block),
            Timing::Preserve(measurement) => measurement.preserve(block),
        }
    }
}

/// Captured outcome and timing of one behavior execution
#[derive(Debug, Clone)]
pub struct Observation<V, E> {
    name: Arc<str>,
    outcome: Outcome<V, E>,
    measurement: Measurement,
    start_time: DateTime<Utc>,
    policy: Arc<Policy<V, E>>,
}

impl<V: Value, E: Fault> Observation<V, E> {
    /// Run `block` once on the system clock and capture its result
    pub fn new(
        name: impl Into<Arc<str>>,
        policy: Arc<Policy<V, E>>,
        block: impl FnOnce() -> Result<V, E>,
    ) -> Self {
        Self::with_timing(name, Timing::Benchmark(Arc::new(SystemClock)), policy, || {
            Outcome::from_result(block())
        })
    }

    /// Run `block` once under an explicit timing strategy
    ///
    /// A panic inside `block` is captured as [`Outcome::Panicked`].
    pub fn with_timing(
        name: impl Into<Arc<str>>,
        timing: Timing<'_>,
        policy: Arc<Policy<V, E>>,
        block: impl FnOnce() -> Outcome<V, E>,
    ) -> Self {
        let start_time = Utc::now();
        let (outcome, measurement) =
            timing.measure(|| stage::catch_panic(block).unwrap_or_else(Outcome::Panicked));

        Self::from_parts(name.into(), outcome, measurement, start_time, policy)
    }

    fn from_parts(
        name: Arc<str>,
        outcome: Outcome<V, E>,
        measurement: Measurement,
        start_time: DateTime<Utc>,
        policy: Arc<Policy<V, E>>,
    ) -> Self {
        Self {
            name,
            outcome,
            measurement,
            start_time,
            policy,
        }
    }

    /// Behavior name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Captured outcome
    #[inline]
    #[must_use]
    pub fn outcome(&self) -> &Outcome<V, E> {
        &self.outcome
    }

    /// Returned value, if the behavior returned a settled value
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&V> {
        self.outcome.value()
    }

    /// Returned error, if the behavior failed
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&E> {
        self.outcome.error()
    }

    /// Elapsed milliseconds
    #[inline]
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.measurement.elapsed_ms()
    }

    /// Elapsed time
    #[inline]
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.measurement.elapsed()
    }

    /// Wall-clock time the original block started
    #[inline]
    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Policy captured with this observation
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &Arc<Policy<V, E>> {
        &self.policy
    }

    /// True unless the behavior failed or panicked
    #[inline]
    #[must_use]
    pub fn did_return(&self) -> bool {
        self.outcome.is_returned()
    }

    /// Replay the behavior's contract
    ///
    /// Returns a clone of the value or error and resumes a captured panic.
    /// In-flight work is blocked on, handing the worker over on a
    /// multi-threaded runtime. Work that needs a current-thread runtime
    /// cannot finish while it is blocked; use [`Observation::resolve`] there.
    pub fn evaluation(&self) -> Result<V, E> {
        match &self.outcome {
            Outcome::Pending(pending) => replay(runtime::wait(pending.resolve())),
            settled => replay(settled.clone()),
        }
    }

    /// Replay the behavior's contract, awaiting in-flight work
    pub async fn resolve(&self) -> Result<V, E> {
        match &self.outcome {
            Outcome::Pending(pending) => replay(pending.resolve().await),
            settled => replay(settled.clone()),
        }
    }

    /// Await in-flight work and capture its settled outcome
    ///
    /// The new observation is remeasured, so its duration spans the original
    /// run plus the wait. Settled outcomes carry over unchanged.
    pub async fn settle(&self) -> Self {
        let resolved = match &self.outcome {
            Outcome::Pending(pending) => pending.resolve().await,
            settled => settled.clone(),
        };
        let (outcome, measurement) = Timing::Remeasure(&self.measurement).measure(|| resolved);

        Self::from_parts(
            Arc::clone(&self.name),
            outcome,
            measurement,
            self.start_time,
            Arc::clone(&self.policy),
        )
    }

    /// Lift a returned value into already-resolved in-flight work
    ///
    /// Lets a transform compose with a value the same way it composes with a
    /// behavior that is still running.
    #[must_use]
    pub fn defer(&self) -> Self {
        match &self.outcome {
            Outcome::Returned(value) => {
                let (outcome, measurement) = Timing::Preserve(&self.measurement)
                    .measure(|| Outcome::Pending(Pending::ready(Outcome::Returned(value.clone()))));
                self.derive(outcome, measurement)
            }
            _ => self.clone(),
        }
    }

    /// Transform the value, keeping this policy
    ///
    /// See [`Observation::map_into`].
    #[must_use]
    pub fn map<F>(&self, f: F) -> Self
    where
        F: FnOnce(V) -> V + Send + 'static,
    {
        self.map_into(Arc::clone(&self.policy), f)
    }

    /// Transform the value into another type under a new policy
    ///
    /// Mapping is instrumentation, so the duration is preserved. A returned
    /// value is mapped now and a panic in `f` propagates to the caller;
    /// in-flight work is mapped when it resolves. Failed and panicked
    /// observations are carried over unmapped.
    pub fn map_into<W, F>(&self, policy: Arc<Policy<W, E>>, f: F) -> Observation<W, E>
    where
        W: Value,
        F: FnOnce(V) -> W + Send + 'static,
    {
        let timing = Timing::Preserve(&self.measurement);
        let (outcome, measurement) = match &self.outcome {
            Outcome::Returned(value) => timing.measure(|| Outcome::Returned(f(value.clone()))),
            Outcome::Pending(pending) => timing.measure(|| Outcome::Pending(pending.map(f))),
            Outcome::Failed(error) => timing.measure(|| Outcome::Failed(error.clone())),
            Outcome::Panicked(message) => timing.measure(|| Outcome::Panicked(message.clone())),
        };

        Observation::from_parts(Arc::clone(&self.name), outcome, measurement, self.start_time, policy)
    }

    /// True if any configured ignorer excludes `other` from comparison
    #[must_use]
    pub fn ignores(&self, other: &Self) -> bool {
        self.policy.ignores(self, other)
    }

    /// True if `other` produced an equivalent outcome
    ///
    /// Two returned values match under the comparator. Two errors match when
    /// they are the same variant with the same message; two panics match on
    /// message. The comparator is never consulted for errors. Mixed outcomes
    /// and unsettled work never match.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (&self.outcome, &other.outcome) {
            (Outcome::Returned(a), Outcome::Returned(b)) => self.policy.compare(a, b),
            (Outcome::Failed(a), Outcome::Failed(b)) => errors_match(a, b),
            (Outcome::Panicked(a), Outcome::Panicked(b)) => a == b,
            _ => false,
        }
    }

    /// Reviewable rendering of the outcome
    ///
    /// The cleaner applies to returned values only.
    #[must_use]
    pub fn inspect(&self) -> String {
        match &self.outcome {
            Outcome::Returned(value) => format!("value: {}", self.policy.clean(value)),
            Outcome::Failed(error) => {
                format!("error: [{}] {:?}", error_kind::<E>(), error.to_string())
            }
            Outcome::Panicked(message) => format!("error: [panic] {message:?}"),
            Outcome::Pending(_) => "value: <pending>".to_string(),
        }
    }

    fn derive(&self, outcome: Outcome<V, E>, measurement: Measurement) -> Self {
        Self::from_parts(
            Arc::clone(&self.name),
            outcome,
            measurement,
            self.start_time,
            Arc::clone(&self.policy),
        )
    }
}

impl<V: Value, E: Fault> fmt::Display for Observation<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}ms) {}", self.name, self.duration_ms(), self.inspect())
    }
}

/// Turn a settled outcome back into the behavior's contract
fn replay<V, E>(outcome: Outcome<V, E>) -> Result<V, E> {
    match outcome {
        Outcome::Returned(value) => Ok(value),
        Outcome::Failed(error) => Err(error),
        Outcome::Panicked(message) => panic::resume_unwind(Box::new(message)),
        Outcome::Pending(_) => panic::resume_unwind(Box::new("replayed unsettled work")),
    }
}

/// Same variant and same message; backtraces and sources are not compared
fn errors_match<E: fmt::Display>(a: &E, b: &E) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b) && a.to_string() == b.to_string()
}

/// Short type name of an error, e.g. `LookupError`
fn error_kind<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::ManualClock;
    use crate::stage::panic_message;
    use std::panic::AssertUnwindSafe;

    #[derive(Debug, Clone, PartialEq, thiserror::Error)]
    enum LookupError {
        #[error("{0}")]
        NotFound(String),
        #[error("{0}")]
        Invalid(String),
    }

    type Obs = Observation<Vec<i32>, LookupError>;

    fn policy() -> Arc<Policy<Vec<i32>, LookupError>> {
        Arc::new(Policy::new())
    }

    fn returning(value: Vec<i32>) -> Obs {
        Observation::new("test", policy(), move || Ok(value))
    }

    fn failing(error: LookupError) -> Obs {
        Observation::new("test", policy(), move || Err(error))
    }

    #[test]
    fn observation_runs_block_once() {
        let mut calls = 0;
        let obs = Observation::new("test", policy(), || {
            calls += 1;
            Ok(vec![1])
        });

        assert_eq!(calls, 1);
        assert_eq!(obs.name(), "test");
        assert_eq!(obs.value(), Some(&vec![1]));
        assert!(obs.error().is_none());
    }

    #[test]
    fn observation_exposes_errors() {
        let obs = failing(LookupError::NotFound("gone".into()));

        assert!(!obs.did_return());
        assert!(obs.value().is_none());
        assert_eq!(obs.error(), Some(&LookupError::NotFound("gone".into())));
    }

    #[test]
    fn observation_captures_panics() {
        let obs: Obs = Observation::new("test", policy(), || panic!("boom"));

        assert!(!obs.did_return());
        assert!(matches!(obs.outcome(), Outcome::Panicked(m) if m == "boom"));
        assert_eq!(obs.inspect(), r#"error: [panic] "boom""#);
    }

    #[test]
    fn observation_records_duration() {
        let clock = Arc::new(ManualClock::new());
        let ticker = Arc::clone(&clock);

        let obs: Obs = Observation::with_timing("test", Timing::Benchmark(clock), policy(), move || {
            ticker.tick(10);
            Outcome::Returned(vec![])
        });

        assert_eq!(obs.duration_ms(), 10);
    }

    #[test]
    fn evaluation_replays_value_and_error() {
        assert_eq!(returning(vec![3]).evaluation(), Ok(vec![3]));
        assert_eq!(
            failing(LookupError::Invalid("bad".into())).evaluation(),
            Err(LookupError::Invalid("bad".into()))
        );
    }

    #[test]
    fn evaluation_resumes_panics() {
        let obs: Obs = Observation::new("test", policy(), || panic!("control exploded"));

        let replayed = panic::catch_unwind(AssertUnwindSafe(|| obs.evaluation()));
        let payload = replayed.unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "control exploded");
    }

    #[test]
    fn map_transforms_value_and_keeps_duration() {
        let clock = Arc::new(ManualClock::new());
        let obs: Obs = Observation::with_timing(
            "test",
            Timing::Benchmark(clock.clone()),
            policy(),
            || Outcome::Returned(vec![1]),
        );
        let ticker = Arc::clone(&clock);

        let mapped = obs.map(move |mut v| {
            ticker.tick(1000);
            v.push(2);
            v
        });

        assert_eq!(mapped.value(), Some(&vec![1, 2]));
        assert_eq!(mapped.duration_ms(), obs.duration_ms());
        assert_eq!(mapped.start_time(), obs.start_time());
    }

    #[test]
    fn map_skips_errors() {
        let obs = failing(LookupError::NotFound("gone".into()));
        let mapped = obs.map(|_| panic!("mapper must not run"));

        assert_eq!(mapped.error(), obs.error());
        assert_eq!(mapped.duration_ms(), obs.duration_ms());
    }

    #[test]
    fn map_into_changes_value_type() {
        let obs = returning(vec![1, 2, 3]);
        let lengths: Arc<Policy<usize, LookupError>> = Arc::new(Policy::new());

        let mapped = obs.map_into(lengths, |v| v.len());
        assert_eq!(mapped.value(), Some(&3));
    }

    #[test]
    fn map_panics_propagate() {
        let obs = returning(vec![1]);
        let mapped = panic::catch_unwind(AssertUnwindSafe(|| obs.map(|_| panic!("forced"))));
        assert!(mapped.is_err());
    }

    #[test]
    fn matches_uses_comparator_for_values() {
        let strict: Arc<Policy<Vec<i32>, LookupError>> =
            Arc::new(Policy::new().with_comparator(|a: &Vec<i32>, b: &Vec<i32>| a.len() == b.len()));
        let a = Observation::new("a", Arc::clone(&strict), || Ok(vec![1, 2]));
        let b = Observation::new("b", Arc::clone(&strict), || Ok(vec![3, 4]));
        let c = Observation::new("c", strict, || Ok(vec![1]));

        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[test]
    fn matches_mixed_outcomes_never() {
        let ok = returning(vec![1]);
        let err = failing(LookupError::NotFound("x".into()));

        assert!(!ok.matches(&err));
        assert!(!err.matches(&ok));
    }

    #[test]
    fn matches_errors_by_variant_and_message() {
        let never: Arc<Policy<Vec<i32>, LookupError>> =
            Arc::new(Policy::new().with_comparator(|_: &Vec<i32>, _: &Vec<i32>| -> bool {
                panic!("comparator consulted for errors")
            }));
        let make = |e: LookupError| Observation::new("e", Arc::clone(&never), move || Err(e));

        let a = make(LookupError::NotFound("x".into()));
        let b = make(LookupError::NotFound("x".into()));
        let c = make(LookupError::NotFound("y".into()));
        let d = make(LookupError::Invalid("x".into()));

        assert!(a.matches(&b));
        assert!(!a.matches(&c));
        assert!(!a.matches(&d));
    }

    #[test]
    fn ignores_requires_ignorers() {
        let a = returning(vec![1]);
        let b = returning(vec![2]);
        assert!(!a.ignores(&b));

        let ignoring: Arc<Policy<Vec<i32>, LookupError>> = Arc::new(
            Policy::new()
                .with_ignorer(|_, _| false)
                .with_ignorer(|control: &Obs, candidate: &Obs| {
                    control.name() == "control" && candidate.value() == Some(&vec![2])
                }),
        );
        let control = Observation::new("control", Arc::clone(&ignoring), || Ok(vec![1]));
        let candidate = Observation::new("candidate", Arc::clone(&ignoring), || Ok(vec![2]));
        let other = Observation::new("candidate", ignoring, || Ok(vec![3]));

        assert!(control.ignores(&candidate));
        assert!(!control.ignores(&other));
    }

    #[test]
    fn inspect_renders_values_and_errors() {
        let cleaned: Arc<Policy<Vec<i32>, LookupError>> =
            Arc::new(Policy::new().with_cleaner(|v: &Vec<i32>| format!("{} items", v.len())));
        let value = Observation::new("v", cleaned, || Ok(vec![1, 2]));
        let error = failing(LookupError::NotFound("gone".into()));

        assert_eq!(value.inspect(), "value: 2 items");
        assert_eq!(error.inspect(), r#"error: [LookupError] "gone""#);
    }

    #[tokio::test]
    async fn settle_preserves_synchronous_outcomes() {
        let value = returning(vec![1]).settle().await;
        let error = failing(LookupError::NotFound("x".into())).settle().await;

        assert_eq!(value.value(), Some(&vec![1]));
        assert_eq!(error.error(), Some(&LookupError::NotFound("x".into())));
    }

    #[tokio::test]
    async fn settle_resolves_pending_work() {
        let (tx, rx) = tokio::sync::oneshot::channel::<Result<Vec<i32>, LookupError>>();
        let obs: Obs = Observation::with_timing(
            "test",
            Timing::Benchmark(Arc::new(SystemClock)),
            policy(),
            move || Outcome::Pending(Pending::new(async move { rx.await.unwrap_or(Ok(vec![])) })),
        );

        assert!(obs.did_return());
        assert!(obs.error().is_none());

        tx.send(Err(LookupError::Invalid("rejected".into()))).unwrap();
        let settled = obs.settle().await;

        assert!(!settled.did_return());
        assert_eq!(settled.error(), Some(&LookupError::Invalid("rejected".into())));
        assert_eq!(settled.name(), obs.name());
        assert_eq!(settled.start_time(), obs.start_time());
    }

    #[tokio::test]
    async fn settle_spans_run_and_wait() {
        let clock = Arc::new(ManualClock::new());
        let ticker = Arc::clone(&clock);
        let obs: Obs = Observation::with_timing(
            "test",
            Timing::Benchmark(clock.clone()),
            policy(),
            move || {
                ticker.tick(10);
                Outcome::Returned(vec![])
            },
        );

        clock.tick(10);
        let settled = obs.settle().await;

        assert_eq!(obs.duration_ms(), 10);
        assert_eq!(settled.duration_ms(), 20);
    }

    #[tokio::test]
    async fn deferred_map_composes_with_settle() {
        let obs = returning(vec![1]).defer();
        assert!(obs.outcome().is_pending());

        let mapped = obs.map(|mut v| {
            v.push(9);
            v
        });
        let settled = mapped.settle().await;

        assert_eq!(settled.value(), Some(&vec![1, 9]));
    }

    #[test]
    fn error_kind_is_short_name() {
        assert_eq!(error_kind::<LookupError>(), "LookupError");
        assert_eq!(error_kind::<std::sync::Arc<std::io::Error>>(), "Arc");
    }
}
