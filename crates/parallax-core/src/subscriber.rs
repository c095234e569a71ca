//! Skip, result and error notifications
//!
//! Subscribers are invoked synchronously, in registration order, from the
//! stage that produces the event. The [`Notifier`] owns the subscriber list
//! for a single run together with a snapshot of the experiment, and is the
//! only place stage failures are reported from.

use crate::result::ExperimentResult;
use crate::stage::{self, Stage, StageError};
use std::fmt;
use std::sync::Arc;

/// Free-form experiment context
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Experiment reference carried by events
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentInfo {
    /// Experiment name
    pub name: Arc<str>,
    /// Context snapshot taken when the run started
    pub context: Context,
}

impl ExperimentInfo {
    /// Snapshot an experiment
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, context: Context) -> Self {
        Self {
            name: name.into(),
            context,
        }
    }
}

/// Why a run took the skip path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Fewer than two behaviors were registered
    NoBehaviors,
    /// The sampler declined the experiment
    SamplerDeclined,
    /// The skipper asked to skip
    SkipperRequested,
}

impl SkipReason {
    /// Verbatim reason string delivered to subscribers
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::NoBehaviors => "No behaviors defined",
            SkipReason::SamplerDeclined => "Sampler returned false",
            SkipReason::SkipperRequested => "Skipper returned true",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of experiment events
///
/// All methods default to doing nothing. An error returned from `on_skip` or
/// `on_result` is reported through `on_error` as a failure of the skip or
/// result handler stage; it never reaches the caller of `run`.
///
/// Every captured panic, whether in a behavior or a stage, is also seen by
/// the process panic hook, so with the default hook it prints a
/// `thread ... panicked at` line even though nothing crashed. The failure
/// itself arrives here through `on_error` or the observation's outcome. See
/// [`quiet_isolated_panics`](crate::stage::quiet_isolated_panics).
pub trait Subscriber<U, E>: Send + Sync {
    /// The run was skipped and only the control executed
    fn on_skip(&self, experiment: &ExperimentInfo, reason: SkipReason) -> anyhow::Result<()> {
        let _ = (experiment, reason);
        Ok(())
    }

    /// A result was produced
    fn on_result(&self, result: &ExperimentResult<U, E>) -> anyhow::Result<()> {
        let _ = result;
        Ok(())
    }

    /// A stage failed
    fn on_error(&self, error: &StageError) {
        let _ = error;
    }
}

/// Event fan-out for one run
pub(crate) struct Notifier<U, E> {
    info: ExperimentInfo,
    subscribers: Arc<[Arc<dyn Subscriber<U, E>>]>,
}

impl<U, E> Notifier<U, E> {
    pub(crate) fn new(info: ExperimentInfo, subscribers: Arc<[Arc<dyn Subscriber<U, E>>]>) -> Self {
        Self { info, subscribers }
    }

    pub(crate) fn info(&self) -> &ExperimentInfo {
        &self.info
    }

    /// Run `f` inside `stage`, reporting a failure and yielding `None`
    pub(crate) fn isolate<R>(&self, stage: Stage, f: impl FnOnce() -> anyhow::Result<R>) -> Option<R> {
        match stage::catch(f) {
            Ok(value) => Some(value),
            Err(message) => {
                self.report(stage, message);
                None
            }
        }
    }

    /// Decorate a stage failure and deliver it to every subscriber
    pub(crate) fn report(&self, stage: Stage, message: String) {
        let error = StageError::new(
            stage,
            message,
            Arc::clone(&self.info.name),
            self.info.context.clone(),
        );
        tracing::warn!(experiment = %self.info.name, stage = %stage, "{error}");

        for subscriber in self.subscribers.iter() {
            let delivered = stage::catch(|| {
                subscriber.on_error(&error);
                Ok(())
            });
            if let Err(message) = delivered {
                tracing::error!(
                    experiment = %self.info.name,
                    stage = %stage,
                    "error subscriber failed: {message}"
                );
            }
        }
    }

    pub(crate) fn skip(&self, reason: SkipReason) -> anyhow::Result<()> {
        for subscriber in self.subscribers.iter() {
            subscriber.on_skip(&self.info, reason)?;
        }
        Ok(())
    }

    pub(crate) fn result(&self, result: &ExperimentResult<U, E>) -> anyhow::Result<()> {
        for subscriber in self.subscribers.iter() {
            subscriber.on_result(result)?;
        }
        Ok(())
    }
}

impl<U, E> Clone for Notifier<U, E> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Errors(Mutex<Vec<String>>);

    impl Subscriber<i32, String> for Errors {
        fn on_error(&self, error: &StageError) {
            self.0.lock().push(error.to_string());
        }
    }

    struct Exploding;

    impl Subscriber<i32, String> for Exploding {
        fn on_skip(&self, _: &ExperimentInfo, _: SkipReason) -> anyhow::Result<()> {
            anyhow::bail!("skip handler down")
        }

        fn on_error(&self, _: &StageError) {
            panic!("error handler down");
        }
    }

    fn erase(subscriber: Arc<impl Subscriber<i32, String> + 'static>) -> Arc<dyn Subscriber<i32, String>> {
        subscriber
    }

    fn notifier(subscribers: Vec<Arc<dyn Subscriber<i32, String>>>) -> Notifier<i32, String> {
        let mut context = Context::new();
        context.insert("user".into(), 7.into());
        Notifier::new(ExperimentInfo::new("test", context), subscribers.into())
    }

    #[test]
    fn skip_reasons_are_verbatim() {
        assert_eq!(SkipReason::NoBehaviors.to_string(), "No behaviors defined");
        assert_eq!(SkipReason::SamplerDeclined.to_string(), "Sampler returned false");
        assert_eq!(SkipReason::SkipperRequested.to_string(), "Skipper returned true");
    }

    #[test]
    fn isolate_reports_and_yields_none() {
        let errors = Arc::new(Errors::default());
        let notifier = notifier(vec![erase(errors.clone())]);

        let out: Option<bool> = notifier.isolate(Stage::Skipper, || panic!("forced"));

        assert_eq!(out, None);
        assert_eq!(*errors.0.lock(), vec!["Skipper failed: forced".to_string()]);
    }

    #[test]
    fn isolate_passes_values_through() {
        let notifier = notifier(Vec::new());
        assert_eq!(notifier.isolate(Stage::Sampler, || Ok(true)), Some(true));
    }

    #[test]
    fn failing_error_subscriber_does_not_stop_delivery() {
        let errors = Arc::new(Errors::default());
        let notifier = notifier(vec![erase(Arc::new(Exploding)), erase(errors.clone())]);

        notifier.isolate(Stage::SkipHandler, || notifier.skip(SkipReason::NoBehaviors));

        assert_eq!(
            *errors.0.lock(),
            vec!["Skip handler failed: skip handler down".to_string()]
        );
    }

    #[test]
    fn report_carries_experiment_and_context() {
        struct Capture(Mutex<Option<StageError>>);
        impl Subscriber<i32, String> for Capture {
            fn on_error(&self, error: &StageError) {
                *self.0.lock() = Some(error.clone());
            }
        }

        let capture = Arc::new(Capture(Mutex::new(None)));
        let notifier = notifier(vec![erase(capture.clone())]);
        notifier.report(Stage::Map, "bad mapper".to_string());

        let error = capture.0.lock().take().unwrap();
        assert_eq!(error.stage, Stage::Map);
        assert_eq!(&*error.experiment, "test");
        assert_eq!(error.context.get("user"), Some(&serde_json::json!(7)));
    }
}
