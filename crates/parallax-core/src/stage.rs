//! Isolation stages for user-supplied callbacks
//!
//! Every callback an experiment does not own (sampler, skipper, mapper,
//! comparator, subscribers) runs inside a named [`Stage`]. A failure there,
//! whether a returned error or a panic, is turned into a [`StageError`] and
//! never reaches the caller of `run`.
//!
//! Captured panics still pass through the process panic hook, which prints
//! them to stderr by default. Call [`quiet_isolated_panics`] once at startup
//! to log them through `tracing` instead.

use crate::subscriber::Context;
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

thread_local! {
    static ISOLATION_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Named isolation boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Sampling decision
    Sampler,
    /// Skip predicate
    Skipper,
    /// Skip notification
    SkipHandler,
    /// Value mapping
    Map,
    /// Result construction (ignorers and comparator)
    Comparison,
    /// Result notification
    ResultHandler,
}

impl Stage {
    /// Label used in decorated error messages
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Stage::Sampler => "Sampler",
            Stage::Skipper => "Skipper",
            Stage::SkipHandler => "Skip handler",
            Stage::Map => "Map",
            Stage::Comparison => "Comparison",
            Stage::ResultHandler => "Result handler",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Failure caught inside a stage, decorated with experiment details
#[derive(Debug, Clone, thiserror::Error)]
#[error("{stage} failed: {message}")]
pub struct StageError {
    /// Stage that failed
    pub stage: Stage,
    /// Original failure message
    pub message: String,
    /// Owning experiment
    pub experiment: Arc<str>,
    /// Experiment context when the failure happened
    pub context: Context,
}

impl StageError {
    /// Decorate a failure message
    #[must_use]
    pub fn new(
        stage: Stage,
        message: impl Into<String>,
        experiment: Arc<str>,
        context: Context,
    ) -> Self {
        Self {
            stage,
            message: message.into(),
            experiment,
            context,
        }
    }
}

/// Run `f`, converting a returned error or a panic into its message
pub(crate) fn catch<R>(f: impl FnOnce() -> anyhow::Result<R>) -> Result<R, String> {
    catch_panic(f)?.map_err(|err| err.to_string())
}

/// Run `f`, capturing a panic as its message
///
/// While `f` runs, panics on this thread count as isolated.
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    ISOLATION_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let caught = panic::catch_unwind(AssertUnwindSafe(f));
    ISOLATION_DEPTH.with(|depth| depth.set(depth.get() - 1));
    caught.map_err(|payload| panic_message(payload.as_ref()))
}

/// True while this thread runs code whose panics are captured
pub(crate) fn is_isolating() -> bool {
    ISOLATION_DEPTH.with(Cell::get) > 0
}

/// Log captured panics at `debug` instead of printing them
///
/// Installs a panic hook that handles panics raised inside behaviors and
/// isolation stages, and hands every other panic to the hook it replaced.
/// Calling it again does nothing.
pub fn quiet_isolated_panics() {
    static INSTALL: Once = Once::new();

    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if is_isolating() {
                tracing::debug!(panic = %info, "isolated panic");
            } else {
                previous(info);
            }
        }));
    });
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
