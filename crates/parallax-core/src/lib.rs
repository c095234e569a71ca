//! Parallax Core - experiment engine
//!
//! Runs replacement code paths beside a trusted one and compares what they
//! produce:
//! - Registers a control behavior and any number of candidates
//! - Runs all of them once per call, in random order, with timing
//! - Settles in-flight results so blocking and async behaviors compare alike
//! - Classifies candidates as ignored, matched or mismatched
//! - Isolates failures in user callbacks and reports them to subscribers
//!
//! The caller only ever sees the control's own outcome. Captured panics are
//! still printed by the default panic hook; [`quiet_isolated_panics`] routes
//! them to `tracing` instead.
//!
//! # Example
//!
//! ```rust
//! use parallax_core::prelude::*;
//! use std::sync::Arc;
//!
//! struct Report;
//!
//! impl Subscriber<usize, String> for Report {
//!     fn on_result(&self, result: &ExperimentResult<usize, String>) -> anyhow::Result<()> {
//!         assert_eq!(result.mismatched().len(), 0);
//!         Ok(())
//!     }
//! }
//!
//! let mut experiment = Experiment::<String, String, usize>::with_mapper("name-length", |s| s.len());
//! experiment.use_control(|| Ok("alice".to_string()))?;
//! experiment.try_candidate("shouting", || Ok("ALICE".to_string()))?;
//! experiment.subscribe(Arc::new(Report));
//!
//! assert_eq!(experiment.run(|_| true)?, Ok("alice".to_string()));
//! # Ok::<(), ExperimentError>(())
//! ```

#![warn(unreachable_pub)]

// Core modules
pub mod error;
pub mod experiment;
pub mod measurement;
pub mod observation;
pub mod outcome;
mod pipeline;
pub mod policy;
pub mod result;
mod runtime;
pub mod stage;
pub mod subscriber;

// Re-exports for convenience
pub use error::ExperimentError;
pub use experiment::{Experiment, ExperimentOptions, CONTROL, DEFAULT_CANDIDATE};
pub use measurement::{Clock, ManualClock, Measurement, Stopwatch, SystemClock};
pub use observation::{Observation, Timing};
pub use outcome::{Fault, Outcome, Pending, Value};
pub use pipeline::Mapper;
pub use policy::{Cleaner, Comparator, Ignorer, Policy};
pub use result::ExperimentResult;
pub use stage::{quiet_isolated_panics, Stage, StageError};
pub use subscriber::{Context, ExperimentInfo, SkipReason, Subscriber};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Parallax Core
    pub use crate::{
        Context, Experiment, ExperimentError, ExperimentInfo, ExperimentResult, Observation,
        Outcome, Policy, SkipReason, StageError, Subscriber,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
