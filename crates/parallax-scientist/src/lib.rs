//! Parallax Scientist - experiment orchestration
//!
//! Process-wide collaborator for [`parallax_core`]:
//! - Holds the default sampler every experiment is run with
//! - Announces experiments and relays their events to publishers
//! - Renders results into serializable summaries
//! - Loads sampling settings from configuration
//!
//! # Example
//!
//! ```rust
//! use parallax_scientist::{Scientist, ScientistConfig, TracingPublisher};
//! use std::sync::Arc;
//!
//! let config = ScientistConfig::new().with_sample_rate(1.0);
//! let scientist = Scientist::from_config(&config)?;
//! scientist.subscribe(Arc::new(TracingPublisher));
//!
//! let total = scientist.science::<u32, String>("totals", |experiment| {
//!     experiment.use_control(|| Ok(1 + 2 + 3))?;
//!     experiment.candidate(|| Ok(6))?;
//!     Ok(())
//! })?;
//!
//! assert_eq!(total, Ok(6));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod publisher;
pub mod scientist;
pub mod summary;

// Re-exports for convenience
pub use config::{ConfigError, Sampler, ScientistConfig};
pub use publisher::{Publisher, TracingPublisher};
pub use scientist::Scientist;
pub use summary::{ObservationSummary, ResultSummary};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
