//! Publishers: process-wide receivers of experiment events
//!
//! A [`Publisher`] sees every experiment a [`Scientist`](crate::Scientist)
//! conducts, whatever its value type. Results arrive as [`ResultSummary`].

use crate::summary::ResultSummary;
use parallax_core::{ExperimentInfo, SkipReason, StageError};

/// Receiver of events from every experiment
///
/// All methods default to doing nothing. Errors from `on_skip` and
/// `on_result` are reported back through `on_error` as stage failures.
pub trait Publisher: Send + Sync {
    /// An experiment is about to run
    fn on_experiment(&self, experiment: &ExperimentInfo) {
        let _ = experiment;
    }

    /// An experiment was skipped
    fn on_skip(&self, experiment: &ExperimentInfo, reason: SkipReason) -> anyhow::Result<()> {
        let _ = (experiment, reason);
        Ok(())
    }

    /// An experiment produced a result
    fn on_result(&self, summary: &ResultSummary) -> anyhow::Result<()> {
        let _ = summary;
        Ok(())
    }

    /// A stage of an experiment failed
    fn on_error(&self, error: &StageError) {
        let _ = error;
    }
}

/// Publisher that writes events to `tracing`
///
/// Matches log at `info`, mismatches at `warn` with both inspections, stage
/// failures at `error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPublisher;

impl Publisher for TracingPublisher {
    fn on_experiment(&self, experiment: &ExperimentInfo) {
        tracing::debug!(experiment = %experiment.name, "experiment started");
    }

    fn on_skip(&self, experiment: &ExperimentInfo, reason: SkipReason) -> anyhow::Result<()> {
        tracing::debug!(experiment = %experiment.name, %reason, "experiment skipped");
        Ok(())
    }

    fn on_result(&self, summary: &ResultSummary) -> anyhow::Result<()> {
        if summary.all_matched() {
            tracing::info!(
                experiment = %summary.experiment,
                matched = summary.matched.len(),
                ignored = summary.ignored.len(),
                control_ms = summary.control.duration_ms,
                "experiment matched"
            );
            return Ok(());
        }

        for name in &summary.mismatched {
            let Some(candidate) = summary.candidate(name) else {
                continue;
            };
            tracing::warn!(
                experiment = %summary.experiment,
                candidate = %candidate.name,
                control = %summary.control.inspection,
                observed = %candidate.inspection,
                control_ms = summary.control.duration_ms,
                candidate_ms = candidate.duration_ms,
                "experiment mismatched"
            );
        }
        Ok(())
    }

    fn on_error(&self, error: &StageError) {
        tracing::error!(
            experiment = %error.experiment,
            stage = %error.stage,
            "{error}"
        );
    }
}
