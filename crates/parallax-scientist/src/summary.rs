//! Type-erased, serializable view of a result
//!
//! Publishers handle results from experiments of any value type, so they
//! receive this summary instead of the typed [`ExperimentResult`].

use parallax_core::{Context, ExperimentResult, Fault, Observation, Value};
use serde::Serialize;

/// One observation, rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservationSummary {
    /// Behavior name
    pub name: String,
    /// Elapsed milliseconds
    pub duration_ms: u64,
    /// Whether the behavior returned (rather than failed or panicked)
    pub returned: bool,
    /// Output of `inspect`
    pub inspection: String,
}

impl ObservationSummary {
    /// Render an observation
    #[must_use]
    pub fn from_observation<V: Value, E: Fault>(observation: &Observation<V, E>) -> Self {
        Self {
            name: observation.name().to_string(),
            duration_ms: observation.duration_ms(),
            returned: observation.did_return(),
            inspection: observation.inspect(),
        }
    }
}

/// One result, rendered
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    /// Experiment name
    pub experiment: String,
    /// Context snapshot
    pub context: Context,
    /// Control observation
    pub control: ObservationSummary,
    /// Candidate observations in execution order
    pub candidates: Vec<ObservationSummary>,
    /// Names of ignored candidates
    pub ignored: Vec<String>,
    /// Names of matching candidates
    pub matched: Vec<String>,
    /// Names of mismatching candidates
    pub mismatched: Vec<String>,
}

impl ResultSummary {
    /// Render a result
    #[must_use]
    pub fn from_result<U: Value, E: Fault>(result: &ExperimentResult<U, E>) -> Self {
        let names = |observations: Vec<&Observation<U, E>>| -> Vec<String> {
            observations
                .into_iter()
                .map(|observation| observation.name().to_string())
                .collect()
        };

        Self {
            experiment: result.name().to_string(),
            context: result.context().clone(),
            control: ObservationSummary::from_observation(result.control()),
            candidates: result
                .candidates()
                .iter()
                .map(ObservationSummary::from_observation)
                .collect(),
            ignored: names(result.ignored()),
            matched: names(result.matched()),
            mismatched: names(result.mismatched()),
        }
    }

    /// True when no candidate mismatched
    #[inline]
    #[must_use]
    pub fn all_matched(&self) -> bool {
        self.mismatched.is_empty()
    }

    /// Summary of a candidate by name
    #[must_use]
    pub fn candidate(&self, name: &str) -> Option<&ObservationSummary> {
        self.candidates.iter().find(|candidate| candidate.name == name)
    }
}
