//! Out-of-band comparison pipeline
//!
//! Map, settle, compare, publish. Each user-facing step runs in its own
//! isolation stage and a failure ends the pipeline without a result. The
//! pipeline owns everything it touches, so it can be spawned onto a runtime
//! after `run` has returned.

use crate::observation::Observation;
use crate::outcome::{Fault, Value};
use crate::policy::Policy;
use crate::result::ExperimentResult;
use crate::stage::Stage;
use crate::subscriber::Notifier;
use futures::future;
use std::sync::Arc;

/// Transform applied to every observed value before comparison
pub type Mapper<T, U> = Arc<dyn Fn(T) -> U + Send + Sync>;

pub(crate) struct Pipeline<T, E, U> {
    notifier: Notifier<U, E>,
    mapper: Mapper<T, U>,
    policy: Arc<Policy<U, E>>,
    run_async: bool,
}

impl<T: Value, E: Fault, U: Value> Pipeline<T, E, U> {
    pub(crate) fn new(
        notifier: Notifier<U, E>,
        mapper: Mapper<T, U>,
        policy: Arc<Policy<U, E>>,
        run_async: bool,
    ) -> Self {
        Self {
            notifier,
            mapper,
            policy,
            run_async,
        }
    }

    /// Drive `[control, ...candidates]` through to a published result
    pub(crate) async fn run(self, control: Observation<T, E>, candidates: Vec<Observation<T, E>>) {
        let experiment = &self.notifier.info().name;

        let Some(mapped) = self
            .notifier
            .isolate(Stage::Map, || Ok(self.map_all(&control, &candidates)))
        else {
            return;
        };

        let settled = if self.run_async {
            future::join_all(mapped.iter().map(|observation| observation.settle())).await
        } else {
            mapped
        };

        let mut settled = settled.into_iter();
        let Some(control) = settled.next() else {
            return;
        };
        let candidates: Vec<_> = settled.collect();

        let Some(result) = self.notifier.isolate(Stage::Comparison, || {
            Ok(ExperimentResult::new(
                self.notifier.info().clone(),
                control,
                candidates,
            ))
        }) else {
            return;
        };

        tracing::debug!(
            experiment = %experiment,
            matched = result.matched().len(),
            mismatched = result.mismatched().len(),
            ignored = result.ignored().len(),
            "experiment compared"
        );

        self.notifier
            .isolate(Stage::ResultHandler, || self.notifier.result(&result));
    }

    fn map_all(
        &self,
        control: &Observation<T, E>,
        candidates: &[Observation<T, E>],
    ) -> Vec<Observation<U, E>> {
        std::iter::once(control)
            .chain(candidates)
            .map(|observation| {
                let mapper = Arc::clone(&self.mapper);
                let policy = Arc::clone(&self.policy);
                if self.run_async {
                    observation.defer().map_into(policy, move |value| mapper(value))
                } else {
                    observation.map_into(policy, move |value| mapper(value))
                }
            })
            .collect()
    }
}
