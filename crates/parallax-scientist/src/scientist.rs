//! Scientist: default sampling and event relay across experiments

use crate::config::{ConfigError, Sampler, ScientistConfig};
use crate::publisher::Publisher;
use crate::summary::ResultSummary;
use parallax_core::{
    Experiment, ExperimentError, ExperimentInfo, ExperimentResult, Fault, SkipReason, StageError,
    Subscriber, Value,
};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Owns the default sampler and the publishers every experiment reports to
pub struct Scientist {
    sampler: RwLock<Sampler>,
    publishers: RwLock<Vec<Arc<dyn Publisher>>>,
}

impl Scientist {
    /// Create a scientist that samples every experiment
    #[must_use]
    pub fn new() -> Self {
        let always: Sampler = Arc::new(|_: &str| true);
        Self {
            sampler: RwLock::new(always),
            publishers: RwLock::new(Vec::new()),
        }
    }

    /// Create a scientist sampling according to `config`
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidSampleRate`] if a rate is out of range.
    pub fn from_config(config: &ScientistConfig) -> Result<Self, ConfigError> {
        let scientist = Self::new();
        *scientist.sampler.write() = config.sampler()?;
        Ok(scientist)
    }

    /// Replace the default sampler
    pub fn sample(&self, sampler: impl Fn(&str) -> bool + Send + Sync + 'static) {
        *self.sampler.write() = Arc::new(sampler);
    }

    /// Add a publisher; it sees experiments conducted from now on
    pub fn subscribe(&self, publisher: Arc<dyn Publisher>) {
        self.publishers.write().push(publisher);
    }

    /// Number of registered publishers
    #[must_use]
    pub fn publisher_count(&self) -> usize {
        self.publishers.read().len()
    }

    /// Create, configure and run an experiment
    ///
    /// # Errors
    ///
    /// Whatever `setup` returns, or [`ExperimentError::MissingControl`].
    pub fn science<T, E>(
        &self,
        name: &str,
        setup: impl FnOnce(&mut Experiment<T, E>) -> Result<(), ExperimentError>,
    ) -> Result<Result<T, E>, ExperimentError>
    where
        T: Value + PartialEq,
        E: Fault,
    {
        let mut experiment = Experiment::new(name);
        setup(&mut experiment)?;
        self.conduct(experiment)
    }

    /// Async form of [`Scientist::science`]
    ///
    /// # Errors
    ///
    /// Whatever `setup` returns, or [`ExperimentError::MissingControl`].
    pub async fn science_async<T, E>(
        &self,
        name: &str,
        setup: impl FnOnce(&mut Experiment<T, E>) -> Result<(), ExperimentError>,
    ) -> Result<Result<T, E>, ExperimentError>
    where
        T: Value + PartialEq,
        E: Fault,
    {
        let mut experiment = Experiment::new(name);
        setup(&mut experiment)?;
        self.conduct_async(experiment).await
    }

    /// Run a prepared experiment with the default sampler
    ///
    /// Publishers are announced the experiment and receive its events.
    ///
    /// # Errors
    ///
    /// [`ExperimentError::MissingControl`] if no control was registered.
    pub fn conduct<T, E, U>(
        &self,
        mut experiment: Experiment<T, E, U>,
    ) -> Result<Result<T, E>, ExperimentError>
    where
        T: Value,
        E: Fault,
        U: Value,
    {
        let sampler = self.prepare(&mut experiment);
        experiment.run(|name| sampler(name))
    }

    /// Async form of [`Scientist::conduct`]
    ///
    /// # Errors
    ///
    /// [`ExperimentError::MissingControl`] if no control was registered.
    pub async fn conduct_async<T, E, U>(
        &self,
        mut experiment: Experiment<T, E, U>,
    ) -> Result<Result<T, E>, ExperimentError>
    where
        T: Value,
        E: Fault,
        U: Value,
    {
        let sampler = self.prepare(&mut experiment);
        experiment.run_async(move |name| sampler(name)).await
    }

    /// Announce the experiment, attach the relay and snapshot the sampler
    fn prepare<T, E, U>(&self, experiment: &mut Experiment<T, E, U>) -> Sampler
    where
        T: Value,
        E: Fault,
        U: Value,
    {
        let publishers: Arc<[Arc<dyn Publisher>]> = self.publishers.read().clone().into();
        let info = ExperimentInfo::new(experiment.name(), experiment.context().clone());
        for publisher in publishers.iter() {
            publisher.on_experiment(&info);
        }

        experiment.subscribe(Arc::new(Relay { publishers }));
        Arc::clone(&self.sampler.read())
    }
}

impl Default for Scientist {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scientist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scientist")
            .field("publishers", &self.publisher_count())
            .finish_non_exhaustive()
    }
}

/// Forwards one experiment's events to every publisher
struct Relay {
    publishers: Arc<[Arc<dyn Publisher>]>,
}

impl<U: Value, E: Fault> Subscriber<U, E> for Relay {
    fn on_skip(&self, experiment: &ExperimentInfo, reason: SkipReason) -> anyhow::Result<()> {
        for publisher in self.publishers.iter() {
            publisher.on_skip(experiment, reason)?;
        }
        Ok(())
    }

    fn on_result(&self, result: &ExperimentResult<U, E>) -> anyhow::Result<()> {
        let summary = ResultSummary::from_result(result);
        for publisher in self.publishers.iter() {
            publisher.on_result(&summary)?;
        }
        Ok(())
    }

    fn on_error(&self, error: &StageError) {
        for publisher in self.publishers.iter() {
            publisher.on_error(error);
        }
    }
}
