//! Testing utilities for the Parallax workspace
//!
//! Shared subscribers, behavior fixtures and tracing setup.

#![allow(missing_docs)]

use parallax_core::{ExperimentInfo, ExperimentResult, SkipReason, StageError, Subscriber};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use parallax_core::ManualClock;

/// How long [`Events::next`] waits before giving up
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// One delivered notification
#[derive(Debug, Clone)]
pub enum Event<U, E> {
    Skip {
        experiment: ExperimentInfo,
        reason: SkipReason,
    },
    Result(ExperimentResult<U, E>),
    Error(StageError),
}

impl<U, E> Event<U, E> {
    pub fn into_result(self) -> Option<ExperimentResult<U, E>> {
        match self {
            Event::Result(result) => Some(result),
            _ => None,
        }
    }

    pub fn into_error(self) -> Option<StageError> {
        match self {
            Event::Error(error) => Some(error),
            _ => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Event::Skip { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Subscriber that forwards every event into a channel
pub struct RecordingSubscriber<U, E> {
    tx: mpsc::UnboundedSender<Event<U, E>>,
}

/// Receiving end of a [`RecordingSubscriber`]
pub struct Events<U, E> {
    rx: mpsc::UnboundedReceiver<Event<U, E>>,
}

/// Create a recording subscriber and its event stream
pub fn recorder<U, E>() -> (Arc<RecordingSubscriber<U, E>>, Events<U, E>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingSubscriber { tx }), Events { rx })
}

impl<U, E> Subscriber<U, E> for RecordingSubscriber<U, E>
where
    U: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    fn on_skip(&self, experiment: &ExperimentInfo, reason: SkipReason) -> anyhow::Result<()> {
        let _ = self.tx.send(Event::Skip {
            experiment: experiment.clone(),
            reason,
        });
        Ok(())
    }

    fn on_result(&self, result: &ExperimentResult<U, E>) -> anyhow::Result<()> {
        let _ = self.tx.send(Event::Result(result.clone()));
        Ok(())
    }

    fn on_error(&self, error: &StageError) {
        let _ = self.tx.send(Event::Error(error.clone()));
    }
}

impl<U, E> Events<U, E> {
    /// Wait for the next event, up to [`EVENT_TIMEOUT`]
    pub async fn next(&mut self) -> Option<Event<U, E>> {
        tokio::time::timeout(EVENT_TIMEOUT, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Blocking form of [`Events::next`] for tests without a runtime
    pub fn next_blocking(&mut self) -> Option<Event<U, E>> {
        let deadline = Instant::now() + EVENT_TIMEOUT;
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) if Instant::now() >= deadline => return None,
                Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(1)),
            }
        }
    }

    /// Every event delivered so far
    pub fn drain(&mut self) -> Vec<Event<U, E>> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Subscriber whose skip and result handlers fail with `message`
pub struct FailingSubscriber {
    message: String,
}

impl FailingSubscriber {
    pub fn new(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            message: message.into(),
        })
    }
}

impl<U, E> Subscriber<U, E> for FailingSubscriber {
    fn on_skip(&self, _: &ExperimentInfo, _: SkipReason) -> anyhow::Result<()> {
        anyhow::bail!("{}", self.message)
    }

    fn on_result(&self, _: &ExperimentResult<U, E>) -> anyhow::Result<()> {
        anyhow::bail!("{}", self.message)
    }
}

/// Counts invocations across every behavior it builds
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicUsize>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Behavior returning `value`
    pub fn returning<T, E>(&self, value: T) -> impl Fn() -> Result<T, E> + Send + Sync + 'static
    where
        T: Clone + Send + Sync + 'static,
        E: 'static,
    {
        let calls = Arc::clone(&self.calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value.clone())
        }
    }

    /// Behavior failing with `error`
    pub fn failing<T, E>(&self, error: E) -> impl Fn() -> Result<T, E> + Send + Sync + 'static
    where
        T: 'static,
        E: Clone + Send + Sync + 'static,
    {
        let calls = Arc::clone(&self.calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(error.clone())
        }
    }
}

/// Records the order behaviors ran in
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    order: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behavior that logs `name` and returns `value`
    pub fn behavior<T, E>(
        &self,
        name: &str,
        value: T,
    ) -> impl Fn() -> Result<T, E> + Send + Sync + 'static
    where
        T: Clone + Send + Sync + 'static,
        E: 'static,
    {
        let order = Arc::clone(&self.order);
        let name = name.to_string();
        move || {
            order.lock().push(name.clone());
            Ok(value.clone())
        }
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().clone()
    }

    pub fn clear(&self) {
        self.order.lock().clear();
    }
}

/// Install a test-friendly tracing subscriber
///
/// Reads `RUST_LOG`, defaulting to `warn`. Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer().compact())
        .try_init();
}
