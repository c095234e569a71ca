//! Captured outcomes of a behavior
//!
//! A behavior either returns a value, fails with its own error, panics, or
//! hands back work that has not finished yet. [`Pending`] wraps that
//! unfinished work in a shared future so the caller and the comparison
//! pipeline can both await the same result.

use crate::stage;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::task::Poll;

/// Bounds required of values flowing through an experiment
pub trait Value: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + fmt::Debug + Send + Sync + 'static {}

/// Bounds required of errors returned by behaviors
pub trait Fault: Clone + fmt::Display + fmt::Debug + Send + Sync + 'static {}

impl<E> Fault for E where E: Clone + fmt::Display + fmt::Debug + Send + Sync + 'static {}

/// What a single behavior execution produced
#[derive(Debug, Clone)]
pub enum Outcome<V, E> {
    /// The behavior returned a value
    Returned(V),
    /// The behavior returned an error
    Failed(E),
    /// The behavior panicked with this message
    Panicked(String),
    /// The behavior returned work that is still in flight
    Pending(Pending<V, E>),
}

impl<V, E> Outcome<V, E> {
    /// Capture a behavior's result
    #[inline]
    pub fn from_result(result: Result<V, E>) -> Self {
        match result {
            Ok(value) => Outcome::Returned(value),
            Err(error) => Outcome::Failed(error),
        }
    }

    /// True unless the behavior failed or panicked
    ///
    /// In-flight work counts as returned: the handle itself is the value.
    #[inline]
    #[must_use]
    pub fn is_returned(&self) -> bool {
        matches!(self, Outcome::Returned(_) | Outcome::Pending(_))
    }

    /// True if the outcome is still in flight
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending(_))
    }

    /// The returned value, if any
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&V> {
        match self {
            Outcome::Returned(value) => Some(value),
            _ => None,
        }
    }

    /// The returned error, if any
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&E> {
        match self {
            Outcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Shared handle to an in-flight behavior
///
/// Resolves to a settled [`Outcome`]; panics inside the work are caught and
/// resolve to [`Outcome::Panicked`].
pub struct Pending<V, E> {
    inner: Shared<BoxFuture<'static, Outcome<V, E>>>,
}

impl<V: Value, E: Fault> Pending<V, E> {
    /// Wrap a future produced by a behavior
    pub fn new<F>(work: F) -> Self
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut work = Box::pin(work);
        let guarded = future::poll_fn(move |cx| match stage::catch_panic(|| work.as_mut().poll(cx)) {
            Ok(Poll::Ready(result)) => Poll::Ready(Outcome::from_result(result)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(message) => Poll::Ready(Outcome::Panicked(message)),
        });

        Self {
            inner: guarded.boxed().shared(),
        }
    }

    /// Already-resolved handle
    pub fn ready(outcome: Outcome<V, E>) -> Self {
        Self {
            inner: future::ready(outcome).boxed().shared(),
        }
    }

    /// Await the settled outcome
    pub async fn resolve(&self) -> Outcome<V, E> {
        let mut outcome = self.inner.clone().await;
        loop {
            match outcome {
                Outcome::Pending(next) => outcome = next.inner.clone().await,
                settled => return settled,
            }
        }
    }

    /// Settled outcome if the work already finished
    #[must_use]
    pub fn peek(&self) -> Option<Outcome<V, E>> {
        self.inner.peek().cloned()
    }

    /// Compose a transform onto the eventual value
    ///
    /// The transform runs when the work resolves; a panic there resolves the
    /// new handle to [`Outcome::Panicked`]. Errors pass through untouched.
    pub fn map<W, F>(&self, f: F) -> Pending<W, E>
    where
        W: Value,
        F: FnOnce(V) -> W + Send + 'static,
    {
        let source = self.clone();
        let mapped = async move {
            match source.resolve().await {
                Outcome::Returned(value) => {
                    match stage::catch_panic(move || f(value)) {
                        Ok(mapped) => Outcome::Returned(mapped),
                        Err(message) => Outcome::Panicked(message),
                    }
                }
                Outcome::Failed(error) => Outcome::Failed(error),
                Outcome::Panicked(message) => Outcome::Panicked(message),
                Outcome::Pending(next) => Outcome::Pending(next.map(f)),
            }
        };

        Pending {
            inner: mapped.boxed().shared(),
        }
    }
}

impl<V, E> Clone for Pending<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V, E> fmt::Debug for Pending<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}
