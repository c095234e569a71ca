//! Where blocking waits and the comparison pipeline run
//!
//! A multi-threaded tokio runtime can give up a worker with
//! `block_in_place`, so blocking waits there drive work on the runtime and
//! timers or I/O keep making progress. A current-thread runtime has no
//! worker to spare, so blocking on deferred work there is refused.

use std::future::Future;
use tokio::runtime::{Builder, Handle, RuntimeFlavor};

/// Name of the thread that carries a pipeline when no runtime is current
pub(crate) const PIPELINE_THREAD: &str = "parallax-pipeline";

/// False on a current-thread runtime, where blocking would stall it
pub(crate) fn can_block() -> bool {
    !matches!(
        Handle::try_current(),
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread
    )
}

/// Drive `work` to completion from synchronous code
pub(crate) fn wait<F: Future>(work: F) -> F::Output {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(move || handle.block_on(work))
        }
        _ => futures::executor::block_on(work),
    }
}

/// Run `work` off the caller's path
///
/// Spawned on the current runtime if there is one, otherwise on a dedicated
/// thread with its own current-thread runtime.
pub(crate) fn detach<F>(work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        drop(handle.spawn(work));
        return;
    }

    let spawned = std::thread::Builder::new()
        .name(PIPELINE_THREAD.to_string())
        .spawn(move || match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime.block_on(work),
            Err(err) => {
                tracing::warn!(%err, "pipeline runtime unavailable, polling without one");
                futures::executor::block_on(work);
            }
        });

    if let Err(err) = spawned {
        tracing::error!(%err, "pipeline thread failed to start, result dropped");
    }
}
