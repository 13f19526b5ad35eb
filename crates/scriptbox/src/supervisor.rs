//! Deadline supervision for execution units.
//!
//! The unit runs on its own OS thread while the caller awaits its outcome with
//! a deadline. wasmtime offers no way to interrupt a guest from outside here,
//! so when the deadline passes the caller gets [`SandboxError::Timeout`] and
//! the thread is left to finish (or spin) on its own. Its cancellation token is
//! cancelled so pending host calls bail out early.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SandboxError};

/// Run `job` on a dedicated thread and wait up to `limit` for it.
///
/// `None` waits indefinitely. A panic inside `job` is resumed on the caller.
pub(crate) async fn run_with_deadline<T, F>(
    limit: Option<Duration>,
    cancel: CancellationToken,
    job: F,
) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("scriptbox-unit".to_string())
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            // Receiver is gone once the caller timed out.
            let _ = tx.send(outcome);
        })?;

    let outcome = match limit {
        Some(limit) => match tokio::time::timeout(limit, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                tracing::warn!(
                    limit_ms = limit.as_millis() as u64,
                    "script exceeded its deadline; execution unit left running in background"
                );
                return Err(SandboxError::Timeout { limit });
            }
        },
        None => rx.await,
    };

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => panic::resume_unwind(payload),
        Err(_) => Err(SandboxError::Wasm(
            "execution thread exited without reporting".to_string(),
        )),
    }
}
