//! Pollable, cancellable handles on running jobs.
//!
//! A job either runs in this process ([`InProcessJobHandle`]) or on a
//! cluster ([`RemoteJobHandle`]); callers drive both through [`JobHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::JobError;

mod in_process;
mod remote;

pub use in_process::{ExecutionOutcome, InProcessExecutor, InProcessJobHandle};
pub use remote::RemoteJobHandle;

/// Shared contract of in-process and remote jobs.
///
/// While a job is incomplete its status is `None` and it is not successful.
pub trait JobHandle: Send + Sync {
    /// Exit status, once known.
    fn status(&self) -> Option<i32>;

    fn is_complete(&self) -> Result<bool, JobError>;

    fn is_successful(&self) -> Result<bool, JobError>;

    /// Asks the job to stop. Killing a finished job has no effect.
    fn kill_job(&self) -> Result<(), JobError>;

    /// Blocks until the job completes, `timeout` elapses or `stop` fires.
    ///
    /// Returns `true` once the job is done and `false` on timeout or stop.
    /// Neither a timeout nor a stop kills the job.
    fn wait_on_completion(&self, timeout: Duration, stop: &dyn StopSignal) -> Result<bool, JobError>;
}

/// Cooperative stop request, polled by waiters.
pub trait StopSignal: Send + Sync {
    fn is_stopped(&self) -> bool;
}

/// A signal that never fires.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverStop;

impl StopSignal for NeverStop {
    fn is_stopped(&self) -> bool {
        false
    }
}

impl StopSignal for AtomicBool {
    fn is_stopped(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

impl StopSignal for CancellationToken {
    fn is_stopped(&self) -> bool {
        self.is_cancelled()
    }
}

impl<F> StopSignal for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_stopped(&self) -> bool {
        self()
    }
}
