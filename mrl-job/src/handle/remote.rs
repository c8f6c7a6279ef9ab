use std::io;
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cluster::{RunningJob, TaskAttemptId, TaskCompletionEvent};
use crate::error::JobError;
use crate::handle::{JobHandle, StopSignal};

/// Handle on a job running on a cluster.
///
/// Everything except waiting is a direct query of the cluster, and cluster
/// I/O errors are returned unchanged.
pub struct RemoteJobHandle {
    job: Box<dyn RunningJob>,
    poll_interval: Duration,
    status: OnceLock<i32>,
}

impl RemoteJobHandle {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(job: Box<dyn RunningJob>) -> Self {
        Self {
            job,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            status: OnceLock::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn job_id(&self) -> String {
        self.job.job_id()
    }

    pub fn is_complete(&self) -> io::Result<bool> {
        let complete = self.job.is_complete()?;
        if complete && self.status.get().is_none() {
            let status = if self.job.is_successful()? { 0 } else { 1 };
            let _ = self.status.set(status);
        }
        Ok(complete)
    }

    pub fn is_successful(&self) -> io::Result<bool> {
        self.job.is_successful()
    }

    pub fn setup_progress(&self) -> io::Result<f32> {
        self.job.setup_progress()
    }

    pub fn map_progress(&self) -> io::Result<f32> {
        self.job.map_progress()
    }

    pub fn reduce_progress(&self) -> io::Result<f32> {
        self.job.reduce_progress()
    }

    pub fn task_completion_events(&self, from: usize) -> io::Result<Vec<TaskCompletionEvent>> {
        self.job.task_completion_events(from)
    }

    pub fn task_diagnostics(&self, attempt: &TaskAttemptId) -> io::Result<Vec<String>> {
        self.job.task_diagnostics(attempt)
    }

    pub fn kill_job(&self) -> io::Result<()> {
        info!("killing job {}", self.job.job_id());
        self.job.kill_job()
    }

    /// Polls for completion until `timeout` passes or `stop` fires.
    pub fn wait_on_completion(&self, timeout: Duration, stop: &dyn StopSignal) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if stop.is_stopped() {
                debug!("stopped waiting on job {}", self.job.job_id());
                return Ok(false);
            }
            if self.is_complete()? {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            thread::sleep(self.poll_interval.min(remaining));
        }
    }
}

impl JobHandle for RemoteJobHandle {
    fn status(&self) -> Option<i32> {
        self.status.get().copied()
    }

    fn is_complete(&self) -> Result<bool, JobError> {
        Ok(RemoteJobHandle::is_complete(self)?)
    }

    fn is_successful(&self) -> Result<bool, JobError> {
        Ok(RemoteJobHandle::is_successful(self)?)
    }

    fn kill_job(&self) -> Result<(), JobError> {
        Ok(RemoteJobHandle::kill_job(self)?)
    }

    fn wait_on_completion(&self, timeout: Duration, stop: &dyn StopSignal) -> Result<bool, JobError> {
        Ok(RemoteJobHandle::wait_on_completion(self, timeout, stop)?)
    }
}
