//! Client side of a cluster resource manager.

use std::fmt;
use std::io;
use std::sync::Arc;

use common::class::ClassLoader;
use common::fs::FileSystem;

use crate::config::Configuration;

mod local;

pub use local::LocalCluster;

/// Operations consumed from a cluster resource manager.
pub trait Cluster: Send + Sync {
    /// A fresh configuration carrying the cluster's defaults.
    fn create_configuration(&self) -> Configuration;

    /// Hands a job to the cluster. The job is running once this returns.
    fn submit_job(&self, conf: Configuration) -> io::Result<Box<dyn RunningJob>>;

    /// The filesystem jobs configured with `conf` read and write.
    fn file_system(&self, conf: &Configuration) -> io::Result<Arc<dyn FileSystem>>;

    /// Classes available to jobs on this cluster.
    fn class_loader(&self) -> Arc<dyn ClassLoader>;

    /// Short name of the cluster, used to derive installation ids.
    fn identifier(&self) -> String;
}

/// A job accepted by a cluster.
///
/// Progress values are fractions between 0 and 1.
pub trait RunningJob: Send + Sync {
    fn job_id(&self) -> String;

    fn is_complete(&self) -> io::Result<bool>;

    fn is_successful(&self) -> io::Result<bool>;

    fn setup_progress(&self) -> io::Result<f32>;

    fn map_progress(&self) -> io::Result<f32>;

    fn reduce_progress(&self) -> io::Result<f32>;

    /// Task completion events starting at index `from`.
    fn task_completion_events(&self, from: usize) -> io::Result<Vec<TaskCompletionEvent>>;

    /// Diagnostic messages recorded for one task attempt.
    fn task_diagnostics(&self, attempt: &TaskAttemptId) -> io::Result<Vec<String>>;

    fn kill_job(&self) -> io::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    Setup,
    Map,
    Reduce,
}

/// Identifies one attempt at running one task of a job.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskAttemptId {
    pub job_id: String,
    pub kind: TaskKind,
    pub task: usize,
    pub attempt: usize,
}

impl fmt::Display for TaskAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TaskKind::Setup => "s",
            TaskKind::Map => "m",
            TaskKind::Reduce => "r",
        };
        write!(
            f,
            "attempt_{}_{}_{:06}_{}",
            self.job_id, kind, self.task, self.attempt
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Killed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskCompletionEvent {
    /// Position of this event in the job's event log.
    pub event_id: usize,
    pub attempt: TaskAttemptId,
    pub status: TaskStatus,
}
