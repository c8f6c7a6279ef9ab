//! Submission and completion tracking of MapReduce jobs.
//!
//! A job is either a driver started in this process through
//! [`InProcessExecutor`], or a configured job submitted to a [`Cluster`]
//! through [`JobConfigurationBuilder`]. Both are tracked through the
//! [`JobHandle`] contract. [`MapReduceService`] bundles the common flows.

pub mod artifact;
pub mod builder;
pub mod cluster;
pub mod config;
pub mod error;
pub mod handle;
pub mod installer;
pub mod resolver;
pub mod service;

pub use builder::{parse_task_count, JobConfigurationBuilder};
pub use cluster::{Cluster, LocalCluster, RunningJob};
pub use config::{Configuration, Properties};
pub use error::{
    ConfigurationError, InstallationError, JobError, JobExecutionError, ResolutionError,
    SubmissionError,
};
pub use handle::{
    InProcessExecutor, InProcessJobHandle, JobHandle, NeverStop, RemoteJobHandle, StopSignal,
};
pub use installer::EnvironmentInstaller;
pub use resolver::DriverInfo;
pub use service::MapReduceService;
