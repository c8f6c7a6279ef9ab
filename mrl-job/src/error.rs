//! Error types for job resolution, submission, execution and installation.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use common::class::ClassNotFound;

use crate::artifact::ArtifactError;

/// Boxed cause carried by errors that wrap driver failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The driver class of an artifact could not be determined.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("unable to read artifact {artifact}")]
    ArtifactUnreadable {
        artifact: String,
        #[source]
        source: ArtifactError,
    },

    #[error("unable to load class {class} from {artifact}")]
    ClassLoad {
        class: String,
        artifact: String,
        #[source]
        source: ClassNotFound,
    },

    #[error("class {class} in {artifact} has no main entry point")]
    NotADriver { class: String, artifact: String },

    #[error("driver class not specified and none found in {artifact}")]
    DriverClassNotSpecified { artifact: String },

    #[error("multiple driver classes in {artifact}: {}", .candidates.join(", "))]
    MultipleDriverClasses {
        artifact: String,
        candidates: Vec<String>,
    },
}

/// A job configuration is missing required values or names unusable classes.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("no input paths specified")]
    MissingInputPaths,

    #[error("no output path specified")]
    MissingOutputPath,

    #[error("unknown {field} class {class}")]
    UnknownClass {
        field: &'static str,
        class: String,
        #[source]
        source: ClassNotFound,
    },

    #[error("{field} class {class} is a {found}, expected a {expected}")]
    WrongClassKind {
        field: &'static str,
        class: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("unable to determine driver class")]
    Driver(#[from] ResolutionError),
}

/// An in-process job failed.
#[derive(Debug, Error)]
pub enum JobExecutionError {
    #[error("driver {driver} failed")]
    DriverFailed {
        driver: String,
        #[source]
        source: BoxError,
    },

    #[error("driver {driver} panicked: {message}")]
    DriverPanicked { driver: String, message: String },

    #[error("job execution failed: {0}")]
    Execution(String),
}

/// The cluster rejected a job or the submission itself failed.
///
/// Kept apart from [`JobExecutionError`], which only describes in-process
/// drivers. A rejected submission never produced a running job, so there is
/// no outcome to record and no handle to rethrow it from.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SubmissionError {
    message: String,
    #[source]
    source: io::Error,
}

impl SubmissionError {
    pub fn new(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            message: message.into(),
            source,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Low level reason for an [`InstallationError`].
#[derive(Debug, Error)]
pub enum InstallCause {
    #[error("install dir missing")]
    InstallDirMissing,

    #[error("unable to locate archive {0}")]
    ArchiveNotFound(String),

    #[error("installation missing from {0}")]
    InstallationMissing(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The shared runtime environment could not be installed.
///
/// The message is always `installation failed`; the cause says why.
#[derive(Debug, Error)]
#[error("installation failed")]
pub struct InstallationError {
    #[source]
    cause: InstallCause,
}

impl InstallationError {
    pub fn new(cause: impl Into<InstallCause>) -> Self {
        Self {
            cause: cause.into(),
        }
    }

    pub fn cause(&self) -> &InstallCause {
        &self.cause
    }
}

/// Any failure surfaced by the job API.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Shared so a rethrown error is the same allocation as the recorded one.
    #[error(transparent)]
    Execution(#[from] Arc<JobExecutionError>),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Installation(#[from] InstallationError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_installation_error_messages() {
        let err = InstallationError::new(InstallCause::ArchiveNotFound("env.tar".to_string()));
        assert_eq!(err.to_string(), "installation failed");
        assert_eq!(
            err.source().unwrap().to_string(),
            "unable to locate archive env.tar"
        );
    }

    #[test]
    fn test_multiple_driver_classes_lists_candidates() {
        let err = ResolutionError::MultipleDriverClasses {
            artifact: "file:///a.json".to_string(),
            candidates: vec!["a.A".to_string(), "b.B".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "multiple driver classes in file:///a.json: a.A, b.B"
        );
    }

    #[test]
    fn test_execution_error_keeps_identity() {
        let inner = Arc::new(JobExecutionError::Execution("boom".to_string()));
        let err = JobError::from(inner.clone());
        match err {
            JobError::Execution(arc) => assert!(Arc::ptr_eq(&arc, &inner)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_submission_error_is_not_an_execution_error() {
        let rejected = SubmissionError::new(
            "job submission failed",
            io::Error::new(io::ErrorKind::ConnectionRefused, "cluster down"),
        );
        let err = JobError::from(rejected);
        assert!(matches!(err, JobError::Submission(_)));
        assert_eq!(err.to_string(), "job submission failed");
        assert_eq!(err.source().unwrap().to_string(), "cluster down");
    }
}
