//! Entry point tying the resolver, builder, installer and handles together.

use std::sync::Arc;

use tracing::info;

use common::utils::split_args;

use crate::builder::JobConfigurationBuilder;
use crate::cluster::Cluster;
use crate::error::JobError;
use crate::handle::{InProcessExecutor, InProcessJobHandle, RemoteJobHandle};
use crate::installer::EnvironmentInstaller;
use crate::resolver::{self, DriverInfo};

/// Runs MapReduce applications in process or on a cluster.
pub struct MapReduceService {
    cluster: Arc<dyn Cluster>,
    executor: InProcessExecutor,
}

impl MapReduceService {
    pub fn new(cluster: Arc<dyn Cluster>, executor: InProcessExecutor) -> Self {
        Self { cluster, executor }
    }

    pub fn cluster(&self) -> &dyn Cluster {
        self.cluster.as_ref()
    }

    /// Resolves the driver of `jar_url` and starts it in this process.
    ///
    /// `command_line` is split on single spaces.
    pub fn execute_simple(
        &self,
        jar_url: &str,
        driver: Option<&str>,
        command_line: Option<&str>,
    ) -> Result<InProcessJobHandle, JobError> {
        let loader = self.cluster.class_loader();
        let driver = resolver::resolve(driver, jar_url, loader.as_ref())?;
        self.executor.execute(&driver, split_args(command_line))
    }

    pub fn create_job_builder(&self) -> JobConfigurationBuilder {
        JobConfigurationBuilder::new()
    }

    pub fn jar_info(&self, jar_url: &str) -> Result<DriverInfo, JobError> {
        let loader = self.cluster.class_loader();
        Ok(resolver::jar_info(jar_url, loader.as_ref())?)
    }

    /// Installs the job environment if needed, then submits `builder`.
    pub fn submit(
        &self,
        builder: &JobConfigurationBuilder,
        installer: Option<&EnvironmentInstaller>,
    ) -> Result<RemoteJobHandle, JobError> {
        let cluster_id = self.cluster.identifier();
        let handle = builder.submit_with(self.cluster.as_ref(), |conf, fs| {
            if let Some(installer) = installer {
                installer.ensure_installed(conf, fs, &cluster_id)?;
            }
            Ok(())
        })?;
        info!("job {} running on {cluster_id}", handle.job_id());
        Ok(handle)
    }
}
