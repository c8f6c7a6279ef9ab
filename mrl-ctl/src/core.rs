use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use common::fs::{FileSystem, LocalFileSystem};
use common::minio::{path_to_bucket_key, ClientConfig, S3FileSystem};
use mrl_job::cluster::TaskStatus;
use mrl_job::config::APPLICATION_CLASSPATH;
use mrl_job::installer::{
    ADDITIONAL_PLUGINS, INSTALLATION_ID, INSTALL_DIR, LIBRARIES_ARCHIVE,
};
use mrl_job::{
    parse_task_count, Configuration, EnvironmentInstaller, InProcessExecutor, JobHandle,
    LocalCluster, MapReduceService, NeverStop, Properties, RemoteJobHandle,
};
use workload::Registry;

use crate::args::{InstallArgs, MinioArgs, SubmitArgs};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

fn service(dfs_root: &Path) -> Result<MapReduceService> {
    let cluster = LocalCluster::new(dfs_root, Arc::new(Registry::builtin()));
    let executor = InProcessExecutor::new(InProcessExecutor::DEFAULT_WORKERS)?;
    Ok(MapReduceService::new(Arc::new(cluster), executor))
}

pub fn info(dfs_root: &Path, jar: &str) -> Result<()> {
    let info = service(dfs_root)?.jar_info(jar)?;
    println!("[Artifact] {jar}");
    println!("main class: {}", info.main_class.as_deref().unwrap_or("-"));
    for candidate in &info.candidates {
        println!("driver: {candidate}");
    }
    Ok(())
}

/// Runs a driver in process and returns its exit status.
pub fn run(dfs_root: &Path, jar: &str, driver: Option<&str>, timeout: u64, args: &[String]) -> Result<i32> {
    let service = service(dfs_root)?;
    let command_line = args.join(" ");
    let handle = service.execute_simple(jar, driver, Some(command_line.as_str()))?;

    if !handle.wait_on_completion(Duration::from_secs(timeout), &NeverStop)? {
        warn!("driver {} still running after {timeout}s, killing it", handle.driver());
        handle.kill_job()?;
        return Ok(1);
    }
    let status = handle.status().unwrap_or(1);
    info!("driver {} finished with status {status}", handle.driver());
    Ok(status)
}

fn installer(args: &InstallArgs) -> Option<EnvironmentInstaller> {
    let install_dir = args.install_dir.as_deref()?;
    let mut properties = Properties::new();
    properties.set(INSTALL_DIR, install_dir);
    if let Some(id) = &args.installation_id {
        properties.set(INSTALLATION_ID, id.as_str());
    }
    if let Some(archive) = &args.archive {
        properties.set(LIBRARIES_ARCHIVE, archive.as_str());
    }
    if !args.plugins.is_empty() {
        properties.set(ADDITIONAL_PLUGINS, args.plugins.join(","));
    }
    Some(EnvironmentInstaller::new(properties, &args.resources))
}

/// Submits a job to the local cluster and reports on it until it finishes.
pub fn submit(dfs_root: &Path, args: SubmitArgs) -> Result<bool> {
    let service = service(dfs_root)?;
    let mut builder = service.create_job_builder();
    builder
        .set_input_paths(&args.input)
        .set_output_path(&args.output)
        .set_num_map_tasks(parse_task_count(&args.map_tasks))
        .set_num_reduce_tasks(parse_task_count(&args.reduce_tasks))
        .set_clean_output_path(args.clean);

    // Setters ignore blank values, so absent options are simply skipped.
    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    builder
        .set_job_name(&text(&args.job_name))
        .set_mapper_class(&text(&args.mapper))
        .set_combiner_class(&text(&args.combiner))
        .set_reducer_class(&text(&args.reducer))
        .set_input_format_class(&text(&args.input_format))
        .set_output_format_class(&text(&args.output_format))
        .set_resolved_jar_url(&text(&args.jar))
        .set_driver_class(&text(&args.driver));
    for property in &args.properties {
        let (key, value) = property
            .split_once('=')
            .ok_or_else(|| anyhow!("property {property:?} is not key=value"))?;
        builder.set(key, value);
    }

    let installer = installer(&args.install);
    let handle = service.submit(&builder, installer.as_ref())?;
    println!("[Job] {}", handle.job_id());

    let deadline = Instant::now() + Duration::from_secs(args.timeout);
    while !handle.wait_on_completion(POLL_INTERVAL, &NeverStop)? {
        println!(
            "setup {:>3.0}%  map {:>3.0}%  reduce {:>3.0}%",
            handle.setup_progress()? * 100.0,
            handle.map_progress()? * 100.0,
            handle.reduce_progress()? * 100.0
        );
        if Instant::now() >= deadline {
            warn!("job {} did not finish within {}s", handle.job_id(), args.timeout);
            handle.kill_job()?;
            return Ok(false);
        }
    }

    report(&handle)?;
    Ok(handle.is_successful()?)
}

fn report(handle: &RemoteJobHandle) -> Result<()> {
    for event in handle.task_completion_events(0)? {
        println!("{} {:?}", event.attempt, event.status);
        if event.status == TaskStatus::Failed {
            for line in handle.task_diagnostics(&event.attempt)? {
                println!("    {line}");
            }
        }
    }
    let status = JobHandle::status(handle).unwrap_or(1);
    println!("[Status] {status}");
    Ok(())
}

/// Installs the environment, into MinIO when the install dir is an
/// `s3://` URL and into the local cluster's filesystem otherwise.
pub fn install(dfs_root: &Path, args: InstallArgs, minio: MinioArgs) -> Result<()> {
    let install_dir = args
        .install_dir
        .clone()
        .context("--install-dir or MRL_INSTALL_DIR is required")?;

    let (fs, cluster_id): (Box<dyn FileSystem>, String) = if install_dir.starts_with("s3://") {
        let location = path_to_bucket_key(&install_dir)?;
        let cfg = ClientConfig {
            access_key_id: minio.minio_access_key,
            secret_access_key: minio.minio_secret_key,
            region: minio.minio_region,
            url: minio.minio_url,
        };
        let fs = S3FileSystem::new(cfg, location.bucket.as_str())?;
        (Box::new(fs), location.bucket)
    } else {
        (Box::new(LocalFileSystem::new(dfs_root)), "local".to_string())
    };

    let installer = installer(&args).context("no install dir")?;
    let mut conf = Configuration::new();
    installer.ensure_installed(&mut conf, fs.as_ref(), &cluster_id)?;
    let target = installer.install_path(&conf, fs.as_ref(), &cluster_id)?;
    println!("[Installed] {target}");
    println!(
        "classpath: {}",
        conf.get(APPLICATION_CLASSPATH).unwrap_or_default()
    );
    Ok(())
}
