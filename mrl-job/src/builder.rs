//! Accumulates job settings and submits them to a cluster.
//!
//! Class names are kept as strings until [`JobConfigurationBuilder::submit`],
//! where they are resolved against the cluster's class loader, so setters
//! may be called in any order.

use std::sync::Arc;

use tracing::{debug, info, warn};

use common::class::{ClassKind, ClassLoader, ClassRef};
use common::fs::{DfsPath, FileSystem};
use common::utils::is_blank;

use crate::cluster::Cluster;
use crate::config::{
    Configuration, Properties, DEFAULT_FS, MAP_OUTPUT_KEY_CLASS, MAP_OUTPUT_VALUE_CLASS,
    OUTPUT_KEY_CLASS, OUTPUT_VALUE_CLASS,
};
use crate::error::{ConfigurationError, JobError, SubmissionError};
use crate::handle::RemoteJobHandle;
use crate::resolver;

/// Parses a task count, falling back to 1 when `raw` is not a number.
pub fn parse_task_count(raw: &str) -> usize {
    match raw.trim().parse() {
        Ok(count) => count,
        Err(err) => {
            warn!("invalid task count {raw:?} ({err}), using 1");
            1
        }
    }
}

#[derive(Clone, Debug)]
pub struct JobConfigurationBuilder {
    job_name: Option<String>,
    jar_url: Option<String>,
    resolved_jar_url: Option<String>,
    driver_class: Option<String>,

    mapper_class: Option<String>,
    combiner_class: Option<String>,
    reducer_class: Option<String>,
    input_format_class: Option<String>,
    output_format_class: Option<String>,
    map_runner_class: Option<String>,

    output_key_class: Option<String>,
    output_value_class: Option<String>,
    map_output_key_class: Option<String>,
    map_output_value_class: Option<String>,

    input_paths: Vec<String>,
    output_path: Option<String>,
    num_map_tasks: usize,
    num_reduce_tasks: usize,
    clean_output_path: bool,

    properties: Properties,
}

impl Default for JobConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn non_blank(value: &str) -> Option<String> {
    if is_blank(Some(value)) {
        None
    } else {
        Some(value.trim().to_string())
    }
}

impl JobConfigurationBuilder {
    pub fn new() -> Self {
        Self {
            job_name: None,
            jar_url: None,
            resolved_jar_url: None,
            driver_class: None,
            mapper_class: None,
            combiner_class: None,
            reducer_class: None,
            input_format_class: None,
            output_format_class: None,
            map_runner_class: None,
            output_key_class: None,
            output_value_class: None,
            map_output_key_class: None,
            map_output_value_class: None,
            input_paths: vec![],
            output_path: None,
            num_map_tasks: 1,
            num_reduce_tasks: 1,
            clean_output_path: false,
            properties: Properties::new(),
        }
    }

    /// Sets a user property. Pairs with a blank key or value are ignored.
    pub fn set(&mut self, key: &str, value: &str) -> &mut Self {
        if is_blank(Some(key)) || is_blank(Some(value)) {
            debug!("ignoring blank property {key:?}={value:?}");
            return self;
        }
        self.properties.set(key, value);
        self
    }

    pub fn set_job_name(&mut self, name: &str) -> &mut Self {
        self.job_name = non_blank(name);
        self
    }

    /// Code source passed through to the job as is.
    pub fn set_jar_url(&mut self, url: &str) -> &mut Self {
        self.jar_url = non_blank(url);
        self
    }

    /// Artifact the driver class is resolved from when no jar URL is set.
    pub fn set_resolved_jar_url(&mut self, url: &str) -> &mut Self {
        self.resolved_jar_url = non_blank(url);
        self
    }

    pub fn set_driver_class(&mut self, name: &str) -> &mut Self {
        self.driver_class = non_blank(name);
        self
    }

    pub fn set_mapper_class(&mut self, name: &str) -> &mut Self {
        self.mapper_class = non_blank(name);
        self
    }

    pub fn set_combiner_class(&mut self, name: &str) -> &mut Self {
        self.combiner_class = non_blank(name);
        self
    }

    pub fn set_reducer_class(&mut self, name: &str) -> &mut Self {
        self.reducer_class = non_blank(name);
        self
    }

    pub fn set_input_format_class(&mut self, name: &str) -> &mut Self {
        self.input_format_class = non_blank(name);
        self
    }

    pub fn set_output_format_class(&mut self, name: &str) -> &mut Self {
        self.output_format_class = non_blank(name);
        self
    }

    pub fn set_map_runner_class(&mut self, name: &str) -> &mut Self {
        self.map_runner_class = non_blank(name);
        self
    }

    pub fn set_output_key_class(&mut self, name: &str) -> &mut Self {
        self.output_key_class = non_blank(name);
        self
    }

    pub fn set_output_value_class(&mut self, name: &str) -> &mut Self {
        self.output_value_class = non_blank(name);
        self
    }

    pub fn set_map_output_key_class(&mut self, name: &str) -> &mut Self {
        self.map_output_key_class = non_blank(name);
        self
    }

    pub fn set_map_output_value_class(&mut self, name: &str) -> &mut Self {
        self.map_output_value_class = non_blank(name);
        self
    }

    pub fn set_input_paths<S: AsRef<str>>(&mut self, paths: &[S]) -> &mut Self {
        self.input_paths = paths.iter().filter_map(|p| non_blank(p.as_ref())).collect();
        self
    }

    pub fn set_output_path(&mut self, path: &str) -> &mut Self {
        self.output_path = non_blank(path);
        self
    }

    pub fn set_num_map_tasks(&mut self, count: usize) -> &mut Self {
        self.num_map_tasks = count;
        self
    }

    pub fn set_num_reduce_tasks(&mut self, count: usize) -> &mut Self {
        self.num_reduce_tasks = count;
        self
    }

    /// Deletes the output path before submitting.
    pub fn set_clean_output_path(&mut self, clean: bool) -> &mut Self {
        self.clean_output_path = clean;
        self
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Builds the concrete configuration for `cluster` without submitting it.
    pub fn configure(
        &self,
        cluster: &dyn Cluster,
        fs: &dyn FileSystem,
    ) -> Result<Configuration, ConfigurationError> {
        if self.input_paths.is_empty() {
            return Err(ConfigurationError::MissingInputPaths);
        }
        let output_path = self
            .output_path
            .as_deref()
            .ok_or(ConfigurationError::MissingOutputPath)?;

        let mut conf = cluster.create_configuration();
        let loader = cluster.class_loader();
        conf.job_name = self.job_name.clone();

        match (&self.jar_url, &self.resolved_jar_url) {
            (Some(jar), _) => conf.jar = Some(jar.clone()),
            (None, Some(resolved)) => {
                let driver = resolver::resolve(self.driver_class.as_deref(), resolved, loader.as_ref())?;
                debug!("job code source is {resolved} by driver {driver}");
                conf.driver = Some(driver);
                conf.jar = Some(resolved.clone());
            }
            (None, None) => {}
        }

        let loader = loader.as_ref();
        conf.mapper = load(loader, "mapper", &self.mapper_class, Expected::Mapper)?;
        conf.combiner = load(loader, "combiner", &self.combiner_class, Expected::Reducer)?;
        conf.reducer = load(loader, "reducer", &self.reducer_class, Expected::Reducer)?;
        conf.input_format = load(loader, "input format", &self.input_format_class, Expected::InputFormat)?;
        conf.output_format = load(loader, "output format", &self.output_format_class, Expected::OutputFormat)?;
        conf.map_runner = load(loader, "map runner", &self.map_runner_class, Expected::Mapper)?;

        for (key, value) in [
            (OUTPUT_KEY_CLASS, &self.output_key_class),
            (OUTPUT_VALUE_CLASS, &self.output_value_class),
            (MAP_OUTPUT_KEY_CLASS, &self.map_output_key_class),
            (MAP_OUTPUT_VALUE_CLASS, &self.map_output_value_class),
        ] {
            if let Some(value) = value {
                conf.set(key, value.as_str());
            }
        }

        let default_fs = conf.get_or(DEFAULT_FS, &fs.uri());
        conf.input_paths = self
            .input_paths
            .iter()
            .map(|path| fs.as_path(&default_fs, path))
            .collect();
        conf.output_path = Some(fs.as_path(&default_fs, output_path));

        for (key, value) in self.properties.iter() {
            if !is_blank(Some(key)) && !is_blank(Some(value)) {
                conf.set(key, value);
            }
        }

        conf.num_map_tasks = self.num_map_tasks;
        conf.num_reduce_tasks = self.num_reduce_tasks;
        Ok(conf)
    }

    /// Configures the job, submits it and returns a handle on the running job.
    pub fn submit(&self, cluster: &dyn Cluster) -> Result<RemoteJobHandle, JobError> {
        self.submit_with(cluster, |_, _| Ok(()))
    }

    /// Like [`submit`](Self::submit), letting `prepare` amend the
    /// configuration right before it is handed to the cluster.
    pub fn submit_with<F>(&self, cluster: &dyn Cluster, prepare: F) -> Result<RemoteJobHandle, JobError>
    where
        F: FnOnce(&mut Configuration, &dyn FileSystem) -> Result<(), JobError>,
    {
        let defaults = cluster.create_configuration();
        let fs: Arc<dyn FileSystem> = cluster
            .file_system(&defaults)
            .map_err(|err| SubmissionError::new("unable to access the job filesystem", err))?;

        let mut conf = self.configure(cluster, fs.as_ref())?;
        prepare(&mut conf, fs.as_ref())?;

        if self.clean_output_path {
            if let Some(output) = &conf.output_path {
                clean_output_path(fs.as_ref(), output)
                    .map_err(|err| SubmissionError::new("error cleaning output path", err))?;
            }
        }

        let job = cluster
            .submit_job(conf)
            .map_err(|err| SubmissionError::new("job submission failed", err))?;
        info!("submitted job {}", job.job_id());
        Ok(RemoteJobHandle::new(job))
    }
}

fn clean_output_path(fs: &dyn FileSystem, output: &DfsPath) -> std::io::Result<()> {
    if fs.exists(output)? {
        info!("cleaning output path {output}");
        if !fs.delete(output, true)? {
            warn!("unable to clean output path {output}");
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Expected {
    Mapper,
    Reducer,
    InputFormat,
    OutputFormat,
}

impl Expected {
    fn describe(self) -> &'static str {
        match self {
            Expected::Mapper => "mapper",
            Expected::Reducer => "reducer",
            Expected::InputFormat => "input format",
            Expected::OutputFormat => "output format",
        }
    }

    fn matches(self, kind: ClassKind) -> bool {
        matches!(
            (self, kind),
            (Expected::Mapper, ClassKind::Mapper(_))
                | (Expected::Reducer, ClassKind::Reducer(_))
                | (Expected::InputFormat, ClassKind::InputFormat(_))
                | (Expected::OutputFormat, ClassKind::OutputFormat(_))
        )
    }
}

fn load(
    loader: &dyn ClassLoader,
    field: &'static str,
    name: &Option<String>,
    expected: Expected,
) -> Result<Option<ClassRef>, ConfigurationError> {
    let Some(name) = name else {
        return Ok(None);
    };
    let class = loader
        .load_class(name)
        .map_err(|source| ConfigurationError::UnknownClass {
            field,
            class: name.clone(),
            source,
        })?;
    if !expected.matches(class.kind()) {
        return Err(ConfigurationError::WrongClassKind {
            field,
            class: name.clone(),
            expected: expected.describe(),
            found: class.kind().describe(),
        });
    }
    Ok(Some(class))
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use common::fs::LocalFileSystem;
    use workload::Registry;

    use crate::cluster::RunningJob;

    use super::*;

    /// A cluster that records submitted configurations instead of running them.
    struct RecordingCluster {
        fs: Arc<LocalFileSystem>,
        submitted: Mutex<Vec<Configuration>>,
        reject: bool,
    }

    impl RecordingCluster {
        fn new(root: &std::path::Path) -> Self {
            Self {
                fs: Arc::new(LocalFileSystem::new(root)),
                submitted: Mutex::new(vec![]),
                reject: false,
            }
        }

        fn last(&self) -> Configuration {
            self.submitted.lock().unwrap().last().cloned().unwrap()
        }
    }

    struct DoneJob;

    impl RunningJob for DoneJob {
        fn job_id(&self) -> String {
            "job_1".to_string()
        }
        fn is_complete(&self) -> io::Result<bool> {
            Ok(true)
        }
        fn is_successful(&self) -> io::Result<bool> {
            Ok(true)
        }
        fn setup_progress(&self) -> io::Result<f32> {
            Ok(1.0)
        }
        fn map_progress(&self) -> io::Result<f32> {
            Ok(1.0)
        }
        fn reduce_progress(&self) -> io::Result<f32> {
            Ok(1.0)
        }
        fn task_completion_events(
            &self,
            _from: usize,
        ) -> io::Result<Vec<crate::cluster::TaskCompletionEvent>> {
            Ok(vec![])
        }
        fn task_diagnostics(&self, _attempt: &crate::cluster::TaskAttemptId) -> io::Result<Vec<String>> {
            Ok(vec![])
        }
        fn kill_job(&self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Cluster for RecordingCluster {
        fn create_configuration(&self) -> Configuration {
            let mut conf = Configuration::new();
            conf.set(DEFAULT_FS, "file:///data");
            conf
        }

        fn submit_job(&self, conf: Configuration) -> io::Result<Box<dyn RunningJob>> {
            if self.reject {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "queue closed"));
            }
            self.submitted.lock().unwrap().push(conf);
            Ok(Box::new(DoneJob))
        }

        fn file_system(&self, _conf: &Configuration) -> io::Result<Arc<dyn FileSystem>> {
            Ok(self.fs.clone())
        }

        fn class_loader(&self) -> Arc<dyn ClassLoader> {
            Arc::new(Registry::builtin())
        }

        fn identifier(&self) -> String {
            "recording".to_string()
        }
    }

    fn word_count() -> JobConfigurationBuilder {
        let mut builder = JobConfigurationBuilder::new();
        builder
            .set_job_name("wc")
            .set_mapper_class(workload::WORD_COUNT_MAPPER)
            .set_reducer_class(workload::WORD_COUNT_REDUCER)
            .set_input_paths(&["in"])
            .set_output_path("out");
        builder
    }

    #[test]
    fn test_parse_task_count() {
        assert_eq!(parse_task_count("4"), 4);
        assert_eq!(parse_task_count(" 2 "), 2);
        assert_eq!(parse_task_count("four"), 1);
        assert_eq!(parse_task_count(""), 1);
    }

    #[test]
    fn test_blank_properties_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = RecordingCluster::new(dir.path());
        let mut builder = word_count();
        builder
            .set("", "v")
            .set(" ", "v")
            .set("k", "")
            .set("k2", "  ")
            .set("k", "v");
        builder.submit(&cluster).unwrap();

        let conf = cluster.last();
        let user: Vec<(&str, &str)> = conf
            .properties()
            .iter()
            .filter(|(key, _)| *key != DEFAULT_FS)
            .collect();
        assert_eq!(user, vec![("k", "v")]);
    }

    #[test]
    fn test_classes_resolve_at_submit_and_paths_are_qualified() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = RecordingCluster::new(dir.path());
        let mut builder = word_count();
        builder
            .set_output_key_class("Text")
            .set_num_map_tasks(3)
            .set_num_reduce_tasks(parse_task_count("x"));
        builder.submit(&cluster).unwrap();

        let conf = cluster.last();
        assert_eq!(conf.job_name.as_deref(), Some("wc"));
        assert_eq!(conf.mapper.as_ref().unwrap().name(), workload::WORD_COUNT_MAPPER);
        assert_eq!(conf.input_paths, vec![DfsPath::new("/data/in")]);
        assert_eq!(conf.output_path, Some(DfsPath::new("/data/out")));
        assert_eq!(conf.get(OUTPUT_KEY_CLASS), Some("Text"));
        assert_eq!(conf.num_map_tasks, 3);
        assert_eq!(conf.num_reduce_tasks, 1);
    }

    #[test]
    fn test_missing_required_fields() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = RecordingCluster::new(dir.path());

        let mut builder = word_count();
        builder.set_input_paths::<&str>(&[]);
        assert!(matches!(
            builder.submit(&cluster),
            Err(JobError::Configuration(ConfigurationError::MissingInputPaths))
        ));

        let mut builder = word_count();
        builder.set_output_path(" ");
        assert!(matches!(
            builder.submit(&cluster),
            Err(JobError::Configuration(ConfigurationError::MissingOutputPath))
        ));
    }

    #[test]
    fn test_unknown_and_wrong_kind_classes() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = RecordingCluster::new(dir.path());

        let mut builder = word_count();
        builder.set_combiner_class("no.such.Combiner");
        match builder.submit(&cluster) {
            Err(JobError::Configuration(ConfigurationError::UnknownClass { field, .. })) => {
                assert_eq!(field, "combiner")
            }
            other => panic!("unexpected {:?}", other.err()),
        }

        let mut builder = word_count();
        builder.set_reducer_class(workload::WORD_COUNT_MAPPER);
        assert!(matches!(
            builder.submit(&cluster),
            Err(JobError::Configuration(ConfigurationError::WrongClassKind { field: "reducer", .. }))
        ));
    }

    #[test]
    fn test_jar_by_class_requires_a_driver() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = RecordingCluster::new(dir.path());
        let artifact = dir.path().join("app.json");
        std::fs::write(&artifact, r#"{"classes": []}"#).unwrap();

        let mut builder = word_count();
        builder.set_resolved_jar_url(artifact.to_str().unwrap());
        assert!(matches!(
            builder.submit(&cluster),
            Err(JobError::Configuration(ConfigurationError::Driver(_)))
        ));

        std::fs::write(&artifact, format!(r#"{{"main_class": "{}"}}"#, workload::WORD_COUNT_DRIVER)).unwrap();
        builder.submit(&cluster).unwrap();
        let conf = cluster.last();
        assert_eq!(conf.driver.as_ref().unwrap().name(), workload::WORD_COUNT_DRIVER);
        assert_eq!(conf.jar.as_deref(), artifact.to_str());

        builder.set_jar_url("file:///jobs/wc.json");
        builder.submit(&cluster).unwrap();
        let conf = cluster.last();
        assert_eq!(conf.jar.as_deref(), Some("file:///jobs/wc.json"));
        assert!(conf.driver.is_none());
    }

    #[test]
    fn test_clean_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = RecordingCluster::new(dir.path());
        let part = DfsPath::new("/data/out/part-00000");
        cluster.fs.write(&part, bytes::Bytes::from("old")).unwrap();

        word_count().submit(&cluster).unwrap();
        assert!(cluster.fs.exists(&part).unwrap());

        let mut builder = word_count();
        builder.set_clean_output_path(true);
        builder.submit(&cluster).unwrap();
        assert!(!cluster.fs.exists(&DfsPath::new("/data/out")).unwrap());
    }

    #[test]
    fn test_backend_rejection_is_a_submission_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cluster = RecordingCluster::new(dir.path());
        cluster.reject = true;
        match word_count().submit(&cluster) {
            Err(JobError::Submission(err)) => {
                assert_eq!(err.message(), "job submission failed");
                let source = std::error::Error::source(&err).unwrap();
                assert_eq!(source.to_string(), "queue closed");
            }
            other => panic!("unexpected {:?}", other.err()),
        }
    }
}
