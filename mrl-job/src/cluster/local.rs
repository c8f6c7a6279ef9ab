//! A single-process cluster over a local directory.
//!
//! Submitted jobs run on a background thread: a setup task, one map task per
//! input split, then one reduce task per partition, each writing a
//! `part-NNNNN` file. The job can be killed between tasks.

use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use anyhow::{anyhow, bail, Result};
use bytes::Bytes;
use itertools::Itertools;
use tracing::{debug, info, warn};

use common::class::{ClassKind, ClassLoader, ClassRef, InputFormatFn, OutputFormatFn};
use common::fs::{DfsPath, FileSystem, LocalFileSystem};
use common::process::panic_message;
use common::{ihash, KeyValue, MapFn, ReduceFn};

use crate::cluster::{
    Cluster, RunningJob, TaskAttemptId, TaskCompletionEvent, TaskKind, TaskStatus,
};
use crate::config::{Configuration, DEFAULT_FS, JOB_AUX};

/// Marker written to the output directory of a successful job.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

pub struct LocalCluster {
    fs: Arc<LocalFileSystem>,
    loader: Arc<dyn ClassLoader>,
    identifier: String,
    next_job: AtomicUsize,
}

impl LocalCluster {
    /// A cluster whose filesystem root is the local directory `root`.
    pub fn new(root: impl Into<PathBuf>, loader: Arc<dyn ClassLoader>) -> Self {
        Self {
            fs: Arc::new(LocalFileSystem::new(root)),
            loader,
            identifier: "local".to_string(),
            next_job: AtomicUsize::new(1),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn local_fs(&self) -> &LocalFileSystem {
        &self.fs
    }
}

impl Cluster for LocalCluster {
    fn create_configuration(&self) -> Configuration {
        let mut conf = Configuration::new();
        conf.set(DEFAULT_FS, self.fs.uri());
        conf
    }

    fn submit_job(&self, conf: Configuration) -> io::Result<Box<dyn RunningJob>> {
        if conf.output_path.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "job has no output path",
            ));
        }

        let n = self.next_job.fetch_add(1, Ordering::SeqCst);
        let job_id = format!("{}_{:04}", self.identifier, n);
        let state = Arc::new(JobState::new(job_id.clone()));

        info!(
            "submitting job {job_id} ({})",
            conf.job_name.as_deref().unwrap_or("unnamed")
        );
        let fs = self.fs.clone();
        let job_state = state.clone();
        thread::Builder::new()
            .name(format!("mrl-{job_id}"))
            .spawn(move || run_job(&conf, fs.as_ref(), &job_state))?;

        Ok(Box::new(LocalRunningJob { state }))
    }

    fn file_system(&self, _conf: &Configuration) -> io::Result<Arc<dyn FileSystem>> {
        Ok(self.fs.clone())
    }

    fn class_loader(&self) -> Arc<dyn ClassLoader> {
        self.loader.clone()
    }

    fn identifier(&self) -> String {
        self.identifier.clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Running,
    Succeeded,
    Failed,
    Killed,
}

struct Progress {
    phase: Phase,
    setup: f32,
    map: f32,
    reduce: f32,
    events: Vec<TaskCompletionEvent>,
    diagnostics: HashMap<TaskAttemptId, Vec<String>>,
}

struct JobState {
    job_id: String,
    killed: AtomicBool,
    progress: Mutex<Progress>,
}

/// Why a job stopped early.
enum Abort {
    Killed,
    Failed,
}

impl JobState {
    fn new(job_id: String) -> Self {
        Self {
            job_id,
            killed: AtomicBool::new(false),
            progress: Mutex::new(Progress {
                phase: Phase::Running,
                setup: 0.0,
                map: 0.0,
                reduce: 0.0,
                events: vec![],
                diagnostics: HashMap::new(),
            }),
        }
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attempt(&self, kind: TaskKind, task: usize) -> TaskAttemptId {
        TaskAttemptId {
            job_id: self.job_id.clone(),
            kind,
            task,
            attempt: 0,
        }
    }

    fn record(&self, attempt: TaskAttemptId, status: TaskStatus) {
        let mut progress = self.progress();
        let event_id = progress.events.len();
        progress.events.push(TaskCompletionEvent {
            event_id,
            attempt,
            status,
        });
    }

    /// Runs one task attempt, recording its completion event.
    fn run_task<T>(
        &self,
        kind: TaskKind,
        task: usize,
        f: impl FnOnce() -> Result<T>,
    ) -> std::result::Result<T, Abort> {
        let attempt = self.attempt(kind, task);
        if self.killed.load(Ordering::SeqCst) {
            self.record(attempt, TaskStatus::Killed);
            return Err(Abort::Killed);
        }

        debug!("running {attempt}");
        let messages = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => {
                self.record(attempt, TaskStatus::Succeeded);
                return Ok(value);
            }
            Ok(Err(err)) => {
                warn!("{attempt} failed: {err:#}");
                err.chain().map(|cause| cause.to_string()).collect()
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("{attempt} panicked: {message}");
                vec![format!("task panicked: {message}")]
            }
        };
        self.progress().diagnostics.insert(attempt.clone(), messages);
        self.record(attempt, TaskStatus::Failed);
        Err(Abort::Failed)
    }
}

/// The resolved functions and layout of one job.
struct Plan {
    mapper: Option<MapFn>,
    combiner: Option<ReduceFn>,
    reducer: Option<ReduceFn>,
    input_format: InputFormatFn,
    output_format: OutputFormatFn,
    aux: Bytes,
    num_reduce_tasks: usize,
    output: DfsPath,
}

impl Plan {
    fn new(conf: &Configuration) -> Result<Self> {
        Ok(Self {
            mapper: function(conf.map_runner.as_ref().or(conf.mapper.as_ref()), |kind| match kind {
                ClassKind::Mapper(f) => Some(f),
                _ => None,
            })?,
            combiner: function(conf.combiner.as_ref(), reducer_of)?,
            reducer: function(conf.reducer.as_ref(), reducer_of)?,
            input_format: function(conf.input_format.as_ref(), |kind| match kind {
                ClassKind::InputFormat(f) => Some(f),
                _ => None,
            })?
            .unwrap_or(workload::formats::whole_file),
            output_format: function(conf.output_format.as_ref(), |kind| match kind {
                ClassKind::OutputFormat(f) => Some(f),
                _ => None,
            })?
            .unwrap_or(workload::formats::text),
            aux: Bytes::from(conf.get_or(JOB_AUX, "")),
            num_reduce_tasks: conf.num_reduce_tasks.max(1),
            output: conf
                .output_path
                .clone()
                .ok_or_else(|| anyhow!("job has no output path"))?,
        })
    }
}

fn reducer_of(kind: ClassKind) -> Option<ReduceFn> {
    match kind {
        ClassKind::Reducer(f) => Some(f),
        _ => None,
    }
}

fn function<F>(class: Option<&ClassRef>, extract: impl Fn(ClassKind) -> Option<F>) -> Result<Option<F>> {
    match class {
        None => Ok(None),
        Some(class) => extract(class.kind())
            .map(Some)
            .ok_or_else(|| anyhow!("class {class} is a {}", class.kind().describe())),
    }
}

fn run_job(conf: &Configuration, fs: &dyn FileSystem, state: &JobState) {
    let phase = match execute(conf, fs, state) {
        Ok(()) => Phase::Succeeded,
        Err(Abort::Killed) => Phase::Killed,
        Err(Abort::Failed) => Phase::Failed,
    };
    info!("job {} finished: {phase:?}", state.job_id);
    state.progress().phase = phase;
}

fn execute(conf: &Configuration, fs: &dyn FileSystem, state: &JobState) -> std::result::Result<(), Abort> {
    let (plan, splits) = state.run_task(TaskKind::Setup, 0, || setup(conf, fs))?;
    state.progress().setup = 1.0;

    let mut partitions: Vec<Vec<KeyValue>> = vec![vec![]; plan.num_reduce_tasks];
    for (task, split) in splits.iter().enumerate() {
        let buckets = state.run_task(TaskKind::Map, task, || map_task(&plan, fs, split))?;
        for (partition, bucket) in partitions.iter_mut().zip(buckets) {
            partition.extend(bucket);
        }
        state.progress().map = (task + 1) as f32 / splits.len() as f32;
    }
    state.progress().map = 1.0;

    for (task, partition) in partitions.into_iter().enumerate() {
        state.run_task(TaskKind::Reduce, task, || reduce_task(&plan, fs, task, partition))?;
        state.progress().reduce = (task + 1) as f32 / plan.num_reduce_tasks as f32;
    }

    state.run_task(TaskKind::Setup, 1, || {
        fs.write(&plan.output.join(SUCCESS_MARKER), Bytes::new())?;
        Ok(())
    })
}

/// Checks the output location and splits the input files between map tasks.
fn setup(conf: &Configuration, fs: &dyn FileSystem) -> Result<(Plan, Vec<Vec<DfsPath>>)> {
    let plan = Plan::new(conf)?;
    if fs.exists(&plan.output)? {
        bail!("output directory {} already exists", plan.output);
    }

    let mut files = vec![];
    for input in &conf.input_paths {
        let listed = fs
            .list_files(input, true)
            .map_err(|err| anyhow!("input path {input} unavailable: {err}"))?;
        files.extend(
            listed
                .into_iter()
                .filter(|file| !file.file_name().starts_with(['_', '.'])),
        );
    }
    fs.mkdirs(&plan.output)?;

    let num_splits = conf.num_map_tasks.clamp(1, files.len().max(1));
    let mut splits = vec![vec![]; num_splits];
    for (i, file) in files.into_iter().enumerate() {
        splits[i % num_splits].push(file);
    }
    splits.retain(|split| !split.is_empty());
    debug!("{} input splits", splits.len());
    Ok((plan, splits))
}

fn map_task(plan: &Plan, fs: &dyn FileSystem, split: &[DfsPath]) -> Result<Vec<Vec<KeyValue>>> {
    let mut buckets = vec![vec![]; plan.num_reduce_tasks];
    for file in split {
        let contents = fs.read(file)?;
        for record in (plan.input_format)(file.as_str(), contents) {
            let emitted: Box<dyn Iterator<Item = Result<KeyValue>>> = match plan.mapper {
                Some(map) => map(record, plan.aux.clone())?,
                None => Box::new(std::iter::once(Ok(record))),
            };
            for kv in emitted {
                let kv = kv?;
                let bucket = ihash(&kv.key) as usize % plan.num_reduce_tasks;
                buckets[bucket].push(kv);
            }
        }
    }

    match plan.combiner {
        Some(combine) => buckets
            .into_iter()
            .map(|bucket| group(bucket, combine, &plan.aux))
            .collect(),
        None => Ok(buckets),
    }
}

fn reduce_task(plan: &Plan, fs: &dyn FileSystem, task: usize, partition: Vec<KeyValue>) -> Result<()> {
    let records = match plan.reducer {
        Some(reduce) => group(partition, reduce, &plan.aux)?,
        None => {
            let mut partition = partition;
            partition.sort_by(|a, b| a.key.cmp(&b.key));
            partition
        }
    };

    let mut out = Vec::new();
    for kv in &records {
        out.extend_from_slice(&(plan.output_format)(&kv.key, &kv.value));
    }
    let part = plan.output.join(&format!("part-{task:05}"));
    fs.write(&part, Bytes::from(out))?;
    Ok(())
}

/// Sorts pairs by key and folds each key's values with `reduce`.
fn group(mut pairs: Vec<KeyValue>, reduce: ReduceFn, aux: &Bytes) -> Result<Vec<KeyValue>> {
    pairs.sort_by(|a, b| a.key.cmp(&b.key));
    let mut grouped = vec![];
    for (key, values) in &pairs.into_iter().chunk_by(|kv| kv.key()) {
        let value = reduce(key.clone(), Box::new(values.map(KeyValue::into_value)), aux.clone())?;
        grouped.push(KeyValue::new(key, value));
    }
    Ok(grouped)
}

struct LocalRunningJob {
    state: Arc<JobState>,
}

impl RunningJob for LocalRunningJob {
    fn job_id(&self) -> String {
        self.state.job_id.clone()
    }

    fn is_complete(&self) -> io::Result<bool> {
        Ok(self.state.progress().phase != Phase::Running)
    }

    fn is_successful(&self) -> io::Result<bool> {
        Ok(self.state.progress().phase == Phase::Succeeded)
    }

    fn setup_progress(&self) -> io::Result<f32> {
        Ok(self.state.progress().setup)
    }

    fn map_progress(&self) -> io::Result<f32> {
        Ok(self.state.progress().map)
    }

    fn reduce_progress(&self) -> io::Result<f32> {
        Ok(self.state.progress().reduce)
    }

    fn task_completion_events(&self, from: usize) -> io::Result<Vec<TaskCompletionEvent>> {
        Ok(self.state.progress().events.iter().skip(from).cloned().collect())
    }

    fn task_diagnostics(&self, attempt: &TaskAttemptId) -> io::Result<Vec<String>> {
        Ok(self
            .state
            .progress()
            .diagnostics
            .get(attempt)
            .cloned()
            .unwrap_or_default())
    }

    fn kill_job(&self) -> io::Result<()> {
        if self.state.progress().phase == Phase::Running {
            self.state.killed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use workload::Registry;

    use super::*;

    fn cluster(root: &std::path::Path) -> LocalCluster {
        LocalCluster::new(root, Arc::new(Registry::builtin()))
    }

    fn class(cluster: &LocalCluster, name: &str) -> Option<ClassRef> {
        Some(cluster.class_loader().load_class(name).unwrap())
    }

    fn wait(job: &dyn RunningJob) {
        let started = Instant::now();
        while !job.is_complete().unwrap() {
            assert!(started.elapsed() < Duration::from_secs(10), "job did not finish");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_word_count_job() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = cluster(dir.path());
        let fs = cluster.local_fs();
        fs.write(&DfsPath::new("/in/a.txt"), Bytes::from("the cat")).unwrap();
        fs.write(&DfsPath::new("/in/b.txt"), Bytes::from("the hat")).unwrap();
        fs.write(&DfsPath::new("/in/_ignored"), Bytes::from("zebra")).unwrap();

        let mut conf = cluster.create_configuration();
        conf.mapper = class(&cluster, workload::WORD_COUNT_MAPPER);
        conf.combiner = class(&cluster, workload::WORD_COUNT_REDUCER);
        conf.reducer = class(&cluster, workload::WORD_COUNT_REDUCER);
        conf.input_paths = vec![DfsPath::new("/in")];
        conf.output_path = Some(DfsPath::new("/out"));
        conf.num_map_tasks = 2;

        let job = cluster.submit_job(conf).unwrap();
        wait(job.as_ref());
        assert!(job.is_successful().unwrap());
        assert_eq!(job.map_progress().unwrap(), 1.0);
        assert_eq!(job.reduce_progress().unwrap(), 1.0);

        let output = fs.read(&DfsPath::new("/out/part-00000")).unwrap();
        assert_eq!(output, Bytes::from("cat\t1\nhat\t1\nthe\t2\n"));
        assert!(fs.exists(&DfsPath::new("/out/_SUCCESS")).unwrap());

        let events = job.task_completion_events(0).unwrap();
        let kinds: Vec<TaskKind> = events.iter().map(|e| e.attempt.kind).collect();
        assert_eq!(
            kinds,
            vec![TaskKind::Setup, TaskKind::Map, TaskKind::Map, TaskKind::Reduce, TaskKind::Setup]
        );
        assert!(events.iter().all(|e| e.status == TaskStatus::Succeeded));
        assert_eq!(job.task_completion_events(4).unwrap().len(), 1);
    }

    #[test]
    fn test_partitions_by_key_hash() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = cluster(dir.path());
        let fs = cluster.local_fs();
        fs.write(&DfsPath::new("/in/a.txt"), Bytes::from("a b c d e f g h")).unwrap();

        let mut conf = cluster.create_configuration();
        conf.mapper = class(&cluster, workload::WORD_COUNT_MAPPER);
        conf.reducer = class(&cluster, workload::WORD_COUNT_REDUCER);
        conf.input_paths = vec![DfsPath::new("/in")];
        conf.output_path = Some(DfsPath::new("/out"));
        conf.num_reduce_tasks = 3;

        let job = cluster.submit_job(conf).unwrap();
        wait(job.as_ref());
        assert!(job.is_successful().unwrap());

        for word in ["a", "b", "c", "d", "e", "f", "g", "h"] {
            let part = ihash(word.as_bytes()) as usize % 3;
            let output = fs.read(&DfsPath::new(format!("/out/part-{part:05}"))).unwrap();
            let text = String::from_utf8(output.to_vec()).unwrap();
            assert!(text.lines().any(|line| line == format!("{word}\t1")));
        }
    }

    #[test]
    fn test_failed_map_records_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = cluster(dir.path());
        let fs = cluster.local_fs();
        fs.write(&DfsPath::new("/in/graph.txt"), Bytes::from("1 x\n")).unwrap();

        let mut conf = cluster.create_configuration();
        conf.mapper = class(&cluster, workload::VERTEX_DEGREE_MAPPER);
        conf.reducer = class(&cluster, workload::VERTEX_DEGREE_REDUCER);
        conf.input_paths = vec![DfsPath::new("/in")];
        conf.output_path = Some(DfsPath::new("/out"));

        let job = cluster.submit_job(conf).unwrap();
        wait(job.as_ref());
        assert!(!job.is_successful().unwrap());

        let events = job.task_completion_events(0).unwrap();
        let failed = events.last().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.attempt.kind, TaskKind::Map);
        assert!(!job.task_diagnostics(&failed.attempt).unwrap().is_empty());
    }

    fn panicking_mapper(_kv: KeyValue, _aux: Bytes) -> common::MapOutput {
        panic!("bad record")
    }

    #[test]
    fn test_panicking_mapper_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::builtin();
        registry.register("test.PanicMapper", ClassKind::Mapper(panicking_mapper));
        let cluster = LocalCluster::new(dir.path(), Arc::new(registry));
        let fs = cluster.local_fs();
        fs.write(&DfsPath::new("/in/a.txt"), Bytes::from("x")).unwrap();

        let mut conf = cluster.create_configuration();
        conf.mapper = class(&cluster, "test.PanicMapper");
        conf.reducer = class(&cluster, workload::WORD_COUNT_REDUCER);
        conf.input_paths = vec![DfsPath::new("/in")];
        conf.output_path = Some(DfsPath::new("/out"));

        let job = cluster.submit_job(conf).unwrap();
        wait(job.as_ref());
        assert!(!job.is_successful().unwrap());

        let events = job.task_completion_events(0).unwrap();
        let failed = events.last().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.attempt.kind, TaskKind::Map);
        let diagnostics = job.task_diagnostics(&failed.attempt).unwrap();
        assert_eq!(diagnostics, vec!["task panicked: bad record"]);
    }

    #[test]
    fn test_existing_output_fails_setup() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = cluster(dir.path());
        let fs = cluster.local_fs();
        fs.write(&DfsPath::new("/in/a.txt"), Bytes::from("x")).unwrap();
        fs.mkdirs(&DfsPath::new("/out")).unwrap();

        let mut conf = cluster.create_configuration();
        conf.input_paths = vec![DfsPath::new("/in")];
        conf.output_path = Some(DfsPath::new("/out"));

        let job = cluster.submit_job(conf).unwrap();
        wait(job.as_ref());
        assert!(!job.is_successful().unwrap());
        let events = job.task_completion_events(0).unwrap();
        let diagnostics = job.task_diagnostics(&events[0].attempt).unwrap();
        assert!(diagnostics[0].contains("already exists"));
    }

    #[test]
    fn test_rejects_job_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = cluster(dir.path());
        let err = cluster.submit_job(cluster.create_configuration()).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_kill_between_tasks() {
        let state = JobState::new("local_0001".to_string());
        state.killed.store(true, Ordering::SeqCst);
        let result = state.run_task(TaskKind::Map, 0, || Ok(()));
        assert!(matches!(result, Err(Abort::Killed)));
        let progress = state.progress();
        assert_eq!(progress.events[0].status, TaskStatus::Killed);
    }
}
