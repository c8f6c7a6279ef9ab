use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::class::{ClassRef, DriverContext, MainFn};
use common::process::{panic_message, run_trapped, Termination};

use crate::error::{ConfigurationError, JobError, JobExecutionError};
use crate::handle::{JobHandle, StopSignal};

/// How an in-process job ended.
///
/// Success is exit status 0 with no error. A job killed before it finished
/// has neither a status nor an error.
#[derive(Clone, Debug, Default)]
pub struct ExecutionOutcome {
    pub exit_status: Option<i32>,
    pub error: Option<Arc<JobExecutionError>>,
}

impl ExecutionOutcome {
    fn exited(code: i32) -> Self {
        Self {
            exit_status: Some(code),
            error: None,
        }
    }

    fn failed(error: JobExecutionError) -> Self {
        Self {
            exit_status: None,
            error: Some(Arc::new(error)),
        }
    }

    fn cancelled() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.exit_status == Some(0) && self.error.is_none()
    }
}

/// A small pool that runs driver `main` functions on worker threads.
///
/// Dropping the pool does not wait for running drivers. They keep their
/// threads until they return on their own.
pub struct InProcessExecutor {
    /// Taken out on shutdown.
    runtime: Option<Runtime>,
}

impl InProcessExecutor {
    pub const DEFAULT_WORKERS: usize = 2;

    /// Creates a pool running at most `workers` drivers at once. Further
    /// jobs queue until a worker frees up.
    pub fn new(workers: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("mrl-driver")
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    /// Starts `driver` with `args` and returns a handle on it.
    pub fn execute(&self, driver: &ClassRef, args: Vec<String>) -> Result<InProcessJobHandle, JobError> {
        let main = driver.main().ok_or_else(|| ConfigurationError::WrongClassKind {
            field: "driver",
            class: driver.name().to_string(),
            expected: "driver",
            found: driver.kind().describe(),
        })?;

        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| io::Error::other("in-process executor is shut down"))?;

        let shared = Arc::new(Shared::default());
        let interrupt = CancellationToken::new();
        let ctx = DriverContext::new(args, interrupt.clone());
        let name = driver.name().to_string();

        info!("starting driver {name} in process with args {:?}", ctx.args());
        let publisher = Publisher {
            shared: shared.clone(),
            published: false,
        };
        let worker_name = name.clone();
        let worker_shared = shared.clone();
        runtime.spawn_blocking(move || {
            let outcome = run_driver(&worker_name, main, &ctx);
            if worker_shared.outcome.set(outcome).is_err() {
                debug!("driver {worker_name} finished after its job was killed");
            }
            publisher.publish(WorkerExit::Finished);
        });

        Ok(InProcessJobHandle {
            driver: name,
            shared,
            interrupt,
        })
    }

    /// Stops the pool. Queued jobs are cancelled; running drivers get at most
    /// `timeout` to return before they are abandoned.
    pub fn shutdown_timeout(mut self, timeout: Duration) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(timeout);
        }
    }
}

impl Drop for InProcessExecutor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Runs one driver with exits trapped and maps how it ended to an outcome.
fn run_driver(name: &str, main: MainFn, ctx: &DriverContext) -> ExecutionOutcome {
    match run_trapped(|| main(ctx)) {
        Termination::Returned(Ok(())) => {
            info!("driver {name} returned");
            ExecutionOutcome::exited(0)
        }
        Termination::Exited(code) => {
            info!("driver {name} exited with status {code}");
            ExecutionOutcome::exited(code)
        }
        Termination::Returned(Err(err)) => {
            warn!("driver {name} failed: {err:#}");
            ExecutionOutcome::failed(JobExecutionError::DriverFailed {
                driver: name.to_string(),
                source: err.into(),
            })
        }
        Termination::Panicked(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("driver {name} panicked: {message}");
            ExecutionOutcome::failed(JobExecutionError::DriverPanicked {
                driver: name.to_string(),
                message,
            })
        }
    }
}

/// How the worker task itself ended.
#[derive(Clone, Debug)]
enum WorkerExit {
    /// The driver ran and its outcome was offered to the handle.
    Finished,
    /// The task was dropped before it ran.
    Cancelled,
    /// The worker panicked outside of the driver.
    Panicked(String),
}

#[derive(Default)]
struct Shared {
    /// Written once, by the worker or by a kill.
    outcome: OnceLock<ExecutionOutcome>,
    exit: Mutex<Option<WorkerExit>>,
    exited: Condvar,
}

impl Shared {
    fn exit(&self) -> MutexGuard<'_, Option<WorkerExit>> {
        self.exit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until the worker exits or `timeout` passes.
    fn wait_exit(&self, timeout: Duration) -> Option<WorkerExit> {
        let guard = self.exit();
        let (guard, _) = self
            .exited
            .wait_timeout_while(guard, timeout, |exit| exit.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }
}

/// Reports the worker's exit, including the paths where the worker task is
/// dropped without running or unwinds.
struct Publisher {
    shared: Arc<Shared>,
    published: bool,
}

impl Publisher {
    fn publish(mut self, exit: WorkerExit) {
        self.send(exit);
    }

    fn send(&mut self, exit: WorkerExit) {
        self.published = true;
        let mut guard = self.shared.exit();
        if guard.is_none() {
            *guard = Some(exit);
        }
        self.shared.exited.notify_all();
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        let exit = if thread::panicking() {
            WorkerExit::Panicked("driver worker panicked".to_string())
        } else {
            WorkerExit::Cancelled
        };
        self.send(exit);
    }
}

/// Handle on a driver running in this process.
pub struct InProcessJobHandle {
    driver: String,
    shared: Arc<Shared>,
    interrupt: CancellationToken,
}

impl InProcessJobHandle {
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// The recorded outcome, once the job is complete.
    pub fn outcome(&self) -> Option<&ExecutionOutcome> {
        self.shared.outcome.get()
    }

    /// The error the driver failed with, if any.
    pub fn error(&self) -> Option<Arc<JobExecutionError>> {
        self.outcome().and_then(|outcome| outcome.error.clone())
    }

    fn kill(&self) {
        if self.shared.outcome.set(ExecutionOutcome::cancelled()).is_ok() {
            info!("killing in-process job {}", self.driver);
            self.interrupt.cancel();
        }
    }

    fn recorded_result(&self) -> Result<bool, JobError> {
        match self.error() {
            Some(err) => Err(JobError::Execution(err)),
            None => Ok(true),
        }
    }
}

impl JobHandle for InProcessJobHandle {
    fn status(&self) -> Option<i32> {
        self.outcome().and_then(|outcome| outcome.exit_status)
    }

    fn is_complete(&self) -> Result<bool, JobError> {
        Ok(self.outcome().is_some())
    }

    fn is_successful(&self) -> Result<bool, JobError> {
        Ok(self.outcome().is_some_and(ExecutionOutcome::is_success))
    }

    fn kill_job(&self) -> Result<(), JobError> {
        self.kill();
        Ok(())
    }

    /// The stop signal is not polled: in-process work stops through
    /// [`JobHandle::kill_job`] or when its worker is cancelled.
    fn wait_on_completion(&self, timeout: Duration, _stop: &dyn StopSignal) -> Result<bool, JobError> {
        // A killed driver may never return, so a recorded outcome ends the wait.
        if self.outcome().is_some() {
            return self.recorded_result();
        }
        match self.shared.wait_exit(timeout) {
            None => Ok(false),
            Some(WorkerExit::Finished) => self.recorded_result(),
            Some(WorkerExit::Cancelled) => {
                if let Some(err) = self.error() {
                    return Err(JobError::Execution(err));
                }
                debug!("worker for {} was cancelled", self.driver);
                self.kill();
                Ok(true)
            }
            Some(WorkerExit::Panicked(message)) => {
                let failed = ExecutionOutcome::failed(JobExecutionError::Execution(message));
                let _ = self.shared.outcome.set(failed);
                self.recorded_result()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;
    use std::time::Instant;

    use anyhow::bail;
    use common::class::ClassKind;
    use common::process;

    use crate::handle::NeverStop;

    use super::*;

    fn driver(main: MainFn) -> ClassRef {
        ClassRef::new("test.Driver", ClassKind::Driver(main))
    }

    fn run(main: MainFn, args: &[&str]) -> (InProcessExecutor, InProcessJobHandle) {
        let executor = InProcessExecutor::new(2).unwrap();
        let args = args.iter().map(|a| a.to_string()).collect();
        let handle = executor.execute(&driver(main), args).unwrap();
        (executor, handle)
    }

    fn wait(handle: &InProcessJobHandle) -> Result<bool, JobError> {
        handle.wait_on_completion(Duration::from_secs(10), &NeverStop)
    }

    fn returns(_ctx: &DriverContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn exits(ctx: &DriverContext) -> anyhow::Result<()> {
        let code = ctx.args()[0].parse()?;
        process::exit(code)
    }

    fn fails(_ctx: &DriverContext) -> anyhow::Result<()> {
        bail!("bad input")
    }

    fn panics(_ctx: &DriverContext) -> anyhow::Result<()> {
        panic!("driver bug")
    }

    fn trapped_255(_ctx: &DriverContext) -> anyhow::Result<()> {
        std::panic::resume_unwind(Box::new(process::TrappedExit::new(255)))
    }

    fn until_interrupted(ctx: &DriverContext) -> anyhow::Result<()> {
        while !ctx.is_interrupted() {
            thread::sleep(Duration::from_millis(5));
        }
        bail!("interrupted")
    }

    #[test]
    fn test_normal_return_is_status_zero() {
        let (_executor, handle) = run(returns, &[]);
        assert!(wait(&handle).unwrap());
        assert_eq!(handle.status(), Some(0));
        assert!(handle.is_complete().unwrap());
        assert!(handle.is_successful().unwrap());
        assert!(handle.error().is_none());
    }

    #[test]
    fn test_exit_codes() {
        let (_executor, handle) = run(exits, &["0"]);
        assert!(wait(&handle).unwrap());
        assert_eq!(handle.status(), Some(0));
        assert!(handle.is_successful().unwrap());

        let (_executor, handle) = run(exits, &["1"]);
        assert!(wait(&handle).unwrap());
        assert_eq!(handle.status(), Some(1));
        assert!(!handle.is_successful().unwrap());
        assert!(handle.error().is_none());
    }

    #[test]
    fn test_trapped_exit_255_is_not_an_error() {
        let (_executor, handle) = run(trapped_255, &[]);
        assert!(wait(&handle).unwrap());
        assert_eq!(handle.status(), Some(255));
        assert!(!handle.is_successful().unwrap());
        assert!(handle.error().is_none());
    }

    #[test]
    fn test_driver_error_is_rethrown_with_identity() {
        let (_executor, handle) = run(fails, &[]);
        let first = match wait(&handle) {
            Err(JobError::Execution(err)) => err,
            other => panic!("unexpected {other:?}"),
        };
        assert!(matches!(*first, JobExecutionError::DriverFailed { .. }));
        assert_eq!(handle.status(), None);
        assert!(handle.is_complete().unwrap());
        assert!(!handle.is_successful().unwrap());

        match wait(&handle) {
            Err(JobError::Execution(again)) => assert!(Arc::ptr_eq(&first, &again)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(Arc::ptr_eq(&first, &handle.error().unwrap()));
    }

    #[test]
    fn test_panicking_driver_is_an_error() {
        let (_executor, handle) = run(panics, &[]);
        match wait(&handle) {
            Err(JobError::Execution(err)) => {
                assert!(err.to_string().contains("driver bug"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(handle.status(), None);
    }

    #[test]
    fn test_timeout_does_not_kill_then_kill_completes() {
        let (_executor, handle) = run(until_interrupted, &[]);
        assert!(!handle
            .wait_on_completion(Duration::from_millis(50), &NeverStop)
            .unwrap());
        assert!(!handle.is_complete().unwrap());
        assert_eq!(handle.status(), None);
        assert!(!handle.interrupt.is_cancelled());

        handle.kill_job().unwrap();
        assert!(handle.is_complete().unwrap());
        assert!(!handle.is_successful().unwrap());
        assert!(handle.interrupt.is_cancelled());

        // The driver's own failure after the kill does not replace the outcome.
        assert!(wait(&handle).unwrap());
        assert!(handle.error().is_none());
        assert_eq!(handle.status(), None);
    }

    fn ignores_interrupt(_ctx: &DriverContext) -> anyhow::Result<()> {
        thread::sleep(Duration::from_secs(3));
        Ok(())
    }

    #[test]
    fn test_wait_after_kill_returns_for_uncooperative_driver() {
        let (executor, handle) = run(ignores_interrupt, &[]);
        assert!(!handle
            .wait_on_completion(Duration::from_millis(20), &NeverStop)
            .unwrap());
        handle.kill_job().unwrap();

        let started = Instant::now();
        assert!(handle
            .wait_on_completion(Duration::from_millis(500), &NeverStop)
            .unwrap());
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(handle.is_complete().unwrap());
        assert!(!handle.is_successful().unwrap());

        let started = Instant::now();
        drop(executor);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_abandons_running_driver() {
        let (executor, handle) = run(ignores_interrupt, &[]);
        let started = Instant::now();
        executor.shutdown_timeout(Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!handle.is_complete().unwrap());
    }

    #[test]
    fn test_kill_after_completion_is_a_no_op() {
        let (_executor, handle) = run(returns, &[]);
        assert!(wait(&handle).unwrap());
        handle.kill_job().unwrap();
        assert_eq!(handle.status(), Some(0));
        assert!(handle.is_successful().unwrap());
        assert!(!handle.interrupt.is_cancelled());
    }

    fn detached(shared: Arc<Shared>) -> InProcessJobHandle {
        InProcessJobHandle {
            driver: "test.Driver".to_string(),
            shared,
            interrupt: CancellationToken::new(),
        }
    }

    #[test]
    fn test_cancelled_worker_counts_as_interrupted_wait() {
        let shared = Arc::new(Shared::default());
        drop(Publisher {
            shared: shared.clone(),
            published: false,
        });

        let handle = detached(shared);
        assert!(wait(&handle).unwrap());
        assert!(handle.is_complete().unwrap());
        assert!(!handle.is_successful().unwrap());
        assert!(handle.interrupt.is_cancelled());
    }

    #[test]
    fn test_interrupted_wait_prefers_recorded_error() {
        let shared = Arc::new(Shared::default());
        let recorded = Arc::new(JobExecutionError::Execution("earlier".to_string()));
        let outcome = ExecutionOutcome {
            exit_status: None,
            error: Some(recorded.clone()),
        };
        assert!(shared.outcome.set(outcome).is_ok());
        drop(Publisher {
            shared: shared.clone(),
            published: false,
        });

        let handle = detached(shared);
        match wait(&handle) {
            Err(JobError::Execution(err)) => assert!(Arc::ptr_eq(&err, &recorded)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!handle.interrupt.is_cancelled());
    }

    #[test]
    fn test_worker_panic_is_wrapped() {
        let shared = Arc::new(Shared::default());
        let publisher = Publisher {
            shared: shared.clone(),
            published: false,
        };
        let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let _publisher = publisher;
            std::panic::resume_unwind(Box::new("worker"));
        }));
        assert!(result.is_err());

        let handle = detached(shared);
        match wait(&handle) {
            Err(JobError::Execution(err)) => {
                assert!(matches!(*err, JobExecutionError::Execution(_)));
                assert!(Arc::ptr_eq(&err, &handle.error().unwrap()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(handle.is_complete().unwrap());
    }
}
