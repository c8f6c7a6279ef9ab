//! Scoped interception of process exits requested by driver code.
//!
//! Drivers end with [`exit`] instead of [`std::process::exit`]. Outside of a
//! trap this terminates the process as usual. While an [`ExitTrap`] is
//! installed on the current thread, the request unwinds the driver's stack
//! with a [`TrappedExit`] payload instead, which [`run_trapped`] turns back
//! into an ordinary value.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

/// Payload carried by an intercepted exit request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrappedExit {
    code: i32,
}

impl TrappedExit {
    pub fn new(code: i32) -> Self {
        Self { code }
    }

    pub fn code(&self) -> i32 {
        self.code
    }
}

impl fmt::Display for TrappedExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit({}) trapped", self.code)
    }
}

/// How [`exit`] behaves on the current thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitPolicy {
    Terminate,
    Trap,
}

thread_local! {
    static EXIT_POLICY: Cell<ExitPolicy> = const { Cell::new(ExitPolicy::Terminate) };
}

/// The exit policy active on the current thread.
pub fn current_policy() -> ExitPolicy {
    EXIT_POLICY.with(Cell::get)
}

/// Requests termination with `code`.
pub fn exit(code: i32) -> ! {
    match current_policy() {
        // resume_unwind skips the panic hook, so nothing is printed.
        ExitPolicy::Trap => panic::resume_unwind(Box::new(TrappedExit::new(code))),
        ExitPolicy::Terminate => std::process::exit(code),
    }
}

/// Guard that traps exits on the current thread until dropped.
///
/// Dropping the guard restores whatever policy was active before, so traps
/// nest. The guard is deliberately `!Send`: it belongs to the thread that
/// installed it.
#[must_use = "the trap is removed as soon as the guard is dropped"]
pub struct ExitTrap {
    previous: ExitPolicy,
    _thread_bound: PhantomData<*const ()>,
}

impl ExitTrap {
    pub fn install() -> Self {
        let previous = EXIT_POLICY.with(|policy| policy.replace(ExitPolicy::Trap));
        Self {
            previous,
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for ExitTrap {
    fn drop(&mut self) {
        EXIT_POLICY.with(|policy| policy.set(self.previous));
    }
}

/// How a trapped call finished.
pub enum Termination<R> {
    /// The call returned normally.
    Returned(R),
    /// The call requested an exit with the given status.
    Exited(i32),
    /// The call panicked for any other reason.
    Panicked(Box<dyn Any + Send>),
}

impl<R: fmt::Debug> fmt::Debug for Termination<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Returned(r) => f.debug_tuple("Returned").field(r).finish(),
            Termination::Exited(code) => f.debug_tuple("Exited").field(code).finish(),
            Termination::Panicked(payload) => f
                .debug_tuple("Panicked")
                .field(&panic_message(payload.as_ref()))
                .finish(),
        }
    }
}

/// Runs `f` with exits trapped, restoring the previous policy on every path.
pub fn run_trapped<R>(f: impl FnOnce() -> R) -> Termination<R> {
    let _trap = ExitTrap::install();
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Termination::Returned(value),
        Err(payload) => match payload.downcast::<TrappedExit>() {
            Ok(exit) => Termination::Exited(exit.code()),
            Err(payload) => Termination::Panicked(payload),
        },
    }
}

/// Best effort text for a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(exit) = payload.downcast_ref::<TrappedExit>() {
        exit.to_string()
    } else {
        "unknown panic payload".to_string()
    }
}
