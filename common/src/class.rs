//! Named, statically linked application classes.
//!
//! A MapReduce application is shipped as an artifact that lists class names.
//! Each name resolves, through a [`ClassLoader`], to a [`ClassRef`]: a driver
//! with a `main` entry point, a mapper, a reducer, or an input/output format.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{KeyValue, MapFn, ReduceFn};

/// Entry point of a driver class.
///
/// Returning `Ok` is a normal exit with status 0. Drivers may also call
/// [`crate::process::exit`] to finish with an explicit status.
pub type MainFn = fn(ctx: &DriverContext) -> anyhow::Result<()>;

/// Splits the raw contents of one input file into records.
pub type InputFormatFn = fn(name: &str, contents: Bytes) -> Vec<KeyValue>;

/// Renders one reduced record as output bytes.
pub type OutputFormatFn = fn(key: &Bytes, value: &Bytes) -> Bytes;

/// What a loaded class can do.
#[derive(Clone, Copy, Debug)]
pub enum ClassKind {
    Driver(MainFn),
    Mapper(MapFn),
    Reducer(ReduceFn),
    InputFormat(InputFormatFn),
    OutputFormat(OutputFormatFn),
}

impl ClassKind {
    /// Human readable kind, used in error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            ClassKind::Driver(_) => "driver",
            ClassKind::Mapper(_) => "mapper",
            ClassKind::Reducer(_) => "reducer",
            ClassKind::InputFormat(_) => "input format",
            ClassKind::OutputFormat(_) => "output format",
        }
    }
}

/// A class resolved by a [`ClassLoader`].
#[derive(Clone, Debug)]
pub struct ClassRef {
    name: String,
    kind: ClassKind,
}

impl ClassRef {
    pub fn new(name: impl Into<String>, kind: ClassKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Fully qualified class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    /// The `main` entry point, if this class is a driver.
    pub fn main(&self) -> Option<MainFn> {
        match self.kind {
            ClassKind::Driver(main) => Some(main),
            _ => None,
        }
    }

    pub fn has_main(&self) -> bool {
        self.main().is_some()
    }
}

impl fmt::Display for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("class not found: {0}")]
pub struct ClassNotFound(pub String);

/// Source of classes for artifacts and job configurations.
pub trait ClassLoader: Send + Sync {
    /// Loads a class by its fully qualified name.
    fn load_class(&self, name: &str) -> Result<ClassRef, ClassNotFound>;
}

/// Normalises a class name the way artifact entries are written
/// (`com/example/Main` becomes `com.example.Main`).
pub fn normalize_class_name(name: &str) -> String {
    name.trim().replace('/', ".")
}

/// Execution context handed to a driver's `main`.
#[derive(Clone, Debug)]
pub struct DriverContext {
    args: Vec<String>,
    interrupt: CancellationToken,
}

impl DriverContext {
    pub fn new(args: Vec<String>, interrupt: CancellationToken) -> Self {
        Self { args, interrupt }
    }

    /// Command line arguments passed to the driver.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Whether the job has been asked to stop.
    ///
    /// Interruption is cooperative: a driver that never checks this flag
    /// keeps running until it returns on its own.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Token cancelled when the job is killed.
    pub fn interrupt_token(&self) -> &CancellationToken {
        &self.interrupt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_ctx: &DriverContext) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_normalize_class_name() {
        assert_eq!(normalize_class_name("com/example/Main"), "com.example.Main");
        assert_eq!(normalize_class_name(" a.B "), "a.B");
    }

    #[test]
    fn test_only_drivers_have_main() {
        let driver = ClassRef::new("a.Driver", ClassKind::Driver(noop));
        assert!(driver.has_main());
        assert_eq!(driver.to_string(), "a.Driver");

        let format = ClassRef::new(
            "a.Format",
            ClassKind::OutputFormat(|_k: &Bytes, v: &Bytes| v.clone()),
        );
        assert!(!format.has_main());
        assert_eq!(format.kind().describe(), "output format");
    }

    #[test]
    fn test_driver_context_interrupt() {
        let token = CancellationToken::new();
        let ctx = DriverContext::new(vec!["x".to_string()], token.clone());
        assert_eq!(ctx.args(), ["x".to_string()]);
        assert!(!ctx.is_interrupted());
        token.cancel();
        assert!(ctx.is_interrupted());
    }
}
