//! Distributed filesystem contract.
//!
//! Paths are absolute, slash separated and scheme-less (`/user/mrl/env`).
//! A filesystem decides where that namespace lives: a directory tree on the
//! local disk ([`LocalFileSystem`]) or a bucket in an S3-compatible object
//! store ([`crate::minio::S3FileSystem`]).

use std::fmt;
use std::io;

use bytes::Bytes;
use url::Url;

mod local;

pub use local::LocalFileSystem;

/// Absolute path inside a [`FileSystem`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DfsPath(String);

impl DfsPath {
    /// Normalizes `path`: empty and `.` segments are dropped and `..` removes
    /// the segment before it. `..` never climbs above the root.
    pub fn new(path: impl AsRef<str>) -> Self {
        let mut segments: Vec<&str> = vec![];
        for segment in path.as_ref().split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                _ => segments.push(segment),
            }
        }
        Self(format!("/{}", segments.join("/")))
    }

    /// Qualifies `relative` against `base`, the way job paths are resolved
    /// against the cluster's default filesystem.
    ///
    /// Either side may carry a scheme (`s3://bucket/x`, `file:///x`); only the
    /// path component is kept. An absolute `relative` ignores `base`.
    pub fn resolve(base: &str, relative: &str) -> Self {
        let relative_path = strip_scheme(relative);
        if relative_path.starts_with('/') {
            return Self::new(relative_path);
        }
        Self::new(strip_scheme(base)).join(&relative_path)
    }

    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn join(&self, child: &str) -> Self {
        Self::new(format!("{}/{}", self.0, child))
    }

    /// Last path component, empty for the root.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let idx = self.0.rfind('/').unwrap_or(0);
        Some(Self::new(&self.0[..idx]))
    }

    /// Path of `self` relative to `ancestor`, if `ancestor` contains it.
    pub fn strip_prefix(&self, ancestor: &DfsPath) -> Option<&str> {
        if ancestor.is_root() {
            return Some(self.0.trim_start_matches('/'));
        }
        let rest = self.0.strip_prefix(ancestor.as_str())?;
        if rest.is_empty() {
            Some(rest)
        } else {
            rest.strip_prefix('/')
        }
    }
}

impl fmt::Display for DfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn strip_scheme(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) if url.scheme() == "file" => url.path().to_string(),
        // s3://bucket/key: the bucket is the filesystem, the key the path.
        Ok(url) if url.has_host() => format!("/{}", url.path().trim_start_matches('/')),
        _ => raw.to_string(),
    }
}

/// Client-side operations against a distributed filesystem.
///
/// All calls block the calling thread.
pub trait FileSystem: Send + Sync {
    /// URI of this filesystem, used as the default base for job paths.
    fn uri(&self) -> String;

    /// Qualifies `relative` against `base`.
    fn as_path(&self, base: &str, relative: &str) -> DfsPath {
        DfsPath::resolve(base, relative)
    }

    fn exists(&self, path: &DfsPath) -> io::Result<bool>;

    fn is_dir(&self, path: &DfsPath) -> io::Result<bool>;

    /// Deletes `path`. Returns `false` if there was nothing to delete.
    fn delete(&self, path: &DfsPath, recursive: bool) -> io::Result<bool>;

    fn mkdirs(&self, path: &DfsPath) -> io::Result<()>;

    /// Writes `data` to `path`, creating parents and replacing any file there.
    fn write(&self, path: &DfsPath, data: Bytes) -> io::Result<()>;

    fn read(&self, path: &DfsPath) -> io::Result<Bytes>;

    /// Files (not directories) below `path`, sorted.
    fn list_files(&self, path: &DfsPath, recursive: bool) -> io::Result<Vec<DfsPath>>;
}
