use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;
use walkdir::WalkDir;

use super::{DfsPath, FileSystem};

/// A [`FileSystem`] backed by a directory on the local disk.
///
/// The directory is the filesystem root: `/a/b` maps to `<root>/a/b`.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of `path` on the local disk.
    pub fn local_path(&self, path: &DfsPath) -> PathBuf {
        self.root.join(path.as_str().trim_start_matches('/'))
    }

    fn to_dfs_path(&self, local: &Path) -> Option<DfsPath> {
        let relative = local.strip_prefix(&self.root).ok()?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        Some(DfsPath::new(relative))
    }
}

impl FileSystem for LocalFileSystem {
    fn uri(&self) -> String {
        "file:///".to_string()
    }

    fn exists(&self, path: &DfsPath) -> io::Result<bool> {
        Ok(self.local_path(path).exists())
    }

    fn is_dir(&self, path: &DfsPath) -> io::Result<bool> {
        Ok(self.local_path(path).is_dir())
    }

    fn delete(&self, path: &DfsPath, recursive: bool) -> io::Result<bool> {
        let local = self.local_path(path);
        if !local.exists() {
            return Ok(false);
        }
        debug!("deleting {} (recursive={})", local.display(), recursive);
        if local.is_dir() {
            if recursive {
                fs::remove_dir_all(&local)?;
            } else {
                fs::remove_dir(&local)?;
            }
        } else {
            fs::remove_file(&local)?;
        }
        Ok(true)
    }

    fn mkdirs(&self, path: &DfsPath) -> io::Result<()> {
        fs::create_dir_all(self.local_path(path))
    }

    fn write(&self, path: &DfsPath, data: Bytes) -> io::Result<()> {
        let local = self.local_path(path);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(local, &data)
    }

    fn read(&self, path: &DfsPath) -> io::Result<Bytes> {
        Ok(Bytes::from(fs::read(self.local_path(path))?))
    }

    fn list_files(&self, path: &DfsPath, recursive: bool) -> io::Result<Vec<DfsPath>> {
        let local = self.local_path(path);
        if !local.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{path} does not exist"),
            ));
        }
        if local.is_file() {
            return Ok(vec![path.clone()]);
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut files = vec![];
        for entry in WalkDir::new(&local).min_depth(1).max_depth(max_depth) {
            let entry = entry.map_err(io::Error::other)?;
            if entry.file_type().is_file() {
                if let Some(dfs_path) = self.to_dfs_path(entry.path()) {
                    files.push(dfs_path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}
