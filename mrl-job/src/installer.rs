//! Installs the shared runtime environment onto the job filesystem.
//!
//! An environment is a tar archive of libraries extracted once per
//! installation id under the configured install directory. Jobs then pick
//! the libraries up through the distributed cache.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use itertools::Itertools;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use common::fs::{DfsPath, FileSystem};
use common::utils::is_blank;

use crate::config::{
    Configuration, Properties, APPLICATION_CLASSPATH, CACHE_FILES, CLASSPATH_FILES,
};
use crate::error::{InstallCause, InstallationError};

pub const USE_DISTRIBUTED_CACHE: &str = "mrl.use.distributed.cache";
pub const INSTALL_DIR: &str = "mrl.env.dfs.install.dir";
pub const INSTALLATION_ID: &str = "mrl.env.installation.id";
pub const LIBRARIES_ARCHIVE: &str = "mrl.env.libraries.archive.file";
pub const ADDITIONAL_PLUGINS: &str = "mrl.env.additional.plugins";

pub const DEFAULT_LIBRARIES_ARCHIVE: &str = "mrl-libraries.tar";
pub const DEFAULT_CLASSPATH: &str = "$MRL_HOME/lib/*";

/// Marks an installation in progress.
pub const LOCK_FILE: &str = ".mrl-install.lock";
const LIB_DIR: &str = "lib";
const PLUGINS_DIR: &str = "plugins";
const CLASSES_PREFIX: &str = "classes/";

/// Ensures a job's runtime environment is present before submission.
#[derive(Clone, Debug)]
pub struct EnvironmentInstaller {
    properties: Properties,
    resource_dir: PathBuf,
}

impl EnvironmentInstaller {
    /// `properties` supply defaults for settings the job configuration does
    /// not carry; archives are looked up in `resource_dir`.
    pub fn new(properties: Properties, resource_dir: impl Into<PathBuf>) -> Self {
        Self {
            properties,
            resource_dir: resource_dir.into(),
        }
    }

    /// The job's value for `key`, falling back to the installer's own
    /// properties when the job's is absent or blank.
    fn setting(&self, conf: &Configuration, key: &str) -> Option<String> {
        conf.get(key)
            .filter(|value| !is_blank(Some(*value)))
            .or_else(|| self.properties.get(key).filter(|value| !is_blank(Some(*value))))
            .map(|value| value.trim().to_string())
    }

    fn enabled(&self, conf: &Configuration) -> bool {
        self.setting(conf, USE_DISTRIBUTED_CACHE)
            .map_or(true, |value| !value.eq_ignore_ascii_case("false"))
    }

    /// Id of the installation: the configured id, or the crate version
    /// qualified by the cluster when the configured id is blank.
    pub fn installation_id(&self, conf: &Configuration, cluster_id: &str) -> String {
        let version = env!("CARGO_PKG_VERSION");
        if let Some(id) = self.setting(conf, INSTALLATION_ID) {
            return id;
        }
        let configured =
            conf.get(INSTALLATION_ID).is_some() || self.properties.get(INSTALLATION_ID).is_some();
        if configured {
            format!("{version}-{cluster_id}")
        } else {
            version.to_string()
        }
    }

    /// Filesystem path an installation lives at.
    pub fn install_path(
        &self,
        conf: &Configuration,
        fs: &dyn FileSystem,
        cluster_id: &str,
    ) -> Result<DfsPath, InstallationError> {
        let install_dir = self
            .setting(conf, INSTALL_DIR)
            .ok_or_else(|| InstallationError::new(InstallCause::InstallDirMissing))?;
        let id = self.installation_id(conf, cluster_id);
        Ok(fs.as_path(&format!("{install_dir}/"), &id))
    }

    /// Installs the environment unless a verified installation exists, then
    /// points the job's classpath and distributed cache at it.
    ///
    /// Calling this again after a successful install only rewrites `conf`.
    pub fn ensure_installed(
        &self,
        conf: &mut Configuration,
        fs: &dyn FileSystem,
        cluster_id: &str,
    ) -> Result<(), InstallationError> {
        if !self.enabled(conf) {
            debug!("distributed cache disabled, skipping environment install");
            return Ok(());
        }

        let target = self.install_path(conf, fs, cluster_id)?;
        if is_installed(fs, &target)? {
            info!("environment already installed at {target}");
        } else {
            let archive = self.locate_archive(conf)?;
            info!("installing environment from {} to {target}", archive.display());
            self.install(conf, fs, &archive, &target)?;
            if !is_installed(fs, &target)? {
                return Err(InstallationError::new(InstallCause::InstallationMissing(
                    target.to_string(),
                )));
            }
        }

        self.configure_classpath(conf, fs, &target)
    }

    fn locate_archive(&self, conf: &Configuration) -> Result<PathBuf, InstallationError> {
        let name = self
            .setting(conf, LIBRARIES_ARCHIVE)
            .unwrap_or_else(|| DEFAULT_LIBRARIES_ARCHIVE.to_string());
        let path = self.resource_dir.join(&name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(InstallationError::new(InstallCause::ArchiveNotFound(name)))
        }
    }

    fn install(
        &self,
        conf: &Configuration,
        fs: &dyn FileSystem,
        archive: &Path,
        target: &DfsPath,
    ) -> Result<(), InstallationError> {
        let lock = target.join(LOCK_FILE);
        fs.write(&lock, Bytes::new()).map_err(InstallationError::new)?;

        extract(fs, archive, target).map_err(InstallationError::new)?;

        if let Some(plugins) = self.setting(conf, ADDITIONAL_PLUGINS) {
            for dir in plugins.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                copy_plugin(fs, Path::new(dir), &target.join(PLUGINS_DIR))
                    .map_err(InstallationError::new)?;
            }
        }

        fs.delete(&lock, false).map_err(InstallationError::new)?;
        Ok(())
    }

    fn configure_classpath(
        &self,
        conf: &mut Configuration,
        fs: &dyn FileSystem,
        target: &DfsPath,
    ) -> Result<(), InstallationError> {
        let base = self
            .setting(conf, APPLICATION_CLASSPATH)
            .unwrap_or_else(|| DEFAULT_CLASSPATH.to_string());
        conf.set(APPLICATION_CLASSPATH, format!("{CLASSES_PREFIX},{base}"));

        let libs = fs
            .list_files(&target.join(LIB_DIR), true)
            .map_err(InstallationError::new)?;
        let files = libs.iter().join(",");
        if !files.is_empty() {
            for key in [CACHE_FILES, CLASSPATH_FILES] {
                let value = match conf.get(key) {
                    Some(existing) if !existing.is_empty() => format!("{existing},{files}"),
                    _ => files.clone(),
                };
                conf.set(key, value);
            }
        }

        info!(
            "job classpath is {}",
            conf.get(APPLICATION_CLASSPATH).unwrap_or_default()
        );
        Ok(())
    }
}

/// A target counts as installed once its `lib` directory exists and no
/// install is in progress.
pub fn is_installed(fs: &dyn FileSystem, target: &DfsPath) -> Result<bool, InstallationError> {
    let lib = fs.is_dir(&target.join(LIB_DIR)).map_err(InstallationError::new)?;
    let locked = fs.exists(&target.join(LOCK_FILE)).map_err(InstallationError::new)?;
    Ok(lib && !locked)
}

fn extract(fs: &dyn FileSystem, archive: &Path, target: &DfsPath) -> std::io::Result<()> {
    let mut archive = tar::Archive::new(File::open(archive)?);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            warn!("skipping archive entry {} outside the install dir", path.display());
            continue;
        }
        let dest = target.join(&path.to_string_lossy());
        match entry.header().entry_type() {
            tar::EntryType::Directory => fs.mkdirs(&dest)?,
            tar::EntryType::Regular => {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                fs.write(&dest, Bytes::from(data))?;
            }
            other => debug!("skipping {other:?} archive entry {}", path.display()),
        }
    }
    Ok(())
}

fn copy_plugin(fs: &dyn FileSystem, dir: &Path, plugins: &DfsPath) -> std::io::Result<()> {
    let Some(name) = dir.file_name() else {
        warn!("ignoring plugin directory {}", dir.display());
        return Ok(());
    };
    let dest = plugins.join(&name.to_string_lossy());
    info!("copying plugin {} to {dest}", dir.display());
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let data = std::fs::read(entry.path())?;
        fs.write(&dest.join(&relative.to_string_lossy()), Bytes::from(data))?;
    }
    Ok(())
}
