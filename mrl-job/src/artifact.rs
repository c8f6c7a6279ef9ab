//! Deployable application artifacts.
//!
//! An artifact is a JSON manifest naming the classes it packages and,
//! optionally, the one to run by default:
//!
//! ```json
//! { "main_class": "mrl.workload.WordCount", "classes": ["mrl.workload.WordCount"] }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use common::class::normalize_class_name;
use common::utils::is_blank;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid artifact location {0}")]
    InvalidLocation(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("malformed manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_class: Option<String>,

    #[serde(default)]
    pub classes: Vec<String>,
}

/// An opened artifact.
#[derive(Clone, Debug)]
pub struct Artifact {
    location: String,
    manifest: ArtifactManifest,
}

impl Artifact {
    /// Reads the manifest at `location`, a `file://` URL or a local path.
    pub fn open(location: &str) -> Result<Self, ArtifactError> {
        let path = local_path(location)?;
        let manifest = serde_json::from_slice(&fs::read(path)?)?;
        Ok(Self {
            location: location.to_string(),
            manifest,
        })
    }

    /// Writes `manifest` to `path`.
    pub fn write(path: &Path, manifest: &ArtifactManifest) -> Result<(), ArtifactError> {
        fs::write(path, serde_json::to_vec_pretty(manifest)?)?;
        Ok(())
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// The declared main class, if the manifest names a non-blank one.
    pub fn main_class(&self) -> Option<String> {
        let main_class = self.manifest.main_class.as_deref();
        if is_blank(main_class) {
            return None;
        }
        main_class.map(normalize_class_name)
    }

    /// Classes packaged in the artifact, in manifest order.
    pub fn class_names(&self) -> impl Iterator<Item = String> + '_ {
        self.manifest
            .classes
            .iter()
            .filter(|name| !name.trim().is_empty())
            .map(|name| normalize_class_name(name))
    }
}

/// Local filesystem path of an artifact location.
pub fn local_path(location: &str) -> Result<PathBuf, ArtifactError> {
    if location.trim().is_empty() {
        return Err(ArtifactError::InvalidLocation(location.to_string()));
    }
    match Url::parse(location) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|_| ArtifactError::InvalidLocation(location.to_string())),
        // Windows drive letters parse as a one letter scheme.
        Ok(url) if url.scheme().len() > 1 => Err(ArtifactError::InvalidLocation(location.to_string())),
        _ => Ok(PathBuf::from(location)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_reads_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.json");
        fs::write(
            &path,
            r#"{"main_class": "com/example/Main", "classes": ["com.example.Main", " "]}"#,
        )
        .unwrap();

        let url = Url::from_file_path(&path).unwrap().to_string();
        let artifact = Artifact::open(&url).unwrap();
        assert_eq!(artifact.main_class().as_deref(), Some("com.example.Main"));
        assert_eq!(artifact.class_names().collect::<Vec<_>>(), vec!["com.example.Main"]);
        assert_eq!(artifact.location(), url);
    }

    #[test]
    fn test_blank_main_class_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.json");
        fs::write(&path, r#"{"main_class": "  "}"#).unwrap();
        let artifact = Artifact::open(path.to_str().unwrap()).unwrap();
        assert_eq!(artifact.main_class(), None);
        assert_eq!(artifact.class_names().count(), 0);
    }

    #[test]
    fn test_open_errors() {
        assert!(matches!(
            Artifact::open("http://example.com/app.json"),
            Err(ArtifactError::InvalidLocation(_))
        ));
        assert!(matches!(
            Artifact::open("/definitely/not/here.json"),
            Err(ArtifactError::Io(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            Artifact::open(path.to_str().unwrap()),
            Err(ArtifactError::Manifest(_))
        ));
    }
}
