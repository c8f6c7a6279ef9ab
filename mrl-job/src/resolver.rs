//! Locates the driver entry point of an artifact.
//!
//! Precedence: an explicit class name, then the manifest's main class, then
//! a scan of every packaged class for a `main` entry point.

use tracing::debug;

use common::class::{ClassLoader, ClassRef};
use common::utils::is_blank;

use crate::artifact::Artifact;
use crate::error::ResolutionError;

/// What an artifact offers as drivers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriverInfo {
    /// Main class declared by the manifest.
    pub main_class: Option<String>,

    /// Packaged classes exposing a `main` entry point, in manifest order.
    pub candidates: Vec<String>,
}

/// Resolves the driver class of the artifact at `artifact_location`.
pub fn resolve(
    explicit: Option<&str>,
    artifact_location: &str,
    loader: &dyn ClassLoader,
) -> Result<ClassRef, ResolutionError> {
    let artifact = open(artifact_location)?;

    if !is_blank(explicit) {
        let name = explicit.unwrap_or_default().trim();
        debug!("loading explicitly named driver {name}");
        return load(name, &artifact, loader);
    }

    if let Some(main_class) = artifact.main_class() {
        debug!("loading manifest main class {main_class}");
        return load(&main_class, &artifact, loader);
    }

    let mut candidates = scan(&artifact, loader);
    match candidates.len() {
        0 => Err(ResolutionError::DriverClassNotSpecified {
            artifact: artifact_location.to_string(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => Err(ResolutionError::MultipleDriverClasses {
            artifact: artifact_location.to_string(),
            candidates: candidates.iter().map(|c| c.name().to_string()).collect(),
        }),
    }
}

/// Lists the manifest main class and every driver candidate, for callers
/// that let a user pick one.
pub fn jar_info(
    artifact_location: &str,
    loader: &dyn ClassLoader,
) -> Result<DriverInfo, ResolutionError> {
    let artifact = open(artifact_location)?;
    Ok(DriverInfo {
        main_class: artifact.main_class(),
        candidates: scan(&artifact, loader)
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
    })
}

fn open(artifact_location: &str) -> Result<Artifact, ResolutionError> {
    Artifact::open(artifact_location).map_err(|source| ResolutionError::ArtifactUnreadable {
        artifact: artifact_location.to_string(),
        source,
    })
}

fn load(
    name: &str,
    artifact: &Artifact,
    loader: &dyn ClassLoader,
) -> Result<ClassRef, ResolutionError> {
    let class = loader
        .load_class(name)
        .map_err(|source| ResolutionError::ClassLoad {
            class: name.to_string(),
            artifact: artifact.location().to_string(),
            source,
        })?;
    if !class.has_main() {
        return Err(ResolutionError::NotADriver {
            class: class.name().to_string(),
            artifact: artifact.location().to_string(),
        });
    }
    Ok(class)
}

fn scan(artifact: &Artifact, loader: &dyn ClassLoader) -> Vec<ClassRef> {
    artifact
        .class_names()
        .filter_map(|name| match loader.load_class(&name) {
            Ok(class) => Some(class),
            Err(err) => {
                debug!("skipping {name} while scanning {}: {err}", artifact.location());
                None
            }
        })
        .filter(ClassRef::has_main)
        .collect()
}
