//! Job configurations as handed to a cluster.

use std::collections::BTreeMap;

use common::class::ClassRef;
use common::fs::DfsPath;

/// Default filesystem job paths are qualified against.
pub const DEFAULT_FS: &str = "mrl.fs.default";
/// Auxiliary argument passed to every map and reduce call.
pub const JOB_AUX: &str = "mrl.job.aux";
pub const OUTPUT_KEY_CLASS: &str = "mrl.output.key.class";
pub const OUTPUT_VALUE_CLASS: &str = "mrl.output.value.class";
pub const MAP_OUTPUT_KEY_CLASS: &str = "mrl.map.output.key.class";
pub const MAP_OUTPUT_VALUE_CLASS: &str = "mrl.map.output.value.class";
/// Classpath seen by tasks.
pub const APPLICATION_CLASSPATH: &str = "mrl.application.classpath";
/// Files localised next to every task.
pub const CACHE_FILES: &str = "mrl.cache.files";
/// Cached files added to the task classpath.
pub const CLASSPATH_FILES: &str = "mrl.job.classpath.files";

/// A string to string property bag.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A concrete job configuration.
///
/// Classes are resolved [`ClassRef`]s; free-form settings live in the
/// property bag.
#[derive(Clone, Debug)]
pub struct Configuration {
    properties: Properties,

    pub job_name: Option<String>,

    /// Code source of the job.
    pub jar: Option<String>,
    pub driver: Option<ClassRef>,

    pub mapper: Option<ClassRef>,
    pub combiner: Option<ClassRef>,
    pub reducer: Option<ClassRef>,
    pub input_format: Option<ClassRef>,
    pub output_format: Option<ClassRef>,
    pub map_runner: Option<ClassRef>,

    pub input_paths: Vec<DfsPath>,
    pub output_path: Option<DfsPath>,

    pub num_map_tasks: usize,
    pub num_reduce_tasks: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            properties: Properties::new(),
            job_name: None,
            jar: None,
            driver: None,
            mapper: None,
            combiner: None,
            reducer: None,
            input_format: None,
            output_format: None,
            map_runner: None,
            input_paths: vec![],
            output_path: None,
            num_map_tasks: 1,
            num_reduce_tasks: 1,
        }
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.properties.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.properties.get_or(key, default)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}
