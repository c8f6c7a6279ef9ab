//! Built-in MapReduce applications and the registry that names them.
//!
//! Every mapper, reducer, format and driver here is published under a
//! class name in [`Registry::builtin`], which is the default
//! [`ClassLoader`] used when resolving artifacts and job configurations.

use std::collections::BTreeMap;

use common::class::{normalize_class_name, ClassKind, ClassLoader, ClassNotFound, ClassRef};

pub mod drivers;
pub mod formats;
pub mod grep;
pub mod matrix_multiply;
pub mod vertex_degree;
pub mod wc;

pub const WORD_COUNT_DRIVER: &str = "mrl.workload.WordCount";
pub const SLEEP_DRIVER: &str = "mrl.workload.Sleep";

pub const WORD_COUNT_MAPPER: &str = "mrl.workload.wc.TokenizerMapper";
pub const WORD_COUNT_REDUCER: &str = "mrl.workload.wc.IntSumReducer";
pub const GREP_MAPPER: &str = "mrl.workload.grep.GrepMapper";
pub const GREP_REDUCER: &str = "mrl.workload.grep.CountReducer";
pub const VERTEX_DEGREE_MAPPER: &str = "mrl.workload.graph.VertexDegreeMapper";
pub const VERTEX_DEGREE_COMBINER: &str = "mrl.workload.graph.VertexDegreeCombiner";
pub const VERTEX_DEGREE_REDUCER: &str = "mrl.workload.graph.VertexDegreeReducer";
pub const MATRIX_JOIN_MAPPER: &str = "mrl.workload.matrix.JoinMapper";
pub const MATRIX_JOIN_REDUCER: &str = "mrl.workload.matrix.ProductReducer";
pub const MATRIX_SUM_MAPPER: &str = "mrl.workload.matrix.CellMapper";
pub const MATRIX_SUM_REDUCER: &str = "mrl.workload.matrix.SumReducer";

pub const WHOLE_FILE_INPUT: &str = "mrl.io.WholeFileInputFormat";
pub const LINE_INPUT: &str = "mrl.io.LineInputFormat";
pub const RAW_OUTPUT: &str = "mrl.io.RawOutputFormat";
pub const TEXT_OUTPUT: &str = "mrl.io.TextOutputFormat";

/// A name to class table.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    classes: BTreeMap<String, ClassKind>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every class shipped with this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(WORD_COUNT_DRIVER, ClassKind::Driver(drivers::word_count))
            .register(SLEEP_DRIVER, ClassKind::Driver(drivers::sleep))
            .register(WORD_COUNT_MAPPER, ClassKind::Mapper(wc::map))
            .register(WORD_COUNT_REDUCER, ClassKind::Reducer(wc::reduce))
            .register(GREP_MAPPER, ClassKind::Mapper(grep::map))
            .register(GREP_REDUCER, ClassKind::Reducer(grep::reduce))
            .register(VERTEX_DEGREE_MAPPER, ClassKind::Mapper(vertex_degree::map))
            .register(VERTEX_DEGREE_COMBINER, ClassKind::Reducer(vertex_degree::combine))
            .register(VERTEX_DEGREE_REDUCER, ClassKind::Reducer(vertex_degree::reduce))
            .register(MATRIX_JOIN_MAPPER, ClassKind::Mapper(matrix_multiply::map_phase_one))
            .register(MATRIX_JOIN_REDUCER, ClassKind::Reducer(matrix_multiply::reduce_phase_one))
            .register(MATRIX_SUM_MAPPER, ClassKind::Mapper(matrix_multiply::map_phase_two))
            .register(MATRIX_SUM_REDUCER, ClassKind::Reducer(matrix_multiply::reduce_phase_two))
            .register(WHOLE_FILE_INPUT, ClassKind::InputFormat(formats::whole_file))
            .register(LINE_INPUT, ClassKind::InputFormat(formats::lines))
            .register(RAW_OUTPUT, ClassKind::OutputFormat(formats::raw))
            .register(TEXT_OUTPUT, ClassKind::OutputFormat(formats::text));
        registry
    }

    /// Adds or replaces a class.
    pub fn register(&mut self, name: &str, kind: ClassKind) -> &mut Self {
        self.classes.insert(normalize_class_name(name), kind);
        self
    }

    /// Registered class names, sorted.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassLoader for Registry {
    fn load_class(&self, name: &str) -> Result<ClassRef, ClassNotFound> {
        let name = normalize_class_name(name);
        match self.classes.get(&name) {
            Some(kind) => Ok(ClassRef::new(name, *kind)),
            None => Err(ClassNotFound(name)),
        }
    }
}
