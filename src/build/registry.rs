use super::error::{CompileError, ProcessorError};
use super::file::{Content, File};
use super::pipeline::Stage;
use ahash::AHashMap;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A transformation step that can be placed in any stage chain.
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    /// Options every invocation starts from, before settings and inline options.
    fn default_options(&self) -> Map<String, Value> {
        Map::new()
    }

    fn process(
        &self,
        content: Content,
        file: &File,
        settings: &Map<String, Value>,
    ) -> Result<Content, ProcessorError>;
}

type ProcessFn =
    dyn Fn(Content, &File, &Map<String, Value>) -> Result<Content, ProcessorError> + Send + Sync;

/// Adapts a closure into a [`Processor`].
pub struct FnProcessor {
    name: String,
    defaults: Map<String, Value>,
    process: Box<ProcessFn>,
}

impl FnProcessor {
    pub fn new<F>(name: &str, process: F) -> Self
    where
        F: Fn(Content, &File, &Map<String, Value>) -> Result<Content, ProcessorError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.to_string(),
            defaults: Map::new(),
            process: Box::new(process),
        }
    }

    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.defaults = defaults;
        self
    }
}

impl Processor for FnProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_options(&self) -> Map<String, Value> {
        self.defaults.clone()
    }

    fn process(
        &self,
        content: Content,
        file: &File,
        settings: &Map<String, Value>,
    ) -> Result<Content, ProcessorError> {
        (self.process)(content, file, settings)
    }
}

/// Named processors per stage.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: AHashMap<(Stage, String), Arc<dyn Processor>>,
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("count", &self.processors.len())
            .finish()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: Stage, processor: Arc<dyn Processor>) -> &mut Self {
        self.processors
            .insert((stage, processor.name().to_string()), processor);
        self
    }

    pub fn contains(&self, stage: Stage, name: &str) -> bool {
        self.processors.contains_key(&(stage, name.to_string()))
    }

    pub fn resolve(&self, stage: Stage, name: &str) -> Result<Arc<dyn Processor>, CompileError> {
        self.processors
            .get(&(stage, name.to_string()))
            .cloned()
            .ok_or_else(|| CompileError::UnknownProcessor {
                key: format!("{stage}.{name}"),
            })
    }

    pub fn names(&self, stage: Stage) -> Vec<&str> {
        let mut names = self
            .processors
            .keys()
            .filter(|(registered, _)| *registered == stage)
            .map(|(_, name)| name.as_str())
            .collect::<Vec<&str>>();
        names.sort_unstable();
        names
    }
}
