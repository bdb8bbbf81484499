use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Where a processor failure happened, when the processor knows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub filename: PathBuf,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.filename.display())?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(column) = self.column {
                write!(f, ":{column}")?;
            }
        }
        Ok(())
    }
}

/// Failure reported by a processor step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorError {
    pub message: String,
    pub filename: Option<PathBuf>,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl ProcessorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProcessorError {}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unable to resolve the real path of `{0}`")]
    InvalidRealpath(String),

    #[error("unsupported placeholder type `{0}`")]
    UnknownPlaceholder(String),

    #[error("unable to load processor `{key}`")]
    UnknownProcessor { key: String },

    #[error("unbalanced `{kind}` placeholder at depth {depth}")]
    UnbalancedPlaceholder { kind: String, depth: usize },

    #[error("{key}: {message} [{location}]")]
    Step {
        key: String,
        message: String,
        location: Location,
    },

    #[error("unable to embed file[{0}] into itself")]
    SelfEmbed(String),

    #[error("{}", format_cycle(.0))]
    CircularEmbed(Vec<String>),

    #[error("unable to embed non-existent file {0}")]
    MissingEmbed(String),

    #[error("{source} in [{subpath}]")]
    InFile {
        subpath: String,
        #[source]
        source: Box<CompileError>,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache error: {0}")]
    Cache(String),
}

fn format_cycle(path: &[String]) -> String {
    let chain = path
        .iter()
        .map(|item| format!("`{item}`"))
        .collect::<Vec<String>>()
        .join(" -> ");
    format!("circular embed {chain}")
}

impl CompileError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CompileError::Io {
            path: path.into(),
            source,
        }
    }

    /// Attaches the unit being restored, unless a nested unit already did.
    pub fn in_file(self, subpath: &str) -> Self {
        match self {
            CompileError::InFile { .. } => self,
            other => CompileError::InFile {
                subpath: subpath.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub fn root_cause(&self) -> &CompileError {
        match self {
            CompileError::InFile { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
