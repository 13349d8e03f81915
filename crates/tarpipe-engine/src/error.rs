//! Error types for tarpipe-engine

use thiserror::Error;

/// Result type alias using tarpipe-engine's error type
pub type Result<T> = std::result::Result<T, EngineError>;

/// Faults raised by the backup/restore engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine is not configured to perform the requested operation
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A value handed to a command builder cannot be passed to the archiver
    #[error("Invalid argument for {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    /// A pipeline stage exited unsuccessfully
    #[error("{operation} process failed ({program}) with {}", describe_code(.code))]
    Process {
        operation: String,
        program: String,
        code: Option<i32>,
    },

    /// A pipeline stage could not be launched
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The chunk source failed before signalling end of data
    #[error("Chunk source failed: {message}")]
    Source { message: String },

    /// A background task died before it could report its outcome
    #[error("{operation} task aborted: {message}")]
    Aborted { operation: String, message: String },

    /// The storage collaborator failed
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("return code: {}", code),
        None => "termination by signal".to_string(),
    }
}

impl EngineError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a process failure error
    pub fn process(
        operation: impl Into<String>,
        program: impl Into<String>,
        code: Option<i32>,
    ) -> Self {
        Self::Process {
            operation: operation.into(),
            program: program.into(),
            code,
        }
    }

    /// Create a spawn error
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Create a chunk source error
    pub fn source_failed(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
        }
    }

    /// Create an aborted task error
    pub fn aborted(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Aborted {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Exit code carried by a process failure, if this is one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Process { code, .. } => *code,
            _ => None,
        }
    }
}
