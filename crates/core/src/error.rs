// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading a transcript.
///
/// These never escape the public parser API: `TranscriptParser::parse`
/// turns every variant into a zero-valued `SessionStats`.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Transcript not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Permission denied reading transcript: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {path}: {message}")]
    MalformedJson { path: PathBuf, message: String },

    #[error("Empty transcript: {path}")]
    EmptyFile { path: PathBuf },
}

impl ParseError {
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io { path, source },
        }
    }
}

/// Errors from loading `config.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {message}")]
    Invalid { path: PathBuf, message: String },

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Errors from an external completion call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Completion timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Completion provider failed: {0}")]
    Provider(String),

    #[error("Empty input")]
    EmptyInput,
}
