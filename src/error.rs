use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// How far an error reaches.
///
/// `Input` errors abort a run before any backend process is spawned. `PerClip` errors are
/// recorded against one clip and the run moves on. `Environment` errors mean the machine
/// can't do the work at all (no media backend, filesystem trouble).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Input,
    PerClip,
    Environment,
}

/// Crate-wide error type.
///
/// This is intentionally decoupled from `anyhow` so downstream libraries aren't forced to
/// adopt `anyhow` in their own public APIs.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed time '{input}': {reason}")]
    MalformedTime { input: String, reason: String },

    #[error("manifest not found: {}", path.display())]
    ManifestNotFound { path: PathBuf },

    #[error("manifest {} is not valid JSON: {source}", path.display())]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid manifest: {0}")]
    ManifestValidation(String),

    #[error("source media not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("media backend '{program}' is unavailable: {reason}")]
    BackendUnavailable { program: String, reason: String },

    #[error("{program} exited with {status}: {stderr}")]
    ExtractionBackend {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("accelerated device requested but {0}")]
    DeviceUnavailable(String),

    #[error("failed to load ASR model {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("failed to embed subtitles into {}: {reason}", clip.display())]
    Embed { clip: PathBuf, reason: String },

    #[error("caption {} does not belong to clip {}", srt.display(), clip.display())]
    CaptionMismatch { clip: PathBuf, srt: PathBuf },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Message(String),
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn malformed_time(input: &str, reason: impl Into<String>) -> Self {
        Self::MalformedTime {
            input: input.to_owned(),
            reason: reason.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MalformedTime { .. }
            | Self::ManifestNotFound { .. }
            | Self::ManifestParse { .. }
            | Self::ManifestValidation(_)
            | Self::SourceNotFound { .. } => ErrorClass::Input,
            Self::BackendUnavailable { .. } | Self::Io(_) => ErrorClass::Environment,
            Self::ExtractionBackend { .. }
            | Self::DeviceUnavailable(_)
            | Self::ModelLoad { .. }
            | Self::Transcription(_)
            | Self::Embed { .. }
            | Self::CaptionMismatch { .. }
            | Self::Cancelled
            | Self::Message(_) => ErrorClass::PerClip,
        }
    }

    /// True for errors that should stop a run before any clip work starts.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.class(), ErrorClass::PerClip)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}
