/// bima error types and handling utilities
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BimaError>;

/// Main error type for bima operations
#[derive(Debug, Error)]
pub enum BimaError {
    /// Instruction verb outside the supported set
    #[error("operation {verb:?} is not supported")]
    UnsupportedInstruction { verb: String },
    #[error("invalid COPY format: {line:?}")]
    InvalidCopyFormat { line: String },
    #[error("invalid LABEL format: {line:?}")]
    InvalidLabelFormat { line: String },
    #[error("invalid ARCH format: {line:?}")]
    InvalidArchFormat { line: String },

    /// COPY source is missing or yields no regular files
    #[error("{} does not exist or is empty", path.display())]
    SourceNotFound { path: PathBuf },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a valid bima image")]
    NotABimaImage,
    #[error("invalid bima unikernel image - missing labels {missing:?}")]
    MissingRequiredLabels { missing: Vec<String> },
    #[error("label {key:?} does not hold a valid base64 value")]
    InvalidEncoding { key: String },

    #[error("unknown architecture: {machine}")]
    UnknownArchitecture { machine: String },
    #[error("failed to detect architecture of {}: {reason}", path.display())]
    ArchitectureDetectionFailed { path: PathBuf, reason: String },
    #[error("unikernel annotation was not set")]
    UnikernelAnnotationNotSet,
    #[error("unikernel {binary:?} defined by annotation was not copied in image rootfs")]
    UnikernelNotCopied { binary: String },

    #[error("image architecture was not set")]
    ArchitectureNotSet,
    #[error("invalid bima unikernel image - {key:?} missing")]
    MissingBinaryAnnotation { key: String },
    #[error("image is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("image has already been finalized")]
    AlreadyFinalized,

    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("image import failed: {message}")]
    Import { message: String },
}

/// Coarse error taxonomy, used by drivers to decide how to report a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Io,
    Validation,
    Architecture,
    State,
    Export,
}

impl BimaError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedInstruction { .. }
            | Self::InvalidCopyFormat { .. }
            | Self::InvalidLabelFormat { .. }
            | Self::InvalidArchFormat { .. } => ErrorKind::Parse,
            Self::SourceNotFound { .. } | Self::Io { .. } => ErrorKind::Io,
            Self::NotABimaImage
            | Self::MissingRequiredLabels { .. }
            | Self::InvalidEncoding { .. } => ErrorKind::Validation,
            Self::UnknownArchitecture { .. }
            | Self::ArchitectureDetectionFailed { .. }
            | Self::UnikernelAnnotationNotSet
            | Self::UnikernelNotCopied { .. } => ErrorKind::Architecture,
            Self::ArchitectureNotSet
            | Self::MissingBinaryAnnotation { .. }
            | Self::InvalidState { .. }
            | Self::AlreadyFinalized => ErrorKind::State,
            Self::InvalidReference { .. }
            | Self::Serialization(_)
            | Self::Import { .. } => ErrorKind::Export,
        }
    }
}
