use crate::error::Result;
use crate::image::{ArchOperation, CopyOperation, LabelOperation};
use crate::oci::OciImage;
use std::fmt;

/// One applyable unit of image mutation, derived from a single instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Copy(CopyOperation),
    Label(LabelOperation),
    Arch(ArchOperation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Copy,
    Label,
    Arch,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "COPY"),
            Self::Label => write!(f, "LABEL"),
            Self::Arch => write!(f, "ARCH"),
        }
    }
}

impl Operation {
    /// Source line, for diagnostics
    pub fn line(&self) -> &str {
        match self {
            Self::Copy(op) => op.line(),
            Self::Label(op) => op.line(),
            Self::Arch(op) => op.line(),
        }
    }

    pub fn info(&self) -> String {
        match self {
            Self::Copy(op) => op.info(),
            Self::Label(op) => op.info(),
            Self::Arch(op) => op.info(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Copy(_) => OperationKind::Copy,
            Self::Label(_) => OperationKind::Label,
            Self::Arch(_) => OperationKind::Arch,
        }
    }

    /// Compute the successor of `image`. `image` itself is never modified.
    pub fn update_image(&self, image: &OciImage) -> Result<OciImage> {
        match self {
            Self::Copy(op) => op.update_image(image),
            Self::Label(op) => op.update_image(image),
            Self::Arch(op) => op.update_image(image),
        }
    }
}

impl From<CopyOperation> for Operation {
    fn from(op: CopyOperation) -> Self {
        Self::Copy(op)
    }
}

impl From<LabelOperation> for Operation {
    fn from(op: LabelOperation) -> Self {
        Self::Label(op)
    }
}

impl From<ArchOperation> for Operation {
    fn from(op: ArchOperation) -> Self {
        Self::Arch(op)
    }
}
