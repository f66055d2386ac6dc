use crate::error::{BimaError, Result};
use crate::image::{ArchOperation, CopyOperation, LabelOperation, Operation};
use std::path::Path;
use tracing::trace;

pub const SUPPORTED_VERBS: [&str; 5] = ["FROM", "COPY", "LABEL", "ARCH", "NOOP"];

/// One normalized line of a build file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    line: String,
}

impl Instruction {
    /// Normalize a raw line. Never fails; comments and blank lines become `NOOP`.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Self {
                line: format!("NOOP {}", line).trim_end().to_string(),
            };
        }
        Self {
            line: line.to_string(),
        }
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    /// First whitespace-delimited token
    pub fn verb(&self) -> &str {
        self.line.split_whitespace().next().unwrap_or_default()
    }

    /// Everything after the verb, trimmed
    pub fn args(&self) -> &str {
        self.line[self.verb().len()..].trim()
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_VERBS.contains(&self.verb())
    }

    /// Build the operation this line describes. `FROM` and `NOOP` yield `None`.
    ///
    /// Relative COPY sources are resolved against `context_dir`.
    pub fn to_operation(&self, context_dir: &Path) -> Result<Option<Operation>> {
        let operation: Operation = match self.verb() {
            "FROM" | "NOOP" => return Ok(None),
            "COPY" => CopyOperation::parse(&self.line, self.args(), context_dir)?.into(),
            "LABEL" => LabelOperation::parse(&self.line, self.args())?.into(),
            "ARCH" => ArchOperation::parse(&self.line, self.args())?.into(),
            verb => {
                return Err(BimaError::UnsupportedInstruction {
                    verb: verb.to_string(),
                })
            }
        };
        Ok(Some(operation))
    }
}

/// Parse a whole build file into its operations, preserving file order.
pub fn parse_containerfile(content: &str, context_dir: &Path) -> Result<Vec<Operation>> {
    let mut operations = Vec::new();

    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        trace!("Creating bima operation from line {:?}", line);
        if let Some(op) = Instruction::parse(line).to_operation(context_dir)? {
            operations.push(op);
        }
    }

    Ok(operations)
}
