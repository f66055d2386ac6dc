use crate::error::{BimaError, Result};
use crate::oci::OciImage;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Sets one image annotation. The value is kept base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelOperation {
    pub key: String,
    pub value: String,
    line: String,
}

impl LabelOperation {
    /// Label from a raw (not yet encoded) value
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: encode(value),
            line: format!("LABEL {:?}={:?}", key, value),
        }
    }

    /// Parse the argument part of `LABEL <key>=<value>`.
    pub(crate) fn parse(line: &str, args: &str) -> Result<Self> {
        let (key, value) = args.split_once('=').ok_or_else(|| BimaError::InvalidLabelFormat {
            line: line.to_string(),
        })?;

        Ok(Self {
            key: strip_quotes(key).to_string(),
            value: encode(strip_quotes(value)),
            line: line.to_string(),
        })
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn info(&self) -> String {
        format!(
            "Performing instruction: {:?}\nSetting label {:?} to {:?}",
            self.line, self.key, self.value
        )
    }

    pub fn decoded_value(&self) -> Result<String> {
        decode(&self.key, &self.value)
    }

    pub fn update_image(&self, image: &OciImage) -> Result<OciImage> {
        Ok(image.with_annotations([(self.key.clone(), self.value.clone())]))
    }
}

/// Trim surrounding whitespace, then `"`, then `\` and `'` from both ends
fn strip_quotes(s: &str) -> &str {
    s.trim()
        .trim_matches('"')
        .trim_matches(|c| c == '\\' || c == '\'')
}

pub fn encode(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Decode the stored value of label `key`
pub fn decode(key: &str, encoded: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| BimaError::InvalidEncoding {
            key: key.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|_| BimaError::InvalidEncoding {
        key: key.to_string(),
    })
}
