use crate::constants::{BINARY_ANNOTATION, METADATA_PATH, TARGET_OS};
use crate::error::{BimaError, Result};
use crate::image::label::decode;
use crate::image::sniff::{detect_architecture, Architecture};
use crate::image::{ArchOperation, CopyOperation, ImageClass, LabelOperation, Operation};
use crate::log_operation_applied;
use crate::oci::OciImage;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Where an image is in its build lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Accumulating,
    Validated(ImageClass),
    Finalized,
}

impl BuildState {
    fn name(&self) -> &'static str {
        match self {
            Self::Accumulating => "accumulating",
            Self::Validated(_) => "validated",
            Self::Finalized => "finalized",
        }
    }
}

/// An image under construction, plus the build history needed to finish it.
///
/// Owned by a single build; not meant to be shared.
#[derive(Debug)]
pub struct BimaImage {
    image: OciImage,
    labels: Vec<LabelOperation>,
    copies: Vec<CopyOperation>,
    arch_set: bool,
    state: BuildState,
}

impl Default for BimaImage {
    fn default() -> Self {
        Self::new()
    }
}

impl BimaImage {
    /// Empty scratch image with the target OS pinned
    pub fn new() -> Self {
        Self {
            image: OciImage::scratch(TARGET_OS),
            labels: Vec::new(),
            copies: Vec::new(),
            arch_set: false,
            state: BuildState::Accumulating,
        }
    }

    pub fn image(&self) -> &OciImage {
        &self.image
    }

    pub fn into_image(self) -> OciImage {
        self.image
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Label history, one entry per key
    pub fn labels(&self) -> &[LabelOperation] {
        &self.labels
    }

    pub fn copies(&self) -> &[CopyOperation] {
        &self.copies
    }

    pub fn is_architecture_set(&self) -> bool {
        self.arch_set
    }

    /// Fold one operation into the image.
    ///
    /// On error the held image is unchanged. Applying to a validated image
    /// sends it back to the accumulating state.
    pub fn apply_operation(&mut self, operation: Operation) -> Result<()> {
        if self.state == BuildState::Finalized {
            return Err(self.invalid_state("accumulating"));
        }
        self.fold(operation)?;
        self.state = BuildState::Accumulating;
        Ok(())
    }

    fn fold(&mut self, operation: Operation) -> Result<()> {
        self.image = operation.update_image(&self.image)?;
        log_operation_applied!(operation);

        match operation {
            Operation::Label(label) => self.record_label(label),
            Operation::Copy(copy) => self.copies.push(copy),
            Operation::Arch(_) => self.arch_set = true,
        }
        Ok(())
    }

    /// A repeated key replaces its earlier entry in place
    fn record_label(&mut self, label: LabelOperation) {
        match self.labels.iter_mut().find(|l| l.key == label.key) {
            Some(existing) => *existing = label,
            None => self.labels.push(label),
        }
    }

    fn label_map(&self) -> BTreeMap<&str, &str> {
        self.labels
            .iter()
            .map(|l| (l.key.as_str(), l.value.as_str()))
            .collect()
    }

    /// Classification of the labels applied so far
    pub fn image_class(&self) -> ImageClass {
        ImageClass::classify(self.labels.iter().map(|l| l.key.as_str()))
    }

    /// Classify the image and check its class-specific label requirements.
    pub fn validate(&mut self) -> Result<ImageClass> {
        if self.state == BuildState::Finalized {
            return Err(BimaError::AlreadyFinalized);
        }

        let class = self.image_class();
        match class {
            ImageClass::Unknown => return Err(BimaError::NotABimaImage),
            ImageClass::Unikernel => self.validate_unikernel()?,
            ImageClass::Iot => {}
        }

        debug!(class = %class, "Image validated");
        self.state = BuildState::Validated(class);
        Ok(class)
    }

    fn validate_unikernel(&self) -> Result<()> {
        let current = self.label_map();
        let missing: Vec<String> = ImageClass::Unikernel
            .required_annotations()
            .iter()
            .filter(|key| !current.contains_key(*key))
            .map(|key| key.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BimaError::MissingRequiredLabels { missing })
        }
    }

    pub fn ensure_architecture_set(&self) -> Result<()> {
        if self.arch_set {
            Ok(())
        } else {
            Err(BimaError::ArchitectureNotSet)
        }
    }

    /// Set the config command from the decoded binary annotation.
    pub fn add_command(&mut self) -> Result<()> {
        if self.validated_class()? != ImageClass::Unikernel {
            return Ok(());
        }

        let encoded = self.image.annotations().get(BINARY_ANNOTATION).ok_or_else(|| {
            BimaError::MissingBinaryAnnotation {
                key: BINARY_ANNOTATION.to_string(),
            }
        })?;
        let binary = decode(BINARY_ANNOTATION, encoded)?;
        let cmd: Vec<String> = binary.split_whitespace().map(str::to_string).collect();

        debug!(?cmd, "Setting image command");
        self.image = self.image.with_cmd(cmd);
        Ok(())
    }

    /// Append a layer holding every annotation as a flat JSON object.
    pub fn add_metadata_layer(&mut self) -> Result<()> {
        self.validated_class()?;

        let metadata = serde_json::to_vec(self.image.annotations())?;
        let files = BTreeMap::from([(METADATA_PATH.to_string(), metadata)]);
        self.image = self
            .image
            .append_layer(files, &format!("bima: add {}", METADATA_PATH))?;
        Ok(())
    }

    /// Infer the architecture from the copied unikernel binary and apply it.
    pub fn determine_architecture_from_binary(&mut self) -> Result<Architecture> {
        if self.validated_class()? != ImageClass::Unikernel {
            return Err(BimaError::InvalidState {
                expected: "a unikernel image",
                actual: "a non-unikernel image",
            });
        }

        let encoded = self
            .labels
            .iter()
            .find(|l| l.key == BINARY_ANNOTATION)
            .map(|l| l.value.clone())
            .ok_or(BimaError::UnikernelAnnotationNotSet)?;
        let binary = decode(BINARY_ANNOTATION, &encoded)?;
        // The annotation may carry arguments after the binary path
        let binary_path = binary.split_whitespace().next().unwrap_or_default();

        let source = self
            .copies
            .iter()
            .rev()
            .find_map(|c| c.host_source_for(binary_path))
            .ok_or_else(|| BimaError::UnikernelNotCopied {
                binary: binary_path.to_string(),
            })?;

        let arch = detect(&source)?;
        debug!(source = %source.display(), %arch, "Detected unikernel architecture");
        self.fold(ArchOperation::new(arch.as_str()).into())?;
        Ok(arch)
    }

    /// Derive the command and embed the metadata layer. Runs once per image.
    pub fn finalize(&mut self) -> Result<()> {
        match self.state {
            BuildState::Finalized => return Err(BimaError::AlreadyFinalized),
            BuildState::Accumulating => return Err(self.invalid_state("validated")),
            BuildState::Validated(_) => {}
        }
        self.ensure_architecture_set()?;
        self.add_command()?;
        self.add_metadata_layer()?;
        self.state = BuildState::Finalized;
        Ok(())
    }

    fn validated_class(&self) -> Result<ImageClass> {
        match self.state {
            BuildState::Validated(class) => Ok(class),
            _ => Err(self.invalid_state("validated")),
        }
    }

    fn invalid_state(&self, expected: &'static str) -> BimaError {
        BimaError::InvalidState {
            expected,
            actual: self.state.name(),
        }
    }
}

fn detect(source: &Path) -> Result<Architecture> {
    detect_architecture(source).map_err(|e| BimaError::ArchitectureDetectionFailed {
        path: source.to_path_buf(),
        reason: e.to_string(),
    })
}
