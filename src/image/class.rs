use crate::constants::REQUIRED_UNIKERNEL_ANNOTATIONS;
use std::fmt;

/// Purpose of an image, derived from the namespaces of its label keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageClass {
    Unikernel,
    Iot,
    Unknown,
}

/// Marker each class looks for in label keys.
/// Adding a class means adding a row here and a variant above.
const CLASS_MARKERS: [(ImageClass, &str); 2] =
    [(ImageClass::Unikernel, "unikernel"), (ImageClass::Iot, "iot")];

impl ImageClass {
    /// Classify a set of label keys. Exactly one class must be present.
    pub fn classify<'a, I>(keys: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut found = [false; CLASS_MARKERS.len()];
        for key in keys {
            for (i, (_, marker)) in CLASS_MARKERS.iter().enumerate() {
                if key.contains(marker) {
                    found[i] = true;
                }
            }
        }

        let mut present = CLASS_MARKERS
            .iter()
            .zip(found)
            .filter(|(_, hit)| *hit)
            .map(|((class, _), _)| *class);
        match (present.next(), present.next()) {
            (Some(class), None) => class,
            _ => Self::Unknown,
        }
    }

    /// Annotation keys that must be set before the image is usable
    pub fn required_annotations(&self) -> &'static [&'static str] {
        match self {
            Self::Unikernel => &REQUIRED_UNIKERNEL_ANNOTATIONS,
            Self::Iot | Self::Unknown => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unikernel => "unikernel",
            Self::Iot => "iot",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ImageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
