use serde::Serialize;
use std::collections::BTreeMap;

/// Rotation angle (degrees) applied by the image tool before OCR.
pub const TESS_ROTATION: &str = "tess:rotation";
/// Set to `true` when the image tool processed the input.
pub const TESS_IMAGE_MAGICK_PROCESSED: &str = "tess:image_magick_processed";

/// Multi-valued document properties attached alongside the content stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Metadata {
    props: BTreeMap<String, Vec<String>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, value: impl ToString) {
        self.props
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn set(&mut self, name: &str, value: impl ToString) {
        self.props.insert(name.to_string(), vec![value.to_string()]);
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.props
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.props.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.props.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}
