use crate::error::{OcrError, Result};
use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

static LANGUAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_]+(\+[A-Za-z_]+)*$").expect("valid regex"));
static OPTION_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_]+$").expect("valid regex"));
static OPTION_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z._+\-]+$").expect("valid regex"));
static IMAGE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("valid regex"));

const VALID_DEPTHS: [u32; 8] = [2, 4, 8, 16, 32, 64, 256, 4096];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

/// Engine output format. The lowercase name doubles as the tesseract config
/// name on the command line and as the output file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain text, passed through verbatim.
    Txt,
    /// hOCR: XHTML with per-word/per-line positional markup.
    Hocr,
}

impl OutputFormat {
    pub fn suffix(self) -> &'static str {
        match self {
            OutputFormat::Txt => "txt",
            OutputFormat::Hocr => "hocr",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "txt" => Ok(OutputFormat::Txt),
            "hocr" => Ok(OutputFormat::Hocr),
            other => Err(format!("unknown output format: {other} (expected txt or hocr)")),
        }
    }
}

/// A single `-c key=value` pair handed to tesseract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOption {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the tesseract binary; empty means "look on PATH".
    pub tesseract_path: String,
    pub tessdata_path: String,
    pub language: String,
    pub page_seg_mode: String,
    pub output_format: OutputFormat,
    pub page_separator: String,
    pub preserve_interword_spacing: bool,
    /// Passed in order; a key may appear more than once.
    pub options: Vec<EngineOption>,
    pub min_file_size_to_ocr: u64,
    pub max_file_size_to_ocr: u64,
    pub timeout_seconds: u64,

    pub enable_image_processing: bool,
    pub apply_rotation: bool,
    pub image_magick_path: String,
    pub density: u32,
    pub depth: u32,
    pub colorspace: String,
    pub filter: String,
    /// Percentage, e.g. 900 for `-resize 900%`.
    pub resize: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tesseract_path: "".into(),
            tessdata_path: "".into(),
            language: "eng".into(),
            page_seg_mode: "1".into(),
            output_format: OutputFormat::Txt,
            page_separator: "".into(),
            preserve_interword_spacing: false,
            options: Vec::new(),
            min_file_size_to_ocr: 0,
            max_file_size_to_ocr: i32::MAX as u64,
            timeout_seconds: 120,
            enable_image_processing: false,
            apply_rotation: false,
            image_magick_path: "".into(),
            density: 300,
            depth: 4,
            colorspace: "gray".into(),
            filter: "triangle".into(),
            resize: 900,
        }
    }
}

impl EngineConfig {
    pub fn tesseract_program() -> &'static str {
        if cfg!(windows) {
            "tesseract.exe"
        } else {
            "tesseract"
        }
    }

    pub fn image_magick_program() -> &'static str {
        if cfg!(windows) { "magick.exe" } else { "convert" }
    }

    pub fn tesseract_executable(&self) -> PathBuf {
        resolve_executable(&self.tesseract_path, Self::tesseract_program())
    }

    pub fn image_magick_executable(&self) -> PathBuf {
        resolve_executable(&self.image_magick_path, Self::image_magick_program())
    }

    /// Value for `TESSDATA_PREFIX`, if any: tessdata path first, engine root second.
    pub fn tessdata_prefix(&self) -> Option<&str> {
        if !self.tessdata_path.is_empty() {
            Some(&self.tessdata_path)
        } else if !self.tesseract_path.is_empty() {
            Some(&self.tesseract_path)
        } else {
            None
        }
    }

    pub fn wants_preprocessing(&self) -> bool {
        self.enable_image_processing || self.apply_rotation
    }

    pub fn size_in_bounds(&self, size: u64) -> bool {
        size >= self.min_file_size_to_ocr && size <= self.max_file_size_to_ocr
    }

    pub fn add_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.options.push(EngineOption {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn validate(&self) -> Result<()> {
        if !LANGUAGE.is_match(&self.language) {
            return Err(OcrError::invalid_config(format!(
                "invalid language code: {:?}",
                self.language
            )));
        }
        match self.page_seg_mode.parse::<u8>() {
            Ok(psm) if psm <= 13 => {}
            _ => {
                return Err(OcrError::invalid_config(format!(
                    "page_seg_mode must be 0-13: {:?}",
                    self.page_seg_mode
                )));
            }
        }
        for opt in &self.options {
            if !OPTION_KEY.is_match(&opt.key) {
                return Err(OcrError::invalid_config(format!(
                    "invalid tesseract option key: {:?}",
                    opt.key
                )));
            }
            if !OPTION_VALUE.is_match(&opt.value) {
                return Err(OcrError::invalid_config(format!(
                    "invalid value for tesseract option {}: {:?}",
                    opt.key, opt.value
                )));
            }
        }
        if self.min_file_size_to_ocr > self.max_file_size_to_ocr {
            return Err(OcrError::invalid_config(format!(
                "min_file_size_to_ocr ({}) exceeds max_file_size_to_ocr ({})",
                self.min_file_size_to_ocr, self.max_file_size_to_ocr
            )));
        }
        if !(150..=1200).contains(&self.density) {
            return Err(OcrError::invalid_config(format!(
                "density must be 150-1200: {}",
                self.density
            )));
        }
        if !VALID_DEPTHS.contains(&self.depth) {
            return Err(OcrError::invalid_config(format!(
                "depth must be one of {:?}: {}",
                VALID_DEPTHS, self.depth
            )));
        }
        if !(100..=900).contains(&self.resize) || self.resize % 100 != 0 {
            return Err(OcrError::invalid_config(format!(
                "resize must be a multiple of 100 between 100 and 900: {}",
                self.resize
            )));
        }
        for (name, value) in [("colorspace", &self.colorspace), ("filter", &self.filter)] {
            if !IMAGE_WORD.is_match(value) {
                return Err(OcrError::invalid_config(format!(
                    "invalid {name}: {value:?}"
                )));
            }
        }
        Ok(())
    }
}

fn resolve_executable(root: &str, program: &str) -> PathBuf {
    if root.is_empty() {
        PathBuf::from(program)
    } else {
        Path::new(root).join(program)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}
