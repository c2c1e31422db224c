//! Error taxonomy for OCR jobs.
//!
//! A missing engine or a missing preprocessing tool never shows up here: both
//! degrade gracefully and are only logged. Everything below is fatal to the
//! job and distinct enough for a caller to choose between retrying, skipping
//! OCR, or aborting.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OcrError>;

#[derive(Debug, Error)]
pub enum OcrError {
    /// Temp file, spawn or read failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine (or image tool) did not exit within the deadline and was killed.
    #[error("OCR process timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The wait was cancelled by the caller; the child was killed.
    #[error("OCR process interrupted")]
    Interrupted,

    /// The hOCR output could not be parsed.
    #[error("malformed OCR output: {message}")]
    MalformedOutput { message: String },

    #[error("image preprocessing failed: {message}")]
    Preprocess { message: String },

    #[error("invalid OCR configuration: {message}")]
    InvalidConfig { message: String },

    /// Raised by a `ContentHandler` implementation.
    #[error("content handler error: {message}")]
    Handler { message: String },
}

impl OcrError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedOutput {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// True for the two errors produced by tearing down a running child.
    pub fn is_process_abort(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Interrupted)
    }
}
