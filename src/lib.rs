//! Runs an external OCR engine (tesseract) over images and turns its output
//! into a structured event stream.
//!
//! Flow per document: availability gate, size gate, optional ImageMagick
//! preprocessing, tesseract under a deadline, then reassembly of the `.txt`
//! or `.hocr` output into [`sink::ContentHandler`] events.
pub mod cli;
pub mod config;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod preprocess;
pub mod probe;
pub mod process;
pub mod reassemble;
pub mod sink;
pub mod util;

pub use error::{OcrError, Result};
pub use pipeline::{OcrJob, Pipeline, SharedState};
