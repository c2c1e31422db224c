use crate::{
    config::EngineConfig,
    error::{OcrError, Result},
    metadata::{Metadata, TESS_IMAGE_MAGICK_PROCESSED, TESS_ROTATION},
    preprocess::{FixedRotation, ImagePreprocessor, RotationEstimator},
    probe::{self, AvailabilityCache},
    process::{CancelToken, ProcessRunner, render_command},
    reassemble,
    sink::ContentHandler,
    util::ScratchDir,
};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub const TESSDATA_PREFIX: &str = "TESSDATA_PREFIX";

/// Media types handled when tesseract is available.
pub const SUPPORTED_TYPES: [&str; 11] = [
    "image/ocr-png",
    "image/ocr-jpeg",
    "image/ocr-tiff",
    "image/ocr-bmp",
    "image/ocr-gif",
    "image/jp2",
    "image/jpx",
    "image/x-portable-pixmap",
    "image/ocr-jp2",
    "image/ocr-jpx",
    "image/ocr-x-portable-pixmap",
];

const OUTPUT_STEM: &str = "ocr-output";

static GLOBAL_STATE: Lazy<Arc<SharedState>> = Lazy::new(|| Arc::new(SharedState::new()));

/// State shared by every job in the process: availability caches for both
/// external tools and the one-time "OCR is running" notice.
///
/// Starts empty and is never persisted.
#[derive(Debug, Default)]
pub struct SharedState {
    pub tesseract: AvailabilityCache,
    pub image_magick: AvailabilityCache,
    first_use_logged: AtomicBool,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<SharedState> {
        Arc::clone(&GLOBAL_STATE)
    }

    /// Logs the performance notice the first time OCR runs. Returns whether
    /// this call was the one that logged it.
    pub fn log_first_use(&self) -> bool {
        if self.first_use_logged.load(Ordering::Relaxed) {
            return false;
        }
        let first = self
            .first_use_logged
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            info!(
                "tesseract is installed and is being invoked; OCR can add greatly to processing time"
            );
        }
        first
    }
}

/// One engine run: which image, where the output goes, with what settings.
#[derive(Debug, Clone)]
pub struct OcrJob {
    pub input: PathBuf,
    /// Tesseract appends `.txt` or `.hocr` to this.
    pub output_stem: PathBuf,
    pub config: EngineConfig,
}

impl OcrJob {
    pub fn new(input: impl Into<PathBuf>, output_stem: impl Into<PathBuf>, config: EngineConfig) -> Self {
        Self {
            input: input.into(),
            output_stem: output_stem.into(),
            config,
        }
    }

    /// `tesseract <in> <stem> -l L --psm M [-c k=v]... -c page_separator=S
    /// -c preserve_interword_spaces=0|1 <format>`
    pub fn command_line(&self) -> Vec<OsString> {
        let cfg = &self.config;
        let mut cmd: Vec<OsString> = vec![
            cfg.tesseract_executable().into_os_string(),
            self.input.as_os_str().to_owned(),
            self.output_stem.as_os_str().to_owned(),
            "-l".into(),
            cfg.language.as_str().into(),
            "--psm".into(),
            cfg.page_seg_mode.as_str().into(),
        ];
        for opt in &cfg.options {
            cmd.push("-c".into());
            cmd.push(format!("{}={}", opt.key, opt.value).into());
        }
        cmd.push("-c".into());
        cmd.push(format!("page_separator={}", cfg.page_separator).into());
        cmd.push("-c".into());
        cmd.push(
            format!(
                "preserve_interword_spaces={}",
                u8::from(cfg.preserve_interword_spacing)
            )
            .into(),
        );
        cmd.push(cfg.output_format.suffix().into());
        cmd
    }

    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(prefix) = self.config.tessdata_prefix() {
            env.insert(TESSDATA_PREFIX.to_string(), prefix.to_string());
        }
        env
    }

    pub fn output_path(&self) -> PathBuf {
        let mut path = self.output_stem.clone().into_os_string();
        path.push(".");
        path.push(self.config.output_format.suffix());
        PathBuf::from(path)
    }
}

pub struct Pipeline {
    cfg: EngineConfig,
    state: Arc<SharedState>,
    rotation: Box<dyn RotationEstimator>,
}

impl Pipeline {
    pub fn new(cfg: &EngineConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg: cfg.clone(),
            state: SharedState::global(),
            rotation: Box::new(FixedRotation::default()),
        })
    }

    pub fn with_state(mut self, state: Arc<SharedState>) -> Self {
        self.state = state;
        self
    }

    pub fn with_rotation_estimator(mut self, rotation: impl RotationEstimator + 'static) -> Self {
        self.rotation = Box::new(rotation);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn has_tesseract(&self) -> bool {
        probe::is_available(
            &self.state.tesseract,
            &self.cfg.tesseract_path,
            EngineConfig::tesseract_program(),
            &["--version"],
        )
    }

    pub fn has_image_magick(&self) -> bool {
        probe::is_available(
            &self.state.image_magick,
            &self.cfg.image_magick_path,
            EngineConfig::image_magick_program(),
            &["-version"],
        )
    }

    /// Empty when tesseract is missing, so callers can pick another parser.
    pub fn supported_types(&self) -> &'static [&'static str] {
        if self.has_tesseract() {
            &SUPPORTED_TYPES
        } else {
            &[]
        }
    }

    /// Whole-document entry point: wraps the OCR container in
    /// `start_document`/`end_document`. Emits nothing at all when tesseract
    /// is unavailable.
    pub fn process_document(
        &self,
        input: &Path,
        handler: &mut dyn ContentHandler,
        metadata: &mut Metadata,
        cancel: &CancelToken,
    ) -> Result<()> {
        if !self.has_tesseract() {
            debug!("tesseract unavailable; skipping {}", input.display());
            return Ok(());
        }
        handler.start_document()?;
        self.run_job(input, handler, metadata, cancel)?;
        handler.end_document()
    }

    /// Spools `reader` to a scratch file and processes it as a document.
    pub fn process_reader<R: Read>(
        &self,
        mut reader: R,
        handler: &mut dyn ContentHandler,
        metadata: &mut Metadata,
        cancel: &CancelToken,
    ) -> Result<()> {
        if !self.has_tesseract() {
            return Ok(());
        }
        let scratch = ScratchDir::new()?;
        let spooled = scratch.path().join("input");
        {
            let mut file = File::create(&spooled)?;
            io::copy(&mut reader, &mut file)?;
        }
        self.process_document(&spooled, handler, metadata, cancel)
    }

    /// Emits the OCR container for `input` into an enclosing document.
    ///
    /// Returns `Ok(())` without emitting anything when tesseract is missing
    /// or the file size is outside the configured bounds.
    pub fn process_file(
        &self,
        input: &Path,
        handler: &mut dyn ContentHandler,
        metadata: &mut Metadata,
        cancel: &CancelToken,
    ) -> Result<()> {
        if !self.has_tesseract() {
            debug!("tesseract unavailable; skipping {}", input.display());
            return Ok(());
        }
        self.run_job(input, handler, metadata, cancel)
    }

    fn run_job(
        &self,
        input: &Path,
        handler: &mut dyn ContentHandler,
        metadata: &mut Metadata,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.state.log_first_use();

        let size = std::fs::metadata(input)?.len();
        if !self.cfg.size_in_bounds(size) {
            debug!(
                "skipping OCR for {}: {} bytes outside [{}, {}]",
                input.display(),
                size,
                self.cfg.min_file_size_to_ocr,
                self.cfg.max_file_size_to_ocr
            );
            return Ok(());
        }

        // Everything written below lives here and goes away with it.
        let scratch = ScratchDir::new()?;
        let ocr_input = self.prepare_input(input, &scratch, metadata, cancel)?;

        let job = OcrJob::new(ocr_input, scratch.path().join(OUTPUT_STEM), self.cfg.clone());
        self.run_tesseract(&job, cancel)?;

        let output = job.output_path();
        match File::open(&output) {
            Ok(file) => reassemble::reassemble(BufReader::new(file), self.cfg.output_format, handler),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("tesseract produced no {} output for {}", self.cfg.output_format, input.display());
                reassemble::reassemble_empty(handler)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Path tesseract should read: a preprocessed copy when image processing
    /// is requested and ImageMagick is present, otherwise the original.
    fn prepare_input(
        &self,
        input: &Path,
        scratch: &ScratchDir,
        metadata: &mut Metadata,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        if !self.cfg.wants_preprocessing() {
            return Ok(input.to_path_buf());
        }
        if !self.has_image_magick() {
            warn!(
                "image preprocessing requested but ImageMagick was not found; using the original file"
            );
            return Ok(input.to_path_buf());
        }

        let mut copy = scratch.path().join("preprocess");
        if let Some(ext) = input.extension() {
            copy.set_extension(ext);
        }
        std::fs::copy(input, &copy)?;

        let rotation = if self.cfg.apply_rotation {
            Some(self.rotation.estimate(&copy)?)
        } else {
            None
        };
        ImagePreprocessor::new(&self.cfg).process(&copy, &copy, rotation, cancel)?;

        if let Some(angle) = rotation {
            metadata.add(TESS_ROTATION, angle);
        }
        metadata.add(TESS_IMAGE_MAGICK_PROCESSED, true);
        Ok(copy)
    }

    fn run_tesseract(&self, job: &OcrJob, cancel: &CancelToken) -> Result<()> {
        let cmd = job.command_line();
        debug!("tesseract command: {}", render_command(&cmd));

        let outcome = ProcessRunner::new(self.cfg.timeout_seconds)
            .with_label("tesseract")
            .run(&cmd, &job.env(), cancel)?;
        match outcome.exit_status() {
            Ok(status) => {
                // Output file presence decides success, not the exit code.
                if !status.success() {
                    debug!("tesseract exited with {status}: {}", outcome.stderr.trim());
                }
                Ok(())
            }
            Err(err @ OcrError::Timeout { .. }) => {
                warn!("tesseract timed out on {}", job.input.display());
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
