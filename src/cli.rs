use crate::{
    config::{Config, OutputFormat},
    metadata::Metadata,
    pipeline::{OcrJob, Pipeline},
    process::{CancelToken, render_command},
    sink::{ContentHandler, TextCollector, XhtmlWriter},
    util::{ensure_dir, now_rfc3339},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "ocrpipe")]
#[command(about = "Tesseract OCR orchestrator (ImageMagick preprocessing + hOCR reassembly)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./ocrpipe.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report whether tesseract and ImageMagick can be run.
    Doctor {},
    /// OCR one image and print the result.
    Ocr {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
        /// Print only the text content instead of XHTML.
        #[arg(long)]
        text: bool,
    },
    /// Print the tesseract command line that would run for an image.
    #[command(name = "command")]
    ShowCommand {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct Overrides {
    /// Output format requested from tesseract (txt or hocr).
    #[arg(long)]
    pub format: Option<OutputFormat>,
    #[arg(long)]
    pub lang: Option<String>,
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl Overrides {
    fn apply(&self, cfg: &mut Config) {
        if let Some(format) = self.format {
            cfg.engine.output_format = format;
        }
        if let Some(lang) = &self.lang {
            cfg.engine.language = lang.clone();
        }
        if let Some(timeout) = self.timeout {
            cfg.engine.timeout_seconds = timeout;
        }
    }
}

pub fn dispatch(args: Args) -> Result<()> {
    let mut cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg),
        Command::Ocr {
            input,
            overrides,
            text,
        } => {
            overrides.apply(&mut cfg);
            ocr(&cfg, input, *text)
        }
        Command::ShowCommand { input, overrides } => {
            overrides.apply(&mut cfg);
            print_command(&cfg, input)
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("ocrpipe.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries the OCR result, so log lines go to stderr.
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from("ocrpipe.log"))
}

fn doctor(cfg: &Config) -> Result<()> {
    let pipeline = Pipeline::new(&cfg.engine).context("invalid engine config")?;
    let diag = serde_json::json!({
        "tesseract": {
            "path": cfg.engine.tesseract_executable(),
            "available": pipeline.has_tesseract(),
            "tessdata_prefix": cfg.engine.tessdata_prefix(),
        },
        "image_magick": {
            "path": cfg.engine.image_magick_executable(),
            "available": pipeline.has_image_magick(),
            "requested": cfg.engine.wants_preprocessing(),
        },
        "supported_types": pipeline.supported_types(),
    });
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(())
}

fn ocr(cfg: &Config, input: &Path, text_only: bool) -> Result<()> {
    if !input.is_file() {
        return Err(anyhow!("input does not exist: {}", input.display()));
    }
    let pipeline = Pipeline::new(&cfg.engine).context("invalid engine config")?;
    let cancel = CancelToken::new();
    let mut metadata = Metadata::new();

    let started = now_rfc3339();
    info!("ocr input={} format={}", input.display(), cfg.engine.output_format);

    let body = if text_only {
        let mut sink = TextCollector::new();
        run_into(&pipeline, input, &mut sink, &mut metadata, &cancel)?;
        sink.into_text()
    } else {
        let mut sink = XhtmlWriter::new();
        run_into(&pipeline, input, &mut sink, &mut metadata, &cancel)?;
        sink.into_string()
    };

    print!("{body}");
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": input,
            "started": started,
            "finished": now_rfc3339(),
            "emitted": !body.is_empty(),
            "metadata": metadata,
        }))?
    );
    Ok(())
}

fn run_into(
    pipeline: &Pipeline,
    input: &Path,
    sink: &mut dyn ContentHandler,
    metadata: &mut Metadata,
    cancel: &CancelToken,
) -> Result<()> {
    pipeline
        .process_document(input, sink, metadata, cancel)
        .with_context(|| format!("OCR failed for {}", input.display()))
}

fn print_command(cfg: &Config, input: &Path) -> Result<()> {
    cfg.engine.validate().context("invalid engine config")?;
    let job = OcrJob::new(input, "<output-stem>", cfg.engine.clone());
    println!("{}", render_command(&job.command_line()));
    for (key, value) in job.env() {
        println!("{key}={value}");
    }
    Ok(())
}
