use anyhow::Context;
use std::path::Path;
use tempfile::TempDir;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

pub fn ensure_dir(p: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Per-job working directory, removed when dropped.
///
/// Removal is best effort: a failure is logged and otherwise ignored so a
/// leftover temp file never fails the job.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
}

impl ScratchDir {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("ocrpipe-").tempdir()?;
        debug!("scratch dir {}", dir.path().display());
        Ok(Self { dir: Some(dir) })
    }

    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                warn!("failed to remove scratch dir {}: {err}", path.display());
            }
        }
    }
}
