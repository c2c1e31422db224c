//! ImageMagick invocation ahead of OCR.
//!
//! Only the command contract lives here; how the rotation angle is found is
//! up to a [`RotationEstimator`].
use crate::config::EngineConfig;
use crate::error::{OcrError, Result};
use crate::process::{CancelToken, ProcessRunner};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use tracing::debug;

/// Supplies the angle (degrees) to rotate an image by before OCR.
pub trait RotationEstimator: Send + Sync {
    fn estimate(&self, image: &Path) -> Result<f64>;
}

/// Always returns the same angle. `FixedRotation(0.0)` is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRotation(pub f64);

impl RotationEstimator for FixedRotation {
    fn estimate(&self, _image: &Path) -> Result<f64> {
        Ok(self.0)
    }
}

pub struct ImagePreprocessor<'a> {
    config: &'a EngineConfig,
}

impl<'a> ImagePreprocessor<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// `convert -density D -depth B -colorspace C -filter F -resize R% [-rotate A] in out`
    pub fn command_line(&self, input: &Path, output: &Path, rotation: Option<f64>) -> Vec<OsString> {
        let cfg = self.config;
        let mut cmd: Vec<OsString> = vec![cfg.image_magick_executable().into_os_string()];
        for (flag, value) in [
            ("-density", cfg.density.to_string()),
            ("-depth", cfg.depth.to_string()),
            ("-colorspace", cfg.colorspace.clone()),
            ("-filter", cfg.filter.clone()),
            ("-resize", format!("{}%", cfg.resize)),
        ] {
            cmd.push(flag.into());
            cmd.push(value.into());
        }
        if let Some(angle) = rotation.filter(|a| *a != 0.0) {
            cmd.push("-rotate".into());
            cmd.push(angle.to_string().into());
        }
        cmd.push(input.as_os_str().to_owned());
        cmd.push(output.as_os_str().to_owned());
        cmd
    }

    /// Writes the processed image to `output`, which may equal `input`.
    pub fn process(
        &self,
        input: &Path,
        output: &Path,
        rotation: Option<f64>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let cmd = self.command_line(input, output, rotation);
        let outcome = ProcessRunner::new(self.config.timeout_seconds)
            .with_label("image magick")
            .run(&cmd, &BTreeMap::new(), cancel)?;
        let status = outcome.exit_status()?;
        if !status.success() {
            return Err(OcrError::Preprocess {
                message: format!(
                    "{} exited with {status}: {}",
                    self.config.image_magick_executable().display(),
                    outcome.stderr.trim()
                ),
            });
        }
        debug!("preprocessed {} in {:?}", input.display(), outcome.elapsed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(cmd: &[OsString]) -> Vec<String> {
        cmd.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn default_command_line() {
        let cfg = EngineConfig::default();
        let cmd = ImagePreprocessor::new(&cfg).command_line(
            Path::new("/tmp/in.png"),
            Path::new("/tmp/out.png"),
            None,
        );
        assert_eq!(
            strings(&cmd)[1..],
            [
                "-density", "300", "-depth", "4", "-colorspace", "gray", "-filter", "triangle",
                "-resize", "900%", "/tmp/in.png", "/tmp/out.png"
            ]
        );
    }

    #[test]
    fn rotation_only_when_nonzero() {
        let cfg = EngineConfig::default();
        let pre = ImagePreprocessor::new(&cfg);
        let zero = strings(&pre.command_line(Path::new("a"), Path::new("b"), Some(0.0)));
        assert!(!zero.contains(&"-rotate".to_string()));

        let turned = strings(&pre.command_line(Path::new("a"), Path::new("b"), Some(90.0)));
        let at = turned.iter().position(|a| a == "-rotate").unwrap();
        assert_eq!(turned[at + 1], "90");
    }
}
