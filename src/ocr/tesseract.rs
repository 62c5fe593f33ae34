//! Local CPU OCR via the system `tesseract` binary, located with `which` so
//! the pipeline degrades cleanly on a host where it isn't installed.

use async_trait::async_trait;
use std::io::Write;
use std::process::Command;

use crate::error::{PipelineError, Result};
use crate::ocr::OcrProvider;

pub struct TesseractOcrProvider {
    binary_path: Option<std::path::PathBuf>,
}

impl TesseractOcrProvider {
    pub fn detect() -> Self {
        Self {
            binary_path: which::which("tesseract").ok(),
        }
    }
}

#[async_trait]
impl OcrProvider for TesseractOcrProvider {
    fn is_available(&self) -> bool {
        self.binary_path.is_some()
    }

    async fn extract_page_text(&self, image_bytes: &[u8]) -> Result<String> {
        let Some(binary) = self.binary_path.clone() else {
            return Err(PipelineError::Config(
                "tesseract binary not found on PATH".into(),
            ));
        };
        let image_bytes = image_bytes.to_vec();
        tokio::task::spawn_blocking(move || run_tesseract(&binary, &image_bytes))
            .await
            .map_err(|e| PipelineError::Config(format!("tesseract task panicked: {e}")))?
    }
}

fn run_tesseract(binary: &std::path::Path, image_bytes: &[u8]) -> Result<String> {
    let mut input_file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .map_err(PipelineError::Io)?;
    input_file
        .write_all(image_bytes)
        .map_err(PipelineError::Io)?;
    let input_path = input_file.path();

    let output_stem = tempfile::Builder::new()
        .tempfile()
        .map_err(PipelineError::Io)?
        .into_temp_path();

    let status = Command::new(binary)
        .arg(input_path)
        .arg(&output_stem)
        .status()
        .map_err(PipelineError::WorkerSpawn)?;

    if !status.success() {
        return Err(PipelineError::Config(format!(
            "tesseract exited with status {status}"
        )));
    }

    let output_path = output_stem.with_extension("txt");
    let text = std::fs::read_to_string(&output_path).map_err(PipelineError::Io)?;
    let _ = std::fs::remove_file(&output_path);
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_unavailable_when_binary_missing() {
        let provider = TesseractOcrProvider {
            binary_path: None,
        };
        assert!(!provider.is_available());
    }
}
