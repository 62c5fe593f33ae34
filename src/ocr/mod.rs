//! OCR gateway (part of C4): turns a page image into text, either through a
//! local CPU-bound binary or a cloud document-intelligence service.

mod cloud;
mod tesseract;

pub use cloud::CloudOcrProvider;
pub use tesseract::TesseractOcrProvider;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Whether this provider is usable right now (binary present on PATH,
    /// credentials configured, etc). Checked once at startup so a missing
    /// backend fails fast instead of erroring out per document.
    fn is_available(&self) -> bool;

    async fn extract_page_text(&self, image_bytes: &[u8]) -> Result<String>;
}
