//! Format-specific page extraction (C5 input stage): turns raw bytes of a
//! supported type into the page-sequence shape the validator and chunker
//! both work with.
//!
//! PDF extraction additionally surfaces the document info dictionary
//! (`PdfMetadata`) so the validator can apply the scanner-vocabulary
//! heuristic without a second parse pass.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{PipelineError, Result};
use crate::validator::{Page, PageSequence, PdfMetadata};

/// Pixel budget for a single rasterized page, matched 1:1 against a 4-byte
/// (RGBA) pixel so it tracks the memory a decoded pixmap actually occupies.
const MAX_RENDER_PIXELS: f64 = 50.0 * 1024.0 * 1024.0;

/// Floor below which DPI reduction never goes, regardless of how large the
/// page is — a page this large at 72 DPI is rendered anyway and left to
/// downstream OCR/size checks rather than produced unreadably small.
const MIN_RENDER_DPI: u32 = 72;

/// A PDF page's size in points (1/72 inch), the unit `/MediaBox` is defined
/// in. Used only to estimate the pixel count a render at a given DPI would
/// produce, before that render happens.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PagePoints {
    width: f64,
    height: f64,
}

/// Reads a page's effective `/MediaBox` from the page tree, walking up
/// through `Parent` dictionaries since `MediaBox` is commonly only set on an
/// ancestor `Pages` node and inherited rather than repeated per page.
fn page_media_box(pdf_path: &std::path::Path, page_number: u32) -> Option<PagePoints> {
    let doc = lopdf::Document::load(pdf_path).ok()?;
    let page_id = *doc.get_pages().get(&page_number)?;

    let mut current = Some(page_id);
    while let Some(id) = current {
        let dict = doc.get_object(id).ok()?.as_dict().ok()?;
        if let Ok(media_box) = dict.get(b"MediaBox").and_then(|obj| obj.as_array()) {
            if let [x0, y0, x1, y1] = media_box.as_slice() {
                let x0 = x0.as_float().ok()? as f64;
                let y0 = y0.as_float().ok()? as f64;
                let x1 = x1.as_float().ok()? as f64;
                let y1 = y1.as_float().ok()? as f64;
                return Some(PagePoints {
                    width: (x1 - x0).abs(),
                    height: (y1 - y0).abs(),
                });
            }
        }
        current = dict
            .get(b"Parent")
            .ok()
            .and_then(|obj| obj.as_reference().ok());
    }
    None
}

/// Reduces `requested_dpi` when rendering a page of this size at that DPI
/// would exceed `MAX_RENDER_PIXELS`, scaling down by the square root of the
/// overage (since pixel count grows with the square of DPI) and never below
/// `MIN_RENDER_DPI`. Returns `requested_dpi` unchanged when it already fits.
fn safe_render_dpi(width_points: f64, height_points: f64, requested_dpi: u32) -> u32 {
    let expected_width = width_points * requested_dpi as f64 / 72.0;
    let expected_height = height_points * requested_dpi as f64 / 72.0;
    let expected_pixels = expected_width * expected_height;
    if expected_pixels <= MAX_RENDER_PIXELS || expected_pixels <= 0.0 {
        return requested_dpi;
    }
    let scale_factor = (MAX_RENDER_PIXELS / expected_pixels).sqrt();
    let safe_dpi = (requested_dpi as f64 * scale_factor) as u32;
    safe_dpi.max(MIN_RENDER_DPI)
}

/// Render one PDF page to a PNG via the system `pdftoppm` binary (part of
/// poppler-utils), the same external tool the teacher shells out to for
/// page rasterization rather than linking a PDF-rendering crate. Returns
/// `None` if the binary is absent or the render fails — callers treat that
/// page as unavailable for OCR rather than failing the whole document.
///
/// Before shelling out, the requested DPI is reduced if this page's
/// `/MediaBox` would otherwise produce a pixmap bigger than the process
/// wants to hold in memory at once; a page whose size can't be read (a
/// malformed or unusual `/MediaBox`) is rendered at the requested DPI as-is.
pub fn render_pdf_page_to_png(pdf_path: &std::path::Path, page_number: u32, dpi: u32) -> Option<Vec<u8>> {
    let binary = which::which("pdftoppm").ok()?;
    let render_dpi = match page_media_box(pdf_path, page_number) {
        Some(size) => safe_render_dpi(size.width, size.height, dpi),
        None => dpi,
    };
    let output_dir = tempfile::tempdir().ok()?;
    let output_prefix = output_dir.path().join("page");
    let page_str = page_number.to_string();

    let status = std::process::Command::new(binary)
        .args(["-png", "-r", &render_dpi.to_string(), "-f", &page_str, "-l", &page_str])
        .arg(pdf_path)
        .arg(&output_prefix)
        .status()
        .ok()?;
    if !status.success() {
        return None;
    }

    for digits in [2, 3, 4] {
        let candidate = output_dir
            .path()
            .join(format!("page-{page_number:0digits$}.png"));
        if candidate.exists() {
            return std::fs::read(candidate).ok();
        }
    }
    None
}

/// Pixel dimensions of an already-decoded image buffer, used by the image
/// branch's minimum-size check (§4.5) independent of the OCR outcome.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::load_from_memory(bytes).ok().map(|img| {
        use image::GenericImageView;
        img.dimensions()
    })
}

pub fn extract_pdf_native(bytes: &[u8]) -> Result<(PageSequence, PdfMetadata)> {
    let pages = pdf_extract::extract_text_by_pages(bytes)
        .map_err(|e| PipelineError::Config(format!("pdf text extraction failed: {e}")))?
        .into_iter()
        .enumerate()
        .map(|(idx, text)| Page {
            page_number: idx as u32 + 1,
            text,
        })
        .collect();

    let metadata = read_pdf_metadata(bytes).unwrap_or_default();
    Ok((pages, metadata))
}

fn read_pdf_metadata(bytes: &[u8]) -> Option<PdfMetadata> {
    let doc = lopdf::Document::load_mem(bytes).ok()?;
    let info = doc.trailer.get(b"Info").ok()?.as_reference().ok()?;
    let dict = doc.get_object(info).ok()?.as_dict().ok()?;

    let field = |key: &[u8]| -> Option<String> {
        dict.get(key)
            .ok()
            .and_then(|obj| obj.as_str().ok())
            .map(|bytes| String::from_utf8_lossy(bytes).to_string())
    };

    Some(PdfMetadata {
        creator: field(b"Creator"),
        producer: field(b"Producer"),
    })
}

/// DOCX is read paragraph by paragraph into a single page, each paragraph
/// joined by a newline.
pub fn extract_docx(bytes: &[u8]) -> Result<PageSequence> {
    let document = docx_rs::read_docx(bytes)
        .map_err(|e| PipelineError::Config(format!("docx parse failed: {e:?}")))?;

    let mut paragraphs = Vec::new();
    for child in document.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            let mut text = String::new();
            for run_child in paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = run_child {
                    for run_content in run.children {
                        if let docx_rs::RunChild::Text(t) = run_content {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            if !text.trim().is_empty() {
                paragraphs.push(text);
            }
        }
    }

    Ok(vec![Page {
        page_number: 1,
        text: paragraphs.join("\n"),
    }])
}

fn rtf_control_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\[a-zA-Z]+-?\d* ?|[{}]").unwrap())
}

/// Plain-text, markdown, CSV/TSV and RTF are all read as a single verbatim
/// page; RTF additionally has its control words stripped.
pub fn extract_plain_text(text: &str, is_rtf: bool) -> PageSequence {
    let text = if is_rtf {
        rtf_control_word_re().replace_all(text, "").to_string()
    } else {
        text.to_string()
    };
    vec![Page {
        page_number: 1,
        text,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_single_verbatim_page() {
        let pages = extract_plain_text("hello\nworld", false);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "hello\nworld");
    }

    #[test]
    fn rtf_control_words_are_stripped() {
        let pages = extract_plain_text(r"{\rtf1\ansi Hello World}", true);
        assert!(pages[0].text.contains("Hello World"));
        assert!(!pages[0].text.contains("\\rtf1"));
    }

    #[test]
    fn safe_render_dpi_leaves_small_pages_unreduced() {
        // Letter-size page (612x792 points) at 300 DPI is well under the cap.
        assert_eq!(safe_render_dpi(612.0, 792.0, 300), 300);
    }

    #[test]
    fn safe_render_dpi_reduces_oversized_pages() {
        // A large-format page at a high DPI would blow past the pixel cap.
        let reduced = safe_render_dpi(3000.0, 4000.0, 600);
        assert!(reduced < 600);
        let expected_pixels =
            (3000.0 * reduced as f64 / 72.0) * (4000.0 * reduced as f64 / 72.0);
        assert!(expected_pixels <= MAX_RENDER_PIXELS * 1.01);
    }

    #[test]
    fn safe_render_dpi_never_drops_below_floor() {
        // An enormous page still renders at the 72 DPI floor rather than lower.
        assert_eq!(safe_render_dpi(20000.0, 20000.0, 300), MIN_RENDER_DPI);
    }

    #[test]
    fn image_dimensions_reads_decoded_png_size() {
        let img = image::RgbImage::new(12, 7);
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        assert_eq!(image_dimensions(&bytes), Some((12, 7)));
    }
}
