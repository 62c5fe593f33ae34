//! File-type pre-filter (C3): a pure decision over a document's file
//! extension, made before any bytes are fetched.
//!
//! Three outcomes: proceed to validation, skip with a specific reason (for
//! formats the pipeline has deliberately decided not to support), or skip
//! as unknown (for an extension the pipeline has never seen).

use crate::error::SkipReason;

const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "jpg", "jpeg", "png", "bmp", "tiff", "tif", "gif", "docx", "txt", "text", "log", "md",
    "markdown", "csv", "tsv", "rtf",
];

const LEGACY_DOC_EXTENSIONS: &[&str] = &["doc"];
const EXCEL_EXTENSIONS: &[&str] = &["xls", "xlsx"];
const POWERPOINT_EXTENSIONS: &[&str] = &["ppt", "pptx"];

/// Extensions the pipeline recognizes as genuinely out of scope (archives,
/// media, other office/CAD formats) rather than merely unfamiliar. These get
/// a specific `unsupported_file_type_<ext>` skip reason instead of
/// `unknown_file_type_<ext>`, so operators can tell "we chose not to support
/// this" from "we've never seen this before and should look into it".
const EXPLICITLY_UNSUPPORTED_EXTENSIONS: &[&str] = &[
    "zip", "rar", "7z", "tar", "gz", "exe", "dll", "mp3", "mp4", "mov", "avi", "wav", "odt",
    "dwg", "mdb", "accdb",
];

pub enum FilterOutcome {
    Proceed,
    Skip(SkipReason),
}

/// Extract the lowercase extension from a file name, without the leading dot.
pub fn extension_of(file_name: &str) -> Option<String> {
    let ext = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())?;
    Some(ext.to_lowercase())
}

pub fn classify(file_name: &str) -> FilterOutcome {
    let Some(ext) = extension_of(file_name) else {
        return FilterOutcome::Skip(SkipReason::NoFileExtension);
    };

    if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return FilterOutcome::Proceed;
    }
    if LEGACY_DOC_EXTENSIONS.contains(&ext.as_str()) {
        return FilterOutcome::Skip(SkipReason::LegacyDocFormatNotSupported);
    }
    if EXCEL_EXTENSIONS.contains(&ext.as_str()) {
        return FilterOutcome::Skip(SkipReason::ExcelFilesNotSupported);
    }
    if POWERPOINT_EXTENSIONS.contains(&ext.as_str()) {
        return FilterOutcome::Skip(SkipReason::PowerpointFilesNotSupported);
    }
    if EXPLICITLY_UNSUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return FilterOutcome::Skip(SkipReason::UnsupportedFileType(ext));
    }
    FilterOutcome::Skip(SkipReason::UnknownFileType(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_proceeds() {
        assert!(matches!(classify("report.pdf"), FilterOutcome::Proceed));
    }

    #[test]
    fn uppercase_extension_is_normalized() {
        assert!(matches!(classify("REPORT.PDF"), FilterOutcome::Proceed));
    }

    #[test]
    fn legacy_doc_is_skipped_with_specific_reason() {
        match classify("memo.doc") {
            FilterOutcome::Skip(SkipReason::LegacyDocFormatNotSupported) => {}
            _ => panic!("expected LegacyDocFormatNotSupported"),
        }
    }

    #[test]
    fn excel_is_skipped_with_specific_reason() {
        match classify("data.xlsx") {
            FilterOutcome::Skip(SkipReason::ExcelFilesNotSupported) => {}
            _ => panic!("expected ExcelFilesNotSupported"),
        }
    }

    #[test]
    fn no_extension_is_skipped() {
        match classify("README") {
            FilterOutcome::Skip(SkipReason::NoFileExtension) => {}
            _ => panic!("expected NoFileExtension"),
        }
    }

    #[test]
    fn unrecognized_extension_is_unknown_not_unsupported() {
        match classify("archive.xyz123") {
            FilterOutcome::Skip(SkipReason::UnknownFileType(ext)) => assert_eq!(ext, "xyz123"),
            _ => panic!("expected UnknownFileType"),
        }
    }

    #[test]
    fn known_out_of_scope_extension_is_unsupported_not_unknown() {
        match classify("archive.zip") {
            FilterOutcome::Skip(SkipReason::UnsupportedFileType(ext)) => assert_eq!(ext, "zip"),
            _ => panic!("expected UnsupportedFileType"),
        }
    }
}
