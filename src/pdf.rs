use std::{io::Write, path::Path};

use pdf_oxide::PdfDocument;
use tracing::debug;

use crate::error::{Error, Result};

const PDF_MAGIC: &[u8] = b"%PDF-";

/// File extensions accepted for upload.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "md"];

/// Extract the text of every page of a PDF, in page order.
///
/// The bytes are spooled to a temporary file for the parser; the file is
/// removed when this function returns.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String> {
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(Error::InvalidInput(
            "upload is not a PDF (missing %PDF- header)".to_string(),
        ));
    }

    let mut spool = tempfile::Builder::new()
        .prefix("docseek-upload-")
        .suffix(".pdf")
        .tempfile()?;
    spool.write_all(bytes)?;
    spool.flush()?;

    let doc =
        PdfDocument::open(spool.path()).map_err(|e| Error::Pdf(e.to_string()))?;
    let page_count = doc.page_count().map_err(|e| Error::Pdf(e.to_string()))?;

    let mut pages = Vec::with_capacity(page_count);
    for page in 0..page_count {
        let text = doc
            .extract_text(page)
            .map_err(|e| Error::Pdf(format!("page {}: {e}", page + 1)))?;
        pages.push(text);
    }
    debug!(page_count, "extracted PDF text");

    Ok(pages.join("\n"))
}

/// Extract text from an uploaded file, dispatching on its extension.
pub fn extract_upload_text(filename: &str, bytes: &[u8]) -> Result<String> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => extract_pdf_text(bytes),
        "txt" | "md" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        _ => Err(Error::InvalidInput(format!(
            "unsupported file type for '{filename}' (expected one of: {})",
            SUPPORTED_EXTENSIONS.join(", ")
        ))),
    }
}
