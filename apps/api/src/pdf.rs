//! PDF text extraction for uploaded resumes.

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Only .pdf files are accepted (got '{0}')")]
    NotPdf(String),

    #[error("Uploaded file is empty")]
    Empty,

    #[error("Could not extract text from PDF: {0}")]
    Malformed(String),
}

/// Rejects uploads whose filename does not end in `.pdf` (case-insensitive).
pub fn ensure_pdf_filename(filename: &str) -> Result<(), ExtractionError> {
    if filename.to_ascii_lowercase().ends_with(".pdf") {
        Ok(())
    } else {
        Err(ExtractionError::NotPdf(filename.to_string()))
    }
}

/// Extracts plain text from an uploaded PDF.
///
/// Parsing runs on the blocking pool; a parser panic on malformed input is
/// reported as `Malformed` rather than taking down the request task.
pub async fn extract_text(filename: &str, data: Bytes) -> Result<String, ExtractionError> {
    ensure_pdf_filename(filename)?;
    if data.is_empty() {
        return Err(ExtractionError::Empty);
    }

    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data))
        .await
        .map_err(|e| {
            ExtractionError::Malformed(if e.is_panic() {
                "parser aborted on malformed input".to_string()
            } else {
                e.to_string()
            })
        })?
        .map_err(|e| ExtractionError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_suffix_is_case_insensitive() {
        assert!(ensure_pdf_filename("resume.pdf").is_ok());
        assert!(ensure_pdf_filename("Resume.PDF").is_ok());
    }

    #[test]
    fn test_non_pdf_names_are_rejected() {
        for name in ["resume.docx", "resume.pdf.txt", "resume", ""] {
            assert!(matches!(
                ensure_pdf_filename(name),
                Err(ExtractionError::NotPdf(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected() {
        let err = extract_text("cv.pdf", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Empty));
    }

    #[tokio::test]
    async fn test_garbage_bytes_fail_extraction() {
        let err = extract_text("cv.pdf", Bytes::from_static(b"definitely not a pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed(_)));
    }
}
