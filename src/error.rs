//! Error types for the edikte-enricher library.
//!
//! Only failures that stop a record (or the whole run) from making progress
//! are errors. A tier that simply finds nothing returns `None`, and an empty
//! field after validation is a normal result, so neither appears here.
//!
//! * Configuration and provider errors affect every record identically and
//!   are allowed to abort the run.
//! * Transport errors (notice page, PDF download, record store) abort only
//!   the record in flight; it stays eligible and is retried on the next run.
//! * PDF open/render errors are caught at the tier boundary by the
//!   orchestrator and downgraded to "this tier found nothing".

use thiserror::Error;

/// All errors returned by the edikte-enricher library.
#[derive(Debug, Error)]
pub enum EnricherError {
    // ── Transport errors ──────────────────────────────────────────────────
    /// The notice page or an attachment could not be fetched.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The downloaded attachment is not a PDF.
    #[error("Attachment '{url}' is not a PDF (first bytes: {magic:?})")]
    NotAPdf { url: String, magic: [u8; 4] },

    /// The record store rejected or failed a request.
    #[error("Record store request '{operation}' failed: {detail}")]
    RecordStore { operation: String, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The PDF could not be opened by pdfium.
    #[error("PDF is corrupt or unsupported: {detail}")]
    CorruptPdf { detail: String },

    /// pdfium returned an error while rendering a page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed or a required credential is missing.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EnricherError {
    /// Whether this error should abort the whole run rather than one record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EnricherError::InvalidConfig(_)
                | EnricherError::ProviderNotConfigured { .. }
                | EnricherError::PdfiumBindingFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_failed_display() {
        let e = EnricherError::DownloadFailed {
            url: "https://edikte.justiz.gv.at/x".into(),
            reason: "HTTP 503".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("HTTP 503"), "got: {msg}");
        assert!(msg.contains("edikte.justiz.gv.at"));
    }

    #[test]
    fn record_store_display() {
        let e = EnricherError::RecordStore {
            operation: "update page abc".into(),
            detail: "HTTP 429".into(),
        };
        assert!(e.to_string().contains("update page abc"));
    }

    #[test]
    fn config_errors_are_fatal() {
        assert!(EnricherError::InvalidConfig("x".into()).is_fatal());
        assert!(EnricherError::ProviderNotConfigured {
            provider: "openai".into(),
            hint: "set OPENAI_API_KEY".into(),
        }
        .is_fatal());
    }

    #[test]
    fn transport_errors_are_not_fatal() {
        let e = EnricherError::DownloadTimeout {
            url: "u".into(),
            secs: 60,
        };
        assert!(!e.is_fatal());
        assert!(!EnricherError::CorruptPdf { detail: "xref".into() }.is_fatal());
    }
}
