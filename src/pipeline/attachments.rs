//! Notice-page attachments: discovery, selection and download.
//!
//! A notice detail page on the court registry links its documents as
//! `/edikte/ex/exedi3.nsf/0/<id>/$file/<name>`. Only PDFs are candidates for
//! extraction; photos attached to the same notice are counted and ignored.

use crate::config::KeywordRules;
use crate::error::EnricherError;
use crate::record::Attachment;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info};

/// Registry host that notice links are relative to.
pub const EDIKTE_BASE_URL: &str = "https://edikte.justiz.gv.at";

/// The registry rejects requests without a browser-like agent.
const USER_AGENT: &str = "Mozilla/5.0 (compatible; EdikteMonitor/1.0)";

/// Timeout for the notice page itself; documents use the configured one.
const PAGE_TIMEOUT: Duration = Duration::from_secs(30);

static RE_FILE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"href="(/edikte/ex/exedi3\.nsf/0/[^"]+\$file/([^"]+))""#).unwrap()
});

/// Listing-discovery boundary: what attachments a notice has, and their bytes.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    /// PDF attachments linked from the notice page, in page order.
    async fn list_attachments(&self, detail_url: &str) -> Result<Vec<Attachment>, EnricherError>;

    /// Download one attachment and check it is a PDF.
    async fn download(&self, url: &str) -> Result<Vec<u8>, EnricherError>;
}

/// [`AttachmentSource`] for the public court registry.
#[derive(Debug, Clone)]
pub struct EdikteClient {
    client: reqwest::Client,
    base_url: String,
    download_timeout_secs: u64,
}

impl EdikteClient {
    pub fn new(download_timeout_secs: u64) -> Result<Self, EnricherError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| EnricherError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: EDIKTE_BASE_URL.to_string(),
            download_timeout_secs,
        })
    }

    /// Resolve relative links against another host (mirrors, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<reqwest::Response, EnricherError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EnricherError::DownloadTimeout {
                        url: url.to_string(),
                        secs: timeout.as_secs(),
                    }
                } else {
                    EnricherError::DownloadFailed {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(EnricherError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl AttachmentSource for EdikteClient {
    async fn list_attachments(&self, detail_url: &str) -> Result<Vec<Attachment>, EnricherError> {
        let html = self
            .get(detail_url, PAGE_TIMEOUT)
            .await?
            .text()
            .await
            .map_err(|e| EnricherError::DownloadFailed {
                url: detail_url.to_string(),
                reason: e.to_string(),
            })?;

        let links = parse_attachment_links(&html, &self.base_url);
        let total = links.len();
        let pdfs: Vec<Attachment> = links.into_iter().filter(is_pdf).collect();
        debug!("{}: {} attachment(s), {} PDF", detail_url, total, pdfs.len());
        Ok(pdfs)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, EnricherError> {
        let timeout = Duration::from_secs(self.download_timeout_secs);
        let bytes = self
            .get(url, timeout)
            .await?
            .bytes()
            .await
            .map_err(|e| EnricherError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        check_pdf_magic(url, &bytes)?;
        info!("Downloaded {} ({} KiB)", url, bytes.len() / 1024);
        Ok(bytes.to_vec())
    }
}

/// Every `$file/` link on the page, absolute, de-duplicated, in page order.
pub fn parse_attachment_links(html: &str, base_url: &str) -> Vec<Attachment> {
    let mut out: Vec<Attachment> = Vec::new();
    for caps in RE_FILE_LINK.captures_iter(html) {
        let url = format!("{}{}", base_url.trim_end_matches('/'), &caps[1]);
        if out.iter().any(|a| a.url == url) {
            continue;
        }
        let raw_name = &caps[2];
        let filename = urlencoding::decode(raw_name)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| raw_name.to_string());
        out.push(Attachment { url, filename });
    }
    out
}

fn is_pdf(attachment: &Attachment) -> bool {
    attachment.filename.to_lowercase().ends_with(".pdf")
}

/// Reject anything that does not start with `%PDF`.
pub fn check_pdf_magic(url: &str, bytes: &[u8]) -> Result<(), EnricherError> {
    if bytes.starts_with(b"%PDF") {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    Err(EnricherError::NotAPdf {
        url: url.to_string(),
        magic,
    })
}

/// Choose the attachment most likely to be the appraisal.
///
/// First attachment whose filename contains an appraisal keyword; else the
/// first that is not an annex bundle; else the first.
pub fn pick_attachment<'a>(attachments: &'a [Attachment], rules: &KeywordRules) -> Option<&'a Attachment> {
    let lower: Vec<String> = attachments.iter().map(|a| a.filename.to_lowercase()).collect();

    let by_keyword = lower
        .iter()
        .position(|name| rules.appraisal_filename_keywords.iter().any(|k| name.contains(k.as_str())));
    let not_annex = || {
        lower
            .iter()
            .position(|name| !rules.annex_filename_keywords.iter().any(|k| name.contains(k.as_str())))
    };

    by_keyword
        .or_else(not_annex)
        .map(|i| &attachments[i])
        .or_else(|| attachments.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn att(name: &str) -> Attachment {
        Attachment {
            url: format!("https://example.invalid/$file/{name}"),
            filename: name.to_string(),
        }
    }

    #[test]
    fn parses_file_links() {
        let html = r#"<a href="/edikte/ex/exedi3.nsf/0/abc123/$file/Gutachten%20Muster.pdf">G</a>
            <a href="/edikte/ex/exedi3.nsf/0/abc123/$file/Foto1.jpg">F</a>
            <a href="/edikte/ex/exedi3.nsf/0/abc123/$file/Gutachten%20Muster.pdf">again</a>
            <a href="/other/link.pdf">x</a>"#;
        let links = parse_attachment_links(html, EDIKTE_BASE_URL);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].filename, "Gutachten Muster.pdf");
        assert_eq!(
            links[0].url,
            "https://edikte.justiz.gv.at/edikte/ex/exedi3.nsf/0/abc123/$file/Gutachten%20Muster.pdf"
        );
        assert!(is_pdf(&links[0]));
        assert!(!is_pdf(&links[1]));
    }

    #[test]
    fn prefers_appraisal_keyword() {
        let rules = KeywordRules::default();
        let list = [att("Edikt.pdf"), att("Anlagen.pdf"), att("Schätzungsgutachten.pdf")];
        assert_eq!(pick_attachment(&list, &rules).unwrap().filename, "Schätzungsgutachten.pdf");
    }

    #[test]
    fn skips_annex_without_keyword() {
        let rules = KeywordRules::default();
        let list = [att("Anlagen.pdf"), att("Beschluss.pdf")];
        assert_eq!(pick_attachment(&list, &rules).unwrap().filename, "Beschluss.pdf");
        let only_annex = [att("Anlagen.pdf"), att("Anhang.pdf")];
        assert_eq!(pick_attachment(&only_annex, &rules).unwrap().filename, "Anlagen.pdf");
        assert!(pick_attachment(&[], &rules).is_none());
    }

    #[test]
    fn magic_bytes_checked() {
        assert!(check_pdf_magic("u", b"%PDF-1.7\n").is_ok());
        match check_pdf_magic("u", b"<ht") {
            Err(EnricherError::NotAPdf { magic, .. }) => assert_eq!(&magic, b"<ht\0"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
    }
}
