//! PDF access: page text extraction and page rasterisation via pdfium.
//!
//! pdfium keeps thread-local state and is not async-safe, so every call
//! runs inside `spawn_blocking` with its own binding and document handle.
//!
//! Rendered pages are scaled by a fixed factor and then capped on both edges
//! by `max_rendered_pixels`; an oversized plan sheet would otherwise produce
//! a 10 000 px image the vision model downsamples anyway.

use crate::error::EnricherError;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Text and image access to a PDF held in memory.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Concatenated text of all pages, separated by newlines.
    async fn extract_text(&self, pdf: &[u8]) -> Result<String, EnricherError>;

    /// The first `max_pages` pages as images, in page order.
    async fn render_pages(
        &self,
        pdf: &[u8],
        max_pages: usize,
    ) -> Result<Vec<DynamicImage>, EnricherError>;
}

/// Bind to pdfium: the library at `lib_path` if given, else the system one.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, EnricherError> {
    let bindings = match lib_path {
        Some(path) => {
            let path = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(path)
            } else {
                path.to_path_buf()
            };
            Pdfium::bind_to_library(&path)
                .map_err(|e| EnricherError::PdfiumBindingFailed(format!("{}: {e}", path.display())))?
        }
        None => Pdfium::bind_to_system_library()
            .map_err(|e| EnricherError::PdfiumBindingFailed(e.to_string()))?,
    };
    Ok(Pdfium::new(bindings))
}

/// [`DocumentRenderer`] backed by pdfium-render.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    lib_path: Option<PathBuf>,
    scale: f32,
    max_pixels: u32,
}

impl PdfiumRenderer {
    /// Create a renderer and check once that pdfium can be bound, so a
    /// missing library fails the run at startup instead of every record.
    pub fn new(lib_path: Option<PathBuf>, scale: f32, max_pixels: u32) -> Result<Self, EnricherError> {
        bind_pdfium(lib_path.as_deref())?;
        info!(
            "pdfium bound ({})",
            lib_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "system library".to_string())
        );
        Ok(Self {
            lib_path,
            scale,
            max_pixels,
        })
    }
}

#[async_trait]
impl DocumentRenderer for PdfiumRenderer {
    async fn extract_text(&self, pdf: &[u8]) -> Result<String, EnricherError> {
        let bytes = pdf.to_vec();
        let lib_path = self.lib_path.clone();
        tokio::task::spawn_blocking(move || extract_text_blocking(lib_path.as_deref(), &bytes))
            .await
            .map_err(|e| EnricherError::Internal(format!("Text task panicked: {e}")))?
    }

    async fn render_pages(
        &self,
        pdf: &[u8],
        max_pages: usize,
    ) -> Result<Vec<DynamicImage>, EnricherError> {
        let bytes = pdf.to_vec();
        let lib_path = self.lib_path.clone();
        let (scale, max_pixels) = (self.scale, self.max_pixels);
        tokio::task::spawn_blocking(move || {
            render_pages_blocking(lib_path.as_deref(), &bytes, max_pages, scale, max_pixels)
        })
        .await
        .map_err(|e| EnricherError::Internal(format!("Render task panicked: {e}")))?
    }
}

fn open_document<'a>(pdfium: &'a Pdfium, bytes: &'a [u8]) -> Result<PdfDocument<'a>, EnricherError> {
    pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| EnricherError::CorruptPdf {
            detail: format!("{e:?}"),
        })
}

fn extract_text_blocking(lib_path: Option<&Path>, bytes: &[u8]) -> Result<String, EnricherError> {
    let pdfium = bind_pdfium(lib_path)?;
    let document = open_document(&pdfium, bytes)?;

    let mut text = String::new();
    for (i, page) in document.pages().iter().enumerate() {
        match page.text() {
            Ok(t) => {
                text.push_str(&t.all());
                text.push('\n');
            }
            Err(e) => debug!("Page {}: no text layer ({:?})", i + 1, e),
        }
    }
    debug!("Extracted {} chars of text", text.len());
    Ok(text)
}

fn render_pages_blocking(
    lib_path: Option<&Path>,
    bytes: &[u8],
    max_pages: usize,
    scale: f32,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, EnricherError> {
    let pdfium = bind_pdfium(lib_path)?;
    let document = open_document(&pdfium, bytes)?;

    let pages = document.pages();
    let total = pages.len() as usize;
    let count = total.min(max_pages);
    info!("Rendering {} of {} page(s) at {}x", count, total, scale);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(scale)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(count);
    for idx in 0..count {
        let page = pages
            .get(idx as u16)
            .map_err(|e| EnricherError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{e:?}"),
            })?;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| EnricherError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{e:?}"),
            })?;
        let image = bitmap.as_image();
        debug!("Rendered page {} → {}x{} px", idx + 1, image.width(), image.height());
        images.push(image);
    }
    Ok(images)
}

/// Non-whitespace character count; documents below the scanned threshold
/// have no usable text layer.
pub fn meaningful_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}
