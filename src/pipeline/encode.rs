//! Page image encoding for the vision tier.
//!
//! Pages are sent as lossless PNG: scanned court documents are mostly small
//! type, and JPEG ringing around glyphs hurts recognition far more than the
//! extra bytes cost.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode one rendered page as a base64 PNG with `detail: "high"`.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded {}x{} page → {} bytes base64", img.width(), img.height(), b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Encode every page, skipping (and logging) pages that fail to encode.
pub fn encode_pages(pages: &[DynamicImage]) -> Vec<ImageData> {
    pages
        .iter()
        .enumerate()
        .filter_map(|(i, img)| match encode_page(img) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!("Page {}: PNG encoding failed: {}", i + 1, e);
                None
            }
        })
        .collect()
}
