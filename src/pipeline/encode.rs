//! Image encoding: `DynamicImage` → base64 JPEG wrapped in `ImageData`.
//!
//! Vision APIs accept images as base64 payloads embedded in the JSON request
//! body. JPEG at quality 85 keeps a full multi-page request comfortably under
//! provider payload limits while leaving invoice text legible; `detail:
//! "high"` instructs GPT-4-class models to use the full image tile budget so
//! line-item tables and fine print are not lost.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

use crate::error::PipelineError;
use crate::model::Page;

/// Encode one rasterised page as base64 JPEG ready for the vision API.
pub fn encode_page(
    index: usize,
    img: &DynamicImage,
    jpeg_quality: u8,
) -> Result<Page, PipelineError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buf), jpeg_quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| PipelineError::Render {
            page: index + 1,
            detail: format!("JPEG encoding failed: {e}"),
        })?;

    let b64 = STANDARD.encode(&buf);
    debug!(page = index + 1, bytes = b64.len(), "encoded page image");

    Ok(Page {
        index,
        image: ImageData::new(b64, "image/jpeg").with_detail("high"),
    })
}

/// Encode every rendered page, preserving page order.
pub fn encode_pages(
    images: &[DynamicImage],
    jpeg_quality: u8,
) -> Result<Vec<Page>, PipelineError> {
    images
        .iter()
        .enumerate()
        .map(|(index, img)| encode_page(index, img, jpeg_quality))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn blank(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([250, 250, 250])))
    }

    #[test]
    fn encode_produces_valid_base64_jpeg() {
        let page = encode_page(0, &blank(40, 60), 85).unwrap();
        assert_eq!(page.index, 0);
        assert_eq!(page.image.mime_type, "image/jpeg");
        let decoded = STANDARD.decode(&page.image.data).expect("valid base64");
        // JPEG SOI marker.
        assert_eq!(&decoded[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn encode_pages_preserves_order() {
        let images = vec![blank(10, 10), blank(20, 20), blank(30, 30)];
        let pages = encode_pages(&images, 85).unwrap();
        let indices: Vec<usize> = pages.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
