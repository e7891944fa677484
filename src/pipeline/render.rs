//! PDF rasterisation: render every page to a `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! ## Why cap pixels, not DPI?
//!
//! Scanned invoice pages vary wildly in physical size. Capping the longest
//! edge keeps memory bounded regardless of the page geometry and matches the
//! image-size sweet spot for vision models (around 1,024–2,048 px).
//!
//! Unlike a best-effort document converter, a failed page here is fatal: the
//! boundary classifier needs a signal for every page or the grouping result
//! is meaningless.

use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info};

use crate::error::PipelineError;

/// Rasterise all pages of an already-validated PDF, in page order.
///
/// Takes the bytes produced by the integrity guard, so a repaired document is
/// rendered from its repaired form. Any page that fails to render aborts the
/// job with [`PipelineError::Render`].
pub async fn render_pages(
    bytes: Vec<u8>,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, PipelineError> {
    tokio::task::spawn_blocking(move || render_pages_blocking(&bytes, max_pixels))
        .await
        .map_err(|e| PipelineError::Internal(format!("render task panicked: {e}")))?
}

fn render_pages_blocking(bytes: &[u8], max_pixels: u32) -> Result<Vec<DynamicImage>, PipelineError> {
    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| PipelineError::Render {
            page: 0,
            detail: format!("document failed to open: {e:?}"),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!(total_pages, "PDF loaded for rendering");

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(total_pages);
    for idx in 0..total_pages {
        let page = pages.get(idx as u16).map_err(|e| PipelineError::Render {
            page: idx + 1,
            detail: format!("{e:?}"),
        })?;

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| PipelineError::Render {
                page: idx + 1,
                detail: format!("{e:?}"),
            })?;

        let image = bitmap.as_image();
        debug!(
            page = idx + 1,
            width = image.width(),
            height = image.height(),
            "rendered page"
        );
        images.push(image);
    }

    Ok(images)
}
