//! Pipeline stages for invoice segmentation and extraction.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets us swap
//! implementations (e.g. the rendering backend) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! bytes ──▶ integrity ──▶ render ──▶ encode ──▶ classify ──▶ group ──▶ extract ──▶ split
//!           (lopdf)       (pdfium)   (base64)   (vision)     (scan)    (vision)    (lopdf)
//! ```
//!
//! 1. [`integrity`] — validate or repair the input PDF; unrepairable input
//!    stops the pipeline here without touching any external API
//! 2. [`render`]    — rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`encode`]    — JPEG-encode and base64-wrap each page image for the
//!    multimodal API request body
//! 4. [`classify`]  — one boundary call per page with retry/backoff; the
//!    per-page suspension point of the pipeline
//! 5. [`group`]     — single linear pass turning boundary signals into an
//!    exact partition of the page range
//! 6. [`extract`]   — one extraction call per group carrying all its pages;
//!    failures are isolated to the group
//! 7. [`split`]     — byte-level page extraction of the source PDF, never a
//!    re-render

pub mod classify;
pub mod encode;
pub mod extract;
pub mod group;
pub mod integrity;
pub mod render;
pub mod split;
