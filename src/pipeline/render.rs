//! PDF pages → [`Page`]s via pdfium.
//!
//! pdfium is not async-safe, so all work happens inside `spawn_blocking`.
//! The longest edge of a rendered page is capped at `max_rendered_pixels`
//! whatever the physical page size, keeping memory bounded and staying in
//! the image-size range vision models handle best.
//!
//! A page that cannot be rendered does not sink the document: it is reported
//! as a [`PageError::Render`] next to the pages that did render.

use crate::config::{ExtractionConfig, ExtractionStrategy, PageSelection};
use crate::error::{ExtractError, PageError};
use crate::output::Page;
use crate::pipeline::encode::encode_png;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// Render the selected pages of a PDF.
///
/// With [`ExtractionStrategy::Text`] a page with a non-empty text layer is
/// returned as text, and only textless (scanned) pages are rasterised.
pub async fn render_pages(
    pdf_path: &Path,
    config: &ExtractionConfig,
) -> Result<Vec<Result<Page, PageError>>, ExtractError> {
    let path = pdf_path.to_path_buf();
    let opts = RenderOptions {
        dpi: config.dpi,
        max_pixels: config.max_rendered_pixels,
        strategy: config.strategy,
        password: config.password.clone(),
        selection: config.pages.clone(),
    };

    tokio::task::spawn_blocking(move || render_pages_blocking(&path, &opts))
        .await
        .map_err(|e| ExtractError::Internal(format!("Render task panicked: {}", e)))?
}

struct RenderOptions {
    dpi: u32,
    max_pixels: u32,
    strategy: ExtractionStrategy,
    password: Option<String>,
    selection: PageSelection,
}

/// Bind to `PDFIUM_LIB_PATH` when set, otherwise to the system library.
fn bind_pdfium() -> Result<Pdfium, ExtractError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH") {
        Some(path) => Pdfium::bind_to_library(Path::new(&path)),
        None => Pdfium::bind_to_system_library(),
    };
    bindings
        .map(Pdfium::new)
        .map_err(|e| ExtractError::PdfiumBindingFailed(e.to_string()))
}

fn render_pages_blocking(
    pdf_path: &Path,
    opts: &RenderOptions,
) -> Result<Vec<Result<Page, PageError>>, ExtractError> {
    let pdfium = bind_pdfium()?;
    let password = opts.password.as_deref();

    let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                ExtractError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                ExtractError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            ExtractError::CorruptDocument {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let indices = opts.selection.to_indices(total_pages);
    info!(
        "PDF loaded: {} pages, {} selected ({:?})",
        total_pages,
        indices.len(),
        opts.strategy
    );

    let mut results = Vec::with_capacity(indices.len());
    for idx in indices {
        let result = pages
            .get(idx as u16)
            .map_err(|e| PageError::Render {
                page: idx + 1,
                detail: format!("{:?}", e),
            })
            .and_then(|page| render_one(idx, &page, opts));
        if let Err(ref e) = result {
            warn!("{}", e);
        }
        results.push(result);
    }

    Ok(results)
}

fn render_one(idx: usize, page: &PdfPage, opts: &RenderOptions) -> Result<Page, PageError> {
    if opts.strategy == ExtractionStrategy::Text {
        match page.text() {
            Ok(text) => {
                let text = text.all();
                if !text.trim().is_empty() {
                    debug!("Page {}: {} chars of text layer", idx + 1, text.chars().count());
                    return Ok(Page::text(idx, text));
                }
                debug!("Page {}: no text layer, rasterising", idx + 1);
            }
            Err(e) => debug!("Page {}: text layer unreadable ({:?}), rasterising", idx + 1, e),
        }
    }

    let render_err = |detail: String| PageError::Render {
        page: idx + 1,
        detail,
    };

    let max_px = opts.max_pixels as i32;
    let width_px = ((page.width().value * opts.dpi as f32 / 72.0).round() as i32).clamp(1, max_px);
    let render_config = PdfRenderConfig::new()
        .set_target_width(width_px)
        .set_maximum_height(max_px);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| render_err(format!("{:?}", e)))?;
    let image = bitmap.as_image();
    debug!("Rendered page {} → {}x{} px", idx + 1, image.width(), image.height());

    let png = encode_png(&image).map_err(|e| render_err(e.to_string()))?;
    Ok(Page::image(idx, png, "image/png"))
}
