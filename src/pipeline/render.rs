//! PDF rasterisation: render every page of one PDF to encoded page images.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and keeps
//! thread-local state. `tokio::task::spawn_blocking` moves the work onto the
//! blocking pool so Tokio workers never stall during rendering.
//!
//! Each page's bitmap is encoded and dropped before the next page is
//! rendered, so peak memory is one page regardless of document length.

use crate::config::{AnalysisConfig, ImageEncoding};
use crate::error::{AnalysisError, PageError};
use crate::pipeline::encode;
use edgequake_llm::ImageData;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

/// Result of rasterising one PDF: one entry per page, in page order.
#[derive(Debug)]
pub struct RasterizedFile {
    pub name: String,
    pub pages: Vec<Result<ImageData, PageError>>,
}

impl RasterizedFile {
    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn failed_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.is_err()).count()
    }
}

/// Rasterise and encode every page of a PDF held in memory.
///
/// A PDF that cannot be opened is a fatal [`AnalysisError`]; a single page
/// that fails to render or encode is recorded as a [`PageError`] in its slot.
pub async fn rasterize_pdf(
    name: &str,
    bytes: Vec<u8>,
    config: &AnalysisConfig,
) -> Result<RasterizedFile, AnalysisError> {
    let name = name.to_string();
    let opts = RenderOptions {
        scale: config.render_scale,
        max_pixels: config.max_rendered_pixels,
        encoding: config.image_encoding,
        password: config.password.clone(),
    };

    tokio::task::spawn_blocking(move || rasterize_blocking(&name, &bytes, &opts))
        .await
        .map_err(|e| AnalysisError::Internal(format!("Render task panicked: {}", e)))?
}

/// Count pages without rendering. Does not need a model provider.
pub async fn page_count(
    name: &str,
    bytes: Vec<u8>,
    password: Option<String>,
) -> Result<usize, AnalysisError> {
    let name = name.to_string();
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(&bytes, password.as_deref())
            .map_err(|e| load_error(&name, password.is_some(), e))?;
        Ok(document.pages().len() as usize)
    })
    .await
    .map_err(|e| AnalysisError::Internal(format!("Page-count task panicked: {}", e)))?
}

struct RenderOptions {
    scale: f32,
    max_pixels: u32,
    encoding: ImageEncoding,
    password: Option<String>,
}

fn rasterize_blocking(
    name: &str,
    bytes: &[u8],
    opts: &RenderOptions,
) -> Result<RasterizedFile, AnalysisError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, opts.password.as_deref())
        .map_err(|e| load_error(name, opts.password.is_some(), e))?;

    let total = document.pages().len() as usize;
    info!("{}: PDF loaded, {} pages", name, total);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(opts.scale)
        .set_maximum_width(opts.max_pixels as i32)
        .set_maximum_height(opts.max_pixels as i32);

    let mut pages = Vec::with_capacity(total);
    for (idx, page) in document.pages().iter().enumerate() {
        let page_num = idx + 1;
        let slot = page
            .render_with_config(&render_config)
            .map_err(|e| PageError::RenderFailed {
                file: name.to_string(),
                page: page_num,
                detail: format!("{:?}", e),
            })
            .and_then(|bitmap| {
                let image = bitmap.as_image();
                debug!(
                    "{}: rendered page {} → {}x{} px",
                    name,
                    page_num,
                    image.width(),
                    image.height()
                );
                encode::encode_page(&image, opts.encoding).map_err(|e| PageError::EncodeFailed {
                    file: name.to_string(),
                    page: page_num,
                    detail: e.to_string(),
                })
            });

        if let Err(ref e) = slot {
            warn!("{}", e);
        }
        pages.push(slot);
    }

    Ok(RasterizedFile {
        name: name.to_string(),
        pages,
    })
}

fn load_error(name: &str, had_password: bool, e: PdfiumError) -> AnalysisError {
    let detail = format!("{:?}", e);
    if detail.contains("Password") || detail.contains("password") {
        if had_password {
            AnalysisError::WrongPassword {
                file: name.to_string(),
            }
        } else {
            AnalysisError::PasswordRequired {
                file: name.to_string(),
            }
        }
    } else {
        AnalysisError::DocumentLoad {
            file: name.to_string(),
            detail,
        }
    }
}

/// Bind to pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the system.
fn bind_pdfium() -> Result<Pdfium, AnalysisError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| AnalysisError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rasterized_file_counts() {
        let f = RasterizedFile {
            name: "a.pdf".into(),
            pages: vec![
                Ok(ImageData::new(String::new(), "image/jpeg")),
                Err(PageError::RenderFailed {
                    file: "a.pdf".into(),
                    page: 2,
                    detail: "x".into(),
                }),
            ],
        };
        assert_eq!(f.total_pages(), 2);
        assert_eq!(f.failed_pages(), 1);
    }

    #[test]
    fn password_errors_are_distinguished() {
        let e = load_error("a.pdf", false, PdfiumError::PdfiumLibraryInternalError(
            PdfiumInternalError::PasswordError,
        ));
        assert!(matches!(e, AnalysisError::PasswordRequired { .. }));
        let e = load_error("a.pdf", true, PdfiumError::PdfiumLibraryInternalError(
            PdfiumInternalError::PasswordError,
        ));
        assert!(matches!(e, AnalysisError::WrongPassword { .. }));
    }
}
