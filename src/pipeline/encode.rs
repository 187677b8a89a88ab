//! Image encoding: `DynamicImage` → base64 JPEG/PNG wrapped in `ImageData`.
//!
//! Scanned deeds are photographs of paper; JPEG at quality 90 keeps stamps
//! and signatures legible at a fraction of PNG's size, which matters when a
//! single identification call carries every page of the bundle.
//! `detail: "high"` asks GPT-class models for the full tile budget.

use crate::config::ImageEncoding;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use std::io::Cursor;
use tracing::debug;

/// Edge length of the placeholder used for pages that failed to render.
const BLANK_PAGE_PX: u32 = 64;

/// Encode a rasterised page as base64 ready for the model request body.
pub fn encode_page(img: &DynamicImage, encoding: ImageEncoding) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    match encoding {
        ImageEncoding::Jpeg { quality } => {
            // JPEG has no alpha channel.
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;
        }
        ImageEncoding::Png => {
            img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        }
    }

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, encoding.mime_type()).with_detail("high"))
}

/// A small white page standing in for one that could not be rendered.
pub fn blank_page(encoding: ImageEncoding) -> Result<ImageData, image::ImageError> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
        BLANK_PAGE_PX,
        BLANK_PAGE_PX,
        Rgb([255, 255, 255]),
    ));
    encode_page(&img, encoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_png() {
        let data = encode_page(&red(), ImageEncoding::Png).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }

    #[test]
    fn encode_jpeg_drops_alpha() {
        let data = encode_page(&red(), ImageEncoding::Jpeg { quality: 90 }).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/jpeg");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        // SOI marker
        assert_eq!(&decoded[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn blank_page_decodes() {
        let data = blank_page(ImageEncoding::Png).unwrap();
        let bytes = STANDARD.decode(&data.data).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!(img.width(), BLANK_PAGE_PX);
    }
}
