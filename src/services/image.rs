use crate::models::ImageAttachment;
use crate::services::blob::{key_stem, BlobStore};
use anyhow::{bail, Result};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, GenericImageView};
use std::io::{Cursor, Write};
use std::path::Path;

pub const TARGET_CONTENT_TYPE: &str = "image/webp";
pub const TARGET_EXTENSION: &str = "webp";

pub struct Transcoded {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A rendition served straight from the variant cache.
pub struct Rendition {
    pub data: Vec<u8>,
    pub content_type: &'static str,
}

pub fn is_supported_image(mime_type: &str) -> bool {
    matches!(
        mime_type,
        "image/jpeg" | "image/png" | "image/gif" | "image/webp"
    )
}

/// Detects the image type from its magic bytes. Returns the mime type and
/// the canonical extension for supported formats only.
pub fn sniff_image(data: &[u8]) -> Option<(&'static str, &'static str)> {
    let kind = infer::get(data)?;
    if is_supported_image(kind.mime_type()) {
        Some((kind.mime_type(), kind.extension()))
    } else {
        None
    }
}

pub fn read_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Scales `(width, height)` down so the longest side is at most `max`,
/// preserving the aspect ratio. Images already inside the bound are kept.
pub fn bounded_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }

    let (w, h, max) = (width as u64, height as u64, max as u64);
    if w >= h {
        let new_h = ((h * max + w / 2) / w).max(1);
        (max as u32, new_h as u32)
    } else {
        let new_w = ((w * max + h / 2) / h).max(1);
        (new_w as u32, max as u32)
    }
}

/// `photo.final.JPG` becomes `photo.final.webp`.
pub fn normalized_filename(original: &str) -> String {
    let stem = Path::new(original)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("image");
    format!("{}.{}", stem, TARGET_EXTENSION)
}

/// Decodes any supported image and re-encodes it as WebP inside the bound.
pub fn transcode(data: &[u8], max_dimension: u32) -> Result<Transcoded> {
    if sniff_image(data).is_none() {
        bail!("Unsupported image format");
    }

    let img = image::load_from_memory(data)?;
    let resized = fit_within(img, max_dimension);
    let (width, height) = resized.dimensions();

    Ok(Transcoded {
        data: encode_webp(&resized)?,
        width,
        height,
    })
}

/// On-demand WebP rendition of the current attachment, cached on disk next to
/// the blobs. Computing it never touches the attachment itself.
pub fn optimized_image(
    blobs: &BlobStore,
    attachment: &ImageAttachment,
    max_dimension: u32,
) -> Result<Rendition> {
    let cache_path = blobs.variants_dir().join(format!(
        "{}-{}.{}",
        key_stem(&attachment.blob_key),
        max_dimension,
        TARGET_EXTENSION
    ));

    if let Ok(data) = std::fs::read(&cache_path) {
        return Ok(Rendition {
            data,
            content_type: TARGET_CONTENT_TYPE,
        });
    }

    let original = blobs.download(&attachment.blob_key)?;
    let transcoded = transcode(&original, max_dimension)?;

    let mut file = tempfile::NamedTempFile::new_in(blobs.scratch_dir())?;
    file.write_all(&transcoded.data)?;
    if let Err(e) = file.persist(&cache_path) {
        tracing::warn!("Could not cache rendition {}: {}", cache_path.display(), e.error);
    }

    Ok(Rendition {
        data: transcoded.data,
        content_type: TARGET_CONTENT_TYPE,
    })
}

fn fit_within(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    let (new_width, new_height) = bounded_dimensions(width, height, max_dimension);
    if (new_width, new_height) == (width, height) {
        return img;
    }
    img.resize_exact(new_width, new_height, image::imageops::FilterType::Lanczos3)
}

fn encode_webp(img: &DynamicImage) -> Result<Vec<u8>> {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut buffer = Cursor::new(Vec::new());
    let encoder = WebPEncoder::new_lossless(&mut buffer);
    encoder.encode(&rgba, width, height, image::ExtendedColorType::Rgba8)?;

    Ok(buffer.into_inner())
}
