//! Image probing, on-the-fly transforms and thumbnail generation.
//!
//! Everything here is blocking CPU work; async callers go through
//! `tokio::task::spawn_blocking`.

use std::io::Cursor;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};
use serde::Deserialize;
use thiserror::Error;

use crate::storage::Storage;
use crate::types::Dimensions;

pub const MAX_DIMENSION: u32 = 8192;
pub const THUMBNAIL_WIDTH: u32 = 225;
pub const SQUARE_THUMBNAIL_SIZE: u32 = 64;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("unsupported image format: {0}")]
    Unsupported(String),
    #[error("could not decode image: {0}")]
    Decode(image::ImageError),
    #[error("{0}")]
    InvalidOptions(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("could not encode image: {0}")]
    Encode(image::ImageError),
}

/// What `probe` learns about a stored image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: String,
    pub dimensions: Dimensions,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    #[default]
    Cover,
    Contain,
    Fill,
    Inside,
    Outside,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg,
    #[default]
    WebP,
}

impl OutputFormat {
    /// Unknown or missing names fall back to WebP.
    pub fn parse_or_default(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("png") => OutputFormat::Png,
            Some("jpeg") => OutputFormat::Jpeg,
            _ => OutputFormat::WebP,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::WebP => "image/webp",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::WebP => ImageFormat::WebP,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Fit,
    pub format: OutputFormat,
}

impl TransformOptions {
    pub fn validate(&self) -> Result<(), ImagingError> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if let Some(v) = value {
                if v == 0 || v > MAX_DIMENSION {
                    return Err(ImagingError::InvalidOptions(format!(
                        "'{}' must be between 1 and {}.",
                        name, MAX_DIMENSION
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Geometry decided before any pixel is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizePlan {
    Keep,
    /// Resize to exactly these dimensions.
    Scale(u32, u32),
    /// Scale to cover the box, then centre-crop to it.
    Cover(u32, u32),
    /// Scale to fit `inner`, then centre on a transparent `canvas`.
    Contain { inner: (u32, u32), canvas: (u32, u32) },
}

fn scaled(src: (u32, u32), ratio: f64) -> (u32, u32) {
    let w = ((src.0 as f64) * ratio).round().clamp(1.0, MAX_DIMENSION as f64) as u32;
    let h = ((src.1 as f64) * ratio).round().clamp(1.0, MAX_DIMENSION as f64) as u32;
    (w, h)
}

pub fn plan_resize(src: (u32, u32), width: Option<u32>, height: Option<u32>, fit: Fit) -> ResizePlan {
    if src.0 == 0 || src.1 == 0 {
        return ResizePlan::Keep;
    }
    match (width, height) {
        (None, None) => ResizePlan::Keep,
        (Some(w), None) => {
            let (_, sh) = scaled(src, w as f64 / src.0 as f64);
            ResizePlan::Scale(w, sh)
        }
        (None, Some(h)) => {
            let (sw, _) = scaled(src, h as f64 / src.1 as f64);
            ResizePlan::Scale(sw, h)
        }
        (Some(w), Some(h)) => {
            let rx = w as f64 / src.0 as f64;
            let ry = h as f64 / src.1 as f64;
            match fit {
                Fit::Fill => ResizePlan::Scale(w, h),
                Fit::Cover => ResizePlan::Cover(w, h),
                Fit::Inside => {
                    let (iw, ih) = scaled(src, rx.min(ry));
                    ResizePlan::Scale(iw.min(w), ih.min(h))
                }
                Fit::Outside => {
                    let (ow, oh) = scaled(src, rx.max(ry));
                    ResizePlan::Scale(ow.max(w), oh.max(h))
                }
                Fit::Contain => {
                    let (iw, ih) = scaled(src, rx.min(ry));
                    ResizePlan::Contain { inner: (iw.min(w), ih.min(h)), canvas: (w, h) }
                }
            }
        }
    }
}

fn apply_plan(img: DynamicImage, plan: ResizePlan) -> DynamicImage {
    match plan {
        ResizePlan::Keep => img,
        ResizePlan::Scale(w, h) => img.resize_exact(w, h, FilterType::Lanczos3),
        ResizePlan::Cover(w, h) => img.resize_to_fill(w, h, FilterType::Lanczos3),
        ResizePlan::Contain { inner, canvas } => {
            let resized = img.resize_exact(inner.0, inner.1, FilterType::Lanczos3).to_rgba8();
            let mut background = RgbaImage::new(canvas.0, canvas.1);
            let x = (canvas.0 - inner.0) / 2;
            let y = (canvas.1 - inner.1) / 2;
            imageops::overlay(&mut background, &resized, x as i64, y as i64);
            DynamicImage::ImageRgba8(background)
        }
    }
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "jpeg".to_string(),
        ImageFormat::WebP => "webp".to_string(),
        other => other.extensions_str().first().map(|s| s.to_string()).unwrap_or_else(|| format!("{:?}", other).to_lowercase()),
    }
}

fn open(path: &Path) -> Result<(ImageReader<std::io::BufReader<std::fs::File>>, ImageFormat), ImagingError> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| ImagingError::Unsupported(path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()))?;
    Ok((reader, format))
}

/// Reads format and dimensions from the header without decoding pixels.
pub fn probe(path: &Path) -> Result<ImageInfo, ImagingError> {
    let size = std::fs::metadata(path)?.len();
    let (reader, format) = open(path)?;
    let (width, height) = reader.into_dimensions().map_err(ImagingError::Decode)?;
    Ok(ImageInfo { format: format_name(format), dimensions: Dimensions { width, height }, size })
}

pub fn encode(img: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>, ImagingError> {
    // JPEG has no alpha channel, the other two are written as RGBA8.
    let prepared = match format {
        OutputFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        OutputFormat::Png | OutputFormat::WebP => DynamicImage::ImageRgba8(img.to_rgba8()),
    };
    let mut buf = Cursor::new(Vec::new());
    prepared.write_to(&mut buf, format.image_format()).map_err(ImagingError::Encode)?;
    Ok(buf.into_inner())
}

/// Decodes, resizes and re-encodes an image. Returns the bytes and their content type.
pub fn transform(path: &Path, options: TransformOptions) -> Result<(Vec<u8>, &'static str), ImagingError> {
    options.validate()?;
    let (reader, _) = open(path)?;
    let img = reader.decode().map_err(ImagingError::Decode)?;
    let plan = plan_resize((img.width(), img.height()), options.width, options.height, options.fit);
    let out = apply_plan(img, plan);
    Ok((encode(&out, options.format)?, options.format.content_type()))
}

/// Writes the 225 px wide and 64x64 WebP previews for an uploaded file.
pub fn generate_thumbnails(source: &Path, storage: &Storage, name: &str) -> Result<(), ImagingError> {
    let (reader, _) = open(source)?;
    let img = reader.decode().map_err(ImagingError::Decode)?;

    let preview = apply_plan(img.clone(), plan_resize((img.width(), img.height()), Some(THUMBNAIL_WIDTH), None, Fit::Inside));
    write_atomically(&storage.thumbnail_path(name), &encode(&preview, OutputFormat::WebP)?)?;

    let square = img.resize_to_fill(SQUARE_THUMBNAIL_SIZE, SQUARE_THUMBNAIL_SIZE, FilterType::Lanczos3);
    write_atomically(&storage.square_thumbnail_path(name), &encode(&square, OutputFormat::WebP)?)?;
    Ok(())
}

fn write_atomically(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = dest.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, w: u32, h: u32) {
        let img = RgbaImage::from_pixel(w, h, image::Rgba([200, 40, 40, 255]));
        img.save_with_format(path, ImageFormat::Png).unwrap();
    }

    #[test]
    fn single_dimension_keeps_aspect_ratio() {
        assert_eq!(plan_resize((400, 200), Some(100), None, Fit::Cover), ResizePlan::Scale(100, 50));
        assert_eq!(plan_resize((400, 200), None, Some(100), Fit::Cover), ResizePlan::Scale(200, 100));
        assert_eq!(plan_resize((400, 200), None, None, Fit::Fill), ResizePlan::Keep);
    }

    #[test]
    fn fits_with_both_dimensions() {
        let src = (400, 200);
        assert_eq!(plan_resize(src, Some(100), Some(100), Fit::Fill), ResizePlan::Scale(100, 100));
        assert_eq!(plan_resize(src, Some(100), Some(100), Fit::Cover), ResizePlan::Cover(100, 100));
        assert_eq!(plan_resize(src, Some(100), Some(100), Fit::Inside), ResizePlan::Scale(100, 50));
        assert_eq!(plan_resize(src, Some(100), Some(100), Fit::Outside), ResizePlan::Scale(200, 100));
        assert_eq!(
            plan_resize(src, Some(100), Some(100), Fit::Contain),
            ResizePlan::Contain { inner: (100, 50), canvas: (100, 100) }
        );
    }

    #[test]
    fn unknown_formats_fall_back_to_webp() {
        assert_eq!(OutputFormat::parse_or_default(Some("gif")), OutputFormat::WebP);
        assert_eq!(OutputFormat::parse_or_default(None), OutputFormat::WebP);
        assert_eq!(OutputFormat::parse_or_default(Some("JPEG")), OutputFormat::Jpeg);
    }

    #[test]
    fn out_of_range_dimensions_are_rejected() {
        let opts = TransformOptions { width: Some(0), ..Default::default() };
        assert!(matches!(opts.validate(), Err(ImagingError::InvalidOptions(_))));
        let opts = TransformOptions { height: Some(MAX_DIMENSION + 1), ..Default::default() };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn probe_and_transform_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        write_png(&path, 320, 160);

        let info = probe(&path).unwrap();
        assert_eq!(info.format, "png");
        assert_eq!(info.dimensions, Dimensions { width: 320, height: 160 });

        let opts = TransformOptions { width: Some(100), format: OutputFormat::Png, ..Default::default() };
        let (bytes, content_type) = transform(&path, opts).unwrap();
        assert_eq!(content_type, "image/png");
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 50));
    }

    #[test]
    fn probe_rejects_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"definitely not pixels").unwrap();
        assert!(matches!(probe(&path), Err(ImagingError::Unsupported(_))));
    }

    #[test]
    fn thumbnails_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let source = dir.path().join("wide.png");
        write_png(&source, 450, 300);

        generate_thumbnails(&source, &storage, "wide.png").unwrap();

        let preview = image::open(storage.thumbnail_path("wide.png")).unwrap();
        assert_eq!((preview.width(), preview.height()), (225, 150));
        let square = image::open(storage.square_thumbnail_path("wide.png")).unwrap();
        assert_eq!((square.width(), square.height()), (64, 64));
    }
}
