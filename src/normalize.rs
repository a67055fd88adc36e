//! Image normalization before OCR.
//!
//! Phone photos of handwritten answers are routinely 4000+ pixels on a side
//! and several megabytes. OCR services don't need that much, and charge us
//! for the upload time, so we scale everything down to a bounded size first.

use std::io::Cursor;

use clap::{Args, ValueEnum};
use image::{
    DynamicImage, ImageDecoder as _, ImageFormat, ImageReader, codecs::jpeg::JpegEncoder,
    imageops::FilterType, metadata::Orientation,
};

use crate::{
    error::{GradeError, GradeResult},
    prelude::*,
};

/// Image formats we accept from users.
const SUPPORTED_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp"];

/// The format we re-encode images to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Smaller, and fine for photos.
    #[default]
    Jpeg,
    /// Lossless. Better for screenshots of typed text.
    Png,
}

/// Options for [`normalize_image`].
#[derive(Args, Clone, Debug)]
pub struct NormalizeOpts {
    /// Scale images so that neither side is larger than this many pixels.
    #[clap(long, default_value_t = 1600)]
    pub max_image_dimension: u32,

    /// Reject uploaded images larger than this many bytes.
    #[clap(long, default_value_t = 10 * 1024 * 1024)]
    pub max_image_bytes: usize,

    /// Format used when sending images to OCR.
    #[clap(long, value_enum, default_value_t = OutputFormat::default())]
    pub image_format: OutputFormat,

    /// JPEG quality, from 1 to 100.
    #[clap(long, default_value_t = 85)]
    pub jpeg_quality: u8,
}

impl Default for NormalizeOpts {
    fn default() -> Self {
        Self {
            max_image_dimension: 1600,
            max_image_bytes: 10 * 1024 * 1024,
            image_format: OutputFormat::default(),
            jpeg_quality: 85,
        }
    }
}

/// A re-encoded image, ready to send to OCR.
#[derive(Clone, Debug)]
pub struct NormalizedImage {
    /// The MIME type of `data`.
    pub mime_type: &'static str,
    /// Encoded image data.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl NormalizedImage {
    /// Convert to a `data:` URL.
    pub fn to_data_url(&self) -> String {
        crate::data_url::data_url(self.mime_type, &self.data)
    }
}

/// Decode `bytes`, scale the image down to fit `opts.max_image_dimension`, and
/// re-encode it.
///
/// This is CPU-bound, so async callers should run it via
/// [`tokio::task::spawn_blocking`].
pub fn normalize_image(bytes: &[u8], opts: &NormalizeOpts) -> GradeResult<NormalizedImage> {
    if bytes.is_empty() {
        return Err(GradeError::EmptyImage);
    }
    if bytes.len() > opts.max_image_bytes {
        return Err(GradeError::ImageTooLarge {
            size: bytes.len(),
            max: opts.max_image_bytes,
        });
    }

    // Sniff the type before handing the bytes to a decoder.
    let mime_type = infer::get(bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream");
    if !SUPPORTED_MIME_TYPES.contains(&mime_type) {
        return Err(GradeError::UndecodableImage(format!(
            "{mime_type} is not one of {}",
            SUPPORTED_MIME_TYPES.join(", ")
        )));
    }

    let img = decode_upright(bytes)
        .map_err(|err| GradeError::UndecodableImage(err.to_string()))?;
    let img = scale_to_fit(img, opts.max_image_dimension);
    debug!(
        width = img.width(),
        height = img.height(),
        %mime_type,
        "Normalized image"
    );

    let (mime_type, data) = encode(&img, opts)
        .map_err(|err| GradeError::Internal(format!("could not encode image: {err}")))?;
    Ok(NormalizedImage {
        mime_type,
        data,
        width: img.width(),
        height: img.height(),
    })
}

/// [`normalize_image`], on the blocking thread pool.
pub async fn normalize_image_async(
    bytes: Vec<u8>,
    opts: NormalizeOpts,
) -> GradeResult<NormalizedImage> {
    tokio::task::spawn_blocking(move || normalize_image(&bytes, &opts))
        .await
        .map_err(|err| GradeError::Internal(format!("image task failed: {err}")))?
}

/// Decode an image, turning it the way its EXIF orientation says. Phones
/// store portrait photos sideways and set this tag.
fn decode_upright(bytes: &[u8]) -> image::ImageResult<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or_else(|err| {
        debug!("Ignoring unreadable image orientation: {err}");
        Orientation::NoTransforms
    });
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Shrink `img` so neither side exceeds `max_dimension`, keeping its aspect
/// ratio. Smaller images are returned unchanged.
fn scale_to_fit(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    if img.width() <= max_dimension && img.height() <= max_dimension {
        img
    } else {
        img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    }
}

fn encode(
    img: &DynamicImage,
    opts: &NormalizeOpts,
) -> image::ImageResult<(&'static str, Vec<u8>)> {
    let mut buf = Vec::new();
    match opts.image_format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = img.to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut buf, opts.jpeg_quality.clamp(1, 100));
            rgb.write_with_encoder(encoder)?;
            Ok(("image/jpeg", buf))
        }
        OutputFormat::Png => {
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
            Ok(("image/png", buf))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    /// Encode a solid-colored PNG of the given size.
    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([250, 250, 250])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("encode test image");
        buf
    }

    #[test]
    fn large_images_are_scaled_within_bound() {
        let opts = NormalizeOpts::default();
        for (w, h) in [(3000, 1000), (1000, 3000), (2400, 2400)] {
            let out = normalize_image(&png_bytes(w, h), &opts).unwrap();
            assert!(out.width <= opts.max_image_dimension, "{w}x{h} -> {}", out.width);
            assert!(out.height <= opts.max_image_dimension, "{w}x{h} -> {}", out.height);
            assert_eq!(out.width.max(out.height), opts.max_image_dimension);

            // The output must decode, and match what we reported.
            let decoded = image::load_from_memory(&out.data).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (out.width, out.height));
            assert_eq!(out.mime_type, "image/jpeg");
        }
    }

    #[test]
    fn aspect_ratio_is_preserved() {
        let out = normalize_image(&png_bytes(3200, 1600), &NormalizeOpts::default()).unwrap();
        assert_eq!((out.width, out.height), (1600, 800));
    }

    #[test]
    fn small_images_keep_their_size() {
        let opts = NormalizeOpts {
            image_format: OutputFormat::Png,
            ..NormalizeOpts::default()
        };
        let out = normalize_image(&png_bytes(640, 480), &opts).unwrap();
        assert_eq!((out.width, out.height), (640, 480));
        assert_eq!(out.mime_type, "image/png");
        assert!(image::load_from_memory(&out.data).is_ok());
    }

    #[test]
    fn rejects_bad_input() {
        let opts = NormalizeOpts {
            max_image_bytes: 1024,
            ..NormalizeOpts::default()
        };
        assert!(matches!(normalize_image(&[], &opts), Err(GradeError::EmptyImage)));
        assert!(matches!(
            normalize_image(b"this is plainly not an image", &opts),
            Err(GradeError::UndecodableImage(_))
        ));
        assert!(matches!(
            normalize_image(&vec![0u8; 2048], &opts),
            Err(GradeError::ImageTooLarge { size: 2048, max: 1024 })
        ));
    }

    /// Encode a JPEG carrying an EXIF orientation tag.
    fn jpeg_bytes_with_orientation(width: u32, height: u32, orientation: u8) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([250, 250, 250])));
        let mut jpeg = Vec::new();
        img.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .expect("encode test image");

        // A big-endian TIFF header and one IFD entry: tag 0x0112, SHORT, 1.
        let mut exif = b"Exif\0\0MM\0\x2a\0\0\0\x08\0\x01\x01\x12\0\x03\0\0\0\x01\0".to_vec();
        exif.extend_from_slice(&[orientation, 0, 0, 0, 0, 0, 0]);
        let segment_len = u16::try_from(exif.len() + 2).unwrap();

        // APP1 goes right after the start-of-image marker.
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&segment_len.to_be_bytes());
        out.extend_from_slice(&exif);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn exif_orientation_is_applied() {
        // 6 means "rotate 90 degrees clockwise to display".
        let bytes = jpeg_bytes_with_orientation(200, 100, 6);
        let out = normalize_image(&bytes, &NormalizeOpts::default()).unwrap();
        assert_eq!((out.width, out.height), (100, 200));

        let bytes = jpeg_bytes_with_orientation(200, 100, 1);
        let out = normalize_image(&bytes, &NormalizeOpts::default()).unwrap();
        assert_eq!((out.width, out.height), (200, 100));
    }

    #[test]
    fn truncated_png_is_undecodable() {
        let bytes = png_bytes(64, 64);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(
            normalize_image(truncated, &NormalizeOpts::default()),
            Err(GradeError::UndecodableImage(_))
        ));
    }
}
