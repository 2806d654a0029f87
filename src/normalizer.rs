use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

/// The outcome of normalizing the image field.
///
/// `bytes` is either the untouched payload (the image was already within the
/// width cap) or a resized re-encode in the payload's original format; it is
/// never a partially written result. `extension` is always one of the
/// allow-listed values.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Bytes,
    pub extension: String,
}

/// Decodes `bytes` in the format implied by `extension`, downscales to
/// `max_width` when wider, and re-encodes in the same format.
///
/// An image at or under the cap passes through byte-identical; no lossy
/// round-trip happens for payloads already within policy. The resized height
/// is `round_half_up(max_width * height / width)` and resampling uses
/// Lanczos3. Re-encoding uses maximum quality (JPEG quality 100; PNG, WebP
/// and BMP encode lossless).
pub(crate) fn normalize(
    bytes: &Bytes,
    extension: &str,
    max_width: u32,
) -> crate::Result<NormalizedImage> {
    let format = ImageFormat::from_extension(extension.trim_start_matches('.')).ok_or_else(
        || crate::Error::UnsupportedExtension {
            extension: extension.to_owned(),
        },
    )?;

    // Decoding with the extension's format, rather than sniffing, is what
    // catches a payload whose bytes encode a different format than its
    // filename claims.
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(crate::Error::ImageDecodeFailure)?;

    let (width, height) = (decoded.width(), decoded.height());

    if width <= max_width {
        log::debug!("image is {width}x{height}, within the {max_width}px cap; passing through");
        return Ok(NormalizedImage {
            bytes: bytes.clone(),
            extension: extension.to_owned(),
        });
    }

    let new_height = scaled_height(width, height, max_width)?;
    log::debug!("resizing image from {width}x{height} to {max_width}x{new_height}");

    let resized = decoded.resize_exact(max_width, new_height, FilterType::Lanczos3);
    let encoded = encode(&resized, format)?;

    Ok(NormalizedImage {
        bytes: Bytes::from(encoded),
        extension: extension.to_owned(),
    })
}

/// Height preserving `height / width` at the new width, rounded half-up.
fn scaled_height(width: u32, height: u32, max_width: u32) -> crate::Result<u32> {
    let scaled = (u64::from(max_width) * u64::from(height) + u64::from(width) / 2) / u64::from(width);

    if scaled == 0 {
        return Err(crate::Error::ImageResizeFailure(format!(
            "height of a {width}x{height} image rounds to zero at width {max_width}"
        )));
    }

    u32::try_from(scaled).map_err(|_| {
        crate::Error::ImageResizeFailure(format!(
            "height of a {width}x{height} image overflows at width {max_width}"
        ))
    })
}

fn encode(image: &DynamicImage, format: ImageFormat) -> crate::Result<Vec<u8>> {
    let mut out = Vec::new();

    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut out, 100);
            image
                .write_with_encoder(encoder)
                .map_err(crate::Error::ImageEncodeFailure)?;
        }
        _ => {
            image
                .write_to(&mut Cursor::new(&mut out), format)
                .map_err(crate::Error::ImageEncodeFailure)?;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn png_bytes(width: u32, height: u32) -> Bytes {
        let mut out = Cursor::new(Vec::new());
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 7])
        }));
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        Bytes::from(out.into_inner())
    }

    #[test]
    fn test_scaled_height_rounding() {
        // Exactly divisible dimensions keep the ratio exactly.
        assert_eq!(scaled_height(1200, 800, 600).unwrap(), 400);
        // 600 * 500 / 800 = 375
        assert_eq!(scaled_height(800, 500, 600).unwrap(), 375);
        // 600 * 401 / 1200 = 200.5, rounds up.
        assert_eq!(scaled_height(1200, 401, 600).unwrap(), 201);
        // 600 * 400 / 1201 = 199.83..., rounds up.
        assert_eq!(scaled_height(1201, 400, 600).unwrap(), 200);
        // 600 * 1 / 1300 = 0.46..., rounds to zero.
        assert!(scaled_height(1300, 1, 600).is_err());
    }

    #[test]
    fn test_passthrough_is_byte_identical() {
        let bytes = png_bytes(600, 400);

        let first = normalize(&bytes, ".png", 600).unwrap();
        assert_eq!(first.bytes, bytes);
        assert_eq!(first.extension, ".png");

        // Idempotent on repeated calls.
        let second = normalize(&first.bytes, ".png", 600).unwrap();
        assert_eq!(second.bytes, bytes);
    }

    #[test]
    fn test_oversized_image_is_resized() {
        let bytes = png_bytes(1200, 800);

        let normalized = normalize(&bytes, ".png", 600).unwrap();
        let reloaded = image::load_from_memory_with_format(&normalized.bytes, ImageFormat::Png).unwrap();

        assert_eq!(reloaded.width(), 600);
        assert_eq!(reloaded.height(), 400);
    }

    #[test]
    fn test_mismatched_format_fails_to_decode() {
        // PNG bytes under a .jpg name must not decode.
        let bytes = png_bytes(10, 10);

        assert!(matches!(
            normalize(&bytes, ".jpg", 600),
            Err(crate::Error::ImageDecodeFailure(_))
        ));
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let bytes = Bytes::from_static(b"not an image at all");

        assert!(matches!(
            normalize(&bytes, ".png", 600),
            Err(crate::Error::ImageDecodeFailure(_))
        ));
    }
}
