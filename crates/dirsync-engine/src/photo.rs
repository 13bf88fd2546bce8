//! Photo transcoding against a byte budget.
//!
//! Directory photo attributes carry a negotiated size limit. Payloads are
//! re-encoded as JPEG (flattening palette and alpha modes to opaque color)
//! and, when conversion alone does not fit, shrunk by bisecting the pixel
//! dimension box until the encoded size fits the budget.
//!
//! Metadata is not carried over to the output; the orientation tag is
//! honored by transposing pixels before encoding, so the result does not
//! depend on a viewer interpreting orientation metadata.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use thiserror::Error;
use tracing::debug;

/// Maximum number of dimension probes before giving up.
const MAX_BISECT_STEPS: usize = 10;

/// Error during photo transcoding.
#[derive(Debug, Error)]
pub enum PhotoError {
    /// The payload could not be decoded as an image.
    #[error("photo decode failed: {message}")]
    Decode { message: String },

    /// Re-encoding failed.
    #[error("photo encode failed: {message}")]
    Encode { message: String },

    /// No probed scale produced an encoding within the budget.
    #[error("no scale fits the photo into {budget} bytes")]
    BudgetUnreachable { budget: usize },
}

/// Shrink and reformat a photo to fit `budget` bytes.
///
/// Contract:
/// - without a budget, or when the payload is already JPEG and within
///   budget, the input is returned byte-identical;
/// - otherwise the payload is converted to JPEG at `quality`; if that alone
///   fits, it is returned;
/// - otherwise the pixel dimensions are bisected, keeping the largest
///   encoding found at or under budget within [`MAX_BISECT_STEPS`] probes.
pub fn fit_photo(data: &[u8], budget: Option<usize>, quality: u8) -> Result<Vec<u8>, PhotoError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| PhotoError::Decode {
            message: e.to_string(),
        })?;
    let format = reader.format().ok_or_else(|| PhotoError::Decode {
        message: "unrecognized image format".to_string(),
    })?;

    let within_budget = budget.is_none_or(|b| data.len() <= b);
    if format == ImageFormat::Jpeg && within_budget {
        return Ok(data.to_vec());
    }

    let mut decoder = reader.into_decoder().map_err(|e| PhotoError::Decode {
        message: e.to_string(),
    })?;
    let orientation = decoder
        .orientation()
        .unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder).map_err(|e| PhotoError::Decode {
        message: e.to_string(),
    })?;

    // Bake the orientation into the pixels, then flatten color modes with
    // transparency or palettes to plain opaque color.
    image.apply_orientation(orientation);
    let image = DynamicImage::ImageRgb8(image.to_rgb8());

    let encoded = encode_jpeg(&image, quality)?;
    let Some(budget) = budget else {
        return Ok(encoded);
    };
    if encoded.len() <= budget {
        return Ok(encoded);
    }

    // Bisect the dimension box: lower bound is known-too-small-or-untested,
    // upper bound known-too-large; keep the best encoding found.
    let mut lower = (0u32, 0u32);
    let mut upper = (image.width(), image.height());
    let mut best: Option<Vec<u8>> = None;

    for step in 0..MAX_BISECT_STEPS {
        let middle = ((lower.0 + upper.0) / 2, (lower.1 + upper.1) / 2);
        if middle == lower || middle.0 == 0 || middle.1 == 0 {
            break;
        }
        let probe = image.resize_exact(middle.0, middle.1, FilterType::Lanczos3);
        let bytes = encode_jpeg(&probe, quality)?;
        debug!(
            step,
            width = middle.0,
            height = middle.1,
            size = bytes.len(),
            budget,
            "Probed photo scale"
        );
        if bytes.len() <= budget {
            lower = middle;
            best = Some(bytes);
        } else {
            upper = middle;
        }
    }

    best.ok_or(PhotoError::BudgetUnreachable { budget })
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, PhotoError> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder
        .encode_image(image)
        .map_err(|e| PhotoError::Encode {
            message: e.to_string(),
        })?;
    Ok(buffer)
}
