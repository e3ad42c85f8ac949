//! JPEG re-encode collaborator.
//!
//! Converts a packed YUYV 4:2:2 frame to RGB and compresses it with the
//! `image` crate's JPEG encoder. Used on the push path when the daemon is
//! asked to send JPEG instead of raw frames.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

pub const JPEG_QUALITY: u8 = 95;

/// Encode a YUYV frame as JPEG. `data` must be exactly
/// `width * height * 2` bytes.
pub fn encode_yuyv(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|area| area.checked_mul(2))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    if data.len() != expected {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {expected}, got {}",
            data.len()
        ));
    }

    let rgb = yuyv_to_rgb(data, width as usize, height as usize);
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode(&rgb, width, height, ExtendedColorType::Rgb8)
        .context("encode jpeg")?;
    Ok(jpeg)
}

/// BT.601 conversion of packed YUYV (Y0 U Y1 V per pixel pair) to RGB24.
fn yuyv_to_rgb(data: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut rgb = vec![0u8; width * height * 3];
    for (pair, out) in data.chunks_exact(4).zip(rgb.chunks_exact_mut(6)) {
        let y0 = pair[0] as f32;
        let u = pair[1] as f32 - 128.0;
        let y1 = pair[2] as f32;
        let v = pair[3] as f32 - 128.0;

        for (y, px) in [(y0, 0), (y1, 3)] {
            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;
            out[px] = clamp_to_u8(r);
            out[px + 1] = clamp_to_u8(g);
            out[px + 2] = clamp_to_u8(b);
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_yuyv_converts_to_gray_rgb() {
        // Y=128, U=V=128 is mid-gray in both spaces.
        let yuyv = vec![128u8; 4 * 2 * 2];
        let rgb = yuyv_to_rgb(&yuyv, 4, 2);
        assert_eq!(rgb, vec![128u8; 4 * 2 * 3]);
    }

    #[test]
    fn encode_produces_a_jpeg_magic_header() -> Result<()> {
        let yuyv = vec![128u8; 16 * 16 * 2];
        let jpeg = encode_yuyv(&yuyv, 16, 16)?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
        Ok(())
    }

    #[test]
    fn wrong_length_input_is_rejected() {
        assert!(encode_yuyv(&[0u8; 10], 16, 16).is_err());
    }
}
