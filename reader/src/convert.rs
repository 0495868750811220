use image::{ImageReader, RgbImage};
use std::io::Cursor;
use visible_light_common::frame::{RawFrame, RawPayload};

/// Converts raw camera frames into RGB images of a fixed size.
///
/// The output buffer is allocated once and reused for every frame; callers
/// borrow the result until the next conversion.
pub struct PixelConverter {
    output: RgbImage,
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("frame is {got_w}x{got_h}, expected {want_w}x{want_h}")]
    SizeMismatch {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },
    #[error("{format} payload has {got} bytes, expected {expected}")]
    PayloadLength {
        format: &'static str,
        got: usize,
        expected: usize,
    },
    #[error("bayer frame dimensions must be even, got {0}x{1}")]
    OddBayer(u32, u32),
    #[error("failed to decode JPEG: {0}")]
    Decode(String),
}

impl PixelConverter {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            output: RgbImage::new(width, height),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.output.dimensions()
    }

    pub fn convert(&mut self, raw: &RawFrame) -> Result<&RgbImage, ConvertError> {
        match &raw.payload {
            RawPayload::Jpeg(data) => self.decode_jpeg(data)?,
            RawPayload::Rgb8(data) => {
                self.check_raw(raw)?;
                self.output.copy_from_slice(data);
            }
            RawPayload::BayerRggb8(data) => {
                self.check_raw(raw)?;
                if raw.width % 2 != 0 || raw.height % 2 != 0 {
                    return Err(ConvertError::OddBayer(raw.width, raw.height));
                }
                debayer_rggb(data, &mut self.output);
            }
        }
        Ok(&self.output)
    }

    fn check_size(&self, width: u32, height: u32) -> Result<(), ConvertError> {
        let (want_w, want_h) = self.output.dimensions();
        if (width, height) != (want_w, want_h) {
            return Err(ConvertError::SizeMismatch {
                got_w: width,
                got_h: height,
                want_w,
                want_h,
            });
        }
        Ok(())
    }

    fn check_raw(&self, raw: &RawFrame) -> Result<(), ConvertError> {
        self.check_size(raw.width, raw.height)?;
        let got = raw.payload_bytes().len();
        if let Some(expected) = raw.expected_len() {
            if got != expected {
                return Err(ConvertError::PayloadLength {
                    format: raw.format_name(),
                    got,
                    expected,
                });
            }
        }
        Ok(())
    }

    fn decode_jpeg(&mut self, data: &[u8]) -> Result<(), ConvertError> {
        let decoded = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ConvertError::Decode(e.to_string()))?
            .decode()
            .map_err(|e| ConvertError::Decode(e.to_string()))?
            .into_rgb8();
        self.check_size(decoded.width(), decoded.height())?;
        self.output.copy_from_slice(decoded.as_raw());
        Ok(())
    }
}

/// Nearest-neighbour demosaic: each 2x2 RGGB cell becomes four identical
/// pixels built from its R, mean G and B photosites.
fn debayer_rggb(bayer: &[u8], out: &mut RgbImage) {
    let width = out.width() as usize;
    let (w, h) = out.dimensions();
    for cy in (0..h).step_by(2) {
        for cx in (0..w).step_by(2) {
            let top = cy as usize * width + cx as usize;
            let bottom = top + width;
            let r = bayer[top];
            let g = ((bayer[top + 1] as u16 + bayer[bottom] as u16 + 1) / 2) as u8;
            let b = bayer[bottom + 1];
            let px = image::Rgb([r, g, b]);
            out.put_pixel(cx, cy, px);
            out.put_pixel(cx + 1, cy, px);
            out.put_pixel(cx, cy + 1, px);
            out.put_pixel(cx + 1, cy + 1, px);
        }
    }
}
