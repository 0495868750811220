/// Pixel layout of a frame as delivered by the camera driver.
#[derive(Debug, Clone)]
pub enum RawPayload {
    /// 8-bit Bayer mosaic, RGGB pattern, one byte per photosite.
    BayerRggb8(Vec<u8>),
    /// Packed 8-bit RGB, three bytes per pixel.
    Rgb8(Vec<u8>),
    /// A complete JPEG image (MJPEG cameras).
    Jpeg(Vec<u8>),
}

/// A frame straight from the camera, before pixel conversion.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub payload: RawPayload,
    pub width: u32,
    pub height: u32,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl RawFrame {
    pub fn bayer(data: Vec<u8>, width: u32, height: u32, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            payload: RawPayload::BayerRggb8(data),
            width,
            height,
            captured_at_ms,
            seq,
        }
    }

    pub fn rgb(data: Vec<u8>, width: u32, height: u32, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            payload: RawPayload::Rgb8(data),
            width,
            height,
            captured_at_ms,
            seq,
        }
    }

    /// JPEG frames carry their dimensions inside the image; `width`/`height`
    /// hold the expected size until decoded.
    pub fn jpeg(data: Vec<u8>, width: u32, height: u32, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            payload: RawPayload::Jpeg(data),
            width,
            height,
            captured_at_ms,
            seq,
        }
    }

    /// Number of payload bytes a non-compressed frame of this size must carry.
    pub fn expected_len(&self) -> Option<usize> {
        let pixels = self.width as usize * self.height as usize;
        match &self.payload {
            RawPayload::BayerRggb8(_) => Some(pixels),
            RawPayload::Rgb8(_) => Some(pixels * 3),
            RawPayload::Jpeg(_) => None,
        }
    }

    pub fn payload_bytes(&self) -> &[u8] {
        match &self.payload {
            RawPayload::BayerRggb8(data) => data,
            RawPayload::Rgb8(data) => data,
            RawPayload::Jpeg(data) => data,
        }
    }

    pub fn format_name(&self) -> &'static str {
        match &self.payload {
            RawPayload::BayerRggb8(_) => "bayer_rggb8",
            RawPayload::Rgb8(_) => "rgb8",
            RawPayload::Jpeg(_) => "jpeg",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_len_per_layout() {
        assert_eq!(RawFrame::bayer(vec![], 4, 2, 0, 0).expected_len(), Some(8));
        assert_eq!(RawFrame::rgb(vec![], 4, 2, 0, 0).expected_len(), Some(24));
        assert_eq!(RawFrame::jpeg(vec![], 4, 2, 0, 0).expected_len(), None);
    }

    #[test]
    fn payload_bytes_regardless_of_layout() {
        let frame = RawFrame::jpeg(vec![0xFF, 0xD8], 4, 2, 1708300000000, 7);
        assert_eq!(frame.payload_bytes(), &[0xFF, 0xD8]);
        assert_eq!(frame.format_name(), "jpeg");
    }
}
