use image::{GrayImage, Luma, RgbImage};

/// Number of grayscale frames analysed together by the entry detector.
pub const BATCH_SIZE: usize = 4;

/// Fixed-capacity batch of grayscale frames.
///
/// The slot buffers are allocated once and overwritten in place. Clearing only
/// rewinds the fill cursor; `frames()` never exposes slots past it, so data
/// from a previous batch cannot leak into the next detector call.
pub struct FrameBatch {
    slots: [GrayImage; BATCH_SIZE],
    len: usize,
}

impl FrameBatch {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            slots: std::array::from_fn(|_| GrayImage::new(width, height)),
            len: 0,
        }
    }

    /// Append the grayscale rendition of `frame`. Returns `true` when the batch is full.
    ///
    /// Pushing into a full batch is a caller bug; the batch is cleared first.
    pub fn push_rgb(&mut self, frame: &RgbImage) -> bool {
        if self.is_full() {
            self.clear();
        }

        let slot = &mut self.slots[self.len];
        if slot.dimensions() != frame.dimensions() {
            *slot = GrayImage::new(frame.width(), frame.height());
        }
        for (dst, src) in slot.pixels_mut().zip(frame.pixels()) {
            *dst = Luma([luma(src.0)]);
        }

        self.len += 1;
        self.is_full()
    }

    /// Frames filled since the last clear, in acquisition order.
    pub fn frames(&self) -> &[GrayImage] {
        &self.slots[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == BATCH_SIZE
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

/// Rec. 709 luma in fixed point, rounded.
fn luma([r, g, b]: [u8; 3]) -> u8 {
    let y = 2126 * r as u32 + 7152 * g as u32 + 722 * b as u32;
    ((y + 5000) / 10000) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(value: u8) -> RgbImage {
        RgbImage::from_pixel(4, 2, Rgb([value, value, value]))
    }

    #[test]
    fn gray_of_neutral_rgb_is_identity() {
        for v in [0u8, 1, 127, 200, 255] {
            assert_eq!(luma([v, v, v]), v);
        }
    }

    #[test]
    fn fills_in_acquisition_order() {
        let mut batch = FrameBatch::new(4, 2);
        assert!(!batch.push_rgb(&solid(10)));
        assert!(!batch.push_rgb(&solid(20)));
        assert!(!batch.push_rgb(&solid(30)));
        assert!(batch.push_rgb(&solid(40)));

        let firsts: Vec<u8> = batch.frames().iter().map(|f| f.get_pixel(0, 0).0[0]).collect();
        assert_eq!(firsts, vec![10, 20, 30, 40]);
    }

    #[test]
    fn clear_hides_previous_frames() {
        let mut batch = FrameBatch::new(4, 2);
        for v in [1, 2, 3, 4] {
            batch.push_rgb(&solid(v));
        }
        batch.clear();
        assert_eq!(batch.len(), 0);
        assert!(batch.frames().is_empty());

        batch.push_rgb(&solid(9));
        assert_eq!(batch.frames().len(), 1);
        assert_eq!(batch.frames()[0].get_pixel(3, 1).0[0], 9);
    }

    #[test]
    fn push_into_full_batch_starts_over() {
        let mut batch = FrameBatch::new(4, 2);
        for v in [1, 2, 3, 4] {
            batch.push_rgb(&solid(v));
        }
        assert!(!batch.push_rgb(&solid(5)));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.frames()[0].get_pixel(0, 0).0[0], 5);
    }

    #[test]
    fn resizes_slot_for_unexpected_dimensions() {
        let mut batch = FrameBatch::new(4, 2);
        batch.push_rgb(&RgbImage::from_pixel(2, 2, Rgb([50, 50, 50])));
        assert_eq!(batch.frames()[0].dimensions(), (2, 2));
    }
}
