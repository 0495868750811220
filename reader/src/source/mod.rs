pub mod mjpeg;

use std::time::Duration;
use visible_light_common::frame::RawFrame;

pub use mjpeg::MjpegSource;

/// A camera delivering raw frames with blocking, time-bounded retrieval.
pub trait FrameSource {
    /// Block until the next frame arrives or `timeout` elapses.
    fn retrieve(&mut self, timeout: Duration) -> Result<RawFrame, GrabError>;
}

#[derive(Debug, thiserror::Error)]
pub enum GrabError {
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error("driver error {code}: {description}")]
    Driver { code: i32, description: String },
    #[error("frame source disconnected")]
    Disconnected,
}
