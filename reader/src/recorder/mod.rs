pub mod ffmpeg;

use image::RgbImage;
use std::path::Path;

pub use ffmpeg::{EncoderSettings, FfmpegRecorder};

/// A video sink controlled by the capture loop.
///
/// Every frame the camera delivers is passed to `write`; the recorder decides
/// whether to encode it. Control calls that do not apply to the current state
/// (stop while idle, resume while recording, ...) must be harmless no-ops.
pub trait Recorder {
    fn write(&mut self, frame: &RgbImage) -> Result<(), RecorderError>;
    fn start_recording(&mut self, path: &Path) -> Result<(), RecorderError>;
    fn stop_recording(&mut self) -> Result<(), RecorderError>;
    fn pause(&mut self);
    fn resume(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),
    #[error("failed to write frame to ffmpeg stdin: {0}")]
    Write(String),
    #[error("failed to wait for ffmpeg: {0}")]
    Wait(String),
    #[error("ffmpeg exited with non-zero status: {0}")]
    FfmpegFailed(String),
    #[error("frame is {got:?}, recorder expects {expected:?}")]
    FrameSize { got: (u32, u32), expected: (u32, u32) },
}
