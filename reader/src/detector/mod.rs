pub mod motion;

use image::GrayImage;
use visible_light_common::command::Command;

use crate::naming::FilenameGenerator;

pub use motion::MotionEntryDetector;

/// Lifecycle event raised by an entry detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorEvent {
    Enter,
    Exit,
    Abort,
    Pause,
    Resume,
}

impl DetectorEvent {
    /// The capture command this event asks for. Entering a scene starts a new
    /// recording under a fresh timestamp name.
    pub fn to_command(self, names: &mut FilenameGenerator) -> Command {
        match self {
            DetectorEvent::Enter => Command::Start {
                filename: names.generate(),
            },
            DetectorEvent::Exit => Command::Stop,
            DetectorEvent::Abort => Command::Abort,
            DetectorEvent::Pause => Command::Pause,
            DetectorEvent::Resume => Command::Resume,
        }
    }
}

/// Analyses batches of grayscale frames for something entering or leaving
/// the scene.
pub trait EntryDetector {
    /// `batch` holds the frames in acquisition order.
    fn tick(&mut self, batch: &[GrayImage]) -> Vec<DetectorEvent>;
}
