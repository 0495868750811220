use std::path::{Path, PathBuf};

pub const TOPIC_CAPTURE_START: &str = "capture.start";
pub const TOPIC_CAPTURE_STOP: &str = "capture.stop";
pub const TOPIC_CAPTURE_ABORT: &str = "capture.abort";
pub const TOPIC_CAPTURE_PAUSE: &str = "capture.pause";
pub const TOPIC_CAPTURE_RESUME: &str = "capture.resume";
pub const TOPIC_UPLOAD: &str = "upload";

/// Every topic this service publishes or subscribes to.
pub const ALL_TOPICS: [&str; 6] = [
    TOPIC_CAPTURE_START,
    TOPIC_CAPTURE_STOP,
    TOPIC_CAPTURE_ABORT,
    TOPIC_CAPTURE_PAUSE,
    TOPIC_CAPTURE_RESUME,
    TOPIC_UPLOAD,
];

/// A recording-control intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start { filename: String },
    Stop,
    Abort,
    Pause,
    Resume,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start { .. } => "start",
            Command::Stop => "stop",
            Command::Abort => "abort",
            Command::Pause => "pause",
            Command::Resume => "resume",
        }
    }
}

/// A message carried on the command bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    Capture(Command),
    /// A finished recording is ready for downstream consumers.
    Upload { path: PathBuf },
}

impl BusMessage {
    pub fn upload(path: &Path) -> Self {
        BusMessage::Upload {
            path: path.to_path_buf(),
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            BusMessage::Capture(Command::Start { .. }) => TOPIC_CAPTURE_START,
            BusMessage::Capture(Command::Stop) => TOPIC_CAPTURE_STOP,
            BusMessage::Capture(Command::Abort) => TOPIC_CAPTURE_ABORT,
            BusMessage::Capture(Command::Pause) => TOPIC_CAPTURE_PAUSE,
            BusMessage::Capture(Command::Resume) => TOPIC_CAPTURE_RESUME,
            BusMessage::Upload { .. } => TOPIC_UPLOAD,
        }
    }

    /// UTF-8 payload; empty for the argument-less capture commands.
    pub fn payload(&self) -> Vec<u8> {
        match self {
            BusMessage::Capture(Command::Start { filename }) => filename.as_bytes().to_vec(),
            BusMessage::Capture(_) => Vec::new(),
            BusMessage::Upload { path } => path.to_string_lossy().into_owned().into_bytes(),
        }
    }

    pub fn decode(topic: &str, payload: &[u8]) -> Result<Self, MessageError> {
        let message = match topic {
            TOPIC_CAPTURE_START => {
                let filename = payload_text(topic, payload)?.trim();
                if filename.is_empty() {
                    return Err(MessageError::MissingPayload {
                        topic: topic.to_string(),
                    });
                }
                BusMessage::Capture(Command::Start {
                    filename: filename.to_string(),
                })
            }
            TOPIC_CAPTURE_STOP => BusMessage::Capture(Command::Stop),
            TOPIC_CAPTURE_ABORT => BusMessage::Capture(Command::Abort),
            TOPIC_CAPTURE_PAUSE => BusMessage::Capture(Command::Pause),
            TOPIC_CAPTURE_RESUME => BusMessage::Capture(Command::Resume),
            TOPIC_UPLOAD => {
                let path = payload_text(topic, payload)?;
                if path.is_empty() {
                    return Err(MessageError::MissingPayload {
                        topic: topic.to_string(),
                    });
                }
                BusMessage::Upload {
                    path: PathBuf::from(path),
                }
            }
            other => return Err(MessageError::UnknownTopic(other.to_string())),
        };
        Ok(message)
    }
}

fn payload_text<'a>(topic: &str, payload: &'a [u8]) -> Result<&'a str, MessageError> {
    std::str::from_utf8(payload).map_err(|_| MessageError::NotUtf8 {
        topic: topic.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("unknown topic {0}")]
    UnknownTopic(String),
    #[error("topic {topic} requires a payload")]
    MissingPayload { topic: String },
    #[error("payload on topic {topic} is not valid UTF-8")]
    NotUtf8 { topic: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_carries_filename() {
        let msg = BusMessage::Capture(Command::Start {
            filename: "2018-01-02@16-46-32".into(),
        });
        assert_eq!(msg.topic(), "capture.start");
        let decoded = BusMessage::decode(msg.topic(), &msg.payload()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn stop_ignores_payload() {
        let decoded = BusMessage::decode("capture.stop", b"anything").unwrap();
        assert_eq!(decoded, BusMessage::Capture(Command::Stop));
    }

    #[test]
    fn upload_payload_is_path() {
        let msg = BusMessage::upload(Path::new("/captures/T1-visible.mp4"));
        assert_eq!(msg.topic(), "upload");
        assert_eq!(msg.payload(), b"/captures/T1-visible.mp4".to_vec());
    }

    #[test]
    fn empty_start_rejected() {
        assert!(matches!(
            BusMessage::decode("capture.start", b"  "),
            Err(MessageError::MissingPayload { .. })
        ));
    }

    #[test]
    fn unknown_topic_rejected() {
        assert!(matches!(
            BusMessage::decode("capture.rewind", b""),
            Err(MessageError::UnknownTopic(_))
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        assert!(matches!(
            BusMessage::decode("capture.start", &[0xFF, 0xFE]),
            Err(MessageError::NotUtf8 { .. })
        ));
    }
}
