use chrono::{DateTime, Local, TimeZone};
use std::path::{Path, PathBuf};

const FILENAME_FORMAT: &str = "%Y-%m-%d@%H-%M-%S";

/// Recording name for a capture started at `at`,
/// e.g. "2018-01-02@16-46-32".
pub fn timestamp_filename<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(FILENAME_FORMAT).to_string()
}

/// Output file for a recording,
/// e.g. "/captures/2018-01-02@16-46-32-visible.mp4".
pub fn output_path(capture_folder: &Path, filename: &str, extension: &str) -> PathBuf {
    capture_folder.join(format!("{filename}-visible.{extension}"))
}

/// Produces timestamp filenames that never repeat within one process.
///
/// Two captures can be triggered within the same second; the second one gets
/// a `-1` suffix, the third `-2`, and so on. The timestamp format sorts
/// lexicographically, so a clock that steps backwards (DST fall-back, NTP)
/// keeps suffixing the newest name seen instead of reusing an older one.
#[derive(Debug, Default)]
pub struct FilenameGenerator {
    last_base: Option<String>,
    repeats: u32,
}

impl FilenameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&mut self) -> String {
        self.generate_at(&Local::now())
    }

    pub fn generate_at<Tz: TimeZone>(&mut self, at: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        let base = timestamp_filename(at);
        match self.last_base.as_deref() {
            Some(last) if base.as_str() <= last => {
                self.repeats += 1;
                format!("{last}-{}", self.repeats)
            }
            _ => {
                self.last_base = Some(base.clone());
                self.repeats = 0;
                base
            }
        }
    }
}
