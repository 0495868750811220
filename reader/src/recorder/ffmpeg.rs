use image::RgbImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use tracing::{debug, error, info, warn};

use super::{Recorder, RecorderError};

/// Codec parameters handed to ffmpeg.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub codec: String,
    pub crf: u32,
    pub preset: String,
}

/// Records RGB frames by piping them as raw video into an ffmpeg child.
///
/// Frames written while no recording is open, or while paused, are dropped.
/// An open recording is finalized when the recorder is dropped.
pub struct FfmpegRecorder {
    frame_rate: f64,
    frame_size: (u32, u32),
    color: bool,
    settings: EncoderSettings,
    active: Option<ActiveEncoder>,
    paused: bool,
}

struct ActiveEncoder {
    child: Child,
    stdin: ChildStdin,
    output_path: PathBuf,
    frame_count: u32,
}

impl FfmpegRecorder {
    pub fn new(
        frame_rate: f64,
        frame_size: (u32, u32),
        color: bool,
        settings: EncoderSettings,
    ) -> Self {
        Self {
            frame_rate,
            frame_size,
            color,
            settings,
            active: None,
            paused: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn spawn(&self, path: &Path) -> Result<ActiveEncoder, RecorderError> {
        let args = ffmpeg_args(
            self.frame_rate,
            self.frame_size,
            self.color,
            &self.settings,
            path,
        );

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RecorderError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecorderError::Spawn("could not get stdin handle".into()))?;

        debug!(
            codec = self.settings.codec,
            crf = self.settings.crf,
            preset = self.settings.preset,
            fps = self.frame_rate,
            output = path.display().to_string(),
            "ffmpeg encoder started"
        );

        Ok(ActiveEncoder {
            child,
            stdin,
            output_path: path.to_path_buf(),
            frame_count: 0,
        })
    }
}

impl ActiveEncoder {
    /// Close stdin and wait for ffmpeg to write the container trailer.
    fn finish(self) -> Result<u32, RecorderError> {
        let ActiveEncoder {
            child,
            stdin,
            output_path,
            frame_count,
        } = self;
        drop(stdin);

        let output = child
            .wait_with_output()
            .map_err(|e| RecorderError::Wait(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(stderr = %stderr, output = output_path.display().to_string(), "ffmpeg exited with error");
            return Err(RecorderError::FfmpegFailed(stderr.into_owned()));
        }

        info!(
            frame_count,
            output = output_path.display().to_string(),
            "recording encoding complete"
        );
        Ok(frame_count)
    }
}

impl Recorder for FfmpegRecorder {
    fn write(&mut self, frame: &RgbImage) -> Result<(), RecorderError> {
        if self.paused {
            return Ok(());
        }
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };

        if frame.dimensions() != self.frame_size {
            return Err(RecorderError::FrameSize {
                got: frame.dimensions(),
                expected: self.frame_size,
            });
        }

        active
            .stdin
            .write_all(frame.as_raw())
            .map_err(|e| RecorderError::Write(e.to_string()))?;
        active.frame_count += 1;
        Ok(())
    }

    fn start_recording(&mut self, path: &Path) -> Result<(), RecorderError> {
        if let Some(previous) = self.active.take() {
            warn!(
                previous = previous.output_path.display().to_string(),
                next = path.display().to_string(),
                "recording already open, finalizing it before starting the next"
            );
            if let Err(e) = previous.finish() {
                error!(error = %e, "failed to finalize previous recording");
            }
        }

        self.active = Some(self.spawn(path)?);
        self.paused = false;
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), RecorderError> {
        self.paused = false;
        match self.active.take() {
            Some(active) => active.finish().map(|_| ()),
            None => {
                debug!("stop requested while not recording");
                Ok(())
            }
        }
    }

    fn pause(&mut self) {
        if self.active.is_none() {
            debug!("pause requested while not recording");
            return;
        }
        self.paused = true;
    }

    fn resume(&mut self) {
        if self.active.is_none() {
            debug!("resume requested while not recording");
        }
        self.paused = false;
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            info!(
                output = active.output_path.display().to_string(),
                "finalizing open recording on shutdown"
            );
            if let Err(e) = active.finish() {
                error!(error = %e, "failed to finalize recording on shutdown");
            }
        }
    }
}

fn ffmpeg_args(
    frame_rate: f64,
    (width, height): (u32, u32),
    color: bool,
    settings: &EncoderSettings,
    output: &Path,
) -> Vec<String> {
    let vcodec = match settings.codec.as_str() {
        "h265" => "libx265",
        _ => "libx264",
    };

    let mut args: Vec<String> = [
        "-loglevel", "error",
        "-f", "rawvideo",
        "-pix_fmt", "rgb24",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.extend([
        "-s".to_string(),
        format!("{width}x{height}"),
        "-r".to_string(),
        frame_rate.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-c:v".to_string(),
        vcodec.to_string(),
        "-preset".to_string(),
        settings.preset.clone(),
        "-crf".to_string(),
        settings.crf.to_string(),
    ]);
    if !color {
        args.extend(["-vf".to_string(), "format=gray".to_string()]);
    }
    args.extend([
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-y".to_string(),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

/// Check whether ffmpeg is available on PATH. Logs a warning if not found.
pub async fn check_ffmpeg_available() {
    match tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
    {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
        }
        Ok(_) => {
            warn!("ffmpeg returned non-zero for -version; recording may fail");
        }
        Err(e) => {
            warn!(
                error = %e,
                "ffmpeg not found on PATH; recordings will fail to start. \
                 Install ffmpeg with libx264/libx265 support."
            );
        }
    }
}
