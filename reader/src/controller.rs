use chrono::{DateTime, Local};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use visible_light_common::command::{BusMessage, Command};
use visible_light_common::config::Config;

use crate::batch::FrameBatch;
use crate::bus::CommandBus;
use crate::convert::PixelConverter;
use crate::detector::EntryDetector;
use crate::naming::{output_path, FilenameGenerator};
use crate::pending::PendingCommands;
use crate::recorder::Recorder;
use crate::source::FrameSource;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub capture_folder: PathBuf,
    pub extension: String,
    pub retrieve_timeout: Duration,
    /// Consecutive failures tolerated; one more ends acquisition.
    pub error_threshold: u32,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            capture_folder: config.capture.folder.clone(),
            extension: config.capture.extension.clone(),
            retrieve_timeout: config.camera.retrieve_timeout(),
            error_threshold: config.camera.error_threshold,
        }
    }
}

/// One open output file.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub filename: String,
    pub path: PathBuf,
    pub started_at: DateTime<Local>,
}

/// What the controller believes the recorder is doing. Transitions are
/// advisory: commands that do not apply leave the state as it is.
#[derive(Debug, Default)]
pub enum RecorderState {
    #[default]
    Idle,
    Recording(RecordingSession),
    Paused(RecordingSession),
}

impl RecorderState {
    pub fn name(&self) -> &'static str {
        match self {
            RecorderState::Idle => "idle",
            RecorderState::Recording(_) => "recording",
            RecorderState::Paused(_) => "paused",
        }
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        match self {
            RecorderState::Idle => None,
            RecorderState::Recording(session) | RecorderState::Paused(session) => Some(session),
        }
    }

    fn into_session(self) -> Option<RecordingSession> {
        match self {
            RecorderState::Idle => None,
            RecorderState::Recording(session) | RecorderState::Paused(session) => Some(session),
        }
    }
}

/// Outcome of one acquisition iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A frame was converted and handed to the recorder and the batch.
    Distributed,
    /// Acquisition failed; `consecutive` failures so far.
    Failed { consecutive: u32 },
    /// Too many consecutive failures; acquisition is over for good.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEnd {
    Exhausted,
    Shutdown,
}

/// Drives frame acquisition, detection and recording control.
///
/// Every iteration services at most one pending command, then pulls one frame
/// from the source. Detector events are never applied directly: they are
/// published on the bus and come back through the same pending-command slots
/// as external commands.
pub struct CaptureController<S, R, D> {
    source: S,
    converter: PixelConverter,
    recorder: R,
    detector: D,
    bus: Arc<dyn CommandBus>,
    pending: Arc<PendingCommands>,
    settings: ControllerSettings,
    batch: FrameBatch,
    state: RecorderState,
    names: FilenameGenerator,
    error_count: u32,
    exhausted: bool,
}

impl<S, R, D> CaptureController<S, R, D>
where
    S: FrameSource,
    R: Recorder,
    D: EntryDetector,
{
    pub fn new(
        source: S,
        converter: PixelConverter,
        recorder: R,
        detector: D,
        bus: Arc<dyn CommandBus>,
        pending: Arc<PendingCommands>,
        settings: ControllerSettings,
    ) -> Self {
        let (width, height) = converter.dimensions();
        Self {
            source,
            converter,
            recorder,
            detector,
            bus,
            pending,
            settings,
            batch: FrameBatch::new(width, height),
            state: RecorderState::Idle,
            names: FilenameGenerator::new(),
            error_count: 0,
            exhausted: false,
        }
    }

    pub fn state(&self) -> &RecorderState {
        &self.state
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Acquire frames until too many consecutive failures or until `shutdown` is set.
    pub fn run(&mut self, shutdown: &AtomicBool) -> LoopEnd {
        info!(
            timeout_ms = self.settings.retrieve_timeout.as_millis() as u64,
            error_threshold = self.settings.error_threshold,
            "acquisition loop started"
        );
        loop {
            if shutdown.load(Ordering::Acquire) {
                info!(state = self.state.name(), "shutdown requested, leaving acquisition loop");
                return LoopEnd::Shutdown;
            }
            if self.step() == Step::Exhausted {
                return LoopEnd::Exhausted;
            }
        }
    }

    /// Keep servicing commands without acquiring frames, polling every
    /// `poll`, until `shutdown` is set. Commands already pending when
    /// shutdown is observed are still serviced.
    pub fn serve_commands(&mut self, shutdown: &AtomicBool, poll: Duration) {
        info!(state = self.state.name(), "servicing commands without acquisition");
        loop {
            while self.service_pending() {}
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            std::thread::sleep(poll);
        }
    }

    pub fn step(&mut self) -> Step {
        if self.exhausted {
            return Step::Exhausted;
        }

        self.service_pending();

        let raw = match self.source.retrieve(self.settings.retrieve_timeout) {
            Ok(raw) => raw,
            Err(e) => return self.record_failure(&e),
        };
        let frame = match self.converter.convert(&raw) {
            Ok(frame) => frame,
            Err(e) => return self.record_failure(&e),
        };
        self.error_count = 0;

        // The recorder drops the frame itself when not recording.
        if let Err(e) = self.recorder.write(frame) {
            warn!(error = %e, seq = raw.seq, "recorder rejected frame");
        }

        if self.batch.push_rgb(frame) {
            self.analyse_batch();
        }
        Step::Distributed
    }

    /// Apply the highest-priority pending command, if any.
    pub fn service_pending(&mut self) -> bool {
        match self.pending.take_next() {
            Some(command) => {
                self.apply(command);
                true
            }
            None => false,
        }
    }

    fn record_failure(&mut self, error: &dyn Display) -> Step {
        self.error_count += 1;
        error!(
            error = %error,
            consecutive = self.error_count,
            threshold = self.settings.error_threshold,
            "frame acquisition failed"
        );

        if self.error_count > self.settings.error_threshold {
            error!(
                consecutive = self.error_count,
                state = self.state.name(),
                "too many acquisition errors, stopping acquisition; recording left untouched"
            );
            self.exhausted = true;
            return Step::Exhausted;
        }
        Step::Failed {
            consecutive: self.error_count,
        }
    }

    fn analyse_batch(&mut self) {
        let events = self.detector.tick(self.batch.frames());
        self.batch.clear();

        for event in events {
            let command = event.to_command(&mut self.names);
            info!(?event, command = command.name(), "detector event");
            self.publish(BusMessage::Capture(command));
        }
    }

    fn publish(&self, message: BusMessage) {
        let topic = message.topic();
        if let Err(e) = self.bus.publish(message) {
            warn!(error = %e, topic, "failed to publish bus message");
        }
    }

    fn apply(&mut self, command: Command) {
        debug!(command = command.name(), state = self.state.name(), "servicing command");
        match command {
            Command::Start { filename } => self.start_recording(filename),
            Command::Stop => self.stop_recording(),
            Command::Abort => self.abort_recording(),
            Command::Pause => self.pause_recording(),
            Command::Resume => self.resume_recording(),
        }
    }

    fn start_recording(&mut self, filename: String) {
        info!(filename, "starting capture");

        let folder = &self.settings.capture_folder;
        if let Err(e) = std::fs::create_dir_all(folder) {
            error!(error = %e, folder = %folder.display(), "failed to create capture folder");
            return;
        }
        let path = output_path(folder, &filename, &self.settings.extension);

        // The open session is not finalized here; the new start replaces it.
        if let Some(previous) = self.state.session() {
            warn!(
                previous = %previous.path.display(),
                next = %path.display(),
                "start received while a recording is open, previous session abandoned"
            );
        }

        match self.recorder.start_recording(&path) {
            Ok(()) => {
                self.state = RecorderState::Recording(RecordingSession {
                    filename,
                    path,
                    started_at: Local::now(),
                });
            }
            Err(e) => {
                error!(error = %e, path = %path.display(), "recorder failed to start");
            }
        }
    }

    fn stop_recording(&mut self) {
        info!("stopping capture");
        let session = std::mem::take(&mut self.state).into_session();
        let result = self.recorder.stop_recording();

        match (session, result) {
            (Some(session), Ok(())) => {
                let secs = (Local::now() - session.started_at).num_seconds();
                info!(path = %session.path.display(), secs, "capture finished, announcing upload");
                self.publish(BusMessage::upload(&session.path));
            }
            (Some(session), Err(e)) => {
                error!(
                    error = %e,
                    path = %session.path.display(),
                    "recorder failed to finalize, no upload announced"
                );
            }
            (None, Ok(())) => {
                info!("stop serviced with no open recording");
            }
            (None, Err(e)) => {
                error!(error = %e, "recorder failed to stop");
            }
        }
    }

    fn abort_recording(&mut self) {
        info!("aborting capture");
        let session = std::mem::take(&mut self.state).into_session();
        if let Err(e) = self.recorder.stop_recording() {
            error!(error = %e, "recorder failed to stop");
        }

        let Some(session) = session else {
            info!("abort serviced with no open recording");
            return;
        };
        match std::fs::remove_file(&session.path) {
            Ok(()) => info!(path = %session.path.display(), "deleted aborted recording"),
            Err(e) => {
                warn!(error = %e, path = %session.path.display(), "failed to delete aborted recording")
            }
        }
    }

    fn pause_recording(&mut self) {
        info!("pausing recording");
        self.recorder.pause();
        self.state = match std::mem::take(&mut self.state) {
            RecorderState::Recording(session) => RecorderState::Paused(session),
            other => other,
        };
    }

    fn resume_recording(&mut self) {
        info!("resuming recording");
        self.recorder.resume();
        self.state = match std::mem::take(&mut self.state) {
            RecorderState::Paused(session) => RecorderState::Recording(session),
            other => other,
        };
    }
}
