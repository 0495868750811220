use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;
use visible_light_common::command::{BusMessage, Command};

#[derive(Debug, Default)]
struct Slots {
    start: Option<String>,
    stop: bool,
    abort: bool,
    pause: bool,
    resume: bool,
}

/// Commands waiting for the acquisition loop.
///
/// One slot per command kind; a second command of the same kind before the
/// loop services the first overwrites it. Written by the bus subscription
/// task, drained by the acquisition loop.
#[derive(Debug, Default)]
pub struct PendingCommands {
    slots: Mutex<Slots>,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // Slots hold plain flags, a panicked writer cannot leave them torn.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, command: Command) {
        debug!(command = command.name(), "command pending");
        let mut slots = self.lock();
        match command {
            Command::Start { filename } => slots.start = Some(filename),
            Command::Stop => slots.stop = true,
            Command::Abort => slots.abort = true,
            Command::Pause => slots.pause = true,
            Command::Resume => slots.resume = true,
        }
    }

    /// Record a bus message if it is a capture command. Returns whether it was one.
    pub fn accept(&self, message: &BusMessage) -> bool {
        match message {
            BusMessage::Capture(command) => {
                self.set(command.clone());
                true
            }
            BusMessage::Upload { .. } => false,
        }
    }

    /// Remove and return the highest-priority pending command:
    /// start, then stop, abort, pause, resume.
    pub fn take_next(&self) -> Option<Command> {
        let mut slots = self.lock();
        if let Some(filename) = slots.start.take() {
            return Some(Command::Start { filename });
        }
        if std::mem::take(&mut slots.stop) {
            return Some(Command::Stop);
        }
        if std::mem::take(&mut slots.abort) {
            return Some(Command::Abort);
        }
        if std::mem::take(&mut slots.pause) {
            return Some(Command::Pause);
        }
        if std::mem::take(&mut slots.resume) {
            return Some(Command::Resume);
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        let slots = self.lock();
        slots.start.is_none() && !slots.stop && !slots.abort && !slots.pause && !slots.resume
    }
}
