use image::GrayImage;
use tracing::{debug, info};
use visible_light_common::config::DetectorConfig;

use super::{DetectorEvent, EntryDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Active,
    Paused,
}

/// Frame-difference entry detector.
///
/// Each batch is scored by the mean absolute luma difference between its
/// consecutive frames. A run of `enter_batches` moving batches starts a
/// passage; a still batch pauses it and motion resumes it. After
/// `exit_batches` still batches the passage ends, as an exit when it moved for
/// at least `min_active_batches` batches and as an abort otherwise.
pub struct MotionEntryDetector {
    threshold: f64,
    enter_batches: u32,
    exit_batches: u32,
    min_active_batches: u32,
    phase: Phase,
    /// Consecutive moving batches seen while idle.
    warmup: u32,
    /// Moving batches in the current passage.
    active_batches: u32,
    /// Consecutive still batches while paused.
    quiet_batches: u32,
}

impl MotionEntryDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            threshold: config.motion_threshold,
            enter_batches: config.enter_batches.max(1),
            exit_batches: config.exit_batches.max(1),
            min_active_batches: config.min_active_batches,
            phase: Phase::Idle,
            warmup: 0,
            active_batches: 0,
            quiet_batches: 0,
        }
    }

    fn finish_passage(&mut self, events: &mut Vec<DetectorEvent>) {
        let event = if self.active_batches < self.min_active_batches {
            DetectorEvent::Abort
        } else {
            DetectorEvent::Exit
        };
        info!(
            active_batches = self.active_batches,
            min_active_batches = self.min_active_batches,
            ?event,
            "passage over"
        );
        events.push(event);
        self.phase = Phase::Idle;
        self.warmup = 0;
        self.active_batches = 0;
        self.quiet_batches = 0;
    }
}

impl EntryDetector for MotionEntryDetector {
    fn tick(&mut self, batch: &[GrayImage]) -> Vec<DetectorEvent> {
        let score = motion_score(batch);
        let moving = score > self.threshold;
        debug!(
            score = format!("{:.2}", score),
            threshold = self.threshold,
            moving,
            phase = ?self.phase,
            "batch analysed"
        );

        let mut events = Vec::new();
        match self.phase {
            Phase::Idle => {
                if !moving {
                    self.warmup = 0;
                    return events;
                }
                self.warmup += 1;
                if self.warmup >= self.enter_batches {
                    info!(score, "motion sustained, passage entering");
                    self.phase = Phase::Active;
                    self.active_batches = self.warmup;
                    self.warmup = 0;
                    events.push(DetectorEvent::Enter);
                }
            }
            Phase::Active => {
                if moving {
                    self.active_batches += 1;
                    return events;
                }
                self.phase = Phase::Paused;
                self.quiet_batches = 1;
                events.push(DetectorEvent::Pause);
                if self.quiet_batches >= self.exit_batches {
                    self.finish_passage(&mut events);
                }
            }
            Phase::Paused => {
                if moving {
                    self.phase = Phase::Active;
                    self.quiet_batches = 0;
                    self.active_batches += 1;
                    events.push(DetectorEvent::Resume);
                    return events;
                }
                self.quiet_batches += 1;
                if self.quiet_batches >= self.exit_batches {
                    self.finish_passage(&mut events);
                }
            }
        }
        events
    }
}

/// Mean absolute difference between consecutive frames, averaged over pairs.
fn motion_score(batch: &[GrayImage]) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for pair in batch.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.dimensions() != b.dimensions() || a.as_raw().is_empty() {
            continue;
        }
        let sum: u64 = a
            .as_raw()
            .iter()
            .zip(b.as_raw())
            .map(|(x, y)| x.abs_diff(*y) as u64)
            .sum();
        total += sum as f64 / a.as_raw().len() as f64;
        pairs += 1;
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn frame(v: u8) -> GrayImage {
        GrayImage::from_pixel(4, 2, Luma([v]))
    }

    fn moving() -> Vec<GrayImage> {
        vec![frame(0), frame(100), frame(0), frame(100)]
    }

    fn still() -> Vec<GrayImage> {
        vec![frame(50); 4]
    }

    fn detector(enter: u32, exit: u32, min_active: u32) -> MotionEntryDetector {
        MotionEntryDetector::new(&DetectorConfig {
            motion_threshold: 6.0,
            enter_batches: enter,
            exit_batches: exit,
            min_active_batches: min_active,
        })
    }

    #[test]
    fn score_of_still_batch_is_zero() {
        assert_eq!(motion_score(&still()), 0.0);
        assert_eq!(motion_score(&moving()), 100.0);
        assert_eq!(motion_score(&[]), 0.0);
    }

    #[test]
    fn enter_requires_sustained_motion() {
        let mut d = detector(2, 3, 1);
        assert!(d.tick(&moving()).is_empty());
        assert!(d.tick(&still()).is_empty(), "warmup resets on a still batch");
        assert!(d.tick(&moving()).is_empty());
        assert_eq!(d.tick(&moving()), vec![DetectorEvent::Enter]);
    }

    #[test]
    fn pause_resume_exit() {
        let mut d = detector(1, 2, 2);
        assert_eq!(d.tick(&moving()), vec![DetectorEvent::Enter]);
        assert_eq!(d.tick(&still()), vec![DetectorEvent::Pause]);
        assert_eq!(d.tick(&moving()), vec![DetectorEvent::Resume]);
        assert_eq!(d.tick(&still()), vec![DetectorEvent::Pause]);
        assert_eq!(d.tick(&still()), vec![DetectorEvent::Exit]);
        assert!(d.tick(&still()).is_empty());
    }

    #[test]
    fn short_passage_aborts() {
        let mut d = detector(1, 2, 5);
        assert_eq!(d.tick(&moving()), vec![DetectorEvent::Enter]);
        assert_eq!(d.tick(&still()), vec![DetectorEvent::Pause]);
        assert_eq!(d.tick(&still()), vec![DetectorEvent::Abort]);
    }

    #[test]
    fn single_quiet_batch_exit() {
        let mut d = detector(1, 1, 0);
        assert_eq!(d.tick(&moving()), vec![DetectorEvent::Enter]);
        assert_eq!(
            d.tick(&still()),
            vec![DetectorEvent::Pause, DetectorEvent::Exit]
        );
    }
}
