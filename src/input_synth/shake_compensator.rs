use super::Button;
use glam::Vec2;
use log::{debug, trace};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
struct Recording {
    button: Button,
    pressed_at: Instant,
    /// Cursor positions in pixels, oldest first.
    queue: VecDeque<Vec2>,
}

/// Tells a click with a shaky hand apart from the start of a drag.
///
/// While a button is held, cursor moves are recorded instead of delivered. Once the
/// movement is classified as a drag the recorded moves are handed back for replay; if
/// the button is released first they are dropped and the click lands where it started.
#[derive(Debug, Clone, PartialEq)]
pub struct ShakeCompensator {
    threshold_percent: f32,
    duration: Duration,
    recording: Option<Recording>,
}

impl ShakeCompensator {
    pub fn new(threshold_percent: f32, duration: Duration) -> Self {
        Self {
            threshold_percent,
            duration,
            recording: None,
        }
    }

    pub fn set_threshold_percent(&mut self, threshold_percent: f32) {
        self.threshold_percent = threshold_percent;
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn start_recording(&mut self, button: Button, now: Instant) {
        trace!("recording moves for {button:?}");
        self.recording = Some(Recording {
            button,
            pressed_at: now,
            queue: VecDeque::new(),
        });
    }

    /// Drops the recording and all queued moves.
    pub fn reset(&mut self) {
        self.recording = None;
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// The button that started the recording.
    pub fn button(&self) -> Option<Button> {
        self.recording.as_ref().map(|r| r.button)
    }

    pub fn record(&mut self, position: Vec2) {
        if let Some(recording) = self.recording.as_mut() {
            recording.queue.push_back(position);
        }
    }

    /// Whether the recorded movement is a drag.
    ///
    /// A press held longer than a click is always a drag. Otherwise the distance between
    /// the first and the latest recorded position, in meters on the window, is compared
    /// to the controller's distance from the window.
    pub fn is_drag(&self, pixels_per_meter: f32, controller_distance: f32, now: Instant) -> bool {
        let Some(recording) = self.recording.as_ref() else {
            return false;
        };

        if now.saturating_duration_since(recording.pressed_at) > self.duration {
            debug!("press longer than {:?}, dragging", self.duration);
            return true;
        }

        let (Some(first), Some(last)) = (recording.queue.front(), recording.queue.back()) else {
            return false;
        };
        if recording.queue.len() < 2 || pixels_per_meter <= 0.0 || controller_distance <= 0.0 {
            return false;
        }

        let meters = first.distance(*last) / pixels_per_meter;
        let percent = meters / controller_distance * 100.0;
        trace!("shake {percent:.2}% of controller distance");
        percent > self.threshold_percent
    }

    /// Ends the recording and returns the recorded moves, oldest first.
    pub fn take_queue(&mut self) -> Vec<Vec2> {
        self.recording
            .take()
            .map(|r| r.queue.into())
            .unwrap_or_default()
    }
}
