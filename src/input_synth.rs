mod shake_compensator;

pub use shake_compensator::ShakeCompensator;

use crate::math;
use crate::settings::Settings;
use crate::window::{Window, WindowKey};
use glam::{Mat4, Vec2, Vec3};
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Time a consumer should leave between replayed cursor moves, or the desktop may
/// coalesce them.
pub const REPLAY_INTERVAL: Duration = Duration::from_micros(100);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Button {
    Left = 1,
    Middle = 2,
    Right = 3,
    ScrollUp = 4,
    ScrollDown = 5,
    ScrollLeft = 6,
    ScrollRight = 7,
}

impl Button {
    pub const ALL: [Button; 7] = [
        Button::Left,
        Button::Middle,
        Button::Right,
        Button::ScrollUp,
        Button::ScrollDown,
        Button::ScrollLeft,
        Button::ScrollRight,
    ];

    fn mask(self) -> u32 {
        1 << self as u8
    }

    /// Buttons held long enough to shake the pointer.
    fn is_compensated(self) -> bool {
        matches!(self, Button::Left | Button::Middle | Button::Right)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ClickEvent {
    /// Window pixels.
    pub position: Vec2,
    pub button: Button,
    pub state: bool,
    pub controller: Option<u64>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MoveCursorEvent {
    pub window: WindowKey,
    /// Window pixels, origin at the top left.
    pub position: Vec2,
    /// Only the VR cursor should follow; the desktop pointer must not move.
    pub ignore: bool,
    /// Recorded during a press and delivered late, see [`REPLAY_INTERVAL`].
    pub replayed: bool,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SynthEvent {
    Click(ClickEvent),
    MoveCursor(MoveCursorEvent),
}

/// Turns the primary controller's input into desktop pointer events.
#[derive(Debug)]
pub struct InputSynth {
    primary_controller: Option<u64>,
    pressed: u32,
    hover_position: Vec2,
    hover_window: Option<WindowKey>,
    scroll_accumulator: Vec2,
    last_touch: Vec2,
    scroll_threshold: f32,
    compensation_enabled: bool,
    compensator: ShakeCompensator,
    events: VecDeque<SynthEvent>,
}

impl InputSynth {
    pub fn new(settings: &Settings) -> Self {
        Self {
            primary_controller: None,
            pressed: 0,
            hover_position: Vec2::ZERO,
            hover_window: None,
            scroll_accumulator: Vec2::ZERO,
            last_touch: Vec2::ZERO,
            scroll_threshold: settings.scroll_threshold,
            compensation_enabled: settings.shake_compensation_enabled,
            compensator: ShakeCompensator::new(
                settings.shake_compensation_threshold,
                Duration::from_millis(settings.shake_compensation_duration_ms),
            ),
            events: VecDeque::new(),
        }
    }

    pub fn apply_settings(&mut self, settings: &Settings) {
        self.scroll_threshold = settings.scroll_threshold;
        self.compensation_enabled = settings.shake_compensation_enabled;
        if !self.compensation_enabled {
            self.compensator.reset();
        }
        self.compensator
            .set_threshold_percent(settings.shake_compensation_threshold);
        self.compensator
            .set_duration(Duration::from_millis(settings.shake_compensation_duration_ms));
    }

    pub fn primary_controller(&self) -> Option<u64> {
        self.primary_controller
    }

    /// Switches input to `controller`, releasing whatever the previous one held.
    pub fn make_primary(&mut self, controller: u64) {
        self.reset_scroll();
        self.reset_press_state();
        debug!("controller {controller} is now primary");
        self.primary_controller = Some(controller);
    }

    /// Leaves input without a primary controller, releasing whatever it held.
    pub fn clear_primary(&mut self) {
        self.reset_scroll();
        self.reset_press_state();
        self.primary_controller = None;
    }

    /// Drops scroll travel that did not add up to a tick yet.
    pub fn reset_scroll(&mut self) {
        self.scroll_accumulator = Vec2::ZERO;
    }

    /// Releases every button that is still pressed.
    pub fn reset_press_state(&mut self) {
        if self.pressed == 0 {
            return;
        }
        for button in Button::ALL {
            if self.pressed & button.mask() != 0 {
                debug!("releasing {button:?}");
                self.emit_click(button, false, Instant::now());
            }
        }
        self.pressed = 0;
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.pressed & button.mask() != 0
    }

    pub fn hover_window(&self) -> Option<WindowKey> {
        self.hover_window
    }

    fn emit_click(&mut self, button: Button, state: bool, now: Instant) {
        if state && button.is_compensated() && self.compensation_enabled {
            self.compensator.start_recording(button, now);
        } else if !state && self.compensator.button() == Some(button) {
            // Released before it became a drag: a click, the shake is discarded.
            self.compensator.reset();
        }

        self.events.push_back(SynthEvent::Click(ClickEvent {
            position: self.hover_position,
            button,
            state,
            controller: self.primary_controller,
        }));
    }

    /// A digital click action. Only the primary controller clicks.
    pub fn click(&mut self, controller: u64, button: Button, state: bool, changed: bool, now: Instant) {
        if self.primary_controller != Some(controller) || !changed {
            return;
        }
        self.emit_click(button, state, now);
        if state {
            self.pressed |= button.mask();
        } else {
            self.pressed &= !button.mask();
        }
    }

    /// Left click. Pressing it on another controller makes that controller primary
    /// instead of clicking.
    pub fn left_click(&mut self, controller: u64, state: bool, changed: bool, now: Instant) {
        if state && self.primary_controller != Some(controller) {
            self.make_primary(controller);
            return;
        }
        self.click(controller, Button::Left, state, changed, now);
    }

    /// Accumulates touchpad travel and emits a scroll tick per threshold crossed.
    pub fn scroll(&mut self, controller: u64, state: Vec2, delta: Vec2) {
        if self.primary_controller != Some(controller) {
            return;
        }
        if self.scroll_threshold <= 0.0 {
            warn!("scroll threshold {} is not positive", self.scroll_threshold);
            return;
        }

        let initial_touch = self.last_touch == Vec2::ZERO;
        self.last_touch = state;
        // Lifting off and touching down report a jump from or to the pad center.
        if state == Vec2::ZERO || initial_touch {
            return;
        }

        self.scroll_accumulator += delta;
        let steps = (self.scroll_accumulator / self.scroll_threshold).trunc();
        self.scroll_accumulator -= steps * self.scroll_threshold;
        trace!("scroll steps {steps}, rest {}", self.scroll_accumulator);

        let now = Instant::now();
        let vertical = if steps.y > 0.0 {
            Button::ScrollUp
        } else {
            Button::ScrollDown
        };
        let horizontal = if steps.x < 0.0 {
            Button::ScrollLeft
        } else {
            Button::ScrollRight
        };
        for (button, count) in [(vertical, steps.y), (horizontal, steps.x)] {
            for _ in 0..count.abs() as u32 {
                self.emit_click(button, true, now);
                self.emit_click(button, false, now);
            }
        }
    }

    /// Moves the desktop cursor to where the pointer hits `window`.
    ///
    /// While a click is being told apart from a drag the move is marked `ignore`. When it
    /// turns out to be a drag, every move since the press is replayed in order.
    pub fn move_cursor(
        &mut self,
        key: WindowKey,
        window: &Window,
        controller_pose: &Mat4,
        intersection: Vec3,
        now: Instant,
    ) {
        let position = window.intersection_2d_pixels(intersection);
        self.hover_position = position;
        self.hover_window = Some(key);

        if !self.compensator.is_recording() {
            self.push_move(key, position, false, false);
            return;
        }

        self.compensator.record(position);
        let distance = math::translation(controller_pose).distance(intersection);
        if !self
            .compensator
            .is_drag(window.pixels_per_meter(), distance, now)
        {
            self.push_move(key, position, true, false);
            return;
        }

        let replay = self.compensator.take_queue();
        debug!("drag detected, replaying {} moves", replay.len());
        for position in replay {
            self.push_move(key, position, false, true);
        }
    }

    fn push_move(&mut self, window: WindowKey, position: Vec2, ignore: bool, replayed: bool) {
        self.events.push_back(SynthEvent::MoveCursor(MoveCursorEvent {
            window,
            position,
            ignore,
            replayed,
        }));
    }

    pub fn next_event(&mut self) -> Option<SynthEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{QuadSurface, WindowFlags};
    use glam::UVec2;
    use slotmap::SlotMap;

    struct Fixture {
        synth: InputSynth,
        windows: SlotMap<WindowKey, Window>,
        window: WindowKey,
        start: Instant,
    }

    impl Fixture {
        fn new() -> Self {
            crate::init_logging();
            let settings = Settings {
                scroll_threshold: 0.25,
                ..Default::default()
            };
            let mut synth = InputSynth::new(&settings);
            synth.make_primary(1);

            // 2 m wide, 100 px/m, 2 m in front of the controller.
            let surface = QuadSurface::new(2.0, UVec2::new(200, 100))
                .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0)));
            let mut windows = SlotMap::with_key();
            let window = windows.insert(Window::new(Box::new(surface), WindowFlags::HOVERABLE));
            Self {
                synth,
                windows,
                window,
                start: Instant::now(),
            }
        }

        fn point(&mut self, x: f32, ms: u64) {
            let window = &self.windows[self.window];
            self.synth.move_cursor(
                self.window,
                window,
                &Mat4::IDENTITY,
                Vec3::new(x, 0.0, -2.0),
                self.start + Duration::from_millis(ms),
            );
        }

        fn events(&mut self) -> Vec<SynthEvent> {
            std::iter::from_fn(|| self.synth.next_event()).collect()
        }
    }

    fn presses(events: &[SynthEvent], button: Button) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, SynthEvent::Click(c) if c.button == button && c.state))
            .count()
    }

    fn moves(events: &[SynthEvent]) -> Vec<MoveCursorEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                SynthEvent::MoveCursor(m) => Some(*m),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn scroll_emits_whole_ticks() {
        let mut f = Fixture::new();
        // Touch down is never scrolled.
        f.synth.scroll(1, Vec2::new(0.1, 0.0), Vec2::new(0.1, 0.0));
        assert!(f.events().is_empty());

        f.synth.scroll(1, Vec2::new(0.85, 0.0), Vec2::new(0.75, 0.0));
        let events = f.events();
        assert_eq!(presses(&events, Button::ScrollRight), 3);
        assert_eq!(events.len(), 6);
        assert!(f.synth.scroll_accumulator.length() < 1e-5);

        f.synth.scroll(1, Vec2::new(0.6, 0.0), Vec2::new(-0.2475, 0.0));
        assert!(f.events().is_empty());
        assert!(f.synth.scroll_accumulator.x < 0.0);
    }

    #[test]
    fn scroll_remainder_carries_over() {
        let mut f = Fixture::new();
        f.synth.scroll(1, Vec2::new(0.0, 0.1), Vec2::ZERO);
        f.synth.scroll(1, Vec2::new(0.0, 0.3), Vec2::new(0.0, 0.2));
        assert!(f.events().is_empty());
        f.synth.scroll(1, Vec2::new(0.0, 0.1), Vec2::new(0.0, -0.6));
        assert_eq!(presses(&f.events(), Button::ScrollDown), 1);

        // Lifting the finger is not travel.
        f.synth.scroll(1, Vec2::ZERO, Vec2::new(0.0, 5.0));
        assert!(f.events().is_empty());
    }

    #[test]
    fn only_primary_clicks() {
        let mut f = Fixture::new();
        let now = f.start;
        f.synth.click(2, Button::Right, true, true, now);
        assert!(f.events().is_empty());

        f.synth.left_click(2, true, true, now);
        assert_eq!(f.synth.primary_controller(), Some(2));
        assert!(f.events().is_empty());

        f.synth.left_click(2, true, true, now);
        assert!(f.synth.is_pressed(Button::Left));
        f.synth.make_primary(1);
        let events = f.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            SynthEvent::Click(ClickEvent {
                button: Button::Left,
                state: false,
                controller: Some(2),
                ..
            })
        ));
        assert!(!f.synth.is_pressed(Button::Left));
    }

    #[test]
    fn moves_without_press_are_delivered() {
        let mut f = Fixture::new();
        f.point(0.0, 0);
        let events = moves(&f.events());
        assert_eq!(events.len(), 1);
        assert!(!events[0].ignore);
        assert!(events[0].position.abs_diff_eq(Vec2::new(100.0, 50.0), 1e-3));
        assert_eq!(f.synth.hover_window(), Some(f.window));
    }

    #[test]
    fn shaky_click_moves_nothing() {
        let mut f = Fixture::new();
        f.synth.click(1, Button::Left, true, true, f.start);
        for (i, x) in [0.0, 0.005, -0.005, 0.01].into_iter().enumerate() {
            f.point(x, 20 * i as u64);
        }
        f.synth.click(1, Button::Left, false, true, f.start + Duration::from_millis(100));

        let events = f.events();
        assert!(moves(&events).iter().all(|m| m.ignore));
        assert!(matches!(events.last(), Some(SynthEvent::Click(c)) if !c.state));
        assert!(!f.synth.compensator.is_recording());
    }

    #[test]
    fn drag_replays_recorded_moves_in_order() {
        let mut f = Fixture::new();
        f.synth.click(1, Button::Left, true, true, f.start);
        f.point(0.0, 10);
        f.point(0.01, 20);
        f.events();

        f.point(0.02, 400);
        let replayed: Vec<_> = moves(&f.events())
            .iter()
            .map(|m| {
                assert!(!m.ignore && m.replayed);
                m.position.x
            })
            .collect();
        assert_eq!(replayed.len(), 3);
        assert!(replayed.windows(2).all(|w| w[0] < w[1]));

        // After the replay moves go straight through.
        f.point(0.03, 420);
        let events = moves(&f.events());
        assert!(!events[0].ignore && !events[0].replayed);
    }

    #[test]
    fn disabled_compensation_never_ignores() {
        let mut f = Fixture::new();
        f.synth.apply_settings(&Settings {
            shake_compensation_enabled: false,
            ..Default::default()
        });
        f.synth.click(1, Button::Left, true, true, f.start);
        f.point(0.0, 10);
        assert!(moves(&f.events()).iter().all(|m| !m.ignore));
    }
}
