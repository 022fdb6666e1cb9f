use super::*;
use crate::controller::TransformLock;
use crate::input::backend::{RawAnalog, RawDigital, RawInputState, RawPose, RuntimeEvent};
use crate::input::devices::TrackedPose;
use crate::input::OpenVrBackend;
use crate::input_synth::ClickEvent;
use crate::window::QuadSurface;
use glam::{UVec2, Vec2, Vec3};
use std::time::Duration;

struct Fixture {
    client: Client,
    window: WindowKey,
    start: Instant,
}

impl Fixture {
    fn new() -> Self {
        crate::init_logging();
        let mut client = Client::new(OpenVrBackend::new(), Settings::default()).unwrap();
        let window = client.add_window(quad(Vec3::new(0.0, 0.0, -2.0)));
        let f = Self {
            client,
            window,
            start: Instant::now(),
        };
        f.activate(1);
        f
    }

    fn raw<R>(&self, f: impl FnOnce(&mut RawInputState<f32>) -> R) -> R {
        let mut backend = self.client.input().backend();
        let Backend::OpenVr(b) = &mut *backend else {
            panic!("not an OpenVR backend");
        };
        f(b.raw_mut())
    }

    fn activate(&self, handle: u64) {
        self.raw(|raw| {
            raw.push_event(RuntimeEvent::DeviceActivated {
                handle,
                is_controller: true,
            })
        });
    }

    fn point(&self, controller: u64, position: Vec3) {
        self.raw(|raw| {
            raw.set_pose(
                "/actions/wm/in/hand_pose",
                controller,
                RawPose {
                    active: true,
                    valid: true,
                    device_connected: true,
                    pose: Mat4::from_translation(position),
                    ..Default::default()
                },
            )
        });
    }

    fn analog(&self, url: &str, controller: u64, state: Vec2) {
        self.raw(|raw| {
            raw.set_analog(
                url,
                controller,
                RawAnalog {
                    active: true,
                    state,
                    delta: Vec2::ZERO,
                    time: 0.0,
                },
            )
        });
    }

    fn trigger(&self, controller: u64, value: f32) {
        self.analog("/actions/wm/in/grab_window", controller, Vec2::new(value, 0.0));
    }

    fn press(&self, url: &str, controller: u64, state: bool, changed: bool) {
        self.raw(|raw| {
            raw.set_digital(
                url,
                controller,
                RawDigital {
                    active: true,
                    state,
                    changed,
                    time: 0.0,
                },
            )
        });
    }

    fn frame(&mut self, ms: u64) -> Vec<ClientEvent> {
        self.client.frame(
            self.start + Duration::from_millis(ms),
            &Mat4::IDENTITY,
            &Fov::default(),
        );
        std::iter::from_fn(|| self.client.next_event()).collect()
    }

    fn controller(&self) -> Controller {
        self.client.devices().controller(1).unwrap()
    }

    /// Points at the window and pulls the trigger.
    fn grab(&mut self) {
        self.point(1, Vec3::ZERO);
        self.frame(0);
        self.trigger(1, 0.6);
        self.frame(16);
        assert_eq!(self.controller().grab_state.grabbed, Some(self.window));
    }
}

fn quad(position: Vec3) -> Window {
    let surface = QuadSurface::new(1.0, UVec2::new(100, 100))
        .with_transform(Mat4::from_translation(position));
    Window::new(
        Box::new(surface),
        WindowFlags::HOVERABLE | WindowFlags::DRAGGABLE | WindowFlags::MANAGED,
    )
}

fn window_events(events: &[ClientEvent]) -> Vec<WindowEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Window(w) => Some(*w),
            _ => None,
        })
        .collect()
}

fn synth_events(events: &[ClientEvent]) -> Vec<SynthEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Synth(s) => Some(*s),
            _ => None,
        })
        .collect()
}

#[test]
fn first_controller_becomes_primary() {
    let mut f = Fixture::new();
    let events = f.frame(0);
    assert!(events.contains(&ClientEvent::Device(DeviceEvent::Activated(1))));
    assert_eq!(f.client.input_synth().primary_controller(), Some(1));

    f.activate(2);
    f.frame(16);
    assert_eq!(f.client.input_synth().primary_controller(), Some(1));
}

#[test]
fn primary_moves_to_remaining_controller() {
    let mut f = Fixture::new();
    f.activate(2);
    f.frame(0);

    f.raw(|raw| raw.push_event(RuntimeEvent::DeviceDeactivated { handle: 1 }));
    let events = f.frame(16);
    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::Device(DeviceEvent::Deactivated(c)) if c.handle() == 1)));
    assert_eq!(f.client.input_synth().primary_controller(), Some(2));
}

#[test]
fn deactivating_mid_grab_releases_window() {
    let mut f = Fixture::new();
    f.activate(2);
    f.grab();

    f.raw(|raw| raw.push_event(RuntimeEvent::DeviceDeactivated { handle: 1 }));
    let events = window_events(&f.frame(32));
    assert_eq!(
        events[..2],
        [
            WindowEvent::Release {
                window: f.window,
                controller: 1
            },
            WindowEvent::HoverEnd {
                window: f.window,
                controller: 1
            },
        ]
    );
    assert!(!f.client.devices().contains(1));
    assert_eq!(f.client.input_synth().primary_controller(), Some(2));
}

#[test]
fn last_controller_leaving_clears_primary() {
    let mut f = Fixture::new();
    f.point(1, Vec3::ZERO);
    f.frame(0);
    f.press("/actions/mouse_synth/in/left_click", 1, true, true);
    f.frame(16);
    assert!(f.client.input_synth().is_pressed(Button::Left));

    f.raw(|raw| raw.push_event(RuntimeEvent::DeviceDeactivated { handle: 1 }));
    let events = f.frame(32);
    assert!(window_events(&events).contains(&WindowEvent::HoverEnd {
        window: f.window,
        controller: 1
    }));
    assert!(synth_events(&events).iter().any(|e| matches!(
        e,
        SynthEvent::Click(ClickEvent {
            button: Button::Left,
            state: false,
            ..
        })
    )));
    assert!(!f.client.input_synth().is_pressed(Button::Left));
    assert_eq!(f.client.input_synth().primary_controller(), None);

    f.activate(3);
    f.frame(48);
    assert_eq!(f.client.input_synth().primary_controller(), Some(3));
}

#[test]
fn invalid_settings_are_refused() {
    let broken = Settings {
        scroll_threshold: 0.0,
        ..Default::default()
    };
    assert!(matches!(
        Client::new(OpenVrBackend::new(), broken.clone()),
        Err(ClientError::Settings(SettingsError::OutOfRange("scroll-threshold")))
    ));

    let mut f = Fixture::new();
    assert!(matches!(
        f.client.apply_settings(broken),
        Err(SettingsError::OutOfRange("scroll-threshold"))
    ));
    assert_eq!(f.client.settings().scroll_threshold, 0.1);

    let finer = Settings {
        scroll_threshold: 0.05,
        ..Default::default()
    };
    f.client.apply_settings(finer).unwrap();
    assert_eq!(f.client.settings().scroll_threshold, 0.05);
}

#[test]
fn hover_moves_desktop_cursor() {
    let mut f = Fixture::new();
    f.point(1, Vec3::ZERO);
    let events = f.frame(0);

    assert!(window_events(&events).contains(&WindowEvent::HoverStart {
        window: f.window,
        controller: 1
    }));
    let synth = synth_events(&events);
    let [SynthEvent::MoveCursor(cursor)] = synth.as_slice() else {
        panic!("{synth:?}");
    };
    assert_eq!(cursor.window, f.window);
    assert!(!cursor.ignore);
    assert!(cursor.position.abs_diff_eq(Vec2::new(50.0, 50.0), 1e-3));
}

#[test]
fn invalid_pointer_does_not_hover() {
    let mut f = Fixture::new();
    f.raw(|raw| {
        raw.set_pose(
            "/actions/wm/in/hand_pose",
            1,
            RawPose {
                active: true,
                valid: true,
                device_connected: false,
                ..Default::default()
            },
        )
    });
    let events = f.frame(0);
    assert!(window_events(&events).is_empty());
    assert!(!f.controller().is_pointer_pose_valid());
}

#[test]
fn grab_drags_window() {
    let mut f = Fixture::new();
    f.grab();

    f.point(1, Vec3::new(0.5, 0.0, 0.0));
    let events = f.frame(32);
    assert!(window_events(&events)
        .iter()
        .any(|e| matches!(e, WindowEvent::Grab { window, .. } if *window == f.window)));
    let transform = f.client.window_manager().window(f.window).unwrap().transform();
    assert!(transform.abs_diff_eq(Mat4::from_translation(Vec3::new(0.5, 0.0, -2.0)), 1e-5));

    f.trigger(1, 0.0);
    let events = f.frame(48);
    assert!(window_events(&events).contains(&WindowEvent::Release {
        window: f.window,
        controller: 1
    }));
    assert!(!f.controller().is_grabbing());
}

#[test]
fn push_pull_scale_scales_grabbed_window() {
    let mut f = Fixture::new();
    f.grab();

    f.analog("/actions/wm/in/push_pull_scale", 1, Vec2::new(0.8, 0.0));
    f.frame(116);
    let scale = f.client.window_manager().window(f.window).unwrap().scale();
    // 1 + 0.8 * 0.25 * 0.1
    assert!((scale - 1.02).abs() < 1e-4, "{scale}");
    assert_eq!(f.controller().grab_state.transform_lock, TransformLock::Scale);
}

#[test]
fn button_press_does_not_drag() {
    let mut f = Fixture::new();
    let surface = QuadSurface::new(0.2, UVec2::new(64, 64));
    let button = f.client.add_button(
        Box::new(surface),
        &Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0)),
    );

    f.point(1, Vec3::ZERO);
    f.frame(0);
    assert_eq!(f.controller().hover_state.hovered, Some(button));

    f.trigger(1, 0.9);
    let events = f.frame(16);
    assert!(events.contains(&ClientEvent::ButtonPressed {
        window: button,
        controller: 1
    }));
    assert!(!f.controller().is_grabbing());
    // Buttons are not desktop windows.
    assert!(synth_events(&events).is_empty());
}

#[test]
fn menu_only_when_pointing_at_nothing() {
    let mut f = Fixture::new();
    f.point(1, Vec3::new(5.0, 0.0, 0.0));
    f.press("/actions/wm/in/menu", 1, true, true);
    let events = f.frame(0);
    assert!(events.contains(&ClientEvent::Menu { controller: 1 }));

    f.point(1, Vec3::ZERO);
    f.press("/actions/wm/in/menu", 1, false, true);
    f.frame(16);
    f.press("/actions/wm/in/menu", 1, true, true);
    let events = f.frame(32);
    assert!(!events.iter().any(|e| matches!(e, ClientEvent::Menu { .. })));
}

#[test]
fn click_starts_shake_compensation() {
    let mut f = Fixture::new();
    f.point(1, Vec3::ZERO);
    f.frame(0);

    f.press("/actions/mouse_synth/in/left_click", 1, true, true);
    let events = synth_events(&f.frame(16));
    assert!(matches!(
        events[0],
        SynthEvent::Click(ClickEvent {
            button: Button::Left,
            state: true,
            controller: Some(1),
            ..
        })
    ));
    assert!(matches!(events[1], SynthEvent::MoveCursor(m) if m.ignore));
}

#[test]
fn quit_is_forwarded() {
    let mut f = Fixture::new();
    f.raw(|raw| raw.push_event(RuntimeEvent::Quit(QuitReason::Shutdown)));
    let events = f.frame(0);
    assert!(events.contains(&ClientEvent::Quit(QuitReason::Shutdown)));
}

#[test]
fn removing_grabbed_window_releases_it() {
    let mut f = Fixture::new();
    f.grab();
    assert!(f.client.remove_window(f.window).is_some());
    assert!(!f.controller().is_grabbing());
    assert!(!f.controller().is_hovering());

    let events = f.frame(32);
    assert!(window_events(&events)
        .iter()
        .all(|e| matches!(e, WindowEvent::NoHover { .. })));
}

#[test]
fn host_feeds_device_poses() {
    let mut f = Fixture::new();
    f.frame(0);
    let head = Mat4::from_translation(Vec3::new(0.0, 1.7, 0.0));
    let devices = f.client.devices();
    devices.add(0, false).unwrap();
    devices.set_model_name(0, "headset").unwrap();
    devices.update_poses(&[TrackedPose {
        handle: 0,
        pose: head,
        valid: true,
    }]);

    f.frame(16);
    let device = f.client.devices().device(0).unwrap();
    assert_eq!(device.model_name, "headset");
    assert!(device.pose_valid);
    assert_eq!(device.pose, head);
    // Tracked poses do not touch the controller's pointer.
    assert!(!f.controller().is_pointer_pose_valid());
}
