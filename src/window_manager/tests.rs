use super::*;
use crate::window::QuadSurface;
use glam::UVec2;

struct Fixture {
    wm: WindowManager,
    controller: Controller,
    start: Instant,
}

impl Fixture {
    fn new() -> Self {
        crate::init_logging();
        let mut controller = Controller::new(1);
        controller.update_pointer_pose(Mat4::IDENTITY, true);
        Self {
            wm: WindowManager::new(Settings::default(), RenderLock::new()),
            controller,
            start: Instant::now(),
        }
    }

    fn add(&mut self, position: Vec3, flags: WindowFlags) -> WindowKey {
        self.wm.add_window(quad(position, flags))
    }

    fn update(&mut self) -> Vec<WindowEvent> {
        self.wm.update_controller(&mut self.controller);
        std::iter::from_fn(|| self.wm.next_event()).collect()
    }

    fn grab(&mut self, window: WindowKey) {
        self.update();
        assert_eq!(self.controller.hover_state.hovered, Some(window));
        assert!(self.wm.drag_start(&mut self.controller));
    }

    fn at(&self, ms: u64) -> Instant {
        self.start + Duration::from_millis(ms)
    }
}

fn quad(position: Vec3, flags: WindowFlags) -> Window {
    let surface = QuadSurface::new(1.0, UVec2::new(100, 100))
        .with_transform(Mat4::from_translation(position));
    Window::new(Box::new(surface), flags)
}

fn interactive() -> WindowFlags {
    WindowFlags::HOVERABLE | WindowFlags::DRAGGABLE | WindowFlags::MANAGED
}

#[test]
fn closest_window_is_hovered() {
    let mut f = Fixture::new();
    let _far = f.add(Vec3::new(0.0, 0.0, -5.0), interactive());
    let near = f.add(Vec3::new(0.0, 0.0, -2.0), interactive());

    let events = f.update();
    let [WindowEvent::HoverStart { window, controller: 1 }, WindowEvent::Hover(hover)] =
        events.as_slice()
    else {
        panic!("{events:?}");
    };
    assert_eq!(*window, near);
    assert_eq!(hover.window, near);
    assert!((hover.distance - 2.0).abs() < 1e-5);
    assert!(hover.intersection_2d.abs_diff_eq(Vec2::ZERO, 1e-5));
    assert_eq!(f.controller.hover_state.hovered, Some(near));
}

#[test]
fn switching_windows_ends_previous_hover_first() {
    let mut f = Fixture::new();
    let far = f.add(Vec3::new(0.0, 0.0, -5.0), interactive());
    let near = f.add(Vec3::new(0.0, 0.0, -2.0), interactive());
    f.update();

    f.wm.set_visible(near, false);
    let events = f.update();
    assert_eq!(
        events[..2],
        [
            WindowEvent::HoverEnd {
                window: near,
                controller: 1
            },
            WindowEvent::HoverStart {
                window: far,
                controller: 1
            },
        ]
    );
    assert!(matches!(events[2], WindowEvent::Hover(h) if h.window == far));

    // Same window again: only a hover update.
    let events = f.update();
    assert!(matches!(events.as_slice(), [WindowEvent::Hover(_)]));
}

#[test]
fn no_hover_end_without_previous_hover() {
    let mut f = Fixture::new();
    f.add(Vec3::new(0.0, 0.0, 2.0), interactive());

    let events = f.update();
    let [WindowEvent::NoHover { controller: 1, point }] = events.as_slice() else {
        panic!("{events:?}");
    };
    assert!(point.abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), 1e-5));
}

#[test]
fn leaving_window_ends_hover() {
    let mut f = Fixture::new();
    let window = f.add(Vec3::new(0.0, 0.0, -2.0), interactive());
    f.update();

    f.controller
        .update_pointer_pose(Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0)), true);
    let events = f.update();
    assert!(matches!(events[0], WindowEvent::NoHover { .. }));
    assert_eq!(
        events[1],
        WindowEvent::HoverEnd {
            window,
            controller: 1
        }
    );
    assert!(!f.controller.is_hovering());
    assert_eq!(f.controller.hover_state.distance, 1.0);
}

#[test]
fn buttons_only_skips_regular_windows() {
    let mut f = Fixture::new();
    f.add(Vec3::new(0.0, 0.0, -2.0), interactive());
    let button = f.add(
        Vec3::new(0.0, 0.0, -5.0),
        WindowFlags::HOVERABLE | WindowFlags::BUTTON,
    );
    f.wm.set_hover_mode(HoverMode::ButtonsOnly);

    f.update();
    assert_eq!(f.controller.hover_state.hovered, Some(button));
}

#[test]
fn drag_follows_controller() {
    let mut f = Fixture::new();
    let window = f.add(Vec3::new(0.0, 0.0, -2.0), interactive());
    f.grab(window);

    f.wm.check_grab(&f.controller);
    assert_eq!(
        f.wm.next_event(),
        Some(WindowEvent::GrabStart {
            window,
            controller: 1
        })
    );

    f.controller
        .update_pointer_pose(Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0)), true);
    let events = f.update();
    let [WindowEvent::Grab { pose, .. }] = events.as_slice() else {
        panic!("{events:?}");
    };
    let expected = Mat4::from_translation(Vec3::new(1.0, 0.0, -2.0));
    assert!(pose.abs_diff_eq(expected, 1e-5));
    assert!(f.wm.window(window).unwrap().transform().abs_diff_eq(expected, 1e-5));

    f.wm.check_release(&mut f.controller);
    assert_eq!(
        f.wm.next_event(),
        Some(WindowEvent::Release {
            window,
            controller: 1
        })
    );
    assert!(!f.controller.is_grabbing());
}

#[test]
fn fixed_windows_are_not_dragged() {
    let mut f = Fixture::new();
    f.add(Vec3::new(0.0, 0.0, -2.0), WindowFlags::HOVERABLE);
    f.update();
    assert!(!f.wm.drag_start(&mut f.controller));
    assert!(!f.controller.is_grabbing());
}

#[test]
fn scale_is_clamped_and_moves_pivot() {
    let mut f = Fixture::new();
    let window = f.add(Vec3::new(0.0, 0.0, -2.0), interactive());
    f.grab(window);
    f.controller.grab_state.grab_offset = Vec2::new(0.1, 0.0);

    f.wm.scale(&mut f.controller, 1.0, 500.0);
    assert!((f.wm.window(window).unwrap().scale() - 1.5).abs() < 1e-5);
    assert!((f.controller.grab_state.grab_offset.x - 0.15).abs() < 1e-5);

    f.wm.scale(&mut f.controller, 1000.0, 1000.0);
    assert_eq!(f.wm.window(window).unwrap().scale(), 15.0);

    f.wm.scale(&mut f.controller, -1000.0, 1000.0);
    assert_eq!(f.wm.window(window).unwrap().scale(), 0.05);
}

#[test]
fn push_pull_is_clamped() {
    let mut f = Fixture::new();
    let window = f.add(Vec3::new(0.0, 0.0, -2.0), interactive());
    f.grab(window);

    // 2 + 2 * 2.0 * 0.5 * 0.1
    f.wm.push_pull(&mut f.controller, 0.5, 100.0);
    assert!((f.controller.hover_state.distance - 2.2).abs() < 1e-5);

    f.wm.push_pull(&mut f.controller, 100.0, 1000.0);
    assert_eq!(f.controller.hover_state.distance, 15.0);
    f.wm.push_pull(&mut f.controller, -100.0, 1000.0);
    assert_eq!(f.controller.hover_state.distance, 0.05);
}

#[test]
fn first_axis_locks_gesture() {
    let mut f = Fixture::new();
    let window = f.add(Vec3::new(0.0, 0.0, -2.0), interactive());

    // Without a grab nothing happens.
    f.wm.update_pose(&mut f.controller, Vec2::new(0.8, 0.0), 100.0);
    assert_eq!(f.controller.grab_state.transform_lock, TransformLock::None);

    f.grab(window);
    f.wm.update_pose(&mut f.controller, Vec2::new(0.5, 0.2), 100.0);
    assert_eq!(f.controller.grab_state.transform_lock, TransformLock::Scale);
    assert!(f.wm.window(window).unwrap().scale() > 1.0);

    f.wm.update_pose(&mut f.controller, Vec2::new(0.0, 0.9), 100.0);
    assert_eq!(f.controller.grab_state.transform_lock, TransformLock::Scale);
    assert!((f.controller.hover_state.distance - 2.0).abs() < 1e-5);

    f.wm.update_pose(&mut f.controller, Vec2::new(0.05, 0.05), 100.0);
    assert_eq!(f.controller.grab_state.transform_lock, TransformLock::None);

    f.wm.update_pose(&mut f.controller, Vec2::new(0.0, 0.9), 100.0);
    assert_eq!(f.controller.grab_state.transform_lock, TransformLock::PushPull);
    assert!(f.controller.hover_state.distance > 2.0);
}

#[test]
fn equal_axes_lock_push_pull() {
    let mut f = Fixture::new();
    let window = f.add(Vec3::new(0.0, 0.0, -2.0), interactive());
    f.grab(window);

    f.wm.update_pose(&mut f.controller, Vec2::new(0.6, -0.6), 100.0);
    assert_eq!(f.controller.grab_state.transform_lock, TransformLock::PushPull);
    assert!(f.controller.hover_state.distance < 2.0);
    assert_eq!(f.wm.window(window).unwrap().scale(), 1.0);
}

#[test]
fn zero_scale_window_is_not_scaled() {
    let mut f = Fixture::new();
    let window = f.add(Vec3::new(0.0, 0.0, -2.0), interactive());
    f.grab(window);
    f.controller.grab_state.grab_offset = Vec2::new(0.1, 0.0);
    f.wm.set_scale(window, 0.0);

    f.wm.scale(&mut f.controller, 1.0, 500.0);
    assert_eq!(f.wm.window(window).unwrap().scale(), 0.0);
    assert_eq!(f.controller.grab_state.grab_offset, Vec2::new(0.1, 0.0));
}

#[test]
fn released_controller_ends_grab_and_hover() {
    let mut f = Fixture::new();
    let window = f.add(Vec3::new(0.0, 0.0, -2.0), interactive());
    f.grab(window);
    while f.wm.next_event().is_some() {}

    f.wm.release_controller(&mut f.controller);
    let events: Vec<_> = std::iter::from_fn(|| f.wm.next_event()).collect();
    assert_eq!(
        events,
        vec![
            WindowEvent::Release {
                window,
                controller: 1
            },
            WindowEvent::HoverEnd {
                window,
                controller: 1
            },
        ]
    );
    assert!(!f.controller.is_grabbing());
    assert!(!f.controller.is_hovering());

    f.wm.release_controller(&mut f.controller);
    assert_eq!(f.wm.next_event(), None);
}

#[test]
fn arrange_reset_animates_back() {
    let mut f = Fixture::new();
    let home = Vec3::new(0.0, 1.0, -2.0);
    let window = f.add(home, interactive());
    assert_eq!(f.wm.arrange_reset(f.at(0)), 0);

    let moved = Mat4::from_translation(Vec3::new(2.0, 1.0, -3.0));
    f.wm.set_transform(window, &moved);
    f.wm.set_scale(window, 2.0);
    assert_eq!(f.wm.arrange_reset(f.at(0)), 1);
    assert!(f.wm.is_animating());

    f.wm.step_transitions(f.at(375));
    let halfway = f.wm.window(window).unwrap();
    let position = math::translation(&halfway.transform());
    assert!(position.x > 0.0 && position.x < 2.0);
    assert!(halfway.scale() > 1.0 && halfway.scale() < 2.0);

    f.wm.step_transitions(f.at(800));
    assert!(!f.wm.is_animating());
    let window = f.wm.window(window).unwrap();
    assert!(math::poses_equal(&window.transform(), &Mat4::from_translation(home)));
    assert_eq!(window.scale(), 1.0);
}

#[test]
fn sphere_grid_faces_head() {
    let mut f = Fixture::new();
    let windows: Vec<_> = (0..6)
        .map(|_| f.add(Vec3::ZERO, interactive()))
        .collect();
    f.add(Vec3::ZERO, WindowFlags::HOVERABLE);

    let head = Mat4::IDENTITY;
    assert_eq!(f.wm.arrange_sphere(&head, f.at(0)), 6);
    f.wm.step_transitions(f.at(1000));

    let positions: Vec<Vec3> = windows
        .iter()
        .map(|k| math::translation(&f.wm.window(*k).unwrap().transform()))
        .collect();
    for (i, p) in positions.iter().enumerate() {
        assert!((p.length() - 5.0).abs() < 1e-4, "{p}");
        assert!(p.z < 0.0, "{p}");
        for q in &positions[i + 1..] {
            assert!(p.distance(*q) > 0.1);
        }
    }
    // Two rows of three, filled from the top left.
    assert!(positions[0].y > 0.0 && positions[3].y < 0.0);
    assert!(positions[0].x < positions[1].x && positions[1].x < positions[2].x);
    assert!(positions[1].x.abs() < 1e-4);

    // Each window's front faces the head.
    let w = f.wm.window(windows[0]).unwrap().transform();
    let normal = w.transform_vector3(Vec3::Z);
    assert!(normal.dot(-positions[0].normalize()) > 0.999);
}

#[test]
fn sphere_single_window_is_straight_ahead() {
    let f = Fixture::new();
    let poses = f.wm.sphere_poses(&Mat4::IDENTITY, 1);
    assert!(math::translation(&poses[0]).abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), 1e-4));
    assert!(f.wm.sphere_poses(&Mat4::IDENTITY, 0).is_empty());
}

#[test]
fn child_moves_and_dies_with_parent() {
    let mut f = Fixture::new();
    let parent = f.add(Vec3::new(0.0, 0.0, -2.0), interactive());
    let child = f
        .wm
        .add_child(
            parent,
            quad(Vec3::ZERO, WindowFlags::HOVERABLE | WindowFlags::DESTROY_WITH_PARENT),
            Vec2::new(10.0, 0.0),
        )
        .unwrap();
    assert_eq!(f.wm.window(parent).unwrap().child(), Some(child));

    f.wm.set_transform(parent, &Mat4::from_translation(Vec3::new(1.0, 0.0, -2.0)));
    let position = math::translation(&f.wm.window(child).unwrap().transform());
    assert!(position.abs_diff_eq(Vec3::new(1.1, 0.0, -1.99), 1e-5));

    f.wm.remove_window(parent);
    assert!(f.wm.window(child).is_none());
    assert!(f.wm.is_empty());
}

#[test]
fn pinned_only_hides_unpinned() {
    let mut f = Fixture::new();
    let pinned = f.add(Vec3::new(0.0, 0.0, -2.0), interactive());
    let other = f.add(Vec3::new(0.0, 0.0, -5.0), interactive());
    f.wm.set_pinned(pinned, true);

    f.wm.show_pinned_only(true);
    assert!(f.wm.window(pinned).unwrap().is_visible());
    assert!(!f.wm.window(other).unwrap().is_visible());
    let late = f.add(Vec3::ZERO, interactive());
    assert!(!f.wm.window(late).unwrap().is_visible());

    f.wm.show_pinned_only(false);
    assert!(f.wm.window(other).unwrap().is_visible());
}

#[test]
fn container_visibility_cascades() {
    let mut f = Fixture::new();
    let window = f.add(Vec3::new(0.0, 0.0, -2.0), interactive());
    let container = f.wm.new_container();
    assert!(f.wm.add_to_container(container, window, None));

    f.wm.set_container_visible(container, false);
    assert!(!f.wm.window(window).unwrap().is_visible());

    f.wm
        .center_container(container, &Mat4::IDENTITY, 3.0)
        .unwrap()
        .unwrap();
    let position = math::translation(&f.wm.window(window).unwrap().transform());
    assert!(position.abs_diff_eq(Vec3::new(0.0, 0.0, -3.0), 1e-5));

    f.wm.remove_window(window);
    assert_eq!(f.wm.container(container).unwrap().windows().count(), 0);
}
