#[cfg(test)]
mod tests;

pub use crate::window::WindowKey;

use crate::container::{Container, ContainerError, ContainerKey, Fov};
use crate::controller::{Controller, TransformLock};
use crate::input::devices::DeviceManager;
use crate::math;
use crate::render_lock::RenderLock;
use crate::settings::Settings;
use crate::window::{ChildLink, Window, WindowFlags};
use glam::{Mat4, Vec2, Vec3};
use log::{debug, trace, warn};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::time::{Duration, Instant};

const TRANSITION_DURATION: Duration = Duration::from_millis(750);
const SPHERE_FOV: f32 = PI / 2.5;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum HoverMode {
    #[default]
    Everything,
    /// Only windows flagged as buttons can be hovered.
    ButtonsOnly,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HoverEvent {
    pub window: WindowKey,
    pub controller: u64,
    /// Distance from the controller to `point`.
    pub distance: f32,
    pub point: Vec3,
    /// Offset of `point` from the window center, in meters.
    pub intersection_2d: Vec2,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum WindowEvent {
    HoverStart { window: WindowKey, controller: u64 },
    Hover(HoverEvent),
    HoverEnd { window: WindowKey, controller: u64 },
    /// The controller points at nothing; `point` is the end of its default length ray.
    NoHover { controller: u64, point: Vec3 },
    GrabStart { window: WindowKey, controller: u64 },
    Grab { window: WindowKey, controller: u64, pose: Mat4 },
    Release { window: WindowKey, controller: u64 },
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct Transition {
    from: Mat4,
    to: Mat4,
    from_scale: f32,
    to_scale: f32,
    progress: f32,
    last_step: Instant,
}

/// Owns the windows in the scene and decides what each controller hovers and grabs.
pub struct WindowManager {
    windows: SlotMap<WindowKey, Window>,
    /// Insertion order.
    order: Vec<WindowKey>,
    containers: SlotMap<ContainerKey, Container>,
    transitions: SecondaryMap<WindowKey, Transition>,
    hover_mode: HoverMode,
    pinned_only: bool,
    settings: Settings,
    render_lock: RenderLock,
    events: VecDeque<WindowEvent>,
}

impl WindowManager {
    pub fn new(settings: Settings, render_lock: RenderLock) -> Self {
        Self {
            windows: SlotMap::with_key(),
            order: Vec::new(),
            containers: SlotMap::with_key(),
            transitions: SecondaryMap::new(),
            hover_mode: HoverMode::Everything,
            pinned_only: false,
            settings,
            render_lock,
            events: VecDeque::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    pub fn add_window(&mut self, mut window: Window) -> WindowKey {
        let _guard = self.render_lock.lock();
        if self.pinned_only && !window.is_pinned() && !window.is_button() {
            window.set_visible(false);
        }
        let key = self.windows.insert(window);
        self.order.push(key);
        debug!("added window {key:?}");
        key
    }

    /// Adds `window` in front of `parent`, centered at `offset_center` parent pixels from
    /// the parent's center. A parent has at most one child.
    pub fn add_child(
        &mut self,
        parent: WindowKey,
        mut window: Window,
        offset_center: Vec2,
    ) -> Option<WindowKey> {
        let parent_window = self.windows.get(parent)?;
        if parent_window.child.is_some() {
            warn!("window {parent:?} already has a child");
            return None;
        }

        window.set_transform(&parent_window.child_transform(offset_center));
        window.parent = Some(parent);
        let key = self.add_window(window);
        if let Some(parent_window) = self.windows.get_mut(parent) {
            parent_window.child = Some(ChildLink {
                window: key,
                offset_center,
            });
        }
        Some(key)
    }

    /// Removes a window, its child if flagged [`WindowFlags::DESTROY_WITH_PARENT`], and
    /// its membership in containers.
    pub fn remove_window(&mut self, key: WindowKey) -> Option<Window> {
        let render_lock = self.render_lock.clone();
        let _guard = render_lock.lock();
        let window = self.windows.remove(key)?;
        self.order.retain(|k| *k != key);
        self.transitions.remove(key);
        for container in self.containers.values_mut() {
            container.remove_window(key);
        }

        if let Some(parent) = window.parent.and_then(|p| self.windows.get_mut(p)) {
            parent.child = None;
        }
        if let Some(link) = window.child {
            let destroy = self
                .windows
                .get(link.window)
                .is_some_and(|c| c.flags().contains(WindowFlags::DESTROY_WITH_PARENT));
            if destroy {
                self.remove_window(link.window);
            } else if let Some(child) = self.windows.get_mut(link.window) {
                child.parent = None;
            }
        }

        debug!("removed window {key:?}");
        Some(window)
    }

    pub fn window(&self, key: WindowKey) -> Option<&Window> {
        self.windows.get(key)
    }

    /// All windows in insertion order.
    pub fn windows(&self) -> impl Iterator<Item = (WindowKey, &Window)> {
        self.order.iter().filter_map(|k| Some((*k, self.windows.get(*k)?)))
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Moves a window and its child.
    pub fn set_transform(&mut self, key: WindowKey, transform: &Mat4) -> bool {
        if !self.windows.contains_key(key) {
            return false;
        }
        let _guard = self.render_lock.lock();
        let mut next = Some((key, *transform));
        while let Some((key, transform)) = next.take() {
            let Some(window) = self.windows.get_mut(key) else {
                break;
            };
            window.set_transform(&transform);
            next = window
                .child
                .map(|link| (link.window, window.child_transform(link.offset_center)));
        }
        true
    }

    pub fn set_scale(&mut self, key: WindowKey, scale: f32) -> bool {
        let _guard = self.render_lock.lock();
        let Some(window) = self.windows.get_mut(key) else {
            return false;
        };
        window.set_scale(scale);
        true
    }

    pub fn save_reset_transform(&mut self, key: WindowKey) {
        if let Some(window) = self.windows.get_mut(key) {
            window.save_reset_transform();
        }
    }

    pub fn set_visible(&mut self, key: WindowKey, visible: bool) {
        if let Some(window) = self.windows.get_mut(key) {
            window.set_visible(visible);
        }
    }

    pub fn hover_mode(&self) -> HoverMode {
        self.hover_mode
    }

    pub fn set_hover_mode(&mut self, mode: HoverMode) {
        debug!("hover mode {mode:?}");
        self.hover_mode = mode;
    }

    pub fn set_pinned(&mut self, key: WindowKey, pinned: bool) {
        let hide_unpinned = self.pinned_only;
        if let Some(window) = self.windows.get_mut(key) {
            window.set_pin(pinned, hide_unpinned);
        }
    }

    /// With `pinned_only`, only pinned windows and buttons stay visible.
    pub fn show_pinned_only(&mut self, pinned_only: bool) {
        self.pinned_only = pinned_only;
        for window in self.windows.values_mut().filter(|w| !w.is_button()) {
            window.set_pin(window.is_pinned(), pinned_only);
        }
    }

    pub fn is_pinned_only(&self) -> bool {
        self.pinned_only
    }

    pub fn add_container(&mut self, container: Container) -> ContainerKey {
        self.containers.insert(container)
    }

    /// A container using the configured FOV fractions.
    pub fn new_container(&mut self) -> ContainerKey {
        let container = Container::new()
            .with_fov_fractions(self.settings.fov_inner, self.settings.fov_outer);
        self.add_container(container)
    }

    pub fn remove_container(&mut self, key: ContainerKey) -> Option<Container> {
        self.containers.remove(key)
    }

    pub fn container(&self, key: ContainerKey) -> Option<&Container> {
        self.containers.get(key)
    }

    pub fn container_mut(&mut self, key: ContainerKey) -> Option<&mut Container> {
        self.containers.get_mut(key)
    }

    pub fn add_to_container(
        &mut self,
        key: ContainerKey,
        window: WindowKey,
        relative: Option<Mat4>,
    ) -> bool {
        let Some(container) = self.containers.get_mut(key) else {
            return false;
        };
        let visible = container.is_visible();
        container.add_window(window, relative);
        self.set_visible(window, visible);
        true
    }

    /// Shows or hides a container and all of its windows.
    pub fn set_container_visible(&mut self, key: ContainerKey, visible: bool) {
        let Some(container) = self.containers.get_mut(key) else {
            return;
        };
        container.set_visible(visible);
        let members: Vec<_> = container.windows().collect();
        for window in members {
            self.set_visible(window, visible);
        }
    }

    pub fn center_container(
        &mut self,
        key: ContainerKey,
        head: &Mat4,
        distance: f32,
    ) -> Option<Result<(), ContainerError>> {
        let container = self.containers.get_mut(key)?;
        let placed = container.center_view(head, distance, &self.windows);
        Some(placed.map(|placed| self.apply_placement(placed)))
    }

    /// Steps every container. Failing containers are logged and left where they are.
    pub fn step_containers(&mut self, head: &Mat4, fov: &Fov, devices: &DeviceManager, now: Instant) {
        let keys: Vec<_> = self.containers.keys().collect();
        for key in keys {
            let placed = self.containers[key].step(head, fov, devices, &self.windows, now);
            match placed {
                Ok(placed) => self.apply_placement(placed),
                Err(e) => warn!("Failed to step container {key:?}: {e}"),
            }
        }
    }

    fn apply_placement(&mut self, placed: Vec<(WindowKey, Mat4)>) {
        for (window, transform) in placed {
            self.set_transform(window, &transform);
        }
    }

    fn hover_target(&self, controller: &Controller) -> Option<(WindowKey, Vec3, f32)> {
        let ray = controller.pointer_ray();
        let mut closest: Option<(WindowKey, Vec3, f32)> = None;

        for (key, window) in self.windows() {
            let flags = window.flags();
            if !window.is_visible() || !flags.contains(WindowFlags::HOVERABLE) {
                continue;
            }
            if self.hover_mode == HoverMode::ButtonsOnly && !window.is_button() {
                continue;
            }
            let Some(hit) = window.intersect(&ray) else {
                continue;
            };
            let distance = controller.distance_to(hit.point);
            if closest.map_or(true, |(_, _, d)| distance < d) {
                closest = Some((key, hit.point, distance));
            }
        }
        closest
    }

    /// Per-frame update of one controller: drags the grabbed window, or finds the hovered
    /// window and emits hover events.
    pub fn update_controller(&mut self, controller: &mut Controller) {
        let handle = controller.handle();

        if let Some(window) = controller.grab_state.grabbed {
            let Some(pose) = controller.drag_pose() else {
                return;
            };
            if !self.set_transform(window, &pose) {
                warn!("grabbed window {window:?} is gone, releasing");
                controller.reset_grab_state();
                return;
            }
            self.events.push_back(WindowEvent::Grab {
                window,
                controller: handle,
                pose,
            });
            return;
        }

        let last = controller.hover_state.hovered;
        let Some((window, point, distance)) = self.hover_target(controller) else {
            self.events.push_back(WindowEvent::NoHover {
                controller: handle,
                point: controller.default_tip_position(),
            });
            if let Some(last) = last {
                controller.reset_hover_state();
                self.events.push_back(WindowEvent::HoverEnd {
                    window: last,
                    controller: handle,
                });
            }
            return;
        };

        let intersection_2d = self.windows[window].intersection_2d(point);
        controller.set_hovered(window, distance, intersection_2d);

        if last != Some(window) {
            if let Some(last) = last {
                self.events.push_back(WindowEvent::HoverEnd {
                    window: last,
                    controller: handle,
                });
            }
            self.events.push_back(WindowEvent::HoverStart {
                window,
                controller: handle,
            });
        }
        self.events.push_back(WindowEvent::Hover(HoverEvent {
            window,
            controller: handle,
            distance,
            point,
            intersection_2d,
        }));
    }

    /// The grab button was pressed: announces a grab of the hovered window.
    pub fn check_grab(&mut self, controller: &Controller) {
        let Some(window) = controller.hover_state.hovered else {
            return;
        };
        self.events.push_back(WindowEvent::GrabStart {
            window,
            controller: controller.handle(),
        });
    }

    /// Starts dragging the hovered window, if it is draggable.
    pub fn drag_start(&mut self, controller: &mut Controller) -> bool {
        let Some(window) = controller.hover_state.hovered else {
            return false;
        };
        let Some(pose) = self
            .windows
            .get(window)
            .filter(|w| w.flags().contains(WindowFlags::DRAGGABLE))
            .map(Window::transform)
        else {
            return false;
        };
        self.transitions.remove(window);
        controller.drag_start(window, &pose);
        true
    }

    pub fn check_release(&mut self, controller: &mut Controller) {
        let Some(window) = controller.grab_state.grabbed else {
            return;
        };
        self.events.push_back(WindowEvent::Release {
            window,
            controller: controller.handle(),
        });
        controller.reset_grab_state();
    }

    /// Ends the grab and hover of a controller that is going away.
    pub fn release_controller(&mut self, controller: &mut Controller) {
        self.check_release(controller);
        if let Some(window) = controller.hover_state.hovered {
            controller.reset_hover_state();
            self.events.push_back(WindowEvent::HoverEnd {
                window,
                controller: controller.handle(),
            });
        }
    }

    /// Grows the grabbed window by `factor` per second, within the configured scale range.
    pub fn scale(&mut self, controller: &mut Controller, factor: f32, dt_ms: f32) {
        let Some(key) = controller.grab_state.grabbed else {
            return;
        };
        let Some(current) = self.windows.get(key).map(Window::scale) else {
            return;
        };
        if current <= f32::EPSILON {
            warn!("can't scale {key:?} from scale {current}");
            return;
        }

        let requested = current + current * factor * (dt_ms / 1000.0);
        let new_scale = requested.clamp(self.settings.min_window_scale, self.settings.max_window_scale);
        if new_scale != requested {
            trace!("scale {requested} clamped to {new_scale}");
        }

        // The grab point is relative to the window center, so it scales along.
        controller.grab_state.grab_offset *= new_scale / current;
        self.set_scale(key, new_scale);
    }

    /// Moves the grabbed window along the pointer ray, proportionally to its distance.
    pub fn push_pull(&self, controller: &mut Controller, strength: f32, dt_ms: f32) {
        let distance = controller.hover_state.distance;
        let requested = distance
            + distance * self.settings.scroll_to_push_ratio * strength * (dt_ms / 1000.0);
        controller.hover_state.distance = requested.clamp(
            self.settings.min_window_distance,
            self.settings.max_window_distance,
        );
    }

    /// Handles the 2D push/pull/scale input of a grabbing controller.
    ///
    /// The first axis to leave the dead zone locks the gesture to scaling (x) or
    /// pushing (y) until both axes are back in the dead zone.
    pub fn update_pose(&mut self, controller: &mut Controller, state: Vec2, dt_ms: f32) {
        if !controller.is_grabbing() {
            return;
        }

        let threshold = self.settings.analog_threshold;
        let (x, y) = (state.x.abs(), state.y.abs());
        if x < threshold && y < threshold {
            controller.grab_state.transform_lock = TransformLock::None;
            return;
        }

        let handle = controller.handle();
        let lock = &mut controller.grab_state.transform_lock;
        if *lock == TransformLock::None {
            *lock = if x > y {
                TransformLock::Scale
            } else {
                TransformLock::PushPull
            };
            debug!("controller {handle} locked to {lock:?}");
        }

        match controller.grab_state.transform_lock {
            TransformLock::Scale => {
                let factor = state.x * self.settings.scroll_to_scale_ratio;
                self.scale(controller, factor, dt_ms);
            }
            TransformLock::PushPull => self.push_pull(controller, state.y, dt_ms),
            TransformLock::None => {}
        }
    }

    fn start_transition(&mut self, key: WindowKey, to: Mat4, now: Instant) -> bool {
        let Some(window) = self.windows.get(key) else {
            return false;
        };
        let from = window.transform();
        if math::poses_equal(&from, &to) {
            return false;
        }
        self.transitions.insert(
            key,
            Transition {
                from,
                to,
                from_scale: window.scale(),
                to_scale: 1.0,
                progress: 0.0,
                last_step: now,
            },
        );
        true
    }

    fn managed(&self) -> Vec<WindowKey> {
        self.windows()
            .filter(|(_, w)| w.flags().contains(WindowFlags::MANAGED))
            .map(|(k, _)| k)
            .collect()
    }

    /// Animates every managed window back to its reset pose at scale 1.
    pub fn arrange_reset(&mut self, now: Instant) -> usize {
        let started = self
            .managed()
            .into_iter()
            .filter(|key| {
                let to = self.windows[*key].reset_transform();
                self.start_transition(*key, to, now)
            })
            .count();
        debug!("arrange reset: {started} windows moving");
        started
    }

    /// Target poses of `count` windows on a sphere around the head, facing it.
    pub fn sphere_poses(&self, head: &Mat4, count: usize) -> Vec<Mat4> {
        if count == 0 {
            return Vec::new();
        }
        let rows = (count as f32).sqrt() as usize;
        let mut cols = count / rows;
        while rows * cols < count {
            cols += 1;
        }

        // Polar angle from +Y, so the top row has the smallest theta.
        let theta_center = PI / 2.0;
        let theta_step = if rows > 1 { SPHERE_FOV / (rows - 1) as f32 } else { 0.0 };
        let theta_start = if rows > 1 {
            theta_center - SPHERE_FOV / 2.0
        } else {
            theta_center
        };

        let phi_center = -PI / 2.0 + math::azimuth_from_pose(head);
        let phi_start = phi_center - SPHERE_FOV / 2.0;
        let phi_step = if cols > 1 { SPHERE_FOV / (cols - 1) as f32 } else { 0.0 };
        let phi_start = if cols > 1 { phi_start } else { phi_center };

        let radius = self.settings.sphere_radius;
        let head_position = math::translation(head);
        (0..count)
            .map(|i| {
                let (row, col) = (i / cols, i % cols);
                let theta = theta_start + row as f32 * theta_step;
                let phi = phi_start + col as f32 * phi_step;
                let direction = Vec3::new(
                    theta.sin() * phi.cos(),
                    theta.cos(),
                    phi.sin() * theta.sin(),
                );
                math::head_facing_pose(head, head_position + direction * radius)
            })
            .collect()
    }

    /// Animates the managed windows, in insertion order, onto a grid on a sphere in
    /// front of the head.
    pub fn arrange_sphere(&mut self, head: &Mat4, now: Instant) -> usize {
        let managed = self.managed();
        let poses = self.sphere_poses(head, managed.len());
        let started = managed
            .into_iter()
            .zip(poses)
            .filter(|(key, pose)| self.start_transition(*key, *pose, now))
            .count();
        debug!("arrange sphere: {started} windows moving");
        started
    }

    pub fn is_animating(&self) -> bool {
        !self.transitions.is_empty()
    }

    /// Advances running arrange animations.
    pub fn step_transitions(&mut self, now: Instant) {
        if self.transitions.is_empty() {
            return;
        }
        let render_lock = self.render_lock.clone();
        let _guard = render_lock.lock();
        let mut done = Vec::new();
        let mut updates = Vec::new();

        for (key, transition) in self.transitions.iter_mut() {
            let elapsed = now.saturating_duration_since(transition.last_step);
            transition.last_step = now;
            transition.progress += elapsed.as_secs_f32() / TRANSITION_DURATION.as_secs_f32();

            if transition.progress >= 1.0 {
                updates.push((key, transition.to, transition.to_scale));
                done.push(key);
                continue;
            }
            let curve = math::ease_out_quart(transition.progress);
            let transform = math::interpolate_matrix(&transition.from, &transition.to, curve);
            let scale = transition.from_scale * (1.0 - curve) + transition.to_scale * curve;
            updates.push((key, transform, scale));
        }

        for (key, transform, scale) in updates {
            self.set_transform(key, &transform);
            self.set_scale(key, scale);
        }
        for key in done {
            self.transitions.remove(key);
        }
    }

    /// Takes the oldest queued event.
    pub fn next_event(&mut self) -> Option<WindowEvent> {
        self.events.pop_front()
    }
}
