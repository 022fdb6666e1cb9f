use crate::math::{self, Ray};
use crate::window::WindowKey;
use glam::{Mat4, Quat, Vec2, Vec3};
use log::{debug, trace};
use std::time::{Duration, Instant};

const ORIENTATION_RESET_DURATION: Duration = Duration::from_millis(200);

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HoverState {
    pub hovered: Option<WindowKey>,
    /// Distance from the controller to the intersection, in meters.
    pub distance: f32,
    /// Intersection relative to the window center, in meters.
    pub intersection_2d: Vec2,
}

impl Default for HoverState {
    fn default() -> Self {
        Self {
            hovered: None,
            distance: 1.0,
            intersection_2d: Vec2::ZERO,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TransformLock {
    #[default]
    None,
    PushPull,
    Scale,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GrabState {
    pub grabbed: Option<WindowKey>,
    pub object_rotation: Quat,
    pub inverse_controller_rotation: Quat,
    /// Pivot of the grab: the negated hover offset at grab time.
    pub grab_offset: Vec2,
    pub transform_lock: TransformLock,
}

impl Default for GrabState {
    fn default() -> Self {
        Self {
            grabbed: None,
            object_rotation: Quat::IDENTITY,
            inverse_controller_rotation: Quat::IDENTITY,
            grab_offset: Vec2::ZERO,
            transform_lock: TransformLock::None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct OrientationReset {
    from_object: Quat,
    from_inverse_controller: Quat,
    progress: f32,
    last_step: Instant,
}

/// A tracked device with a pointer ray that can hover and grab windows.
#[derive(Debug, Clone, PartialEq)]
pub struct Controller {
    handle: u64,
    pointer_pose: Mat4,
    pointer_pose_valid: bool,
    grip_pose: Mat4,
    grip_pose_valid: bool,
    pointer_default_length: f32,
    pub hover_state: HoverState,
    pub grab_state: GrabState,
    orientation_reset: Option<OrientationReset>,
}

impl Controller {
    pub fn new(handle: u64) -> Self {
        Self {
            handle,
            pointer_pose: Mat4::IDENTITY,
            pointer_pose_valid: false,
            grip_pose: Mat4::IDENTITY,
            grip_pose_valid: false,
            pointer_default_length: 5.0,
            hover_state: HoverState::default(),
            grab_state: GrabState::default(),
            orientation_reset: None,
        }
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn set_pointer_default_length(&mut self, length: f32) {
        self.pointer_default_length = length;
    }

    pub fn pointer_pose(&self) -> &Mat4 {
        &self.pointer_pose
    }

    pub fn is_pointer_pose_valid(&self) -> bool {
        self.pointer_pose_valid
    }

    pub fn grip_pose(&self) -> &Mat4 {
        &self.grip_pose
    }

    pub fn is_grip_pose_valid(&self) -> bool {
        self.grip_pose_valid
    }

    /// The pose is stored even when invalid; callers check validity before hit testing.
    pub fn update_pointer_pose(&mut self, pose: Mat4, valid: bool) {
        self.pointer_pose = pose;
        self.pointer_pose_valid = valid;
    }

    pub fn update_grip_pose(&mut self, pose: Mat4, valid: bool) {
        self.grip_pose = pose;
        self.grip_pose_valid = valid;
    }

    pub fn pointer_ray(&self) -> Ray {
        Ray::from_pose(&self.pointer_pose)
    }

    pub fn distance_to(&self, point: Vec3) -> f32 {
        math::translation(&self.pointer_pose).distance(point)
    }

    /// Where the pointer ray ends when nothing is hovered.
    pub fn default_tip_position(&self) -> Vec3 {
        self.pointer_ray().at(self.pointer_default_length)
    }

    pub fn is_hovering(&self) -> bool {
        self.hover_state.hovered.is_some()
    }

    pub fn is_grabbing(&self) -> bool {
        self.grab_state.grabbed.is_some()
    }

    pub fn reset_hover_state(&mut self) {
        self.hover_state = HoverState::default();
    }

    /// Clears the grab. The captured object rotation is kept, only the pivot,
    /// controller rotation and lock are reset.
    pub fn reset_grab_state(&mut self) {
        self.grab_state.grabbed = None;
        self.grab_state.grab_offset = Vec2::ZERO;
        self.grab_state.inverse_controller_rotation = Quat::IDENTITY;
        self.grab_state.transform_lock = TransformLock::None;
        self.orientation_reset = None;
    }

    pub(crate) fn set_hovered(&mut self, window: WindowKey, distance: f32, intersection_2d: Vec2) {
        self.hover_state.hovered = Some(window);
        self.hover_state.distance = distance;
        self.hover_state.intersection_2d = intersection_2d;
    }

    /// Captures the grab of `window`, currently at `object_pose`.
    pub fn drag_start(&mut self, window: WindowKey, object_pose: &Mat4) {
        let controller_rotation = math::rotation(&self.pointer_pose);
        self.grab_state.grabbed = Some(window);
        self.grab_state.object_rotation = math::rotation(object_pose);
        self.grab_state.grab_offset = -self.hover_state.intersection_2d;
        self.grab_state.inverse_controller_rotation = controller_rotation.inverse();
        self.grab_state.transform_lock = TransformLock::None;
        debug!("controller {} grabbed {window:?}", self.handle);
    }

    /// Pose of the grabbed window for the current pointer pose.
    pub fn drag_pose(&self) -> Option<Mat4> {
        self.grab_state.grabbed?;

        let controller_position = math::translation(&self.pointer_pose);
        let controller_rotation = math::rotation(&self.pointer_pose);

        let intersection_pose = Mat4::from_translation(controller_position)
            * Mat4::from_quat(controller_rotation)
            * Mat4::from_translation(Vec3::new(0.0, 0.0, -self.hover_state.distance))
            * Mat4::from_quat(self.grab_state.inverse_controller_rotation)
            * Mat4::from_quat(self.grab_state.object_rotation);

        let pivot = self.grab_state.grab_offset;
        Some(intersection_pose * Mat4::from_translation(pivot.extend(0.0)))
    }

    /// Starts turning the grabbed window to face the controller head-on.
    pub fn reset_orientation(&mut self, now: Instant) {
        if !self.is_grabbing() {
            return;
        }
        self.orientation_reset = Some(OrientationReset {
            from_object: self.grab_state.object_rotation,
            from_inverse_controller: self.grab_state.inverse_controller_rotation,
            progress: 0.0,
            last_step: now,
        });
    }

    pub fn is_resetting_orientation(&self) -> bool {
        self.orientation_reset.is_some()
    }

    /// Advances a running orientation reset.
    pub fn step_orientation_reset(&mut self, now: Instant) {
        let Some(reset) = self.orientation_reset.as_mut() else {
            return;
        };

        let elapsed = now.saturating_duration_since(reset.last_step);
        reset.last_step = now;
        reset.progress += elapsed.as_secs_f32() / ORIENTATION_RESET_DURATION.as_secs_f32();

        if reset.progress >= 1.0 {
            self.grab_state.object_rotation = Quat::IDENTITY;
            self.grab_state.inverse_controller_rotation = Quat::IDENTITY;
            self.orientation_reset = None;
            trace!("controller {} orientation reset done", self.handle);
            return;
        }

        let t = reset.progress;
        self.grab_state.object_rotation = reset.from_object.slerp(Quat::IDENTITY, t);
        self.grab_state.inverse_controller_rotation =
            reset.from_inverse_controller.slerp(Quat::IDENTITY, t);
    }
}
