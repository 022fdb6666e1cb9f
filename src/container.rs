use crate::input::devices::DeviceManager;
use crate::math;
use crate::window::{Window, WindowKey};
use derive_more::Display;
use glam::{Mat4, Vec2, Vec3};
use log::{debug, trace, warn};
use slotmap::{new_key_type, SlotMap};
use std::time::Instant;

new_key_type! {
    pub struct ContainerKey;
}

/// Angles the follower is pulled in by when snapping, so snapping hands over smoothly
/// to the gradual movement.
const SNAP_DELTA_DEGREES: f32 = 1.0;
/// Fraction of the remaining angle covered per second in the smooth zone.
const FOLLOW_SPEED: f32 = 7.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Attachment {
    #[default]
    None,
    Head,
    /// Follows the grip pose of a controller.
    Hand(u64),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Layout {
    /// Stacked top to bottom.
    #[default]
    Vertical,
    /// Side by side, left to right.
    Horizontal,
    /// Each window keeps the transform it was added with.
    Relative,
}

/// Frustum half-angles of one eye in degrees. Left and bottom are negative.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Fov {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl Default for Fov {
    fn default() -> Self {
        Self {
            left: -50.0,
            right: 50.0,
            top: 50.0,
            bottom: -50.0,
        }
    }
}

impl Fov {
    fn scaled(&self, factor: f32) -> (Vec2, Vec2) {
        (
            Vec2::new(self.left, self.bottom) * factor,
            Vec2::new(self.right, self.top) * factor,
        )
    }
}

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub enum ContainerError {
    #[display("controller {_0} is gone")]
    ControllerGone(u64),
    #[display("window {_0:?} is gone")]
    WindowGone(WindowKey),
}

impl std::error::Error for ContainerError {}

#[derive(Debug, Copy, Clone, PartialEq)]
struct Member {
    window: WindowKey,
    relative: Mat4,
}

/// A group of windows positioned together.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    members: Vec<Member>,
    attachment: Attachment,
    layout: Layout,
    distance: f32,
    transform: Mat4,
    visible: bool,
    fov_inner: f32,
    fov_outer: f32,
    last_step: Option<Instant>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
            attachment: Attachment::None,
            layout: Layout::Vertical,
            distance: 1.0,
            transform: Mat4::IDENTITY,
            visible: true,
            fov_inner: 0.25,
            fov_outer: 0.6,
            last_step: None,
        }
    }

    /// Sets the fractions of the eye FOV for the calm and the snapping zone.
    pub fn with_fov_fractions(mut self, inner: f32, outer: f32) -> Self {
        self.fov_inner = inner;
        self.fov_outer = outer;
        self
    }

    /// `relative` places the window's center relative to the container's center in
    /// [`Layout::Relative`] and is ignored otherwise.
    pub fn add_window(&mut self, window: WindowKey, relative: Option<Mat4>) {
        self.members.push(Member {
            window,
            relative: relative.unwrap_or(Mat4::IDENTITY),
        });
    }

    pub fn remove_window(&mut self, window: WindowKey) -> bool {
        let len = self.members.len();
        self.members.retain(|m| m.window != window);
        self.members.len() != len
    }

    pub fn contains(&self, window: WindowKey) -> bool {
        self.members.iter().any(|m| m.window == window)
    }

    pub fn windows(&self) -> impl Iterator<Item = WindowKey> + '_ {
        self.members.iter().map(|m| m.window)
    }

    pub fn attachment(&self) -> Attachment {
        self.attachment
    }

    pub fn set_attachment(&mut self, attachment: Attachment) {
        debug!("container attachment {:?} -> {attachment:?}", self.attachment);
        self.attachment = attachment;
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn set_layout(&mut self, layout: Layout) {
        self.layout = layout;
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn set_distance(&mut self, distance: f32) {
        self.distance = distance;
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// World transforms of the member windows for a container at `transform`.
    pub fn layout_transforms(
        &self,
        transform: &Mat4,
        windows: &SlotMap<WindowKey, Window>,
    ) -> Result<Vec<(WindowKey, Mat4)>, ContainerError> {
        let sizes = self
            .members
            .iter()
            .map(|m| {
                windows
                    .get(m.window)
                    .map(Window::size_meters)
                    .ok_or(ContainerError::WindowGone(m.window))
            })
            .collect::<Result<Vec<Vec2>, _>>()?;

        let placed = match self.layout {
            Layout::Vertical => {
                let mut y_offset = sizes.iter().map(|s| s.y).sum::<f32>() / 2.0;
                self.members
                    .iter()
                    .zip(&sizes)
                    .map(|(m, size)| {
                        let offset = Vec3::new(0.0, y_offset - size.y / 2.0, 0.0);
                        y_offset -= size.y;
                        (m.window, *transform * Mat4::from_translation(offset))
                    })
                    .collect()
            }
            Layout::Horizontal => {
                let mut x_offset = -sizes.iter().map(|s| s.x).sum::<f32>() / 2.0;
                self.members
                    .iter()
                    .zip(&sizes)
                    .map(|(m, size)| {
                        let offset = Vec3::new(x_offset + size.x / 2.0, 0.0, 0.0);
                        x_offset += size.x;
                        (m.window, *transform * Mat4::from_translation(offset))
                    })
                    .collect()
            }
            Layout::Relative => self
                .members
                .iter()
                .map(|m| (m.window, *transform * m.relative))
                .collect(),
        };
        Ok(placed)
    }

    fn place(
        &mut self,
        transform: Mat4,
        windows: &SlotMap<WindowKey, Window>,
    ) -> Result<Vec<(WindowKey, Mat4)>, ContainerError> {
        let placed = self.layout_transforms(&transform, windows)?;
        self.transform = transform;
        Ok(placed)
    }

    /// Places the container `distance` meters in front of the head.
    pub fn center_view(
        &mut self,
        head: &Mat4,
        distance: f32,
        windows: &SlotMap<WindowKey, Window>,
    ) -> Result<Vec<(WindowKey, Mat4)>, ContainerError> {
        self.distance = distance;
        self.place(*head * Mat4::from_translation(Vec3::new(0.0, 0.0, -distance)), windows)
    }

    /// Follows the attachment for this frame and returns the new window transforms.
    ///
    /// A hand attachment whose controller disappeared detaches the container.
    pub fn step(
        &mut self,
        head: &Mat4,
        fov: &Fov,
        devices: &DeviceManager,
        windows: &SlotMap<WindowKey, Window>,
        now: Instant,
    ) -> Result<Vec<(WindowKey, Mat4)>, ContainerError> {
        let dt = self
            .last_step
            .map_or(0.0, |last| now.saturating_duration_since(last).as_secs_f32());
        self.last_step = Some(now);

        match self.attachment {
            Attachment::None => Ok(Vec::new()),
            Attachment::Hand(handle) => {
                let Ok(controller) = devices.controller(handle) else {
                    warn!("controller {handle} of hand attached container is gone");
                    self.attachment = Attachment::None;
                    return Err(ContainerError::ControllerGone(handle));
                };
                // The grip lies in the XZ plane, windows are in XY.
                let transform = *controller.grip_pose()
                    * Mat4::from_translation(Vec3::new(0.0, 0.05, -0.033))
                    * Mat4::from_rotation_x((-80.0f32).to_radians());
                self.place(transform, windows)
            }
            Attachment::Head => self.step_fov(head, fov, dt, windows),
        }
    }

    fn step_fov(
        &mut self,
        head: &Mat4,
        fov: &Fov,
        dt: f32,
        windows: &SlotMap<WindowKey, Window>,
    ) -> Result<Vec<(WindowKey, Mat4)>, ContainerError> {
        let in_head_space = head.inverse() * self.transform;
        let (azimuth, inclination) = math::rotation_angles(math::translation(&in_head_space));
        let angles = Vec2::new(azimuth, inclination);

        let (inner_min, inner_max) = fov.scaled(self.fov_inner);
        let (outer_min, outer_max) = fov.scaled(self.fov_outer);

        let target = if angles.cmpgt(inner_min).all() && angles.cmplt(inner_max).all() {
            angles
        } else if angles.cmplt(outer_min).any() || angles.cmpgt(outer_max).any() {
            let delta = Vec2::splat(SNAP_DELTA_DEGREES);
            let Some(snapped) =
                math::clamp_towards_zero_2d(outer_min + delta, outer_max - delta, angles)
            else {
                warn!("head follower outside of view but not clampable");
                return Ok(Vec::new());
            };
            trace!("snapping head follower to {snapped}");
            snapped
        } else {
            let Some(edge) = math::clamp_towards_zero_2d(inner_min, inner_max, angles) else {
                warn!("head follower outside of calm zone but not clampable");
                return Ok(Vec::new());
            };
            let diff = angles - edge;
            let remaining = diff.length();
            let step = (remaining * dt * FOLLOW_SPEED).min(remaining);
            angles - diff.normalize_or_zero() * step
        };

        let point = head.transform_point3(math::sphere_to_3d(target.x, target.y, self.distance));
        self.place(math::head_facing_pose(head, point), windows)
    }
}
