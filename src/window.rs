use crate::math::{self, Ray};
use glam::{Mat4, UVec2, Vec2, Vec3};
use slotmap::new_key_type;
use std::ops::BitOr;

new_key_type! {
    pub struct WindowKey;
}

/// The rendering side of a window, as far as interaction is concerned.
///
/// The transform is the window's pose without its user scale. Implementors own the
/// pixels; the interaction core only reads and writes geometry.
pub trait Surface: Send {
    fn transform(&self) -> Mat4;
    fn set_transform(&mut self, transform: &Mat4);
    fn scale(&self) -> f32;
    fn set_scale(&mut self, scale: f32);
    /// Size at scale 1.
    fn initial_size_meters(&self) -> Vec2;
    fn texture_size(&self) -> UVec2;

    fn set_visible(&mut self, _visible: bool) {}

    fn size_meters(&self) -> Vec2 {
        self.initial_size_meters() * self.scale()
    }

    fn aspect_ratio(&self) -> f32 {
        let size = self.texture_size();
        size.x as f32 / size.y.max(1) as f32
    }
}

/// A surface that is only geometry, for hosts that mirror window state elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadSurface {
    transform: Mat4,
    scale: f32,
    initial_size_meters: Vec2,
    texture_size: UVec2,
}

impl QuadSurface {
    pub fn new(width_meters: f32, texture_size: UVec2) -> Self {
        let aspect = texture_size.x as f32 / texture_size.y.max(1) as f32;
        Self {
            transform: Mat4::IDENTITY,
            scale: 1.0,
            initial_size_meters: Vec2::new(width_meters, width_meters / aspect),
            texture_size,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }
}

impl Surface for QuadSurface {
    fn transform(&self) -> Mat4 {
        self.transform
    }

    fn set_transform(&mut self, transform: &Mat4) {
        self.transform = *transform;
    }

    fn scale(&self) -> f32 {
        self.scale
    }

    fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    fn initial_size_meters(&self) -> Vec2 {
        self.initial_size_meters
    }

    fn texture_size(&self) -> UVec2 {
        self.texture_size
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct WindowFlags(u32);

impl WindowFlags {
    pub const NONE: Self = Self(0);
    /// Moved by arrange_reset and arrange_sphere.
    pub const MANAGED: Self = Self(1 << 0);
    pub const DRAGGABLE: Self = Self(1 << 1);
    pub const HOVERABLE: Self = Self(1 << 2);
    pub const BUTTON: Self = Self(1 << 3);
    /// Removed together with its parent window.
    pub const DESTROY_WITH_PARENT: Self = Self(1 << 4);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for WindowFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Intersection {
    pub point: Vec3,
    /// Distance from the ray origin.
    pub distance: f32,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct ChildLink {
    pub window: WindowKey,
    /// Offset of the child's center from the parent's center, in parent pixels.
    pub offset_center: Vec2,
}

pub struct Window {
    surface: Box<dyn Surface>,
    flags: WindowFlags,
    pinned: bool,
    visible: bool,
    reset_transform: Mat4,
    pub(crate) child: Option<ChildLink>,
    pub(crate) parent: Option<WindowKey>,
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("flags", &self.flags)
            .field("transform", &self.transform())
            .field("scale", &self.scale())
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}

impl Window {
    pub fn new(surface: Box<dyn Surface>, flags: WindowFlags) -> Self {
        let reset_transform = surface.transform();
        Self {
            surface,
            flags,
            pinned: false,
            visible: true,
            reset_transform,
            child: None,
            parent: None,
        }
    }

    pub fn flags(&self) -> WindowFlags {
        self.flags
    }

    pub fn is_button(&self) -> bool {
        self.flags.contains(WindowFlags::BUTTON)
    }

    pub fn surface(&self) -> &dyn Surface {
        self.surface.as_ref()
    }

    /// Pose without user scale.
    pub fn transform(&self) -> Mat4 {
        self.surface.transform()
    }

    /// Pose including user scale, mapping the unit-height quad to world space.
    pub fn scaled_transform(&self) -> Mat4 {
        self.transform() * Mat4::from_scale(Vec3::splat(self.size_meters().y))
    }

    pub(crate) fn set_transform(&mut self, transform: &Mat4) {
        self.surface.set_transform(transform);
    }

    pub fn scale(&self) -> f32 {
        self.surface.scale()
    }

    pub(crate) fn set_scale(&mut self, scale: f32) {
        self.surface.set_scale(scale);
    }

    pub fn size_meters(&self) -> Vec2 {
        self.surface.size_meters()
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.surface.aspect_ratio()
    }

    pub fn texture_size(&self) -> UVec2 {
        self.surface.texture_size()
    }

    pub fn pixels_per_meter(&self) -> f32 {
        self.texture_size().x as f32 / self.size_meters().x
    }

    pub fn initial_pixels_per_meter(&self) -> f32 {
        self.texture_size().x as f32 / self.surface.initial_size_meters().x
    }

    /// A point on the window plane and the plane normal.
    pub fn plane(&self) -> (Vec3, Vec3) {
        let transform = self.transform();
        let normal = math::rotation(&transform) * Vec3::Z;
        (math::translation(&transform), normal)
    }

    /// Hit test of `ray` against the window rectangle.
    pub fn intersect(&self, ray: &Ray) -> Option<Intersection> {
        let (point, normal) = self.plane();
        let distance = ray.distance_to_plane(point, normal)?;
        let hit = ray.at(distance);

        let local = self.scaled_transform().inverse().transform_point3(hit);
        let half_width = self.aspect_ratio() / 2.0;
        if local.x.abs() <= half_width && local.y.abs() <= 0.5 {
            Some(Intersection {
                point: hit,
                distance,
            })
        } else {
            None
        }
    }

    /// Offset of a point on the window from its center, in meters.
    pub fn intersection_2d(&self, point: Vec3) -> Vec2 {
        self.transform()
            .inverse()
            .transform_point3(point)
            .truncate()
    }

    /// Position of a point on the window in pixels, origin at the top left.
    pub fn intersection_2d_pixels(&self, point: Vec3) -> Vec2 {
        let normalized = self.intersection_2d(point) / self.size_meters() + Vec2::splat(0.5);
        let flipped = Vec2::new(normalized.x, 1.0 - normalized.y);
        flipped * self.texture_size().as_vec2()
    }

    pub fn reset_transform(&self) -> Mat4 {
        self.reset_transform
    }

    pub fn save_reset_transform(&mut self) {
        self.reset_transform = self.transform();
    }

    pub fn set_reset_transform(&mut self, transform: Mat4) {
        self.reset_transform = transform;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        self.surface.set_visible(visible);
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Pins the window. With `hide_unpinned`, visibility follows the pin state.
    pub(crate) fn set_pin(&mut self, pinned: bool, hide_unpinned: bool) {
        self.pinned = pinned;
        self.set_visible(!hide_unpinned || pinned);
    }

    pub fn parent(&self) -> Option<WindowKey> {
        self.parent
    }

    pub fn child(&self) -> Option<WindowKey> {
        self.child.map(|c| c.window)
    }

    /// Transform for this window's child, which sits slightly in front at its pixel offset.
    pub(crate) fn child_transform(&self, offset_center: Vec2) -> Mat4 {
        let offset = offset_center * (self.scale() / self.initial_pixels_per_meter());
        self.transform() * Mat4::from_translation(offset.extend(0.01))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_at(z: f32) -> Window {
        let surface = QuadSurface::new(2.0, UVec2::new(200, 100))
            .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, z)));
        Window::new(Box::new(surface), WindowFlags::HOVERABLE)
    }

    #[test]
    fn size_follows_texture_aspect() {
        let w = window_at(-1.0);
        assert_eq!(w.size_meters(), Vec2::new(2.0, 1.0));
        assert_eq!(w.aspect_ratio(), 2.0);
        assert_eq!(w.pixels_per_meter(), 100.0);
    }

    #[test]
    fn ray_at_center_hits_center() {
        let w = window_at(-3.0);
        let hit = w.intersect(&Ray::from_pose(&Mat4::IDENTITY)).unwrap();
        assert!((hit.distance - 3.0).abs() < 1e-5);
        assert!(w.intersection_2d(hit.point).abs_diff_eq(Vec2::ZERO, 1e-5));
    }

    #[test]
    fn ray_outside_bounds_misses() {
        let w = window_at(-3.0);
        let pose = Mat4::from_translation(Vec3::new(1.1, 0.0, 0.0));
        assert_eq!(w.intersect(&Ray::from_pose(&pose)), None);
        let pose = Mat4::from_translation(Vec3::new(0.9, 0.45, 0.0));
        assert!(w.intersect(&Ray::from_pose(&pose)).is_some());
    }

    #[test]
    fn parallel_ray_never_hits() {
        let w = window_at(-3.0);
        let pose = Mat4::from_rotation_y(std::f32::consts::FRAC_PI_2)
            * Mat4::from_translation(Vec3::ZERO);
        let pose = Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)) * pose;
        assert_eq!(w.intersect(&Ray::from_pose(&pose)), None);
    }

    #[test]
    fn scaled_window_grows_hit_area() {
        let mut w = window_at(-3.0);
        let pose = Mat4::from_translation(Vec3::new(1.5, 0.0, 0.0));
        assert_eq!(w.intersect(&Ray::from_pose(&pose)), None);
        w.set_scale(2.0);
        assert!(w.intersect(&Ray::from_pose(&pose)).is_some());
    }

    #[test]
    fn pixels_origin_top_left() {
        let w = window_at(-3.0);
        let top_left = Vec3::new(-1.0, 0.5, -3.0);
        assert!(w.intersection_2d_pixels(top_left).abs_diff_eq(Vec2::ZERO, 1e-3));
        let center = Vec3::new(0.0, 0.0, -3.0);
        assert!(w
            .intersection_2d_pixels(center)
            .abs_diff_eq(Vec2::new(100.0, 50.0), 1e-3));
    }

    #[test]
    fn flags_combine() {
        let flags = WindowFlags::MANAGED | WindowFlags::DRAGGABLE;
        assert!(flags.contains(WindowFlags::DRAGGABLE));
        assert!(!flags.contains(WindowFlags::BUTTON));
    }
}
