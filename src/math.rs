use glam::{Mat4, Quat, Vec2, Vec3};

/// Below this, a ray is considered parallel to a plane.
const PARALLEL_EPSILON: f32 = 1e-6;

/// Tolerance for treating two poses as the same target.
pub const POSE_EPSILON: f32 = 1e-5;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// The ray of a pointer pose: starts at the pose origin and points along its -Z.
    pub fn from_pose(pose: &Mat4) -> Self {
        Self {
            origin: pose.w_axis.truncate(),
            direction: pose.transform_vector3(Vec3::NEG_Z).normalize_or_zero(),
        }
    }

    pub fn at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }

    /// Distance along the ray to the plane through `point` with `normal`.
    ///
    /// `None` when the ray is parallel to the plane or the plane lies behind the origin.
    pub fn distance_to_plane(&self, point: Vec3, normal: Vec3) -> Option<f32> {
        let denom = normal.dot(self.direction);
        if denom.abs() < PARALLEL_EPSILON {
            return None;
        }
        let t = normal.dot(point - self.origin) / denom;
        (t.is_finite() && t >= 0.0).then_some(t)
    }
}

pub fn translation(matrix: &Mat4) -> Vec3 {
    matrix.w_axis.truncate()
}

/// Rotation part of an affine transform, with any scale removed.
pub fn rotation(matrix: &Mat4) -> Quat {
    let (_, rotation, _) = matrix.to_scale_rotation_translation();
    rotation.normalize()
}

pub fn with_translation(matrix: &Mat4, translation: Vec3) -> Mat4 {
    let mut out = *matrix;
    out.w_axis = translation.extend(1.0);
    out
}

/// Spherical angles in degrees of `direction`, seen from its own origin.
///
/// Azimuth turns clockwise around +Y starting at -Z ("left-right"), inclination rises
/// from the XZ plane ("up-down"). Returned as `(azimuth, inclination)`.
pub fn rotation_angles(direction: Vec3) -> (f32, f32) {
    let cross = Vec3::Y.cross(direction).length();
    let dot = Vec3::Y.dot(direction);
    let inclination = 90.0 - cross.atan2(dot).to_degrees();
    let azimuth = direction.x.atan2(-direction.z).to_degrees();
    (azimuth, inclination)
}

/// Inverse of [`rotation_angles`] on a sphere of radius `distance` around the origin.
pub fn sphere_to_3d(azimuth: f32, inclination: f32, distance: f32) -> Vec3 {
    let (azimuth, inclination) = (azimuth.to_radians(), inclination.to_radians());
    let dist_2d = distance * inclination.cos();
    Vec3::new(
        dist_2d * azimuth.sin(),
        distance * inclination.sin(),
        -dist_2d * azimuth.cos(),
    )
}

/// Intersection of the segments `p0..p1` and `p2..p3`.
pub fn intersect_segments_2d(p0: Vec2, p1: Vec2, p2: Vec2, p3: Vec2) -> Option<Vec2> {
    let s1 = p1 - p0;
    let s2 = p3 - p2;
    let denom = -s2.x * s1.y + s1.x * s2.y;
    if denom == 0.0 {
        return None;
    }

    let s = (-s1.y * (p0.x - p2.x) + s1.x * (p0.y - p2.y)) / denom;
    let t = (s2.x * (p0.y - p2.y) - s2.y * (p0.x - p2.x)) / denom;

    ((0.0..=1.0).contains(&s) && (0.0..=1.0).contains(&t)).then(|| p0 + s1 * t)
}

/// Moves `point` towards the origin onto the border of the `min`..`max` rectangle.
///
/// Returns `None` if the segment from the origin to `point` never crosses the border,
/// i.e. the point already lies inside.
pub fn clamp_towards_zero_2d(min: Vec2, max: Vec2, point: Vec2) -> Option<Vec2> {
    let bottom_left = min;
    let top_left = Vec2::new(min.x, max.y);
    let top_right = max;
    let bottom_right = Vec2::new(max.x, min.y);

    [
        (bottom_left, top_left),
        (bottom_right, top_right),
        (top_left, top_right),
        (bottom_left, bottom_right),
    ]
    .into_iter()
    .find_map(|(a, b)| intersect_segments_2d(Vec2::ZERO, point, a, b))
}

/// Pose at `point` whose +Z faces the head at `head_pose`.
pub fn head_facing_pose(head_pose: &Mat4, point: Vec3) -> Mat4 {
    let (azimuth, inclination) = rotation_angles(point - translation(head_pose));
    Mat4::from_translation(point)
        * Mat4::from_rotation_y(-azimuth.to_radians())
        * Mat4::from_rotation_x(inclination.to_radians())
}

/// Yaw of a pose's forward (-Z) direction, in radians, clockwise from -Z.
pub fn azimuth_from_pose(pose: &Mat4) -> f32 {
    let direction = rotation(pose) * Vec3::NEG_Z;
    direction.x.atan2(-direction.z)
}

/// Quartic ease-out, maps [0, 1] onto [0, 1] with a soft landing.
pub fn ease_out_quart(t: f32) -> f32 {
    1.0 - (t - 1.0).powi(4)
}

/// Component-wise interpolation between two matrices.
pub fn interpolate_matrix(from: &Mat4, to: &Mat4, t: f32) -> Mat4 {
    Mat4::from_cols(
        from.x_axis.lerp(to.x_axis, t),
        from.y_axis.lerp(to.y_axis, t),
        from.z_axis.lerp(to.z_axis, t),
        from.w_axis.lerp(to.w_axis, t),
    )
}

pub fn poses_equal(a: &Mat4, b: &Mat4) -> bool {
    a.abs_diff_eq(*b, POSE_EPSILON)
}
