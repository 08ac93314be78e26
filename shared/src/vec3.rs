/// 3D vector utilities for world-space positions, velocities and directions.
/// The host engine is Y-up: gravity pulls along -y and "horizontal" means the xz plane.

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize, ts_rs::TS, PartialEq)]
#[ts(export, export_to = "../../engine-shim/src/generated/")]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const UP: Vec3 = Vec3 {
        x: 0.0,
        y: 1.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Shorthand constructor
pub fn vec3(x: f64, y: f64, z: f64) -> Vec3 {
    Vec3::new(x, y, z)
}

/// Dot product
pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a.x * b.x + a.y * b.y + a.z * b.z
}

/// Vector length
pub fn length(v: Vec3) -> f64 {
    dot(v, v).sqrt()
}

/// Distance between two points
pub fn distance(a: Vec3, b: Vec3) -> f64 {
    length(sub(a, b))
}

/// Normalize vector to unit length. Degenerate vectors normalize to zero.
pub fn normalize(v: Vec3) -> Vec3 {
    let len = length(v);
    if len < 1e-10 {
        return Vec3::ZERO;
    }
    Vec3::new(v.x / len, v.y / len, v.z / len)
}

/// Scale vector by scalar
pub fn scale(v: Vec3, s: f64) -> Vec3 {
    Vec3::new(v.x * s, v.y * s, v.z * s)
}

/// Add two vectors
pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    Vec3::new(a.x + b.x, a.y + b.y, a.z + b.z)
}

/// Subtract vectors (a - b)
pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    Vec3::new(a.x - b.x, a.y - b.y, a.z - b.z)
}

/// Linear interpolation. t=0 returns a, t=1 returns b.
pub fn lerp(a: Vec3, b: Vec3, t: f64) -> Vec3 {
    Vec3::new(
        a.x + t * (b.x - a.x),
        a.y + t * (b.y - a.y),
        a.z + t * (b.z - a.z),
    )
}

/// Unit vector in the xz plane at `angle` radians, measured from +z towards +x.
pub fn horizontal_direction(angle: f64) -> Vec3 {
    Vec3::new(angle.sin(), 0.0, angle.cos())
}

/// Convert a direction into (pitch, yaw) in radians.
///
/// Yaw is measured in the xz plane from +z towards +x; pitch is the elevation
/// above the horizontal plane. A zero vector yields (0, 0).
pub fn direction_to_angles(direction: Vec3) -> (f64, f64) {
    let d = normalize(direction);
    if d == Vec3::ZERO {
        return (0.0, 0.0);
    }
    let yaw = d.x.atan2(d.z);
    let pitch = d.y.clamp(-1.0, 1.0).asin();
    (pitch, yaw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    fn assert_vec3_close(actual: Vec3, expected: Vec3) {
        assert!(
            (actual.x - expected.x).abs() < 1e-6
                && (actual.y - expected.y).abs() < 1e-6
                && (actual.z - expected.z).abs() < 1e-6,
            "Expected {:?} to be close to {:?}",
            actual,
            expected
        );
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "Expected {} to be close to {}",
            actual,
            expected
        );
    }

    #[test]
    fn dot_orthogonal_is_zero() {
        assert_eq!(dot(vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0)), 0.0);
    }

    #[test]
    fn length_of_3_4_0_is_5() {
        assert_eq!(length(vec3(3.0, 4.0, 0.0)), 5.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = vec3(1.0, 2.0, 3.0);
        let b = vec3(4.0, 6.0, 3.0);
        assert_close(distance(a, b), 5.0);
        assert_close(distance(b, a), 5.0);
    }

    #[test]
    fn normalize_returns_unit_vector() {
        let v = normalize(vec3(3.0, 4.0, 0.0));
        assert_close(length(v), 1.0);
    }

    #[test]
    fn normalize_zero_returns_zero() {
        assert_eq!(normalize(Vec3::ZERO), Vec3::ZERO);
    }

    #[test]
    fn lerp_endpoints_and_midpoint() {
        let a = vec3(0.0, 0.0, 0.0);
        let b = vec3(2.0, 4.0, -6.0);
        assert_vec3_close(lerp(a, b, 0.0), a);
        assert_vec3_close(lerp(a, b, 1.0), b);
        assert_vec3_close(lerp(a, b, 0.5), vec3(1.0, 2.0, -3.0));
    }

    #[test]
    fn horizontal_directions_are_unit_and_flat() {
        for i in 0..8 {
            let d = horizontal_direction(i as f64 * PI / 4.0);
            assert_close(length(d), 1.0);
            assert_eq!(d.y, 0.0);
        }
        assert_vec3_close(horizontal_direction(0.0), vec3(0.0, 0.0, 1.0));
        assert_vec3_close(horizontal_direction(FRAC_PI_2), vec3(1.0, 0.0, 0.0));
    }

    #[test]
    fn forward_direction_has_zero_angles() {
        let (pitch, yaw) = direction_to_angles(vec3(0.0, 0.0, 5.0));
        assert_close(pitch, 0.0);
        assert_close(yaw, 0.0);
    }

    #[test]
    fn straight_up_has_half_pi_pitch() {
        let (pitch, _) = direction_to_angles(vec3(0.0, 3.0, 0.0));
        assert_close(pitch, FRAC_PI_2);
    }

    #[test]
    fn oblique_direction_angles() {
        let (pitch, yaw) = direction_to_angles(vec3(1.0, 1.0, -1.0));
        assert_close(yaw, 3.0 * FRAC_PI_4);
        assert_close(pitch, (1.0 / 3.0f64.sqrt()).asin());
        assert!(yaw > FRAC_PI_2 && yaw < PI);
    }

    #[test]
    fn non_finite_components_are_detected() {
        assert!(vec3(1.0, 2.0, 3.0).is_finite());
        assert!(!vec3(f64::NAN, 0.0, 0.0).is_finite());
        assert!(!vec3(0.0, f64::INFINITY, 0.0).is_finite());
    }
}
