//! Planar vector helpers for joint geometry.
//!
//! All keypoints are 2D; these helpers keep angle and distance arithmetic
//! in one place so every module computes them identically.

/// Dot product of two 2D vectors.
#[must_use]
#[inline]
pub fn dot2(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}

/// Norm of a 2D vector.
#[must_use]
#[inline]
pub fn norm2(v: &[f64; 2]) -> f64 {
    (v[0] * v[0] + v[1] * v[1]).sqrt()
}

/// `a - b`.
#[must_use]
#[inline]
pub fn sub2(a: &[f64; 2], b: &[f64; 2]) -> [f64; 2] {
    [a[0] - b[0], a[1] - b[1]]
}

/// Euclidean distance between two points.
#[must_use]
#[inline]
pub fn distance2(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    norm2(&sub2(a, b))
}

/// Midpoint of two points.
#[must_use]
#[inline]
pub fn midpoint2(a: &[f64; 2], b: &[f64; 2]) -> [f64; 2] {
    [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0]
}

/// Angle in degrees at `vertex` between the segments `vertex→a` and
/// `vertex→c`.
///
/// Uses `cos(θ) = (v1 · v2) / (|v1| × |v2|)` with the ratio clipped to
/// `[-1, 1]` before `acos`. A zero-length segment yields NaN from the
/// division and is reported as `0.0`.
#[must_use]
pub fn joint_angle(a: &[f64; 2], vertex: &[f64; 2], c: &[f64; 2]) -> f64 {
    let v1 = sub2(a, vertex);
    let v2 = sub2(c, vertex);

    let cos_angle = (dot2(&v1, &v2) / (norm2(&v1) * norm2(&v2))).clamp(-1.0, 1.0);
    let angle = cos_angle.acos().to_degrees();

    if angle.is_nan() {
        0.0
    } else {
        angle
    }
}

/// Inclination of the segment `from→to` relative to horizontal, folded into
/// `[0, 90]` degrees regardless of direction.
#[must_use]
pub fn inclination(from: &[f64; 2], to: &[f64; 2]) -> f64 {
    let d = sub2(to, from);
    if norm2(&d) == 0.0 {
        return 0.0;
    }
    d[1].abs().atan2(d[0].abs()).to_degrees()
}
