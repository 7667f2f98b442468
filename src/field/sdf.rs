use crate::field::types::{Pt3, Vec3};

const EPSILON: f32 = 0.001;

/// Signed distance function for a sphere
pub fn sphere_sdf(point: &Pt3, center: &Pt3, radius: f32) -> f32 {
    (point - center).magnitude() - radius
}

/// Signed distance function for a torus lying in the XZ plane
pub fn torus_sdf(point: &Pt3, center: &Pt3, major_radius: f32, minor_radius: f32) -> f32 {
    let p = point - center;
    let ring = (p.x * p.x + p.z * p.z).sqrt() - major_radius;
    (ring * ring + p.y * p.y).sqrt() - minor_radius
}

/// Distance to the segment `a`-`b` minus `radius`.
pub fn capsule_sdf(point: &Pt3, a: &Pt3, b: &Pt3, radius: f32) -> f32 {
    let axis = b - a;
    let len2 = axis.magnitude_squared();
    let t = if len2 < 1e-8 {
        0.0
    } else {
        ((point - a).dot(&axis) / len2).clamp(0.0, 1.0)
    };
    (point - (a + axis * t)).magnitude() - radius
}

/// Approximate distance to an axis-aligned ellipsoid.
/// Exact on the surface, a bound elsewhere.
pub fn ellipsoid_sdf(point: &Pt3, center: &Pt3, radii: &Vec3) -> f32 {
    let p = point - center;
    let k0 = p.component_div(radii).magnitude();
    if k0 < 1e-8 {
        return -radii.min();
    }
    let k1 = p.component_div(&radii.component_mul(radii)).magnitude();
    k0 * (k0 - 1.0) / k1
}

/// Polynomial smooth union of two distances with blend width `k`.
pub fn smooth_union(a: f32, b: f32, k: f32) -> f32 {
    if k <= 0.0 {
        return a.min(b);
    }
    let h = (k - (a - b).abs()).max(0.0);
    a.min(b) - h * h * 0.25 / k
}

/// Central-difference gradient of an analytic distance function.
pub fn analytic_gradient(point: &Pt3, evaluate_sdf: impl Fn(&Pt3) -> f32) -> Vec3 {
    Vec3::from_fn(|axis, _| {
        let offset = Vec3::ith(axis, EPSILON);
        (evaluate_sdf(&(point + offset)) - evaluate_sdf(&(point - offset))) / (2.0 * EPSILON)
    })
}
