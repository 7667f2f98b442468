use crate::field::{GridDims, PrincipalCurvature, Stencil, Vec3, VoxelGrid};
use rayon::prelude::*;

use super::gradient::{normal_at, MIN_GRADIENT_LENGTH};

/// Eigenvalue splits below this fraction of the tensor size count as umbilic.
const UMBILIC_TOLERANCE: f32 = 1e-2;
const ABSOLUTE_SPLIT_EPSILON: f32 = 1e-6;

/// Orthonormal tangent basis `(u, v)` perpendicular to the unit normal `n`.
pub fn tangent_basis(n: &Vec3) -> (Vec3, Vec3) {
    let u = n
        .cross(&Vec3::x())
        .try_normalize(0.1)
        .unwrap_or_else(|| n.cross(&Vec3::y()).normalize());
    let v = n.cross(&u);
    (u, v)
}

/// Closed-form eigen-decomposition of the symmetric 2×2 tensor
/// `[[fxx, fxy], [fxy, fyy]]`.
///
/// Returns the eigenvalue with the larger magnitude and, unless the two
/// eigenvalues coincide, its unit eigenvector in the `(u, v)` plane.
pub fn principal_eigen(fxx: f32, fyy: f32, fxy: f32) -> (f32, Option<[f32; 2]>) {
    let diff = fxx - fyy;
    let d = (diff * diff + 4.0 * fxy * fxy).sqrt();
    let l1 = 0.5 * (fxx + fyy + d);
    let l2 = 0.5 * (fxx + fyy - d);
    let lambda = if l1.abs() >= l2.abs() { l1 } else { l2 };

    let size = fxx.abs() + fyy.abs() + 2.0 * fxy.abs();
    if d <= UMBILIC_TOLERANCE * size + ABSOLUTE_SPLIT_EPSILON {
        return (lambda, None);
    }

    // Two equivalent eigenvector forms; take the better conditioned one.
    let a = [lambda - fyy, fxy];
    let b = [fxy, lambda - fxx];
    let pick = if a[0] * a[0] + a[1] * a[1] >= b[0] * b[0] + b[1] * b[1] {
        a
    } else {
        b
    };
    let len = (pick[0] * pick[0] + pick[1] * pick[1]).sqrt();
    if len <= ABSOLUTE_SPLIT_EPSILON {
        return (lambda, None);
    }
    (lambda, Some([pick[0] / len, pick[1] / len]))
}

/// Principal curvature at a continuous grid position from finite
/// differences of the unit normal field along the tangent basis.
pub fn principal_curvature_at(
    gradient: &[Vec3],
    dims: GridDims,
    spacing: &Vec3,
    grid_pos: &Vec3,
    probe: f32,
) -> PrincipalCurvature {
    let Some(n) = normal_at(gradient, dims, grid_pos) else {
        return PrincipalCurvature::default();
    };
    let (u, v) = tangent_basis(&n);

    let normal_or_zero = |world_offset: Vec3| {
        let pos = grid_pos + world_offset.component_div(spacing);
        normal_at(gradient, dims, &pos).unwrap_or_else(Vec3::zeros)
    };

    let du = normal_or_zero(u * probe) - normal_or_zero(u * -probe);
    let dv = normal_or_zero(v * probe) - normal_or_zero(v * -probe);
    let inv = 1.0 / (2.0 * probe);

    let fxx = du.dot(&u) * inv;
    let fyy = dv.dot(&v) * inv;
    let fxy = 0.5 * (du.dot(&v) + dv.dot(&u)) * inv;

    let (lambda, eigenvector) = principal_eigen(fxx, fyy, fxy);
    let direction = match eigenvector {
        Some([a, b]) => (u * a + v * b).normalize(),
        None => Vec3::zeros(),
    };

    PrincipalCurvature {
        direction,
        magnitude: lambda.abs(),
    }
}

/// Trilinearly interpolated curvature magnitude at a continuous grid position.
pub fn magnitude_at(curvature: &[PrincipalCurvature], dims: GridDims, grid_pos: &Vec3) -> f32 {
    Stencil::new(dims, grid_pos).blend_with(curvature, |c| c.magnitude)
}

/// Compute the principal curvature record at every voxel. The probe step
/// is the smallest voxel spacing times `curvature_scale`.
pub fn compute_curvature_field(
    grid: &VoxelGrid,
    gradient: &[Vec3],
    curvature_scale: f32,
    curvature: &mut [PrincipalCurvature],
) {
    let dims = grid.dims;
    let spacing = grid.spacing;
    let probe = grid.min_spacing() * curvature_scale;

    curvature
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, record)| {
            if gradient[index].magnitude() < MIN_GRADIENT_LENGTH {
                *record = PrincipalCurvature::default();
                return;
            }
            let (x, y, z) = dims.coords(index);
            let pos = Vec3::new(x as f32, y as f32, z as f32);
            *record = principal_curvature_at(gradient, dims, &spacing, &pos, probe);
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::sdf::{sphere_sdf, torus_sdf};
    use crate::field::Pt3;
    use crate::kernels::gradient::compute_gradient_field;
    use approx::assert_relative_eq;

    fn curvature_of(grid: &VoxelGrid, scale: f32) -> (Vec<Vec3>, Vec<PrincipalCurvature>) {
        let mut gradient = vec![Vec3::zeros(); grid.dims.voxel_count()];
        compute_gradient_field(grid, &mut gradient);
        let mut curvature = vec![PrincipalCurvature::default(); grid.dims.voxel_count()];
        compute_curvature_field(grid, &gradient, scale, &mut curvature);
        (gradient, curvature)
    }

    #[test]
    fn test_tangent_basis_is_orthonormal() {
        for n in [Vec3::x(), Vec3::y(), Vec3::z(), Vec3::new(1.0, 2.0, -0.5).normalize()] {
            let (u, v) = tangent_basis(&n);
            assert_relative_eq!(u.magnitude(), 1.0, epsilon = 1e-5);
            assert_relative_eq!(v.magnitude(), 1.0, epsilon = 1e-5);
            assert_relative_eq!(u.dot(&n), 0.0, epsilon = 1e-5);
            assert_relative_eq!(v.dot(&n), 0.0, epsilon = 1e-5);
            assert_relative_eq!(u.dot(&v), 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_eigen_diagonal_tensor() {
        let (lambda, dir) = principal_eigen(0.5, 2.0, 0.0);
        assert_relative_eq!(lambda, 2.0);
        let [a, b] = dir.unwrap();
        assert_relative_eq!(a.abs(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(b.abs(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_eigen_off_diagonal_tensor() {
        // [[1, 1], [1, 1]] has eigenvalues 2 and 0, eigenvector (1, 1)/sqrt(2)
        let (lambda, dir) = principal_eigen(1.0, 1.0, 1.0);
        assert_relative_eq!(lambda, 2.0, epsilon = 1e-6);
        let [a, b] = dir.unwrap();
        assert_relative_eq!(a, b, epsilon = 1e-6);
        assert_relative_eq!(a * a + b * b, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_eigen_prefers_larger_magnitude() {
        let (lambda, _) = principal_eigen(-3.0, 1.0, 0.0);
        assert_relative_eq!(lambda, -3.0);
    }

    #[test]
    fn test_umbilic_has_no_direction() {
        let (lambda, dir) = principal_eigen(1.0, 1.0, 0.0);
        assert_relative_eq!(lambda, 1.0);
        assert!(dir.is_none());
        assert!(principal_eigen(0.0, 0.0, 0.0).1.is_none());
    }

    #[test]
    fn test_sphere_curvature_is_inverse_radius() {
        let radius = 1.0;
        let center = Pt3::origin();
        let grid = VoxelGrid::centered(48, 1.5, |p| sphere_sdf(p, &center, radius)).unwrap();
        let (_, curvature) = curvature_of(&grid, 1.0);

        let band = grid.min_spacing();
        let mut checked = 0;
        for (index, record) in curvature.iter().enumerate() {
            let (x, y, z) = grid.dims.coords(index);
            let sdf = grid.get(x, y, z);
            if sdf.abs() > band {
                continue;
            }
            assert_relative_eq!(record.magnitude, 1.0 / radius, max_relative = 0.1);
            checked += 1;
        }
        assert!(checked > 100);
    }

    #[test]
    fn test_direction_is_tangent() {
        let center = Pt3::origin();
        let grid = VoxelGrid::centered(40, 1.5, |p| torus_sdf(p, &center, 0.9, 0.35)).unwrap();
        let (gradient, curvature) = curvature_of(&grid, 1.0);

        for (index, record) in curvature.iter().enumerate() {
            if !record.has_direction() {
                continue;
            }
            let n = gradient[index].normalize();
            assert_relative_eq!(record.direction.magnitude(), 1.0, epsilon = 1e-4);
            assert!(record.direction.dot(&n).abs() < 1e-3);
        }
    }

    #[test]
    fn test_torus_tube_direction_dominates() {
        // On the outer equator the tube curvature 1/r exceeds the ring
        // curvature 1/(R + r), so the direction wraps around the tube (Y).
        let center = Pt3::origin();
        let (major, minor) = (0.9, 0.35);
        let grid = VoxelGrid::centered(48, 1.5, |p| torus_sdf(p, &center, major, minor)).unwrap();
        let (gradient, _) = curvature_of(&grid, 1.0);

        let surface = Pt3::new(major + minor, 0.0, 0.0);
        let pos = grid.to_grid(&surface);
        let record = principal_curvature_at(
            &gradient,
            grid.dims,
            &grid.spacing,
            &pos,
            grid.min_spacing(),
        );

        assert!(record.has_direction());
        assert!(record.direction.y.abs() > 0.9, "direction {:?}", record.direction);
        assert_relative_eq!(record.magnitude, 1.0 / minor, max_relative = 0.15);
    }

    #[test]
    fn test_flat_region_has_no_direction() {
        let grid = VoxelGrid::centered(16, 1.0, |p| p.y).unwrap();
        let (_, curvature) = curvature_of(&grid, 1.0);
        let record = curvature[grid.dims.index(8, 8, 8)];
        assert!(!record.has_direction());
        assert_relative_eq!(record.magnitude, 0.0, epsilon = 1e-4);
    }
}
