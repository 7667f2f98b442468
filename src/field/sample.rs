//! Trilinear sampling over dense per-voxel fields, shared by the SDF,
//! gradient, curvature magnitude and direction fields.

use crate::field::types::{GridDims, Vec3};

/// Values that can be stored per voxel and blended linearly.
/// Must be Sync for parallel kernels.
pub trait FieldValue: Copy + Send + Sync {
    fn scale(self, weight: f32) -> Self;
    fn add(self, other: Self) -> Self;
    fn zero() -> Self;
}

impl FieldValue for f32 {
    fn scale(self, weight: f32) -> Self {
        self * weight
    }

    fn add(self, other: Self) -> Self {
        self + other
    }

    fn zero() -> Self {
        0.0
    }
}

impl FieldValue for Vec3 {
    fn scale(self, weight: f32) -> Self {
        self * weight
    }

    fn add(self, other: Self) -> Self {
        self + other
    }

    fn zero() -> Self {
        Vec3::zeros()
    }
}

/// The 8 voxels surrounding a continuous grid position, with blend weights.
#[derive(Debug, Clone, Copy)]
pub struct Stencil {
    pub indices: [usize; 8],
    pub weights: [f32; 8],
}

impl Stencil {
    /// Build the stencil for `grid_pos` (voxel units), clamped to the grid.
    pub fn new(dims: GridDims, grid_pos: &Vec3) -> Self {
        let max = Vec3::new(
            (dims.nx - 1) as f32,
            (dims.ny - 1) as f32,
            (dims.nz - 1) as f32,
        );
        let p = grid_pos.zip_map(&max, |v, m| v.clamp(0.0, m));

        let x0 = (p.x.floor() as u32).min(dims.nx.saturating_sub(2));
        let y0 = (p.y.floor() as u32).min(dims.ny.saturating_sub(2));
        let z0 = (p.z.floor() as u32).min(dims.nz.saturating_sub(2));
        let x1 = (x0 + 1).min(dims.nx - 1);
        let y1 = (y0 + 1).min(dims.ny - 1);
        let z1 = (z0 + 1).min(dims.nz - 1);

        let fx = p.x - x0 as f32;
        let fy = p.y - y0 as f32;
        let fz = p.z - z0 as f32;

        let indices = [
            dims.index(x0, y0, z0),
            dims.index(x1, y0, z0),
            dims.index(x0, y1, z0),
            dims.index(x1, y1, z0),
            dims.index(x0, y0, z1),
            dims.index(x1, y0, z1),
            dims.index(x0, y1, z1),
            dims.index(x1, y1, z1),
        ];
        let weights = [
            (1.0 - fx) * (1.0 - fy) * (1.0 - fz),
            fx * (1.0 - fy) * (1.0 - fz),
            (1.0 - fx) * fy * (1.0 - fz),
            fx * fy * (1.0 - fz),
            (1.0 - fx) * (1.0 - fy) * fz,
            fx * (1.0 - fy) * fz,
            (1.0 - fx) * fy * fz,
            fx * fy * fz,
        ];

        Self { indices, weights }
    }

    /// Blend `values` after mapping each corner through `corner`.
    pub fn blend_with<T: Copy, U: FieldValue>(&self, values: &[T], corner: impl Fn(T) -> U) -> U {
        self.indices
            .iter()
            .zip(self.weights.iter())
            .fold(U::zero(), |acc, (&i, &w)| acc.add(corner(values[i]).scale(w)))
    }

    pub fn blend<T: FieldValue>(&self, values: &[T]) -> T {
        self.blend_with(values, |v| v)
    }
}

/// Trilinear interpolation of a per-voxel field at a continuous grid position.
pub fn trilinear<T: FieldValue>(values: &[T], dims: GridDims, grid_pos: &Vec3) -> T {
    Stencil::new(dims, grid_pos).blend(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn linear_field(dims: GridDims) -> Vec<f32> {
        (0..dims.voxel_count())
            .map(|i| {
                let (x, y, z) = dims.coords(i);
                2.0 * x as f32 - y as f32 + 0.5 * z as f32
            })
            .collect()
    }

    #[test]
    fn test_trilinear_reproduces_linear_field() {
        let dims = GridDims::new(4, 5, 6);
        let values = linear_field(dims);
        let p = Vec3::new(1.25, 2.5, 3.75);
        let v = trilinear(&values, dims, &p);
        assert_relative_eq!(v, 2.0 * 1.25 - 2.5 + 0.5 * 3.75, epsilon = 1e-5);
    }

    #[test]
    fn test_trilinear_exact_at_voxels_and_upper_border() {
        let dims = GridDims::cubic(3);
        let values = linear_field(dims);
        let v = trilinear(&values, dims, &Vec3::new(2.0, 2.0, 2.0));
        assert_relative_eq!(v, values[dims.index(2, 2, 2)], epsilon = 1e-6);
    }

    #[test]
    fn test_positions_outside_are_clamped() {
        let dims = GridDims::cubic(3);
        let values = linear_field(dims);
        let inside = trilinear(&values, dims, &Vec3::new(0.0, 1.0, 1.0));
        let outside = trilinear(&values, dims, &Vec3::new(-4.0, 1.0, 1.0));
        assert_relative_eq!(inside, outside);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let stencil = Stencil::new(GridDims::cubic(8), &Vec3::new(3.3, 0.9, 6.1));
        let sum: f32 = stencil.weights.iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
    }
}
