use crate::field::{trilinear, GridDims, Vec3, VoxelGrid};
use rayon::prelude::*;

/// Gradients shorter than this are too weak to define a normal.
pub const MIN_GRADIENT_LENGTH: f32 = 1e-6;

/// Estimate the SDF gradient at every voxel with central differences.
/// Neighbours outside the grid clamp to the border voxel, which turns the
/// stencil one-sided there.
pub fn compute_gradient_field(grid: &VoxelGrid, gradient: &mut [Vec3]) {
    let dims = grid.dims;

    gradient
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, value)| {
            let (x, y, z) = dims.coords(index);
            *value = central_difference(grid, x as i64, y as i64, z as i64);
        });
}

fn central_difference(grid: &VoxelGrid, x: i64, y: i64, z: i64) -> Vec3 {
    let dims = grid.dims;
    let h = grid.spacing;

    let axis = |lo: (u32, u32, u32), hi: (u32, u32, u32), steps: u32, step: f32| -> f32 {
        if steps == 0 {
            return 0.0;
        }
        (grid.get(hi.0, hi.1, hi.2) - grid.get(lo.0, lo.1, lo.2)) / (steps as f32 * step)
    };

    let x_lo = dims.clamp(x - 1, y, z);
    let x_hi = dims.clamp(x + 1, y, z);
    let y_lo = dims.clamp(x, y - 1, z);
    let y_hi = dims.clamp(x, y + 1, z);
    let z_lo = dims.clamp(x, y, z - 1);
    let z_hi = dims.clamp(x, y, z + 1);

    Vec3::new(
        axis(x_lo, x_hi, x_hi.0 - x_lo.0, h.x),
        axis(y_lo, y_hi, y_hi.1 - y_lo.1, h.y),
        axis(z_lo, z_hi, z_hi.2 - z_lo.2, h.z),
    )
}

/// Unit surface normal at a continuous grid position, or `None` where the
/// interpolated gradient vanishes.
pub fn normal_at(gradient: &[Vec3], dims: GridDims, grid_pos: &Vec3) -> Option<Vec3> {
    let g: Vec3 = trilinear(gradient, dims, grid_pos);
    g.try_normalize(MIN_GRADIENT_LENGTH)
}
