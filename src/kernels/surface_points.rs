use crate::field::{Pt3, VoxelGrid};

use super::{dispatch, AppendBuffer, DispatchIndirectArgs};

/// Offsets from a cell's lowest corner to the 7 other corners:
/// 3 edges, 3 face diagonals, 1 body diagonal.
const CORNER_OFFSETS: [[u32; 3]; 7] = [
    [1, 0, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 1, 0],
    [1, 0, 1],
    [0, 1, 1],
    [1, 1, 1],
];

/// Upper bound on emitted points: one per tested segment.
pub fn surface_point_capacity(grid: &VoxelGrid) -> usize {
    grid.dims.cells().voxel_count() * CORNER_OFFSETS.len()
}

/// Parameter of the zero crossing between two SDF samples, if their signs differ.
/// Zero counts as outside.
#[inline]
pub fn zero_crossing(s1: f32, s2: f32) -> Option<f32> {
    if (s1 < 0.0) == (s2 < 0.0) {
        return None;
    }
    Some(s1 / (s1 - s2))
}

/// Emit a point wherever the SDF changes sign between a cell's lowest
/// corner and any of its other corners. Cells on the upper boundary have
/// no far corners and are skipped. Output order is unspecified.
pub fn extract_surface_points(
    grid: &VoxelGrid,
    points: &AppendBuffer<Pt3>,
) -> DispatchIndirectArgs {
    let cells = grid.dims.cells();

    dispatch(cells.voxel_count(), |cell| {
        let (x, y, z) = cells.coords(cell);
        let s0 = grid.get(x, y, z);
        let p0 = grid.get_position(x as f32, y as f32, z as f32);

        for [dx, dy, dz] in CORNER_OFFSETS {
            let s1 = grid.get(x + dx, y + dy, z + dz);
            if let Some(t) = zero_crossing(s0, s1) {
                let p1 = grid.get_position((x + dx) as f32, (y + dy) as f32, (z + dz) as f32);
                points.push(p0 + (p1 - p0) * t);
            }
        }
    });

    DispatchIndirectArgs::for_items(points.len())
}
