//! Parallel Poisson-disk sampling of surface points.
//!
//! Points are bucketed into a uniform grid whose cell size equals the
//! sampling radius, so any two points closer than the radius sit in the
//! same or in neighbouring cells. Each cell accepts at most one point.
//! Conflicts are resolved over 27 phases: cells whose coordinates agree
//! modulo 3 never neighbour each other and are processed together.

use crate::field::{GridDims, Pt3, VoxelGrid};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

use super::{dispatch, dispatch_indirect, AppendBuffer, DispatchIndirectArgs};

const EMPTY: u32 = u32::MAX;

/// Number of resolve phases, one per `(x % 3, y % 3, z % 3)` class.
pub const RESOLVE_PHASES: u32 = 27;

const MIN_SLOTS_PER_CELL: u32 = 4;
const MAX_SLOTS_PER_CELL: u32 = 256;

/// Sampler states, executed in order by [`PoissonSampler::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoissonPhase {
    Init,
    Select,
    Resolve,
    Collapse,
}

impl PoissonPhase {
    pub const ORDER: [PoissonPhase; 4] = [
        PoissonPhase::Init,
        PoissonPhase::Select,
        PoissonPhase::Resolve,
        PoissonPhase::Collapse,
    ];
}

/// Cell offset processed by resolve phase `phase`.
pub fn phase_offset(phase: u32) -> [u32; 3] {
    [phase % 3, (phase / 3) % 3, phase / 9]
}

/// Candidate slots per cell. Surface points arrive a few per voxel face,
/// so the count grows with the squared ratio of radius to spacing.
pub fn max_points_per_cell(radius: f32, spacing: f32) -> u32 {
    let ratio = (radius / spacing).ceil().max(1.0) as u32;
    ((ratio + 1) * (ratio + 1) * 4).clamp(MIN_SLOTS_PER_CELL, MAX_SLOTS_PER_CELL)
}

/// Sparse cell table used by the sampler.
#[derive(Debug)]
pub struct PoissonGrid {
    pub origin: Pt3,
    pub cell_size: f32,
    pub dims: GridDims,
    pub slots_per_cell: u32,
    candidates: Vec<AtomicU32>,
    accepted: Vec<AtomicU32>,
}

impl PoissonGrid {
    /// Table covering `grid` with cells of side `radius`.
    pub fn new(grid: &VoxelGrid, radius: f32, slots_per_cell: u32) -> Self {
        let dims = PoissonGrid::dims_for(grid, radius);
        let cell_count = dims.voxel_count();

        Self {
            origin: grid.origin,
            cell_size: radius,
            dims,
            slots_per_cell,
            candidates: (0..cell_count * slots_per_cell as usize)
                .map(|_| AtomicU32::new(EMPTY))
                .collect(),
            accepted: (0..cell_count).map(|_| AtomicU32::new(EMPTY)).collect(),
        }
    }

    /// Whether this table was laid out for the same grid and radius.
    pub fn matches(&self, grid: &VoxelGrid, radius: f32, slots_per_cell: u32) -> bool {
        self.origin == grid.origin
            && self.cell_size == radius
            && self.slots_per_cell == slots_per_cell
            && self.dims == PoissonGrid::dims_for(grid, radius)
    }

    fn dims_for(grid: &VoxelGrid, radius: f32) -> GridDims {
        let extent = grid.extent();
        let cells_along = |length: f32| ((length / radius).floor() as u32 + 1).max(1);
        GridDims::new(
            cells_along(extent.x),
            cells_along(extent.y),
            cells_along(extent.z),
        )
    }

    pub fn cell_count(&self) -> usize {
        self.accepted.len()
    }

    /// Cell containing a world position, if inside the table.
    pub fn cell_of(&self, pos: &Pt3) -> Option<(u32, u32, u32)> {
        let g = (pos - self.origin) / self.cell_size;
        let (x, y, z) = (g.x.floor() as i64, g.y.floor() as i64, g.z.floor() as i64);
        self.dims
            .contains(x, y, z)
            .then_some((x as u32, y as u32, z as u32))
    }

    fn slot(&self, cell: usize, slot: u32) -> &AtomicU32 {
        &self.candidates[cell * self.slots_per_cell as usize + slot as usize]
    }

    /// Index of the point accepted by a cell.
    pub fn accepted(&self, cell: usize) -> Option<u32> {
        let value = self.accepted[cell].load(Ordering::Acquire);
        (value != EMPTY).then_some(value)
    }
}

/// Runs the four sampler phases over one surface point buffer.
pub struct PoissonSampler<'a> {
    pub table: &'a PoissonGrid,
    pub points: &'a [Pt3],
    pub radius: f32,
}

impl<'a> PoissonSampler<'a> {
    pub fn new(table: &'a PoissonGrid, points: &'a [Pt3], radius: f32) -> Self {
        Self {
            table,
            points,
            radius,
        }
    }

    /// Execute every phase in order and compact the survivors into `out`.
    /// `points_args` sizes the Select dispatch from the extractor's count.
    pub fn run(
        &self,
        points_args: &DispatchIndirectArgs,
        out: &AppendBuffer<Pt3>,
    ) -> DispatchIndirectArgs {
        for phase in PoissonPhase::ORDER {
            self.step(phase, points_args, out);
            debug!(?phase, "poisson phase complete");
        }
        DispatchIndirectArgs::for_items(out.len())
    }

    pub fn step(
        &self,
        phase: PoissonPhase,
        points_args: &DispatchIndirectArgs,
        out: &AppendBuffer<Pt3>,
    ) {
        match phase {
            PoissonPhase::Init => self.init(),
            PoissonPhase::Select => self.select(points_args),
            PoissonPhase::Resolve => self.resolve(),
            PoissonPhase::Collapse => self.collapse(out),
        }
    }

    fn init(&self) {
        let table = self.table;
        dispatch(table.cell_count(), |cell| {
            table.accepted[cell].store(EMPTY, Ordering::Relaxed);
            for slot in 0..table.slots_per_cell {
                table.slot(cell, slot).store(EMPTY, Ordering::Relaxed);
            }
        });
    }

    fn select(&self, points_args: &DispatchIndirectArgs) {
        let table = self.table;
        let points = self.points;

        dispatch_indirect(points_args, |id| {
            if id >= points.len() {
                return;
            }
            let Some((x, y, z)) = table.cell_of(&points[id]) else {
                return;
            };
            let cell = table.dims.index(x, y, z);

            // Claim the first free slot; a full cell drops the point.
            for slot in 0..table.slots_per_cell {
                let claimed = table.slot(cell, slot).compare_exchange(
                    EMPTY,
                    id as u32,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                if claimed.is_ok() {
                    return;
                }
            }
        });
    }

    fn resolve(&self) {
        let dims = self.table.dims;

        // Phases must stay sequential: each one reads what earlier ones accepted.
        for phase in 0..RESOLVE_PHASES {
            let [ox, oy, oz] = phase_offset(phase);
            let span = |n: u32, o: u32| if n > o { (n - o).div_ceil(3) } else { 0 };
            let active = GridDims::new(span(dims.nx, ox), span(dims.ny, oy), span(dims.nz, oz));

            dispatch(active.voxel_count(), |id| {
                let (i, j, k) = active.coords(id);
                self.resolve_cell(3 * i + ox, 3 * j + oy, 3 * k + oz);
            });
        }
    }

    fn resolve_cell(&self, x: u32, y: u32, z: u32) {
        let table = self.table;
        let cell = table.dims.index(x, y, z);

        for slot in 0..table.slots_per_cell {
            let candidate = table.slot(cell, slot).load(Ordering::Acquire);
            if candidate == EMPTY {
                return;
            }
            if !self.conflicts(&self.points[candidate as usize], x, y, z) {
                table.accepted[cell].store(candidate, Ordering::Release);
                return;
            }
        }
    }

    /// Whether an accepted point in the 26-neighbourhood lies closer than the radius.
    fn conflicts(&self, p: &Pt3, x: u32, y: u32, z: u32) -> bool {
        let table = self.table;
        let radius_sq = self.radius * self.radius;

        for dz in -1i64..=1 {
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    let (nx, ny, nz) = (x as i64 + dx, y as i64 + dy, z as i64 + dz);
                    if !table.dims.contains(nx, ny, nz) {
                        continue;
                    }
                    let neighbour = table.dims.index(nx as u32, ny as u32, nz as u32);
                    if let Some(other) = table.accepted(neighbour) {
                        let q = &self.points[other as usize];
                        if (p - q).magnitude_squared() < radius_sq {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    fn collapse(&self, out: &AppendBuffer<Pt3>) {
        let table = self.table;
        let points = self.points;
        dispatch(table.cell_count(), |cell| {
            if let Some(index) = table.accepted(cell) {
                out.push(points[index as usize]);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::sdf::{sphere_sdf, torus_sdf};
    use crate::kernels::surface_points::{extract_surface_points, surface_point_capacity};
    use std::collections::HashSet;

    fn surface_points(grid: &VoxelGrid) -> (Vec<Pt3>, DispatchIndirectArgs) {
        let buffer = AppendBuffer::with_capacity(surface_point_capacity(grid));
        let args = extract_surface_points(grid, &buffer);
        (buffer.to_vec(), args)
    }

    fn sample(
        grid: &VoxelGrid,
        points: &[Pt3],
        args: &DispatchIndirectArgs,
        radius: f32,
    ) -> Vec<Pt3> {
        let slots = max_points_per_cell(radius, grid.min_spacing());
        let table = PoissonGrid::new(grid, radius, slots);
        let out = AppendBuffer::with_capacity(table.cell_count());
        PoissonSampler::new(&table, points, radius).run(args, &out);
        assert!(out.len() <= out.capacity());
        out.to_vec()
    }

    fn min_pair_distance(points: &[Pt3]) -> f32 {
        let mut best = f32::INFINITY;
        for (i, p) in points.iter().enumerate() {
            for q in &points[i + 1..] {
                best = best.min((p - q).magnitude());
            }
        }
        best
    }

    #[test]
    fn test_phase_offsets_cover_all_classes() {
        let classes: HashSet<[u32; 3]> = (0..RESOLVE_PHASES).map(phase_offset).collect();
        assert_eq!(classes.len(), 27);
        assert_eq!(phase_offset(0), [0, 0, 0]);
        assert_eq!(phase_offset(5), [2, 1, 0]);
        assert_eq!(phase_offset(26), [2, 2, 2]);
    }

    #[test]
    fn test_min_distance_invariant() {
        let center = Pt3::origin();
        let grid = VoxelGrid::centered(40, 1.5, |p| sphere_sdf(p, &center, 1.0)).unwrap();
        let (points, args) = surface_points(&grid);

        for radius in [0.1, 0.25, 0.5] {
            let samples = sample(&grid, &points, &args, radius);
            assert!(samples.len() > 1);
            assert!(
                min_pair_distance(&samples) >= radius,
                "radius {} violated",
                radius
            );
        }
    }

    #[test]
    fn test_count_decreases_with_radius() {
        let center = Pt3::origin();
        let grid = VoxelGrid::centered(40, 1.5, |p| torus_sdf(p, &center, 0.9, 0.35)).unwrap();
        let (points, args) = surface_points(&grid);

        let counts: Vec<usize> = [0.08, 0.16, 0.32, 0.64]
            .iter()
            .map(|&r| sample(&grid, &points, &args, r).len())
            .collect();

        for pair in counts.windows(2) {
            assert!(pair[1] < pair[0], "counts not decreasing: {:?}", counts);
        }
        assert!(counts[0] < points.len());
    }

    #[test]
    fn test_samples_are_surface_points() {
        let center = Pt3::origin();
        let grid = VoxelGrid::centered(24, 1.5, |p| sphere_sdf(p, &center, 1.0)).unwrap();
        let (points, args) = surface_points(&grid);
        let samples = sample(&grid, &points, &args, 0.3);

        for s in &samples {
            assert!(points.iter().any(|p| p == s));
        }
    }

    #[test]
    fn test_single_slot_cells_drop_extra_points() {
        let center = Pt3::origin();
        let grid = VoxelGrid::centered(24, 1.5, |p| sphere_sdf(p, &center, 1.0)).unwrap();
        let (points, args) = surface_points(&grid);

        let table = PoissonGrid::new(&grid, 0.4, 1);
        let out = AppendBuffer::with_capacity(table.cell_count());
        PoissonSampler::new(&table, &points, 0.4).run(&args, &out);

        let samples = out.to_vec();
        assert!(!samples.is_empty());
        assert!(min_pair_distance(&samples) >= 0.4);
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let grid = VoxelGrid::centered(8, 1.0, |_| 1.0).unwrap();
        let samples = sample(&grid, &[], &DispatchIndirectArgs::for_items(0), 0.2);
        assert!(samples.is_empty());
    }

    #[test]
    fn test_table_reuse_check() {
        let grid = VoxelGrid::centered(8, 1.0, |_| 1.0).unwrap();
        let table = PoissonGrid::new(&grid, 0.2, 16);
        assert!(table.matches(&grid, 0.2, 16));
        assert!(!table.matches(&grid, 0.3, 16));
        assert_eq!(table.cell_of(&Pt3::new(-1.0, -1.0, -1.0)), Some((0, 0, 0)));
        assert_eq!(table.cell_of(&Pt3::new(5.0, 0.0, 0.0)), None);
    }
}
