//! Host orchestration: the stage dependency graph, the per-grid buffer
//! arena and full or partial reruns of the kernel sequence.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::field::{GridDims, PrincipalCurvature, Pt3, Vec3, VoxelGrid};
use crate::geometry::{DrawGeometry, DrawIndirectArgs, StrokeVertex};
use crate::kernels::curvature::compute_curvature_field;
use crate::kernels::curvature_range::{
    reduce_curvature_range, CurvatureRange, CurvatureRangeBuffer,
};
use crate::kernels::gradient::compute_gradient_field;
use crate::kernels::poisson::{max_points_per_cell, PoissonGrid, PoissonSampler};
use crate::kernels::streamlines::StreamlineBuilder;
use crate::kernels::surface_points::{extract_surface_points, surface_point_capacity};
use crate::kernels::{AppendBuffer, DispatchIndirectArgs};
use crate::settings::StreamlineParams;

/// Pipeline stages, declared in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Gradient,
    SurfacePoints,
    Poisson,
    Curvature,
    CurvatureRange,
    Streamlines,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Gradient,
        Stage::SurfacePoints,
        Stage::Poisson,
        Stage::Curvature,
        Stage::CurvatureRange,
        Stage::Streamlines,
    ];

    /// Stages whose output this stage reads.
    pub fn dependencies(self) -> &'static [Stage] {
        match self {
            Stage::Gradient | Stage::SurfacePoints => &[],
            Stage::Poisson => &[Stage::SurfacePoints],
            Stage::Curvature => &[Stage::Gradient],
            Stage::CurvatureRange => &[Stage::Poisson, Stage::Curvature],
            Stage::Streamlines => &[
                Stage::Gradient,
                Stage::Poisson,
                Stage::Curvature,
                Stage::CurvatureRange,
            ],
        }
    }

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Small bitset of stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageSet(u8);

impl StageSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self::from_stages(&Stage::ALL)
    }

    pub fn from_stages(stages: &[Stage]) -> Self {
        let mut set = Self::empty();
        for &stage in stages {
            set.insert(stage);
        }
        set
    }

    pub fn insert(&mut self, stage: Stage) {
        self.0 |= stage.bit();
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: StageSet) -> Self {
        Self(self.0 | other.0)
    }

    /// This set plus every stage that transitively depends on it.
    pub fn with_downstream(self) -> Self {
        // ALL is topologically ordered, so one pass closes the set.
        let mut closed = self;
        for stage in Stage::ALL {
            if stage.dependencies().iter().any(|&dep| closed.contains(dep)) {
                closed.insert(stage);
            }
        }
        closed
    }

    /// Members in execution order.
    pub fn iter(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |&stage| self.contains(stage))
    }
}

/// Buffers owned by the pipeline, sized for one grid layout. Reused
/// across runs and fully overwritten by the stages that produce them.
pub struct FieldBuffers {
    pub dims: GridDims,
    pub gradient: Vec<Vec3>,
    pub curvature: Vec<PrincipalCurvature>,
    pub surface_points: AppendBuffer<Pt3>,
    pub surface_args: DispatchIndirectArgs,
    surface: Vec<Pt3>,
    poisson_table: Option<PoissonGrid>,
    pub samples: AppendBuffer<Pt3>,
    pub sample_args: DispatchIndirectArgs,
    seeds: Vec<Pt3>,
    pub range: CurvatureRangeBuffer,
    pub curvature_range: CurvatureRange,
    pub vertices: AppendBuffer<StrokeVertex>,
    pub draw_args: DrawIndirectArgs,
}

impl FieldBuffers {
    pub fn new(grid: &VoxelGrid) -> Self {
        let voxels = grid.dims.voxel_count();
        Self {
            dims: grid.dims,
            gradient: vec![Vec3::zeros(); voxels],
            curvature: vec![PrincipalCurvature::default(); voxels],
            surface_points: AppendBuffer::with_capacity(surface_point_capacity(grid)),
            surface_args: DispatchIndirectArgs::for_items(0),
            surface: Vec::new(),
            poisson_table: None,
            samples: AppendBuffer::with_capacity(0),
            sample_args: DispatchIndirectArgs::for_items(0),
            seeds: Vec::new(),
            range: CurvatureRangeBuffer::new(),
            curvature_range: CurvatureRange::default(),
            vertices: AppendBuffer::with_capacity(0),
            draw_args: DrawIndirectArgs::default(),
        }
    }

    /// Surface points from the last extraction.
    pub fn surface(&self) -> &[Pt3] {
        &self.surface
    }

    /// Poisson-sampled seed points from the last sampler run.
    pub fn seeds(&self) -> &[Pt3] {
        &self.seeds
    }

    /// Reuse the sampler table when its layout still matches, otherwise
    /// reallocate it together with the compacted output buffer.
    fn prepare_poisson(&mut self, grid: &VoxelGrid, radius: f32, slots: u32) {
        let reusable = self
            .poisson_table
            .as_ref()
            .is_some_and(|table| table.matches(grid, radius, slots));

        if reusable {
            self.samples.reset();
        } else {
            let table = PoissonGrid::new(grid, radius, slots);
            debug!(cells = table.cell_count(), slots, "allocated poisson table");
            self.samples = AppendBuffer::with_capacity(table.cell_count());
            self.poisson_table = Some(table);
        }
    }
}

/// Item counts from the most recent run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub surface_points: usize,
    pub dropped_surface_points: u32,
    pub poisson_points: usize,
    pub curvature_min: f32,
    pub curvature_max: f32,
    pub vertices: usize,
    pub dropped_vertices: u32,
    pub triangles: usize,
}

pub struct StreamlinePipeline {
    params: StreamlineParams,
    grid: Option<VoxelGrid>,
    buffers: Option<FieldBuffers>,
    pending: StageSet,
    stats: PipelineStats,
}

impl StreamlinePipeline {
    pub fn new(params: StreamlineParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            grid: None,
            buffers: None,
            pending: StageSet::empty(),
            stats: PipelineStats::default(),
        })
    }

    pub fn params(&self) -> &StreamlineParams {
        &self.params
    }

    pub fn grid(&self) -> Option<&VoxelGrid> {
        self.grid.as_ref()
    }

    pub fn buffers(&self) -> Option<&FieldBuffers> {
        self.buffers.as_ref()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Stages invalidated since the last run.
    pub fn pending(&self) -> StageSet {
        self.pending
    }

    /// Replace the voxel grid. Buffers are reallocated only when the
    /// dimensions change. Every stage becomes pending.
    pub fn load_grid(&mut self, grid: VoxelGrid) {
        let reuse = self.buffers.as_ref().is_some_and(|b| b.dims == grid.dims);
        if !reuse {
            info!(
                nx = grid.dims.nx,
                ny = grid.dims.ny,
                nz = grid.dims.nz,
                "allocating field buffers"
            );
            self.buffers = Some(FieldBuffers::new(&grid));
        }
        self.grid = Some(grid);
        self.pending = StageSet::all();
    }

    /// Swap parameters and return the stages they invalidate, including
    /// downstream dependents.
    pub fn set_params(&mut self, params: StreamlineParams) -> Result<StageSet> {
        params.validate()?;
        let dirty = params.dirty_stages(&self.params).with_downstream();
        self.params = params;
        self.pending = self.pending.union(dirty);
        Ok(dirty)
    }

    /// Run every stage.
    pub fn rebuild(&mut self) -> Result<DrawGeometry> {
        self.run_stages(StageSet::all())
    }

    /// Run only the pending stages.
    pub fn update(&mut self) -> Result<DrawGeometry> {
        self.run_stages(self.pending)
    }

    /// Run `stages` and everything downstream of them, in dependency order.
    pub fn run_stages(&mut self, stages: StageSet) -> Result<DrawGeometry> {
        let (Some(grid), Some(buffers)) = (self.grid.as_ref(), self.buffers.as_mut()) else {
            return Err(PipelineError::NoGrid);
        };

        let stages = stages.with_downstream();
        for stage in stages.iter() {
            run_stage(stage, grid, &self.params, buffers);
        }
        self.pending = StageSet::empty();

        let geometry = DrawGeometry {
            vertices: buffers.vertices.to_vec(),
            indirect: buffers.draw_args,
        };
        self.stats = PipelineStats {
            surface_points: buffers.surface.len(),
            dropped_surface_points: buffers.surface_points.dropped(),
            poisson_points: buffers.seeds.len(),
            curvature_min: buffers.curvature_range.min_value(),
            curvature_max: buffers.curvature_range.max_value(),
            vertices: buffers.vertices.len(),
            dropped_vertices: buffers.vertices.dropped(),
            triangles: geometry.triangle_count(),
        };
        info!(
            stages = ?stages.iter().collect::<Vec<_>>(),
            surface_points = self.stats.surface_points,
            poisson_points = self.stats.poisson_points,
            triangles = self.stats.triangles,
            "pipeline run complete"
        );

        Ok(geometry)
    }

    /// Geometry produced by the last streamline stage.
    pub fn geometry(&self) -> DrawGeometry {
        match &self.buffers {
            Some(buffers) => DrawGeometry {
                vertices: buffers.vertices.to_vec(),
                indirect: buffers.draw_args,
            },
            None => DrawGeometry::default(),
        }
    }
}

fn run_stage(
    stage: Stage,
    grid: &VoxelGrid,
    params: &StreamlineParams,
    buffers: &mut FieldBuffers,
) {
    match stage {
        Stage::Gradient => {
            compute_gradient_field(grid, &mut buffers.gradient);
            debug!(voxels = buffers.gradient.len(), "gradient field computed");
        }
        Stage::SurfacePoints => {
            buffers.surface_points.reset();
            buffers.surface_args = extract_surface_points(grid, &buffers.surface_points);
            buffers.surface = buffers.surface_points.to_vec();
            debug!(
                points = buffers.surface.len(),
                workgroups = buffers.surface_args.x,
                "surface points extracted"
            );
            let dropped = buffers.surface_points.dropped();
            if dropped > 0 {
                warn!(
                    dropped,
                    capacity = buffers.surface_points.capacity(),
                    "surface point buffer overflowed"
                );
            }
        }
        Stage::Poisson => {
            let radius = params.sampling_radius;
            let slots = params
                .max_points_per_cell
                .unwrap_or_else(|| max_points_per_cell(radius, grid.min_spacing()));
            buffers.prepare_poisson(grid, radius, slots);

            if let Some(table) = buffers.poisson_table.as_ref() {
                let sampler = PoissonSampler::new(table, &buffers.surface, radius);
                buffers.sample_args = sampler.run(&buffers.surface_args, &buffers.samples);
            }
            buffers.seeds = buffers.samples.to_vec();
            debug!(
                seeds = buffers.seeds.len(),
                workgroups = buffers.sample_args.x,
                "poisson sampling complete"
            );
        }
        Stage::Curvature => {
            compute_curvature_field(
                grid,
                &buffers.gradient,
                params.curvature_scale,
                &mut buffers.curvature,
            );
            let defined = buffers.curvature.iter().filter(|c| c.has_direction()).count();
            debug!(defined, "curvature field computed");
        }
        Stage::CurvatureRange => {
            buffers.curvature_range = reduce_curvature_range(
                grid,
                &buffers.curvature,
                &buffers.seeds,
                &buffers.sample_args,
                &buffers.range,
            );
            debug!(
                min = buffers.curvature_range.min_value(),
                max = buffers.curvature_range.max_value(),
                "curvature range reduced"
            );
        }
        Stage::Streamlines => {
            let builder = StreamlineBuilder::new(
                grid,
                &buffers.gradient,
                &buffers.curvature,
                buffers.curvature_range,
                params,
            );
            let capacity = builder.vertex_capacity(buffers.seeds.len());
            if capacity > buffers.vertices.capacity() {
                debug!(
                    capacity,
                    seeds = buffers.seeds.len(),
                    "growing stroke vertex buffer"
                );
                buffers.vertices = AppendBuffer::with_capacity(capacity);
            } else {
                buffers.vertices.reset();
            }
            buffers.draw_args =
                builder.build(&buffers.seeds, &buffers.sample_args, &buffers.vertices);
            let dropped = buffers.vertices.dropped();
            if dropped > 0 {
                warn!(
                    dropped,
                    capacity = buffers.vertices.capacity(),
                    "stroke vertex buffer overflowed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::sdf::{sphere_sdf, torus_sdf};

    fn torus_grid(resolution: u32) -> VoxelGrid {
        let center = Pt3::origin();
        VoxelGrid::centered(resolution, 1.5, |p| torus_sdf(p, &center, 0.9, 0.35)).unwrap()
    }

    #[test]
    fn test_downstream_closure() {
        let closure = |stage| StageSet::from_stages(&[stage]).with_downstream();

        assert_eq!(
            closure(Stage::Poisson),
            StageSet::from_stages(&[Stage::Poisson, Stage::CurvatureRange, Stage::Streamlines])
        );
        assert_eq!(
            closure(Stage::Curvature),
            StageSet::from_stages(&[Stage::Curvature, Stage::CurvatureRange, Stage::Streamlines])
        );
        assert_eq!(
            closure(Stage::Gradient),
            StageSet::from_stages(&[
                Stage::Gradient,
                Stage::Curvature,
                Stage::CurvatureRange,
                Stage::Streamlines
            ])
        );
        assert_eq!(
            closure(Stage::SurfacePoints),
            StageSet::from_stages(&[
                Stage::SurfacePoints,
                Stage::Poisson,
                Stage::CurvatureRange,
                Stage::Streamlines
            ])
        );
        assert_eq!(closure(Stage::Streamlines), StageSet::from_stages(&[Stage::Streamlines]));
    }

    #[test]
    fn test_iter_follows_execution_order() {
        let set = StageSet::from_stages(&[Stage::Streamlines, Stage::Gradient, Stage::Poisson]);
        let order: Vec<Stage> = set.iter().collect();
        assert_eq!(order, vec![Stage::Gradient, Stage::Poisson, Stage::Streamlines]);
    }

    #[test]
    fn test_run_without_grid_fails() {
        let mut pipeline = StreamlinePipeline::new(StreamlineParams::default()).unwrap();
        assert!(matches!(pipeline.rebuild(), Err(PipelineError::NoGrid)));
    }

    #[test]
    fn test_invalid_params_are_rejected() {
        let bad = StreamlineParams {
            sampling_radius: -1.0,
            ..StreamlineParams::default()
        };
        assert!(StreamlinePipeline::new(bad.clone()).is_err());

        let mut pipeline = StreamlinePipeline::new(StreamlineParams::default()).unwrap();
        assert!(pipeline.set_params(bad).is_err());
        assert_eq!(pipeline.params(), &StreamlineParams::default());
    }

    #[test]
    fn test_unit_sphere_end_to_end() {
        let center = Pt3::origin();
        let grid = VoxelGrid::centered(64, 1.5, |p| sphere_sdf(p, &center, 1.0)).unwrap();
        let voxels = grid.dims.voxel_count();
        let params = StreamlineParams {
            sampling_radius: 0.1 * grid.extent().x,
            ..StreamlineParams::default()
        };
        // Trilinear reprojection leaves the centerline up to a tenth of a
        // voxel off the surface.
        let tolerance = params.width + 0.1 * grid.min_spacing();

        let mut pipeline = StreamlinePipeline::new(params).unwrap();
        pipeline.load_grid(grid);
        let geometry = pipeline.rebuild().unwrap();
        let stats = pipeline.stats().clone();

        assert!(stats.surface_points > 0 && stats.surface_points < voxels);
        assert!(stats.poisson_points > 0 && stats.poisson_points < stats.surface_points);
        assert_eq!(stats.dropped_surface_points, 0);
        assert!(geometry.indirect.vertex_count > 0);
        assert_eq!(geometry.indirect.vertex_count as usize, geometry.vertices.len());
        assert_eq!(geometry.vertices.len() % 3, 0);
        assert_eq!(stats.triangles, geometry.triangle_count());

        for triangle in geometry.triangles() {
            for vertex in triangle {
                let sdf = sphere_sdf(&vertex.position(), &center, 1.0);
                assert!(sdf.abs() <= tolerance, "vertex off sphere by {}", sdf);
            }
        }
    }

    #[test]
    fn test_stroke_params_rerun_streamlines_only() {
        let mut pipeline = StreamlinePipeline::new(StreamlineParams::default()).unwrap();
        pipeline.load_grid(torus_grid(32));
        assert_eq!(pipeline.pending(), StageSet::all());

        let first = pipeline.rebuild().unwrap();
        let surface = pipeline.stats().surface_points;
        let seeds = pipeline.buffers().unwrap().seeds().to_vec();
        assert!(first.indirect.vertex_count > 0);
        assert!(pipeline.pending().is_empty());

        let dirty = pipeline
            .set_params(StreamlineParams {
                taper: false,
                ..StreamlineParams::default()
            })
            .unwrap();
        assert_eq!(dirty, StageSet::from_stages(&[Stage::Streamlines]));

        let second = pipeline.update().unwrap();
        // Taper changes widths, never the vertex count.
        assert_eq!(second.indirect, first.indirect);
        assert_eq!(pipeline.stats().surface_points, surface);
        assert_eq!(pipeline.buffers().unwrap().seeds(), seeds.as_slice());
    }

    #[test]
    fn test_radius_change_resamples() {
        let mut pipeline = StreamlinePipeline::new(StreamlineParams {
            sampling_radius: 0.15,
            ..StreamlineParams::default()
        })
        .unwrap();
        pipeline.load_grid(torus_grid(32));
        pipeline.rebuild().unwrap();
        let dense = pipeline.stats().poisson_points;

        let dirty = pipeline
            .set_params(StreamlineParams {
                sampling_radius: 0.45,
                ..StreamlineParams::default()
            })
            .unwrap();
        assert!(dirty.contains(Stage::Poisson));
        assert!(dirty.contains(Stage::Streamlines));
        assert!(!dirty.contains(Stage::Gradient));

        pipeline.update().unwrap();
        let sparse = pipeline.stats().poisson_points;
        assert!(sparse > 0 && sparse < dense, "{} !< {}", sparse, dense);
    }

    #[test]
    fn test_vertex_buffer_fits_dense_seeds() {
        let mut pipeline = StreamlinePipeline::new(StreamlineParams {
            sampling_radius: 0.05,
            ..StreamlineParams::default()
        })
        .unwrap();
        pipeline.load_grid(torus_grid(40));
        let geometry = pipeline.rebuild().unwrap();
        let stats = pipeline.stats().clone();

        assert!(stats.poisson_points > 500, "{} seeds", stats.poisson_points);
        assert_eq!(stats.dropped_vertices, 0);
        assert!(stats.vertices > 0);
        assert_eq!(geometry.vertices.len(), stats.vertices);
        assert_eq!(pipeline.geometry().indirect, geometry.indirect);

        let buffers = pipeline.buffers().unwrap();
        assert!(buffers.vertices.capacity() >= stats.vertices);

        // A sparser resample reuses the larger buffer.
        let capacity = buffers.vertices.capacity();
        pipeline
            .set_params(StreamlineParams {
                sampling_radius: 0.2,
                ..StreamlineParams::default()
            })
            .unwrap();
        pipeline.update().unwrap();
        assert_eq!(pipeline.buffers().unwrap().vertices.capacity(), capacity);
        assert_eq!(pipeline.stats().dropped_vertices, 0);
    }

    #[test]
    fn test_reload_reallocates_on_new_dims() {
        let mut pipeline = StreamlinePipeline::new(StreamlineParams::default()).unwrap();
        pipeline.load_grid(torus_grid(24));
        pipeline.rebuild().unwrap();
        assert_eq!(pipeline.buffers().unwrap().dims, GridDims::cubic(24));

        pipeline.load_grid(torus_grid(28));
        assert_eq!(pipeline.buffers().unwrap().dims, GridDims::cubic(28));
        assert_eq!(pipeline.pending(), StageSet::all());
        pipeline.update().unwrap();
        assert!(pipeline.stats().surface_points > 0);
    }
}
