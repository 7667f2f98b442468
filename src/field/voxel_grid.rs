use crate::error::{PipelineError, Result};
use crate::field::sample::trilinear;
use crate::field::types::{GridDims, Pt3, Vec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Dense voxel grid of signed distance values.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    pub dims: GridDims,
    /// World position of voxel (0, 0, 0).
    pub origin: Pt3,
    /// Per-axis voxel spacing in world units.
    pub spacing: Vec3,
    /// The SDF values, stored flat and indexed by `x + y*nx + z*nx*ny`.
    pub data: Vec<f32>,
}

impl VoxelGrid {
    /// Creates a grid filled with zeros.
    pub fn new(dims: GridDims, origin: Pt3, spacing: Vec3) -> Result<Self> {
        validate_layout(dims, &spacing)?;
        Ok(Self {
            dims,
            origin,
            spacing,
            data: vec![0.0; dims.voxel_count()],
        })
    }

    /// Evaluates an SDF at every voxel in parallel.
    pub fn from_fn<F>(dims: GridDims, origin: Pt3, spacing: Vec3, sdf: F) -> Result<Self>
    where
        F: Fn(&Pt3) -> f32 + Sync,
    {
        let mut grid = Self::new(dims, origin, spacing)?;
        let layout = grid.clone_layout();

        grid.data
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, value)| {
                let (x, y, z) = dims.coords(index);
                let pos = layout.get_position(x as f32, y as f32, z as f32);
                *value = sdf(&pos);
            });

        Ok(grid)
    }

    /// Cubic grid of `resolution` voxels per axis spanning `[-half_extent, half_extent]`.
    pub fn centered<F>(resolution: u32, half_extent: f32, sdf: F) -> Result<Self>
    where
        F: Fn(&Pt3) -> f32 + Sync,
    {
        if resolution < 2 {
            return Err(PipelineError::InvalidGrid(format!(
                "resolution must be at least 2, got {}",
                resolution
            )));
        }
        let step = 2.0 * half_extent / (resolution as f32 - 1.0);
        Self::from_fn(
            GridDims::cubic(resolution),
            Pt3::new(-half_extent, -half_extent, -half_extent),
            Vec3::new(step, step, step),
            sdf,
        )
    }

    /// Builds a grid from a flat little-endian `f32` array matching `dims`.
    pub fn from_le_bytes(dims: GridDims, origin: Pt3, spacing: Vec3, bytes: &[u8]) -> Result<Self> {
        validate_layout(dims, &spacing)?;
        let expected = dims.voxel_count() * std::mem::size_of::<f32>();
        if bytes.len() != expected {
            return Err(PipelineError::DataLength {
                expected,
                actual: bytes.len(),
            });
        }

        let data = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self {
            dims,
            origin,
            spacing,
            data,
        })
    }

    fn clone_layout(&self) -> GridLayout {
        GridLayout {
            origin: self.origin,
            spacing: self.spacing,
        }
    }

    /// Returns the SDF value at a grid coordinate.
    #[inline]
    pub fn get(&self, x: u32, y: u32, z: u32) -> f32 {
        self.data[self.dims.index(x, y, z)]
    }

    /// Returns the world position of a grid point (can be fractional).
    pub fn get_position(&self, x: f32, y: f32, z: f32) -> Pt3 {
        self.clone_layout().get_position(x, y, z)
    }

    /// Converts a world position to continuous grid coordinates.
    pub fn to_grid(&self, pos: &Pt3) -> Vec3 {
        (pos - self.origin).component_div(&self.spacing)
    }

    /// Whether a world position lies inside the sampled volume.
    pub fn contains(&self, pos: &Pt3) -> bool {
        let g = self.to_grid(pos);
        g.x >= 0.0
            && g.y >= 0.0
            && g.z >= 0.0
            && g.x <= (self.dims.nx - 1) as f32
            && g.y <= (self.dims.ny - 1) as f32
            && g.z <= (self.dims.nz - 1) as f32
    }

    /// Trilinearly interpolated SDF value at a world position.
    pub fn sample(&self, pos: &Pt3) -> f32 {
        trilinear(&self.data, self.dims, &self.to_grid(pos))
    }

    pub fn min_spacing(&self) -> f32 {
        self.spacing.min()
    }

    /// World-space size of the sampled volume.
    pub fn extent(&self) -> Vec3 {
        Vec3::new(
            (self.dims.nx - 1) as f32 * self.spacing.x,
            (self.dims.ny - 1) as f32 * self.spacing.y,
            (self.dims.nz - 1) as f32 * self.spacing.z,
        )
    }
}

#[derive(Clone, Copy)]
struct GridLayout {
    origin: Pt3,
    spacing: Vec3,
}

impl GridLayout {
    fn get_position(&self, x: f32, y: f32, z: f32) -> Pt3 {
        self.origin
            + Vec3::new(
                x * self.spacing.x,
                y * self.spacing.y,
                z * self.spacing.z,
            )
    }
}

fn validate_layout(dims: GridDims, spacing: &Vec3) -> Result<()> {
    if dims.nx < 2 || dims.ny < 2 || dims.nz < 2 {
        return Err(PipelineError::InvalidGrid(format!(
            "dimensions must be at least 2 per axis, got {}x{}x{}",
            dims.nx, dims.ny, dims.nz
        )));
    }
    if !(spacing.x > 0.0 && spacing.y > 0.0 && spacing.z > 0.0) {
        return Err(PipelineError::InvalidGrid(format!(
            "spacing must be positive, got ({}, {}, {})",
            spacing.x, spacing.y, spacing.z
        )));
    }
    Ok(())
}

/// JSON sidecar describing a raw SDF grid on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridDescriptor {
    pub dims: GridDims,
    pub origin: [f32; 3],
    pub spacing: [f32; 3],
    /// Raw little-endian `f32` file, relative to the descriptor.
    pub data: PathBuf,
}

/// Load a grid from its JSON descriptor and raw data file.
pub fn load_grid(descriptor_path: &Path) -> Result<VoxelGrid> {
    let content = fs::read_to_string(descriptor_path)?;
    let descriptor: GridDescriptor = serde_json::from_str(&content)?;

    let data_path = match descriptor_path.parent() {
        Some(dir) => dir.join(&descriptor.data),
        None => descriptor.data.clone(),
    };
    let bytes = fs::read(&data_path)?;

    VoxelGrid::from_le_bytes(
        descriptor.dims,
        Pt3::from(descriptor.origin),
        Vec3::from(descriptor.spacing),
        &bytes,
    )
}
