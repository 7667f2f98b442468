use serde::{Deserialize, Serialize};

pub type Pt3 = nalgebra::Point3<f32>;
pub type Vec3 = nalgebra::Vector3<f32>;

/// Flattened index of voxel `(x, y, z)`: `x + y*nx + z*nx*ny`.
#[inline]
pub fn index(x: u32, y: u32, z: u32, dims: GridDims) -> usize {
    x as usize + y as usize * dims.nx as usize + z as usize * dims.nx as usize * dims.ny as usize
}

/// Dimensions of a dense 3D array addressed by a flat index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDims {
    pub nx: u32,
    pub ny: u32,
    pub nz: u32,
}

impl GridDims {
    pub const fn new(nx: u32, ny: u32, nz: u32) -> Self {
        Self { nx, ny, nz }
    }

    pub const fn cubic(n: u32) -> Self {
        Self::new(n, n, n)
    }

    pub fn voxel_count(&self) -> usize {
        self.nx as usize * self.ny as usize * self.nz as usize
    }

    /// Dimensions of the cell lattice spanned by these voxels (one less per axis).
    pub fn cells(&self) -> GridDims {
        GridDims::new(
            self.nx.saturating_sub(1),
            self.ny.saturating_sub(1),
            self.nz.saturating_sub(1),
        )
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        index(x, y, z, *self)
    }

    /// Inverse of [`GridDims::index`].
    #[inline]
    pub fn coords(&self, index: usize) -> (u32, u32, u32) {
        let nx = self.nx as usize;
        let nxy = nx * self.ny as usize;
        let x = index % nx;
        let y = (index / nx) % self.ny as usize;
        let z = index / nxy;
        (x as u32, y as u32, z as u32)
    }

    #[inline]
    pub fn contains(&self, x: i64, y: i64, z: i64) -> bool {
        x >= 0
            && y >= 0
            && z >= 0
            && x < self.nx as i64
            && y < self.ny as i64
            && z < self.nz as i64
    }

    /// Clamp signed coordinates to the nearest valid voxel.
    #[inline]
    pub fn clamp(&self, x: i64, y: i64, z: i64) -> (u32, u32, u32) {
        (
            x.clamp(0, self.nx as i64 - 1) as u32,
            y.clamp(0, self.ny as i64 - 1) as u32,
            z.clamp(0, self.nz as i64 - 1) as u32,
        )
    }
}

/// Per-voxel principal curvature record.
///
/// `direction` is a unit tangent vector, or zero where the principal
/// direction is undefined (umbilic or flat regions).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrincipalCurvature {
    pub direction: Vec3,
    pub magnitude: f32,
}

impl Default for PrincipalCurvature {
    fn default() -> Self {
        Self {
            direction: Vec3::zeros(),
            magnitude: 0.0,
        }
    }
}

impl PrincipalCurvature {
    pub fn has_direction(&self) -> bool {
        self.direction.magnitude_squared() > MIN_DIRECTION_LENGTH * MIN_DIRECTION_LENGTH
    }
}

/// Direction vectors shorter than this carry no usable orientation.
pub const MIN_DIRECTION_LENGTH: f32 = 1e-3;
