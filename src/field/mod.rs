pub mod sample;
pub mod sdf;
pub mod types;
pub mod voxel_grid;

// Re-export commonly used items
pub use sample::{trilinear, FieldValue, Stencil};
pub use types::{index, GridDims, PrincipalCurvature, Pt3, Vec3, MIN_DIRECTION_LENGTH};
pub use voxel_grid::{load_grid, GridDescriptor, VoxelGrid};
