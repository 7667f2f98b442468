//! Curvature-aligned streamlines over signed distance fields.
//!
//! A voxel grid goes through gradient estimation, surface point
//! extraction, Poisson-disk seeding, principal curvature estimation and
//! streamline integration. The result is a triangle list plus indirect
//! draw arguments ready for a rasterizer.

pub mod error;
pub mod field;
pub mod geometry;
pub mod gpu;
pub mod kernels;
pub mod pipeline;
pub mod settings;

pub use error::{PipelineError, Result};
pub use field::{load_grid, GridDims, VoxelGrid};
pub use geometry::{serialize_geometry_to_bytes, DrawGeometry, DrawIndirectArgs, StrokeVertex};
pub use pipeline::{PipelineStats, Stage, StageSet, StreamlinePipeline};
pub use settings::{load_params, save_params, StreamlineParams};
