use crate::field::{PrincipalCurvature, Pt3, VoxelGrid};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};

use super::curvature::magnitude_at;
use super::{dispatch_indirect, DispatchIndirectArgs};

/// Fixed-point steps per unit of curvature.
pub const CURVATURE_QUANTIZATION: f32 = 4096.0;

/// Quantized (min, max) curvature magnitude over the seed points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CurvatureRange {
    pub min: u32,
    pub max: u32,
}

impl Default for CurvatureRange {
    fn default() -> Self {
        Self { min: u32::MAX, max: 0 }
    }
}

impl CurvatureRange {
    pub fn quantize(curvature: f32) -> u32 {
        // Float-to-int casts saturate, NaN maps to 0.
        (curvature.abs() * CURVATURE_QUANTIZATION).round() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn min_value(&self) -> f32 {
        self.min as f32 / CURVATURE_QUANTIZATION
    }

    pub fn max_value(&self) -> f32 {
        self.max as f32 / CURVATURE_QUANTIZATION
    }

    /// Position of `curvature` within the range, in `[0, 1]`.
    pub fn normalized(&self, curvature: f32) -> f32 {
        if self.is_empty() || self.max == self.min {
            return 0.0;
        }
        let q = Self::quantize(curvature).clamp(self.min, self.max);
        (q - self.min) as f32 / (self.max - self.min) as f32
    }

    /// Linear remap of `curvature` from this range onto `[lo, hi]`.
    pub fn remap(&self, curvature: f32, lo: f32, hi: f32) -> f32 {
        lo + (hi - lo) * self.normalized(curvature)
    }
}

/// Atomic min/max accumulator behind a [`CurvatureRange`].
#[derive(Debug)]
pub struct CurvatureRangeBuffer {
    min: AtomicU32,
    max: AtomicU32,
}

impl Default for CurvatureRangeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CurvatureRangeBuffer {
    pub fn new() -> Self {
        let empty = CurvatureRange::default();
        Self {
            min: AtomicU32::new(empty.min),
            max: AtomicU32::new(empty.max),
        }
    }

    pub fn reset(&self) {
        let empty = CurvatureRange::default();
        self.min.store(empty.min, Ordering::Relaxed);
        self.max.store(empty.max, Ordering::Relaxed);
    }

    pub fn accumulate(&self, curvature: f32) {
        let q = CurvatureRange::quantize(curvature);
        self.min.fetch_min(q, Ordering::Relaxed);
        self.max.fetch_max(q, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CurvatureRange {
        CurvatureRange {
            min: self.min.load(Ordering::Acquire),
            max: self.max.load(Ordering::Acquire),
        }
    }
}

/// Reset `range` and reduce the curvature magnitude over every seed.
/// `seeds_args` is the dispatch record produced by the sampler.
pub fn reduce_curvature_range(
    grid: &VoxelGrid,
    curvature: &[PrincipalCurvature],
    seeds: &[Pt3],
    seeds_args: &DispatchIndirectArgs,
    range: &CurvatureRangeBuffer,
) -> CurvatureRange {
    range.reset();

    dispatch_indirect(seeds_args, |id| {
        if id >= seeds.len() {
            return;
        }
        let pos = grid.to_grid(&seeds[id]);
        range.accumulate(magnitude_at(curvature, grid.dims, &pos));
    });

    range.snapshot()
}
