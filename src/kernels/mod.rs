//! Data-parallel pipeline kernels.
//!
//! Every kernel is a function of an invocation id, launched over a flat
//! id range with rayon. A dispatch returns only after all invocations
//! finished, which is the barrier between stages.

pub mod buffers;
pub mod curvature;
pub mod curvature_range;
pub mod gradient;
pub mod poisson;
pub mod streamlines;
pub mod surface_points;

use rayon::prelude::*;

pub use buffers::{AppendBuffer, DispatchIndirectArgs};

/// Invocations per workgroup when sizing indirect dispatches.
pub const WORKGROUP_SIZE: u32 = 64;

/// Run `kernel` once for every id in `0..invocations`.
pub fn dispatch<F>(invocations: usize, kernel: F)
where
    F: Fn(usize) + Sync + Send,
{
    (0..invocations).into_par_iter().for_each(kernel);
}

/// Run `kernel` over the invocation range recorded in `args`. Kernels
/// must bounds-check their id against the real item count.
pub fn dispatch_indirect<F>(args: &DispatchIndirectArgs, kernel: F)
where
    F: Fn(usize) + Sync + Send,
{
    dispatch(args.invocations(), kernel);
}
