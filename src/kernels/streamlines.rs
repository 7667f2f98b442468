//! Streamline tracing along the principal curvature direction field and
//! ribbon emission into the shared stroke vertex buffer.

use tracing::debug;

use crate::field::{PrincipalCurvature, Pt3, Stencil, Vec3, VoxelGrid, MIN_DIRECTION_LENGTH};
use crate::geometry::{DrawIndirectArgs, StrokeVertex};
use crate::settings::StreamlineParams;

use super::curvature::{magnitude_at, tangent_basis};
use super::curvature_range::CurvatureRange;
use super::gradient::normal_at;
use super::{dispatch_indirect, AppendBuffer, DispatchIndirectArgs};

/// Integration steps traced in each direction from a seed.
pub const MAX_HALF_STEPS: usize = 128;
pub const MAX_STREAMLINE_POINTS: usize = 2 * MAX_HALF_STEPS + 1;
/// Two triangles per polyline segment.
pub const VERTICES_PER_SEGMENT: u32 = 6;

/// Blended directions shorter than this are treated as undefined.
const MIN_BLENDED_DIRECTION: f32 = 0.1;
pub const MAX_VERTEX_CAPACITY: usize = 1 << 22;

/// Width multiplier at fractional arc length `s`: zero at both ends,
/// one in the middle.
pub fn taper_factor(s: f32) -> f32 {
    let t = 2.0 * s.clamp(0.0, 1.0) - 1.0;
    1.0 - t * t
}

/// One traced polyline point. `direction` is zero where the field is
/// undefined, which collapses the ribbon there.
#[derive(Debug, Clone, Copy)]
pub struct StreamlinePoint {
    pub position: Pt3,
    pub normal: Vec3,
    pub direction: Vec3,
}

pub struct StreamlineBuilder<'a> {
    grid: &'a VoxelGrid,
    gradient: &'a [Vec3],
    curvature: &'a [PrincipalCurvature],
    range: CurvatureRange,
    params: &'a StreamlineParams,
    step: f32,
}

impl<'a> StreamlineBuilder<'a> {
    pub fn new(
        grid: &'a VoxelGrid,
        gradient: &'a [Vec3],
        curvature: &'a [PrincipalCurvature],
        range: CurvatureRange,
        params: &'a StreamlineParams,
    ) -> Self {
        Self {
            grid,
            gradient,
            curvature,
            range,
            params,
            step: grid.min_spacing() * 0.25,
        }
    }

    /// Integration step in world units.
    pub fn step(&self) -> f32 {
        self.step
    }

    /// Integration steps taken each way for a stroke of `length`.
    pub fn half_steps(&self, length: f32) -> usize {
        ((0.5 * length / self.step).round() as usize).min(MAX_HALF_STEPS)
    }

    /// Vertices needed when every one of `seed_count` strokes reaches its
    /// longest possible ribbon, capped at `MAX_VERTEX_CAPACITY`.
    pub fn vertex_capacity(&self, seed_count: usize) -> usize {
        let params = self.params;
        let longest = if params.scale_by_curvature {
            params.max_length
        } else {
            params.length
        };
        let per_seed = 2 * self.half_steps(longest) * VERTICES_PER_SEGMENT as usize;
        seed_count.saturating_mul(per_seed).min(MAX_VERTEX_CAPACITY)
    }

    /// Trace one streamline per seed and append its ribbon to `out`.
    /// Polylines that do not fit are dropped whole.
    pub fn build(
        &self,
        seeds: &[Pt3],
        seeds_args: &DispatchIndirectArgs,
        out: &AppendBuffer<StrokeVertex>,
    ) -> DrawIndirectArgs {
        dispatch_indirect(seeds_args, |id| {
            if id >= seeds.len() {
                return;
            }
            let (length, half_width) = self.stroke_size(&seeds[id]);
            let line = self.trace(&seeds[id], length);
            self.emit_ribbon(&line, half_width, out);
        });

        debug!(
            seeds = seeds.len(),
            vertices = out.len(),
            dropped = out.dropped(),
            "streamlines emitted"
        );
        DrawIndirectArgs::with_vertex_count(out.len() as u32)
    }

    /// Total length and half-width of the stroke grown from `seed`.
    pub fn stroke_size(&self, seed: &Pt3) -> (f32, f32) {
        let params = self.params;
        if !params.scale_by_curvature {
            return (params.length, params.width);
        }
        let k = magnitude_at(self.curvature, self.grid.dims, &self.grid.to_grid(seed));
        (
            self.range.remap(k, params.min_length, params.max_length),
            self.range.remap(k, params.min_width, params.max_width),
        )
    }

    /// Polyline through `seed`: the backward half reversed, the seed, then
    /// the forward half. Where the direction field is undefined the line
    /// keeps its previous heading in the tangent plane and its points carry
    /// a zero direction. Empty only when the seed has no surface normal.
    pub fn trace(&self, seed: &Pt3, length: f32) -> Vec<StreamlinePoint> {
        let seed = self.reproject(seed).unwrap_or(*seed);
        let Some(normal) = self.normal(&seed) else {
            return Vec::new();
        };
        let direction = self.direction_at(&seed, None);
        let heading = direction.unwrap_or_else(|| tangent_basis(&normal).0);
        let direction = direction.unwrap_or_else(Vec3::zeros);

        let steps = self.half_steps(length);
        let forward = self.trace_half(seed, heading, steps);
        let backward = self.trace_half(seed, -heading, steps);

        let mut line = Vec::with_capacity(forward.len() + backward.len() + 1);
        line.extend(backward.iter().rev().map(|p| StreamlinePoint {
            direction: -p.direction,
            ..*p
        }));
        line.push(StreamlinePoint {
            position: seed,
            normal,
            direction,
        });
        line.extend(forward);
        line
    }

    fn trace_half(&self, start: Pt3, heading: Vec3, steps: usize) -> Vec<StreamlinePoint> {
        let mut points = Vec::with_capacity(steps);
        let mut pos = start;
        let mut reference = heading;

        for _ in 0..steps {
            let Some(dir) = self
                .rk4(&pos, &reference)
                .or_else(|| self.coast(&pos, &reference))
            else {
                break;
            };
            let Some(next) = self.reproject(&(pos + dir * self.step)) else {
                break;
            };
            if !self.grid.contains(&next) {
                break;
            }
            let Some(normal) = self.normal(&next) else {
                break;
            };
            let direction = self
                .direction_at(&next, Some(&dir))
                .unwrap_or_else(Vec3::zeros);

            points.push(StreamlinePoint {
                position: next,
                normal,
                direction,
            });
            pos = next;
            reference = dir;
        }

        points
    }

    /// Classic fourth-order Runge-Kutta on the sign-locked direction field.
    fn rk4(&self, pos: &Pt3, reference: &Vec3) -> Option<Vec3> {
        let h = self.step;
        let k1 = self.direction_at(pos, Some(reference))?;
        let k2 = self.direction_at(&(pos + k1 * (0.5 * h)), Some(&k1))?;
        let k3 = self.direction_at(&(pos + k2 * (0.5 * h)), Some(&k2))?;
        let k4 = self.direction_at(&(pos + k3 * h), Some(&k3))?;
        ((k1 + k2 * 2.0 + k3 * 2.0 + k4) / 6.0).try_normalize(MIN_BLENDED_DIRECTION)
    }

    /// `heading` projected onto the tangent plane at `pos`.
    fn coast(&self, pos: &Pt3, heading: &Vec3) -> Option<Vec3> {
        let n = self.normal(pos)?;
        (heading - n * heading.dot(&n)).try_normalize(MIN_DIRECTION_LENGTH)
    }

    /// Unit tangent direction at `pos`, sign-locked to `reference`.
    ///
    /// Principal directions are only defined up to sign, so every corner is
    /// flipped into the reference hemisphere before blending. Without a
    /// reference the heaviest corner with a direction is used.
    pub fn direction_at(&self, pos: &Pt3, reference: Option<&Vec3>) -> Option<Vec3> {
        let grid_pos = self.grid.to_grid(pos);
        let stencil = Stencil::new(self.grid.dims, &grid_pos);

        let reference = match reference {
            Some(r) => *r,
            None => stencil
                .indices
                .iter()
                .zip(stencil.weights.iter())
                .filter(|(i, _)| self.curvature[**i].has_direction())
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(&i, _)| self.curvature[i].direction)?,
        };

        let blended = stencil.blend_with(self.curvature, |c| {
            if c.direction.dot(&reference) < 0.0 {
                -c.direction
            } else {
                c.direction
            }
        });

        let n = normal_at(self.gradient, self.grid.dims, &grid_pos)?;
        let tangent = blended - n * blended.dot(&n);
        let dir = tangent.try_normalize(MIN_BLENDED_DIRECTION)?;
        Some(if dir.dot(&reference) < 0.0 { -dir } else { dir })
    }

    fn normal(&self, pos: &Pt3) -> Option<Vec3> {
        normal_at(self.gradient, self.grid.dims, &self.grid.to_grid(pos))
    }

    /// One Newton step back onto the zero level set.
    fn reproject(&self, pos: &Pt3) -> Option<Pt3> {
        let n = self.normal(pos)?;
        Some(pos - n * self.grid.sample(pos))
    }

    /// Ribbon half-widths along `line`.
    pub fn widths(&self, line: &[StreamlinePoint], half_width: f32) -> Vec<f32> {
        let mut arc = Vec::with_capacity(line.len());
        let mut total = 0.0;
        for (i, point) in line.iter().enumerate() {
            if i > 0 {
                total += (point.position - line[i - 1].position).magnitude();
            }
            arc.push(total);
        }

        line.iter()
            .zip(arc)
            .map(|(point, s)| {
                if point.direction == Vec3::zeros() {
                    return 0.0;
                }
                if !self.params.taper || total <= 0.0 {
                    return half_width;
                }
                half_width * taper_factor(s / total)
            })
            .collect()
    }

    /// Emit two triangles per segment. Returns the first vertex index, or
    /// `None` when the line is too short or the buffer is full.
    fn emit_ribbon(
        &self,
        line: &[StreamlinePoint],
        half_width: f32,
        out: &AppendBuffer<StrokeVertex>,
    ) -> Option<u32> {
        if line.len() < 2 {
            return None;
        }
        let widths = self.widths(line, half_width);
        let edges: Vec<(Pt3, Pt3)> = line
            .iter()
            .zip(widths.iter())
            .map(|(p, &w)| {
                let binormal = p
                    .normal
                    .cross(&p.direction)
                    .try_normalize(f32::EPSILON)
                    .unwrap_or_else(Vec3::zeros);
                (p.position - binormal * w, p.position + binormal * w)
            })
            .collect();

        let count = (line.len() as u32 - 1) * VERTICES_PER_SEGMENT;
        let base = out.reserve(count)?;

        let mut index = base;
        let mut put = |position: &Pt3, normal: &Vec3| {
            out.write(index, StrokeVertex::new(position, normal));
            index += 1;
        };
        for i in 0..line.len() - 1 {
            let (l0, r0) = &edges[i];
            let (l1, r1) = &edges[i + 1];
            let (n0, n1) = (&line[i].normal, &line[i + 1].normal);

            put(l0, n0);
            put(r0, n0);
            put(l1, n1);

            put(r0, n0);
            put(r1, n1);
            put(l1, n1);
        }

        Some(base)
    }
}
