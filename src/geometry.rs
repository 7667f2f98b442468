//! Stroke geometry handed to the rasterizer.

use bytemuck::{Pod, Zeroable};
use serde::Serialize;

use crate::field::{Pt3, Vec3};

/// Triangle-list vertex: position and surface normal.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct StrokeVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl StrokeVertex {
    pub fn new(position: &Pt3, normal: &Vec3) -> Self {
        Self {
            position: [position.x, position.y, position.z],
            normal: [normal.x, normal.y, normal.z],
        }
    }

    pub fn position(&self) -> Pt3 {
        Pt3::from(self.position)
    }
}

/// Arguments of a non-indexed indirect draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable, Serialize)]
pub struct DrawIndirectArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl DrawIndirectArgs {
    pub fn with_vertex_count(vertex_count: u32) -> Self {
        Self {
            vertex_count,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

impl Default for DrawIndirectArgs {
    fn default() -> Self {
        Self::with_vertex_count(0)
    }
}

/// Output of one streamline build.
#[derive(Debug, Clone, Default)]
pub struct DrawGeometry {
    pub vertices: Vec<StrokeVertex>,
    pub indirect: DrawIndirectArgs,
}

impl DrawGeometry {
    pub fn triangle_count(&self) -> usize {
        self.indirect.vertex_count as usize / 3
    }

    pub fn triangles(&self) -> impl Iterator<Item = &[StrokeVertex]> {
        self.vertices.chunks_exact(3)
    }
}

const HEADER_LEN: usize = 20;

/// Serialize geometry into one byte buffer: the four indirect draw fields
/// and the vertex byte length as little-endian `u32`, then raw vertices.
pub fn serialize_geometry_to_bytes(geometry: &DrawGeometry) -> Vec<u8> {
    let vertex_bytes: &[u8] = bytemuck::cast_slice(&geometry.vertices);
    let mut bytes = Vec::with_capacity(HEADER_LEN + vertex_bytes.len());

    let args = geometry.indirect;
    bytes.extend_from_slice(&args.vertex_count.to_le_bytes());
    bytes.extend_from_slice(&args.instance_count.to_le_bytes());
    bytes.extend_from_slice(&args.first_vertex.to_le_bytes());
    bytes.extend_from_slice(&args.first_instance.to_le_bytes());
    bytes.extend_from_slice(&(vertex_bytes.len() as u32).to_le_bytes());
    bytes.extend_from_slice(vertex_bytes);

    bytes
}
