use crate::{
    cbt::sum_reduction::SumReductionTree,
    compute::{dispatch_chunks, IndirectBuffer},
    height::TerrainSurface,
    leb,
};
use bevy::math::Vec2;
use bytemuck::{Pod, Zeroable};

/// A vertex of the triangle stream handed to the rasterizer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl TerrainVertex {
    pub fn new(surface: &TerrainSurface, uv: Vec2) -> Self {
        Self {
            position: surface.position(uv).to_array(),
            normal: surface.normal(uv).to_array(),
            uv: uv.to_array(),
        }
    }
}

/// The kernel decoding every leaf into three vertices.
pub struct VertexGenerationPipeline;

impl VertexGenerationPipeline {
    /// Fills `vertices` with the triangle list of the current leaves, sized by the draw
    /// arguments in the indirect buffer.
    pub fn run(
        vertices: &mut Vec<TerrainVertex>,
        tree: &SumReductionTree,
        buffer: &IndirectBuffer,
        surface: &TerrainSurface,
    ) {
        let vertex_count = buffer.draw_args().vertex_count as usize;
        vertices.resize(vertex_count, TerrainVertex::default());

        dispatch_chunks(vertices, 3, |leaf_index, triangle| {
            let node = tree.leaf_index_to_heap_index(leaf_index as u32);
            let [v0, v1, v2] = leb::decode(node);

            // counter-clockwise in uv turns clockwise when seen from above the xz plane
            for (vertex, uv) in triangle.iter_mut().zip([v0, v2, v1]) {
                *vertex = TerrainVertex::new(surface, uv);
            }
        });
    }
}
