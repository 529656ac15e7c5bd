//! The generator-kind variant plus the `Generator` trait that replaces the
//! original's `MeshGenerator` / `MeshGeneratorFrame` inheritance hierarchy.

use depth_stream_proto::{MeshSettings, ViewMetadata, Vertex, Index};

/// A single view's depth/normal/object-id input the GPU phase rasterized.
#[derive(Debug, Clone)]
pub struct ViewBuffers {
    pub resolution: (u32, u32),
    pub depth: Vec<f32>,
    pub normal: Vec<[f32; 2]>,
    pub object_id: Vec<u32>,
}

impl ViewBuffers {
    pub fn pixel_index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.resolution.0 as usize) + (x as usize)
    }
}

/// The mesh a generator produces for one view of one frame.
#[derive(Debug, Clone, Default)]
pub struct GeneratedMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<Index>,
}

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("loop count {found} exceeds buffer capacity {max}")]
    LoopCountExceeded { found: u32, max: u32 },
    #[error("loop segment count {found} exceeds buffer capacity {max}")]
    SegmentCountExceeded { found: u32, max: u32 },
}

/// Replaces the abstract `MeshGenerator`/`MeshGeneratorFrame` base classes:
/// one object per view, reconfigured by `apply` whenever settings change,
/// triangulating one `ViewBuffers` snapshot per call.
pub trait Generator {
    fn apply(&mut self, settings: &MeshSettings);

    fn triangulate(
        &mut self,
        buffers: &ViewBuffers,
        metadata: &mut ViewMetadata,
    ) -> Result<GeneratedMesh, GeneratorError>;
}
