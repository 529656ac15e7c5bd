//! Depth-buffer to triangle-mesh generators: quad, line-based and
//! loop-based (depth-contour), behind the shared [`Generator`] trait.

pub mod generator;
pub mod line;
pub mod loop_generator;
pub mod loop_gpu;
pub mod loop_triangulation;
pub mod quad;

pub use generator::{GeneratedMesh, Generator, GeneratorError, ViewBuffers};
pub use line::LineGenerator;
pub use loop_generator::LoopGenerator;
pub use loop_gpu::{Loop, LoopBuffers, LoopCounters, LoopGpuPass, LoopSegment, SoftwareLoopGpu};
pub use quad::QuadGenerator;

use depth_stream_proto::MeshGeneratorKind;

/// Constructs the right generator for a negotiated mesh generator kind,
/// replacing the original's factory switch in the session setup path.
pub fn generator_for(kind: MeshGeneratorKind) -> Box<dyn Generator + Send> {
    match kind {
        MeshGeneratorKind::Quad => Box::new(QuadGenerator::default()),
        MeshGeneratorKind::Line => Box::new(LineGenerator::default()),
        MeshGeneratorKind::Loop => Box::new(LoopGenerator::default()),
    }
}
