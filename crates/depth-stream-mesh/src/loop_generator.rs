//! Top-level loop-based (depth-contour) generator: wires the GPU contour
//! extraction pass to the CPU sweep-line triangulator behind the shared
//! `Generator` trait.

use std::time::Instant;

use depth_stream_proto::{
    GeneratorViewMetadata, LoopViewMetadata, MeshGeneratorKind, MeshGeneratorSettings, MeshSettings, ViewMetadata,
};

use crate::generator::{GeneratedMesh, Generator, GeneratorError, ViewBuffers};
use crate::loop_gpu::{LoopGpuPass, SoftwareLoopGpu, LOOP_COUNT_MAX, LOOP_SEGMENT_COUNT_MAX};
use crate::loop_triangulation::LoopTriangulation;
use depth_stream_proto::LoopSettings;

pub struct LoopGenerator {
    depth_max: f32,
    settings: LoopSettings,
    gpu: Box<dyn LoopGpuPass + Send>,
    triangulation: LoopTriangulation,
}

impl Default for LoopGenerator {
    fn default() -> Self {
        Self {
            depth_max: 0.995,
            settings: LoopSettings::default(),
            gpu: Box::new(SoftwareLoopGpu),
            triangulation: LoopTriangulation::default(),
        }
    }
}

impl LoopGenerator {
    pub fn with_gpu_pass(gpu: Box<dyn LoopGpuPass + Send>) -> Self {
        Self {
            gpu,
            ..Self::default()
        }
    }
}

impl Generator for LoopGenerator {
    fn apply(&mut self, settings: &MeshSettings) {
        self.depth_max = settings.depth_max;
        if let MeshGeneratorSettings::Loop(loop_settings) = settings.generator {
            self.settings = loop_settings;
        }
    }

    fn triangulate(
        &mut self,
        buffers: &ViewBuffers,
        metadata: &mut ViewMetadata,
    ) -> Result<GeneratedMesh, GeneratorError> {
        let cpu_start = Instant::now();

        let gpu_buffers = self.gpu.extract(buffers, &self.settings, self.depth_max);

        if gpu_buffers.counters.loop_counter > LOOP_COUNT_MAX {
            return Err(GeneratorError::LoopCountExceeded {
                found: gpu_buffers.counters.loop_counter,
                max: LOOP_COUNT_MAX,
            });
        }
        if gpu_buffers.counters.segment_counter > LOOP_SEGMENT_COUNT_MAX {
            return Err(GeneratorError::SegmentCountExceeded {
                found: gpu_buffers.counters.segment_counter,
                max: LOOP_SEGMENT_COUNT_MAX,
            });
        }

        let mut loop_metadata = LoopViewMetadata::default();
        let (vertices, indices) = self.triangulation.process(
            buffers.resolution,
            self.settings.triangle_scale,
            self.settings.sweep_order,
            &gpu_buffers.loops,
            gpu_buffers.counters,
            &gpu_buffers.segments,
            &mut loop_metadata,
        );
        loop_metadata.time_cpu = cpu_start.elapsed().as_secs_f32() * 1000.0;

        metadata.generator = GeneratorViewMetadata::Loop(loop_metadata);

        Ok(GeneratedMesh { vertices, indices })
    }
}

pub fn empty_metadata() -> ViewMetadata {
    ViewMetadata::empty(MeshGeneratorKind::Loop)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffers_with_square(width: u32, height: u32) -> ViewBuffers {
        let mut depth = vec![0.9f32; (width * height) as usize];
        for y in 4..8 {
            for x in 4..8 {
                depth[(y * width + x) as usize] = 0.2;
            }
        }
        ViewBuffers {
            resolution: (width, height),
            depth,
            normal: vec![[0.0, 1.0]; (width * height) as usize],
            object_id: vec![0; (width * height) as usize],
        }
    }

    #[test]
    fn depth_discontinuity_produces_a_triangulated_mesh() {
        let mut generator = LoopGenerator {
            settings: LoopSettings {
                loop_length_min: 1,
                ..LoopSettings::default()
            },
            ..LoopGenerator::default()
        };
        let buffers = buffers_with_square(16, 16);
        let mut metadata = empty_metadata();

        let mesh = generator.triangulate(&buffers, &mut metadata).unwrap();

        assert!(!mesh.vertices.is_empty());
        assert_eq!(mesh.indices.len() % 3, 0);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));

        match metadata.generator {
            GeneratorViewMetadata::Loop(loop_metadata) => assert_eq!(loop_metadata.loop_count, 1),
            _ => panic!("expected loop metadata"),
        }
    }

    #[test]
    fn flat_surface_triangulates_to_an_empty_mesh() {
        let mut generator = LoopGenerator::default();
        let buffers = ViewBuffers {
            resolution: (8, 8),
            depth: vec![0.5; 64],
            normal: vec![[0.0, 1.0]; 64],
            object_id: vec![0; 64],
        };
        let mut metadata = empty_metadata();

        let mesh = generator.triangulate(&buffers, &mut metadata).unwrap();
        assert!(mesh.vertices.is_empty());
        assert!(mesh.indices.is_empty());
    }
}
