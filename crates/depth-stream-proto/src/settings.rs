//! Mesh generator settings and per-view metadata.
//!
//! The original source models these as a C `union` tagged by a sibling
//! enum. Here each carries its own discriminant as a Rust enum variant, so
//! `match`ing on generator kind and its payload can't drift out of sync.

use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MeshGeneratorKind {
    Quad = 0,
    Line = 1,
    Loop = 2,
}

impl MeshGeneratorKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Quad),
            1 => Some(Self::Line),
            2 => Some(Self::Loop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadSettings {
    pub depth_threshold: f32,
}

impl Default for QuadSettings {
    fn default() -> Self {
        Self {
            depth_threshold: 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSettings {
    pub laplace_threshold: f32,
    pub normal_scale: f32,
    pub line_length_min: u32,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            laplace_threshold: 0.003,
            normal_scale: 0.5,
            line_length_min: 10,
        }
    }
}

/// The order points with equal `y` are broken on in the sweep line.
///
/// `ParityFlip` is the `experiment_triangulation` variant from the original
/// source (alternates ascending/descending `x` by `y` parity); which one the
/// production path used is not recoverable from the source, so both are
/// kept behind this flag and `Lexicographic` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepOrder {
    #[default]
    Lexicographic,
    ParityFlip,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub depth_base_threshold: f32,
    pub depth_slope_threshold: f32,
    pub normal_threshold: f32,
    pub triangle_scale: f32,
    pub loop_length_min: u32,
    pub use_normals: bool,
    pub use_object_ids: bool,
    pub sweep_order: SweepOrder,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            depth_base_threshold: 0.001,
            depth_slope_threshold: 0.007,
            normal_threshold: PI * 0.222_222_22, // 40 degrees
            triangle_scale: 2.0,
            loop_length_min: 80,
            use_normals: true,
            use_object_ids: true,
            sweep_order: SweepOrder::Lexicographic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeshGeneratorSettings {
    Quad(QuadSettings),
    Line(LineSettings),
    Loop(LoopSettings),
}

impl MeshGeneratorSettings {
    pub fn kind(&self) -> MeshGeneratorKind {
        match self {
            Self::Quad(_) => MeshGeneratorKind::Quad,
            Self::Line(_) => MeshGeneratorKind::Line,
            Self::Loop(_) => MeshGeneratorKind::Loop,
        }
    }

    pub fn default_for(kind: MeshGeneratorKind) -> Self {
        match kind {
            MeshGeneratorKind::Quad => Self::Quad(QuadSettings::default()),
            MeshGeneratorKind::Line => Self::Line(LineSettings::default()),
            MeshGeneratorKind::Loop => Self::Loop(LoopSettings::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshSettings {
    pub depth_max: f32,
    pub generator: MeshGeneratorSettings,
}

impl MeshSettings {
    pub fn new(generator: MeshGeneratorSettings) -> Self {
        Self {
            depth_max: 0.995,
            generator,
        }
    }
}

/// Per-stage timings for the quad generator, milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuadViewMetadata {
    pub time_copy: f32,
    pub time_delta: f32,
    pub time_refine: f32,
    pub time_corner: f32,
    pub time_write: f32,
}

/// Per-stage timings for the line generator, milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LineViewMetadata {
    pub time_edge_detection: f32,
    pub time_quad_tree: f32,
    pub time_cpu: f32,
    pub time_line_trace: f32,
    pub time_triangulation: f32,
    pub line_count: u32,
}

/// Per-stage timings and counts for the loop generator, milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoopViewMetadata {
    pub time_vector: f32,
    pub time_split: f32,
    pub time_base: f32,
    pub time_combine: f32,
    pub time_distribute: f32,
    pub time_discard: f32,
    pub time_write: f32,
    pub time_cpu: f32,
    pub time_loop_simplification: f32,
    pub time_triangulation: f32,
    pub time_loop_info: f32,
    pub time_loop_sort: f32,
    pub time_sweep_line: f32,
    pub time_adjacent_two: f32,
    pub time_adjacent_one: f32,
    pub time_interval_search: f32,
    pub time_interval_update: f32,
    pub time_inside_outside: f32,
    pub time_contour_split: f32,
    pub time_contour: f32,
    pub loop_count: u32,
    pub segment_count: u32,
    pub point_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeneratorViewMetadata {
    Quad(QuadViewMetadata),
    Line(LineViewMetadata),
    Loop(LoopViewMetadata),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewMetadata {
    pub time_layer: f32,
    pub time_image_encode: f32,
    pub time_geometry_encode: f32,
    pub generator: GeneratorViewMetadata,
}

impl ViewMetadata {
    pub fn empty(kind: MeshGeneratorKind) -> Self {
        let generator = match kind {
            MeshGeneratorKind::Quad => GeneratorViewMetadata::Quad(QuadViewMetadata::default()),
            MeshGeneratorKind::Line => GeneratorViewMetadata::Line(LineViewMetadata::default()),
            MeshGeneratorKind::Loop => GeneratorViewMetadata::Loop(LoopViewMetadata::default()),
        };
        Self {
            time_layer: 0.0,
            time_image_encode: 0.0,
            time_geometry_encode: 0.0,
            generator,
        }
    }
}
