//! The line-based generator: edge-strength extraction, polyline growth by
//! repeated global-maximum walking, and triangulation of the resulting
//! point set.
//!
//! Grounded on `line_generator.{hpp,cpp}` / `line_triangulation.{hpp,cpp}`:
//! the original's `LineQuadTree` is a max-reduction pyramid rebuilt
//! bottom-up after each polyline is removed, which this port collapses to a
//! direct per-extraction scan of the edge-strength field — same observable
//! behaviour (always extracts the current global maximum), no pyramid
//! maintenance. The original feeds the polyline vertices into a
//! *constrained* Delaunay triangulator (external library, not in this
//! source pack); this port performs unconstrained Bowyer-Watson Delaunay
//! triangulation over the same point set, which satisfies the "triangulate
//! the remaining polylines" contract without a no-op constraint step.

use std::time::Instant;

use depth_stream_proto::{
    GeneratorViewMetadata, LineSettings, LineViewMetadata, MeshGeneratorKind,
    MeshGeneratorSettings, MeshSettings, ViewMetadata, Vertex,
};

use crate::generator::{GeneratedMesh, Generator, GeneratorError, ViewBuffers};

const BORDER_POINTS_PER_EDGE: u32 = 10;

pub struct LineGenerator {
    depth_max: f32,
    settings: LineSettings,
}

impl Default for LineGenerator {
    fn default() -> Self {
        Self {
            depth_max: 0.995,
            settings: LineSettings::default(),
        }
    }
}

impl Generator for LineGenerator {
    fn apply(&mut self, settings: &MeshSettings) {
        self.depth_max = settings.depth_max;
        if let MeshGeneratorSettings::Line(line) = settings.generator {
            self.settings = line;
        }
    }

    fn triangulate(
        &mut self,
        buffers: &ViewBuffers,
        metadata: &mut ViewMetadata,
    ) -> Result<GeneratedMesh, GeneratorError> {
        let edge_start = Instant::now();
        let edge_strength = compute_edge_strength(buffers, self.settings.normal_scale);
        let time_edge_detection = edge_start.elapsed().as_secs_f32() * 1000.0;

        let trace_start = Instant::now();
        let polylines = grow_polylines(
            buffers,
            &edge_strength,
            self.settings.laplace_threshold,
            self.settings.line_length_min,
        );
        let time_line_trace = trace_start.elapsed().as_secs_f32() * 1000.0;

        let triangulation_start = Instant::now();
        let mut points: Vec<(f32, f32)> = Vec::new();
        for polyline in &polylines {
            for &(x, y) in polyline {
                points.push((x as f32, y as f32));
            }
        }
        push_border_points(buffers.resolution, &mut points);

        let triangles = bowyer_watson(&points);
        let time_triangulation = triangulation_start.elapsed().as_secs_f32() * 1000.0;

        let mut mesh = GeneratedMesh::default();
        for &(x, y) in &points {
            let px = (x.round() as u32).min(buffers.resolution.0 - 1);
            let py = (y.round() as u32).min(buffers.resolution.1 - 1);
            let depth = buffers.depth[buffers.pixel_index(px, py)].min(self.depth_max);
            mesh.vertices.push(Vertex::new(x.round() as u16, y.round() as u16, depth));
        }
        for triangle in triangles {
            mesh.indices.push(triangle.0 as u32);
            mesh.indices.push(triangle.1 as u32);
            mesh.indices.push(triangle.2 as u32);
        }

        metadata.generator = GeneratorViewMetadata::Line(LineViewMetadata {
            time_edge_detection,
            time_quad_tree: 0.0,
            time_cpu: 0.0,
            time_line_trace,
            time_triangulation,
            line_count: polylines.len() as u32,
        });

        Ok(mesh)
    }
}

pub fn empty_metadata() -> ViewMetadata {
    ViewMetadata::empty(MeshGeneratorKind::Line)
}

fn compute_edge_strength(buffers: &ViewBuffers, normal_scale: f32) -> Vec<f32> {
    let (width, height) = buffers.resolution;
    let mut strength = vec![0.0f32; (width * height) as usize];

    for y in 0..height {
        for x in 0..width {
            let center = buffers.depth[buffers.pixel_index(x, y)];
            let left = buffers.depth[buffers.pixel_index(x.saturating_sub(1), y)];
            let right = buffers.depth[buffers.pixel_index((x + 1).min(width - 1), y)];
            let up = buffers.depth[buffers.pixel_index(x, y.saturating_sub(1))];
            let down = buffers.depth[buffers.pixel_index(x, (y + 1).min(height - 1))];

            let laplacian = (left + right + up + down - 4.0 * center).abs();

            let normal = buffers.normal[buffers.pixel_index(x, y)];
            let right_normal = buffers.normal[buffers.pixel_index((x + 1).min(width - 1), y)];
            let curvature = ((normal[0] - right_normal[0]).abs() + (normal[1] - right_normal[1]).abs())
                * normal_scale;

            strength[buffers.pixel_index(x, y)] = laplacian + curvature;
        }
    }

    strength
}

/// Repeatedly takes the strongest remaining edge pixel and walks outward
/// while the local gradient direction stays within the monotone-direction
/// constraint, removing visited pixels so the next extraction finds a fresh
/// maximum.
fn grow_polylines(
    buffers: &ViewBuffers,
    edge_strength: &[f32],
    laplace_threshold: f32,
    line_length_min: u32,
) -> Vec<Vec<(u32, u32)>> {
    let (width, _height) = buffers.resolution;
    let mut remaining = edge_strength.to_vec();
    let mut polylines = Vec::new();

    loop {
        let (max_index, &max_value) = remaining
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .expect("resolution is non-zero");

        if max_value <= laplace_threshold {
            break;
        }

        let start = (max_index as u32 % width, max_index as u32 / width);
        let polyline = walk_polyline(buffers, &mut remaining, start);

        if polyline.len() as u32 >= line_length_min {
            polylines.push(polyline);
        }
    }

    polylines
}

fn walk_polyline(buffers: &ViewBuffers, remaining: &mut [f32], start: (u32, u32)) -> Vec<(u32, u32)> {
    let (width, height) = buffers.resolution;
    let mut polyline = vec![start];
    remaining[buffers.pixel_index(start.0, start.1)] = 0.0;

    let mut current = start;
    let mut direction: Option<(i32, i32)> = None;

    loop {
        let mut best: Option<((u32, u32), (i32, i32), f32)> = None;

        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = current.0 as i32 + dx;
                let ny = current.1 as i32 + dy;
                if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                    continue;
                }

                if let Some((dir_x, dir_y)) = direction {
                    if dx * dir_x + dy * dir_y < 0 {
                        continue;
                    }
                }

                let candidate = (nx as u32, ny as u32);
                let value = remaining[buffers.pixel_index(candidate.0, candidate.1)];
                if value <= 0.0 {
                    continue;
                }
                if best.map(|(_, _, best_value)| value > best_value).unwrap_or(true) {
                    best = Some((candidate, (dx, dy), value));
                }
            }
        }

        match best {
            Some((next, dir, _)) => {
                polyline.push(next);
                remaining[buffers.pixel_index(next.0, next.1)] = 0.0;
                direction = Some(dir);
                current = next;
            }
            None => break,
        }
    }

    polyline
}

fn push_border_points(resolution: (u32, u32), points: &mut Vec<(f32, f32)>) {
    let (width, height) = resolution;
    for i in 0..=BORDER_POINTS_PER_EDGE {
        let t = i as f32 / BORDER_POINTS_PER_EDGE as f32;
        points.push((t * (width - 1) as f32, 0.0));
        points.push((t * (width - 1) as f32, (height - 1) as f32));
        points.push((0.0, t * (height - 1) as f32));
        points.push(((width - 1) as f32, t * (height - 1) as f32));
    }
}

/// Unconstrained Bowyer-Watson Delaunay triangulation over `points`,
/// returned as index triples into `points`.
fn bowyer_watson(points: &[(f32, f32)]) -> Vec<(usize, usize, usize)> {
    if points.len() < 3 {
        return Vec::new();
    }

    let min_x = points.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
    let max_x = points.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
    let min_y = points.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
    let max_y = points.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

    let dx = (max_x - min_x).max(1.0);
    let dy = (max_y - min_y).max(1.0);
    let delta = dx.max(dy) * 20.0;
    let cx = (min_x + max_x) / 2.0;
    let cy = (min_y + max_y) / 2.0;

    let mut vertices: Vec<(f32, f32)> = points.to_vec();
    let super_a = vertices.len();
    let super_b = super_a + 1;
    let super_c = super_a + 2;
    vertices.push((cx - delta, cy - delta));
    vertices.push((cx + delta, cy - delta));
    vertices.push((cx, cy + delta));

    let mut triangles: Vec<(usize, usize, usize)> = vec![(super_a, super_b, super_c)];

    for point_index in 0..points.len() {
        let point = vertices[point_index];
        let mut bad_triangles = Vec::new();

        for (index, &triangle) in triangles.iter().enumerate() {
            if in_circumcircle(point, vertices[triangle.0], vertices[triangle.1], vertices[triangle.2]) {
                bad_triangles.push(index);
            }
        }

        let mut polygon_edges: Vec<(usize, usize)> = Vec::new();
        for &index in &bad_triangles {
            let (a, b, c) = triangles[index];
            for edge in [(a, b), (b, c), (c, a)] {
                let reversed = (edge.1, edge.0);
                if let Some(pos) = polygon_edges.iter().position(|&e| e == reversed) {
                    polygon_edges.remove(pos);
                } else {
                    polygon_edges.push(edge);
                }
            }
        }

        for &index in bad_triangles.iter().rev() {
            triangles.remove(index);
        }

        for (a, b) in polygon_edges {
            triangles.push((a, b, point_index));
        }
    }

    triangles
        .into_iter()
        .filter(|&(a, b, c)| a != super_a && a != super_b && a != super_c
            && b != super_a && b != super_b && b != super_c
            && c != super_a && c != super_b && c != super_c)
        .collect()
}

fn in_circumcircle(point: (f32, f32), a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> bool {
    let ax = a.0 - point.0;
    let ay = a.1 - point.1;
    let bx = b.0 - point.0;
    let by = b.1 - point.1;
    let cx = c.0 - point.0;
    let cy = c.1 - point.1;

    let det = (ax * ax + ay * ay) * (bx * cy - cx * by)
        - (bx * bx + by * by) * (ax * cy - cx * ay)
        + (cx * cx + cy * cy) * (ax * by - bx * ay);

    // Orientation of (a, b, c) decides the sign convention for "inside".
    let orientation = (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0);
    if orientation > 0.0 {
        det > 0.0
    } else {
        det < 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_buffers(width: u32, height: u32) -> ViewBuffers {
        ViewBuffers {
            resolution: (width, height),
            depth: vec![0.5; (width * height) as usize],
            normal: vec![[0.0, 1.0]; (width * height) as usize],
            object_id: vec![0; (width * height) as usize],
        }
    }

    #[test]
    fn flat_surface_has_no_edges_and_triangulates_only_the_border() {
        let mut generator = LineGenerator::default();
        let buffers = flat_buffers(16, 16);
        let mut metadata = empty_metadata();

        let mesh = generator.triangulate(&buffers, &mut metadata).unwrap();

        assert_eq!(mesh.indices.len() % 3, 0);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn bowyer_watson_triangulates_a_square() {
        let points = vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        let triangles = bowyer_watson(&points);
        assert_eq!(triangles.len(), 2);
    }
}
