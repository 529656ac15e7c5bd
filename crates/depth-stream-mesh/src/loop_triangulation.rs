//! CPU phase of the loop-based generator: inverse-Bresenham point
//! extraction from GPU-traced loops, then sweep-line polygon triangulation
//! via monotone-chain ear emission.
//!
//! Ported from `loop_triangulation.{hpp,cpp}`. The original's `Interval`
//! carries two raw `Contour*` back-pointers into a global contour list and
//! a reuse cache; here `Contour`s live in an arena (`contour_arena`) and
//! intervals carry `ContourHandle` indices instead, which sidesteps the
//! aliasing the raw pointers relied on — two intervals can hold the same
//! handle freely since it is a plain `Copy` index.

use std::time::Instant;

use depth_stream_proto::{Index, LoopViewMetadata, SweepOrder, Vertex};

use crate::loop_gpu::{Loop, LoopCounters, LoopSegment, LOOP_COUNT_MAX, LOOP_SEGMENT_COUNT_MAX};

#[derive(Debug, Clone, Copy, Default)]
struct LoopPoint {
    point: (u16, u16),
    depth: f32,
    vertex_index: u32,
    previous_segment: u32,
    next_segment: u32,
}

#[derive(Debug, Clone, Copy)]
struct LoopPointHandle {
    loop_index: u32,
    point_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContourSide {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy)]
struct ContourPoint {
    side: ContourSide,
    side_index: u32,
    point: LoopPoint,
    next: LoopPoint,
    previous: LoopPoint,
}

#[derive(Debug, Clone, Default)]
struct Contour {
    left: Vec<LoopPoint>,
    right: Vec<LoopPoint>,
}

type ContourHandle = usize;

#[derive(Debug, Clone, Copy)]
struct Interval {
    left: (u16, u16),
    right: (u16, u16),

    left_loop_index: u32,
    left_segment_index: u32,
    left_base_point_index: u32,
    left_next_point_index: u32,

    right_loop_index: u32,
    right_segment_index: u32,
    right_base_point_index: u32,
    right_next_point_index: u32,

    last_loop_index: u32,
    last_point_index: u32,
    last_is_merge: bool,

    left_contour: Option<ContourHandle>,
    right_contour: Option<ContourHandle>,
}

#[derive(Default)]
pub struct LoopTriangulation {
    intervals: Vec<Interval>,
    loop_points: Vec<Vec<LoopPoint>>,
    loop_point_handles: Vec<LoopPointHandle>,

    contour_arena: Vec<Contour>,
    finished_contours: Vec<ContourHandle>,

    contour_points: Vec<ContourPoint>,
    contour_reflex_chain: Vec<ContourPoint>,

    vertex_counter: u32,
}

impl LoopTriangulation {
    pub fn process(
        &mut self,
        resolution: (u32, u32),
        triangle_scale: f32,
        sweep_order: SweepOrder,
        loops: &[Loop],
        counters: LoopCounters,
        segments: &[LoopSegment],
        metadata: &mut LoopViewMetadata,
    ) -> (Vec<Vertex>, Vec<Index>) {
        self.clear_state();

        if counters.loop_counter > LOOP_COUNT_MAX {
            tracing::error!("LoopTriangulation: loop count exceeds buffer limit");
            return (Vec::new(), Vec::new());
        }
        if counters.segment_counter > LOOP_SEGMENT_COUNT_MAX {
            tracing::error!("LoopTriangulation: loop segment count exceeds buffer limit");
            return (Vec::new(), Vec::new());
        }

        metadata.loop_count = counters.loop_counter;
        metadata.segment_count = counters.segment_counter;

        let loop_points_start = Instant::now();
        for loop_entry in &loops[..counters.loop_counter as usize] {
            let segment_slice = &segments[loop_entry.segment_offset as usize
                ..(loop_entry.segment_offset + loop_entry.segment_count) as usize];
            let points = self.compute_loop_points(segment_slice);
            metadata.point_count += points.len() as u32;
            self.loop_points.push(points);
        }
        metadata.time_loop_info += loop_points_start.elapsed().as_secs_f32() * 1000.0;

        let triangulation_start = Instant::now();
        let result = self.compute_triangulation(resolution, triangle_scale, sweep_order, loops, segments, metadata);
        metadata.time_triangulation = triangulation_start.elapsed().as_secs_f32() * 1000.0;
        result
    }

    /// Related to the inverse-Bresenham algorithm from "Pseudo-Immersive
    /// Real-Time Display of 3D Scenes on Mobile Devices" (Li, Schmitz,
    /// Kobbelt): collapses runs of collinear segments into single points.
    fn compute_loop_points(&mut self, segments: &[LoopSegment]) -> Vec<LoopPoint> {
        let segment_count = segments.len() as u32;
        let mut points = Vec::new();

        let mut start_point = (segments[0].end_x as i32, segments[0].end_y as i32);
        let mut start_offset = 0u32;

        for index in 1..segment_count {
            let segment = segments[index as usize];
            let candidate = (segment.end_x as i32, segment.end_y as i32);
            if candidate.1 < start_point.1 || (candidate.1 == start_point.1 && candidate.0 < start_point.0) {
                start_point = candidate;
                start_offset = index;
            }
        }

        if segment_count <= 4 {
            for index in 0..segment_count {
                let segment = segments[((index + start_offset) % segment_count) as usize];
                let point = LoopPoint {
                    point: (segment.end_x, segment.end_y),
                    depth: segment.end_depth,
                    previous_segment: (index + start_offset) % segment_count,
                    next_segment: (index + 1 + start_offset) % segment_count,
                    vertex_index: self.vertex_counter,
                };
                points.push(point);
                self.vertex_counter += 1;
            }
            return points;
        }

        let mut last_coord = (
            segments[(segment_count - 1) as usize].end_x as i32,
            segments[(segment_count - 1) as usize].end_y as i32,
        );

        let mut index = 0u32;
        while index < segment_count {
            let current_segment = segments[((index + start_offset) % segment_count) as usize];
            let current_coord = (current_segment.end_x as i32, current_segment.end_y as i32);
            let (current_direction, current_length) = compute_segment(last_coord, current_coord);

            last_coord = current_coord;
            index += 1;

            if current_length > 2 || index >= segment_count {
                let point = LoopPoint {
                    point: (current_segment.end_x, current_segment.end_y),
                    depth: current_segment.end_depth,
                    previous_segment: (index + start_offset + segment_count - 1) % segment_count,
                    next_segment: (index + start_offset) % segment_count,
                    vertex_index: self.vertex_counter,
                };
                points.push(point);
                self.vertex_counter += 1;
                continue;
            }

            let next_segment = segments[((index + start_offset) % segment_count) as usize];
            let next_coord = (next_segment.end_x as i32, next_segment.end_y as i32);
            let (next_direction, next_length) = compute_segment(last_coord, next_coord);

            last_coord = next_coord;
            index += 1;

            let mut line_end = next_segment;
            let mut line_depth_step = next_segment.end_depth < 0.0;
            let mut line_slope = next_length as f32;

            while index < segment_count {
                let slope_segment = segments[((index + start_offset) % segment_count) as usize];
                let slope_coord = (slope_segment.end_x as i32, slope_segment.end_y as i32);
                let (slope_direction, slope_length) = compute_segment(last_coord, slope_coord);

                if slope_direction == current_direction {
                    if slope_length > 2 {
                        break;
                    }
                    line_end = slope_segment;
                    line_depth_step = line_depth_step || slope_segment.end_depth < 0.0;
                    last_coord = slope_coord;
                    index += 1;
                } else if slope_direction == next_direction {
                    if (line_slope - slope_length as f32).abs() > 2.0 {
                        break;
                    }
                    line_slope = (line_slope + slope_length as f32) / 2.0;
                    line_end = slope_segment;
                    line_depth_step = line_depth_step || slope_segment.end_depth < 0.0;
                    last_coord = slope_coord;
                    index += 1;
                } else {
                    break;
                }
            }

            if line_depth_step {
                line_end.end_depth = -line_end.end_depth.abs();
            }

            let point = LoopPoint {
                point: (line_end.end_x, line_end.end_y),
                depth: line_end.end_depth,
                previous_segment: (index + start_offset + segment_count - 1) % segment_count,
                next_segment: (index + start_offset) % segment_count,
                vertex_index: self.vertex_counter,
            };
            points.push(point);
            self.vertex_counter += 1;
        }

        points
    }

    /// Related to "Real-time Image Vectorization on GPU" (Xiong, Feng,
    /// Zhou) and Dave Mount's CMSC 754 polygon-triangulation notes.
    fn compute_triangulation(
        &mut self,
        resolution: (u32, u32),
        triangle_scale: f32,
        sweep_order: SweepOrder,
        loops: &[Loop],
        segments: &[LoopSegment],
        metadata: &mut LoopViewMetadata,
    ) -> (Vec<Vertex>, Vec<Index>) {
        for (loop_index, points) in self.loop_points.iter().enumerate() {
            for point_index in 0..points.len() {
                self.loop_point_handles.push(LoopPointHandle {
                    loop_index: loop_index as u32,
                    point_index: point_index as u32,
                });
            }
        }

        let sort_start = Instant::now();
        let loop_points = &self.loop_points;
        self.loop_point_handles.sort_by(|a, b| {
            let point_a = loop_points[a.loop_index as usize][a.point_index as usize].point;
            let point_b = loop_points[b.loop_index as usize][b.point_index as usize].point;
            sweep_key(point_a, sweep_order).cmp(&sweep_key(point_b, sweep_order))
        });
        metadata.time_loop_sort += sort_start.elapsed().as_secs_f32() * 1000.0;

        let sweep_start = Instant::now();
        let handles = self.loop_point_handles.clone();
        for handle in handles {
            let point = self.loop_points[handle.loop_index as usize][handle.point_index as usize];

            if self.process_adjacent_two_intervals(handle, point) {
                continue;
            }
            if self.process_adjacent_one_interval(handle, point) {
                continue;
            }

            if let Some(interval_index) = self.check_inside(point, loops, segments) {
                self.process_inside_interval(handle, point, interval_index);
            } else {
                self.process_outside_interval(handle, point);
            }
        }
        metadata.time_sweep_line += sweep_start.elapsed().as_secs_f32() * 1000.0;

        let mut vertices = Vec::with_capacity(self.vertex_counter as usize);

        if triangle_scale != 0.0 {
            for points in &self.loop_points {
                let len = points.len();
                for current_index in 0..len {
                    let previous_index = previous_point_index(current_index as u32, len as u32) as usize;
                    let next_index = next_point_index(current_index as u32, len as u32) as usize;

                    let previous_point = points[previous_index];
                    let current_point = points[current_index];
                    let next_point = points[next_index];

                    let mut offset = (0.0f32, 0.0f32);

                    if previous_point.depth > 0.0 && current_point.depth > 0.0 && next_point.depth > 0.0 {
                        let direction1 = (
                            previous_point.point.0 as f32 - current_point.point.0 as f32,
                            previous_point.point.1 as f32 - current_point.point.1 as f32,
                        );
                        let direction2 = (
                            next_point.point.0 as f32 - current_point.point.0 as f32,
                            next_point.point.1 as f32 - current_point.point.1 as f32,
                        );

                        let angle1 = direction1.1.atan2(direction1.0);
                        let angle2 = direction2.1.atan2(direction2.0);
                        let center_angle = if angle1 < angle2 {
                            (angle1 + angle2) / 2.0
                        } else {
                            angle1 + ((std::f32::consts::TAU - angle1) + angle2) / 2.0
                        };

                        offset = (triangle_scale * center_angle.cos(), triangle_scale * center_angle.sin());
                    }

                    let position_x = (((current_point.point.0 as u32 + 1) / 2) as f32 + offset.0)
                        .clamp(0.0, resolution.0 as f32);
                    let position_y = (((current_point.point.1 as u32 + 1) / 2) as f32 + offset.1)
                        .clamp(0.0, resolution.1 as f32);

                    vertices.push(Vertex::new(
                        position_x as u16,
                        position_y as u16,
                        current_point.depth.abs(),
                    ));
                }
            }
        } else {
            for points in &self.loop_points {
                for point in points {
                    vertices.push(Vertex::new(
                        (point.point.0 + 1) / 2,
                        (point.point.1 + 1) / 2,
                        point.depth.abs(),
                    ));
                }
            }
        }

        let mut indices = Vec::new();
        let contour_start = Instant::now();
        let finished_contours = self.finished_contours.clone();
        for handle in finished_contours {
            self.triangulate_contour(handle, &mut indices);
        }
        metadata.time_contour += contour_start.elapsed().as_secs_f32() * 1000.0;

        (vertices, indices)
    }

    fn check_inside(&mut self, point: LoopPoint, loops: &[Loop], segments: &[LoopSegment]) -> Option<usize> {
        for index in 0..self.intervals.len() {
            let (left_offset, left_count) = {
                let loop_entry = loops[self.intervals[index].left_loop_index as usize];
                (loop_entry.segment_offset, loop_entry.segment_count)
            };
            let (right_offset, right_count) = {
                let loop_entry = loops[self.intervals[index].right_loop_index as usize];
                (loop_entry.segment_offset, loop_entry.segment_count)
            };

            loop {
                if self.intervals[index].left.1 == point.point.1 {
                    break;
                }
                let segment = segments[(left_offset + self.intervals[index].left_segment_index) as usize];
                if segment.end_y > point.point.1 {
                    break;
                }
                self.intervals[index].left = (segment.end_x, segment.end_y);
                self.intervals[index].left_segment_index =
                    previous_point_index(self.intervals[index].left_segment_index, left_count);
            }

            loop {
                if self.intervals[index].right.1 == point.point.1 {
                    break;
                }
                let segment = segments[(right_offset + self.intervals[index].right_segment_index) as usize];
                if segment.end_y > point.point.1 {
                    break;
                }
                self.intervals[index].right = (segment.end_x, segment.end_y);
                self.intervals[index].right_segment_index =
                    next_point_index(self.intervals[index].right_segment_index, right_count);
            }

            if self.intervals[index].left.0 <= point.point.0 && point.point.0 <= self.intervals[index].right.0 {
                return Some(index);
            }
        }

        None
    }

    fn process_adjacent_two_intervals(&mut self, handle: LoopPointHandle, point: LoopPoint) -> bool {
        let mut left_index = None;
        let mut right_index = None;

        for (index, interval) in self.intervals.iter().enumerate() {
            if interval.left_loop_index == handle.loop_index && interval.left_next_point_index == handle.point_index {
                right_index = Some(index);
            }
            if interval.right_loop_index == handle.loop_index && interval.right_next_point_index == handle.point_index
            {
                left_index = Some(index);
            }
            if left_index.is_some() && right_index.is_some() {
                break;
            }
        }

        let (left_index, right_index) = match (left_index, right_index) {
            (Some(l), Some(r)) => (l, r),
            _ => return false,
        };

        if left_index == right_index {
            let interval = self.intervals[left_index];
            if interval.last_is_merge {
                self.contour_arena[interval.left_contour.unwrap()].right.push(point);
                self.contour_arena[interval.right_contour.unwrap()].left.push(point);
                self.finished_contours.push(interval.left_contour.unwrap());
                self.finished_contours.push(interval.right_contour.unwrap());
            } else {
                self.contour_arena[interval.left_contour.unwrap()].right.push(point);
                self.finished_contours.push(interval.left_contour.unwrap());
            }
            self.intervals.remove(left_index);
        } else {
            let left = self.intervals[left_index];
            let right = self.intervals[right_index];

            let mut interval = Interval {
                left: left.left,
                right: right.right,
                left_loop_index: left.left_loop_index,
                left_segment_index: left.left_segment_index,
                left_base_point_index: left.left_base_point_index,
                left_next_point_index: left.left_next_point_index,
                right_loop_index: right.right_loop_index,
                right_segment_index: right.right_segment_index,
                right_base_point_index: right.right_base_point_index,
                right_next_point_index: right.right_next_point_index,
                last_loop_index: handle.loop_index,
                last_point_index: handle.point_index,
                last_is_merge: true,
                left_contour: None,
                right_contour: None,
            };

            if left.last_is_merge {
                interval.left_contour = left.left_contour;
                self.contour_arena[left.right_contour.unwrap()].right.push(point);
                self.finished_contours.push(left.right_contour.unwrap());
            } else {
                interval.left_contour = left.left_contour;
            }

            if right.last_is_merge {
                interval.right_contour = right.right_contour;
                self.contour_arena[right.left_contour.unwrap()].right.push(point);
                self.finished_contours.push(right.left_contour.unwrap());
            } else {
                interval.right_contour = right.left_contour;
            }

            self.contour_arena[interval.left_contour.unwrap()].right.push(point);
            self.contour_arena[interval.right_contour.unwrap()].left.push(point);

            if left_index < right_index {
                self.intervals.remove(right_index);
                self.intervals.remove(left_index);
            } else {
                self.intervals.remove(left_index);
                self.intervals.remove(right_index);
            }
            self.intervals.push(interval);
        }

        true
    }

    fn process_adjacent_one_interval(&mut self, handle: LoopPointHandle, point: LoopPoint) -> bool {
        let mut found = None;
        for (index, interval) in self.intervals.iter().enumerate() {
            if interval.left_loop_index == handle.loop_index && interval.left_next_point_index == handle.point_index {
                found = Some(index);
                break;
            }
            if interval.right_loop_index == handle.loop_index && interval.right_next_point_index == handle.point_index
            {
                found = Some(index);
                break;
            }
        }

        let index = match found {
            Some(index) => index,
            None => return false,
        };

        let loop_size = self.loop_points[handle.loop_index as usize].len() as u32;
        let is_left_side = {
            let interval = self.intervals[index];
            interval.left_loop_index == handle.loop_index && interval.left_next_point_index == handle.point_index
        };

        if is_left_side {
            let interval = self.intervals[index];
            if interval.last_is_merge {
                self.contour_arena[interval.left_contour.unwrap()].left.push(point);
                self.contour_arena[interval.right_contour.unwrap()].left.push(point);
                self.finished_contours.push(interval.left_contour.unwrap());
                self.intervals[index].left_contour = interval.right_contour;
                self.intervals[index].right_contour = None;
            } else {
                self.contour_arena[interval.left_contour.unwrap()].left.push(point);
            }

            self.intervals[index].left = point.point;
            self.intervals[index].left_loop_index = handle.loop_index;
            self.intervals[index].left_segment_index = point.previous_segment;
            self.intervals[index].left_base_point_index = handle.point_index;
            self.intervals[index].left_next_point_index =
                (handle.point_index + loop_size - 1) % loop_size;
        } else {
            let interval = self.intervals[index];
            if interval.last_is_merge {
                self.contour_arena[interval.left_contour.unwrap()].right.push(point);
                self.contour_arena[interval.right_contour.unwrap()].right.push(point);
                self.finished_contours.push(interval.right_contour.unwrap());
                self.intervals[index].right_contour = None;
            } else {
                self.contour_arena[interval.left_contour.unwrap()].right.push(point);
            }

            self.intervals[index].right = point.point;
            self.intervals[index].right_loop_index = handle.loop_index;
            self.intervals[index].right_segment_index = point.next_segment;
            self.intervals[index].right_base_point_index = handle.point_index;
            self.intervals[index].right_next_point_index = (handle.point_index + 1) % loop_size;
        }

        self.intervals[index].last_loop_index = handle.loop_index;
        self.intervals[index].last_point_index = handle.point_index;
        self.intervals[index].last_is_merge = false;

        true
    }

    fn process_inside_interval(&mut self, handle: LoopPointHandle, point: LoopPoint, interval_index: usize) {
        let interval = self.intervals[interval_index];
        let loop_size = self.loop_points[handle.loop_index as usize].len() as u32;

        let mut left_interval = Interval {
            left: interval.left,
            left_loop_index: interval.left_loop_index,
            left_segment_index: interval.left_segment_index,
            left_base_point_index: interval.left_base_point_index,
            left_next_point_index: interval.left_next_point_index,
            right: point.point,
            right_loop_index: handle.loop_index,
            right_segment_index: point.next_segment,
            right_base_point_index: handle.point_index,
            right_next_point_index: (handle.point_index + 1) % loop_size,
            last_loop_index: handle.loop_index,
            last_point_index: handle.point_index,
            last_is_merge: false,
            left_contour: None,
            right_contour: None,
        };

        let mut right_interval = Interval {
            left: point.point,
            left_loop_index: handle.loop_index,
            left_segment_index: point.previous_segment,
            left_base_point_index: handle.point_index,
            left_next_point_index: (handle.point_index + loop_size - 1) % loop_size,
            right: interval.right,
            right_loop_index: interval.right_loop_index,
            right_segment_index: interval.right_segment_index,
            right_base_point_index: interval.right_base_point_index,
            right_next_point_index: interval.right_next_point_index,
            last_loop_index: handle.loop_index,
            last_point_index: handle.point_index,
            last_is_merge: false,
            left_contour: None,
            right_contour: None,
        };

        if interval.last_is_merge {
            left_interval.left_contour = interval.left_contour;
            self.contour_arena[left_interval.left_contour.unwrap()].right.push(point);

            right_interval.left_contour = interval.right_contour;
            self.contour_arena[right_interval.left_contour.unwrap()].left.push(point);
        } else {
            let last_point =
                self.loop_points[interval.last_loop_index as usize][interval.last_point_index as usize];

            if interval.last_loop_index == interval.left_loop_index
                && interval.last_point_index == interval.left_base_point_index
            {
                let new_contour = self.allocate_contour();
                self.contour_arena[new_contour].left.push(last_point);
                self.contour_arena[new_contour].right.push(point);
                left_interval.left_contour = Some(new_contour);

                right_interval.left_contour = interval.left_contour;
                self.contour_arena[right_interval.left_contour.unwrap()].left.push(point);
            } else {
                left_interval.left_contour = interval.left_contour;
                self.contour_arena[left_interval.left_contour.unwrap()].right.push(point);

                let new_contour = self.allocate_contour();
                self.contour_arena[new_contour].right.push(last_point);
                self.contour_arena[new_contour].left.push(point);
                right_interval.left_contour = Some(new_contour);
            }
        }

        self.intervals.remove(interval_index);
        self.intervals.push(left_interval);
        self.intervals.push(right_interval);
    }

    fn process_outside_interval(&mut self, handle: LoopPointHandle, point: LoopPoint) {
        let loop_size = self.loop_points[handle.loop_index as usize].len() as u32;

        let new_contour = self.allocate_contour();
        self.contour_arena[new_contour].left.push(point);

        let interval = Interval {
            left: point.point,
            left_loop_index: handle.loop_index,
            left_segment_index: point.previous_segment,
            left_base_point_index: handle.point_index,
            left_next_point_index: (handle.point_index + loop_size - 1) % loop_size,
            right: point.point,
            right_loop_index: handle.loop_index,
            right_segment_index: point.next_segment,
            right_base_point_index: handle.point_index,
            right_next_point_index: (handle.point_index + 1) % loop_size,
            last_loop_index: handle.loop_index,
            last_point_index: handle.point_index,
            last_is_merge: false,
            left_contour: Some(new_contour),
            right_contour: None,
        };

        self.intervals.push(interval);
    }

    fn triangulate_contour(&mut self, handle: ContourHandle, indices: &mut Vec<Index>) {
        self.contour_points.clear();
        self.contour_reflex_chain.clear();

        let contour = self.contour_arena[handle].clone();

        for (index, &loop_point) in contour.left.iter().enumerate().rev() {
            self.contour_points.push(ContourPoint {
                side: ContourSide::Left,
                side_index: index as u32,
                point: loop_point,
                next: loop_point,
                previous: loop_point,
            });
        }
        for (index, &loop_point) in contour.right.iter().enumerate() {
            self.contour_points.push(ContourPoint {
                side: ContourSide::Right,
                side_index: index as u32,
                point: loop_point,
                next: loop_point,
                previous: loop_point,
            });
        }

        let count = self.contour_points.len();
        for index in 0..count {
            let previous_index = previous_point_index(index as u32, count as u32) as usize;
            let next_index = next_point_index(index as u32, count as u32) as usize;
            let previous_point = self.contour_points[previous_index].point;
            let next_point = self.contour_points[next_index].point;
            self.contour_points[index].previous = previous_point;
            self.contour_points[index].next = next_point;
        }

        if count < 3 {
            return;
        }

        self.contour_points.sort_by(|a, b| {
            if a.point.point.1 == b.point.point.1 {
                if a.side == b.side {
                    a.side_index.cmp(&b.side_index)
                } else {
                    (a.side as u8).cmp(&(b.side as u8))
                }
            } else {
                a.point.point.1.cmp(&b.point.point.1)
            }
        });

        self.contour_reflex_chain.push(self.contour_points[0]);
        self.contour_reflex_chain.push(self.contour_points[1]);

        for index in 2..self.contour_points.len() {
            let current = self.contour_points[index];
            let chain_end = *self.contour_reflex_chain.last().unwrap();

            if current.side != chain_end.side {
                for chain_index in 0..self.contour_reflex_chain.len() - 1 {
                    let point1 = self.contour_reflex_chain[chain_index];
                    let point2 = self.contour_reflex_chain[chain_index + 1];
                    indices.push(point1.point.vertex_index);
                    indices.push(point2.point.vertex_index);
                    indices.push(current.point.vertex_index);
                }

                let mut updated_current = current;
                updated_current.next = chain_end.point;
                let chain_last = self.contour_reflex_chain.last_mut().unwrap();
                chain_last.previous = current.point;

                self.contour_reflex_chain.truncate(1);
                self.contour_reflex_chain.push(updated_current);
            } else if !is_reflex(chain_end.previous, chain_end.point, chain_end.next) {
                while self.contour_reflex_chain.len() > 1 {
                    let point1 = self.contour_reflex_chain[self.contour_reflex_chain.len() - 1];
                    let point2 = self.contour_reflex_chain[self.contour_reflex_chain.len() - 2];

                    let should_stop = if current.side == ContourSide::Right {
                        is_reflex(point2.point, point1.point, current.point)
                    } else {
                        !is_reflex(point2.point, point1.point, current.point)
                    };
                    if should_stop {
                        break;
                    }

                    indices.push(point1.point.vertex_index);
                    indices.push(point2.point.vertex_index);
                    indices.push(current.point.vertex_index);

                    self.contour_reflex_chain.pop();
                }

                let mut updated_current = current;
                updated_current.previous = self.contour_reflex_chain.last().unwrap().point;
                self.contour_reflex_chain.last_mut().unwrap().next = current.point;
                self.contour_reflex_chain.push(updated_current);
            } else {
                self.contour_reflex_chain.push(current);
            }
        }
    }

    fn clear_state(&mut self) {
        self.loop_points.clear();
        self.loop_point_handles.clear();
        self.intervals.clear();
        self.contour_arena.clear();
        self.finished_contours.clear();
        self.vertex_counter = 0;
    }

    fn allocate_contour(&mut self) -> ContourHandle {
        self.contour_arena.push(Contour::default());
        self.contour_arena.len() - 1
    }
}

fn compute_segment(last_coord: (i32, i32), current_coord: (i32, i32)) -> ((i32, i32), u32) {
    let direction = (current_coord.0 - last_coord.0, current_coord.1 - last_coord.1);
    let sign = (direction.0.signum(), direction.1.signum());
    let length = direction.0.unsigned_abs().max(direction.1.unsigned_abs());
    (sign, length)
}

fn sweep_key(point: (u16, u16), order: SweepOrder) -> (u16, u16) {
    match order {
        SweepOrder::Lexicographic => (point.1, point.0),
        SweepOrder::ParityFlip => {
            if point.1 % 2 == 0 {
                (point.1, point.0)
            } else {
                (point.1, u16::MAX - point.0)
            }
        }
    }
}

fn is_reflex(previous: LoopPoint, current: LoopPoint, next: LoopPoint) -> bool {
    let direction1 = (
        current.point.0 as i32 - previous.point.0 as i32,
        current.point.1 as i32 - previous.point.1 as i32,
    );
    let direction2 = (
        next.point.0 as i32 - current.point.0 as i32,
        next.point.1 as i32 - current.point.1 as i32,
    );
    let outside_direction = (direction1.1, -direction1.0);

    direction2.0 * outside_direction.0 + direction2.1 * outside_direction.1 > 0
}

fn previous_point_index(point_index: u32, loop_size: u32) -> u32 {
    if point_index == 0 {
        loop_size - 1
    } else {
        point_index - 1
    }
}

fn next_point_index(point_index: u32, loop_size: u32) -> u32 {
    let next = point_index + 1;
    if next >= loop_size {
        0
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depth_stream_proto::LoopViewMetadata;

    fn square_loop() -> (Vec<Loop>, Vec<LoopSegment>, LoopCounters) {
        let segments = vec![
            LoopSegment { end_x: 0, end_y: 0, end_depth: 0.5 },
            LoopSegment { end_x: 4, end_y: 0, end_depth: 0.5 },
            LoopSegment { end_x: 4, end_y: 4, end_depth: 0.5 },
            LoopSegment { end_x: 0, end_y: 4, end_depth: 0.5 },
        ];
        let loops = vec![Loop { segment_offset: 0, segment_count: 4, flags: 0 }];
        let counters = LoopCounters { loop_counter: 1, segment_counter: 4 };
        (loops, segments, counters)
    }

    #[test]
    fn single_square_loop_triangulates_to_a_closed_mesh() {
        let (loops, segments, counters) = square_loop();
        let mut triangulation = LoopTriangulation::default();
        let mut metadata = LoopViewMetadata::default();

        let (vertices, indices) = triangulation.process(
            (64, 64),
            0.0,
            SweepOrder::Lexicographic,
            &loops,
            counters,
            &segments,
            &mut metadata,
        );

        assert_eq!(vertices.len(), 4);
        assert_eq!(indices.len() % 3, 0);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn oversized_loop_count_yields_empty_output() {
        let (loops, segments, _) = square_loop();
        let counters = LoopCounters { loop_counter: LOOP_COUNT_MAX + 1, segment_counter: 4 };
        let mut triangulation = LoopTriangulation::default();
        let mut metadata = LoopViewMetadata::default();

        let (vertices, indices) = triangulation.process(
            (64, 64),
            0.0,
            SweepOrder::Lexicographic,
            &loops,
            counters,
            &segments,
            &mut metadata,
        );

        assert!(vertices.is_empty());
        assert!(indices.is_empty());
    }
}
