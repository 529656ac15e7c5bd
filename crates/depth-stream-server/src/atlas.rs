//! Composes the per-view color renders of one layer into a single atlas
//! texture before it reaches the video encoder.
//!
//! Views are tiled 3 columns by 2 rows — `view_offset = ((view % 3) *
//! resolution.x, (view / 3) * resolution.y)` — matching the original's
//! `glCopyImageSubData` placement into `color_view_buffer`.

use depth_stream_proto::VIEW_COUNT_MAX;

pub const ATLAS_COLUMNS: u32 = 3;
pub const ATLAS_ROWS: u32 = 2;

pub fn tile_offset(view: usize, resolution: (u32, u32)) -> (u32, u32) {
    let view = view as u32;
    (
        (view % ATLAS_COLUMNS) * resolution.0,
        (view / ATLAS_COLUMNS) * resolution.1,
    )
}

pub fn atlas_resolution(resolution: (u32, u32)) -> (u32, u32) {
    (resolution.0 * ATLAS_COLUMNS, resolution.1 * ATLAS_ROWS)
}

/// Blits up to [`VIEW_COUNT_MAX`] BGRA view buffers into one atlas canvas.
/// `views[i]` is `None` for a view not rendered this frame (fewer than
/// `VIEW_COUNT_MAX` active views); its tile is left at the canvas's
/// cleared value.
pub fn compose(views: &[Option<&[u8]>], resolution: (u32, u32)) -> Vec<u8> {
    const BYTES_PER_PIXEL: usize = 4;

    let (atlas_width, atlas_height) = atlas_resolution(resolution);
    let atlas_stride = atlas_width as usize * BYTES_PER_PIXEL;
    let mut canvas = vec![0u8; atlas_stride * atlas_height as usize];

    for (view, frame) in views.iter().enumerate().take(VIEW_COUNT_MAX) {
        let Some(frame) = frame else { continue };

        let (offset_x, offset_y) = tile_offset(view, resolution);
        let view_stride = resolution.0 as usize * BYTES_PER_PIXEL;

        for row in 0..resolution.1 as usize {
            let src_start = row * view_stride;
            let src_end = src_start + view_stride;
            if src_end > frame.len() {
                break;
            }

            let dst_row = offset_y as usize + row;
            let dst_start = dst_row * atlas_stride + offset_x as usize * BYTES_PER_PIXEL;
            let dst_end = dst_start + view_stride;

            canvas[dst_start..dst_end].copy_from_slice(&frame[src_start..src_end]);
        }
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_offsets_follow_the_3x2_grid() {
        assert_eq!(tile_offset(0, (64, 64)), (0, 0));
        assert_eq!(tile_offset(2, (64, 64)), (128, 0));
        assert_eq!(tile_offset(3, (64, 64)), (0, 64));
        assert_eq!(tile_offset(5, (64, 64)), (128, 64));
    }

    #[test]
    fn compose_places_each_view_in_its_tile() {
        let resolution = (2u32, 2u32);
        let red = vec![0xFFu8; 2 * 2 * 4];
        let views: Vec<Option<&[u8]>> = vec![Some(&red), None, None, None, None, None];

        let atlas = compose(&views, resolution);
        let atlas_stride = atlas_resolution(resolution).0 as usize * 4;

        // Top-left tile (view 0) is red.
        assert_eq!(atlas[0], 0xFF);
        // A pixel in view 1's tile (untouched) stays cleared.
        let view1_pixel = (2 * 4) as usize;
        assert_eq!(atlas[view1_pixel], 0);
        let _ = atlas_stride;
    }
}
