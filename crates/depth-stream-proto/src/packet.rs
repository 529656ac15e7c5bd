//! Wire packet framing: tag table, fixed-size control records, and the
//! variable-length `LayerResponse`/log records.
//!
//! All integers little-endian, floats IEEE-754 binary32, matrices 16
//! floats column-major, matching SPEC_FULL.md §4.1/§6. String fields are
//! fixed-length, NUL-terminated or NUL-padded ASCII; only the bytes up to
//! the first NUL are significant.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::settings::{
    GeneratorViewMetadata, LineSettings, LineViewMetadata, LoopSettings, LoopViewMetadata,
    MeshGeneratorKind, MeshGeneratorSettings, MeshSettings, QuadSettings, QuadViewMetadata,
    SweepOrder, ViewMetadata,
};
use crate::types::{Matrix, VideoCodec, EXPORT_COUNT_MAX, STRING_LENGTH_MAX, VIEW_COUNT_MAX};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet shorter than its fixed record size")]
    Truncated,
    #[error("unknown packet tag {0}")]
    UnknownTag(u32),
    #[error("unknown enum value {value} for {field}")]
    UnknownEnumValue { field: &'static str, value: u32 },
    #[error("payload size {0} exceeds the configured watermark")]
    Oversized(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PacketTag {
    SessionCreate = 0,
    SessionDestroy = 1,
    RenderRequest = 2,
    MeshSettings = 3,
    VideoSettings = 4,
    LayerResponse = 5,
    LogInit = 6,
    LogWrite = 7,
    ServerEvent = 8,
}

impl PacketTag {
    pub fn from_u32(value: u32) -> Result<Self, PacketError> {
        match value {
            0 => Ok(Self::SessionCreate),
            1 => Ok(Self::SessionDestroy),
            2 => Ok(Self::RenderRequest),
            3 => Ok(Self::MeshSettings),
            4 => Ok(Self::VideoSettings),
            5 => Ok(Self::LayerResponse),
            6 => Ok(Self::LogInit),
            7 => Ok(Self::LogWrite),
            8 => Ok(Self::ServerEvent),
            other => Err(PacketError::UnknownTag(other)),
        }
    }
}

fn read_fixed_string(buf: &mut Bytes, len: usize) -> Result<String, PacketError> {
    if buf.remaining() < len {
        return Err(PacketError::Truncated);
    }
    let raw = buf.copy_to_bytes(len);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

fn write_fixed_string(out: &mut BytesMut, value: &str, len: usize) {
    let bytes = value.as_bytes();
    let copy_len = bytes.len().min(len.saturating_sub(1));
    out.put_slice(&bytes[..copy_len]);
    out.put_bytes(0, len - copy_len);
}

fn read_matrix(buf: &mut Bytes) -> Result<Matrix, PacketError> {
    if buf.remaining() < 64 {
        return Err(PacketError::Truncated);
    }
    let mut matrix = [0.0f32; 16];
    for slot in matrix.iter_mut() {
        *slot = buf.get_f32_le();
    }
    Ok(matrix)
}

fn write_matrix(out: &mut BytesMut, matrix: &Matrix) {
    for &value in matrix {
        out.put_f32_le(value);
    }
}

/// `SessionCreatePacket` body (tag excluded; the tag is read by the caller
/// to decide which record to parse).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCreatePacket {
    pub mesh_generator: MeshGeneratorKind,
    pub video_codec: VideoCodec,
    pub chroma_subsampling: bool,
    pub projection_matrix: Matrix,
    pub resolution_w: u32,
    pub resolution_h: u32,
    pub layer_count: u32,
    pub view_count: u32,
    pub scene_file_name: String,
    pub scene_scale: f32,
    pub scene_exposure: f32,
    pub scene_indirect_intensity: f32,
    pub sky_file_name: String,
    pub sky_intensity: f32,
    pub export_enabled: bool,
}

impl SessionCreatePacket {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(4 + 4 + 4 + 4 + 64 + 4 + 4 + 4 + 4 + 1024 + 12 + 1024 + 4 + 1);
        out.put_u32_le(PacketTag::SessionCreate as u32);
        out.put_u32_le(self.mesh_generator as u32);
        out.put_u32_le(self.video_codec as u32);
        out.put_u8(self.chroma_subsampling as u8);
        out.put_bytes(0, 3);
        write_matrix(&mut out, &self.projection_matrix);
        out.put_u32_le(self.resolution_w);
        out.put_u32_le(self.resolution_h);
        out.put_u32_le(self.layer_count);
        out.put_u32_le(self.view_count);
        write_fixed_string(&mut out, &self.scene_file_name, STRING_LENGTH_MAX);
        out.put_f32_le(self.scene_scale);
        out.put_f32_le(self.scene_exposure);
        out.put_f32_le(self.scene_indirect_intensity);
        write_fixed_string(&mut out, &self.sky_file_name, STRING_LENGTH_MAX);
        out.put_f32_le(self.sky_intensity);
        out.put_u8(self.export_enabled as u8);
        out.freeze()
    }

    /// Decodes the body following the 4-byte tag, which the caller has
    /// already consumed.
    pub fn decode(mut body: Bytes) -> Result<Self, PacketError> {
        if body.remaining() < 8 {
            return Err(PacketError::Truncated);
        }
        let mesh_generator = MeshGeneratorKind::from_u32(body.get_u32_le()).ok_or(
            PacketError::UnknownEnumValue { field: "mesh_generator", value: 0 },
        )?;
        let video_codec = VideoCodec::from_u32(body.get_u32_le()).ok_or(
            PacketError::UnknownEnumValue { field: "video_codec", value: 0 },
        )?;
        if body.remaining() < 4 {
            return Err(PacketError::Truncated);
        }
        let chroma_subsampling = body.get_u8() != 0;
        body.advance(3);
        let projection_matrix = read_matrix(&mut body)?;
        if body.remaining() < 16 {
            return Err(PacketError::Truncated);
        }
        let resolution_w = body.get_u32_le();
        let resolution_h = body.get_u32_le();
        let layer_count = body.get_u32_le();
        let view_count = body.get_u32_le();
        let scene_file_name = read_fixed_string(&mut body, STRING_LENGTH_MAX)?;
        if body.remaining() < 12 {
            return Err(PacketError::Truncated);
        }
        let scene_scale = body.get_f32_le();
        let scene_exposure = body.get_f32_le();
        let scene_indirect_intensity = body.get_f32_le();
        let sky_file_name = read_fixed_string(&mut body, STRING_LENGTH_MAX)?;
        if body.remaining() < 5 {
            return Err(PacketError::Truncated);
        }
        let sky_intensity = body.get_f32_le();
        let export_enabled = body.get_u8() != 0;

        Ok(Self {
            mesh_generator,
            video_codec,
            chroma_subsampling,
            projection_matrix,
            resolution_w,
            resolution_h,
            layer_count,
            view_count,
            scene_file_name,
            scene_scale,
            scene_exposure,
            scene_indirect_intensity,
            sky_file_name,
            sky_intensity,
            export_enabled,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequestPacket {
    pub request_id: u32,
    pub export_file_names: [String; EXPORT_COUNT_MAX],
    pub view_matrices: [Matrix; VIEW_COUNT_MAX],
}

impl RenderRequestPacket {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(4 + 4 + EXPORT_COUNT_MAX * STRING_LENGTH_MAX + VIEW_COUNT_MAX * 64);
        out.put_u32_le(PacketTag::RenderRequest as u32);
        out.put_u32_le(self.request_id);
        for name in &self.export_file_names {
            write_fixed_string(&mut out, name, STRING_LENGTH_MAX);
        }
        for matrix in &self.view_matrices {
            write_matrix(&mut out, matrix);
        }
        out.freeze()
    }

    pub fn decode(mut body: Bytes) -> Result<Self, PacketError> {
        if body.remaining() < 4 {
            return Err(PacketError::Truncated);
        }
        let request_id = body.get_u32_le();

        let mut export_file_names: [String; EXPORT_COUNT_MAX] = Default::default();
        for name in export_file_names.iter_mut() {
            *name = read_fixed_string(&mut body, STRING_LENGTH_MAX)?;
        }

        let mut view_matrices = [[0.0f32; 16]; VIEW_COUNT_MAX];
        for matrix in view_matrices.iter_mut() {
            *matrix = read_matrix(&mut body)?;
        }

        Ok(Self {
            request_id,
            export_file_names,
            view_matrices,
        })
    }
}

/// Layer depth thresholds plus the per-generator settings record (tag 3).
impl MeshSettings {
    pub fn encode_packet(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(4 + 4 + 24);
        out.put_u32_le(PacketTag::MeshSettings as u32);
        out.put_f32_le(self.depth_max);
        out.put_u32_le(self.generator.kind() as u32);
        match &self.generator {
            MeshGeneratorSettings::Quad(s) => {
                out.put_f32_le(s.depth_threshold);
                out.put_bytes(0, 20);
            }
            MeshGeneratorSettings::Line(s) => {
                out.put_f32_le(s.laplace_threshold);
                out.put_f32_le(s.normal_scale);
                out.put_u32_le(s.line_length_min);
                out.put_bytes(0, 12);
            }
            MeshGeneratorSettings::Loop(s) => {
                out.put_f32_le(s.depth_base_threshold);
                out.put_f32_le(s.depth_slope_threshold);
                out.put_f32_le(s.normal_threshold);
                out.put_f32_le(s.triangle_scale);
                out.put_u32_le(s.loop_length_min);
                out.put_u8(s.use_normals as u8);
                out.put_u8(s.use_object_ids as u8);
                out.put_u8(matches!(s.sweep_order, SweepOrder::ParityFlip) as u8);
                out.put_bytes(0, 1);
            }
        }
        out.freeze()
    }

    pub fn decode_packet(mut body: Bytes) -> Result<Self, PacketError> {
        if body.remaining() < 8 {
            return Err(PacketError::Truncated);
        }
        let depth_max = body.get_f32_le();
        let kind = MeshGeneratorKind::from_u32(body.get_u32_le()).ok_or(
            PacketError::UnknownEnumValue { field: "mesh_generator", value: 0 },
        )?;
        if body.remaining() < 24 {
            return Err(PacketError::Truncated);
        }
        let generator = match kind {
            MeshGeneratorKind::Quad => {
                let depth_threshold = body.get_f32_le();
                body.advance(20);
                MeshGeneratorSettings::Quad(QuadSettings { depth_threshold })
            }
            MeshGeneratorKind::Line => {
                let laplace_threshold = body.get_f32_le();
                let normal_scale = body.get_f32_le();
                let line_length_min = body.get_u32_le();
                body.advance(12);
                MeshGeneratorSettings::Line(LineSettings {
                    laplace_threshold,
                    normal_scale,
                    line_length_min,
                })
            }
            MeshGeneratorKind::Loop => {
                let depth_base_threshold = body.get_f32_le();
                let depth_slope_threshold = body.get_f32_le();
                let normal_threshold = body.get_f32_le();
                let triangle_scale = body.get_f32_le();
                let loop_length_min = body.get_u32_le();
                let use_normals = body.get_u8() != 0;
                let use_object_ids = body.get_u8() != 0;
                let sweep_order = if body.get_u8() != 0 {
                    SweepOrder::ParityFlip
                } else {
                    SweepOrder::Lexicographic
                };
                body.advance(1);
                MeshGeneratorSettings::Loop(LoopSettings {
                    depth_base_threshold,
                    depth_slope_threshold,
                    normal_threshold,
                    triangle_scale,
                    loop_length_min,
                    use_normals,
                    use_object_ids,
                    sweep_order,
                })
            }
        };
        Ok(Self { depth_max, generator })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VideoCompressionMode {
    ConstantBitrate = 0,
    ConstantQuality = 1,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoSettingsPacket {
    pub mode: VideoCompressionMode,
    pub framerate: u32,
    pub bitrate: f64,
    pub quality: f64,
}

impl VideoSettingsPacket {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(4 + 4 + 4 + 8 + 8);
        out.put_u32_le(PacketTag::VideoSettings as u32);
        out.put_u32_le(self.mode as u32);
        out.put_u32_le(self.framerate);
        out.put_f64_le(self.bitrate);
        out.put_f64_le(self.quality);
        out.freeze()
    }

    pub fn decode(mut body: Bytes) -> Result<Self, PacketError> {
        if body.remaining() < 24 {
            return Err(PacketError::Truncated);
        }
        let mode = match body.get_u32_le() {
            0 => VideoCompressionMode::ConstantBitrate,
            1 => VideoCompressionMode::ConstantQuality,
            other => return Err(PacketError::UnknownEnumValue { field: "video_mode", value: other }),
        };
        let framerate = body.get_u32_le();
        let bitrate = body.get_f64_le();
        let quality = body.get_f64_le();
        Ok(Self { mode, framerate, bitrate, quality })
    }
}

const VIEW_METADATA_UNION_SLOTS: usize = 22;
/// Wire size of one `ViewMetadata` record: kind tag, three timing floats,
/// then the per-generator union slots. Exposed so callers that need to skip
/// past a `LayerResponseHeader` without re-decoding it (the client, to reach
/// the trailing geometry/image blobs) can compute the header's total size.
pub const VIEW_METADATA_SIZE: usize = 4 + 12 + VIEW_METADATA_UNION_SLOTS * 4;

fn write_view_metadata(out: &mut BytesMut, metadata: &ViewMetadata) {
    out.put_u32_le(match metadata.generator {
        GeneratorViewMetadata::Quad(_) => MeshGeneratorKind::Quad as u32,
        GeneratorViewMetadata::Line(_) => MeshGeneratorKind::Line as u32,
        GeneratorViewMetadata::Loop(_) => MeshGeneratorKind::Loop as u32,
    });
    out.put_f32_le(metadata.time_layer);
    out.put_f32_le(metadata.time_image_encode);
    out.put_f32_le(metadata.time_geometry_encode);

    let mut slots = [0.0f32; VIEW_METADATA_UNION_SLOTS];
    match metadata.generator {
        GeneratorViewMetadata::Quad(q) => {
            slots[0] = q.time_copy;
            slots[1] = q.time_delta;
            slots[2] = q.time_refine;
            slots[3] = q.time_corner;
            slots[4] = q.time_write;
        }
        GeneratorViewMetadata::Line(l) => {
            slots[0] = l.time_edge_detection;
            slots[1] = l.time_quad_tree;
            slots[2] = l.time_cpu;
            slots[3] = l.time_line_trace;
            slots[4] = l.time_triangulation;
            slots[5] = f32::from_bits(l.line_count);
        }
        GeneratorViewMetadata::Loop(l) => {
            slots[0] = l.time_vector;
            slots[1] = l.time_split;
            slots[2] = l.time_base;
            slots[3] = l.time_combine;
            slots[4] = l.time_distribute;
            slots[5] = l.time_discard;
            slots[6] = l.time_write;
            slots[7] = l.time_cpu;
            slots[8] = l.time_loop_simplification;
            slots[9] = l.time_triangulation;
            slots[10] = l.time_loop_info;
            slots[11] = l.time_loop_sort;
            slots[12] = l.time_sweep_line;
            slots[13] = l.time_adjacent_two;
            slots[14] = l.time_adjacent_one;
            slots[15] = l.time_interval_search;
            slots[16] = l.time_interval_update;
            slots[17] = l.time_inside_outside;
            slots[18] = l.time_contour_split;
            slots[19] = l.time_contour;
            slots[20] = f32::from_bits(l.loop_count);
            slots[21] = f32::from_bits(l.segment_count);
            // point_count does not fit in the 22-slot union; carried by the
            // caller alongside the mesh's own vertex_count for that view.
        }
    }
    for slot in slots {
        out.put_f32_le(slot);
    }
}

fn read_view_metadata(buf: &mut Bytes) -> Result<ViewMetadata, PacketError> {
    if buf.remaining() < VIEW_METADATA_SIZE {
        return Err(PacketError::Truncated);
    }
    let kind = MeshGeneratorKind::from_u32(buf.get_u32_le())
        .ok_or(PacketError::UnknownEnumValue { field: "view_metadata_kind", value: 0 })?;
    let time_layer = buf.get_f32_le();
    let time_image_encode = buf.get_f32_le();
    let time_geometry_encode = buf.get_f32_le();

    let mut slots = [0.0f32; VIEW_METADATA_UNION_SLOTS];
    for slot in slots.iter_mut() {
        *slot = buf.get_f32_le();
    }

    let generator = match kind {
        MeshGeneratorKind::Quad => GeneratorViewMetadata::Quad(QuadViewMetadata {
            time_copy: slots[0],
            time_delta: slots[1],
            time_refine: slots[2],
            time_corner: slots[3],
            time_write: slots[4],
        }),
        MeshGeneratorKind::Line => GeneratorViewMetadata::Line(LineViewMetadata {
            time_edge_detection: slots[0],
            time_quad_tree: slots[1],
            time_cpu: slots[2],
            time_line_trace: slots[3],
            time_triangulation: slots[4],
            line_count: slots[5].to_bits(),
        }),
        MeshGeneratorKind::Loop => GeneratorViewMetadata::Loop(LoopViewMetadata {
            time_vector: slots[0],
            time_split: slots[1],
            time_base: slots[2],
            time_combine: slots[3],
            time_distribute: slots[4],
            time_discard: slots[5],
            time_write: slots[6],
            time_cpu: slots[7],
            time_loop_simplification: slots[8],
            time_triangulation: slots[9],
            time_loop_info: slots[10],
            time_loop_sort: slots[11],
            time_sweep_line: slots[12],
            time_adjacent_two: slots[13],
            time_adjacent_one: slots[14],
            time_interval_search: slots[15],
            time_interval_update: slots[16],
            time_inside_outside: slots[17],
            time_contour_split: slots[18],
            time_contour: slots[19],
            loop_count: slots[20].to_bits(),
            segment_count: slots[21].to_bits(),
            point_count: 0,
        }),
    };

    Ok(ViewMetadata {
        time_layer,
        time_image_encode,
        time_geometry_encode,
        generator,
    })
}

/// Fixed header preceding a `LayerResponse`'s `geometry_bytes` then
/// `image_bytes` trailing blobs.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerResponseHeader {
    pub request_id: u32,
    pub layer_index: u32,
    pub geometry_bytes: u32,
    pub image_bytes: u32,
    pub view_metadata: [ViewMetadata; VIEW_COUNT_MAX],
    pub view_matrices: [Matrix; VIEW_COUNT_MAX],
    pub vertex_counts: [u32; VIEW_COUNT_MAX],
    pub index_counts: [u32; VIEW_COUNT_MAX],
}

impl LayerResponseHeader {
    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(
            4 + 4 + 4 + 4 + 4
                + VIEW_COUNT_MAX * VIEW_METADATA_SIZE
                + VIEW_COUNT_MAX * 64
                + VIEW_COUNT_MAX * 4
                + VIEW_COUNT_MAX * 4,
        );
        out.put_u32_le(PacketTag::LayerResponse as u32);
        out.put_u32_le(self.request_id);
        out.put_u32_le(self.layer_index);
        out.put_u32_le(self.geometry_bytes);
        out.put_u32_le(self.image_bytes);
        for metadata in &self.view_metadata {
            write_view_metadata(&mut out, metadata);
        }
        for matrix in &self.view_matrices {
            write_matrix(&mut out, matrix);
        }
        for &count in &self.vertex_counts {
            out.put_u32_le(count);
        }
        for &count in &self.index_counts {
            out.put_u32_le(count);
        }
        out
    }

    pub fn decode(mut body: Bytes) -> Result<Self, PacketError> {
        if body.remaining() < 16 {
            return Err(PacketError::Truncated);
        }
        let request_id = body.get_u32_le();
        let layer_index = body.get_u32_le();
        let geometry_bytes = body.get_u32_le();
        let image_bytes = body.get_u32_le();

        let default_metadata = ViewMetadata::empty(MeshGeneratorKind::Loop);
        let mut view_metadata = [default_metadata; VIEW_COUNT_MAX];
        for metadata in view_metadata.iter_mut() {
            *metadata = read_view_metadata(&mut body)?;
        }

        let mut view_matrices = [[0.0f32; 16]; VIEW_COUNT_MAX];
        for matrix in view_matrices.iter_mut() {
            *matrix = read_matrix(&mut body)?;
        }

        if body.remaining() < VIEW_COUNT_MAX * 8 {
            return Err(PacketError::Truncated);
        }
        let mut vertex_counts = [0u32; VIEW_COUNT_MAX];
        for count in vertex_counts.iter_mut() {
            *count = body.get_u32_le();
        }
        let mut index_counts = [0u32; VIEW_COUNT_MAX];
        for count in index_counts.iter_mut() {
            *count = body.get_u32_le();
        }

        Ok(Self {
            request_id,
            layer_index,
            geometry_bytes,
            image_bytes,
            view_metadata,
            view_matrices,
            vertex_counts,
            index_counts,
        })
    }
}

/// One of the three `LogInterval` sub-streams a client may write rows to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LogInterval {
    PerFrame = 0,
    PerSecond = 1,
    PerSession = 2,
}

impl LogInterval {
    pub fn from_u32(value: u32) -> Result<Self, PacketError> {
        match value {
            0 => Ok(Self::PerFrame),
            1 => Ok(Self::PerSecond),
            2 => Ok(Self::PerSession),
            other => Err(PacketError::UnknownEnumValue { field: "log_interval", value: other }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogInitPacket {
    pub interval: LogInterval,
    pub column_names: Vec<String>,
}

impl LogInitPacket {
    pub fn decode(mut body: Bytes) -> Result<Self, PacketError> {
        if body.remaining() < 4 {
            return Err(PacketError::Truncated);
        }
        let interval = LogInterval::from_u32(body.get_u32_le())?;
        let raw = body.chunk();
        let column_names = raw
            .split(|&b| b == 0)
            .filter(|segment| !segment.is_empty())
            .map(|segment| String::from_utf8_lossy(segment).into_owned())
            .collect();
        Ok(Self { interval, column_names })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogWritePacket {
    pub interval: LogInterval,
    pub values: Vec<f32>,
}

impl LogWritePacket {
    pub fn decode(mut body: Bytes) -> Result<Self, PacketError> {
        if body.remaining() < 4 {
            return Err(PacketError::Truncated);
        }
        let interval = LogInterval::from_u32(body.get_u32_le())?;
        if body.remaining() % 4 != 0 {
            return Err(PacketError::Truncated);
        }
        let mut values = Vec::with_capacity(body.remaining() / 4);
        while body.has_remaining() {
            values.push(body.get_f32_le());
        }
        Ok(Self { interval, values })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerEventPacket {
    pub event_id: u32,
}

impl ServerEventPacket {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(8);
        out.put_u32_le(PacketTag::ServerEvent as u32);
        out.put_u32_le(self.event_id);
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_create_round_trips() {
        let packet = SessionCreatePacket {
            mesh_generator: MeshGeneratorKind::Loop,
            video_codec: VideoCodec::H264,
            chroma_subsampling: true,
            projection_matrix: crate::types::IDENTITY_MATRIX,
            resolution_w: 1920,
            resolution_h: 1080,
            layer_count: 2,
            view_count: 6,
            scene_file_name: "scene.gltf".to_string(),
            scene_scale: 1.0,
            scene_exposure: 1.0,
            scene_indirect_intensity: 1.0,
            sky_file_name: "sky.hdr".to_string(),
            sky_intensity: 1.0,
            export_enabled: false,
        };

        let mut encoded = packet.encode();
        let tag = PacketTag::from_u32(encoded.get_u32_le()).unwrap();
        assert_eq!(tag, PacketTag::SessionCreate);

        let decoded = SessionCreatePacket::decode(encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn render_request_round_trips() {
        let packet = RenderRequestPacket {
            request_id: 7,
            export_file_names: Default::default(),
            view_matrices: [crate::types::IDENTITY_MATRIX; VIEW_COUNT_MAX],
        };

        let mut encoded = packet.encode();
        encoded.get_u32_le();
        let decoded = RenderRequestPacket::decode(encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn mesh_settings_round_trips_each_generator() {
        for settings in [
            MeshSettings::new(MeshGeneratorSettings::Quad(QuadSettings::default())),
            MeshSettings::new(MeshGeneratorSettings::Line(LineSettings::default())),
            MeshSettings::new(MeshGeneratorSettings::Loop(LoopSettings::default())),
        ] {
            let mut encoded = settings.encode_packet();
            encoded.get_u32_le();
            let decoded = MeshSettings::decode_packet(encoded).unwrap();
            assert_eq!(decoded, settings);
        }
    }

    #[test]
    fn truncated_session_create_is_an_error() {
        let result = SessionCreatePacket::decode(Bytes::from_static(&[0u8; 4]));
        assert_eq!(result, Err(PacketError::Truncated));
    }

    #[test]
    fn log_init_splits_nul_terminated_columns() {
        let mut body = BytesMut::new();
        body.put_u32_le(LogInterval::PerFrame as u32);
        body.put_slice(b"time\0vertices\0");
        let packet = LogInitPacket::decode(body.freeze()).unwrap();
        assert_eq!(packet.column_names, vec!["time", "vertices"]);
    }
}
