//! Reassembles length-prefixed frames and decodes the two packets the
//! server ever sends: `LayerResponse` and `ServerEvent`.
//!
//! The original keeps a global, mutable pool of decode scratch buffers
//! shared across the whole WASM module. Per the documented redesign note,
//! that becomes a `DecoderSession` the embedding client owns once per
//! connection — its framing buffer is the only state, and it is dropped (or
//! reset) along with the connection instead of outliving it.

use bytes::{Buf, Bytes, BytesMut};

use depth_stream_proto::{
    GeometryCodecError, Index, LayerResponseHeader, Matrix, PacketError, PacketTag, Vertex,
    ViewMetadata, VIEW_COUNT_MAX, VIEW_METADATA_SIZE,
};

/// Byte size of a `LayerResponseHeader` on the wire, following the 4-byte
/// tag: `request_id`, `layer_index`, `geometry_bytes`, `image_bytes`, then
/// per-view metadata, matrices, vertex counts and index counts.
const LAYER_RESPONSE_HEADER_SIZE: usize = 4 + 4 + 4 + 4
    + VIEW_COUNT_MAX * VIEW_METADATA_SIZE
    + VIEW_COUNT_MAX * 64
    + VIEW_COUNT_MAX * 4
    + VIEW_COUNT_MAX * 4;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame shorter than its tag")]
    Truncated,
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Geometry(#[from] GeometryCodecError),
    #[error("layer response body shorter than its declared geometry/image sizes")]
    LayerResponseTruncated,
    #[error("server sent a client-originated tag {0:?}")]
    UnexpectedTag(PacketTag),
}

/// A decoded `LayerResponse`: geometry for every view in one layer, plus the
/// composited color/depth image the encoder produced for it.
#[derive(Debug, Clone)]
pub struct LayerReady {
    pub request_id: u32,
    pub layer_index: u32,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<Index>,
    pub view_metadata: [ViewMetadata; VIEW_COUNT_MAX],
    pub view_matrices: [Matrix; VIEW_COUNT_MAX],
    pub vertex_counts: [u32; VIEW_COUNT_MAX],
    pub index_counts: [u32; VIEW_COUNT_MAX],
    pub image: Bytes,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    LayerReady(LayerReady),
    ServerEvent { event_id: u32 },
    Error(String),
}

/// Owns the framing buffer for one connection. Created once per connection
/// by the embedding client; `on_bytes` feeds it whatever chunk the
/// transport just delivered and returns every packet that chunk completed.
#[derive(Default)]
pub struct DecoderSession {
    read_buffer: BytesMut,
}

impl DecoderSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops any partially-buffered frame. Call this when reconnecting so a
    /// stale half-read frame from the previous connection can't bleed into
    /// the new one.
    pub fn reset(&mut self) {
        self.read_buffer.clear();
    }

    pub fn on_bytes(&mut self, bytes: &[u8]) -> Vec<ClientEvent> {
        self.read_buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        loop {
            if self.read_buffer.len() < 4 {
                break;
            }
            let frame_len = u32::from_le_bytes(self.read_buffer[..4].try_into().unwrap()) as usize;
            if self.read_buffer.len() < 4 + frame_len {
                break;
            }
            self.read_buffer.advance(4);
            let frame = self.read_buffer.split_to(frame_len).freeze();
            events.push(decode_frame(frame));
        }
        events
    }
}

fn decode_frame(mut body: Bytes) -> ClientEvent {
    match decode_frame_inner(&mut body) {
        Ok(event) => event,
        Err(error) => ClientEvent::Error(error.to_string()),
    }
}

fn decode_frame_inner(body: &mut Bytes) -> Result<ClientEvent, DecodeError> {
    if body.remaining() < 4 {
        return Err(DecodeError::Truncated);
    }
    match PacketTag::from_u32(body.get_u32_le())? {
        PacketTag::LayerResponse => decode_layer_response(std::mem::take(body)).map(ClientEvent::LayerReady),
        PacketTag::ServerEvent => decode_server_event(body),
        other => Err(DecodeError::UnexpectedTag(other)),
    }
}

fn decode_layer_response(mut body: Bytes) -> Result<LayerReady, DecodeError> {
    let header = LayerResponseHeader::decode(body.clone())?;
    if body.remaining() < LAYER_RESPONSE_HEADER_SIZE {
        return Err(DecodeError::LayerResponseTruncated);
    }
    body.advance(LAYER_RESPONSE_HEADER_SIZE);

    let geometry_bytes = header.geometry_bytes as usize;
    let image_bytes = header.image_bytes as usize;
    if body.remaining() < geometry_bytes + image_bytes {
        return Err(DecodeError::LayerResponseTruncated);
    }
    let geometry = body.split_to(geometry_bytes);
    let image = body.split_to(image_bytes);

    let (indices, vertices) = depth_stream_proto::codec::decode(&geometry)?;

    Ok(LayerReady {
        request_id: header.request_id,
        layer_index: header.layer_index,
        vertices,
        indices,
        view_metadata: header.view_metadata,
        view_matrices: header.view_matrices,
        vertex_counts: header.vertex_counts,
        index_counts: header.index_counts,
        image,
    })
}

fn decode_server_event(body: &mut Bytes) -> Result<ClientEvent, DecodeError> {
    if body.remaining() < 4 {
        return Err(DecodeError::Truncated);
    }
    Ok(ClientEvent::ServerEvent { event_id: body.get_u32_le() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use depth_stream_proto::{Index as GeomIndex, ServerEventPacket, Vertex as GeomVertex, IDENTITY_MATRIX};

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn server_event_round_trips() {
        let mut session = DecoderSession::new();
        let packet = ServerEventPacket { event_id: 42 };
        let events = session.on_bytes(&framed(&packet.encode()));
        assert_eq!(events.len(), 1);
        match &events[0] {
            ClientEvent::ServerEvent { event_id } => assert_eq!(*event_id, 42),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn partial_chunks_are_reassembled_across_calls() {
        let mut session = DecoderSession::new();
        let packet = ServerEventPacket { event_id: 7 };
        let bytes = framed(&packet.encode());

        assert!(session.on_bytes(&bytes[..3]).is_empty());
        let events = session.on_bytes(&bytes[3..]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn layer_response_round_trips_geometry_and_image() {
        let vertices = vec![
            GeomVertex::new(0, 0, 0.0),
            GeomVertex::new(10, 0, 0.25),
            GeomVertex::new(0, 10, 0.5),
        ];
        let indices: Vec<GeomIndex> = vec![0, 1, 2];
        let geometry = depth_stream_proto::codec::encode(&indices, &vertices);
        let image = vec![9u8; 16];

        let view_metadata = std::array::from_fn(|_| {
            ViewMetadata::empty(depth_stream_proto::MeshGeneratorKind::Loop)
        });
        let header = LayerResponseHeader {
            request_id: 5,
            layer_index: 1,
            geometry_bytes: geometry.len() as u32,
            image_bytes: image.len() as u32,
            view_metadata,
            view_matrices: [IDENTITY_MATRIX; VIEW_COUNT_MAX],
            vertex_counts: [vertices.len() as u32, 0, 0, 0, 0, 0],
            index_counts: [indices.len() as u32, 0, 0, 0, 0, 0],
        };

        let mut body = header.encode();
        body.extend_from_slice(&geometry);
        body.extend_from_slice(&image);

        let mut session = DecoderSession::new();
        let mut events = session.on_bytes(&framed(&body));
        assert_eq!(events.len(), 1);
        match events.remove(0) {
            ClientEvent::LayerReady(layer) => {
                assert_eq!(layer.request_id, 5);
                assert_eq!(layer.layer_index, 1);
                assert_eq!(layer.vertices.len(), 3);
                assert_eq!(layer.indices, indices);
                assert_eq!(layer.image.as_ref(), image.as_slice());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn reset_discards_a_partial_frame() {
        let mut session = DecoderSession::new();
        session.on_bytes(&[1, 0, 0]);
        session.reset();
        let packet = ServerEventPacket { event_id: 1 };
        let events = session.on_bytes(&framed(&packet.encode()));
        assert_eq!(events.len(), 1);
    }
}
