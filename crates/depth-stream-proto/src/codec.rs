//! Geometry codec: delta/zig-zag transform + canonical Huffman coding.
//!
//! Wire layout (little-endian throughout):
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 256 | huffman code-length table |
//! | 256 | 4 | index_count |
//! | 260 | 4 | index_bytes |
//! | 264 | 4 | vertex_count |
//! | 268 | 4 | vertex_bytes |
//! | 272 | index_bytes | huffman bit-packed index stream |
//! | 272+index_bytes | vertex_bytes | huffman bit-packed vertex stream |

use crate::huffman::{HuffmanCode, HuffmanError};
use crate::types::{Index, Vertex};

pub const HEADER_SIZE: usize = 256 + 4 + 4 + 4 + 4;

/// The z-component quantization step: `z * DEPTH_QUANTUM` rounds to a u16.
const DEPTH_QUANTUM: f32 = 0x7FFF as f32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GeometryCodecError {
    #[error("geometry buffer shorter than the fixed header")]
    HeaderTruncated,
    #[error("geometry buffer shorter than its declared index/vertex byte counts")]
    PayloadTruncated,
    #[error(transparent)]
    Huffman(#[from] HuffmanError),
}

struct GeometryHeader {
    huffman_lengths: [u8; 256],
    index_count: u32,
    index_bytes: u32,
    vertex_count: u32,
    vertex_bytes: u32,
}

impl GeometryHeader {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.huffman_lengths);
        out.extend_from_slice(&self.index_count.to_le_bytes());
        out.extend_from_slice(&self.index_bytes.to_le_bytes());
        out.extend_from_slice(&self.vertex_count.to_le_bytes());
        out.extend_from_slice(&self.vertex_bytes.to_le_bytes());
    }

    fn read(buffer: &[u8]) -> Result<Self, GeometryCodecError> {
        if buffer.len() < HEADER_SIZE {
            return Err(GeometryCodecError::HeaderTruncated);
        }
        let mut huffman_lengths = [0u8; 256];
        huffman_lengths.copy_from_slice(&buffer[0..256]);

        let read_u32 = |offset: usize| -> u32 {
            u32::from_le_bytes(buffer[offset..offset + 4].try_into().unwrap())
        };

        Ok(Self {
            huffman_lengths,
            index_count: read_u32(256),
            index_bytes: read_u32(260),
            vertex_count: read_u32(264),
            vertex_bytes: read_u32(268),
        })
    }
}

fn encode_delta_u32(delta: i32) -> u32 {
    if delta < 0 {
        ((-delta) as u32) << 1 | 1
    } else {
        (delta as u32) << 1
    }
}

fn decode_delta_u32(encoded: u32) -> i32 {
    let magnitude = (encoded >> 1) as i32;
    if encoded & 1 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn encode_delta_u16(delta: i16) -> u16 {
    if delta < 0 {
        ((-delta) as u16) << 1 | 1
    } else {
        (delta as u16) << 1
    }
}

fn decode_delta_u16(encoded: u16) -> i16 {
    let magnitude = (encoded >> 1) as i16;
    if encoded & 1 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Encodes `(indices, vertices)` into a self-contained, decodable buffer.
pub fn encode(indices: &[Index], vertices: &[Vertex]) -> Vec<u8> {
    let mut packet_indices = Vec::with_capacity(indices.len());
    let mut last_index: u32 = 0;
    for &index in indices {
        packet_indices.push(encode_delta_u32(index as i32 - last_index as i32));
        last_index = index;
    }

    let mut packet_vertices = Vec::with_capacity(vertices.len() * 3);
    let (mut last_x, mut last_y, mut last_depth) = (0u16, 0u16, 0u16);
    for vertex in vertices {
        let depth = (vertex.z * DEPTH_QUANTUM) as u16;

        packet_vertices.push(encode_delta_u16(vertex.x as i16 - last_x as i16));
        packet_vertices.push(encode_delta_u16(vertex.y as i16 - last_y as i16));
        packet_vertices.push(encode_delta_u16(depth as i16 - last_depth as i16));

        last_x = vertex.x;
        last_y = vertex.y;
        last_depth = depth;
    }

    let index_bytes: Vec<u8> = packet_indices.iter().flat_map(|v| v.to_le_bytes()).collect();
    let vertex_bytes: Vec<u8> = packet_vertices.iter().flat_map(|v| v.to_le_bytes()).collect();

    let huffman = HuffmanCode::build(&[&index_bytes, &vertex_bytes])
        .expect("256-symbol alphabet code length never exceeds 64 bits");

    let encoded_indices = huffman.encode(&index_bytes);
    let encoded_vertices = huffman.encode(&vertex_bytes);

    let header = GeometryHeader {
        huffman_lengths: huffman.lengths(),
        index_count: indices.len() as u32,
        index_bytes: encoded_indices.len() as u32,
        vertex_count: vertices.len() as u32,
        vertex_bytes: encoded_vertices.len() as u32,
    };

    let mut buffer = Vec::with_capacity(HEADER_SIZE + encoded_indices.len() + encoded_vertices.len());
    header.write(&mut buffer);
    buffer.extend_from_slice(&encoded_indices);
    buffer.extend_from_slice(&encoded_vertices);
    buffer
}

/// Decodes a buffer produced by [`encode`] back into `(indices, vertices)`.
pub fn decode(buffer: &[u8]) -> Result<(Vec<Index>, Vec<Vertex>), GeometryCodecError> {
    let header = GeometryHeader::read(buffer)?;
    let huffman = HuffmanCode::from_lengths(&header.huffman_lengths);

    let index_offset = HEADER_SIZE;
    let vertex_offset = HEADER_SIZE + header.index_bytes as usize;
    let end = vertex_offset + header.vertex_bytes as usize;
    if buffer.len() < end {
        return Err(GeometryCodecError::PayloadTruncated);
    }

    let mut index_byte_buf = vec![0u8; header.index_count as usize * 4];
    huffman.decode(&buffer[index_offset..vertex_offset], &mut index_byte_buf)?;

    let mut vertex_byte_buf = vec![0u8; header.vertex_count as usize * 3 * 2];
    huffman.decode(&buffer[vertex_offset..end], &mut vertex_byte_buf)?;

    let mut indices = Vec::with_capacity(header.index_count as usize);
    let mut last_index: i64 = 0;
    for chunk in index_byte_buf.chunks_exact(4) {
        let encoded = u32::from_le_bytes(chunk.try_into().unwrap());
        let index = decode_delta_u32(encoded) as i64 + last_index;
        indices.push(index as Index);
        last_index = index;
    }

    let mut vertices = Vec::with_capacity(header.vertex_count as usize);
    let (mut last_x, mut last_y, mut last_depth) = (0u16, 0u16, 0u16);
    for triple in vertex_byte_buf.chunks_exact(6) {
        let ex = u16::from_le_bytes(triple[0..2].try_into().unwrap());
        let ey = u16::from_le_bytes(triple[2..4].try_into().unwrap());
        let ez = u16::from_le_bytes(triple[4..6].try_into().unwrap());

        let x = (decode_delta_u16(ex) as i32 + last_x as i32) as u16;
        let y = (decode_delta_u16(ey) as i32 + last_y as i32) as u16;
        let depth = (decode_delta_u16(ez) as i32 + last_depth as i32) as u16;

        vertices.push(Vertex::new(x, y, depth as f32 / DEPTH_QUANTUM));

        last_x = x;
        last_y = y;
        last_depth = depth;
    }

    Ok((indices, vertices))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_encode_is_header_only() {
        let buffer = encode(&[], &[]);
        assert_eq!(buffer.len(), HEADER_SIZE);
        assert_eq!(&buffer[256..272], &[0u8; 16]);

        let (indices, vertices) = decode(&buffer).unwrap();
        assert!(indices.is_empty());
        assert!(vertices.is_empty());
    }

    #[test]
    fn single_triangle_round_trips() {
        let indices = vec![0u32, 1, 2];
        let vertices = vec![
            Vertex::new(0, 0, 0.0),
            Vertex::new(1, 0, 0.5),
            Vertex::new(0, 1, 1.0),
        ];

        let buffer = encode(&indices, &vertices);
        let (decoded_indices, decoded_vertices) = decode(&buffer).unwrap();

        assert_eq!(decoded_indices, indices);
        assert_eq!(decoded_vertices.len(), 3);
        for (decoded, original) in decoded_vertices.iter().zip(&vertices) {
            assert_eq!(decoded.x, original.x);
            assert_eq!(decoded.y, original.y);
            assert!((decoded.z - original.z).abs() <= 1.0 / 0x7FFF as f32);
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let indices = vec![5u32, 2, 9, 9, 1];
        let vertices = vec![Vertex::new(3, 4, 0.25), Vertex::new(10, 1, 0.75)];

        assert_eq!(encode(&indices, &vertices), encode(&indices, &vertices));
    }

    #[test]
    fn round_trips_a_larger_mesh() {
        let mut indices = Vec::new();
        let mut vertices = Vec::new();
        for i in 0..300u32 {
            vertices.push(Vertex::new((i % 512) as u16, (i * 3 % 512) as u16, (i % 100) as f32 / 100.0));
        }
        for i in 0..100u32 {
            indices.push(i * 3);
            indices.push(i * 3 + 1);
            indices.push(i * 3 + 2);
        }

        let buffer = encode(&indices, &vertices);
        let (decoded_indices, decoded_vertices) = decode(&buffer).unwrap();
        assert_eq!(decoded_indices, indices);
        assert_eq!(decoded_vertices.len(), vertices.len());
    }
}
