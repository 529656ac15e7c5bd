//! Wire protocol, geometry codec and mesh settings shared between the
//! depth-stream server and client.

pub mod codec;
pub mod huffman;
pub mod packet;
pub mod settings;
pub mod types;

pub use codec::{GeometryCodecError, HEADER_SIZE};
pub use huffman::{HuffmanCode, HuffmanError};
pub use packet::{
    LayerResponseHeader, LogInitPacket, LogInterval, LogWritePacket, PacketError, PacketTag,
    RenderRequestPacket, ServerEventPacket, SessionCreatePacket, VideoCompressionMode,
    VideoSettingsPacket, VIEW_METADATA_SIZE,
};
pub use settings::{
    GeneratorViewMetadata, LineSettings, LineViewMetadata, LoopSettings, LoopViewMetadata,
    MeshGeneratorKind, MeshGeneratorSettings, MeshSettings, QuadSettings, QuadViewMetadata,
    SweepOrder, ViewMetadata,
};
pub use types::{
    Index, Matrix, Vertex, VideoCodec, EXPORT_COUNT_MAX, IDENTITY_MATRIX, LAYER_COUNT_MAX,
    STRING_LENGTH_MAX, VIEW_COUNT_MAX,
};
