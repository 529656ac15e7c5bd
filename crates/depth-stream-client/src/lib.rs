//! Client-side mirror of the server's wire protocol: reassembles
//! length-prefixed packets out of whatever byte chunks the transport
//! delivers them in, and decodes them into events an embedding client can
//! act on without touching `bytes`/`depth-stream-proto` directly.

mod decoder;

pub use decoder::{ClientEvent, DecodeError, DecoderSession, LayerReady};
