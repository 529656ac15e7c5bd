//! Error types driving the session's retry-vs-teardown policy.
//!
//! `is_fatal()` replaces the original's scattered `should_close_session`
//! checks with a single predicate the protocol loop consults before
//! deciding whether a failure ends the session.

use depth_stream_proto::PacketError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] PacketError),

    #[error("session error: {0}")]
    Session(String),

    #[error("resource busy: {0}")]
    ResourceBusy(String),

    #[error("gpu error: {0}")]
    Gpu(String),

    #[error("encoder error: {0}")]
    Encoder(#[from] depth_stream_encoder::EncoderError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether this error must end the session rather than be reported
    /// and absorbed. Protocol and resource-busy errors are recoverable
    /// (the client can retry or the request can be dropped); GPU and
    /// encoder failures leave device/pipeline state unrecoverable in
    /// place and always tear the session down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Gpu(_) | Self::Encoder(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_and_resource_errors_are_not_fatal() {
        assert!(!SessionError::Protocol(PacketError::Truncated).is_fatal());
        assert!(!SessionError::ResourceBusy("no free frame slot".into()).is_fatal());
    }

    #[test]
    fn gpu_errors_are_fatal() {
        assert!(SessionError::Gpu("device lost".into()).is_fatal());
    }
}
