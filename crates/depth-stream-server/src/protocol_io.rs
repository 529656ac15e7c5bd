//! Packet framing and the connection's dispatch loop.
//!
//! The original dispatches packets through a WebSocket library's callbacks
//! (`streaming_server.hpp`); per the documented redesign note this becomes a
//! `select!`-driven loop over incoming packets, outgoing responses, and
//! shutdown. Each packet on the wire is additionally wrapped in a 4-byte
//! little-endian length prefix: the original relied on WebSocket message
//! boundaries for framing, which a raw TLS/TCP stream doesn't provide.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use depth_stream_proto::{
    LogInitPacket, LogWritePacket, MeshSettings, PacketError, PacketTag, RenderRequestPacket,
    SessionCreatePacket, VideoSettingsPacket,
};

use crate::error::SessionError;

/// Payloads above this size are dropped rather than buffered, per the
/// documented "oversized payload" failure mode.
pub const MAX_PACKET_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Active,
}

#[derive(Debug)]
pub enum IncomingPacket {
    SessionCreate(SessionCreatePacket),
    SessionDestroy,
    RenderRequest(RenderRequestPacket),
    MeshSettings(MeshSettings),
    VideoSettings(VideoSettingsPacket),
    LogInit(LogInitPacket),
    LogWrite(LogWritePacket),
}

/// Reads one length-prefixed packet. Malformed or oversized frames are
/// reported as `Err` for the caller to log and discard, per §7's "drop the
/// packet, keep the connection" rule — returning early here never tears
/// down the connection by itself.
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<IncomingPacket, PacketReadError> {
    let frame_len = reader.read_u32_le().await.map_err(PacketReadError::Io)?;
    if frame_len > MAX_PACKET_BYTES {
        // Drain and discard so the stream stays byte-aligned for the next frame.
        let mut remaining = frame_len as u64;
        let mut sink = tokio::io::sink();
        while remaining > 0 {
            let mut buf = (&mut *reader).take(remaining.min(64 * 1024));
            let copied = tokio::io::copy(&mut buf, &mut sink).await.map_err(PacketReadError::Io)?;
            if copied == 0 {
                break;
            }
            remaining -= copied;
        }
        return Err(PacketReadError::Packet(PacketError::Oversized(frame_len as usize)));
    }

    let mut raw = BytesMut::zeroed(frame_len as usize);
    reader.read_exact(&mut raw).await.map_err(PacketReadError::Io)?;

    let mut body = raw.freeze();
    if body.len() < 4 {
        return Err(PacketReadError::Packet(PacketError::Truncated));
    }
    let tag = PacketTag::from_u32(body.get_u32_le()).map_err(PacketReadError::Packet)?;

    decode_body(tag, body).map_err(PacketReadError::Packet)
}

fn decode_body(tag: PacketTag, body: Bytes) -> Result<IncomingPacket, PacketError> {
    match tag {
        PacketTag::SessionCreate => Ok(IncomingPacket::SessionCreate(SessionCreatePacket::decode(body)?)),
        PacketTag::SessionDestroy => Ok(IncomingPacket::SessionDestroy),
        PacketTag::RenderRequest => Ok(IncomingPacket::RenderRequest(RenderRequestPacket::decode(body)?)),
        PacketTag::MeshSettings => Ok(IncomingPacket::MeshSettings(MeshSettings::decode_packet(body)?)),
        PacketTag::VideoSettings => Ok(IncomingPacket::VideoSettings(VideoSettingsPacket::decode(body)?)),
        PacketTag::LogInit => Ok(IncomingPacket::LogInit(LogInitPacket::decode(body)?)),
        PacketTag::LogWrite => Ok(IncomingPacket::LogWrite(LogWritePacket::decode(body)?)),
        PacketTag::LayerResponse | PacketTag::ServerEvent => {
            Err(PacketError::UnknownTag(tag as u32))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketReadError {
    #[error("connection closed or errored: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Packet(#[from] PacketError),
}

pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> std::io::Result<()> {
    writer.write_u32_le(body.len() as u32).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

/// Keeps only the newest `RenderRequest`, implementing the "at most one
/// request in flight, latest wins" coalescing rule.
#[derive(Default)]
pub struct RenderRequestMailbox {
    latest: Option<RenderRequestPacket>,
}

impl RenderRequestMailbox {
    pub fn push(&mut self, request: RenderRequestPacket) {
        self.latest = Some(request);
    }

    pub fn take(&mut self) -> Option<RenderRequestPacket> {
        self.latest.take()
    }
}

/// Channels the connection loop forwards decoded control packets onto, and
/// receives outgoing wire bytes from. Owned by whoever bridges the
/// connection to a `Session` (out of scope for this module — it only
/// speaks bytes and channels).
pub struct ControlChannels {
    pub session_create_tx: mpsc::Sender<SessionCreatePacket>,
    pub session_destroy_tx: mpsc::Sender<()>,
    pub mesh_settings_tx: mpsc::Sender<MeshSettings>,
    pub video_settings_tx: mpsc::Sender<VideoSettingsPacket>,
    pub mailbox: std::sync::Arc<std::sync::Mutex<RenderRequestMailbox>>,
    pub outgoing_rx: mpsc::Receiver<Bytes>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Runs one connection to completion: reads packets, enforces the
/// `Idle`/`Active` state machine, forwards accepted control packets, and
/// writes whatever outgoing bytes arrive on `outgoing_rx` — all in one
/// `select!` loop, replacing the original's callback dispatch.
pub async fn serve_connection<S>(stream: S, mut channels: ControlChannels) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = ConnectionState::Idle;
    let (mut reader, mut writer) = tokio::io::split(stream);

    loop {
        tokio::select! {
            biased;

            _ = channels.shutdown_rx.changed() => {
                if *channels.shutdown_rx.borrow() {
                    return Ok(());
                }
            }

            outgoing = channels.outgoing_rx.recv() => {
                match outgoing {
                    Some(bytes) => write_packet(&mut writer, &bytes).await.map_err(SessionError::Io)?,
                    None => return Ok(()),
                }
            }

            packet = read_packet(&mut reader) => {
                match packet {
                    Ok(packet) => dispatch(packet, &mut state, &channels).await,
                    Err(PacketReadError::Io(error)) => return Err(SessionError::Io(error)),
                    Err(PacketReadError::Packet(error)) => {
                        tracing::error!(%error, "malformed packet dropped, connection kept open");
                    }
                }
            }
        }
    }
}

async fn dispatch(packet: IncomingPacket, state: &mut ConnectionState, channels: &ControlChannels) {
    match packet {
        IncomingPacket::SessionCreate(create) => {
            if *state == ConnectionState::Active {
                tracing::error!("SessionCreate received while a session is already active; tearing it down");
                let _ = channels.session_destroy_tx.try_send(());
                // Session-fatal, not protocol-fatal: the state resets to
                // Idle but the transport stays open for the client to retry.
                *state = ConnectionState::Idle;
                return;
            }
            if channels.session_create_tx.send(create).await.is_ok() {
                *state = ConnectionState::Active;
            }
        }
        IncomingPacket::SessionDestroy => {
            let _ = channels.session_destroy_tx.send(()).await;
            *state = ConnectionState::Idle;
        }
        IncomingPacket::RenderRequest(request) => {
            if *state != ConnectionState::Active {
                tracing::warn!("RenderRequest dropped: no active session");
                return;
            }
            channels.mailbox.lock().expect("render request mailbox poisoned").push(request);
        }
        IncomingPacket::MeshSettings(settings) => {
            if *state == ConnectionState::Active {
                let _ = channels.mesh_settings_tx.send(settings).await;
            }
        }
        IncomingPacket::VideoSettings(settings) => {
            if *state == ConnectionState::Active {
                let _ = channels.video_settings_tx.send(settings).await;
            }
        }
        IncomingPacket::LogInit(_) | IncomingPacket::LogWrite(_) => {
            // Log sub-streams are accepted in any state and are purely
            // client→server bookkeeping; nothing to forward downstream yet.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depth_stream_proto::{MeshGeneratorSettings, QuadSettings};

    #[tokio::test]
    async fn read_packet_round_trips_mesh_settings() {
        let settings = MeshSettings::new(MeshGeneratorSettings::Quad(QuadSettings::default()));
        let body = settings.encode_packet();

        let mut framed = BytesMut::new();
        framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
        framed.extend_from_slice(&body);

        let mut cursor = std::io::Cursor::new(framed.freeze().to_vec());
        let packet = read_packet(&mut cursor).await.unwrap();
        match packet {
            IncomingPacket::MeshSettings(decoded) => assert_eq!(decoded, settings),
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_without_buffering() {
        let mut framed = BytesMut::new();
        framed.extend_from_slice(&(MAX_PACKET_BYTES + 1).to_le_bytes());
        let mut cursor = std::io::Cursor::new(framed.freeze().to_vec());
        let result = read_packet(&mut cursor).await;
        assert!(matches!(result, Err(PacketReadError::Packet(PacketError::Oversized(_)))));
    }

    #[test]
    fn mailbox_keeps_only_the_latest_request() {
        let mut mailbox = RenderRequestMailbox::default();
        mailbox.push(RenderRequestPacket {
            request_id: 1,
            export_file_names: Default::default(),
            view_matrices: [depth_stream_proto::IDENTITY_MATRIX; depth_stream_proto::VIEW_COUNT_MAX],
        });
        mailbox.push(RenderRequestPacket {
            request_id: 2,
            export_file_names: Default::default(),
            view_matrices: [depth_stream_proto::IDENTITY_MATRIX; depth_stream_proto::VIEW_COUNT_MAX],
        });
        assert_eq!(mailbox.take().unwrap().request_id, 2);
        assert!(mailbox.take().is_none());
    }
}
