//! Server entry point: CLI/config bootstrap, TLS setup, and the top-level
//! accept loop. At most one session exists at a time (§3 invariant): a new
//! connection's `SessionCreate` replaces whatever session came before it.

mod admin;
mod atlas;
mod config;
mod error;
mod protocol_io;
mod session;
mod tls;
mod worker_pool;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use config::{Cli, ServerConfig};
use depth_stream_proto::VIEW_COUNT_MAX;
use protocol_io::{ControlChannels, RenderRequestMailbox};
use session::{LayerRenderOutput, LayerRenderer, Session};

/// Placeholder for the out-of-scope rasterizer: produces blank per-view
/// buffers sized to the session's resolution so the rest of the pipeline
/// (meshing, encoding, wire serialization) runs end-to-end without a real
/// scene. A production deployment substitutes a real GPU renderer here.
struct NullRenderer {
    resolution: (u32, u32),
}

impl LayerRenderer for NullRenderer {
    fn render_layer(
        &mut self,
        _layer_index: u32,
        _view_count: u32,
        _view_matrices: &[depth_stream_proto::Matrix; VIEW_COUNT_MAX],
    ) -> LayerRenderOutput {
        let pixel_count = (self.resolution.0 * self.resolution.1) as usize;
        LayerRenderOutput {
            view_buffers: std::array::from_fn(|_| depth_stream_mesh::ViewBuffers {
                resolution: self.resolution,
                depth: vec![1.0; pixel_count],
                normal: vec![[0.0, 0.0]; pixel_count],
                object_id: vec![0; pixel_count],
            }),
            view_color: std::array::from_fn(|_| vec![0u8; pixel_count * 4]),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref()).context("failed to load server configuration")?;
    config.apply_cli(&cli);

    let tls_acceptor = match (&config.cert_path, &config.key_path) {
        (Some(cert), Some(key)) => tls::load_from_files(cert, key)?,
        (None, None) => tls::generate_self_signed(config.bind.ip())?,
        (Some(_), None) => bail!("cert_path set without key_path"),
        (None, Some(_)) => bail!("key_path set without cert_path"),
    };

    if config.admin.enabled {
        let store = Arc::new(admin::FilesystemArtifactStore {
            scene_directory: config.scene_directory.clone(),
            study_directory: config.study_directory.clone(),
        });
        let admin_bind = config.admin.bind;
        tokio::spawn(async move {
            if let Err(error) = admin::serve(admin_bind, store).await {
                tracing::error!(%error, "admin HTTP listener exited");
            }
        });
    }

    run_accept_loop(config.bind, tls_acceptor).await
}

async fn run_accept_loop(bind: SocketAddr, tls_acceptor: tokio_rustls::TlsAcceptor) -> Result<()> {
    let listener = TcpListener::bind(bind).await.context("failed to bind session listener")?;
    tracing::info!(%bind, "depth-stream-server listening");

    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        let tls_acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            let stream = match tls_acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(error) => {
                    tracing::warn!(%peer, %error, "TLS handshake failed");
                    return;
                }
            };

            if let Err(error) = run_connection(stream).await {
                tracing::warn!(%peer, %error, "connection ended with an error");
            } else {
                tracing::info!(%peer, "connection closed");
            }
        });
    }
}

/// Bridges one connection's [`protocol_io`] loop to a [`Session`] actor
/// task. Only one `SessionCreate` is honored at a time per connection,
/// matching the documented single-active-session invariant.
async fn run_connection<S>(stream: S) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (session_create_tx, session_create_rx) = mpsc::channel(1);
    let (session_destroy_tx, session_destroy_rx) = mpsc::channel(1);
    let (mesh_settings_tx, mesh_settings_rx) = mpsc::channel(8);
    let (video_settings_tx, video_settings_rx) = mpsc::channel(8);
    let (outgoing_tx, outgoing_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mailbox = Arc::new(Mutex::new(RenderRequestMailbox::default()));

    let actor = tokio::spawn(run_session_actor(
        session_create_rx,
        session_destroy_rx,
        mesh_settings_rx,
        video_settings_rx,
        Arc::clone(&mailbox),
        outgoing_tx,
        shutdown_rx,
    ));

    let channels = ControlChannels {
        session_create_tx,
        session_destroy_tx,
        mesh_settings_tx,
        video_settings_tx,
        mailbox,
        outgoing_rx,
        shutdown_rx: shutdown_tx.subscribe(),
    };

    let result = protocol_io::serve_connection(stream, channels).await;
    let _ = shutdown_tx.send(true);
    let _ = actor.await;
    result.context("connection loop failed")
}

/// Owns the one active `Session` for this connection: creates it on
/// `SessionCreate`, tears it down on `SessionDestroy`/shutdown, and ticks
/// the render/check loop, coalescing render requests from the mailbox.
async fn run_session_actor(
    mut session_create_rx: mpsc::Receiver<depth_stream_proto::SessionCreatePacket>,
    mut session_destroy_rx: mpsc::Receiver<()>,
    mut mesh_settings_rx: mpsc::Receiver<depth_stream_proto::MeshSettings>,
    mut video_settings_rx: mpsc::Receiver<depth_stream_proto::VideoSettingsPacket>,
    mailbox: Arc<Mutex<RenderRequestMailbox>>,
    outgoing_tx: mpsc::Sender<bytes::Bytes>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut session: Option<Session> = None;
    let mut renderer: Option<NullRenderer> = None;
    let mut tick = tokio::time::interval(Duration::from_millis(16));

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            Some(()) = session_destroy_rx.recv() => {
                session = None;
                renderer = None;
            }

            Some(create) = session_create_rx.recv() => {
                let resolution = (create.resolution_w, create.resolution_h);
                match Session::create(
                    create.mesh_generator,
                    create.video_codec,
                    resolution,
                    create.layer_count,
                    create.view_count,
                    create.chroma_subsampling,
                ) {
                    Ok(new_session) => {
                        session = Some(new_session);
                        renderer = Some(NullRenderer { resolution });
                    }
                    Err(error) => tracing::error!(%error, "failed to create session"),
                }
            }

            Some(settings) = mesh_settings_rx.recv() => {
                if let Some(session) = session.as_mut() {
                    session.set_mesh_settings(settings);
                }
            }

            Some(settings) = video_settings_rx.recv() => {
                if let Some(session) = session.as_mut() {
                    session.set_encoder_mode(settings.mode);
                    session.set_encoder_frame_rate(settings.framerate);
                    session.set_encoder_bitrate(settings.bitrate);
                    session.set_encoder_quality(settings.quality);
                }
            }

            _ = tick.tick() => {
                let (Some(session), Some(renderer)) = (session.as_mut(), renderer.as_mut()) else {
                    continue;
                };

                if let Some(request) = mailbox.lock().expect("render request mailbox poisoned").take() {
                    if let Err(error) = session.render_frame(request.request_id, request.view_matrices, renderer) {
                        tracing::warn!(%error, "render_frame failed");
                    }
                }

                match session.check_frames() {
                    Ok(responses) => {
                        for (header, geometry, image) in responses {
                            let mut bytes = header.encode();
                            bytes.extend_from_slice(&geometry);
                            bytes.extend_from_slice(&image);
                            if outgoing_tx.send(bytes.freeze()).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(error) => tracing::error!(%error, "check_frames failed"),
                }
            }
        }
    }

    if let Some(session) = session {
        let _ = session.destroy();
    }
}
