//! Minimal HTTP admin surface: `GET /scenes`, `GET /files/<path>`,
//! `POST /files/<path>?type={log|image}`. Explicitly thin per its place in
//! the component budget — a hand-rolled HTTP/1.1 listener over `tokio`
//! rather than pulling in a full web framework the rest of the stack never
//! needs, behind an [`AdminArtifactStore`] trait so the core pipeline
//! never depends on this module at all.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const SCENE_EXTENSIONS: &[&str] = &["fbx", "gltf", "glb", "obj"];

#[async_trait::async_trait]
pub trait AdminArtifactStore: Send + Sync {
    async fn list_scenes(&self) -> std::io::Result<Vec<String>>;
    async fn read_path(&self, path: &str) -> std::io::Result<ReadResult>;
    async fn write_log(&self, path: &str, body: &[u8]) -> std::io::Result<()>;
    async fn write_image(&self, path: &str, width: u32, height: u32, rgb8: &[u8]) -> std::io::Result<()>;
}

pub enum ReadResult {
    File(Vec<u8>),
    Directory(Vec<String>),
    NotFound,
}

/// Default store: serves/writes real files under `scene_directory` and
/// `study_directory`.
pub struct FilesystemArtifactStore {
    pub scene_directory: PathBuf,
    pub study_directory: PathBuf,
}

#[async_trait::async_trait]
impl AdminArtifactStore for FilesystemArtifactStore {
    async fn list_scenes(&self) -> std::io::Result<Vec<String>> {
        let mut scenes = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.scene_directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches_extension = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| SCENE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if matches_extension {
                scenes.push(path.display().to_string());
            }
        }
        Ok(scenes)
    }

    async fn read_path(&self, path: &str) -> std::io::Result<ReadResult> {
        let full_path = resolve_within(&self.study_directory, path);
        let Some(full_path) = full_path else {
            return Ok(ReadResult::NotFound);
        };

        let metadata = match tokio::fs::metadata(&full_path).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(ReadResult::NotFound),
            Err(error) => return Err(error),
        };

        if metadata.is_dir() {
            let mut names = Vec::new();
            let mut entries = tokio::fs::read_dir(&full_path).await?;
            while let Some(entry) = entries.next_entry().await? {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            Ok(ReadResult::Directory(names))
        } else {
            Ok(ReadResult::File(tokio::fs::read(&full_path).await?))
        }
    }

    async fn write_log(&self, path: &str, body: &[u8]) -> std::io::Result<()> {
        let Some(full_path) = resolve_within(&self.study_directory, path) else {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "path escapes study directory"));
        };
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full_path, body).await
    }

    async fn write_image(&self, path: &str, width: u32, height: u32, rgb8: &[u8]) -> std::io::Result<()> {
        let Some(full_path) = resolve_within(&self.study_directory, path) else {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "path escapes study directory"));
        };
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full_path.with_extension("ppm"), encode_ppm(width, height, rgb8)).await
    }
}

fn resolve_within(root: &Path, requested: &str) -> Option<PathBuf> {
    let requested = requested.trim_start_matches('/');
    if requested.split('/').any(|segment| segment == "..") {
        return None;
    }
    Some(root.join(requested))
}

fn encode_ppm(width: u32, height: u32, rgb8: &[u8]) -> Vec<u8> {
    let header = format!("P6\n{width} {height}\n255\n");
    let mut out = Vec::with_capacity(header.len() + rgb8.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(rgb8);
    out
}

pub async fn serve(bind: std::net::SocketAddr, store: Arc<dyn AdminArtifactStore>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(%bind, "admin HTTP listener bound");
    loop {
        let (stream, peer) = listener.accept().await?;
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            if let Err(error) = handle_connection(stream, store).await {
                tracing::warn!(%peer, %error, "admin connection error");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, store: Arc<dyn AdminArtifactStore>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..read]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            return write_response(&mut stream, 431, "Request Header Fields Too Large", b"").await;
        }
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let content_length: usize = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0);

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));

    match (method.as_str(), path) {
        ("GET", "/scenes") => match store.list_scenes().await {
            Ok(scenes) => {
                let json = format!("[{}]", scenes.iter().map(|s| format!("{s:?}")).collect::<Vec<_>>().join(","));
                write_response(&mut stream, 200, "OK", json.as_bytes()).await
            }
            Err(error) => write_response(&mut stream, 500, "Internal Server Error", error.to_string().as_bytes()).await,
        },
        ("GET", path) if path.starts_with("/files/") => {
            let file_path = &path["/files/".len()..];
            match store.read_path(file_path).await {
                Ok(ReadResult::File(bytes)) => write_response(&mut stream, 200, "OK", &bytes).await,
                Ok(ReadResult::Directory(names)) => {
                    let json = format!("[{}]", names.iter().map(|s| format!("{s:?}")).collect::<Vec<_>>().join(","));
                    write_response(&mut stream, 200, "OK", json.as_bytes()).await
                }
                Ok(ReadResult::NotFound) => write_response(&mut stream, 404, "Not Found", b"").await,
                Err(error) => write_response(&mut stream, 500, "Internal Server Error", error.to_string().as_bytes()).await,
            }
        }
        ("POST", path) if path.starts_with("/files/") => {
            let file_path = &path["/files/".len()..];
            let artifact_type = query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "type")
                .map(|(_, value)| value)
                .unwrap_or("log");

            let result = match artifact_type {
                "image" => write_image_artifact(store.as_ref(), file_path, &body).await,
                _ => store.write_log(file_path, &body).await,
            };

            match result {
                Ok(()) => write_response(&mut stream, 204, "No Content", b"").await,
                Err(error) => write_response(&mut stream, 400, "Bad Request", error.to_string().as_bytes()).await,
            }
        }
        _ => write_response(&mut stream, 404, "Not Found", b"").await,
    }
}

async fn write_image_artifact(
    store: &(dyn AdminArtifactStore),
    path: &str,
    body: &[u8],
) -> std::io::Result<()> {
    if body.len() < 8 {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "image body shorter than its header"));
    }
    let width = u32::from_le_bytes(body[0..4].try_into().unwrap());
    let height = u32::from_le_bytes(body[4..8].try_into().unwrap());
    let pixels = &body[8..];
    store.write_image(path, width, height, pixels).await
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

async fn write_response(stream: &mut TcpStream, status: u16, reason: &str, body: &[u8]) -> std::io::Result<()> {
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppm_header_matches_the_pixel_count() {
        let image = encode_ppm(2, 1, &[255, 0, 0, 0, 255, 0]);
        assert!(image.starts_with(b"P6\n2 1\n255\n"));
        assert_eq!(image.len(), "P6\n2 1\n255\n".len() + 6);
    }

    #[test]
    fn resolve_within_rejects_parent_traversal() {
        let root = PathBuf::from("/tmp/study");
        assert!(resolve_within(&root, "../etc/passwd").is_none());
        assert!(resolve_within(&root, "frame_0.ppm").is_some());
    }

    #[test]
    fn find_header_end_locates_the_blank_line() {
        let request = b"GET /scenes HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(find_header_end(request), Some(request.len()));
    }
}
