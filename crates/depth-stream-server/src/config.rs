//! Server configuration: CLI flags (`clap`) layered over an on-disk TOML
//! file.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

/// Depth-contour remote rendering server.
#[derive(Parser, Debug)]
#[command(name = "depth-stream-server", version, about)]
pub struct Cli {
    /// Address to bind the session listener to.
    #[arg(long, default_value = "0.0.0.0")]
    pub addr: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9000)]
    pub port: u16,

    /// Path to TLS certificate file (PEM). If absent, a self-signed
    /// certificate is generated.
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM). Required if `--cert` is given.
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Path to a TOML configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Directory holding scene/sky assets referenced by session setup.
    #[arg(long)]
    pub scene_directory: Option<PathBuf>,

    /// Directory study-capture artifacts and logs are written under.
    #[arg(long)]
    pub study_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub scene_directory: PathBuf,
    pub study_directory: PathBuf,
    pub default_scene: SceneDefaults,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SceneDefaults {
    pub scene_scale: f32,
    pub scene_exposure: f32,
    pub scene_indirect_intensity: f32,
    pub sky_intensity: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9000".parse().unwrap(),
            cert_path: None,
            key_path: None,
            scene_directory: PathBuf::from("./scenes"),
            study_directory: PathBuf::from("./study"),
            default_scene: SceneDefaults::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl Default for SceneDefaults {
    fn default() -> Self {
        Self {
            scene_scale: 1.0,
            scene_exposure: 1.0,
            scene_indirect_intensity: 1.0,
            sky_intensity: 1.0,
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:9001".parse().unwrap(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        toml::from_str(&contents).map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))
    }

    /// Applies CLI overrides on top of a loaded config, matching the
    /// teacher's `(cli.cert, cli.key)` precedence.
    pub fn apply_cli(&mut self, cli: &Cli) {
        let bind_addr: SocketAddr = format!("{}:{}", cli.addr, cli.port)
            .parse()
            .unwrap_or(self.bind);
        self.bind = bind_addr;

        if cli.cert.is_some() {
            self.cert_path = cli.cert.clone();
        }
        if cli.key.is_some() {
            self.key_path = cli.key.clone();
        }
        if let Some(dir) = &cli.scene_directory {
            self.scene_directory = dir.clone();
        }
        if let Some(dir) = &cli.study_directory {
            self.study_directory = dir.clone();
        }
    }
}
