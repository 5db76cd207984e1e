//! Layered configuration system
//!
//! Config is merged from these layers (highest wins):
//! 1. Environment variables (`MESHRELAY_*`, plus the 3D backend's
//!    `ATTN_BACKEND`, `SPARSE_ATTN_BACKEND`, `SPCONV_ALGO`)
//! 2. An explicit `--config` file
//! 3. Project-local: `.meshrelay/config.toml`
//! 4. Global: `~/.meshrelay/config.toml`
//!
//! Missing keys fall back to built-in defaults. CLI flags are applied on top
//! by the server binary.

use meshrelay_core::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// HTTP listener and worker queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on a multipart request body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Jobs allowed to wait for the worker before requests are turned away
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024
}
fn default_queue_capacity() -> usize {
    8
}

/// Image-to-3D backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneBackendConfig {
    #[serde(default = "default_scene_backend")]
    pub backend: String,
    #[serde(default = "default_scene_url")]
    pub url: String,
    /// `None` waits for the pipeline indefinitely
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_attn_backend")]
    pub attn_backend: String,
    #[serde(default = "default_attn_backend")]
    pub sparse_attn_backend: String,
    #[serde(default = "default_spconv_algo")]
    pub spconv_algo: String,
}

impl Default for SceneBackendConfig {
    fn default() -> Self {
        Self {
            backend: default_scene_backend(),
            url: default_scene_url(),
            timeout_secs: None,
            attn_backend: default_attn_backend(),
            sparse_attn_backend: default_attn_backend(),
            spconv_algo: default_spconv_algo(),
        }
    }
}

fn default_scene_backend() -> String {
    "trellis".to_string()
}
fn default_scene_url() -> String {
    "http://127.0.0.1:8001".to_string()
}
fn default_attn_backend() -> String {
    "xformers".to_string()
}
fn default_spconv_algo() -> String {
    "native".to_string()
}

/// Text/image-to-image backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBackendConfig {
    #[serde(default = "default_image_backend")]
    pub backend: String,
    #[serde(default = "default_image_url")]
    pub url: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ImageBackendConfig {
    fn default() -> Self {
        Self {
            backend: default_image_backend(),
            url: default_image_url(),
            timeout_secs: None,
        }
    }
}

fn default_image_backend() -> String {
    "omnigen".to_string()
}
fn default_image_url() -> String {
    "http://127.0.0.1:8002".to_string()
}

/// Which artifact store receives uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Drive,
    Local,
}

impl std::str::FromStr for StorageKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "drive" => Ok(StorageKind::Drive),
            "local" => Ok(StorageKind::Local),
            other => Err(RelayError::Config(format!(
                "Unknown storage kind '{}'. Available: drive, local",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_kind")]
    pub kind: StorageKind,
    /// Root directory for `kind = "local"`
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    /// Delete the remote folder when a request fails after creating it
    #[serde(default)]
    pub delete_orphaned_folders: bool,
    #[serde(default = "default_storage_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_drive_api_url")]
    pub drive_api_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: default_storage_kind(),
            local_root: default_local_root(),
            delete_orphaned_folders: false,
            request_timeout_secs: default_storage_timeout(),
            drive_api_url: default_drive_api_url(),
        }
    }
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Drive
}
fn default_local_root() -> PathBuf {
    PathBuf::from(".meshrelay/storage")
}
fn default_storage_timeout() -> u64 {
    60
}
fn default_drive_api_url() -> String {
    "https://www.googleapis.com".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchConfig {
    #[serde(default = "default_scratch_root")]
    pub root: PathBuf,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: default_scratch_root(),
        }
    }
}

fn default_scratch_root() -> PathBuf {
    std::env::temp_dir().join("meshrelay")
}

/// Container used for rendered orientation videos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    Mp4,
    Gif,
}

impl VideoFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            VideoFormat::Mp4 => "mp4",
            VideoFormat::Gif => "gif",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_video_format")]
    pub format: VideoFormat,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            format: default_video_format(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

fn default_video_format() -> VideoFormat {
    VideoFormat::Mp4
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    #[serde(default = "default_ngrok_path")]
    pub ngrok_path: String,
    /// Local inspection API exposed by the ngrok agent
    #[serde(default = "default_ngrok_api_url")]
    pub api_url: String,
    #[serde(default = "default_tunnel_startup_timeout")]
    pub startup_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            ngrok_path: default_ngrok_path(),
            api_url: default_ngrok_api_url(),
            startup_timeout_secs: default_tunnel_startup_timeout(),
        }
    }
}

fn default_ngrok_path() -> String {
    "ngrok".to_string()
}
fn default_ngrok_api_url() -> String {
    "http://127.0.0.1:4040".to_string()
}
fn default_tunnel_startup_timeout() -> u64 {
    15
}

/// Resolved configuration with all layers applied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scene: SceneBackendConfig,
    #[serde(default)]
    pub image: ImageBackendConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scratch: ScratchConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
}

impl RelayConfig {
    /// Load config with layered precedence: global < project < explicit < env vars
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut merged = toml::Table::new();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                merge_tables(&mut merged, Self::load_table(&global_path)?);
            }
        }

        let local_path = PathBuf::from(".meshrelay/config.toml");
        if local_path.exists() {
            merge_tables(&mut merged, Self::load_table(&local_path)?);
        }

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(RelayError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            merge_tables(&mut merged, Self::load_table(path)?);
        }

        let mut config: RelayConfig = toml::Value::Table(merged).try_into()?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load config from a specific file path only (no env overrides)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let table = Self::load_table(path)?;
        let config: RelayConfig = toml::Value::Table(table).try_into()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("MESHRELAY_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| RelayError::Config(format!("invalid MESHRELAY_PORT: {}", e)))?;
        }
        if let Some(url) = lookup("MESHRELAY_SCENE_URL") {
            self.scene.url = url;
        }
        if let Some(url) = lookup("MESHRELAY_IMAGE_URL") {
            self.image.url = url;
        }
        if let Some(kind) = lookup("MESHRELAY_STORAGE") {
            self.storage.kind = kind.parse()?;
        }
        if let Some(dir) = lookup("MESHRELAY_SCRATCH_DIR") {
            self.scratch.root = PathBuf::from(dir);
        }
        if let Some(v) = lookup("ATTN_BACKEND") {
            self.scene.attn_backend = v;
        }
        if let Some(v) = lookup("SPARSE_ATTN_BACKEND") {
            self.scene.sparse_attn_backend = v;
        }
        if let Some(v) = lookup("SPCONV_ALGO") {
            self.scene.spconv_algo = v;
        }
        Ok(())
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".meshrelay").join("config.toml"))
    }

    fn load_table(path: &Path) -> Result<toml::Table> {
        let content = std::fs::read_to_string(path)?;
        content.parse::<toml::Table>().map_err(|e| {
            RelayError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }
}

/// Recursively overlay `overlay` onto `base`; nested tables merge key by key
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
