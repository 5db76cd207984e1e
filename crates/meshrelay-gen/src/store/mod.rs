//! Remote folder storage for generated artifacts
//!
//! Every call is one blocking remote operation. Nothing here retries, and
//! creating two folders with the same name yields two folders.

mod drive;
mod local;

pub use drive::{DriveStore, ServiceAccountKey};
pub use local::{FolderMeta, LocalStore};

use crate::config::{RelayConfig, StorageKind};
use meshrelay_core::Result;
use std::path::Path;

/// Abstraction over the folder-per-request storage service
pub trait ArtifactStore: Send {
    /// Create a private folder and return its id
    fn create_folder(&self, name: &str) -> Result<String>;

    /// Upload a local file into a folder under its base name; returns the file id
    fn upload(&self, local_path: &Path, folder_id: &str) -> Result<String>;

    /// Grant world read access to a folder
    fn make_public(&self, folder_id: &str) -> Result<()>;

    /// Remove a folder and everything in it
    fn delete_folder(&self, folder_id: &str) -> Result<()>;
}

/// Build the store selected by `storage.kind`.
///
/// The service-account key is only read for the Drive store.
pub fn create_store(config: &RelayConfig, service_account: &Path) -> Result<Box<dyn ArtifactStore>> {
    match config.storage.kind {
        StorageKind::Drive => {
            let key = ServiceAccountKey::from_file(service_account)?;
            Ok(Box::new(DriveStore::new(key, &config.storage)))
        }
        StorageKind::Local => Ok(Box::new(LocalStore::new(config.storage.local_root.clone()))),
    }
}

/// MIME type for an artifact, keyed on its extension
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" => "video/mp4",
        "gif" => "image/gif",
        "glb" => "model/gltf-binary",
        "ply" => "application/octet-stream",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}
