//! Filesystem-backed store for offline runs

use super::ArtifactStore;
use meshrelay_core::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const META_FILE: &str = ".folder.toml";

/// Sidecar recorded next to each local folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMeta {
    pub name: String,
    #[serde(default)]
    pub public: bool,
}

/// Stores each folder as `{root}/{uuid}/` with a `.folder.toml` sidecar
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn folder_path(&self, folder_id: &str) -> PathBuf {
        self.root.join(folder_id)
    }

    /// Read a folder's sidecar
    pub fn folder_meta(&self, folder_id: &str) -> Result<FolderMeta> {
        let path = self.existing_folder(folder_id)?.join(META_FILE);
        let content = std::fs::read_to_string(&path)?;
        Ok(toml::from_str(&content)?)
    }

    fn write_meta(&self, folder: &Path, meta: &FolderMeta) -> Result<()> {
        std::fs::write(folder.join(META_FILE), toml::to_string(meta)?)?;
        Ok(())
    }

    fn existing_folder(&self, folder_id: &str) -> Result<PathBuf> {
        // Ids are bare uuids; anything with a separator is not ours
        if folder_id.is_empty() || folder_id.contains(['/', '\\']) || folder_id.contains("..") {
            return Err(RelayError::Storage(format!("Invalid folder id '{}'", folder_id)));
        }
        let path = self.folder_path(folder_id);
        if !path.is_dir() {
            return Err(RelayError::Storage(format!("Folder not found: {}", folder_id)));
        }
        Ok(path)
    }
}

impl ArtifactStore for LocalStore {
    fn create_folder(&self, name: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let path = self.folder_path(&id);
        std::fs::create_dir_all(&path).map_err(|e| {
            RelayError::Storage(format!("Failed to create folder {}: {}", path.display(), e))
        })?;
        self.write_meta(
            &path,
            &FolderMeta {
                name: name.to_string(),
                public: false,
            },
        )?;
        Ok(id)
    }

    fn upload(&self, local_path: &Path, folder_id: &str) -> Result<String> {
        let folder = self.existing_folder(folder_id)?;
        let name = local_path
            .file_name()
            .ok_or_else(|| RelayError::Storage(format!("No file name in {}", local_path.display())))?;
        std::fs::copy(local_path, folder.join(name)).map_err(|e| {
            RelayError::Storage(format!("Failed to upload {}: {}", local_path.display(), e))
        })?;
        Ok(format!("{}/{}", folder_id, name.to_string_lossy()))
    }

    fn make_public(&self, folder_id: &str) -> Result<()> {
        let folder = self.existing_folder(folder_id)?;
        let mut meta = self.folder_meta(folder_id)?;
        meta.public = true;
        self.write_meta(&folder, &meta)
    }

    fn delete_folder(&self, folder_id: &str) -> Result<()> {
        let folder = self.existing_folder(folder_id)?;
        std::fs::remove_dir_all(&folder).map_err(|e| {
            RelayError::Storage(format!("Failed to delete folder {}: {}", folder.display(), e))
        })
    }
}
