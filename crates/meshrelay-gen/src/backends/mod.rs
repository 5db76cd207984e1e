//! Backend registry
//!
//! Maps backend names to concrete implementations.

pub mod mock;
pub mod omnigen;
mod sidecar;
pub mod trellis;

use crate::backend::{ImageBackend, SceneBackend};
use crate::config::RelayConfig;
use meshrelay_core::{RelayError, Result};

/// Create the image-to-3D backend named in config
pub fn create_scene_backend(config: &RelayConfig) -> Result<Box<dyn SceneBackend>> {
    match config.scene.backend.as_str() {
        "mock" => Ok(Box::new(mock::MockSceneBackend::new())),
        "trellis" => Ok(Box::new(trellis::TrellisBackend::from_config(&config.scene))),
        other => Err(RelayError::Config(format!(
            "Unknown 3D backend '{}'. Available: {}",
            other,
            available_scene_backends().join(", ")
        ))),
    }
}

/// Create the image backend named in config
pub fn create_image_backend(config: &RelayConfig) -> Result<Box<dyn ImageBackend>> {
    match config.image.backend.as_str() {
        "mock" => Ok(Box::new(mock::MockImageBackend::new())),
        "omnigen" => Ok(Box::new(omnigen::OmniGenBackend::from_config(&config.image))),
        other => Err(RelayError::Config(format!(
            "Unknown image backend '{}'. Available: {}",
            other,
            available_image_backends().join(", ")
        ))),
    }
}

pub fn available_scene_backends() -> Vec<&'static str> {
    vec!["mock", "trellis"]
}

pub fn available_image_backends() -> Vec<&'static str> {
    vec!["mock", "omnigen"]
}
