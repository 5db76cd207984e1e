//! Trellis image-to-3D backend (HTTP sidecar)
//!
//! Talks to an inference server that holds the pipeline in GPU memory:
//!
//! - `POST /run` `{image, seed, attn_backend, sparse_attn_backend, spconv_algo}` -> `{outputs_id}`
//! - `POST /outputs/{id}/render` `{representation, channel}` -> `{frames: [base64 png]}`
//! - `POST /outputs/{id}/glb` `{simplify, texture_size}` -> GLB bytes
//! - `GET /outputs/{id}/ply` -> PLY bytes
//! - `DELETE /outputs/{id}`

use super::sidecar::{decode_image_list, encode_b64, SidecarClient};
use crate::backend::*;
use crate::config::SceneBackendConfig;
use meshrelay_core::{RelayError, Result};
use std::path::Path;
use tracing::{debug, warn};

pub struct TrellisBackend {
    client: SidecarClient,
    kernels: KernelOptions,
}

impl TrellisBackend {
    pub fn from_config(config: &SceneBackendConfig) -> Self {
        Self {
            client: SidecarClient::new("trellis", &config.url, config.timeout_secs),
            kernels: KernelOptions {
                attn_backend: config.attn_backend.clone(),
                sparse_attn_backend: config.sparse_attn_backend.clone(),
                spconv_algo: config.spconv_algo.clone(),
            },
        }
    }

    fn run_payload(&self, image: &[u8], seed: u64) -> serde_json::Value {
        serde_json::json!({
            "image": encode_b64(image),
            "seed": seed,
            "attn_backend": self.kernels.attn_backend,
            "sparse_attn_backend": self.kernels.sparse_attn_backend,
            "spconv_algo": self.kernels.spconv_algo,
        })
    }
}

impl SceneBackend for TrellisBackend {
    fn name(&self) -> &str {
        "trellis"
    }

    fn run(&self, image_path: &Path, seed: u64) -> Result<SceneHandle> {
        let image = std::fs::read(image_path)?;
        let response = self.client.post_json("run", &self.run_payload(&image, seed))?;
        let handle = parse_run_response(&response)?;
        debug!(outputs_id = %handle.0, "trellis run complete");
        Ok(handle)
    }

    fn render_video(&self, scene: &SceneHandle, view: SceneView) -> Result<RenderedVideo> {
        let payload = serde_json::json!({
            "representation": view.representation(),
            "channel": view.channel(),
        });
        let response = self
            .client
            .post_json(&format!("outputs/{}/render", scene.0), &payload)?;
        let frames = decode_image_list(&response, "frames")?
            .into_iter()
            .map(|f| f.to_rgba8())
            .collect();
        Ok(RenderedVideo { frames })
    }

    fn export_glb(&self, scene: &SceneHandle, options: &GlbOptions) -> Result<Vec<u8>> {
        let payload = serde_json::json!({
            "simplify": options.simplify,
            "texture_size": options.texture_size,
        });
        self.client
            .post_json_for_bytes(&format!("outputs/{}/glb", scene.0), &payload)
    }

    fn export_ply(&self, scene: &SceneHandle) -> Result<Vec<u8>> {
        self.client.get_bytes(&format!("outputs/{}/ply", scene.0))
    }

    fn release(&self, scene: &SceneHandle) {
        if let Err(e) = self.client.delete(&format!("outputs/{}", scene.0)) {
            warn!(outputs_id = %scene.0, error = %e, "failed to release trellis outputs");
        }
    }
}

/// Extract the outputs handle from a `/run` response
pub fn parse_run_response(response: &serde_json::Value) -> Result<SceneHandle> {
    response
        .get("outputs_id")
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .map(|id| SceneHandle(id.to_string()))
        .ok_or_else(|| {
            RelayError::Backend(format!(
                "Unexpected trellis run response: {}",
                serde_json::to_string(response).unwrap_or_default()
            ))
        })
}
