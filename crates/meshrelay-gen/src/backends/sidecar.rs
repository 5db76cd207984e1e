//! Blocking JSON client shared by the HTTP sidecar backends
//!
//! The model pipelines run in a separate inference server. Binary payloads
//! travel as base64 inside JSON; export endpoints answer with raw bytes.

use base64::Engine;
use meshrelay_core::{RelayError, Result};
use std::io::Read;
use std::time::Duration;

pub(crate) struct SidecarClient {
    name: &'static str,
    base_url: String,
    agent: ureq::Agent,
}

impl SidecarClient {
    pub fn new(name: &'static str, base_url: &str, timeout_secs: Option<u64>) -> Self {
        Self {
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: build_agent(timeout_secs),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn post_json(&self, path: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
        let bytes = self.post_json_for_bytes(path, payload)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            RelayError::Backend(format!("Failed to parse {} response from {}: {}", self.name, path, e))
        })
    }

    pub fn post_json_for_bytes(&self, path: &str, payload: &serde_json::Value) -> Result<Vec<u8>> {
        let url = self.url(path);
        let response = self
            .agent
            .post(&url)
            .header("Content-Type", "application/json")
            .send_json(payload)
            .map_err(|e| self.request_error(path, e))?;
        read_body(response, self.name)
    }

    pub fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.url(path);
        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| self.request_error(path, e))?;
        read_body(response, self.name)
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        self.agent
            .delete(&url)
            .call()
            .map_err(|e| self.request_error(path, e))?;
        Ok(())
    }

    fn request_error(&self, path: &str, e: ureq::Error) -> RelayError {
        RelayError::Backend(format!("{} request to {} failed: {}", self.name, path, e))
    }
}

fn build_agent(timeout_secs: Option<u64>) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(timeout_secs.map(Duration::from_secs))
        .build();
    config.into()
}

fn read_body(response: ureq::http::Response<ureq::Body>, name: &str) -> Result<Vec<u8>> {
    let mut reader = response.into_body().into_reader();
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| RelayError::Backend(format!("Failed to read {} response: {}", name, e)))?;
    Ok(bytes)
}

pub(crate) fn encode_b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a base64-encoded image of any format the `image` crate reads
pub(crate) fn decode_b64_image(encoded: &str) -> Result<image::DynamicImage> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| RelayError::Backend(format!("Invalid base64 image: {}", e)))?;
    image::load_from_memory(&bytes)
        .map_err(|e| RelayError::Backend(format!("Undecodable image from backend: {}", e)))
}

/// Pull a list of base64 images out of `response[field]`
pub(crate) fn decode_image_list(
    response: &serde_json::Value,
    field: &str,
) -> Result<Vec<image::DynamicImage>> {
    let entries = response
        .get(field)
        .and_then(|v| v.as_array())
        .ok_or_else(|| RelayError::Backend(format!("Backend response has no '{}' array", field)))?;

    entries
        .iter()
        .map(|entry| {
            let encoded = entry.as_str().ok_or_else(|| {
                RelayError::Backend(format!("Non-string entry in '{}'", field))
            })?;
            decode_b64_image(encoded)
        })
        .collect()
}
