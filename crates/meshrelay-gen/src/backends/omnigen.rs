//! OmniGen text/image-to-image backend (HTTP sidecar)
//!
//! `POST /generate` with the pipeline arguments; input images travel as
//! base64. The server answers `{images: [base64 png]}`.

use super::sidecar::{decode_image_list, encode_b64, SidecarClient};
use crate::backend::*;
use crate::config::ImageBackendConfig;
use meshrelay_core::{RelayError, Result};

pub struct OmniGenBackend {
    client: SidecarClient,
}

impl OmniGenBackend {
    pub fn from_config(config: &ImageBackendConfig) -> Self {
        Self {
            client: SidecarClient::new("omnigen", &config.url, config.timeout_secs),
        }
    }
}

/// Build the `/generate` payload, reading staged input images from disk
pub fn build_payload(params: &ImageGenParams) -> Result<serde_json::Value> {
    let input_images = params
        .input_images
        .iter()
        .map(|path| std::fs::read(path).map(|bytes| encode_b64(&bytes)))
        .collect::<std::io::Result<Vec<_>>>()?;

    let mut payload = serde_json::json!({
        "prompt": params.prompt,
        "height": params.height,
        "width": params.width,
        "guidance_scale": params.guidance_scale,
        "separate_cfg_infer": params.separate_cfg_infer,
        "seed": params.seed,
    });

    if !input_images.is_empty() {
        payload["input_images"] = serde_json::json!(input_images);
    }
    if let Some(scale) = params.img_guidance_scale {
        payload["img_guidance_scale"] = serde_json::json!(scale);
    }
    if let Some(size) = params.max_input_image_size {
        payload["max_input_image_size"] = serde_json::json!(size);
    }

    Ok(payload)
}

impl ImageBackend for OmniGenBackend {
    fn name(&self) -> &str {
        "omnigen"
    }

    fn generate(&self, params: &ImageGenParams) -> Result<Vec<image::DynamicImage>> {
        let payload = build_payload(params)?;
        let response = self.client.post_json("generate", &payload)?;
        let images = decode_image_list(&response, "images")?;
        if images.is_empty() {
            return Err(RelayError::Backend("omnigen returned no images".to_string()));
        }
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_only() -> ImageGenParams {
        ImageGenParams {
            prompt: "a car with a sporty look".to_string(),
            input_images: vec![],
            height: 256,
            width: 256,
            guidance_scale: 3.3,
            img_guidance_scale: None,
            max_input_image_size: None,
            separate_cfg_infer: true,
            seed: 0,
        }
    }

    #[test]
    fn test_prompt_only_payload() {
        let payload = build_payload(&prompt_only()).unwrap();
        assert_eq!(payload["prompt"], "a car with a sporty look");
        assert_eq!(payload["height"], 256);
        assert_eq!(payload["seed"], 0);
        assert_eq!(payload["separate_cfg_infer"], true);
        assert!(payload.get("input_images").is_none());
        assert!(payload.get("img_guidance_scale").is_none());
        assert!(payload.get("max_input_image_size").is_none());
    }

    #[test]
    fn test_payload_with_input_image() {
        let path = std::env::temp_dir().join(format!("meshrelay_omnigen_{}.jpg", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"jpeg-bytes").unwrap();

        let params = ImageGenParams {
            input_images: vec![path.clone()],
            img_guidance_scale: Some(1.6),
            max_input_image_size: Some(768),
            seed: 1,
            ..prompt_only()
        };
        let payload = build_payload(&params).unwrap();

        assert_eq!(payload["input_images"][0], encode_b64(b"jpeg-bytes"));
        assert_eq!(payload["max_input_image_size"], 768);
        assert_eq!(payload["seed"], 1);
        assert!(payload["img_guidance_scale"].as_f64().unwrap() > 1.5);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_input_image_is_io_error() {
        let params = ImageGenParams {
            input_images: vec![std::env::temp_dir().join("meshrelay_does_not_exist.jpg")],
            ..prompt_only()
        };
        let err = build_payload(&params).unwrap_err();
        assert_eq!(err.kind(), meshrelay_core::ErrorKind::Io);
    }
}
