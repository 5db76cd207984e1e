//! Mock backends for offline runs and tests
//!
//! Produce solid-color frames and images, a single-triangle GLB, and a
//! small ASCII PLY without any network calls or GPU.

use crate::backend::*;
use meshrelay_core::{ContentHash, RelayError, Result};
use std::path::Path;

const MOCK_FRAME_COUNT: usize = 8;
const MOCK_FRAME_SIZE: u32 = 32;

/// Image-to-3D backend that never leaves the process
#[derive(Default)]
pub struct MockSceneBackend;

impl MockSceneBackend {
    pub fn new() -> Self {
        Self
    }
}

impl SceneBackend for MockSceneBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn run(&self, image_path: &Path, seed: u64) -> Result<SceneHandle> {
        let bytes = std::fs::read(image_path).map_err(|e| {
            RelayError::Backend(format!("Failed to read input {}: {}", image_path.display(), e))
        })?;
        if bytes.is_empty() {
            return Err(RelayError::Backend("Input image is empty".to_string()));
        }
        let hash = ContentHash::from_bytes(&bytes);
        Ok(SceneHandle(format!("mock-{}-{}", hash, seed)))
    }

    fn render_video(&self, scene: &SceneHandle, view: SceneView) -> Result<RenderedVideo> {
        let base = name_color(&format!("{}:{}", scene.0, view.representation()));
        let frames = (0..MOCK_FRAME_COUNT)
            .map(|i| {
                let shade = (i * 255 / MOCK_FRAME_COUNT) as u8;
                image::RgbaImage::from_pixel(
                    MOCK_FRAME_SIZE,
                    MOCK_FRAME_SIZE,
                    image::Rgba([base[0], base[1], shade, 255]),
                )
            })
            .collect();
        Ok(RenderedVideo { frames })
    }

    fn export_glb(&self, _scene: &SceneHandle, _options: &GlbOptions) -> Result<Vec<u8>> {
        minimal_glb()
    }

    fn export_ply(&self, _scene: &SceneHandle) -> Result<Vec<u8>> {
        Ok(minimal_ply())
    }
}

/// Text/image-to-image backend that paints a solid color from the prompt
#[derive(Default)]
pub struct MockImageBackend;

impl MockImageBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ImageBackend for MockImageBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn generate(&self, params: &ImageGenParams) -> Result<Vec<image::DynamicImage>> {
        for path in &params.input_images {
            if !path.exists() {
                return Err(RelayError::Backend(format!(
                    "Input image not found: {}",
                    path.display()
                )));
            }
        }
        let [r, g, b] = name_color(&format!("{}:{}", params.prompt, params.seed));
        let img = image::RgbaImage::from_pixel(params.width, params.height, image::Rgba([r, g, b, 255]));
        Ok(vec![image::DynamicImage::ImageRgba8(img)])
    }
}

/// Derive a stable color from a string
fn name_color(name: &str) -> [u8; 3] {
    let hash_val = name
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    [
        ((hash_val >> 16) & 0xFF) as u8,
        ((hash_val >> 8) & 0xFF) as u8,
        (hash_val & 0xFF) as u8,
    ]
}

/// A minimal valid GLB file (single triangle)
fn minimal_glb() -> Result<Vec<u8>> {
    let json = serde_json::json!({
        "asset": { "version": "2.0", "generator": "meshrelay-mock" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{
            "primitives": [{
                "attributes": { "POSITION": 0 },
                "indices": 1
            }]
        }],
        "accessors": [
            {
                "bufferView": 0,
                "componentType": 5126,
                "count": 3,
                "type": "VEC3",
                "max": [1.0, 1.0, 0.0],
                "min": [-1.0, 0.0, 0.0]
            },
            {
                "bufferView": 1,
                "componentType": 5123,
                "count": 3,
                "type": "SCALAR",
                "max": [2],
                "min": [0]
            }
        ],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6, "target": 34963 }
        ],
        "buffers": [{ "byteLength": 44 }]
    });

    let json_str = serde_json::to_string(&json)
        .map_err(|e| RelayError::Backend(format!("Failed to serialize GLB JSON: {}", e)))?;

    // Chunks are 4-byte aligned
    let mut json_padded = json_str.into_bytes();
    let json_padded_len = (json_padded.len() + 3) & !3;
    json_padded.resize(json_padded_len, b' ');

    let vertices: [f32; 9] = [-1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let indices: [u16; 3] = [0, 1, 2];

    let mut bin_data = Vec::new();
    for v in &vertices {
        bin_data.extend_from_slice(&v.to_le_bytes());
    }
    for i in &indices {
        bin_data.extend_from_slice(&i.to_le_bytes());
    }
    let bin_padded_len = (bin_data.len() + 3) & !3;
    bin_data.resize(bin_padded_len, 0);

    let total_len = 12 + 8 + json_padded.len() as u32 + 8 + bin_data.len() as u32;

    let mut out = Vec::with_capacity(total_len as usize);
    out.extend_from_slice(b"glTF");
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&total_len.to_le_bytes());

    out.extend_from_slice(&(json_padded.len() as u32).to_le_bytes());
    out.extend_from_slice(&0x4E4F534Au32.to_le_bytes()); // "JSON"
    out.extend_from_slice(&json_padded);

    out.extend_from_slice(&(bin_data.len() as u32).to_le_bytes());
    out.extend_from_slice(&0x004E4942u32.to_le_bytes()); // "BIN\0"
    out.extend_from_slice(&bin_data);

    Ok(out)
}

/// Three-point ASCII PLY point cloud
fn minimal_ply() -> Vec<u8> {
    let mut ply = String::from(
        "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nend_header\n",
    );
    for (x, y, z) in [(-1.0f32, 0.0f32, 0.0f32), (1.0, 0.0, 0.0), (0.0, 1.0, 0.0)] {
        ply.push_str(&format!("{} {} {}\n", x, y, z));
    }
    ply.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged_image() -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("meshrelay_mock_{}.jpg", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"fake jpeg").unwrap();
        path
    }

    #[test]
    fn test_scene_run_is_deterministic() {
        let path = staged_image();
        let backend = MockSceneBackend::new();
        let a = backend.run(&path, 1).unwrap();
        let b = backend.run(&path, 1).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, backend.run(&path, 2).unwrap());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_scene_run_missing_input_is_backend_error() {
        let backend = MockSceneBackend::new();
        let err = backend
            .run(Path::new("/nonexistent/meshrelay/input.jpg"), 1)
            .unwrap_err();
        assert_eq!(err.kind(), meshrelay_core::ErrorKind::Backend);
    }

    #[test]
    fn test_render_video_frames() {
        let backend = MockSceneBackend::new();
        let scene = SceneHandle("mock".into());
        let video = backend.render_video(&scene, SceneView::Mesh).unwrap();
        assert_eq!(video.frames.len(), MOCK_FRAME_COUNT);
        assert_eq!(video.frames[0].width(), MOCK_FRAME_SIZE);
    }

    #[test]
    fn test_glb_has_magic_and_length() {
        let bytes = minimal_glb().unwrap();
        assert_eq!(&bytes[..4], b"glTF");
        let declared = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(declared as usize, bytes.len());
        assert_eq!(bytes.len() % 4, 0);
    }

    #[test]
    fn test_ply_header() {
        let ply = String::from_utf8(minimal_ply()).unwrap();
        assert!(ply.starts_with("ply\nformat ascii 1.0\n"));
        assert!(ply.contains("element vertex 3"));
    }

    #[test]
    fn test_image_backend_uses_requested_size() {
        let backend = MockImageBackend::new();
        let params = ImageGenParams {
            prompt: "red sneaker".to_string(),
            input_images: vec![],
            height: 256,
            width: 256,
            guidance_scale: 2.5,
            img_guidance_scale: None,
            max_input_image_size: None,
            separate_cfg_infer: true,
            seed: 0,
        };
        let images = backend.generate(&params).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].width(), 256);
        assert_eq!(images[0].height(), 256);
    }
}
