//! Generation backend traits and request/parameter types
//!
//! The pipelines themselves are external. These traits are the narrow seam
//! the orchestrator drives, mirroring how the pipelines are called: one
//! synchronous `run`, then per-output render/export calls.

use meshrelay_core::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which pipeline a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Scene,
    Image,
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineKind::Scene => write!(f, "3d"),
            PipelineKind::Image => write!(f, "image"),
        }
    }
}

/// Request for the image-to-3D pipeline
#[derive(Debug, Clone)]
pub struct SceneRequest {
    pub product_name: String,
    pub message_number: i64,
    /// Raw upload bytes; not decoded before the backend sees them
    pub image: Vec<u8>,
}

/// Request for the text/image-to-image pipeline
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub product_name: String,
    pub message_number: i64,
    pub prompt: String,
    pub image: Option<Vec<u8>>,
    pub guidance_scale: f32,
    pub img_guidance_scale: Option<f32>,
}

/// Opaque handle to one pipeline run's in-memory outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneHandle(pub String);

/// The three orientation videos rendered from a 3D run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneView {
    /// Gaussian splats, color channel
    Gaussian,
    /// Radiance field, color channel
    RadianceField,
    /// Extracted mesh, normal channel
    Mesh,
}

impl SceneView {
    /// Upload order of the rendered videos
    pub const ALL: [SceneView; 3] = [SceneView::Gaussian, SceneView::RadianceField, SceneView::Mesh];

    /// Name of the output representation the pipeline produces
    pub fn representation(&self) -> &'static str {
        match self {
            SceneView::Gaussian => "gaussian",
            SceneView::RadianceField => "radiance_field",
            SceneView::Mesh => "mesh",
        }
    }

    /// Which render buffer is kept for the video
    pub fn channel(&self) -> &'static str {
        match self {
            SceneView::Gaussian | SceneView::RadianceField => "color",
            SceneView::Mesh => "normal",
        }
    }

    /// Scratch file stem (`gaussian.mp4`, ...)
    pub fn file_stem(&self) -> &'static str {
        self.representation()
    }
}

/// Options for packaging a scene as GLB
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlbOptions {
    /// Fraction of triangles removed during mesh simplification
    pub simplify: f32,
    pub texture_size: u32,
}

impl Default for GlbOptions {
    fn default() -> Self {
        Self {
            simplify: 0.95,
            texture_size: 1024,
        }
    }
}

/// Process-wide kernel selection forwarded to the 3D pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelOptions {
    pub attn_backend: String,
    pub sparse_attn_backend: String,
    pub spconv_algo: String,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            attn_backend: "xformers".to_string(),
            sparse_attn_backend: "xformers".to_string(),
            spconv_algo: "native".to_string(),
        }
    }
}

/// Video frames as returned by a render call
#[derive(Debug, Clone)]
pub struct RenderedVideo {
    pub frames: Vec<image::RgbaImage>,
}

/// Parameters for one image-pipeline call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageGenParams {
    pub prompt: String,
    /// Staged input images (scratch paths)
    pub input_images: Vec<PathBuf>,
    pub height: u32,
    pub width: u32,
    pub guidance_scale: f32,
    pub img_guidance_scale: Option<f32>,
    pub max_input_image_size: Option<u32>,
    pub separate_cfg_infer: bool,
    pub seed: u64,
}

/// Trait implemented by each image-to-3D backend (Trellis sidecar, Mock)
pub trait SceneBackend: Send {
    /// Backend name (e.g. "trellis", "mock")
    fn name(&self) -> &str;

    /// Run the pipeline on a staged input image (blocks until complete)
    fn run(&self, image_path: &std::path::Path, seed: u64) -> Result<SceneHandle>;

    /// Render a turntable video of one representation
    fn render_video(&self, scene: &SceneHandle, view: SceneView) -> Result<RenderedVideo>;

    /// Package gaussian + mesh outputs as a GLB scene
    fn export_glb(&self, scene: &SceneHandle, options: &GlbOptions) -> Result<Vec<u8>>;

    /// Export the gaussian point cloud as PLY
    fn export_ply(&self, scene: &SceneHandle) -> Result<Vec<u8>>;

    /// Drop the run's outputs; best effort
    fn release(&self, _scene: &SceneHandle) {}
}

/// Trait implemented by each text/image-to-image backend (OmniGen sidecar, Mock)
pub trait ImageBackend: Send {
    fn name(&self) -> &str;

    /// Generate images; the first one is kept
    fn generate(&self, params: &ImageGenParams) -> Result<Vec<image::DynamicImage>>;
}
