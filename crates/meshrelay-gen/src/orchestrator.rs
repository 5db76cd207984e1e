//! Request orchestration: folder, scratch, backend, serialize, upload, publish
//!
//! One call handles one request end to end and blocks until done. The
//! remote folder is created first; artifacts are uploaded in a fixed order
//! and the folder is made public only after all of them landed.

use crate::backend::{
    GlbOptions, ImageBackend, ImageGenParams, ImageRequest, PipelineKind, SceneBackend,
    SceneHandle, SceneRequest, SceneView,
};
use crate::config::RelayConfig;
use crate::scratch::ScratchDir;
use crate::store::ArtifactStore;
use crate::video::VideoEncoder;
use meshrelay_core::{ContentHash, ErrorKind, RelayError, RequestId, Result};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, info_span, warn};

/// Seed used for every 3D run
pub const SCENE_SEED: u64 = 1;
/// Seed for image requests without an input image
pub const PROMPT_ONLY_SEED: u64 = 0;
/// Seed for image requests with an input image
pub const IMAGE_INPUT_SEED: u64 = 1;
/// Output edge length of generated images
pub const IMAGE_SIZE: u32 = 256;
/// Input images are downscaled to at most this edge length
pub const MAX_INPUT_IMAGE_SIZE: u32 = 768;
/// Artifacts uploaded for every 3D request
pub const SCENE_ARTIFACT_COUNT: usize = 5;

const OUTPUT_IMAGE_NAME: &str = "output_image.png";

/// A file in scratch waiting to be uploaded
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    pub name: String,
    pub path: PathBuf,
}

/// One uploaded file as reported back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedArtifact {
    pub name: String,
    pub file_id: String,
    /// `sha256:` prefixed digest of the uploaded bytes
    pub content_hash: String,
}

/// A request that ran to completion
#[derive(Debug, Clone, Serialize)]
pub struct RelayOutcome {
    pub folder_id: String,
    pub folder_name: String,
    pub uploads: Vec<UploadedArtifact>,
}

/// A request that stopped early, with enough context to report how far it got
#[derive(Debug)]
pub struct RequestFailure {
    pub error: RelayError,
    /// Set once the remote folder exists
    pub folder_id: Option<String>,
    pub uploaded: usize,
    pub expected: usize,
}

impl RequestFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    fn before_folder(error: RelayError, expected: usize) -> Self {
        Self {
            error,
            folder_id: None,
            uploaded: 0,
            expected,
        }
    }
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{} uploaded)", self.error, self.uploaded, self.expected)
    }
}

/// `{product_name}_{message_number}`
pub fn folder_name(product_name: &str, message_number: i64) -> String {
    format!("{}_{}", product_name, message_number)
}

/// File extension for a staged input image, sniffed from its magic bytes.
///
/// The bytes are not decoded; unknown formats are staged as `jpg`.
pub fn input_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("jpg")
}

/// Pipeline arguments for an image request
pub fn image_params(request: &ImageRequest, input_images: Vec<PathBuf>) -> ImageGenParams {
    let with_input = !input_images.is_empty();
    ImageGenParams {
        prompt: request.prompt.clone(),
        input_images,
        height: IMAGE_SIZE,
        width: IMAGE_SIZE,
        guidance_scale: request.guidance_scale,
        img_guidance_scale: if with_input { request.img_guidance_scale } else { None },
        max_input_image_size: with_input.then_some(MAX_INPUT_IMAGE_SIZE),
        separate_cfg_infer: true,
        seed: if with_input { IMAGE_INPUT_SEED } else { PROMPT_ONLY_SEED },
    }
}

pub struct Orchestrator {
    scene: Option<Box<dyn SceneBackend>>,
    image: Option<Box<dyn ImageBackend>>,
    store: Box<dyn ArtifactStore>,
    video: VideoEncoder,
    glb: GlbOptions,
    scratch_root: PathBuf,
    delete_orphaned_folders: bool,
}

impl Orchestrator {
    /// Orchestrator with no pipelines enabled yet
    pub fn new(store: Box<dyn ArtifactStore>, config: &RelayConfig) -> Self {
        Self {
            scene: None,
            image: None,
            store,
            video: VideoEncoder::from_config(&config.video),
            glb: GlbOptions::default(),
            scratch_root: config.scratch.root.clone(),
            delete_orphaned_folders: config.storage.delete_orphaned_folders,
        }
    }

    pub fn with_scene_backend(mut self, backend: Box<dyn SceneBackend>) -> Self {
        self.scene = Some(backend);
        self
    }

    pub fn with_image_backend(mut self, backend: Box<dyn ImageBackend>) -> Self {
        self.image = Some(backend);
        self
    }

    /// Pipelines that have a backend attached
    pub fn pipelines(&self) -> Vec<PipelineKind> {
        let mut kinds = Vec::new();
        if self.scene.is_some() {
            kinds.push(PipelineKind::Scene);
        }
        if self.image.is_some() {
            kinds.push(PipelineKind::Image);
        }
        kinds
    }

    /// Image-to-3D: three orientation videos, a GLB scene and a PLY point cloud
    pub fn generate_scene(&self, request: SceneRequest) -> std::result::Result<RelayOutcome, RequestFailure> {
        let backend = self.scene.as_deref().ok_or_else(|| {
            RequestFailure::before_folder(
                RelayError::Unavailable("3D pipeline is not enabled".to_string()),
                SCENE_ARTIFACT_COUNT,
            )
        })?;
        let name = folder_name(&request.product_name, request.message_number);

        self.relay(PipelineKind::Scene, name, SCENE_ARTIFACT_COUNT, |scratch| {
            let input_name = format!("input_image.{}", input_extension(&request.image));
            let input = scratch.write(&input_name, &request.image)?;

            let scene = backend.run(&input, SCENE_SEED)?;
            debug!(backend = backend.name(), "3d pipeline finished");
            let staged = self.export_scene(backend, &scene, scratch);
            backend.release(&scene);
            staged
        })
    }

    /// Text/image-to-image: optional input image first, then the generated PNG
    pub fn generate_image(&self, request: ImageRequest) -> std::result::Result<RelayOutcome, RequestFailure> {
        let expected = if request.image.is_some() { 2 } else { 1 };
        let backend = self.image.as_deref().ok_or_else(|| {
            RequestFailure::before_folder(
                RelayError::Unavailable("image pipeline is not enabled".to_string()),
                expected,
            )
        })?;
        let name = folder_name(&request.product_name, request.message_number);

        self.relay(PipelineKind::Image, name, expected, |scratch| {
            let mut staged = Vec::with_capacity(expected);
            let mut input_images = Vec::new();
            if let Some(bytes) = &request.image {
                let input_name = format!("input_image.{}", input_extension(bytes));
                let path = scratch.write(&input_name, bytes)?;
                input_images.push(path.clone());
                staged.push(StagedArtifact {
                    name: input_name,
                    path,
                });
            }

            let params = image_params(&request, input_images);
            let output = backend
                .generate(&params)?
                .into_iter()
                .next()
                .ok_or_else(|| RelayError::Backend("image pipeline returned no images".to_string()))?;
            debug!(backend = backend.name(), seed = params.seed, "image pipeline finished");

            let path = scratch.file(OUTPUT_IMAGE_NAME);
            output
                .save_with_format(&path, image::ImageFormat::Png)
                .map_err(|e| RelayError::Encoding(format!("Failed to write {}: {}", OUTPUT_IMAGE_NAME, e)))?;
            staged.push(StagedArtifact {
                name: OUTPUT_IMAGE_NAME.to_string(),
                path,
            });
            Ok(staged)
        })
    }

    fn export_scene(
        &self,
        backend: &dyn SceneBackend,
        scene: &SceneHandle,
        scratch: &ScratchDir,
    ) -> Result<Vec<StagedArtifact>> {
        let mut staged = Vec::with_capacity(SCENE_ARTIFACT_COUNT);

        for view in SceneView::ALL {
            let video = backend.render_video(scene, view)?;
            let name = format!("{}.{}", view.file_stem(), self.video.extension());
            let path = scratch.file(&name);
            self.video.encode(&video, &path)?;
            staged.push(StagedArtifact { name, path });
        }

        let glb = backend.export_glb(scene, &self.glb)?;
        staged.push(StagedArtifact {
            name: "output.glb".to_string(),
            path: scratch.write("output.glb", &glb)?,
        });

        let ply = backend.export_ply(scene)?;
        staged.push(StagedArtifact {
            name: "output.ply".to_string(),
            path: scratch.write("output.ply", &ply)?,
        });

        Ok(staged)
    }

    /// Shared request flow around a pipeline-specific `produce` step
    fn relay<F>(
        &self,
        pipeline: PipelineKind,
        folder_name: String,
        expected: usize,
        produce: F,
    ) -> std::result::Result<RelayOutcome, RequestFailure>
    where
        F: FnOnce(&ScratchDir) -> Result<Vec<StagedArtifact>>,
    {
        let request_id = RequestId::new();
        let span = info_span!("relay", %pipeline, request_id = %request_id, folder = %folder_name);
        let _enter = span.enter();

        let folder_id = self
            .store
            .create_folder(&folder_name)
            .map_err(|error| RequestFailure::before_folder(error, expected))?;
        info!(folder_id = %folder_id, "created remote folder");

        let fail = |error: RelayError, uploaded: usize| {
            warn!(folder_id = %folder_id, kind = %error.kind(), error = %error, uploaded, expected, "request failed");
            self.cleanup_orphan(&folder_id);
            RequestFailure {
                error,
                folder_id: Some(folder_id.clone()),
                uploaded,
                expected,
            }
        };

        let uploads = match self.stage_and_upload(&request_id, &folder_id, produce) {
            Ok(uploads) => uploads,
            Err((error, uploaded)) => return Err(fail(error, uploaded)),
        };

        if let Err(error) = self.store.make_public(&folder_id) {
            return Err(fail(error, uploads.len()));
        }
        info!(folder_id = %folder_id, files = uploads.len(), "folder published");

        Ok(RelayOutcome {
            folder_id: folder_id.clone(),
            folder_name,
            uploads,
        })
    }

    /// Produce artifacts in a fresh scratch dir and upload them in order.
    ///
    /// On failure, returns the error with the number of files already uploaded.
    fn stage_and_upload<F>(
        &self,
        request_id: &RequestId,
        folder_id: &str,
        produce: F,
    ) -> std::result::Result<Vec<UploadedArtifact>, (RelayError, usize)>
    where
        F: FnOnce(&ScratchDir) -> Result<Vec<StagedArtifact>>,
    {
        let scratch = ScratchDir::create(&self.scratch_root, request_id).map_err(|e| (e, 0))?;
        let staged = produce(&scratch).map_err(|e| (e, 0))?;

        let mut uploads = Vec::with_capacity(staged.len());
        for artifact in &staged {
            match self.upload_one(artifact, folder_id) {
                Ok(uploaded) => uploads.push(uploaded),
                Err(e) => return Err((e, uploads.len())),
            }
        }
        Ok(uploads)
    }

    fn upload_one(&self, artifact: &StagedArtifact, folder_id: &str) -> Result<UploadedArtifact> {
        let hash = ContentHash::from_file(&artifact.path)?;
        let file_id = self.store.upload(&artifact.path, folder_id)?;
        debug!(artifact = %artifact.name, file_id = %file_id, hash = %hash, "uploaded");
        Ok(UploadedArtifact {
            name: artifact.name.clone(),
            file_id,
            content_hash: hash.to_prefixed_hex(),
        })
    }

    fn cleanup_orphan(&self, folder_id: &str) {
        if !self.delete_orphaned_folders {
            return;
        }
        match self.store.delete_folder(folder_id) {
            Ok(()) => info!(folder_id = %folder_id, "deleted orphaned folder"),
            Err(e) => warn!(folder_id = %folder_id, error = %e, "failed to delete orphaned folder"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RenderedVideo, SceneView};
    use crate::backends::mock::{MockImageBackend, MockSceneBackend};
    use crate::config::VideoFormat;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        CreateFolder(String),
        Upload(String),
        MakePublic(String),
        DeleteFolder(String),
    }

    /// Records every call; optionally fails the nth upload (0-based)
    #[derive(Clone, Default)]
    struct RecordingStore {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_upload_at: Option<usize>,
        fail_create: bool,
    }

    impl RecordingStore {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn uploads(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Upload(name) => Some(name),
                    _ => None,
                })
                .collect()
        }
    }

    impl ArtifactStore for RecordingStore {
        fn create_folder(&self, name: &str) -> Result<String> {
            self.calls.lock().unwrap().push(Call::CreateFolder(name.to_string()));
            if self.fail_create {
                return Err(RelayError::Storage("quota exceeded".into()));
            }
            Ok("folder-1".to_string())
        }

        fn upload(&self, local_path: &Path, _folder_id: &str) -> Result<String> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.iter().filter(|c| matches!(c, Call::Upload(_))).count();
            let name = local_path.file_name().unwrap().to_string_lossy().into_owned();
            calls.push(Call::Upload(name));
            if self.fail_upload_at == Some(index) {
                return Err(RelayError::Storage("connection reset".into()));
            }
            Ok(format!("file-{}", index))
        }

        fn make_public(&self, folder_id: &str) -> Result<()> {
            self.calls.lock().unwrap().push(Call::MakePublic(folder_id.to_string()));
            Ok(())
        }

        fn delete_folder(&self, folder_id: &str) -> Result<()> {
            self.calls.lock().unwrap().push(Call::DeleteFolder(folder_id.to_string()));
            Ok(())
        }
    }

    struct FailingSceneBackend;

    impl SceneBackend for FailingSceneBackend {
        fn name(&self) -> &str {
            "failing"
        }
        fn run(&self, _image_path: &Path, _seed: u64) -> Result<SceneHandle> {
            Err(RelayError::Backend("CUDA out of memory".into()))
        }
        fn render_video(&self, _scene: &SceneHandle, _view: SceneView) -> Result<RenderedVideo> {
            unreachable!()
        }
        fn export_glb(&self, _scene: &SceneHandle, _options: &GlbOptions) -> Result<Vec<u8>> {
            unreachable!()
        }
        fn export_ply(&self, _scene: &SceneHandle) -> Result<Vec<u8>> {
            unreachable!()
        }
    }

    /// Wraps the mock image backend and keeps the last params it saw
    struct CapturingImageBackend {
        seen: Arc<Mutex<Option<ImageGenParams>>>,
    }

    impl ImageBackend for CapturingImageBackend {
        fn name(&self) -> &str {
            "capturing"
        }
        fn generate(&self, params: &ImageGenParams) -> Result<Vec<image::DynamicImage>> {
            *self.seen.lock().unwrap() = Some(params.clone());
            MockImageBackend::new().generate(params)
        }
    }

    fn test_config() -> RelayConfig {
        let mut config = RelayConfig::default();
        config.video.format = VideoFormat::Gif;
        config.scratch.root =
            std::env::temp_dir().join(format!("meshrelay_orchestrator_{}", uuid::Uuid::new_v4()));
        config
    }

    fn scratch_is_empty(config: &RelayConfig) -> bool {
        match std::fs::read_dir(&config.scratch.root) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([1, 2, 3, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn scene_request() -> SceneRequest {
        SceneRequest {
            product_name: "shoe".into(),
            message_number: 7,
            image: png_bytes(),
        }
    }

    fn image_request(image: Option<Vec<u8>>) -> ImageRequest {
        ImageRequest {
            product_name: "car".into(),
            message_number: 3,
            prompt: "a car with a sporty look".into(),
            image,
            guidance_scale: 3.3,
            img_guidance_scale: Some(1.6),
        }
    }

    #[test]
    fn test_folder_name() {
        assert_eq!(folder_name("shoe", 7), "shoe_7");
        assert_eq!(folder_name("", -1), "_-1");
    }

    #[test]
    fn test_input_extension_sniffing() {
        assert_eq!(input_extension(&png_bytes()), "png");
        assert_eq!(input_extension(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]), "jpg");
        assert_eq!(input_extension(b"definitely not an image"), "jpg");
    }

    #[test]
    fn test_scene_uploads_five_in_order_then_publishes() {
        let config = test_config();
        let store = RecordingStore::default();
        let orchestrator = Orchestrator::new(Box::new(store.clone()), &config)
            .with_scene_backend(Box::new(MockSceneBackend::new()));

        let outcome = orchestrator.generate_scene(scene_request()).unwrap();

        assert_eq!(outcome.folder_id, "folder-1");
        assert_eq!(outcome.folder_name, "shoe_7");
        let calls = store.calls();
        assert_eq!(calls.first(), Some(&Call::CreateFolder("shoe_7".into())));
        assert_eq!(calls.last(), Some(&Call::MakePublic("folder-1".into())));
        assert_eq!(
            store.uploads(),
            vec!["gaussian.gif", "radiance_field.gif", "mesh.gif", "output.glb", "output.ply"]
        );
        assert_eq!(outcome.uploads.len(), store.uploads().len());
        assert!(outcome.uploads.iter().all(|u| u.content_hash.starts_with("sha256:")));
        assert!(scratch_is_empty(&config));
    }

    #[test]
    fn test_backend_failure_never_publishes() {
        let config = test_config();
        let store = RecordingStore::default();
        let orchestrator = Orchestrator::new(Box::new(store.clone()), &config)
            .with_scene_backend(Box::new(FailingSceneBackend));

        let failure = orchestrator.generate_scene(scene_request()).unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::Backend);
        assert_eq!(failure.folder_id.as_deref(), Some("folder-1"));
        assert_eq!((failure.uploaded, failure.expected), (0, 5));
        assert_eq!(store.calls(), vec![Call::CreateFolder("shoe_7".into())]);
        assert!(scratch_is_empty(&config));
    }

    #[test]
    fn test_upload_failure_stops_sequence() {
        let config = test_config();
        let store = RecordingStore {
            fail_upload_at: Some(2),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(Box::new(store.clone()), &config)
            .with_scene_backend(Box::new(MockSceneBackend::new()));

        let failure = orchestrator.generate_scene(scene_request()).unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::Storage);
        assert_eq!((failure.uploaded, failure.expected), (2, 5));
        assert_eq!(store.uploads(), vec!["gaussian.gif", "radiance_field.gif", "mesh.gif"]);
        assert!(!store.calls().iter().any(|c| matches!(c, Call::MakePublic(_))));
        assert!(scratch_is_empty(&config));
    }

    #[test]
    fn test_orphaned_folder_deleted_when_enabled() {
        let mut config = test_config();
        config.storage.delete_orphaned_folders = true;
        let store = RecordingStore::default();
        let orchestrator = Orchestrator::new(Box::new(store.clone()), &config)
            .with_scene_backend(Box::new(FailingSceneBackend));

        orchestrator.generate_scene(scene_request()).unwrap_err();
        assert_eq!(store.calls().last(), Some(&Call::DeleteFolder("folder-1".into())));
    }

    #[test]
    fn test_folder_creation_failure() {
        let config = test_config();
        let store = RecordingStore {
            fail_create: true,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(Box::new(store.clone()), &config)
            .with_scene_backend(Box::new(MockSceneBackend::new()));

        let failure = orchestrator.generate_scene(scene_request()).unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Storage);
        assert!(failure.folder_id.is_none());
        assert!(store.uploads().is_empty());
    }

    #[test]
    fn test_prompt_only_image_uses_seed_zero() {
        let config = test_config();
        let store = RecordingStore::default();
        let seen = Arc::new(Mutex::new(None));
        let orchestrator = Orchestrator::new(Box::new(store.clone()), &config)
            .with_image_backend(Box::new(CapturingImageBackend { seen: seen.clone() }));

        let outcome = orchestrator.generate_image(image_request(None)).unwrap();

        assert_eq!(outcome.folder_name, "car_3");
        assert_eq!(store.uploads(), vec!["output_image.png"]);
        let params = seen.lock().unwrap().clone().unwrap();
        assert_eq!(params.seed, 0);
        assert!(params.input_images.is_empty());
        assert_eq!(params.img_guidance_scale, None);
        assert_eq!(params.max_input_image_size, None);
        assert_eq!((params.width, params.height), (256, 256));
        assert!(params.separate_cfg_infer);
        assert!(scratch_is_empty(&config));
    }

    #[test]
    fn test_image_with_input_uploads_input_first() {
        let config = test_config();
        let store = RecordingStore::default();
        let seen = Arc::new(Mutex::new(None));
        let orchestrator = Orchestrator::new(Box::new(store.clone()), &config)
            .with_image_backend(Box::new(CapturingImageBackend { seen: seen.clone() }));

        let outcome = orchestrator.generate_image(image_request(Some(png_bytes()))).unwrap();

        assert_eq!(store.uploads(), vec!["input_image.png", "output_image.png"]);
        assert_eq!(outcome.uploads.len(), 2);
        let params = seen.lock().unwrap().clone().unwrap();
        assert_eq!(params.seed, 1);
        assert_eq!(params.input_images.len(), 1);
        assert_eq!(params.img_guidance_scale, Some(1.6));
        assert_eq!(params.max_input_image_size, Some(768));
        assert_eq!(store.calls().last(), Some(&Call::MakePublic("folder-1".into())));
    }

    #[test]
    fn test_disabled_pipeline_is_unavailable() {
        let config = test_config();
        let store = RecordingStore::default();
        let orchestrator = Orchestrator::new(Box::new(store.clone()), &config);

        let failure = orchestrator.generate_image(image_request(None)).unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Unavailable);
        assert!(store.calls().is_empty());
        assert!(orchestrator.pipelines().is_empty());
    }
}
