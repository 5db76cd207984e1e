//! HTTP routes
//!
//! Handlers only coerce form fields to their types. Everything else is the
//! orchestrator's business, reached through the worker queue.

use crate::worker::WorkerHandle;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use meshrelay_core::{ErrorKind, RelayError};
use meshrelay_gen::backend::PipelineKind;
use meshrelay_gen::orchestrator::SCENE_ARTIFACT_COUNT;
use meshrelay_gen::{ImageRequest, RelayOutcome, RequestFailure, SceneRequest, UploadedArtifact};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    worker: WorkerHandle,
}

/// Build the router; generation routes exist only for enabled pipelines
pub fn router(worker: WorkerHandle, max_upload_bytes: usize) -> Router {
    let mut router: Router<AppState> = Router::new()
        .route("/", get(root))
        .route("/health", get(health));

    if worker.has_pipeline(PipelineKind::Scene) {
        router = router.route("/generate-3d", post(generate_3d));
    }
    if worker.has_pipeline(PipelineKind::Image) {
        router = router.route("/generate-image", post(generate_image));
    }

    router
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { worker })
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
struct SuccessBody {
    message: &'static str,
    drive_folder_id: String,
    folder_name: String,
    files: Vec<UploadedArtifact>,
}

impl SuccessBody {
    fn new(message: &'static str, outcome: RelayOutcome) -> Self {
        Self {
            message,
            drive_folder_id: outcome.folder_id,
            folder_name: outcome.folder_name,
            files: outcome.uploads,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    drive_folder_id: Option<String>,
    uploaded: usize,
    expected: usize,
}

/// A failed request rendered as status code plus JSON body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn rejected(error: RelayError, expected: usize) -> Self {
        RequestFailure {
            error,
            folder_id: None,
            uploaded: 0,
            expected,
        }
        .into()
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Storage => StatusCode::BAD_GATEWAY,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Backend | ErrorKind::Io | ErrorKind::Config | ErrorKind::Tunnel => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<RequestFailure> for ApiError {
    fn from(failure: RequestFailure) -> Self {
        let kind = failure.kind();
        Self {
            status: status_for(kind),
            body: ErrorBody {
                error: failure.error.to_string(),
                kind: kind.as_str(),
                drive_folder_id: failure.folder_id,
                uploaded: failure.uploaded,
                expected: failure.expected,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ============================================================================
// Form parsing
// ============================================================================

/// Text fields plus the optional `image` file part
#[derive(Debug, Default)]
struct Form {
    fields: HashMap<String, String>,
    image: Option<Vec<u8>>,
}

impl Form {
    async fn read(mut multipart: Multipart) -> Result<Self, RelayError> {
        let mut form = Form::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| RelayError::Validation(format!("Malformed multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "image" {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| RelayError::Validation(format!("Failed to read image: {}", e)))?;
                // An empty file part is treated as no file
                if !bytes.is_empty() {
                    form.image = Some(bytes.to_vec());
                }
            } else {
                let text = field.text().await.map_err(|e| {
                    RelayError::Validation(format!("Failed to read field '{}': {}", name, e))
                })?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    fn optional(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &str) -> Result<String, RelayError> {
        self.fields
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::Validation(format!("Missing field '{}'", name)))
    }

    fn integer(&self, name: &str) -> Result<i64, RelayError> {
        let raw = self.required(name)?;
        raw.trim().parse().map_err(|_| {
            RelayError::Validation(format!("Field '{}' must be an integer, got '{}'", name, raw))
        })
    }

    fn float(&self, name: &str) -> Result<Option<f32>, RelayError> {
        self.optional(name)
            .map(|raw| {
                raw.trim().parse().map_err(|_| {
                    RelayError::Validation(format!("Field '{}' must be a number, got '{}'", name, raw))
                })
            })
            .transpose()
    }

    fn scene_request(self) -> Result<SceneRequest, RelayError> {
        Ok(SceneRequest {
            product_name: self.required("product_name")?,
            message_number: self.integer("message_number")?,
            image: self
                .image
                .ok_or_else(|| RelayError::Validation("Missing file 'image'".to_string()))?,
        })
    }

    fn image_request(self) -> Result<ImageRequest, RelayError> {
        Ok(ImageRequest {
            product_name: self.required("product_name")?,
            message_number: self.integer("message_number")?,
            prompt: self.required("prompt")?,
            guidance_scale: self
                .float("guidance_scale")?
                .ok_or_else(|| RelayError::Validation("Missing field 'guidance_scale'".to_string()))?,
            img_guidance_scale: self.float("img_guidance_scale")?,
            image: self.image,
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn root(State(state): State<AppState>) -> Json<Value> {
    let message = if state.worker.has_pipeline(PipelineKind::Scene) {
        "Welcome to the 3D asset generation API"
    } else {
        "Welcome to the image generation API"
    };
    Json(json!({ "message": message }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let pipelines: Vec<String> = state.worker.pipelines().iter().map(|p| p.to_string()).collect();
    Json(json!({
        "status": "ok",
        "pipelines": pipelines,
        "queue_capacity": state.worker.capacity(),
    }))
}

async fn generate_3d(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SuccessBody>, ApiError> {
    let request = Form::read(multipart)
        .await
        .and_then(Form::scene_request)
        .map_err(|e| ApiError::rejected(e, SCENE_ARTIFACT_COUNT))?;
    info!(
        product = %request.product_name,
        message_number = request.message_number,
        image_bytes = request.image.len(),
        "3d request accepted"
    );

    let outcome = state.worker.submit_scene(request)?.wait().await?;
    Ok(Json(SuccessBody::new("3D assets generated successfully", outcome)))
}

async fn generate_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SuccessBody>, ApiError> {
    let form = Form::read(multipart).await.map_err(|e| ApiError::rejected(e, 1))?;
    let expected = if form.image.is_some() { 2 } else { 1 };
    let request = form
        .image_request()
        .map_err(|e| ApiError::rejected(e, expected))?;
    info!(
        product = %request.product_name,
        message_number = request.message_number,
        with_input = request.image.is_some(),
        "image request accepted"
    );

    let outcome = state.worker.submit_image(request)?.wait().await?;
    Ok(Json(SuccessBody::new("Image generated successfully", outcome)))
}
