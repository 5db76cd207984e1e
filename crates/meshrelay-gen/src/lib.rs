//! meshrelay Gen - Generation pipelines relayed to remote storage
//!
//! Drives an image-to-3D backend and a text/image-to-image backend, writes
//! their outputs to a per-request scratch directory and uploads them into
//! a freshly created remote folder.

pub mod backend;
pub mod backends;
pub mod config;
pub mod orchestrator;
pub mod scratch;
pub mod store;
pub mod video;

pub use backend::{ImageRequest, PipelineKind, SceneRequest};
pub use config::RelayConfig;
pub use orchestrator::{Orchestrator, RelayOutcome, RequestFailure, UploadedArtifact};
pub use store::{create_store, ArtifactStore};
