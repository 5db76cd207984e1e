//! Single worker thread that owns the orchestrator
//!
//! Handlers enqueue jobs on a bounded channel and await a oneshot reply.
//! Jobs run strictly one at a time, so backend calls and scratch I/O never
//! overlap. A full queue turns the request away instead of waiting.

use meshrelay_core::RelayError;
use meshrelay_gen::backend::PipelineKind;
use meshrelay_gen::orchestrator::SCENE_ARTIFACT_COUNT;
use meshrelay_gen::{ImageRequest, Orchestrator, RelayOutcome, RequestFailure, SceneRequest};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

pub type JobResult = Result<RelayOutcome, RequestFailure>;

pub enum Job {
    Scene {
        request: SceneRequest,
        reply: oneshot::Sender<JobResult>,
    },
    Image {
        request: ImageRequest,
        reply: oneshot::Sender<JobResult>,
    },
}

/// Cloneable submission side of the worker queue
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Job>,
    pipelines: Arc<Vec<PipelineKind>>,
    capacity: usize,
}

/// A job accepted into the queue
pub struct Pending {
    rx: oneshot::Receiver<JobResult>,
    expected: usize,
}

impl Pending {
    pub async fn wait(self) -> JobResult {
        let expected = self.expected;
        self.rx
            .await
            .unwrap_or_else(|_| Err(unavailable("worker dropped the request", expected)))
    }
}

fn unavailable(message: &str, expected: usize) -> RequestFailure {
    RequestFailure {
        error: RelayError::Unavailable(message.to_string()),
        folder_id: None,
        uploaded: 0,
        expected,
    }
}

/// Start the worker thread; `capacity` bounds the jobs waiting behind the running one
pub fn spawn(orchestrator: Orchestrator, capacity: usize) -> std::io::Result<(WorkerHandle, JoinHandle<()>)> {
    let capacity = capacity.max(1);
    let (tx, mut rx) = mpsc::channel::<Job>(capacity);
    let pipelines = Arc::new(orchestrator.pipelines());

    let thread = std::thread::Builder::new()
        .name("meshrelay-worker".to_string())
        .spawn(move || {
            while let Some(job) = rx.blocking_recv() {
                match job {
                    Job::Scene { request, reply } => {
                        let result = orchestrator.generate_scene(request);
                        if reply.send(result).is_err() {
                            debug!("client went away before the 3d job finished");
                        }
                    }
                    Job::Image { request, reply } => {
                        let result = orchestrator.generate_image(request);
                        if reply.send(result).is_err() {
                            debug!("client went away before the image job finished");
                        }
                    }
                }
            }
            info!("worker queue closed, stopping");
        })?;

    Ok((
        WorkerHandle {
            tx,
            pipelines,
            capacity,
        },
        thread,
    ))
}

impl WorkerHandle {
    pub fn pipelines(&self) -> &[PipelineKind] {
        &self.pipelines
    }

    pub fn has_pipeline(&self, kind: PipelineKind) -> bool {
        self.pipelines.contains(&kind)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn submit_scene(&self, request: SceneRequest) -> Result<Pending, RequestFailure> {
        self.submit(SCENE_ARTIFACT_COUNT, |reply| Job::Scene { request, reply })
    }

    pub fn submit_image(&self, request: ImageRequest) -> Result<Pending, RequestFailure> {
        let expected = if request.image.is_some() { 2 } else { 1 };
        self.submit(expected, |reply| Job::Image { request, reply })
    }

    fn submit<F>(&self, expected: usize, make_job: F) -> Result<Pending, RequestFailure>
    where
        F: FnOnce(oneshot::Sender<JobResult>) -> Job,
    {
        let (reply, rx) = oneshot::channel();
        match self.tx.try_send(make_job(reply)) {
            Ok(()) => Ok(Pending { rx, expected }),
            Err(TrySendError::Full(_)) => Err(unavailable("generation queue is full, retry later", expected)),
            Err(TrySendError::Closed(_)) => Err(unavailable("generation worker has stopped", expected)),
        }
    }
}
