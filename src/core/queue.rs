use crate::core::applier::{TransformSpec, ValidateSpec};
use crate::core::orchestrator::{
    ExportOptions, ExportRequest, ExportSummary, ImportOptions, ImportRequest, ImportSummary,
    Orchestrator,
};
use crate::domain::model::{Record, Source};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// A serializable import or export call. Only named specs survive the trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum InvocationDescriptor {
    Import {
        #[serde(rename = "type")]
        type_tag: String,
        source: Source,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transform: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        validate: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_size: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checkpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor: Option<String>,
    },
    Export {
        #[serde(rename = "type")]
        type_tag: String,
        records: Vec<Record>,
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transform: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_size: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor: Option<String>,
    },
}

fn transform_name(spec: Option<&TransformSpec>) -> Result<Option<String>> {
    match spec {
        None => Ok(None),
        Some(TransformSpec::Named(name)) => Ok(Some(name.clone())),
        Some(_) => Err(EtlError::InvalidSpec {
            message: "inline transforms cannot be queued; register them by name".to_string(),
        }),
    }
}

fn validator_name(spec: Option<&ValidateSpec>) -> Result<Option<String>> {
    match spec {
        None => Ok(None),
        Some(ValidateSpec::Named(name)) => Ok(Some(name.clone())),
        Some(_) => Err(EtlError::InvalidSpec {
            message: "inline validators cannot be queued; register them by name".to_string(),
        }),
    }
}

impl TryFrom<&ImportRequest> for InvocationDescriptor {
    type Error = EtlError;

    /// A cancel handle is process-local and is not carried.
    fn try_from(request: &ImportRequest) -> Result<Self> {
        let options = &request.options;
        Ok(Self::Import {
            type_tag: request.type_tag.clone(),
            source: request.source.clone(),
            transform: transform_name(options.transform.as_ref())?,
            validate: validator_name(options.validate.as_ref())?,
            chunk_size: options.chunk_size,
            checkpoint: options.checkpoint.clone(),
            actor: options.actor.clone(),
        })
    }
}

impl TryFrom<&ExportRequest> for InvocationDescriptor {
    type Error = EtlError;

    fn try_from(request: &ExportRequest) -> Result<Self> {
        let options = &request.options;
        Ok(Self::Export {
            type_tag: request.type_tag.clone(),
            records: request.records.clone(),
            target: request.target.clone(),
            transform: transform_name(options.transform.as_ref())?,
            chunk_size: options.chunk_size,
            actor: options.actor.clone(),
        })
    }
}

/// A decoded descriptor, ready to hand to the orchestrator.
#[derive(Debug, Clone)]
pub enum Job {
    Import(ImportRequest),
    Export(ExportRequest),
}

impl InvocationDescriptor {
    pub fn into_job(self) -> Job {
        match self {
            Self::Import {
                type_tag,
                source,
                transform,
                validate,
                chunk_size,
                checkpoint,
                actor,
            } => Job::Import(ImportRequest {
                type_tag,
                source,
                options: ImportOptions {
                    transform: transform.map(TransformSpec::Named),
                    validate: validate.map(ValidateSpec::Named),
                    chunk_size,
                    checkpoint,
                    actor,
                    cancel: None,
                },
            }),
            Self::Export {
                type_tag,
                records,
                target,
                transform,
                chunk_size,
                actor,
            } => Job::Export(ExportRequest {
                type_tag,
                records,
                target,
                options: ExportOptions {
                    transform: transform.map(TransformSpec::Named),
                    chunk_size,
                    actor,
                },
            }),
        }
    }
}

/// Accepts serialized invocation descriptors for later execution.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, payload: String) -> Result<()>;
}

pub struct QueueBridge {
    queue: Arc<dyn JobQueue>,
}

impl QueueBridge {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    pub async fn enqueue(&self, descriptor: &InvocationDescriptor) -> Result<()> {
        let payload = serde_json::to_string(descriptor)?;
        self.queue.push(payload).await
    }

    pub async fn enqueue_import(&self, request: &ImportRequest) -> Result<()> {
        self.enqueue(&InvocationDescriptor::try_from(request)?).await
    }

    pub async fn enqueue_export(&self, request: &ExportRequest) -> Result<()> {
        self.enqueue(&InvocationDescriptor::try_from(request)?).await
    }
}

/// In-process queue over a bounded tokio channel.
pub struct ChannelQueue {
    sender: mpsc::Sender<String>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JobQueue for ChannelQueue {
    async fn push(&self, payload: String) -> Result<()> {
        self.sender.send(payload).await.map_err(|_| EtlError::Queue {
            message: "queue receiver has been dropped".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Imported(ImportSummary),
    Exported(ExportSummary),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub succeeded: usize,
    pub failed: usize,
}

/// Drains a channel of descriptors and runs each one to completion.
pub struct QueueWorker {
    orchestrator: Arc<Orchestrator>,
    receiver: mpsc::Receiver<String>,
}

impl QueueWorker {
    pub fn new(orchestrator: Arc<Orchestrator>, receiver: mpsc::Receiver<String>) -> Self {
        Self {
            orchestrator,
            receiver,
        }
    }

    /// Runs until every sender is dropped.
    pub async fn run(mut self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        while let Some(payload) = self.receiver.recv().await {
            match execute(&self.orchestrator, &payload).await {
                Ok(outcome) => {
                    stats.succeeded += 1;
                    info!("Queued job finished: {}", summary_line(&outcome));
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!("Queued job failed: {}", e);
                }
            }
        }
        stats
    }
}

fn summary_line(outcome: &JobOutcome) -> String {
    match outcome {
        JobOutcome::Imported(s) => format!("{} import, {} processed", s.type_tag, s.processed),
        JobOutcome::Exported(s) => format!("{} export, {} records", s.type_tag, s.exported),
    }
}

/// Decodes one payload and runs it on a blocking task. Import chunks are drained.
pub async fn execute(orchestrator: &Arc<Orchestrator>, payload: &str) -> Result<JobOutcome> {
    let descriptor: InvocationDescriptor =
        serde_json::from_str(payload).map_err(|e| EtlError::Queue {
            message: format!("undecodable job: {}", e),
        })?;

    let orchestrator = Arc::clone(orchestrator);
    let joined = tokio::task::spawn_blocking(move || match descriptor.into_job() {
        Job::Import(request) => orchestrator
            .import(request)?
            .run_to_end()
            .map(|outcome| JobOutcome::Imported(outcome.summary)),
        Job::Export(request) => orchestrator.export(request).map(JobOutcome::Exported),
    })
    .await;

    joined.map_err(|e| EtlError::Task {
        message: e.to_string(),
    })?
}
