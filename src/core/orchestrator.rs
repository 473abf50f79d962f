use crate::adapters::registry::{AdapterPair, FormatRegistry};
use crate::core::access::{AccessGate, Action};
use crate::core::applier::{choose, SpecCatalog, Transform, TransformSpec, ValidateSpec, Validator};
use crate::core::audit::{AuditEntry, AuditMetadata, AuditSink, RunStatus};
use crate::core::checkpoint::CheckpointStore;
use crate::core::detect::{detect, is_auto};
use crate::core::events::{EventBus, EventName, EventPayload, Stage};
use crate::core::template::TemplateRegistry;
use crate::domain::model::{Chunk, Record, Source};
use crate::domain::ports::{Importer, RecordStream};
use crate::utils::error::{EtlError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Chunking is off unless a caller, template or config asks for it.
pub const DEFAULT_CHUNK_SIZE: usize = 0;

/// Cooperative stop signal checked before each unit is pulled.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub transform: Option<TransformSpec>,
    pub validate: Option<ValidateSpec>,
    /// `Some(0)` disables chunking; `None` falls back to the orchestrator default.
    pub chunk_size: Option<usize>,
    pub checkpoint: Option<String>,
    pub actor: Option<String>,
    pub cancel: Option<CancelHandle>,
}

impl ImportOptions {
    pub fn transform(mut self, spec: TransformSpec) -> Self {
        self.transform = Some(spec);
        self
    }

    pub fn validate(mut self, spec: ValidateSpec) -> Self {
        self.validate = Some(spec);
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn checkpoint(mut self, name: impl Into<String>) -> Self {
        self.checkpoint = Some(name.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn cancel(mut self, handle: CancelHandle) -> Self {
        self.cancel = Some(handle);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub type_tag: String,
    pub source: Source,
    pub options: ImportOptions,
}

impl ImportRequest {
    pub fn new(type_tag: impl Into<String>, source: impl Into<Source>) -> Self {
        Self {
            type_tag: type_tag.into(),
            source: source.into(),
            options: ImportOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub transform: Option<TransformSpec>,
    pub chunk_size: Option<usize>,
    pub actor: Option<String>,
}

impl ExportOptions {
    pub fn transform(mut self, spec: TransformSpec) -> Self {
        self.transform = Some(spec);
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub type_tag: String,
    pub records: Vec<Record>,
    pub target: String,
    pub options: ExportOptions,
}

impl ExportRequest {
    pub fn new(type_tag: impl Into<String>, records: Vec<Record>, target: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            records,
            target: target.into(),
            options: ExportOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    Streaming,
    Completing,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub type_tag: String,
    pub processed: u64,
    pub skipped: u64,
    pub errors: Vec<Record>,
    pub chunks: usize,
    pub state: RunState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub chunks: Vec<Chunk>,
    pub summary: ImportSummary,
}

impl ImportOutcome {
    pub fn records(&self) -> Vec<Record> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.records.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub type_tag: String,
    pub target: String,
    pub exported: u64,
    pub chunks: usize,
}

#[derive(Default)]
struct SpecDefaults {
    transform: Option<TransformSpec>,
    validate: Option<ValidateSpec>,
}

/// Entry point for imports and exports.
pub struct Orchestrator {
    registry: Arc<FormatRegistry>,
    events: Arc<EventBus>,
    templates: Arc<TemplateRegistry>,
    catalog: Arc<SpecCatalog>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    access: Option<Arc<dyn AccessGate>>,
    defaults: RwLock<SpecDefaults>,
    default_chunk_size: usize,
}

#[derive(Default)]
pub struct OrchestratorBuilder {
    registry: Option<Arc<FormatRegistry>>,
    events: Option<Arc<EventBus>>,
    templates: Option<Arc<TemplateRegistry>>,
    catalog: Option<Arc<SpecCatalog>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    access: Option<Arc<dyn AccessGate>>,
    chunk_size: Option<usize>,
}

impl OrchestratorBuilder {
    pub fn registry(mut self, registry: Arc<FormatRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn templates(mut self, templates: Arc<TemplateRegistry>) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn catalog(mut self, catalog: Arc<SpecCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn access(mut self, gate: Arc<dyn AccessGate>) -> Self {
        self.access = Some(gate);
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            registry: self.registry.unwrap_or_default(),
            events: self.events.unwrap_or_default(),
            templates: self.templates.unwrap_or_default(),
            catalog: self.catalog.unwrap_or_default(),
            checkpoints: self.checkpoints,
            audit: self.audit,
            access: self.access,
            defaults: RwLock::new(SpecDefaults::default()),
            default_chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
        }
    }
}

struct PreparedImport {
    type_tag: String,
    importer: Arc<dyn Importer>,
    transform: Option<Transform>,
    validator: Option<Validator>,
    checkpoint: Option<(String, Arc<dyn CheckpointStore>)>,
    cursor: u64,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn registry(&self) -> &Arc<FormatRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn templates(&self) -> &Arc<TemplateRegistry> {
        &self.templates
    }

    pub fn catalog(&self) -> &Arc<SpecCatalog> {
        &self.catalog
    }

    pub fn checkpoints(&self) -> Option<&Arc<dyn CheckpointStore>> {
        self.checkpoints.as_ref()
    }

    pub fn default_chunk_size(&self) -> usize {
        self.default_chunk_size
    }

    /// Default transform for calls that do not pass one.
    pub fn set_transformer(&self, spec: Option<TransformSpec>) {
        self.defaults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .transform = spec;
    }

    /// Default validator for imports that do not pass one.
    pub fn set_validator(&self, spec: Option<ValidateSpec>) {
        self.defaults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .validate = spec;
    }

    fn check_access(&self, action: Action, type_tag: &str) -> Result<()> {
        match &self.access {
            Some(gate) if !gate.allows(action, type_tag) => Err(EtlError::AccessDenied {
                action: action.to_string(),
                resource: type_tag.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn resolve_transform(&self, per_call: Option<&TransformSpec>) -> Result<Option<Transform>> {
        let defaults = self.defaults.read().unwrap_or_else(PoisonError::into_inner);
        choose(per_call, defaults.transform.as_ref())
            .map(|spec| self.catalog.resolve_transform(spec))
            .transpose()
    }

    fn resolve_validator(&self, per_call: Option<&ValidateSpec>) -> Result<Option<Validator>> {
        let defaults = self.defaults.read().unwrap_or_else(PoisonError::into_inner);
        choose(per_call, defaults.validate.as_ref())
            .map(|spec| self.catalog.resolve_validator(spec))
            .transpose()
    }

    fn lookup(&self, type_tag: &str) -> Result<AdapterPair> {
        self.registry.lookup(type_tag).inspect_err(|_| {
            debug!("Registered type tags: {}", self.registry.tags().join(", "));
        })
    }

    fn prepare_import(&self, type_tag: &str, source: &Source, options: &ImportOptions) -> Result<PreparedImport> {
        let type_tag = if is_auto(type_tag) {
            source
                .as_location()
                .and_then(detect)
                .ok_or_else(|| EtlError::AutoDetectFailed {
                    location: source.describe(),
                })?
                .to_string()
        } else {
            type_tag.to_ascii_lowercase()
        };

        let pair = self.lookup(&type_tag)?;
        self.check_access(Action::Import, &type_tag)?;
        let transform = self.resolve_transform(options.transform.as_ref())?;
        let validator = self.resolve_validator(options.validate.as_ref())?;

        let (checkpoint, cursor) = match &options.checkpoint {
            Some(name) => {
                let store = self.checkpoints.clone().ok_or_else(|| EtlError::MissingConfigError {
                    field: "checkpoints.directory".to_string(),
                })?;
                let cursor = store.read(name);
                (Some((name.clone(), store)), cursor)
            }
            None => (None, 0),
        };

        Ok(PreparedImport {
            type_tag,
            importer: pair.importer,
            transform,
            validator,
            checkpoint,
            cursor,
        })
    }

    /// Resolves everything that can fail before streaming and returns a lazy run.
    /// Nothing is read and no event is published until the first pull.
    pub fn import(&self, request: ImportRequest) -> Result<ImportRun> {
        let ImportRequest {
            type_tag,
            source,
            options,
        } = request;
        let chunk_size = options.chunk_size.unwrap_or(self.default_chunk_size);

        let prepared = match self.prepare_import(&type_tag, &source, &options) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Import of {} rejected: {}", source.describe(), e);
                let metadata = import_metadata(&type_tag, &source, chunk_size, RunStatus::Error, None, &options.checkpoint);
                append_audit(self.audit.as_ref(), options.actor, Action::Import, metadata);
                return Err(e);
            }
        };

        if prepared.cursor > 0 {
            info!("Resuming import of {} at unit {}", source.describe(), prepared.cursor);
        }

        Ok(ImportRun {
            state: RunState::Starting,
            type_tag: prepared.type_tag,
            source,
            importer: prepared.importer,
            events: self.events.clone(),
            audit: self.audit.clone(),
            checkpoint: prepared.checkpoint,
            transform: prepared.transform,
            validator: prepared.validator,
            chunk_size,
            actor: options.actor,
            cancel: options.cancel,
            cursor: prepared.cursor,
            stream: None,
            total: None,
            unit: 0,
            processed: 0,
            skipped: 0,
            errors: Vec::new(),
            buffer: Vec::new(),
            pending_cursor: None,
            chunks: 0,
        })
    }

    pub fn export(&self, request: ExportRequest) -> Result<ExportSummary> {
        let ExportRequest {
            type_tag,
            records,
            target,
            options,
        } = request;
        let chunk_size = options.chunk_size.unwrap_or(self.default_chunk_size);

        let result = self
            .prepare_export(&type_tag, &target, &options)
            .and_then(|(resolved, pair, transform)| {
                self.run_export(resolved, pair, transform, records, &target, chunk_size)
            });

        let (status, resolved_tag) = match &result {
            Ok(summary) => (RunStatus::Success, summary.type_tag.clone()),
            Err(_) => (RunStatus::Error, type_tag.clone()),
        };
        let metadata = AuditMetadata {
            type_tag: resolved_tag,
            source: None,
            target: Some(target.clone()),
            chunk_size,
            status,
            error_count: None,
            checkpoint: None,
        };

        match result {
            Ok(summary) => {
                if let Some(sink) = &self.audit {
                    sink.append(&AuditEntry::new(options.actor, Action::Export, metadata))?;
                }
                info!(
                    "Exported {} records to {} in {} chunks",
                    summary.exported, summary.target, summary.chunks
                );
                Ok(summary)
            }
            Err(e) => {
                warn!("Export to {} failed: {}", target, e);
                append_audit(self.audit.as_ref(), options.actor, Action::Export, metadata);
                Err(e)
            }
        }
    }

    fn prepare_export(
        &self,
        type_tag: &str,
        target: &str,
        options: &ExportOptions,
    ) -> Result<(String, AdapterPair, Option<Transform>)> {
        let type_tag = if is_auto(type_tag) {
            detect(target)
                .ok_or_else(|| EtlError::AutoDetectFailed {
                    location: target.to_string(),
                })?
                .to_string()
        } else {
            type_tag.to_ascii_lowercase()
        };
        let pair = self.lookup(&type_tag)?;
        self.check_access(Action::Export, &type_tag)?;
        let transform = self.resolve_transform(options.transform.as_ref())?;
        Ok((type_tag, pair, transform))
    }

    fn run_export(
        &self,
        type_tag: String,
        pair: AdapterPair,
        transform: Option<Transform>,
        records: Vec<Record>,
        target: &str,
        chunk_size: usize,
    ) -> Result<ExportSummary> {
        let total = records.len() as u64;
        info!("Starting {} export of {} records to {}", type_tag, total, target);
        self.events.emit(
            EventName::export(Stage::Before),
            EventPayload::Before {
                type_tag: &type_tag,
                location: target,
            },
        )?;

        let mut writer = match pair.exporter.open(target) {
            Ok(writer) => writer,
            Err(e) => {
                report_fault(&self.events, EventName::export(Stage::Error), None, &e);
                return Err(e);
            }
        };

        let size = if chunk_size == 0 {
            records.len().max(1)
        } else {
            chunk_size
        };
        let mut pending = records.into_iter().peekable();
        let mut exported = 0u64;
        let mut chunks = 0usize;

        while pending.peek().is_some() {
            let mut batch = Vec::with_capacity(size);
            for record in pending.by_ref().take(size) {
                let record = match &transform {
                    Some(t) => t.apply(record),
                    None => record,
                };
                self.events.emit(
                    EventName::export(Stage::Row),
                    EventPayload::Row {
                        unit: exported,
                        record: &record,
                    },
                )?;
                exported += 1;
                self.events.emit(
                    EventName::export(Stage::Progress),
                    EventPayload::Progress {
                        count: exported,
                        total,
                        percent: percent(exported, total),
                    },
                )?;
                batch.push(record);
            }

            if let Err(e) = writer.write_chunk(&batch) {
                report_fault(&self.events, EventName::export(Stage::Error), None, &e);
                return Err(e);
            }
            debug!("Wrote export chunk {} ({} records)", chunks, batch.len());
            chunks += 1;
        }

        if let Err(e) = writer.finish() {
            report_fault(&self.events, EventName::export(Stage::Error), None, &e);
            return Err(e);
        }

        self.events.emit(
            EventName::export(Stage::After),
            EventPayload::After {
                processed: exported,
                failed: 0,
            },
        )?;

        Ok(ExportSummary {
            type_tag,
            target: target.to_string(),
            exported,
            chunks,
        })
    }

    /// Builds an import request from a template; `options` fields that are set win.
    pub fn import_request_from_template(
        &self,
        name: &str,
        source: impl Into<Source>,
        options: ImportOptions,
    ) -> Result<ImportRequest> {
        let source = source.into();
        let template = match self.templates.resolve(name) {
            Ok(template) => template,
            Err(e) => {
                let metadata = import_metadata(
                    &format!("template:{}", name),
                    &source,
                    options.chunk_size.unwrap_or(self.default_chunk_size),
                    RunStatus::Error,
                    None,
                    &options.checkpoint,
                );
                append_audit(self.audit.as_ref(), options.actor, Action::Import, metadata);
                return Err(e);
            }
        };

        let options = ImportOptions {
            transform: options.transform.or_else(|| template.transform.clone()),
            validate: options.validate.or_else(|| template.validate.clone()),
            chunk_size: options.chunk_size.or(template.chunk_size),
            ..options
        };
        Ok(ImportRequest {
            type_tag: template.type_tag.clone(),
            source,
            options,
        })
    }

    pub fn import_template(&self, name: &str, source: impl Into<Source>, options: ImportOptions) -> Result<ImportRun> {
        let request = self.import_request_from_template(name, source, options)?;
        self.import(request)
    }

    /// Builds an export request from a template; `options` fields that are set win.
    pub fn export_request_from_template(
        &self,
        name: &str,
        records: Vec<Record>,
        target: impl Into<String>,
        options: ExportOptions,
    ) -> Result<ExportRequest> {
        let target = target.into();
        let template = match self.templates.resolve(name) {
            Ok(template) => template,
            Err(e) => {
                let metadata = AuditMetadata {
                    type_tag: format!("template:{}", name),
                    source: None,
                    target: Some(target),
                    chunk_size: options.chunk_size.unwrap_or(self.default_chunk_size),
                    status: RunStatus::Error,
                    error_count: None,
                    checkpoint: None,
                };
                append_audit(self.audit.as_ref(), options.actor, Action::Export, metadata);
                return Err(e);
            }
        };

        let options = ExportOptions {
            transform: options.transform.or_else(|| template.transform.clone()),
            chunk_size: options.chunk_size.or(template.chunk_size),
            ..options
        };
        Ok(ExportRequest {
            type_tag: template.type_tag.clone(),
            records,
            target,
            options,
        })
    }

    pub fn export_template(
        &self,
        name: &str,
        records: Vec<Record>,
        target: impl Into<String>,
        options: ExportOptions,
    ) -> Result<ExportSummary> {
        let request = self.export_request_from_template(name, records, target, options)?;
        self.export(request)
    }

    /// Runs an import on a blocking task and hands its chunks over a bounded channel.
    pub fn spawn_import(self: &Arc<Self>, request: ImportRequest, capacity: usize) -> ImportStream {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let orchestrator = Arc::clone(self);
        let handle = tokio::task::spawn_blocking(move || {
            let mut run = orchestrator.import(request)?;
            while let Some(item) = run.next() {
                let chunk = item?;
                if sender.blocking_send(chunk).is_err() {
                    debug!("Chunk receiver dropped; stopping import");
                    let error = EtlError::Cancelled { unit: run.units_seen() };
                    run.abort(&error);
                    return Err(error);
                }
            }
            Ok(run.into_summary())
        });
        ImportStream { receiver, handle }
    }

    pub fn spawn_export(self: &Arc<Self>, request: ExportRequest) -> JoinHandle<Result<ExportSummary>> {
        let orchestrator = Arc::clone(self);
        tokio::task::spawn_blocking(move || orchestrator.export(request))
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunks of an import running off the caller's thread.
pub struct ImportStream {
    pub receiver: mpsc::Receiver<Chunk>,
    pub handle: JoinHandle<Result<ImportSummary>>,
}

impl ImportStream {
    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        self.receiver.recv().await
    }

    /// Waits for the run to end. Chunks not yet received are dropped.
    pub async fn finish(self) -> Result<ImportSummary> {
        drop(self.receiver);
        join_summary(self.handle).await
    }

    /// Receives every remaining chunk, then waits for the summary.
    pub async fn collect(mut self) -> Result<ImportOutcome> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.receiver.recv().await {
            chunks.push(chunk);
        }
        let summary = join_summary(self.handle).await?;
        Ok(ImportOutcome { chunks, summary })
    }
}

async fn join_summary<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle.await.map_err(|e| EtlError::Task {
        message: e.to_string(),
    })?
}

/// One lazy import. Pulling drives the pipeline; see [`Orchestrator::import`].
pub struct ImportRun {
    state: RunState,
    type_tag: String,
    source: Source,
    importer: Arc<dyn Importer>,
    events: Arc<EventBus>,
    audit: Option<Arc<dyn AuditSink>>,
    checkpoint: Option<(String, Arc<dyn CheckpointStore>)>,
    transform: Option<Transform>,
    validator: Option<Validator>,
    chunk_size: usize,
    actor: Option<String>,
    cancel: Option<CancelHandle>,
    cursor: u64,
    stream: Option<RecordStream>,
    total: Option<u64>,
    unit: u64,
    processed: u64,
    skipped: u64,
    errors: Vec<Record>,
    buffer: Vec<Record>,
    pending_cursor: Option<u64>,
    chunks: usize,
}

impl ImportRun {
    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Units pulled from the source so far, skipped ones included.
    pub fn units_seen(&self) -> u64 {
        self.unit
    }

    /// Original records that failed validation, in source order.
    pub fn errors(&self) -> &[Record] {
        &self.errors
    }

    pub fn into_summary(self) -> ImportSummary {
        ImportSummary {
            type_tag: self.type_tag,
            processed: self.processed,
            skipped: self.skipped,
            errors: self.errors,
            chunks: self.chunks,
            state: self.state,
        }
    }

    pub fn run_to_end(mut self) -> Result<ImportOutcome> {
        let mut chunks = Vec::new();
        for item in self.by_ref() {
            chunks.push(item?);
        }
        Ok(ImportOutcome {
            chunks,
            summary: self.into_summary(),
        })
    }

    fn advance(&mut self) -> Result<Option<Chunk>> {
        loop {
            match self.state {
                RunState::Starting => self.start()?,
                RunState::Streaming => {
                    if let Some(chunk) = self.pull_chunk()? {
                        return Ok(Some(chunk));
                    }
                }
                RunState::Completing => {
                    self.complete()?;
                    return Ok(None);
                }
                RunState::Succeeded | RunState::Failed => return Ok(None),
            }
        }
    }

    fn start(&mut self) -> Result<()> {
        let location = self.source.describe();
        info!("Starting {} import from {}", self.type_tag, location);
        self.events.emit(
            EventName::import(Stage::Before),
            EventPayload::Before {
                type_tag: &self.type_tag,
                location: &location,
            },
        )?;

        let stream = match self.importer.import(&self.source) {
            Ok(stream) => stream,
            Err(e) => {
                report_fault(&self.events, EventName::import(Stage::Error), None, &e);
                return Err(e);
            }
        };
        self.total = stream.total();
        self.stream = Some(stream);
        self.state = RunState::Streaming;
        Ok(())
    }

    /// Processes units until a chunk is ready or the source is exhausted.
    fn pull_chunk(&mut self) -> Result<Option<Chunk>> {
        loop {
            if let Some(cancel) = &self.cancel {
                if cancel.is_cancelled() {
                    return Err(EtlError::Cancelled { unit: self.unit });
                }
            }

            let next = self.stream.as_mut().and_then(|stream| stream.next());
            let item = match next {
                Some(item) => item,
                None => {
                    self.stream = None;
                    self.state = RunState::Completing;
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    return self.flush_buffer().map(Some);
                }
            };

            let unit = self.unit;
            self.unit += 1;
            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    report_fault(&self.events, EventName::import(Stage::Error), Some(unit), &e);
                    return Err(e);
                }
            };

            if unit < self.cursor {
                self.skipped += 1;
                continue;
            }

            let original = self.validator.is_some().then(|| record.clone());
            let record = match &self.transform {
                Some(t) => t.apply(record),
                None => record,
            };
            let valid = self
                .validator
                .as_ref()
                .map_or(true, |validator| validator.apply(&record));

            if !valid {
                let original = original.unwrap_or(record);
                warn!("Record at unit {} failed validation", unit);
                let error = EtlError::ValidationFailed { unit };
                self.events.emit(
                    EventName::import(Stage::Error),
                    EventPayload::Error {
                        unit: Some(unit),
                        record: Some(&original),
                        error: &error,
                    },
                )?;
                self.errors.push(original);
                self.advance_cursor(unit + 1)?;
                continue;
            }

            self.events.emit(
                EventName::import(Stage::Row),
                EventPayload::Row {
                    unit,
                    record: &record,
                },
            )?;
            self.processed += 1;
            if let Some(total) = self.total {
                self.events.emit(
                    EventName::import(Stage::Progress),
                    EventPayload::Progress {
                        count: self.processed,
                        total,
                        percent: percent(self.processed, total),
                    },
                )?;
            }

            if self.chunk_size == 0 {
                self.save_checkpoint(unit + 1)?;
                return Ok(Some(self.make_chunk(vec![record])));
            }
            self.buffer.push(record);
            self.pending_cursor = Some(unit + 1);
            if self.buffer.len() >= self.chunk_size {
                return self.flush_buffer().map(Some);
            }
        }
    }

    /// Records the cursor now, or once the buffered records ahead of it are yielded.
    fn advance_cursor(&mut self, cursor: u64) -> Result<()> {
        if self.buffer.is_empty() {
            self.save_checkpoint(cursor)
        } else {
            self.pending_cursor = Some(cursor);
            Ok(())
        }
    }

    fn flush_buffer(&mut self) -> Result<Chunk> {
        if let Some(cursor) = self.pending_cursor.take() {
            self.save_checkpoint(cursor)?;
        }
        let records = std::mem::take(&mut self.buffer);
        Ok(self.make_chunk(records))
    }

    fn make_chunk(&mut self, records: Vec<Record>) -> Chunk {
        let chunk = Chunk {
            index: self.chunks,
            records,
        };
        self.chunks += 1;
        if self.chunk_size > 0 {
            debug!("Yielding import chunk {} ({} records)", chunk.index, chunk.len());
        }
        chunk
    }

    fn save_checkpoint(&self, cursor: u64) -> Result<()> {
        match &self.checkpoint {
            Some((name, store)) => store.write(name, cursor),
            None => Ok(()),
        }
    }

    fn complete(&mut self) -> Result<()> {
        self.events.emit(
            EventName::import(Stage::After),
            EventPayload::After {
                processed: self.processed,
                failed: self.errors.len() as u64,
            },
        )?;

        if let Some(sink) = &self.audit {
            let metadata = import_metadata(
                &self.type_tag,
                &self.source,
                self.chunk_size,
                RunStatus::Success,
                Some(self.errors.len()),
                &self.checkpoint.as_ref().map(|(name, _)| name.clone()),
            );
            sink.append(&AuditEntry::new(self.actor.clone(), Action::Import, metadata))?;
        }

        self.state = RunState::Succeeded;
        info!(
            "Import of {} finished: {} processed, {} failed validation, {} skipped",
            self.source.describe(),
            self.processed,
            self.errors.len(),
            self.skipped
        );
        Ok(())
    }

    /// Ends the run from outside the pull loop, as if `error` had been raised by it.
    pub(crate) fn abort(&mut self, error: &EtlError) {
        if !matches!(self.state, RunState::Succeeded | RunState::Failed) {
            self.fail(error);
        }
    }

    fn fail(&mut self, error: &EtlError) {
        self.state = RunState::Failed;
        self.stream = None;
        self.buffer.clear();
        self.pending_cursor = None;
        warn!("Import of {} failed: {}", self.source.describe(), error);

        let metadata = import_metadata(
            &self.type_tag,
            &self.source,
            self.chunk_size,
            RunStatus::Error,
            Some(self.errors.len()),
            &self.checkpoint.as_ref().map(|(name, _)| name.clone()),
        );
        append_audit(self.audit.as_ref(), self.actor.clone(), Action::Import, metadata);
    }
}

impl Iterator for ImportRun {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => {
                self.fail(&e);
                Some(Err(e))
            }
        }
    }
}

fn percent(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (count as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

fn import_metadata(
    type_tag: &str,
    source: &Source,
    chunk_size: usize,
    status: RunStatus,
    error_count: Option<usize>,
    checkpoint: &Option<String>,
) -> AuditMetadata {
    AuditMetadata {
        type_tag: type_tag.to_string(),
        source: Some(source.describe()),
        target: None,
        chunk_size,
        status,
        error_count,
        checkpoint: checkpoint.clone(),
    }
}

/// Failure-path audit: a sink error is logged so the original error survives.
fn append_audit(sink: Option<&Arc<dyn AuditSink>>, actor: Option<String>, action: Action, metadata: AuditMetadata) {
    if let Some(sink) = sink {
        if let Err(e) = sink.append(&AuditEntry::new(actor, action, metadata)) {
            warn!("Failed to write audit entry: {}", e);
        }
    }
}

/// Publishes a fault not tied to a validated record. A handler error here is
/// logged; the fault itself is what the caller sees.
fn report_fault(events: &EventBus, name: EventName, unit: Option<u64>, error: &EtlError) {
    let payload = EventPayload::Error {
        unit,
        record: None,
        error,
    };
    if let Err(e) = events.emit(name, payload) {
        warn!("{} handler failed while reporting a fault: {}", name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audit::MemoryAuditLog;
    use crate::core::checkpoint::MemoryCheckpointStore;
    use std::sync::Mutex;

    fn people(n: usize) -> Vec<Record> {
        (1..=n)
            .map(|i| Record::from_pairs([("id", i.to_string()), ("name", format!("p{}", i))]))
            .collect()
    }

    #[test]
    fn test_percent_is_bounded() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(1, 4), 25.0);
        assert_eq!(percent(9, 4), 100.0);
    }

    #[test]
    fn test_nothing_happens_before_first_pull() {
        let orchestrator = Orchestrator::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        orchestrator
            .events()
            .subscribe(EventName::import(Stage::Before), move |_| {
                *counter.lock().unwrap() += 1;
                Ok(())
            });

        let mut run = orchestrator
            .import(ImportRequest::new("object", people(2)))
            .unwrap();
        assert_eq!(run.state(), RunState::Starting);
        assert_eq!(*seen.lock().unwrap(), 0);

        assert!(run.next().is_some());
        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(run.state(), RunState::Streaming);
    }

    #[test]
    fn test_failed_run_yields_error_once() {
        let audit = Arc::new(MemoryAuditLog::new());
        let orchestrator = Orchestrator::builder().audit(audit.clone()).build();
        let cancel = CancelHandle::new();
        cancel.cancel();

        let mut run = orchestrator
            .import(
                ImportRequest::new("object", people(3))
                    .with_options(ImportOptions::default().cancel(cancel)),
            )
            .unwrap();
        assert!(matches!(run.next(), Some(Err(EtlError::Cancelled { unit: 0 }))));
        assert!(run.next().is_none());
        assert_eq!(run.state(), RunState::Failed);

        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metadata.status, RunStatus::Error);
    }

    #[test]
    fn test_checkpoint_requires_store() {
        let orchestrator = Orchestrator::new();
        let result = orchestrator.import(
            ImportRequest::new("object", people(1))
                .with_options(ImportOptions::default().checkpoint("nightly")),
        );
        assert!(matches!(result, Err(EtlError::MissingConfigError { .. })));
    }

    #[test]
    fn test_default_validator_applies_when_call_has_none() {
        let orchestrator = Orchestrator::builder()
            .checkpoints(Arc::new(MemoryCheckpointStore::new()))
            .build();
        orchestrator.set_validator(Some(ValidateSpec::func(|r: &Record| {
            r.get_str("id") != Some("2")
        })));

        let outcome = orchestrator
            .import(ImportRequest::new("object", people(3)))
            .unwrap()
            .run_to_end()
            .unwrap();
        assert_eq!(outcome.records().len(), 2);
        assert_eq!(outcome.summary.errors, vec![people(3)[1].clone()]);

        let outcome = orchestrator
            .import(
                ImportRequest::new("object", people(3))
                    .with_options(ImportOptions::default().validate(ValidateSpec::func(|_: &Record| true))),
            )
            .unwrap()
            .run_to_end()
            .unwrap();
        assert_eq!(outcome.records().len(), 3);
    }
}
