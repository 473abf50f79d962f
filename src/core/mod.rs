pub mod access;
pub mod applier;
pub mod audit;
pub mod checkpoint;
pub mod detect;
pub mod events;
pub mod orchestrator;
pub mod queue;
pub mod rules;
pub mod template;

pub use applier::{RecordTransformer, RecordValidator, SpecCatalog, TransformSpec, ValidateSpec};
pub use events::{Direction, EventBus, EventName, EventPayload, PipelineEvent, Stage};
pub use orchestrator::{
    CancelHandle, ExportOptions, ExportRequest, ExportSummary, ImportOptions, ImportOutcome,
    ImportRequest, ImportRun, ImportStream, ImportSummary, Orchestrator, RunState,
};
pub use template::{Template, TemplateRegistry};
