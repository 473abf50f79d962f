pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::{FormatRegistry, MemoryStore, ObjectSink, StorageRouter};
pub use app::build_orchestrator;
pub use config::RelayConfig;
pub use core::{
    ExportOptions, ExportRequest, ImportOptions, ImportRequest, Orchestrator, Template,
    TransformSpec, ValidateSpec,
};
pub use domain::model::{Chunk, Record, Source};
pub use utils::error::{EtlError, Result};
