use crate::adapters::model::MemoryStore;
use crate::adapters::object::ObjectSink;
use crate::adapters::registry::FormatRegistry;
use crate::adapters::storage::StorageRouter;
use crate::config::toml_config::RelayConfig;
use crate::core::applier::{SpecCatalog, TransformSpec, ValidateSpec};
use crate::core::audit::JsonLinesAuditLog;
use crate::core::checkpoint::FileCheckpointStore;
use crate::core::orchestrator::{Orchestrator, DEFAULT_CHUNK_SIZE};
use crate::core::rules::register_rules;
use crate::core::template::{Template, TemplateRegistry};
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use std::sync::Arc;

/// Builds an orchestrator with the built-in adapters and everything `config` declares.
pub fn build_orchestrator(config: &RelayConfig) -> Result<Orchestrator> {
    config.validate()?;

    let storage = Arc::new(StorageRouter::with_defaults());
    let registry = FormatRegistry::with_builtins(storage, Arc::new(MemoryStore::new()), ObjectSink::new());

    let catalog = SpecCatalog::new();
    register_rules(&catalog, &config.transforms, &config.validators);

    let templates = TemplateRegistry::new();
    for declared in &config.templates {
        let mut template = Template::new(declared.type_tag.clone());
        template.transform = declared.transform.clone().map(TransformSpec::Named);
        template.validate = declared.validate.clone().map(ValidateSpec::Named);
        template.chunk_size = declared.chunk_size;
        templates.register(&declared.name, template);
    }

    let mut builder = Orchestrator::builder()
        .registry(Arc::new(registry))
        .catalog(Arc::new(catalog))
        .templates(Arc::new(templates))
        .chunk_size(config.chunk_size().unwrap_or(DEFAULT_CHUNK_SIZE));

    if let Some(dir) = config.checkpoint_dir() {
        builder = builder.checkpoints(Arc::new(FileCheckpointStore::new(dir)));
    }
    if let Some(path) = config.audit_path() {
        builder = builder.audit(Arc::new(JsonLinesAuditLog::new(path)?));
    }

    tracing::debug!(
        "Orchestrator ready: {} transforms, {} validators, {} templates",
        config.transforms.len(),
        config.validators.len(),
        config.templates.len()
    );
    Ok(builder.build())
}
