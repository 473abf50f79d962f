use crate::core::applier::{TransformSpec, ValidateSpec};
use crate::utils::error::{EtlError, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Reusable defaults for a run; the call's own options win over each field.
#[derive(Debug, Clone)]
pub struct Template {
    pub type_tag: String,
    pub transform: Option<TransformSpec>,
    pub validate: Option<ValidateSpec>,
    pub chunk_size: Option<usize>,
}

impl Template {
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            transform: None,
            validate: None,
            chunk_size: None,
        }
    }

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
}

#[derive(Default)]
pub struct TemplateRegistry {
    templates: RwLock<HashMap<String, Arc<Template>>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, template: Template) {
        let mut templates = self.templates.write().unwrap_or_else(PoisonError::into_inner);
        if templates
            .insert(name.to_string(), Arc::new(template))
            .is_some()
        {
            tracing::debug!("Template '{}' replaced", name);
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Template>> {
        let templates = self.templates.read().unwrap_or_else(PoisonError::into_inner);
        templates
            .get(name)
            .cloned()
            .ok_or_else(|| EtlError::TemplateNotFound {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        let templates = self.templates.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = templates.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_replaces() {
        let registry = TemplateRegistry::new();
        registry.register("users", Template::new("csv").chunk_size(50));
        registry.register("users", Template::new("json"));

        let template = registry.resolve("users").unwrap();
        assert_eq!(template.type_tag, "json");
        assert_eq!(template.chunk_size, None);
        assert_eq!(registry.names(), vec!["users"]);
    }

    #[test]
    fn test_unknown_template() {
        let registry = TemplateRegistry::new();
        assert!(matches!(
            registry.resolve("ghost"),
            Err(EtlError::TemplateNotFound { name }) if name == "ghost"
        ));
    }
}
