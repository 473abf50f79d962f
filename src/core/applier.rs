use crate::domain::model::Record;
use crate::utils::error::{EtlError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

pub trait RecordTransformer: Send + Sync {
    fn transform(&self, record: Record) -> Record;
}

pub trait RecordValidator: Send + Sync {
    fn validate(&self, record: &Record) -> bool;
}

pub type TransformFn = Arc<dyn Fn(Record) -> Record + Send + Sync>;
pub type ValidateFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum TransformSpec {
    Func(TransformFn),
    Object(Arc<dyn RecordTransformer>),
    Named(String),
}

impl TransformSpec {
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(Record) -> Record + Send + Sync + 'static,
    {
        Self::Func(Arc::new(f))
    }

    pub fn object<T: RecordTransformer + 'static>(transformer: T) -> Self {
        Self::Object(Arc::new(transformer))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Debug for TransformSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Func(_) => f.write_str("TransformSpec::Func"),
            Self::Object(_) => f.write_str("TransformSpec::Object"),
            Self::Named(name) => write!(f, "TransformSpec::Named({:?})", name),
        }
    }
}

#[derive(Clone)]
pub enum ValidateSpec {
    Func(ValidateFn),
    Object(Arc<dyn RecordValidator>),
    Named(String),
}

impl ValidateSpec {
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self::Func(Arc::new(f))
    }

    pub fn object<V: RecordValidator + 'static>(validator: V) -> Self {
        Self::Object(Arc::new(validator))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Debug for ValidateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Func(_) => f.write_str("ValidateSpec::Func"),
            Self::Object(_) => f.write_str("ValidateSpec::Object"),
            Self::Named(name) => write!(f, "ValidateSpec::Named({:?})", name),
        }
    }
}

/// A transform resolved for one run.
#[derive(Clone)]
pub enum Transform {
    Func(TransformFn),
    Object(Arc<dyn RecordTransformer>),
}

impl Transform {
    pub fn apply(&self, record: Record) -> Record {
        match self {
            Self::Func(f) => f(record),
            Self::Object(t) => t.transform(record),
        }
    }
}

/// A validator resolved for one run.
#[derive(Clone)]
pub enum Validator {
    Func(ValidateFn),
    Object(Arc<dyn RecordValidator>),
}

impl Validator {
    pub fn apply(&self, record: &Record) -> bool {
        match self {
            Self::Func(f) => f(record),
            Self::Object(v) => v.validate(record),
        }
    }
}

/// Named transformers and validators that `Named` specs resolve through.
#[derive(Default)]
pub struct SpecCatalog {
    transforms: RwLock<HashMap<String, TransformSpec>>,
    validators: RwLock<HashMap<String, ValidateSpec>>,
}

impl SpecCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_transform(&self, name: &str, spec: TransformSpec) {
        let mut transforms = self.transforms.write().unwrap_or_else(PoisonError::into_inner);
        transforms.insert(name.to_string(), spec);
    }

    pub fn register_validator(&self, name: &str, spec: ValidateSpec) {
        let mut validators = self.validators.write().unwrap_or_else(PoisonError::into_inner);
        validators.insert(name.to_string(), spec);
    }

    pub fn has_transform(&self, name: &str) -> bool {
        let transforms = self.transforms.read().unwrap_or_else(PoisonError::into_inner);
        transforms.contains_key(name)
    }

    pub fn has_validator(&self, name: &str) -> bool {
        let validators = self.validators.read().unwrap_or_else(PoisonError::into_inner);
        validators.contains_key(name)
    }

    pub fn resolve_transform(&self, spec: &TransformSpec) -> Result<Transform> {
        match spec {
            TransformSpec::Func(f) => Ok(Transform::Func(f.clone())),
            TransformSpec::Object(t) => Ok(Transform::Object(t.clone())),
            TransformSpec::Named(name) => {
                let transforms = self.transforms.read().unwrap_or_else(PoisonError::into_inner);
                match transforms.get(name) {
                    Some(TransformSpec::Func(f)) => Ok(Transform::Func(f.clone())),
                    Some(TransformSpec::Object(t)) => Ok(Transform::Object(t.clone())),
                    Some(TransformSpec::Named(alias)) => Err(EtlError::InvalidSpec {
                        message: format!(
                            "transform '{}' refers to another name '{}'",
                            name, alias
                        ),
                    }),
                    None => Err(EtlError::InvalidSpec {
                        message: format!("unknown transform '{}'", name),
                    }),
                }
            }
        }
    }

    pub fn resolve_validator(&self, spec: &ValidateSpec) -> Result<Validator> {
        match spec {
            ValidateSpec::Func(f) => Ok(Validator::Func(f.clone())),
            ValidateSpec::Object(v) => Ok(Validator::Object(v.clone())),
            ValidateSpec::Named(name) => {
                let validators = self.validators.read().unwrap_or_else(PoisonError::into_inner);
                match validators.get(name) {
                    Some(ValidateSpec::Func(f)) => Ok(Validator::Func(f.clone())),
                    Some(ValidateSpec::Object(v)) => Ok(Validator::Object(v.clone())),
                    Some(ValidateSpec::Named(alias)) => Err(EtlError::InvalidSpec {
                        message: format!(
                            "validator '{}' refers to another name '{}'",
                            name, alias
                        ),
                    }),
                    None => Err(EtlError::InvalidSpec {
                        message: format!("unknown validator '{}'", name),
                    }),
                }
            }
        }
    }
}

/// The per-call spec wins over the default; neither means the stage is skipped.
pub fn choose<'a, S>(per_call: Option<&'a S>, default: Option<&'a S>) -> Option<&'a S> {
    per_call.or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    impl RecordTransformer for Upper {
        fn transform(&self, mut record: Record) -> Record {
            for value in record.data.values_mut() {
                if let Some(s) = value.as_str() {
                    *value = json!(s.to_uppercase());
                }
            }
            record
        }
    }

    #[test]
    fn test_func_and_object_specs_apply() {
        let catalog = SpecCatalog::new();
        let record = Record::from_pairs([("name", "ada")]);

        let func = catalog
            .resolve_transform(&TransformSpec::func(|mut r: Record| {
                r.insert("seen", true);
                r
            }))
            .unwrap();
        assert_eq!(func.apply(record.clone()).get("seen"), Some(&json!(true)));

        let object = catalog.resolve_transform(&TransformSpec::object(Upper)).unwrap();
        assert_eq!(object.apply(record).get_str("name"), Some("ADA"));
    }

    #[test]
    fn test_named_specs_resolve_through_catalog() {
        let catalog = SpecCatalog::new();
        catalog.register_validator(
            "has_name",
            ValidateSpec::func(|r: &Record| r.get("name").is_some()),
        );
        let validator = catalog
            .resolve_validator(&ValidateSpec::named("has_name"))
            .unwrap();
        assert!(validator.apply(&Record::from_pairs([("name", "x")])));
        assert!(!validator.apply(&Record::new()));
    }

    #[test]
    fn test_unknown_or_nested_names_are_invalid() {
        let catalog = SpecCatalog::new();
        assert!(matches!(
            catalog.resolve_transform(&TransformSpec::named("missing")),
            Err(EtlError::InvalidSpec { .. })
        ));

        catalog.register_transform("alias", TransformSpec::named("other"));
        assert!(matches!(
            catalog.resolve_transform(&TransformSpec::named("alias")),
            Err(EtlError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn test_choose_prefers_per_call() {
        let per_call = ValidateSpec::named("a");
        let default = ValidateSpec::named("b");
        assert_eq!(
            choose(Some(&per_call), Some(&default)).and_then(|s| s.as_name()),
            Some("a")
        );
        assert_eq!(
            choose(None, Some(&default)).and_then(|s| s.as_name()),
            Some("b")
        );
        assert!(choose::<ValidateSpec>(None, None).is_none());
    }
}
