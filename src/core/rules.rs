use crate::core::applier::{RecordTransformer, RecordValidator, SpecCatalog, TransformSpec, ValidateSpec};
use crate::domain::model::{value_to_text, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Field-level transform steps. Steps run in declaration order below:
/// rename, projection, trimming, lowercasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformRule {
    pub field_mapping: Option<HashMap<String, String>>,
    pub keep_only_fields: Option<Vec<String>>,
    pub trim_whitespace: Option<bool>,
    pub lowercase_fields: Option<Vec<String>>,
}

impl TransformRule {
    /// A renamed field replaces an existing field of the same name. When two
    /// fields are renamed onto one name the first in record order is kept.
    fn rename(&self, record: Record) -> Record {
        let Some(mapping) = &self.field_mapping else {
            return record;
        };
        let targets: HashSet<String> = record
            .keys()
            .filter_map(|key| mapping.get(key).filter(|renamed| *renamed != key).cloned())
            .collect();

        let mut data = Map::new();
        let mut renamed_in = HashSet::new();
        for (key, value) in record.data {
            match mapping.get(&key) {
                Some(renamed) => {
                    if !renamed_in.insert(renamed.clone()) {
                        tracing::warn!("Field '{}' dropped: '{}' is already mapped", key, renamed);
                        continue;
                    }
                    data.insert(renamed.clone(), value);
                }
                None if targets.contains(&key) => {
                    tracing::warn!("Field '{}' replaced by a renamed field", key);
                }
                None => {
                    data.insert(key, value);
                }
            }
        }
        Record::from(data)
    }

    fn keep_only(&self, record: Record) -> Record {
        let Some(fields) = &self.keep_only_fields else {
            return record;
        };
        let data: Map<String, Value> = record
            .data
            .into_iter()
            .filter(|(key, _)| fields.contains(key))
            .collect();
        Record::from(data)
    }
}

impl RecordTransformer for TransformRule {
    fn transform(&self, record: Record) -> Record {
        let mut record = self.keep_only(self.rename(record));

        if self.trim_whitespace.unwrap_or(false) {
            for value in record.data.values_mut() {
                if let Value::String(s) = value {
                    let trimmed = s.trim();
                    if trimmed.len() != s.len() {
                        *s = trimmed.to_string();
                    }
                }
            }
        }

        if let Some(fields) = &self.lowercase_fields {
            for field in fields {
                if let Some(Value::String(s)) = record.data.get_mut(field) {
                    *s = s.to_lowercase();
                }
            }
        }
        record
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Present, non-null and not blank.
    pub required_fields: Option<Vec<String>>,
    /// Maximum length in characters of the field's text form.
    pub max_length: Option<HashMap<String, usize>>,
}

impl RecordValidator for ValidationRule {
    fn validate(&self, record: &Record) -> bool {
        let required_ok = self.required_fields.iter().flatten().all(|field| {
            match record.get(field) {
                None | Some(Value::Null) => false,
                Some(value) => !value_to_text(value).trim().is_empty(),
            }
        });

        let lengths_ok = self.max_length.iter().flatten().all(|(field, max)| {
            record
                .get(field)
                .map_or(true, |value| value_to_text(value).chars().count() <= *max)
        });

        required_ok && lengths_ok
    }
}

/// Registers every configured rule into the catalog under its table name.
pub fn register_rules(
    catalog: &SpecCatalog,
    transforms: &HashMap<String, TransformRule>,
    validators: &HashMap<String, ValidationRule>,
) {
    for (name, rule) in transforms {
        catalog.register_transform(name, TransformSpec::object(rule.clone()));
        tracing::debug!("Registered transform '{}'", name);
    }
    for (name, rule) in validators {
        catalog.register_validator(name, ValidateSpec::object(rule.clone()));
        tracing::debug!("Registered validator '{}'", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transform_steps() {
        let rule = TransformRule {
            field_mapping: Some(HashMap::from([("E-Mail".to_string(), "email".to_string())])),
            keep_only_fields: Some(vec!["email".to_string(), "name".to_string()]),
            trim_whitespace: Some(true),
            lowercase_fields: Some(vec!["email".to_string()]),
        };
        let record = Record::from_pairs([
            ("name", json!("  Ada ")),
            ("E-Mail", json!(" ADA@Example.com")),
            ("internal", json!(42)),
        ]);

        let out = rule.transform(record);
        assert_eq!(
            out,
            Record::from_pairs([("name", "Ada"), ("email", "ada@example.com")])
        );
        let keys: Vec<&String> = out.keys().collect();
        assert_eq!(keys, vec!["name", "email"]);
    }

    #[test]
    fn test_rename_onto_existing_field() {
        let rule = TransformRule {
            field_mapping: Some(HashMap::from([
                ("E-Mail".to_string(), "email".to_string()),
                ("mail".to_string(), "email".to_string()),
            ])),
            ..TransformRule::default()
        };
        let record = Record::from_pairs([
            ("email", "old@example.com"),
            ("E-Mail", "new@example.com"),
            ("mail", "other@example.com"),
            ("name", "Ada"),
        ]);

        let out = rule.transform(record);
        assert_eq!(
            out,
            Record::from_pairs([("email", "new@example.com"), ("name", "Ada")])
        );
    }

    #[test]
    fn test_required_fields() {
        let rule = ValidationRule {
            required_fields: Some(vec!["email".to_string()]),
            max_length: None,
        };
        assert!(rule.validate(&Record::from_pairs([("email", "a@b.c")])));
        assert!(!rule.validate(&Record::from_pairs([("email", "   ")])));
        assert!(!rule.validate(&Record::from_pairs([("email", Value::Null)])));
        assert!(!rule.validate(&Record::new()));
    }

    #[test]
    fn test_max_length() {
        let rule = ValidationRule {
            required_fields: None,
            max_length: Some(HashMap::from([("code".to_string(), 3)])),
        };
        assert!(rule.validate(&Record::from_pairs([("code", "abc")])));
        assert!(!rule.validate(&Record::from_pairs([("code", "abcd")])));
        assert!(rule.validate(&Record::new()));
    }

    #[test]
    fn test_register_rules() {
        let catalog = SpecCatalog::new();
        register_rules(
            &catalog,
            &HashMap::from([("clean".to_string(), TransformRule::default())]),
            &HashMap::from([("strict".to_string(), ValidationRule::default())]),
        );
        assert!(catalog.has_transform("clean"));
        assert!(catalog.has_validator("strict"));
    }
}
