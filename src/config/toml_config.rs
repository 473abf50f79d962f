use crate::core::rules::{TransformRule, ValidationRule};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_one_of, validate_path, validate_reference, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    pub checkpoints: Option<CheckpointConfig>,
    pub audit: Option<AuditConfig>,
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub transforms: HashMap<String, TransformRule>,
    #[serde(default)]
    pub validators: HashMap<String, ValidationRule>,
    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    pub chunk_size: Option<usize>,
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub path: String,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub json: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub transform: Option<String>,
    pub validate: Option<String>,
    pub chunk_size: Option<usize>,
}

impl RelayConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unset variables are left as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").map_err(|e| EtlError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.into_owned())
    }

    pub fn chunk_size(&self) -> Option<usize> {
        self.defaults.chunk_size
    }

    pub fn actor(&self) -> Option<&str> {
        self.defaults.actor.as_deref()
    }

    pub fn checkpoint_dir(&self) -> Option<&str> {
        self.checkpoints.as_ref().map(|c| c.directory.as_str())
    }

    pub fn audit_path(&self) -> Option<&str> {
        self.audit
            .as_ref()
            .filter(|a| a.enabled)
            .map(|a| a.path.as_str())
    }

    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|l| l.level.as_deref())
    }

    pub fn json_logs(&self) -> bool {
        self.logging
            .as_ref()
            .and_then(|l| l.json)
            .unwrap_or(false)
    }

    pub fn validate_config(&self) -> Result<()> {
        if let Some(dir) = self.checkpoint_dir() {
            validate_path("checkpoints.directory", dir)?;
        }
        if let Some(path) = self.audit_path() {
            validate_path("audit.path", path)?;
        }
        if let Some(level) = self.log_level() {
            validate_one_of("logging.level", level, &LOG_LEVELS)?;
        }

        let mut seen = HashSet::new();
        for (i, template) in self.templates.iter().enumerate() {
            validate_non_empty_string(&format!("templates[{}].name", i), &template.name)?;
            validate_non_empty_string(&format!("templates[{}].type", i), &template.type_tag)?;
            if !seen.insert(template.name.as_str()) {
                return Err(EtlError::ConfigValidationError {
                    field: format!("templates[{}].name", i),
                    message: format!("duplicate template '{}'", template.name),
                });
            }
            if let Some(name) = &template.transform {
                validate_reference(&format!("templates[{}].transform", i), name, self.transforms.keys())?;
            }
            if let Some(name) = &template.validate {
                validate_reference(&format!("templates[{}].validate", i), name, self.validators.keys())?;
            }
        }

        Ok(())
    }
}

impl Validate for RelayConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
