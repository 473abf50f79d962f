use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Unsupported type: {tag}")]
    UnsupportedType { tag: String },

    #[error("Source not readable: {location}: {message}")]
    SourceUnreadable { location: String, message: String },

    #[error("Malformed source {location}: {message}")]
    MalformedSource { location: String, message: String },

    #[error("Destination not writable: {location}: {message}")]
    DestinationUnwritable { location: String, message: String },

    #[error("Could not detect a format for: {location}")]
    AutoDetectFailed { location: String },

    #[error("Invalid transform/validate spec: {message}")]
    InvalidSpec { message: String },

    #[error("Record at unit {unit} failed validation")]
    ValidationFailed { unit: u64 },

    #[error("Template not found: {name}")]
    TemplateNotFound { name: String },

    #[error("Access denied: {action} on {resource}")]
    AccessDenied { action: String, resource: String },

    #[error("Checkpoint {name} could not be written: {message}")]
    CheckpointUnwritable { name: String, message: String },

    #[error("Run cancelled at unit {unit}")]
    Cancelled { unit: u64 },

    #[error("Queue error: {message}")]
    Queue { message: String },

    #[error("Event handler failed: {message}")]
    Observer { message: String },

    #[error("Background task failed: {message}")]
    Task { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration in {field}: {message}")]
    ConfigValidationError { field: String, message: String },
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Format,
    Storage,
    Data,
    Pipeline,
    Security,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn observer(message: impl Into<String>) -> Self {
        Self::Observer {
            message: message.into(),
        }
    }

    pub fn source_unreadable(location: &str, err: impl std::fmt::Display) -> Self {
        Self::SourceUnreadable {
            location: location.to_string(),
            message: err.to_string(),
        }
    }

    pub fn malformed(location: &str, err: impl std::fmt::Display) -> Self {
        Self::MalformedSource {
            location: location.to_string(),
            message: err.to_string(),
        }
    }

    pub fn unwritable(location: &str, err: impl std::fmt::Display) -> Self {
        Self::DestinationUnwritable {
            location: location.to_string(),
            message: err.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedType { .. } | Self::AutoDetectFailed { .. } => ErrorCategory::Format,
            Self::SourceUnreadable { .. }
            | Self::DestinationUnwritable { .. }
            | Self::CheckpointUnwritable { .. }
            | Self::IoError(_) => ErrorCategory::Storage,
            Self::MalformedSource { .. }
            | Self::ValidationFailed { .. }
            | Self::SerializationError(_) => ErrorCategory::Data,
            Self::InvalidSpec { .. }
            | Self::TemplateNotFound { .. }
            | Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. } => ErrorCategory::Configuration,
            Self::Cancelled { .. }
            | Self::Queue { .. }
            | Self::Observer { .. }
            | Self::Task { .. } => ErrorCategory::Pipeline,
            Self::AccessDenied { .. } => ErrorCategory::Security,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ValidationFailed { .. } => ErrorSeverity::Low,
            Self::Cancelled { .. } | Self::Queue { .. } => ErrorSeverity::Medium,
            Self::CheckpointUnwritable { .. } | Self::IoError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    /// Whether a later run with the same checkpoint name can pick up where this one stopped.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnreadable { .. }
                | Self::DestinationUnwritable { .. }
                | Self::Cancelled { .. }
                | Self::Observer { .. }
                | Self::IoError(_)
        )
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            Self::UnsupportedType { .. } => {
                "Use one of csv, json, xml, sql, excel, model, object or auto".to_string()
            }
            Self::AutoDetectFailed { .. } => {
                "Pass an explicit type instead of auto, or use a known file suffix".to_string()
            }
            Self::SourceUnreadable { .. } => {
                "Check that the source exists and is readable".to_string()
            }
            Self::MalformedSource { .. } => {
                "Check the source encoding matches the selected type".to_string()
            }
            Self::DestinationUnwritable { .. } => {
                "Check the destination path and its permissions".to_string()
            }
            Self::InvalidSpec { .. } => {
                "Register the named transformer/validator before using it".to_string()
            }
            Self::TemplateNotFound { .. } => "Register the template first".to_string(),
            Self::AccessDenied { .. } => "Ask for the required permission".to_string(),
            Self::CheckpointUnwritable { .. } => {
                "Check the checkpoint directory is writable".to_string()
            }
            Self::Cancelled { .. } => {
                "Re-run with the same checkpoint name to resume".to_string()
            }
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. } => "Fix the configuration file".to_string(),
            _ => "Inspect the logs for details".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Format => format!("Format problem: {}", self),
            ErrorCategory::Storage => format!("Storage problem: {}", self),
            ErrorCategory::Data => format!("Data problem: {}", self),
            ErrorCategory::Pipeline => format!("Pipeline stopped: {}", self),
            ErrorCategory::Security => format!("Not allowed: {}", self),
        }
    }
}
