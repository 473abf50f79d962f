use crate::utils::error::{EtlError, Result};

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_one_of(field_name: &str, value: &str, allowed: &[&str]) -> Result<()> {
    if !allowed.contains(&value.to_ascii_lowercase().as_str()) {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Expected one of: {}", allowed.join(", ")),
        });
    }
    Ok(())
}

/// A name referenced from one config section must be declared in another.
pub fn validate_reference<'a, I>(field_name: &str, name: &str, declared: I) -> Result<()>
where
    I: IntoIterator<Item = &'a String>,
{
    if declared.into_iter().any(|known| known == name) {
        return Ok(());
    }
    Err(EtlError::ConfigValidationError {
        field: field_name.to_string(),
        message: format!("'{}' is not declared", name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("checkpoints.directory", "./state").is_ok());
        assert!(validate_path("checkpoints.directory", "").is_err());
        assert!(validate_path("checkpoints.directory", "bad\0path").is_err());
    }

    #[test]
    fn test_validate_one_of() {
        assert!(validate_one_of("logging.level", "DEBUG", &["debug", "info"]).is_ok());
        assert!(validate_one_of("logging.level", "loud", &["debug", "info"]).is_err());
    }

    #[test]
    fn test_validate_reference() {
        let declared = vec!["clean".to_string()];
        assert!(validate_reference("templates[0].transform", "clean", &declared).is_ok());
        assert!(validate_reference("templates[0].transform", "dirty", &declared).is_err());
        assert!(validate_non_empty_string("templates[0].name", "  ").is_err());
    }
}
