use std::env;

use crate::ResearchFlowError;

/// Wrapper around an API key so it never shows up in `Debug` output or logs.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that a given environment variable is set and non-empty.
pub fn require_env(var: &str) -> Result<SecretValue, ResearchFlowError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretValue(value)),
        _ => Err(ResearchFlowError::MissingSecret(var.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_env_success() {
        unsafe { std::env::set_var("RESEARCHFLOW_TEST_SECRET", "value") };
        let secret = require_env("RESEARCHFLOW_TEST_SECRET").expect("secret should load");
        assert_eq!(secret.expose(), "value");
    }

    #[test]
    fn require_env_missing() {
        unsafe { std::env::remove_var("RESEARCHFLOW_TEST_SECRET_MISSING") };
        let err = require_env("RESEARCHFLOW_TEST_SECRET_MISSING").unwrap_err();
        assert!(matches!(err, ResearchFlowError::MissingSecret(_)));
    }

    #[test]
    fn blank_value_counts_as_missing() {
        unsafe { std::env::set_var("RESEARCHFLOW_TEST_SECRET_BLANK", "   ") };
        assert!(require_env("RESEARCHFLOW_TEST_SECRET_BLANK").is_err());
    }

    #[test]
    fn debug_output_is_redacted() {
        let secret = SecretValue::new("sk-live-abc");
        assert_eq!(format!("{secret:?}"), "***redacted***");
    }
}
