//! Errors returned to callers of the orchestrator.

use thiserror::Error;

/// Hard failures of an evaluation. Provider and cache trouble never ends up
/// here; those degrade the verdict instead.
#[derive(Debug, Error)]
pub enum EvaluateError {
    /// No detection provider is registered.
    #[error("at least one detection provider must be configured")]
    NoProviderConfigured,

    /// The input is not an IPv4 or IPv6 literal.
    #[error("not a valid IPv4 or IPv6 address: {0:?}")]
    InvalidAddress(String),
}

impl EvaluateError {
    /// Stable identifier for this kind of error.
    pub fn kind(&self) -> &'static str {
        match self {
            EvaluateError::NoProviderConfigured => "no_provider_configured",
            EvaluateError::InvalidAddress(_) => "invalid_address",
        }
    }

    /// Whether this is a validation-class error, answered with a client error.
    pub fn is_client_error(&self) -> bool {
        match self {
            EvaluateError::InvalidAddress(_) => true,
            EvaluateError::NoProviderConfigured => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(EvaluateError::NoProviderConfigured.kind(), "no_provider_configured");
        assert_eq!(
            EvaluateError::InvalidAddress("x".to_string()).kind(),
            "invalid_address"
        );
    }

    #[test]
    fn test_error_messages() {
        let err = EvaluateError::InvalidAddress("999.1.1.1".to_string());
        assert_eq!(
            err.to_string(),
            "not a valid IPv4 or IPv6 address: \"999.1.1.1\""
        );
        assert!(err.is_client_error());
        assert!(EvaluateError::NoProviderConfigured.is_client_error());
    }
}
