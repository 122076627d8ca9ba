//! Error types for packet resolution and distribution.

use std::path::PathBuf;

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Helper invocation failed, timed out, returned unparsable output,
    /// or a pulled artifact exceeded the size cap.
    #[error("registry protocol error: {message}")]
    Protocol { message: String },

    /// Registry host is not allow-listed, or a path escaped its root.
    #[error("security policy violation: {message}")]
    Security { message: String },

    /// Malformed packet metadata document.
    #[error("invalid packet metadata: {message}")]
    MetadataValidation { message: String },

    /// Malformed or unsupported locator, or strict trust-policy rejection.
    #[error("invalid locator '{locator}': {reason}")]
    Locator { locator: String, reason: String },

    /// Expected payload directory or metadata document is absent.
    #[error("payload missing at {}: {reason}", path.display())]
    PayloadMissing { path: PathBuf, reason: String },

    /// Local cache or staging filesystem failure.
    #[error("cache error: {message}")]
    Cache { message: String },

    /// Unreadable workspace configuration.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl RegistryError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn locator(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Locator {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn metadata(message: impl Into<String>) -> Self {
        Self::MetadataValidation {
            message: message.into(),
        }
    }

    pub(crate) fn cache(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Cache {
            message: format!("{}: {}", context, err),
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Locator / config issues
            Self::Locator { .. } => 1,
            Self::Config { .. } => 1,

            // Security issues
            Self::Security { .. } => 3,
            Self::MetadataValidation { .. } => 4,

            // Registry / transport
            Self::Protocol { .. } => 5,

            // Local state
            Self::PayloadMissing { .. } => 6,
            Self::Cache { .. } => 6,
        }
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_error_carries_locator_and_reason() {
        let err = RegistryError::locator("oci://", "empty reference");
        assert_eq!(err.to_string(), "invalid locator 'oci://': empty reference");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_payload_missing_display() {
        let err = RegistryError::PayloadMissing {
            path: PathBuf::from("/tmp/artifact/payload"),
            reason: "payload directory not found".to_string(),
        };
        assert!(err.to_string().contains("/tmp/artifact/payload"));
        assert_eq!(err.exit_code(), 6);
    }
}
