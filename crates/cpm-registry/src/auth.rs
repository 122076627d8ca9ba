//! Registry credentials handed to the helper executable.
//!
//! Credentials are appended to every helper invocation as global flags.
//! Secrets never reach logs: `Debug` masks them, and command lines are only
//! logged through [`crate::security::redact_command_for_log`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Credentials for the registry.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Credentials {
    /// No authentication.
    #[default]
    None,

    /// Username/password pair.
    Basic { username: String, password: String },

    /// Bearer token.
    Bearer { token: String },
}

impl Credentials {
    /// Build credentials from optional config values.
    ///
    /// A complete username/password pair wins over a token; blank values
    /// count as absent.
    pub fn from_parts(
        username: Option<String>,
        password: Option<String>,
        token: Option<String>,
    ) -> Self {
        let present = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        match (present(username), present(password), present(token)) {
            (Some(username), Some(password), _) => Self::Basic { username, password },
            (_, _, Some(token)) => Self::Bearer { token },
            _ => Self::None,
        }
    }

    /// Create from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `CPM_OCI_USERNAME` | Registry username |
    /// | `CPM_OCI_PASSWORD` | Registry password |
    /// | `CPM_OCI_TOKEN` | Bearer token |
    pub fn from_env() -> Self {
        Self::from_parts(
            std::env::var("CPM_OCI_USERNAME").ok(),
            std::env::var("CPM_OCI_PASSWORD").ok(),
            std::env::var("CPM_OCI_TOKEN").ok(),
        )
    }

    /// Helper flags carrying these credentials.
    pub(crate) fn flags(&self) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::Basic { username, password } => vec![
                "--username".to_string(),
                username.clone(),
                "--password".to_string(),
                password.clone(),
            ],
            Self::Bearer { token } => vec!["--token".to_string(), token.clone()],
        }
    }

    /// Check if authentication is configured.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::Bearer { .. } => f.debug_struct("Bearer").field("token", &"***").finish(),
        }
    }
}
