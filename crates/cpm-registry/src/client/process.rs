//! Helper process layer: command assembly, timeout, retry.
//!
//! This is the ONLY place that spawns the registry helper. client/mod.rs
//! never looks at exit codes.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::digest::extract_digest;
use crate::error::RegistryError;
use crate::security::redact_command_for_log;
use crate::types::RegistryClientConfig;

/// Captured output of a successful helper run.
#[derive(Debug)]
pub(crate) struct HelperOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl HelperOutput {
    pub(crate) fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// First digest printed on stdout, else on stderr.
    pub(crate) fn digest(&self) -> Option<String> {
        extract_digest(&self.stdout_text()).or_else(|| extract_digest(&self.stderr))
    }
}

/// Why a helper invocation ultimately failed.
#[derive(Debug)]
pub(crate) enum HelperError {
    /// The helper executable does not exist. Never retried.
    NotInstalled { helper: String },

    /// Every attempt exited non-zero, timed out, or could not be spawned.
    Failed { message: String },
}

impl From<HelperError> for RegistryError {
    fn from(err: HelperError) -> Self {
        match err {
            HelperError::NotInstalled { helper } => RegistryError::protocol(format!(
                "{} CLI not found. Install ORAS and ensure it is available in PATH.",
                helper
            )),
            HelperError::Failed { message } => RegistryError::protocol(message),
        }
    }
}

/// Outcome of one attempt.
enum Attempt {
    Exited { code: Option<i32>, stderr: String },
    TimedOut,
    SpawnFailed(std::io::Error),
}

/// Helper backend (holds the client configuration).
#[derive(Debug, Clone)]
pub(crate) struct HelperBackend {
    pub(crate) config: RegistryClientConfig,
}

impl HelperBackend {
    /// Full command line: helper, operation args, then global transport/auth flags.
    fn command_line(&self, args: &[String]) -> Vec<String> {
        let mut command = Vec::with_capacity(args.len() + 5);
        command.push(self.config.helper.to_string_lossy().into_owned());
        command.extend(args.iter().cloned());
        if self.config.insecure {
            command.push("--insecure".to_string());
        }
        command.extend(self.config.credentials.flags());
        command
    }

    /// Run the helper with retry and linear backoff.
    pub(crate) async fn run(
        &self,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<HelperOutput, HelperError> {
        let command = self.command_line(args);
        let redacted = redact_command_for_log(&command).join(" ");
        let max_attempts = self.config.attempts();
        let timeout = self.config.timeout();

        let mut attempt = 1;
        loop {
            debug!(attempt, max_attempts, cmd = %redacted, "running registry helper");

            let failure = match self.run_once(&command, cwd).await {
                Ok(output) => return Ok(output),
                Err(Attempt::SpawnFailed(e)) if e.kind() == ErrorKind::NotFound => {
                    return Err(HelperError::NotInstalled {
                        helper: command[0].clone(),
                    });
                }
                Err(Attempt::Exited { code, stderr }) => {
                    format_failure(&redacted, code, &stderr)
                }
                Err(Attempt::TimedOut) => format!(
                    "registry helper timed out after {:.1}s cmd='{}'",
                    timeout.as_secs_f64(),
                    redacted
                ),
                Err(Attempt::SpawnFailed(e)) => {
                    format!("failed to start registry helper: {} cmd='{}'", e, redacted)
                }
            };

            if attempt >= max_attempts {
                return Err(HelperError::Failed { message: failure });
            }

            let backoff = self.config.backoff_after(attempt);
            warn!(
                error = %failure,
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis(),
                "retrying registry helper"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn run_once(&self, command: &[String], cwd: Option<&Path>) -> Result<HelperOutput, Attempt> {
        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(Attempt::SpawnFailed)?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.config.timeout(), child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Attempt::SpawnFailed(e)),
            Err(_) => return Err(Attempt::TimedOut),
        };

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            Ok(HelperOutput {
                stdout: output.stdout,
                stderr,
            })
        } else {
            Err(Attempt::Exited {
                code: output.status.code(),
                stderr,
            })
        }
    }
}

fn format_failure(redacted: &str, code: Option<i32>, stderr: &str) -> String {
    let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
    let detail = stderr.trim();
    if detail.is_empty() {
        format!("registry helper failed (exit={}) cmd='{}'", code, redacted)
    } else {
        format!(
            "registry helper failed (exit={}) cmd='{}' err='{}'",
            code, redacted, detail
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;

    fn backend(config: RegistryClientConfig) -> HelperBackend {
        HelperBackend { config }
    }

    #[test]
    fn test_global_flags_are_appended() {
        let mut config = RegistryClientConfig::default().with_credentials(Credentials::Bearer {
            token: "tok".to_string(),
        });
        config.insecure = true;

        let line = backend(config).command_line(&["resolve".to_string(), "r/x:1".to_string()]);
        assert_eq!(line, vec!["oras", "resolve", "r/x:1", "--insecure", "--token", "tok"]);
    }

    #[test]
    fn test_failure_message_is_redacted_input() {
        let msg = format_failure("oras push --password ***", Some(1), "  denied \n");
        assert_eq!(
            msg,
            "registry helper failed (exit=1) cmd='oras push --password ***' err='denied'"
        );
    }

    #[tokio::test]
    async fn test_missing_helper_is_not_retried() {
        let config = RegistryClientConfig::default()
            .with_helper("/nonexistent/cpm-registry-helper")
            .with_retries(3, 5.0);
        let started = std::time::Instant::now();

        let err = backend(config).run(&["resolve".to_string()], None).await.unwrap_err();
        assert!(matches!(err, HelperError::NotInstalled { .. }));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));

        let err: RegistryError = err.into();
        assert!(err.to_string().contains("Install ORAS"));
    }
}
