//! Fake registry helper for integration tests.
//!
//! Each helper is a `/bin/sh` script in its own temp dir. Every invocation
//! appends its arguments (space-joined) to `calls.log`; `@LOG@` and `@DIR@`
//! in the script body expand to the log path and the temp dir.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use cpm_registry::RegistryClientConfig;
use tempfile::TempDir;

pub struct FakeHelper {
    dir: TempDir,
    pub path: PathBuf,
    log: PathBuf,
}

impl FakeHelper {
    pub fn new(body: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake-oras");
        let log = dir.path().join("calls.log");

        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$*\" >> '@LOG@'\n{}\n",
            body
        )
        .replace("@LOG@", &log.display().to_string())
        .replace("@DIR@", &dir.path().display().to_string());

        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self { dir, path, log }
    }

    /// Client config pointing at this helper: one attempt, no backoff.
    pub fn config(&self) -> RegistryClientConfig {
        RegistryClientConfig::default()
            .with_helper(&self.path)
            .with_retries(1, 0.0)
    }

    /// Scratch directory owned by this helper (removed with it).
    pub fn work_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Every recorded invocation, in order.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    /// Number of invocations starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

pub fn digest(c: char) -> String {
    format!("sha256:{}", c.to_string().repeat(64))
}

/// `discover` output satisfying the default strict policy (SLSA level 3).
pub const FULL_REFERRERS: &str = r#"{"manifests":[{"digest":"sha256:1111111111111111111111111111111111111111111111111111111111111111","artifactType":"application/vnd.dev.cosign.artifact.sig.v1+json"},{"digest":"sha256:2222222222222222222222222222222222222222222222222222222222222222","artifactType":"application/spdx+json"},{"digest":"sha256:3333333333333333333333333333333333333333333333333333333333333333","artifactType":"application/vnd.in-toto+json","annotations":{"predicate":"SLSA level 3"}}]}"#;
