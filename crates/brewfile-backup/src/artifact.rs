use std::fs;
use std::process::Command;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::config::GeneratorSettings;
use crate::error::{Error, Result};
use crate::log_sanitize::sanitize_log_line;
use crate::process::{ProcessError, find_program, run_with_timeout};

const INSTALL_HINT: &str = "Homebrew not found. Please install Homebrew first:\n\
/bin/bash -c \"$(curl -fsSL https://raw.githubusercontent.com/Homebrew/install/HEAD/install.sh)\"\n\n\
Common Homebrew locations:\n  - macOS Intel: /usr/local/bin/brew\n  - macOS Apple Silicon: /opt/homebrew/bin/brew\n\n\
Make sure Homebrew is in your PATH.";

/// A generated manifest and its digest. Built only from complete content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    content: String,
    digest: String,
}

impl Artifact {
    pub fn from_content(content: impl Into<String>) -> Self {
        let content = content.into();
        let digest = sha256_hex(content.as_bytes());
        Self { content, digest }
    }

    /// For callers that already hold a digest (tests, replays).
    pub fn with_digest(content: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            digest: digest.into(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn byte_len(&self) -> usize {
        self.content.len()
    }

    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub trait ArtifactSource {
    fn generate(&self) -> Result<Artifact>;
}

/// `brew bundle dump` into a scratch directory.
pub struct BrewBundleGenerator {
    program: String,
    version_timeout: Duration,
    dump_timeout: Duration,
}

impl BrewBundleGenerator {
    pub fn from_settings(s: &GeneratorSettings) -> Self {
        Self {
            program: s.program.clone(),
            version_timeout: Duration::from_secs(s.version_timeout_secs.max(1)),
            dump_timeout: Duration::from_secs(s.dump_timeout_secs.max(1)),
        }
    }

    fn check_installed(&self) -> Result<()> {
        let Some(path) = find_program(&self.program) else {
            tracing::error!(program = %self.program, "Homebrew not found in PATH");
            return Err(Error::generation(INSTALL_HINT));
        };
        tracing::debug!(path = %path.display(), "found Homebrew");

        let mut cmd = Command::new(&self.program);
        cmd.arg("--version");
        let out = run_with_timeout(cmd, self.version_timeout).map_err(|e| match e {
            ProcessError::TimedOut(..) => Error::generation("Homebrew version check timed out"),
            other => Error::generation(format!("Error verifying Homebrew: {other}")),
        })?;
        if !out.success() {
            return Err(Error::generation(format!(
                "Homebrew check failed: {}",
                sanitize_log_line(&out.summary())
            )));
        }
        if let Some(version) = out.stdout.lines().next() {
            tracing::debug!(version = %version.trim(), "Homebrew version");
        }
        Ok(())
    }

    fn dump(&self) -> Result<String> {
        let scratch = tempfile::Builder::new()
            .prefix("brewfile-backup.")
            .tempdir()
            .map_err(|e| Error::generation(format!("failed to create scratch directory: {e}")))?;
        let target = scratch.path().join("Brewfile");
        tracing::debug!(file = %target.display(), "running brew bundle dump");

        let mut cmd = Command::new(&self.program);
        cmd.arg("bundle")
            .arg("dump")
            .arg("--force")
            .arg(format!("--file={}", target.display()));
        let out = run_with_timeout(cmd, self.dump_timeout).map_err(|e| match e {
            ProcessError::TimedOut(_, t) => Error::generation(format!(
                "brew bundle dump timed out after {} seconds",
                t.as_secs()
            )),
            other => Error::generation(format!(
                "Unexpected error running brew bundle dump: {other}"
            )),
        })?;

        if !out.success() {
            let msg = format!(
                "brew bundle dump failed ({}): {}",
                out.status,
                sanitize_log_line(&out.stderr)
            );
            tracing::error!("{msg}");
            return Err(Error::generation(msg));
        }
        for line in out.stderr.lines() {
            let line = sanitize_log_line(line);
            if !line.is_empty() {
                tracing::warn!("brew stderr: {line}");
            }
        }

        if !target.is_file() {
            return Err(Error::generation(format!(
                "Brewfile was not created at: {}",
                target.display()
            )));
        }
        let content = fs::read_to_string(&target)
            .map_err(|e| Error::generation(format!("Error reading Brewfile: {e}")))?;
        if let Err(e) = scratch.close() {
            tracing::warn!("failed to clean up scratch directory: {e}");
        }
        Ok(content)
    }
}

impl ArtifactSource for BrewBundleGenerator {
    fn generate(&self) -> Result<Artifact> {
        tracing::debug!("starting Brewfile generation");
        self.check_installed()?;
        let content = self.dump()?;
        if content.trim().is_empty() {
            tracing::warn!("generated Brewfile is empty (no packages installed?)");
        }
        let artifact = Artifact::from_content(content);
        tracing::info!(
            bytes = artifact.byte_len(),
            lines = artifact.line_count(),
            "generated Brewfile"
        );
        tracing::debug!(digest = %artifact.digest(), "Brewfile digest");
        Ok(artifact)
    }
}
