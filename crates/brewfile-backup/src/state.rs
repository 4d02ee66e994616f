use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// The single persisted record. Unknown keys ride along in `extra` so they survive a
/// rewrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupState {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "non_empty")]
    pub remote_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "non_empty")]
    pub remote_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "non_empty")]
    pub content_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "non_empty")]
    pub last_backup_at: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn non_empty<'de, D>(d: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match v {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    })
}

impl BackupState {
    /// Record written after a successful upload. `extra` is carried over from `prior`.
    pub fn uploaded(
        prior: &BackupState,
        remote_id: &str,
        remote_url: &str,
        digest: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            remote_id: Some(remote_id.to_string()),
            remote_url: Some(remote_url.to_string()),
            content_digest: Some(digest.to_string()),
            last_backup_at: Some(at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            extra: prior.extra.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.remote_id.is_none()
            && self.remote_url.is_none()
            && self.content_digest.is_none()
            && self.last_backup_at.is_none()
            && self.extra.is_empty()
    }

    /// Overwrite only the keys set in `changes`.
    pub fn apply(&mut self, changes: &BackupState) {
        if let Some(v) = &changes.remote_id {
            self.remote_id = Some(v.clone());
        }
        if let Some(v) = &changes.remote_url {
            self.remote_url = Some(v.clone());
        }
        if let Some(v) = &changes.content_digest {
            self.content_digest = Some(v.clone());
        }
        if let Some(v) = &changes.last_backup_at {
            self.last_backup_at = Some(v.clone());
        }
        for (k, v) in &changes.extra {
            self.extra.insert(k.clone(), v.clone());
        }
    }
}

pub trait StateStore {
    fn load(&self) -> Result<BackupState>;
    /// Replace the stored record wholesale. Must be all-or-nothing.
    fn save(&self, state: &BackupState) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load, apply `changes`, save. Not used by the backup run itself, which always writes
    /// the full record.
    pub fn merge(&self, changes: &BackupState) -> Result<BackupState> {
        let mut state = self.load()?;
        state.apply(changes);
        self.save(&state)?;
        Ok(state)
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<BackupState> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no existing state file");
                return Ok(BackupState::default());
            }
            Err(e) => {
                return Err(Error::state(format!(
                    "failed to read state file {}: {e}",
                    self.path.display()
                )));
            }
        };

        // Bytes that are not UTF-8 are just another flavour of invalid JSON.
        let value = match serde_json::from_slice::<serde_json::Value>(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "state file is corrupted (invalid JSON): {e}; starting with empty state"
                );
                return Ok(BackupState::default());
            }
        };
        if !value.is_object() {
            tracing::warn!(
                path = %self.path.display(),
                "state file is not a JSON object; starting with empty state"
            );
            return Ok(BackupState::default());
        }
        let state = serde_json::from_value::<BackupState>(value).map_err(|e| {
            Error::state(format!(
                "failed to decode state file {}: {e}",
                self.path.display()
            ))
        })?;
        tracing::debug!(path = %self.path.display(), "loaded state");
        Ok(state)
    }

    fn save(&self, state: &BackupState) -> Result<()> {
        let mut body = serde_json::to_string_pretty(state)
            .map_err(|e| Error::state(format!("failed to encode state: {e}")))?;
        body.push('\n');
        atomic_write_private(&self.path, body.as_bytes()).map_err(|e| {
            tracing::error!(path = %self.path.display(), "failed to save state: {e}");
            Error::state(format!(
                "failed to save state {}: {e}",
                self.path.display()
            ))
        })?;
        tracing::debug!(path = %self.path.display(), "saved state");
        Ok(())
    }
}

/// Write to a sibling temp file (mode 0600), fsync, then rename over `path`. The temp file
/// is removed on any failure, so `path` is either the old content or the new content.
fn atomic_write_private(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| Error::state(format!("failed to create {}: {e}", parent.display())))?;
    }
    let file_name = path.file_name().and_then(|s| s.to_str()).ok_or_else(|| {
        Error::state(format!(
            "invalid file path for atomic write: {}",
            path.display()
        ))
    })?;
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));

    let res = write_and_rename(&tmp, path, body);
    if res.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    res
}

fn write_and_rename(tmp: &Path, path: &Path, body: &[u8]) -> Result<()> {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut f = opts
        .open(tmp)
        .map_err(|e| Error::state(format!("failed to create temp file {}: {e}", tmp.display())))?;
    f.write_all(body)
        .and_then(|_| f.sync_all())
        .map_err(|e| Error::state(format!("failed to write temp file {}: {e}", tmp.display())))?;
    // Permissions are settled on the temp file; once renamed, the record is committed.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        f.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::state(format!("failed to restrict {}: {e}", tmp.display())))?;
    }
    drop(f);

    fs::rename(tmp, path).map_err(|e| {
        Error::state(format!(
            "failed to rename {} -> {}: {e}",
            tmp.display(),
            path.display()
        ))
    })
}
