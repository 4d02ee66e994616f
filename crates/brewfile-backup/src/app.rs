use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::artifact::{ArtifactSource, BrewBundleGenerator};
use crate::backup::{BackupCtx, Outcome, Route, run_backup};
use crate::config::Settings;
use crate::credentials::{CredentialProvider, Token};
use crate::error::{ErrorKind, Result};
use crate::paths::AppPaths;
use crate::remote::{GistClient, RemoteStore};
use crate::state::{BackupState, JsonFileStore, StateStore};

pub type Connect<'a> = dyn Fn(&Token) -> Result<Box<dyn RemoteStore>> + 'a;

/// Everything a run talks to, so the real wiring and the test wiring share one code path.
pub struct Components<'a> {
    pub store: &'a dyn StateStore,
    pub credentials: &'a CredentialProvider,
    pub source: &'a dyn ArtifactSource,
    pub connect: &'a Connect<'a>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: Outcome,
    pub bytes: usize,
    pub lines: usize,
    pub elapsed_ms: u128,
}

pub fn run(ctx: &BackupCtx, c: Components<'_>) -> Result<RunReport> {
    let started = Instant::now();
    tracing::info!(force = ctx.force, dry_run = ctx.dry_run, "starting Brewfile backup");

    let prior = c
        .store
        .load()
        .map_err(|e| e.with_kind(ErrorKind::State))?;

    tracing::info!("step 1/4: authenticating with GitHub");
    let token = c.credentials.token()?;

    tracing::info!("step 2/4: generating Brewfile");
    let artifact = c
        .source
        .generate()
        .map_err(|e| e.with_kind(ErrorKind::Generation))?;

    tracing::info!("step 3/4: checking for changes");
    let remote = (c.connect)(&token)?;

    let outcome = run_backup(ctx, &prior, &artifact, remote.as_ref(), c.store)?;
    if outcome.uploaded() {
        tracing::info!("step 4/4: upload recorded");
    }

    Ok(RunReport {
        outcome,
        bytes: artifact.byte_len(),
        lines: artifact.line_count(),
        elapsed_ms: started.elapsed().as_millis(),
    })
}

/// Production wiring: `gh`/env token, `brew bundle dump`, the Gist API and the JSON state
/// file at `state_path`.
pub fn run_default(ctx: &BackupCtx, settings: &Settings, state_path: &Path) -> Result<RunReport> {
    let store = JsonFileStore::new(state_path);
    let credentials = CredentialProvider::from_settings(&settings.auth);
    let source = BrewBundleGenerator::from_settings(&settings.generator);
    let connect = |token: &Token| -> Result<Box<dyn RemoteStore>> {
        Ok(Box::new(GistClient::new(token, &settings.remote)?))
    };
    run(
        ctx,
        Components {
            store: &store,
            credentials: &credentials,
            source: &source,
            connect: &connect,
        },
    )
}

/// State file location: `--state-file`, then `[state] file`, then the default.
pub fn resolve_state_path(
    paths: &AppPaths,
    settings: &Settings,
    cli_override: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(p) = cli_override {
        return Ok(p.to_path_buf());
    }
    match settings.state.file.as_deref() {
        Some(raw) => paths.resolve(raw),
        None => Ok(paths.state_file()),
    }
}

pub fn format_report(report: &RunReport) -> String {
    let mut out = String::new();
    let size = format!("{} bytes ({} lines)", report.bytes, report.lines);
    match &report.outcome {
        Outcome::Skipped { digest } => {
            out.push_str("status: unchanged (skipped)\n");
            out.push_str(&format!("  hash: {digest}\n"));
        }
        Outcome::DryRun { route, digest } => {
            out.push_str("status: dry run (nothing uploaded)\n");
            let would = match route {
                Route::Create { stale_id: None } => "create a new Gist".to_string(),
                Route::Create {
                    stale_id: Some(id),
                } => format!("create a new Gist (previous {id} not found)"),
                Route::Update { id } => format!("update Gist {id}"),
            };
            out.push_str(&format!("  would: {would}\n"));
            out.push_str(&format!("  size: {size}\n"));
            out.push_str(&format!("  hash: {digest}\n"));
        }
        Outcome::Created {
            remote,
            replaced,
            digest,
        } => {
            out.push_str("status: created\n");
            if let Some(old) = replaced {
                out.push_str(&format!("  replaced: {old} (not found)\n"));
            }
            out.push_str(&format!("  gist id: {}\n", remote.id));
            out.push_str(&format!("  gist url: {}\n", remote.url));
            out.push_str(&format!("  size: {size}\n"));
            out.push_str(&format!("  hash: {digest}\n"));
        }
        Outcome::Updated { id, url, digest } => {
            out.push_str("status: updated\n");
            out.push_str(&format!("  gist id: {id}\n"));
            out.push_str(&format!("  gist url: {url}\n"));
            out.push_str(&format!("  size: {size}\n"));
            out.push_str(&format!("  hash: {digest}\n"));
        }
    }
    out.push_str(&format!("  elapsed: {}ms\n", report.elapsed_ms));
    out
}

pub fn format_status(state: &BackupState, path: &Path) -> String {
    let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());
    let mut out = String::new();
    out.push_str(&format!("state file: {}\n", path.display()));
    if state.remote_id.is_none() {
        out.push_str("  no backup recorded yet\n");
    }
    out.push_str(&format!("  gist id: {}\n", show(&state.remote_id)));
    out.push_str(&format!("  gist url: {}\n", show(&state.remote_url)));
    out.push_str(&format!("  hash: {}\n", show(&state.content_digest)));
    out.push_str(&format!("  last backup: {}\n", show(&state.last_backup_at)));
    out
}
