//! The skip / create / update decision and its state transitions.
//!
//! One call to [`run_backup`] walks the state machine once:
//!
//! ```text
//! digest compare ──same, !force──▶ Skipped
//!        │
//!        ▼
//! resolve target ── no id ─────────────▶ Create
//!        │       ── id, exists ────────▶ Update(id)
//!        │       ── id, not confirmed ─▶ Create (stale reference)
//!        ▼
//! dry-run gate ──dry_run──▶ DryRun (nothing written anywhere)
//!        │
//!        ▼
//! mutate remote ──▶ persist full record ──▶ Created / Updated
//! ```
//!
//! Failures never touch the state store. A failure after the remote mutation succeeded is
//! reported as a state error, never as an API error, because retrying it would create a
//! duplicate remote resource.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::artifact::Artifact;
use crate::error::{Error, ErrorKind, Result};
use crate::remote::{RemoteRef, RemoteStore};
use crate::state::{BackupState, StateStore};

pub const FALLBACK_URL_BASE: &str = "https://gist.github.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `stale_id` is the recorded id that could not be confirmed, if any.
    Create { stale_id: Option<String> },
    Update { id: String },
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Create { stale_id: None } => write!(f, "create"),
            Route::Create {
                stale_id: Some(id),
            } => write!(f, "create (replacing stale {id})"),
            Route::Update { id } => write!(f, "update {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped {
        digest: String,
    },
    DryRun {
        route: Route,
        digest: String,
    },
    Created {
        remote: RemoteRef,
        replaced: Option<String>,
        digest: String,
    },
    Updated {
        id: String,
        url: String,
        digest: String,
    },
}

impl Outcome {
    pub fn uploaded(&self) -> bool {
        matches!(self, Outcome::Created { .. } | Outcome::Updated { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupEvent {
    Unchanged {
        digest: String,
    },
    ChangeDetected {
        previous: Option<String>,
        current: String,
        forced: bool,
    },
    StaleReference {
        id: String,
    },
    RouteChosen {
        route: Route,
    },
    DryRunStopped {
        route: Route,
        bytes: usize,
        lines: usize,
    },
    Uploaded {
        id: String,
        url: String,
    },
    Persisted {
        id: String,
    },
    PersistFailed {
        id: String,
        error: String,
    },
}

pub trait EventSink {
    fn emit(&self, ev: BackupEvent);
}

/// Forwards every event to `tracing`.
#[derive(Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, ev: BackupEvent) {
        match ev {
            BackupEvent::Unchanged { digest } => {
                tracing::info!(%digest, "content unchanged since last backup; skipping upload (use --force to upload anyway)");
            }
            BackupEvent::ChangeDetected {
                previous,
                current,
                forced,
            } => match previous {
                Some(prev) if prev == current && forced => {
                    tracing::info!("content unchanged but --force given; proceeding with upload")
                }
                Some(_) => tracing::info!("content has changed; proceeding with upload"),
                None => tracing::info!("no previous backup found"),
            },
            BackupEvent::StaleReference { id } => {
                tracing::warn!(%id, "previous Gist not found; creating a new one");
            }
            BackupEvent::RouteChosen { route } => tracing::debug!(%route, "route chosen"),
            BackupEvent::DryRunStopped {
                route,
                bytes,
                lines,
            } => {
                tracing::info!(%route, bytes, lines, "dry run: skipping upload");
            }
            BackupEvent::Uploaded { id, url } => tracing::info!(%id, %url, "upload complete"),
            BackupEvent::Persisted { id } => tracing::debug!(%id, "state recorded"),
            BackupEvent::PersistFailed { id, error } => {
                tracing::error!(
                    %id,
                    "upload succeeded but local state was not recorded; the next run will not know about this Gist: {error}"
                );
            }
        }
    }
}

/// Keeps every event, in order. Also forwards to an inner sink if given.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<BackupEvent>>,
    inner: Option<Arc<dyn EventSink>>,
}

impl RecordingSink {
    pub fn forwarding(inner: Arc<dyn EventSink>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            inner: Some(inner),
        }
    }

    pub fn events(&self) -> Vec<BackupEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, ev: BackupEvent) {
        if let Some(inner) = &self.inner {
            inner.emit(ev.clone());
        }
        if let Ok(mut g) = self.events.lock() {
            g.push(ev);
        }
    }
}

/// Per-run flags and collaborators that are not the remote or the store.
#[derive(Clone)]
pub struct BackupCtx {
    pub force: bool,
    pub dry_run: bool,
    pub sink: Arc<dyn EventSink>,
    pub clock: fn() -> DateTime<Utc>,
}

impl BackupCtx {
    pub fn new(force: bool, dry_run: bool, sink: Arc<dyn EventSink>) -> Self {
        Self {
            force,
            dry_run,
            sink,
            clock: Utc::now,
        }
    }

    fn emit(&self, ev: BackupEvent) {
        self.sink.emit(ev);
    }
}

pub fn run_backup(
    ctx: &BackupCtx,
    prior: &BackupState,
    artifact: &Artifact,
    remote: &dyn RemoteStore,
    store: &dyn StateStore,
) -> Result<Outcome> {
    let digest = artifact.digest().to_string();

    if !ctx.force && prior.content_digest.as_deref() == Some(digest.as_str()) {
        ctx.emit(BackupEvent::Unchanged {
            digest: digest.clone(),
        });
        return Ok(Outcome::Skipped { digest });
    }
    ctx.emit(BackupEvent::ChangeDetected {
        previous: prior.content_digest.clone(),
        current: digest.clone(),
        forced: ctx.force,
    });

    let route = resolve_target(ctx, prior, remote);
    ctx.emit(BackupEvent::RouteChosen {
        route: route.clone(),
    });

    if ctx.dry_run {
        ctx.emit(BackupEvent::DryRunStopped {
            route: route.clone(),
            bytes: artifact.byte_len(),
            lines: artifact.line_count(),
        });
        return Ok(Outcome::DryRun { route, digest });
    }

    match route {
        Route::Create { stale_id } => {
            let created = remote
                .create(artifact.content())
                .map_err(|e| e.with_kind(ErrorKind::RemoteApi))?;
            ctx.emit(BackupEvent::Uploaded {
                id: created.id.clone(),
                url: created.url.clone(),
            });
            persist(ctx, store, prior, &created.id, &created.url, &digest)?;
            Ok(Outcome::Created {
                remote: created,
                replaced: stale_id,
                digest,
            })
        }
        Route::Update { id } => {
            let fresh_url = remote
                .update(&id, artifact.content())
                .map_err(|e| e.with_kind(ErrorKind::RemoteApi))?;
            let url = fresh_url
                .or_else(|| prior.remote_url.clone())
                .unwrap_or_else(|| format!("{FALLBACK_URL_BASE}/{id}"));
            ctx.emit(BackupEvent::Uploaded {
                id: id.clone(),
                url: url.clone(),
            });
            persist(ctx, store, prior, &id, &url, &digest)?;
            Ok(Outcome::Updated { id, url, digest })
        }
    }
}

fn resolve_target(ctx: &BackupCtx, prior: &BackupState, remote: &dyn RemoteStore) -> Route {
    // A digest without an id is a partial record; it never implies a remote resource.
    let Some(id) = prior.remote_id.as_deref() else {
        return Route::Create { stale_id: None };
    };
    if remote.exists(id) {
        return Route::Update { id: id.to_string() };
    }
    ctx.emit(BackupEvent::StaleReference { id: id.to_string() });
    Route::Create {
        stale_id: Some(id.to_string()),
    }
}

fn persist(
    ctx: &BackupCtx,
    store: &dyn StateStore,
    prior: &BackupState,
    id: &str,
    url: &str,
    digest: &str,
) -> Result<()> {
    let next = BackupState::uploaded(prior, id, url, digest, (ctx.clock)());
    match store.save(&next) {
        Ok(()) => {
            ctx.emit(BackupEvent::Persisted { id: id.to_string() });
            Ok(())
        }
        Err(e) => {
            ctx.emit(BackupEvent::PersistFailed {
                id: id.to_string(),
                error: e.to_string(),
            });
            Err(Error::state(format!(
                "Gist {id} was uploaded but local state could not be saved: {e}\n\n\
                 Fix the state file location before the next run, otherwise a duplicate Gist \
                 will be created."
            )))
        }
    }
}
