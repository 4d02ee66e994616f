use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use brewfile_backup::app::{self, Components};
use brewfile_backup::artifact::{Artifact, ArtifactSource};
use brewfile_backup::backup::{
    BackupCtx, BackupEvent, EventSink, Outcome, RecordingSink, Route, run_backup,
};
use brewfile_backup::credentials::{CredentialProvider, Token, TokenSource};
use brewfile_backup::remote::{RemoteRef, RemoteStore};
use brewfile_backup::state::{BackupState, JsonFileStore, StateStore};
use brewfile_backup::{Error, ErrorKind, Result};

#[derive(Default)]
struct FakeRemote {
    live: RefCell<Vec<String>>,
    created: Cell<usize>,
    updated: RefCell<Vec<String>>,
    exists_calls: Cell<usize>,
    fail_mutations: bool,
}

impl FakeRemote {
    fn with_live(ids: &[&str]) -> Self {
        Self {
            live: RefCell::new(ids.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }
}

impl RemoteStore for FakeRemote {
    fn create(&self, _content: &str) -> Result<RemoteRef> {
        if self.fail_mutations {
            return Err(Error::msg("boom"));
        }
        let n = self.created.get() + 1;
        self.created.set(n);
        let id = format!("g{n}");
        self.live.borrow_mut().push(id.clone());
        Ok(RemoteRef {
            url: format!("https://gist.example/{id}"),
            id,
        })
    }

    fn update(&self, id: &str, _content: &str) -> Result<Option<String>> {
        if self.fail_mutations {
            return Err(Error::msg("boom"));
        }
        self.updated.borrow_mut().push(id.to_string());
        Ok(None)
    }

    fn exists(&self, id: &str) -> bool {
        self.exists_calls.set(self.exists_calls.get() + 1);
        self.live.borrow().iter().any(|l| l == id)
    }
}

/// Reads from the real state file, but every save goes to a path that cannot be renamed over.
struct BrokenSave {
    good: JsonFileStore,
    blocked: JsonFileStore,
}

impl StateStore for BrokenSave {
    fn load(&self) -> Result<BackupState> {
        self.good.load()
    }

    fn save(&self, state: &BackupState) -> Result<()> {
        self.blocked.save(state)
    }
}

fn fixed_clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 2, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn ctx(force: bool, dry_run: bool) -> (BackupCtx, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let mut ctx = BackupCtx::new(force, dry_run, sink.clone());
    ctx.clock = fixed_clock;
    (ctx, sink)
}

fn seed(dir: &Path, body: &str) -> (PathBuf, JsonFileStore) {
    let p = dir.join("state.json");
    fs::write(&p, body).expect("seed state");
    (p.clone(), JsonFileStore::new(p))
}

fn temp_leftovers(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .expect("read dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.contains(".tmp."))
        .collect()
}

const PRIOR: &str =
    r#"{"remote_id":"X","remote_url":"https://gist.example/X","content_digest":"d0"}"#;

#[test]
fn first_run_creates_once_without_probing() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (p, store) = seed(tmp.path(), "{}");
    let remote = FakeRemote::default();
    let (ctx, _) = ctx(false, false);
    let artifact = Artifact::with_digest("tap x\nbrew y\n", "d1");

    let prior = store.load().expect("load");
    let out = run_backup(&ctx, &prior, &artifact, &remote, &store).expect("run");

    assert!(matches!(out, Outcome::Created { ref replaced, .. } if replaced.is_none()));
    assert_eq!(remote.exists_calls.get(), 0);
    assert_eq!(remote.created.get(), 1);

    let v: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&p).expect("read")).expect("json");
    assert_eq!(v["remote_id"], "g1");
    assert_eq!(v["remote_url"], "https://gist.example/g1");
    assert_eq!(v["content_digest"], "d1");
    assert_eq!(v["last_backup_at"], "2026-10-17T02:00:00Z");
}

#[test]
fn digest_only_record_still_creates() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (_, store) = seed(tmp.path(), r#"{"content_digest":"d0"}"#);
    let remote = FakeRemote::default();
    let (ctx, _) = ctx(false, false);

    let prior = store.load().expect("load");
    let out = run_backup(&ctx, &prior, &Artifact::with_digest("x", "d1"), &remote, &store)
        .expect("run");
    assert!(matches!(out, Outcome::Created { .. }));
    assert_eq!(remote.exists_calls.get(), 0);
    assert_eq!(store.load().expect("reload").remote_id.as_deref(), Some("g1"));
}

#[test]
fn unchanged_digest_skips_and_leaves_state_alone() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (p, store) = seed(tmp.path(), PRIOR);
    let before = fs::read(&p).expect("read");
    let remote = FakeRemote::with_live(&["X"]);
    let (ctx, sink) = ctx(false, false);

    let prior = store.load().expect("load");
    let out = run_backup(&ctx, &prior, &Artifact::with_digest("x", "d0"), &remote, &store)
        .expect("run");

    assert_eq!(
        out,
        Outcome::Skipped {
            digest: "d0".into()
        }
    );
    assert_eq!(fs::read(&p).expect("read"), before);
    assert_eq!(remote.exists_calls.get(), 0);
    assert_eq!(remote.created.get(), 0);
    assert_eq!(
        sink.events(),
        vec![BackupEvent::Unchanged {
            digest: "d0".into()
        }]
    );
}

#[test]
fn force_bypasses_the_skip() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (_, store) = seed(tmp.path(), PRIOR);
    let remote = FakeRemote::with_live(&["X"]);
    let (ctx, _) = ctx(true, false);

    let prior = store.load().expect("load");
    let out = run_backup(&ctx, &prior, &Artifact::with_digest("x", "d0"), &remote, &store)
        .expect("run");

    assert!(matches!(out, Outcome::Updated { ref id, .. } if id == "X"));
    assert_eq!(remote.exists_calls.get(), 1);
    assert_eq!(*remote.updated.borrow(), vec!["X".to_string()]);
}

#[test]
fn stale_reference_creates_a_new_remote() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (_, store) = seed(tmp.path(), PRIOR);
    let remote = FakeRemote::default();
    let (ctx, sink) = ctx(false, false);

    let prior = store.load().expect("load");
    let out = run_backup(&ctx, &prior, &Artifact::with_digest("x", "d1"), &remote, &store)
        .expect("run");

    let Outcome::Created {
        remote: created,
        replaced,
        ..
    } = out.clone()
    else {
        panic!("expected create, got {out:?}");
    };
    assert_ne!(created.id, "X");
    assert_eq!(replaced.as_deref(), Some("X"));
    assert!(
        sink.events()
            .contains(&BackupEvent::StaleReference { id: "X".into() })
    );

    let after = store.load().expect("reload");
    assert_eq!(after.remote_id.as_deref(), Some(created.id.as_str()));
    assert_eq!(after.content_digest.as_deref(), Some("d1"));
}

#[test]
fn update_keeps_the_id_and_falls_back_to_recorded_url() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (_, store) = seed(tmp.path(), PRIOR);
    let remote = FakeRemote::with_live(&["X"]);
    let (ctx, _) = ctx(false, false);

    let prior = store.load().expect("load");
    let out = run_backup(&ctx, &prior, &Artifact::with_digest("x", "d1"), &remote, &store)
        .expect("run");

    assert_eq!(
        out,
        Outcome::Updated {
            id: "X".into(),
            url: "https://gist.example/X".into(),
            digest: "d1".into(),
        }
    );
    assert_eq!(remote.created.get(), 0);
    let after = store.load().expect("reload");
    assert_eq!(after.remote_id.as_deref(), Some("X"));
    assert_eq!(after.content_digest.as_deref(), Some("d1"));
    assert_eq!(after.last_backup_at.as_deref(), Some("2026-10-17T02:00:00Z"));
}

#[test]
fn dry_run_leaves_no_trace_on_either_route() {
    for live in [&["X"][..], &[][..]] {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (p, store) = seed(tmp.path(), PRIOR);
        let before = fs::read(&p).expect("read");
        let remote = FakeRemote::with_live(live);
        let (ctx, _) = ctx(false, true);

        let prior = store.load().expect("load");
        let out = run_backup(&ctx, &prior, &Artifact::with_digest("x", "d1"), &remote, &store)
            .expect("run");

        let Outcome::DryRun { route, .. } = out.clone() else {
            panic!("expected dry run, got {out:?}");
        };
        if live.is_empty() {
            assert_eq!(
                route,
                Route::Create {
                    stale_id: Some("X".into())
                }
            );
        } else {
            assert_eq!(route, Route::Update { id: "X".into() });
        }
        assert_eq!(remote.exists_calls.get(), 1);
        assert_eq!(remote.created.get(), 0);
        assert!(remote.updated.borrow().is_empty());
        assert_eq!(fs::read(&p).expect("read"), before);
        assert!(temp_leftovers(tmp.path()).is_empty());
    }
}

#[test]
fn remote_failure_is_an_api_error_and_state_is_untouched() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (p, store) = seed(tmp.path(), PRIOR);
    let before = fs::read(&p).expect("read");
    let remote = FakeRemote {
        fail_mutations: true,
        ..FakeRemote::with_live(&["X"])
    };
    let (ctx, _) = ctx(false, false);

    let prior = store.load().expect("load");
    let err = run_backup(&ctx, &prior, &Artifact::with_digest("x", "d1"), &remote, &store)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteApi);
    assert_eq!(err.exit_code(), 3);
    assert_eq!(fs::read(&p).expect("read"), before);
}

#[test]
fn persist_failure_after_upload_is_a_state_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (p, good) = seed(tmp.path(), "{}");
    let before = fs::read(&p).expect("read");
    let blocked_path = tmp.path().join("blocked.json");
    fs::create_dir_all(blocked_path.join("occupied")).expect("block target");
    let store = BrokenSave {
        good,
        blocked: JsonFileStore::new(&blocked_path),
    };
    let remote = FakeRemote::default();
    let (ctx, sink) = ctx(false, false);

    let prior = store.load().expect("load");
    let err = run_backup(&ctx, &prior, &Artifact::with_digest("x", "d1"), &remote, &store)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(err.exit_code(), 4);
    assert!(err.message().contains("g1"));
    assert_eq!(remote.created.get(), 1);
    assert_eq!(fs::read(&p).expect("read"), before);
    assert!(temp_leftovers(tmp.path()).is_empty());
    assert!(
        sink.events()
            .iter()
            .any(|e| matches!(e, BackupEvent::PersistFailed { id, .. } if id == "g1"))
    );
}

struct StaticToken(Option<&'static str>);

impl TokenSource for StaticToken {
    fn name(&self) -> String {
        "static".into()
    }

    fn fetch(&self) -> Option<Token> {
        self.0.and_then(Token::new)
    }
}

struct StaticArtifact(std::result::Result<&'static str, &'static str>);

impl ArtifactSource for StaticArtifact {
    fn generate(&self) -> Result<Artifact> {
        match self.0 {
            Ok(content) => Ok(Artifact::from_content(content)),
            Err(msg) => Err(Error::msg(msg)),
        }
    }
}

fn run_app(
    store: &dyn StateStore,
    token: Option<&'static str>,
    artifact: StaticArtifact,
    remote: &FakeRemote,
) -> Result<app::RunReport> {
    let credentials =
        CredentialProvider::with_sources(vec![Box::new(StaticToken(token))], "gh", "GITHUB_TOKEN");
    let live = remote.live.borrow().clone();
    let connect = move |_: &Token| -> Result<Box<dyn RemoteStore>> {
        Ok(Box::new(FakeRemote::with_live(
            &live.iter().map(String::as_str).collect::<Vec<_>>(),
        )))
    };
    let (ctx, _) = ctx(false, false);
    app::run(
        &ctx,
        Components {
            store,
            credentials: &credentials,
            source: &artifact,
            connect: &connect,
        },
    )
}

#[test]
fn runner_maps_component_failures_to_their_kinds() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (p, store) = seed(tmp.path(), PRIOR);
    let before = fs::read(&p).expect("read");
    let remote = FakeRemote::with_live(&["X"]);

    let err = run_app(&store, None, StaticArtifact(Ok("x")), &remote).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(err.exit_code(), 1);

    let err = run_app(&store, Some("t0k"), StaticArtifact(Err("brew missing")), &remote)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Generation);
    assert_eq!(err.exit_code(), 2);

    assert_eq!(fs::read(&p).expect("read"), before);
}

#[test]
fn runner_reports_size_of_the_uploaded_artifact() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (_, store) = seed(tmp.path(), "{}");
    let remote = FakeRemote::default();

    let report =
        run_app(&store, Some("t0k"), StaticArtifact(Ok("tap x\nbrew y\n")), &remote).expect("run");
    assert!(report.outcome.uploaded());
    assert_eq!(report.bytes, 13);
    assert_eq!(report.lines, 2);
    assert!(app::format_report(&report).starts_with("status: created\n"));
}

#[test]
fn recording_sink_forwards_to_inner() {
    let inner = Arc::new(RecordingSink::default());
    let outer = RecordingSink::forwarding(inner.clone());
    outer.emit(BackupEvent::Persisted { id: "g1".into() });
    assert_eq!(inner.events(), outer.events());
    assert_eq!(inner.events().len(), 1);
}
