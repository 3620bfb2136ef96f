use std::path::{Path, PathBuf};

use cr_gateway::codex_sync::{CodexSync, ImportOptions, ImportOutcome};
use cr_runners::RunnerSessionMap;
use cr_sessions::{ChannelKind, ConversationSource, SessionStore};

struct Fixture {
    _dir: tempfile::TempDir,
    store: SessionStore,
    map: RunnerSessionMap,
    codex_dir: PathBuf,
    api: PathBuf,
    web: PathBuf,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let codex_dir = dir.path().join("codex");
    let api = dir.path().join("work").join("api");
    let web = dir.path().join("work").join("web");
    for d in [&codex_dir, &api, &web] {
        tokio::fs::create_dir_all(d).await.unwrap();
    }
    let root = dir.path().join("store");
    let store = SessionStore::new(&root).with_conversations(ConversationSource::new(&codex_dir));
    store.register_repo("api", &api).await.unwrap();
    let map = RunnerSessionMap::new(root.join("codex-session-map.json"));
    Fixture {
        store,
        map,
        codex_dir,
        api,
        web,
        _dir: dir,
    }
}

async fn transcript(fx: &Fixture, id: &str, cwd: Option<&Path>) {
    let meta = serde_json::json!({
        "type": "session_meta",
        "payload": {
            "id": id,
            "cwd": cwd,
            "timestamp": "2026-02-01T09:00:00Z",
            "model_provider": "openai",
            "cli_version": "0.41.0"
        }
    });
    let message = serde_json::json!({
        "type": "response_item",
        "payload": {"type": "message", "role": "user", "content": [{"type": "input_text", "text": "tidy the build"}]}
    });
    let body = format!("{meta}\n{message}\n");
    tokio::fs::write(fx.codex_dir.join(format!("rollout-{id}.jsonl")), body)
        .await
        .unwrap();
}

fn outcome_for<'a>(outcomes: &'a [ImportOutcome], id: &str) -> &'a ImportOutcome {
    outcomes
        .iter()
        .find(|o| match o {
            ImportOutcome::Imported { thread_id, .. }
            | ImportOutcome::AlreadyImported { thread_id, .. }
            | ImportOutcome::WouldImport { thread_id, .. }
            | ImportOutcome::Skipped { thread_id, .. } => thread_id == id,
        })
        .unwrap()
}

#[tokio::test]
async fn import_creates_codex_sessions_for_registered_repos() {
    let fx = fixture().await;
    transcript(&fx, "t-api", Some(&fx.api)).await;
    transcript(&fx, "t-web", Some(&fx.web)).await;
    transcript(&fx, "t-bare", None).await;
    let sync = CodexSync::new(&fx.store, &fx.map);

    assert_eq!(sync.list().await.len(), 3);
    let outcomes = sync.import_all(&ImportOptions::default()).await.unwrap();

    let ImportOutcome::Imported { repo, token, added_repo, .. } = outcome_for(&outcomes, "t-api")
    else {
        panic!("t-api should be imported: {outcomes:?}");
    };
    assert_eq!(repo, "api");
    assert!(!added_repo);
    assert!(matches!(outcome_for(&outcomes, "t-web"), ImportOutcome::Skipped { .. }));
    assert!(matches!(outcome_for(&outcomes, "t-bare"), ImportOutcome::Skipped { .. }));

    let record = fx
        .store
        .find_session_by_token(token.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.id, "t-api");
    assert_eq!(record.kind(), ChannelKind::Codex);
    let codex = record.codex.unwrap();
    assert_eq!(codex.session_id, "t-api");
    assert_eq!(codex.model_provider.as_deref(), Some("openai"));
    assert_eq!(codex.cli_version.as_deref(), Some("0.41.0"));
    assert_eq!(fx.map.get(token.as_str()).await.as_deref(), Some("t-api"));

    let again = sync.find("t-api").await.unwrap();
    let second = sync.import(&again, &ImportOptions::default()).await.unwrap();
    assert_eq!(
        second,
        ImportOutcome::AlreadyImported {
            thread_id: "t-api".into(),
            token: token.clone(),
        }
    );
    assert_eq!(fx.store.list_tokens(None).await.len(), 1);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let fx = fixture().await;
    transcript(&fx, "t-web", Some(&fx.web)).await;
    let sync = CodexSync::new(&fx.store, &fx.map);

    let options = ImportOptions {
        auto_add: true,
        dry_run: true,
        ..ImportOptions::default()
    };
    let outcomes = sync.import_all(&options).await.unwrap();
    assert_eq!(
        outcomes,
        vec![ImportOutcome::WouldImport {
            thread_id: "t-web".into(),
            repo: "web".into(),
            add_repo: true,
        }]
    );
    assert_eq!(fx.store.list_repos().await.len(), 1);
    assert!(fx.store.list_tokens(None).await.is_empty());
    assert!(fx.map.entries().await.is_empty());
}

#[tokio::test]
async fn auto_add_registers_the_working_directory() {
    let fx = fixture().await;
    transcript(&fx, "t-web", Some(&fx.web)).await;
    let sync = CodexSync::new(&fx.store, &fx.map);

    let meta = sync.find("t-web").await.unwrap();
    let options = ImportOptions {
        auto_add: true,
        ..ImportOptions::default()
    };
    let outcome = sync.import(&meta, &options).await.unwrap();
    assert!(matches!(
        outcome,
        ImportOutcome::Imported { ref repo, added_repo: true, .. } if repo == "web"
    ));
    let repo = fx.store.repo("web").await.unwrap();
    assert_eq!(repo.path, tokio::fs::canonicalize(&fx.web).await.unwrap());
}

#[tokio::test]
async fn explicit_repo_and_session_key() {
    let fx = fixture().await;
    transcript(&fx, "t-bare", None).await;
    let sync = CodexSync::new(&fx.store, &fx.map);

    let meta = sync.find("t-bare").await.unwrap();
    let options = ImportOptions {
        repo: Some("api".into()),
        session_key: Some("telegram:7".into()),
        ..ImportOptions::default()
    };
    let outcome = sync.import(&meta, &options).await.unwrap();
    let ImportOutcome::Imported { token, .. } = outcome else {
        panic!("expected import, got {outcome:?}");
    };
    assert_eq!(fx.map.get("telegram:7").await.as_deref(), Some("t-bare"));
    assert!(!fx.map.has(token.as_str()).await);

    let missing = ImportOptions {
        repo: Some("nope".into()),
        ..ImportOptions::default()
    };
    assert!(matches!(
        sync.import(&meta, &missing).await.unwrap(),
        ImportOutcome::AlreadyImported { .. }
    ));
}

#[tokio::test]
async fn migrate_map_moves_legacy_keys_and_seeds_tokens() {
    let fx = fixture().await;
    transcript(&fx, "t-api", Some(&fx.api)).await;
    transcript(&fx, "t-old", Some(&fx.api)).await;
    let sync = CodexSync::new(&fx.store, &fx.map);

    // A record imported earlier whose map entry has since been cleared.
    let meta = sync.find("t-old").await.unwrap();
    let ImportOutcome::Imported { token: old_token, .. } =
        sync.import(&meta, &ImportOptions::default()).await.unwrap()
    else {
        panic!("expected import");
    };
    fx.map.clear(old_token.as_str()).await.unwrap();

    fx.map.set("telegram:42", "t-api").await.unwrap();
    fx.map.set("line:9", "t-gone").await.unwrap();
    fx.map.set("ZZZZ9999", "t-other").await.unwrap();

    let preview = ImportOptions {
        dry_run: true,
        ..ImportOptions::default()
    };
    let report = sync.migrate_map(&preview).await.unwrap();
    assert_eq!(report.migrated, ["telegram:42"]);
    assert_eq!(report.unresolved, ["line:9"]);
    assert_eq!(report.seeded, 1);
    assert!(fx.map.has("telegram:42").await);
    assert!(!fx.map.has(old_token.as_str()).await);

    let report = sync.migrate_map(&ImportOptions::default()).await.unwrap();
    assert_eq!(report.migrated, ["telegram:42"]);
    assert_eq!(report.seeded, 1);

    assert!(!fx.map.has("telegram:42").await);
    assert_eq!(fx.map.get("line:9").await.as_deref(), Some("t-gone"));
    assert_eq!(fx.map.get("ZZZZ9999").await.as_deref(), Some("t-other"));
    assert_eq!(fx.map.get(old_token.as_str()).await.as_deref(), Some("t-old"));

    let api_session = fx.store.get_session_by_id("t-api").await.unwrap().unwrap();
    assert_eq!(
        fx.map.get(api_session.token.as_str()).await.as_deref(),
        Some("t-api")
    );
}
