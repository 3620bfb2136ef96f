use serde::Serialize;

/// Structured trace events emitted across all coderelay crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionSaved {
        repo_name: String,
        session_id: String,
        token: String,
    },
    SessionRemoved {
        repo_name: String,
        session_id: String,
        file_deleted: bool,
        tokens_scrubbed: usize,
    },
    SessionsReindexed {
        repos: usize,
        sessions: usize,
        skipped: usize,
    },
    TokenGenerated {
        token: String,
        attempts: u32,
    },
    RunnerInvoked {
        runner: String,
        session_key: String,
        resumed: bool,
        workdir: String,
    },
    ResumeFallback {
        session_key: String,
    },
    ContinuationCaptured {
        session_key: String,
        continuation_id: String,
    },
    RunnerSessionsCleared {
        key: Option<String>,
    },
    CodexSessionImported {
        thread_id: String,
        repo_name: String,
        token: String,
        added_repo: bool,
    },
    ContinuationMapMigrated {
        migrated: usize,
        seeded: usize,
        unresolved: usize,
    },
    InboundRejected {
        channel: String,
        chat_id: String,
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cr_event");
    }
}
