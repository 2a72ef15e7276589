#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use synclite_sync::{
    AuthToken, BackendAdapter, ChangeBatch, DeltaStream, PushOutcome, RemoteDelta, ResumePoint,
    SyncConfig, SyncResult,
};
use synclite_types::{HybridTimestamp, Mutation, Record, RecordId, SyncCursor, VersionToken};

/// Scriptable in-memory backend. Unscripted calls succeed with neutral
/// defaults: empty change batches, every push accepted.
#[derive(Default)]
pub struct MockAdapter {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    auth_script: VecDeque<SyncResult<AuthToken>>,
    refresh_script: VecDeque<SyncResult<AuthToken>>,
    fetch_script: VecDeque<SyncResult<ChangeBatch>>,
    push_script: VecDeque<SyncResult<Vec<PushOutcome>>>,
    deltas: Vec<SyncResult<RemoteDelta>>,
    fetch_delay: Option<Duration>,
    auth_calls: u32,
    refresh_calls: u32,
    version_counter: u32,
    pushed: Vec<Vec<Mutation>>,
    fetches: Vec<(String, Option<SyncCursor>)>,
    subscriptions: Vec<Vec<ResumePoint>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_auth(&self, result: SyncResult<AuthToken>) {
        self.state.lock().unwrap().auth_script.push_back(result);
    }

    pub fn script_refresh(&self, result: SyncResult<AuthToken>) {
        self.state.lock().unwrap().refresh_script.push_back(result);
    }

    pub fn script_fetch(&self, result: SyncResult<ChangeBatch>) {
        self.state.lock().unwrap().fetch_script.push_back(result);
    }

    pub fn script_push(&self, result: SyncResult<Vec<PushOutcome>>) {
        self.state.lock().unwrap().push_script.push_back(result);
    }

    pub fn script_delta(&self, result: SyncResult<RemoteDelta>) {
        self.state.lock().unwrap().deltas.push(result);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state.lock().unwrap().fetch_delay = Some(delay);
    }

    pub fn auth_calls(&self) -> u32 {
        self.state.lock().unwrap().auth_calls
    }

    pub fn refresh_calls(&self) -> u32 {
        self.state.lock().unwrap().refresh_calls
    }

    pub fn pushed_batches(&self) -> Vec<Vec<Mutation>> {
        self.state.lock().unwrap().pushed.clone()
    }

    pub fn fetches(&self) -> Vec<(String, Option<SyncCursor>)> {
        self.state.lock().unwrap().fetches.clone()
    }

    pub fn subscriptions(&self) -> Vec<Vec<ResumePoint>> {
        self.state.lock().unwrap().subscriptions.clone()
    }
}

#[async_trait]
impl BackendAdapter for MockAdapter {
    fn backend_name(&self) -> &'static str {
        "mock"
    }

    async fn authenticate(&self) -> SyncResult<AuthToken> {
        let mut state = self.state.lock().unwrap();
        state.auth_calls += 1;
        state
            .auth_script
            .pop_front()
            .unwrap_or_else(|| Ok(AuthToken::bearer("mock-token")))
    }

    async fn refresh(&self, _refresh_token: &str) -> SyncResult<AuthToken> {
        let mut state = self.state.lock().unwrap();
        state.refresh_calls += 1;
        state
            .refresh_script
            .pop_front()
            .unwrap_or_else(|| Ok(AuthToken::bearer("mock-refreshed")))
    }

    async fn fetch_changes(
        &self,
        collection: &str,
        cursor: Option<&SyncCursor>,
        _access_token: &str,
    ) -> SyncResult<ChangeBatch> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state
                .fetches
                .push((collection.to_string(), cursor.cloned()));
            state.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.fetch_script.pop_front().unwrap_or_else(|| {
            Ok(ChangeBatch {
                records: Vec::new(),
                next_cursor: cursor.cloned().unwrap_or_else(|| SyncCursor::new("cur-0")),
                has_more: false,
            })
        })
    }

    async fn push_mutations(
        &self,
        batch: &[Mutation],
        _access_token: &str,
    ) -> SyncResult<Vec<PushOutcome>> {
        let mut state = self.state.lock().unwrap();
        state.pushed.push(batch.to_vec());
        if let Some(scripted) = state.push_script.pop_front() {
            return scripted;
        }
        let outcomes = batch
            .iter()
            .map(|_| {
                state.version_counter += 1;
                PushOutcome::Accepted {
                    server_version: Some(VersionToken::new(format!(
                        "v{}",
                        state.version_counter
                    ))),
                }
            })
            .collect();
        Ok(outcomes)
    }

    async fn subscribe(
        &self,
        resume: Vec<ResumePoint>,
        _access_token: &str,
    ) -> SyncResult<DeltaStream> {
        let mut state = self.state.lock().unwrap();
        state.subscriptions.push(resume);
        let deltas = std::mem::take(&mut state.deltas);
        // Scripted deltas, then an open stream that never closes.
        Ok(stream::iter(deltas).chain(stream::pending()).boxed())
    }
}

// ── Builders ─────────────────────────────────────────────────────

/// A config tuned for tests: tiny backoff, no jitter, short timeout.
pub fn test_config(collections: &[&str]) -> SyncConfig {
    let mut config = SyncConfig::for_collections(collections.iter().copied());
    config.backoff.base = Duration::from_millis(1);
    config.backoff.max = Duration::from_millis(5);
    config.backoff.jitter = 0.0;
    config.call_timeout = Duration::from_millis(500);
    config
}

/// A server-side record revision.
pub fn server_record(collection: &str, id: &str, version: &str, wall: u64) -> Record {
    let mut fields = BTreeMap::new();
    fields.insert("title".to_string(), json!("from server"));
    let mut record = Record::new(
        collection,
        RecordId::from(id),
        fields,
        HybridTimestamp::new(wall, 0),
    );
    record.server_version = Some(VersionToken::new(version));
    record
}

pub fn batch_of(records: Vec<Record>, cursor: &str, has_more: bool) -> ChangeBatch {
    ChangeBatch {
        records,
        next_cursor: SyncCursor::new(cursor),
        has_more,
    }
}
