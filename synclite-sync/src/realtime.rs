//! Realtime delta merging.
//!
//! The [`RealtimeMerger`] consumes the adapter's delta stream and applies
//! each change through the same merge path as batch pull, so realtime and
//! pull converge identically. Deltas for a record with a push in flight are
//! parked until that push settles; the server's response to the push is the
//! authoritative ordering, and merging the delta first would race it.
//!
//! On disconnect the merger re-subscribes from the last durably-merged
//! cursors with backoff. A dropped delta is therefore never lost, only
//! deferred to the resumed stream or the next pull.

use crate::adapter::{BackendAdapter, RemoteDelta};
use crate::auth::TokenManager;
use crate::config::BackoffConfig;
use crate::error::{SyncError, SyncResult};
use crate::merge::RemoteMerger;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use synclite_store::{LocalStore, MutationOutbox};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Tracks records with a push in flight and parks their realtime deltas
/// until the push settles.
#[derive(Default)]
pub(crate) struct InFlightTracker {
    inner: Mutex<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    active: HashSet<(String, String)>,
    parked: HashMap<(String, String), VecDeque<RemoteDelta>>,
}

impl InFlightTracker {
    /// Marks records as having a push in flight.
    pub(crate) fn begin(&self, keys: impl Iterator<Item = (String, String)>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            inner.active.insert(key);
        }
    }

    /// Clears the in-flight marks and returns any deltas parked while the
    /// push was out, in arrival order.
    pub(crate) fn finish(&self, keys: impl Iterator<Item = (String, String)>) -> Vec<RemoteDelta> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut drained = Vec::new();
        for key in keys {
            inner.active.remove(&key);
            if let Some(queue) = inner.parked.remove(&key) {
                drained.extend(queue);
            }
        }
        drained
    }

    /// Hands a delta back for immediate merging, or parks it when its
    /// record has a push in flight.
    pub(crate) fn admit(&self, delta: RemoteDelta) -> Option<RemoteDelta> {
        let key = (delta.collection.clone(), delta.record.id.to_string());
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.active.contains(&key) {
            debug!(collection = %key.0, id = %key.1, "parking delta behind in-flight push");
            inner.parked.entry(key).or_default().push_back(delta);
            None
        } else {
            Some(delta)
        }
    }
}

/// Long-running consumer of the backend's realtime delta stream.
///
/// Built by `SyncEngine::realtime_merger` and run on its own task.
pub struct RealtimeMerger<A: BackendAdapter, S> {
    adapter: Arc<A>,
    store: Arc<S>,
    tokens: Arc<TokenManager<A>>,
    merger: RemoteMerger<S>,
    tracker: Arc<InFlightTracker>,
    collections: Vec<String>,
    backoff: BackoffConfig,
    shutdown: watch::Receiver<bool>,
}

impl<A, S> RealtimeMerger<A, S>
where
    A: BackendAdapter,
    S: LocalStore + MutationOutbox + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        adapter: Arc<A>,
        store: Arc<S>,
        tokens: Arc<TokenManager<A>>,
        merger: RemoteMerger<S>,
        tracker: Arc<InFlightTracker>,
        collections: Vec<String>,
        backoff: BackoffConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            adapter,
            store,
            tokens,
            merger,
            tracker,
            collections,
            backoff,
            shutdown,
        }
    }

    /// Runs until shutdown, re-subscribing on disconnect. Returns `Err` only
    /// for storage failures; network and auth trouble is retried with
    /// backoff.
    pub async fn run(mut self) -> SyncResult<()> {
        let mut reconnect_attempt: u32 = 0;
        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            match self.run_stream().await {
                Ok(StreamEnd::Shutdown) => return Ok(()),
                Ok(StreamEnd::Disconnected) => {
                    reconnect_attempt = reconnect_attempt.saturating_add(1);
                }
                Err(err @ SyncError::Storage(_)) => return Err(err),
                Err(err) => {
                    warn!(error = %err, "realtime stream failed, will reconnect");
                    reconnect_attempt = reconnect_attempt.saturating_add(1);
                }
            }

            let delay = self.backoff.delay_for_attempt(reconnect_attempt.saturating_sub(1));
            debug!(delay_ms = delay.as_millis() as u64, "realtime reconnect backoff");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => return Ok(()),
            }
        }
    }

    /// Subscribes from the current durable cursors and merges deltas until
    /// the stream ends or shutdown is signalled.
    async fn run_stream(&mut self) -> SyncResult<StreamEnd> {
        let token = self.tokens.valid_token().await?;
        let mut resume = Vec::with_capacity(self.collections.len());
        for collection in &self.collections {
            resume.push((collection.clone(), self.store.cursor(collection)?));
        }

        let mut stream = self.adapter.subscribe(resume, &token).await?;
        info!(backend = self.adapter.backend_name(), "realtime stream connected");

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(delta)) => {
                        if let Some(delta) = self.tracker.admit(delta) {
                            self.merger.merge_delta(&delta)?;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "realtime stream error");
                        return Ok(StreamEnd::Disconnected);
                    }
                    None => {
                        info!("realtime stream closed by backend");
                        return Ok(StreamEnd::Disconnected);
                    }
                },
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        return Ok(StreamEnd::Shutdown);
                    }
                }
            }
        }
    }
}

enum StreamEnd {
    Disconnected,
    Shutdown,
}
