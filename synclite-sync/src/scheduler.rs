//! Background sync scheduling.
//!
//! The scheduler owns the engine on its own task and serializes all cycle
//! triggers through a command channel: periodic ticks, fire-and-forget
//! nudges from the host's write path, and explicit triggers that want the
//! cycle's report. After a failed cycle the periodic tick backs off
//! exponentially; an explicit trigger always runs immediately.

use crate::adapter::BackendAdapter;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::state::SyncReport;
use std::sync::Arc;
use std::time::Duration;
use synclite_store::{LocalStore, MutationOutbox};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

enum Command {
    /// Run a cycle now and report back. `None` syncs all configured
    /// collections.
    Trigger {
        collections: Option<Vec<String>>,
        reply: oneshot::Sender<SyncResult<SyncReport>>,
    },
    /// Run a cycle soon, nobody waiting (e.g. after a local write).
    Nudge,
    Shutdown,
}

/// Handle for talking to a running [`SyncScheduler`]. Cheap to clone.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    /// Runs a sync cycle and waits for its report. `None` syncs all
    /// configured collections.
    pub async fn trigger_sync(
        &self,
        collections: Option<Vec<String>>,
    ) -> SyncResult<SyncReport> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Trigger { collections, reply })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        response.await.map_err(|_| SyncError::ChannelClosed)?
    }

    /// Asks for a cycle soon without waiting for it. Dropped silently if
    /// the scheduler is gone or saturated.
    pub fn nudge(&self) {
        let _ = self.tx.try_send(Command::Nudge);
    }

    /// Stops the scheduler after the current cycle.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

/// Drives periodic and on-demand sync cycles for one engine.
pub struct SyncScheduler<A: BackendAdapter, S: LocalStore + MutationOutbox> {
    engine: Arc<SyncEngine<A, S>>,
    interval: Option<Duration>,
    rx: mpsc::Receiver<Command>,
}

impl<A, S> SyncScheduler<A, S>
where
    A: BackendAdapter,
    S: LocalStore + MutationOutbox + 'static,
{
    /// Creates a scheduler and its handle. `interval` of `None` disables
    /// periodic cycles; only triggers and nudges run then.
    pub fn new(
        engine: Arc<SyncEngine<A, S>>,
        interval: Option<Duration>,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(engine.config().channel_capacity);
        (
            Self {
                engine,
                interval,
                rx,
            },
            SchedulerHandle { tx },
        )
    }

    /// Runs until shutdown. Spawn this on its own task.
    pub async fn run(mut self) {
        let mut consecutive_failures: u32 = 0;
        loop {
            let wait = match (self.interval, consecutive_failures) {
                (None, _) => None,
                (Some(interval), 0) => Some(interval),
                (Some(interval), failures) => {
                    // Failed cycles push the next automatic run out; an
                    // explicit trigger still runs immediately.
                    let backoff = self
                        .engine
                        .config()
                        .backoff
                        .delay_for_attempt(failures - 1);
                    Some(interval.max(backoff))
                }
            };

            tokio::select! {
                command = self.rx.recv() => match command {
                    None | Some(Command::Shutdown) => {
                        info!("sync scheduler stopping");
                        self.engine.shutdown();
                        return;
                    }
                    Some(Command::Trigger { collections, reply }) => {
                        let result = self.cycle(collections, &mut consecutive_failures).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Nudge) => {
                        debug!("nudged, running sync cycle");
                        let _ = self.cycle(None, &mut consecutive_failures).await;
                    }
                },
                _ = sleep_or_forever(wait) => {
                    debug!("periodic sync cycle");
                    let _ = self.cycle(None, &mut consecutive_failures).await;
                }
            }
        }
    }

    async fn cycle(
        &self,
        collections: Option<Vec<String>>,
        consecutive_failures: &mut u32,
    ) -> SyncResult<SyncReport> {
        let result = match collections {
            Some(collections) => self.engine.sync_collections(&collections).await,
            None => self.engine.sync().await,
        };
        match &result {
            Ok(report) if report.is_clean() => *consecutive_failures = 0,
            Ok(_) => *consecutive_failures = consecutive_failures.saturating_add(1),
            Err(err) => {
                warn!(error = %err, "sync cycle failed");
                *consecutive_failures = consecutive_failures.saturating_add(1);
            }
        }
        result
    }
}

async fn sleep_or_forever(wait: Option<Duration>) {
    match wait {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
