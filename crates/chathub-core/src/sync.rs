//! LAN sync session: keeps a sync transport fed with local data and merges
//! what peers push back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    debounce::Debouncer,
    error::Result,
    model::{Conversation, Project, SyncConfig},
    store::Store,
};

/// Conversations and projects exchanged with a peer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPush {
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl SyncPush {
    fn from_store(store: &Store) -> Self {
        store.read(|state| Self {
            conversations: state.conversations.clone(),
            projects: state.projects.clone(),
        })
    }
}

/// Carries sync data to and from peers (e.g. a LAN server a phone talks to)
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Start serving; inbound pushes arrive on the returned channel
    async fn start(&self, port: u16, pin: Option<String>) -> Result<mpsc::Receiver<SyncPush>>;

    async fn stop(&self) -> Result<()>;

    /// Replace the data offered to peers
    async fn update_sync_data(&self, data: SyncPush) -> Result<()>;
}

/// A running sync session
pub struct SyncSession {
    transport: Arc<dyn SyncTransport>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    last_synced_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl SyncSession {
    /// Start the transport, offer the current data right away, then keep it
    /// current (debounced) and merge every inbound push.
    pub async fn start(
        store: Store,
        transport: Arc<dyn SyncTransport>,
        config: &SyncConfig,
        debounce: Duration,
    ) -> Result<Self> {
        let mut inbound = transport.start(config.port, config.pin.clone()).await?;
        tracing::info!("Sync started on port {}", config.port);

        let mut events = store.subscribe();
        transport.update_sync_data(SyncPush::from_store(&store)).await?;

        let pusher = {
            let store = store.clone();
            let transport = transport.clone();
            Debouncer::spawn(debounce, move || {
                let data = SyncPush::from_store(&store);
                let transport = transport.clone();
                async move {
                    if let Err(e) = transport.update_sync_data(data).await {
                        tracing::warn!("Failed to update sync data: {}", e);
                    }
                }
            })
        };

        let cancel = CancellationToken::new();
        let last_synced_at = Arc::new(Mutex::new(None));
        let task = {
            let cancel = cancel.clone();
            let last_synced_at = last_synced_at.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = events.recv() => match event {
                            Ok(event) if event.touches_sync_data() => pusher.schedule(),
                            Ok(_) => {}
                            Err(RecvError::Lagged(_)) => pusher.schedule(),
                            Err(RecvError::Closed) => break,
                        },
                        push = inbound.recv() => match push {
                            Some(push) => {
                                tracing::debug!(
                                    "Received sync push: {} conversation(s), {} project(s)",
                                    push.conversations.len(),
                                    push.projects.len()
                                );
                                store.merge_remote(&push.conversations, &push.projects);
                                *last_synced_at.lock() = Some(Utc::now());
                            }
                            None => {
                                tracing::debug!("Sync transport closed its inbound channel");
                                break;
                            }
                        },
                    }
                }
                pusher.shutdown().await;
            })
        };

        Ok(Self {
            transport,
            cancel,
            task,
            last_synced_at,
        })
    }

    /// When a peer push was last merged
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        *self.last_synced_at.lock()
    }

    /// Stop the session and the transport. Pending local changes are offered
    /// to peers first.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("Sync session task failed: {}", e);
        }
        self.transport.stop().await?;
        tracing::info!("Sync stopped");
        Ok(())
    }
}
