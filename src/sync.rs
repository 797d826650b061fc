//! Event-driven cache invalidation.
//!
//! Domain change events (user updated, work updated, ...) queue up and are
//! drained in batches, each batch translated into key patterns and deleted
//! through the manager. Events whose deletes fail go back on the queue with
//! a bumped retry count until the retry budget runs out.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::manager::{CacheManager, CacheOptions};
use crate::utils::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    UserUpdated,
    WorkUpdated,
    RankingChanged,
    GraphChanged,
    SessionRevoked,
}

/// A domain change that invalidates cached state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SyncEvent {
    pub kind: SyncEventKind,
    pub entity_id: String,
    pub entity_type: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    pub payload: Option<serde_json::Value>,
}

impl SyncEvent {
    pub fn new(kind: SyncEventKind, entity_id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        SyncEvent {
            kind,
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            timestamp: now_ms(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Key patterns this event invalidates.
    pub fn patterns(&self) -> Vec<String> {
        let id = &self.entity_id;
        match self.kind {
            SyncEventKind::UserUpdated => {
                vec![format!("user:{}", id), format!("user:{}:*", id)]
            }
            SyncEventKind::WorkUpdated => vec![
                format!("work:{}", id),
                format!("work:{}:*", id),
                // List caches embed works, so any work change stales them.
                "work:list:*".to_string(),
            ],
            SyncEventKind::RankingChanged => vec!["ranking:*".to_string()],
            SyncEventKind::GraphChanged => {
                vec![format!("kg:{}", id), format!("kg:{}:*", id)]
            }
            SyncEventKind::SessionRevoked => {
                vec![format!("session:{}", id), format!("session:{}:*", id)]
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Events drained per batch.
    pub batch_size: usize,
    /// Period of the background drain loop.
    pub drain_interval: Duration,
    /// Drain retries per event before it is dropped.
    pub max_event_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            batch_size: 50,
            drain_interval: Duration::from_secs(5),
            max_event_retries: 3,
        }
    }
}

struct PendingEvent {
    event: SyncEvent,
    retries: u32,
}

/// Batches invalidation events and applies them through the cache manager.
pub struct CacheSyncManager {
    cache: Arc<CacheManager>,
    config: SyncConfig,
    queue: Mutex<VecDeque<PendingEvent>>,
}

impl CacheSyncManager {
    pub fn new(cache: Arc<CacheManager>, config: SyncConfig) -> Self {
        CacheSyncManager {
            cache,
            config,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue an event for the next drain. If the queue is running well
    /// ahead of the drain timer, drain inline to bound its size.
    pub async fn enqueue(&self, event: SyncEvent) {
        let overloaded = {
            let mut queue = self.queue.lock().await;
            queue.push_back(PendingEvent { event, retries: 0 });
            queue.len() > self.config.batch_size * 2
        };
        if overloaded {
            self.drain().await;
        }
    }

    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Drain one batch: group queued events by kind, deduplicate their
    /// patterns, and delete each pattern across both layers. A group whose
    /// delete fails is re-queued with bumped retry counts; events past the
    /// retry budget are dropped with a warning.
    pub async fn drain(&self) -> u64 {
        let batch: Vec<PendingEvent> = {
            let mut queue = self.queue.lock().await;
            let take = queue.len().min(self.config.batch_size);
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let mut groups: HashMap<SyncEventKind, Vec<PendingEvent>> = HashMap::new();
        for pending in batch {
            groups.entry(pending.event.kind).or_default().push(pending);
        }

        let opts = CacheOptions::default();
        let mut removed: u64 = 0;

        for (kind, group) in groups {
            let mut patterns: Vec<String> = group
                .iter()
                .flat_map(|p| p.event.patterns())
                .collect();
            patterns.sort();
            patterns.dedup();

            let deletes = patterns
                .iter()
                .map(|pattern| self.cache.delete_pattern(pattern, &opts));
            let results = join_all(deletes).await;

            let mut failed = false;
            for (pattern, result) in patterns.iter().zip(results) {
                match result {
                    Ok(count) => removed += count,
                    Err(e) => {
                        tracing::warn!(?kind, pattern, error = %e, "invalidation failed");
                        failed = true;
                    }
                }
            }

            if failed {
                self.requeue(group).await;
            }
        }

        removed
    }

    async fn requeue(&self, group: Vec<PendingEvent>) {
        let mut queue = self.queue.lock().await;
        for mut pending in group {
            pending.retries += 1;
            if pending.retries > self.config.max_event_retries {
                tracing::warn!(
                    kind = ?pending.event.kind,
                    entity_id = %pending.event.entity_id,
                    retries = pending.retries,
                    "dropping invalidation event after retry budget"
                );
            } else {
                queue.push_back(pending);
            }
        }
    }

    /// Run the drain loop until the handle is aborted.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let sync = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sync.config.drain_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sync.drain().await;
            }
        })
    }

    pub async fn handle_user_updated(&self, user_id: &str) {
        self.enqueue(SyncEvent::new(SyncEventKind::UserUpdated, user_id, "user"))
            .await;
    }

    pub async fn handle_work_updated(&self, work_id: &str) {
        self.enqueue(SyncEvent::new(SyncEventKind::WorkUpdated, work_id, "work"))
            .await;
    }

    pub async fn handle_ranking_changed(&self, ranking_id: &str) {
        self.enqueue(SyncEvent::new(
            SyncEventKind::RankingChanged,
            ranking_id,
            "ranking",
        ))
        .await;
    }

    pub async fn handle_graph_changed(&self, node_id: &str) {
        self.enqueue(SyncEvent::new(SyncEventKind::GraphChanged, node_id, "graph"))
            .await;
    }

    pub async fn handle_session_revoked(&self, session_id: &str) {
        self.enqueue(SyncEvent::new(
            SyncEventKind::SessionRevoked,
            session_id,
            "session",
        ))
        .await;
    }
}
