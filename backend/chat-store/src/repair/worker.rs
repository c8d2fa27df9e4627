use super::backoff::{with_retry, RetryConfig, RetryError};
use super::queue::{RepairQueue, RequeueOutcome};
use crate::config::RepairConfig;
use crate::error::{AppError, AppResult};
use crate::metrics::StoreMetrics;
use crate::models::{Conversation, ConversationId, UserId};
use crate::routing::{PartitionRouter, ScanTarget, TableName};
use crate::services::IndexWriter;
use crate::store::{ClusteringRange, InsertOutcome, WideColumnStore};
use anyhow::Context;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const HISTORY_PAGE: usize = 500;

/// Rebuilds a conversation's denormalized copies from `messages_by_conversation`.
#[derive(Clone)]
pub struct IndexRepairer {
    router: Arc<PartitionRouter>,
    store: Arc<dyn WideColumnStore>,
    index: IndexWriter,
}

impl IndexRepairer {
    pub fn new(
        router: Arc<PartitionRouter>,
        store: Arc<dyn WideColumnStore>,
        index: IndexWriter,
    ) -> Self {
        Self {
            router,
            store,
            index,
        }
    }

    /// Re-apply the index writes for the newest message, after merging every
    /// sender and recipient into the conversation row. Safe to repeat.
    pub async fn reconcile(&self, conversation_id: ConversationId) -> AppResult<()> {
        let messages = self
            .router
            .route_conversation(TableName::MessagesByConversation, conversation_id)?;
        let conversations = self
            .router
            .route_conversation(TableName::Conversations, conversation_id)?;

        let newest = self
            .store
            .scan_messages(&messages, &ClusteringRange::head(1))
            .await?
            .into_iter()
            .next();

        let Some(newest) = newest else {
            // No messages yet: only the per-user rows can be missing
            let conversation = self
                .store
                .get_conversation(&conversations)
                .await?
                .ok_or_else(|| AppError::not_found("conversation", conversation_id))?;
            return self.index.register(&conversation).await;
        };

        let participants = self.collect_participants(&messages).await?;

        let conversation = match self.store.get_conversation(&conversations).await? {
            Some(existing) => existing,
            None => {
                let oldest = self
                    .store
                    .scan_messages(&messages, &ClusteringRange::tail(1))
                    .await?
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| newest.clone());

                let rebuilt = Conversation::new(
                    conversation_id,
                    participants.iter().copied(),
                    oldest.sent_at,
                );
                info!(
                    conversation_id = %conversation_id,
                    participants = rebuilt.participants.len(),
                    "Recreating missing conversation row from message history"
                );
                match self.store.insert_conversation(&conversations, rebuilt.clone()).await? {
                    InsertOutcome::Applied => rebuilt,
                    InsertOutcome::Existing(existing) => existing,
                }
            }
        };

        let users: Vec<UserId> = participants.into_iter().collect();
        self.index
            .ensure_participants(&conversations, conversation, &users)
            .await?;

        self.index.apply(&newest).await
    }

    /// Every sender and recipient in the partition, paging through it in clustering order.
    async fn collect_participants(&self, messages: &ScanTarget) -> AppResult<BTreeSet<UserId>> {
        let mut participants = BTreeSet::new();
        let mut range = ClusteringRange::head(HISTORY_PAGE);
        loop {
            let page = self.store.scan_messages(messages, &range).await?;
            for message in &page {
                participants.insert(message.sender_id);
                participants.insert(message.recipient_id);
            }
            match page.last() {
                Some(last) if page.len() == HISTORY_PAGE => {
                    range = ClusteringRange::after(&last.clustering_key(), HISTORY_PAGE);
                }
                _ => return Ok(participants),
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepairPassStats {
    pub attempted: usize,
    pub repaired: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
}

/// Drains the repair queue, either one pass at a time or as a background task.
pub struct RepairWorker {
    queue: Arc<RepairQueue>,
    repairer: IndexRepairer,
    retry: RetryConfig,
    batch_size: usize,
    poll_interval: Duration,
    metrics: StoreMetrics,
}

impl RepairWorker {
    pub fn new(
        queue: Arc<RepairQueue>,
        repairer: IndexRepairer,
        config: &RepairConfig,
        metrics: StoreMetrics,
    ) -> Self {
        Self {
            queue,
            repairer,
            retry: RetryConfig::from(config),
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
            metrics,
        }
    }

    /// Reconcile one conversation now, outside the queue.
    pub async fn reconcile(&self, conversation_id: ConversationId) -> AppResult<()> {
        self.repairer.reconcile(conversation_id).await
    }

    /// Process one batch of queued conversations.
    pub async fn run_pass(&self) -> RepairPassStats {
        let batch = self.queue.take_batch(self.batch_size);
        let mut stats = RepairPassStats {
            attempted: batch.len(),
            ..Default::default()
        };

        for task in batch {
            let conversation_id = task.conversation_id;
            let result = with_retry(&self.retry, AppError::is_retryable, || {
                self.repairer.reconcile(conversation_id)
            })
            .await;

            match result {
                Ok(()) => {
                    stats.repaired += 1;
                    self.metrics.repairs_succeeded.inc();
                    info!(
                        conversation_id = %conversation_id,
                        attempts = task.attempts + 1,
                        "Conversation indexes reconciled"
                    );
                }
                Err(RetryError::Permanent(e)) => {
                    self.queue.dead_letter(task, &e.to_string());
                    stats.dead_lettered += 1;
                }
                Err(e @ RetryError::Exhausted { .. }) => {
                    let error = e.to_string();
                    warn!(
                        conversation_id = %conversation_id,
                        error = %error,
                        "Index repair pass failed"
                    );
                    match self.queue.requeue_failed(task, &error) {
                        RequeueOutcome::Requeued | RequeueOutcome::AlreadyQueued => {
                            stats.requeued += 1
                        }
                        RequeueOutcome::DeadLettered => stats.dead_lettered += 1,
                    }
                }
            }
        }

        stats
    }

    /// Run passes until shutdown, waking on new work or the poll interval.
    pub fn spawn(self: Arc<Self>) -> RepairWorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move { self.run(shutdown_rx).await });

        RepairWorkerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_retries = self.retry.max_retries,
            "Index repair worker starting"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let stats = self.run_pass().await;
            if stats.attempted > 0 {
                info!(
                    repaired = stats.repaired,
                    requeued = stats.requeued,
                    dead_lettered = stats.dead_lettered,
                    "Repair pass finished"
                );
            } else {
                debug!("No conversations waiting for repair");
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.queue.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Index repair worker stopped");
        Ok(())
    }
}

pub struct RepairWorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<anyhow::Result<()>>,
}

impl RepairWorkerHandle {
    /// Signal shutdown and wait for the current pass to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        self.join.await.context("repair worker task panicked")?
    }
}
