use super::dual_write::IndexWriter;
use crate::codec::clustering_cmp;
use crate::config::{Config, SchemaVariant};
use crate::error::{AppError, AppResult};
use crate::metrics::StoreMetrics;
use crate::models::{Conversation, ConversationId, UserId};
use crate::repair::RepairQueue;
use crate::routing::{PartitionRouter, ScanTarget, TableName};
use crate::store::{ClusteringRange, InsertOutcome, WideColumnStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

const LOOKUP_PAGE: usize = 100;

pub struct ConversationService {
    router: Arc<PartitionRouter>,
    store: Arc<dyn WideColumnStore>,
    index: IndexWriter,
    repair_queue: Arc<RepairQueue>,
    config: Arc<Config>,
    metrics: StoreMetrics,
}

impl ConversationService {
    pub fn new(
        router: Arc<PartitionRouter>,
        store: Arc<dyn WideColumnStore>,
        index: IndexWriter,
        repair_queue: Arc<RepairQueue>,
        config: Arc<Config>,
        metrics: StoreMetrics,
    ) -> Self {
        Self {
            router,
            store,
            index,
            repair_queue,
            config,
            metrics,
        }
    }

    pub async fn get_conversation(&self, conversation_id: ConversationId) -> AppResult<Conversation> {
        let target = self
            .router
            .route_conversation(TableName::Conversations, conversation_id)?;

        self.store
            .get_conversation(&target)
            .await?
            .ok_or_else(|| AppError::not_found("conversation", conversation_id))
    }

    /// Get-or-create the direct conversation between `user_a` and `user_b`.
    pub async fn open_direct_conversation(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> AppResult<Conversation> {
        let target_a = self.router.route_user(user_a)?;
        self.router.route_user(user_b)?;

        if let Some(existing) = self.find_direct(user_a, user_b, &target_a).await? {
            debug!(
                conversation_id = %existing.conversation_id,
                "Direct conversation already exists"
            );
            return Ok(existing);
        }

        let fresh = Conversation::new(ConversationId::new(), [user_a, user_b], Utc::now());
        let target = self
            .router
            .route_conversation(TableName::Conversations, fresh.conversation_id)?;

        let conversation = match self.store.insert_conversation(&target, fresh.clone()).await? {
            InsertOutcome::Applied => fresh,
            InsertOutcome::Existing(existing) => existing,
        };

        // The conversation row is authoritative; per-user rows can be rebuilt
        if let Err(e) = self.index.register(&conversation).await {
            warn!(
                conversation_id = %conversation.conversation_id,
                error = %e,
                "Failed to index new conversation; queued for repair"
            );
            self.metrics
                .index_write_failures
                .with_label_values(&[e.label()])
                .inc();
            self.repair_queue
                .enqueue(conversation.conversation_id, e.to_string());
        }

        info!(
            conversation_id = %conversation.conversation_id,
            user_a = %user_a,
            user_b = %user_b,
            "Direct conversation created"
        );
        Ok(conversation)
    }

    async fn find_direct(
        &self,
        user_a: UserId,
        user_b: UserId,
        target_a: &ScanTarget,
    ) -> AppResult<Option<Conversation>> {
        match self.config.schema_variant {
            SchemaVariant::ConversationsByUser => {
                let mut range = ClusteringRange::head(LOOKUP_PAGE);
                loop {
                    let rows = self.store.scan_user_conversations(target_a, &range).await?;

                    for row in rows.iter().filter(|r| r.participant_id == user_b) {
                        let conversation = self.get_conversation(row.conversation_id).await;
                        match conversation {
                            Ok(c) if is_direct_between(&c, user_a, user_b) => return Ok(Some(c)),
                            Ok(_) | Err(AppError::NotFound(_)) => continue,
                            Err(e) => return Err(e),
                        }
                    }

                    match rows.last() {
                        Some(last) if rows.len() == LOOKUP_PAGE => {
                            range = ClusteringRange::after(&last.clustering_key(), LOOKUP_PAGE);
                        }
                        _ => return Ok(None),
                    }
                }
            }
            SchemaVariant::ConversationsTable => {
                self.metrics.filtering_scans.inc();
                let candidates = self.store.scan_conversations_containing(user_a).await?;

                Ok(candidates
                    .into_iter()
                    .filter(|c| is_direct_between(c, user_a, user_b))
                    .min_by(|x, y| clustering_cmp(&x.activity_key(), &y.activity_key())))
            }
        }
    }
}

fn is_direct_between(conversation: &Conversation, user_a: UserId, user_b: UserId) -> bool {
    let mut expected = vec![user_a, user_b];
    expected.sort();
    expected.dedup();
    conversation.participants == expected
}
