//! Dual-write coordination: `messages_by_conversation` is the source of truth,
//! `conversations` and `conversations_by_user` are derived from it.
//!
//! The message write must succeed. Index writes follow it and are best-effort;
//! a failed index write is queued for repair and never fails the send.

use crate::codec::normalize_timestamp;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::StoreMetrics;
use crate::models::{
    Conversation, ConversationByUser, IndexStatus, LastMessage, Message, MessageId, NewMessage,
    SendReceipt, UserId,
};
use crate::repair::RepairQueue;
use crate::routing::{PartitionRouter, ScanTarget, TableName};
use crate::store::{InsertOutcome, WideColumnStore};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Writes the denormalized copies of a message. Every write here is
/// idempotent, so the coordinator and the repair worker share it.
#[derive(Clone)]
pub struct IndexWriter {
    router: Arc<PartitionRouter>,
    store: Arc<dyn WideColumnStore>,
    config: Arc<Config>,
}

impl IndexWriter {
    pub fn new(
        router: Arc<PartitionRouter>,
        store: Arc<dyn WideColumnStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            router,
            store,
            config,
        }
    }

    /// Bring the conversation row and the per-user rows up to `message`.
    pub async fn apply(&self, message: &Message) -> AppResult<()> {
        let target = self
            .router
            .route_conversation(TableName::Conversations, message.conversation_id)?;

        let conversation = match self.store.get_conversation(&target).await? {
            Some(existing) => existing,
            None => {
                let fresh = Conversation::new(
                    message.conversation_id,
                    [message.sender_id, message.recipient_id],
                    message.sent_at,
                );
                match self.store.insert_conversation(&target, fresh.clone()).await? {
                    InsertOutcome::Applied => {
                        debug!(
                            conversation_id = %message.conversation_id,
                            "Created conversation row from first message"
                        );
                        fresh
                    }
                    InsertOutcome::Existing(existing) => existing,
                }
            }
        };

        let last = LastMessage::from_message(message, self.config.preview_max_chars);
        self.store.update_last_message(&target, &last).await?;

        // Group conversations pick up new members from later messages
        let users = [message.sender_id, message.recipient_id];
        let conversation = self
            .ensure_participants(&target, conversation, &users)
            .await?;

        let last_activity = conversation.last_message_at.max(last.sent_at);
        self.upsert_user_rows(&conversation, last_activity).await
    }

    /// Merge `users` into the conversation row when any of them is missing.
    pub(crate) async fn ensure_participants(
        &self,
        target: &ScanTarget,
        conversation: Conversation,
        users: &[UserId],
    ) -> AppResult<Conversation> {
        if users.iter().all(|user| conversation.has_participant(*user)) {
            return Ok(conversation);
        }
        self.store.add_participants(target, users).await
    }

    /// Index rows for a conversation that has no messages yet.
    pub async fn register(&self, conversation: &Conversation) -> AppResult<()> {
        self.upsert_user_rows(conversation, conversation.last_message_at)
            .await
    }

    async fn upsert_user_rows(
        &self,
        conversation: &Conversation,
        last_activity: DateTime<Utc>,
    ) -> AppResult<()> {
        if !self.config.schema_variant.maintains_user_index() {
            return Ok(());
        }

        let upserts = conversation.participants.iter().map(|&user_id| {
            let row = ConversationByUser {
                user_id,
                last_activity,
                conversation_id: conversation.conversation_id,
                participant_id: conversation.counterpart(user_id).unwrap_or(user_id),
            };
            async move {
                let target = self.router.route_user(user_id)?;
                self.store.upsert_user_conversation(&target, row).await
            }
        });

        try_join_all(upserts).await?;
        Ok(())
    }
}

pub struct DualWriteCoordinator {
    router: Arc<PartitionRouter>,
    store: Arc<dyn WideColumnStore>,
    index: IndexWriter,
    repair_queue: Arc<RepairQueue>,
    metrics: StoreMetrics,
}

impl DualWriteCoordinator {
    pub fn new(
        router: Arc<PartitionRouter>,
        store: Arc<dyn WideColumnStore>,
        index: IndexWriter,
        repair_queue: Arc<RepairQueue>,
        metrics: StoreMetrics,
    ) -> Self {
        Self {
            router,
            store,
            index,
            repair_queue,
            metrics,
        }
    }

    /// Persist a message, then its index copies.
    ///
    /// Fails only when the message write fails or its clustering key is
    /// already taken. Index failures are reported in the receipt.
    pub async fn send_message(&self, new_message: NewMessage) -> AppResult<SendReceipt> {
        if new_message.text.trim().is_empty() {
            return Err(AppError::InvalidArgument(
                "message text must not be empty".to_string(),
            ));
        }

        let message = Message {
            conversation_id: new_message.conversation_id,
            sent_at: normalize_timestamp(new_message.sent_at.unwrap_or_else(Utc::now)),
            message_id: new_message.message_id.unwrap_or_else(MessageId::new),
            sender_id: new_message.sender_id,
            recipient_id: new_message.recipient_id,
            text: new_message.text,
        };

        let target = self
            .router
            .route_conversation(TableName::MessagesByConversation, message.conversation_id)?;

        match self.store.insert_message(&target, message.clone()).await? {
            InsertOutcome::Applied => {}
            InsertOutcome::Existing(existing) => {
                return Err(self.consistency_violation(&message, &existing));
            }
        }
        self.metrics.messages_written.inc();

        info!(
            conversation_id = %message.conversation_id,
            message_id = %message.message_id,
            sender_id = %message.sender_id,
            "Message written"
        );

        let index = self.write_indexes(&message).await;
        Ok(SendReceipt {
            message,
            index,
            duplicate: false,
        })
    }

    /// Idempotent resend of a message the caller already built.
    ///
    /// An identical stored row is accepted as a duplicate and its index writes
    /// are re-applied. A different row under the same key is rejected.
    pub async fn resend_message(&self, message: &Message) -> AppResult<SendReceipt> {
        let mut message = message.clone();
        message.sent_at = normalize_timestamp(message.sent_at);

        let target = self
            .router
            .route_conversation(TableName::MessagesByConversation, message.conversation_id)?;

        let duplicate = match self.store.insert_message(&target, message.clone()).await? {
            InsertOutcome::Applied => {
                self.metrics.messages_written.inc();
                false
            }
            InsertOutcome::Existing(existing) if existing == message => {
                self.metrics.duplicate_resends.inc();
                debug!(
                    conversation_id = %message.conversation_id,
                    message_id = %message.message_id,
                    "Resend matched stored message"
                );
                true
            }
            InsertOutcome::Existing(existing) => {
                return Err(self.consistency_violation(&message, &existing));
            }
        };

        let index = self.write_indexes(&message).await;
        Ok(SendReceipt {
            message,
            index,
            duplicate,
        })
    }

    async fn write_indexes(&self, message: &Message) -> IndexStatus {
        match self.index.apply(message).await {
            Ok(()) => IndexStatus::Synced,
            Err(e) => {
                let failure = AppError::TransientWriteFailure {
                    conversation_id: message.conversation_id,
                    reason: e.to_string(),
                };

                warn!(
                    conversation_id = %message.conversation_id,
                    message_id = %message.message_id,
                    error = %e,
                    "Index write failed after message write; queued for repair (data drift possible)"
                );
                self.metrics
                    .index_write_failures
                    .with_label_values(&[e.label()])
                    .inc();
                self.repair_queue
                    .enqueue(message.conversation_id, failure.to_string());

                IndexStatus::RepairQueued {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn consistency_violation(&self, attempted: &Message, existing: &Message) -> AppError {
        self.metrics.consistency_violations.inc();
        error!(
            conversation_id = %attempted.conversation_id,
            sent_at = %attempted.sent_at,
            message_id = %attempted.message_id,
            existing_sender = %existing.sender_id,
            "Clustering key already taken; refusing to overwrite"
        );
        AppError::ConsistencyViolation(format!(
            "conversation {} already holds a message at ({}, {})",
            attempted.conversation_id, attempted.sent_at, attempted.message_id
        ))
    }
}
