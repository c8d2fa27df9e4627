use super::{ConversationId, MessageId, UserId};
use crate::codec::ClusteringKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row of `messages_by_conversation`. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub conversation_id: ConversationId,
    pub sent_at: DateTime<Utc>,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub text: String,
}

impl Message {
    pub fn clustering_key(&self) -> ClusteringKey {
        ClusteringKey::new(self.sent_at, self.message_id.0)
    }
}

/// Send request. `message_id` and `sent_at` are assigned by the coordinator when absent.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub text: String,
    pub message_id: Option<MessageId>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl NewMessage {
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        recipient_id: UserId,
        text: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            sender_id,
            recipient_id,
            text: text.into(),
            message_id: None,
            sent_at: None,
        }
    }

    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at = Some(sent_at);
        self
    }
}

/// Whether the denormalized copies caught up with the message write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStatus {
    Synced,
    /// Index write failed; the conversation is queued for repair
    RepairQueued { reason: String },
}

#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message: Message,
    pub index: IndexStatus,
    /// True when an idempotent resend matched an existing identical row
    pub duplicate: bool,
}

impl SendReceipt {
    pub fn is_index_synced(&self) -> bool {
        self.index == IndexStatus::Synced
    }
}
