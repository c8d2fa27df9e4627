use super::{ConversationId, Message, MessageId, UserId};
use crate::codec::{clustering_cmp, normalize_timestamp, ClusteringKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Row of `conversations` (keyed by conversation_id only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: ConversationId,
    /// `list_of_users`, sorted and deduplicated
    pub participants: Vec<UserId>,
    pub last_message_content: Option<String>,
    pub last_message_at: DateTime<Utc>,
    pub last_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(
        conversation_id: ConversationId,
        participants: impl IntoIterator<Item = UserId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut participants: Vec<UserId> = participants.into_iter().collect();
        participants.sort();
        participants.dedup();
        let created_at = normalize_timestamp(created_at);

        Self {
            conversation_id,
            participants,
            last_message_content: None,
            last_message_at: created_at,
            last_message_id: None,
            created_at,
        }
    }

    /// Merge users into the participant set; returns whether any was new.
    pub fn add_participants(&mut self, users: impl IntoIterator<Item = UserId>) -> bool {
        let mut changed = false;
        for user_id in users {
            if let Err(slot) = self.participants.binary_search(&user_id) {
                self.participants.insert(slot, user_id);
                changed = true;
            }
        }
        changed
    }

    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.binary_search(&user_id).is_ok()
    }

    /// The user shown opposite `user_id` in their conversation list.
    /// For a note-to-self conversation that is the user themself.
    pub fn counterpart(&self, user_id: UserId) -> Option<UserId> {
        self.participants
            .iter()
            .copied()
            .find(|p| *p != user_id)
            .or_else(|| self.has_participant(user_id).then_some(user_id))
    }

    /// Recency key used when listing from this table: (last_message_at DESC, conversation_id ASC)
    pub fn activity_key(&self) -> ClusteringKey {
        ClusteringKey::new(self.last_message_at, self.conversation_id.0)
    }

    /// Last-write-wins update of the denormalized preview.
    ///
    /// Returns false when the stored preview already reflects a message at or after `last`.
    pub fn apply_last_message(&mut self, last: &LastMessage) -> bool {
        if let Some(current_id) = self.last_message_id {
            let current = ClusteringKey::new(self.last_message_at, current_id.0);
            if clustering_cmp(&last.clustering_key(), &current) != Ordering::Less {
                return false;
            }
        }

        self.last_message_content = Some(last.preview.clone());
        self.last_message_at = last.sent_at;
        self.last_message_id = Some(last.message_id);
        true
    }
}

/// Denormalized copy of the newest message carried into `conversations`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastMessage {
    pub message_id: MessageId,
    pub sent_at: DateTime<Utc>,
    pub preview: String,
}

impl LastMessage {
    pub fn from_message(message: &Message, max_chars: usize) -> Self {
        Self {
            message_id: message.message_id,
            sent_at: normalize_timestamp(message.sent_at),
            preview: message.text.chars().take(max_chars).collect(),
        }
    }

    pub fn clustering_key(&self) -> ClusteringKey {
        ClusteringKey::new(self.sent_at, self.message_id.0)
    }
}

/// Row of `conversations_by_user`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationByUser {
    pub user_id: UserId,
    pub last_activity: DateTime<Utc>,
    pub conversation_id: ConversationId,
    pub participant_id: UserId,
}

impl ConversationByUser {
    pub fn clustering_key(&self) -> ClusteringKey {
        ClusteringKey::new(self.last_activity, self.conversation_id.0)
    }
}

/// One entry of a user's conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub participant_id: Option<UserId>,
    pub last_activity: DateTime<Utc>,
    pub last_message_preview: Option<String>,
}

impl ConversationSummary {
    pub fn activity_key(&self) -> ClusteringKey {
        ClusteringKey::new(self.last_activity, self.conversation_id.0)
    }
}
