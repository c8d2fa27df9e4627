//! Backing store abstraction.
//!
//! Every method is scoped to one [`ScanTarget`] except
//! [`WideColumnStore::scan_conversations_containing`], the
//! `ALLOW FILTERING` analog that touches every node.

mod memory;
mod partition;

pub use memory::InMemoryStore;

use crate::codec::{ClusteringCodec, ClusteringKey, EncodedClusteringKey};
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationByUser, LastMessage, Message, UserId};
use crate::routing::{ScanTarget, TableName};
use async_trait::async_trait;

/// Result of an insert-if-not-exists write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome<T> {
    Applied,
    /// The key was taken; carries the row that holds it
    Existing(T),
}

impl<T> InsertOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, InsertOutcome::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    /// Declared clustering order (newest first)
    Clustering,
    Reversed,
}

/// Slice of one partition: rows strictly past `after`, at most `limit` of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusteringRange {
    pub after: Option<EncodedClusteringKey>,
    pub limit: usize,
    pub order: ScanOrder,
}

impl ClusteringRange {
    pub fn head(limit: usize) -> Self {
        Self {
            after: None,
            limit,
            order: ScanOrder::Clustering,
        }
    }

    pub fn after(position: &ClusteringKey, limit: usize) -> Self {
        Self {
            after: Some(ClusteringCodec::encode(position)),
            limit,
            order: ScanOrder::Clustering,
        }
    }

    /// Oldest rows first
    pub fn tail(limit: usize) -> Self {
        Self {
            after: None,
            limit,
            order: ScanOrder::Reversed,
        }
    }
}

#[async_trait]
pub trait WideColumnStore: Send + Sync {
    /// `INSERT ... IF NOT EXISTS` into `messages_by_conversation`
    async fn insert_message(
        &self,
        target: &ScanTarget,
        message: Message,
    ) -> AppResult<InsertOutcome<Message>>;

    async fn scan_messages(
        &self,
        target: &ScanTarget,
        range: &ClusteringRange,
    ) -> AppResult<Vec<Message>>;

    async fn get_conversation(&self, target: &ScanTarget) -> AppResult<Option<Conversation>>;

    /// `INSERT ... IF NOT EXISTS` into `conversations`
    async fn insert_conversation(
        &self,
        target: &ScanTarget,
        conversation: Conversation,
    ) -> AppResult<InsertOutcome<Conversation>>;

    /// Last-write-wins update of the preview columns.
    /// Returns whether the row changed; `NotFound` when the row does not exist.
    async fn update_last_message(&self, target: &ScanTarget, last: &LastMessage)
        -> AppResult<bool>;

    /// Add users to `list_of_users` and return the merged row.
    /// `NotFound` when the row does not exist.
    async fn add_participants(
        &self,
        target: &ScanTarget,
        participants: &[UserId],
    ) -> AppResult<Conversation>;

    /// `list_of_users CONTAINS ? ALLOW FILTERING`: visits every node, unordered.
    async fn scan_conversations_containing(&self, user_id: UserId)
        -> AppResult<Vec<Conversation>>;

    /// Insert or move the user's row for a conversation. Never moves it to an older position.
    async fn upsert_user_conversation(
        &self,
        target: &ScanTarget,
        row: ConversationByUser,
    ) -> AppResult<bool>;

    async fn scan_user_conversations(
        &self,
        target: &ScanTarget,
        range: &ClusteringRange,
    ) -> AppResult<Vec<ConversationByUser>>;
}

pub(crate) fn expect_table(target: &ScanTarget, table: TableName) -> AppResult<()> {
    if target.table() != table {
        return Err(AppError::Internal(format!(
            "scan target {} used against {}",
            target, table
        )));
    }
    Ok(())
}
