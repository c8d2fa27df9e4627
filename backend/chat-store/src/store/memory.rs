use super::partition::{Partition, UserIndexPartition};
use super::{expect_table, ClusteringRange, InsertOutcome, ScanOrder, WideColumnStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationByUser, ConversationId, LastMessage, Message, UserId,
};
use crate::routing::{NodeId, PartitionKey, PartitionRouter, ScanTarget, TableName};
use crate::schema;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace};

type MessagePartition = Arc<RwLock<Partition<Message>>>;
type UserPartition = Arc<RwLock<UserIndexPartition>>;

#[derive(Debug, Default)]
struct StorageNode {
    messages: DashMap<ConversationId, MessagePartition>,
    conversations: DashMap<ConversationId, Conversation>,
    user_index: DashMap<UserId, UserPartition>,
}

/// Sharded in-process wide-column engine.
///
/// Each ring owner gets its own [`StorageNode`]; each partition has its own
/// lock, so writers to different partitions never contend.
pub struct InMemoryStore {
    router: Arc<PartitionRouter>,
    nodes: Vec<StorageNode>,
}

impl InMemoryStore {
    pub fn new(router: Arc<PartitionRouter>) -> Self {
        let nodes = (0..router.node_count())
            .map(|_| StorageNode::default())
            .collect();
        Self { router, nodes }
    }

    fn node(&self, target: &ScanTarget) -> AppResult<&StorageNode> {
        let NodeId(index) = self.router.owner(target);
        self.nodes
            .get(index)
            .ok_or_else(|| AppError::Internal(format!("no storage node {index} for {target}")))
    }

    fn conversation_key(target: &ScanTarget) -> AppResult<ConversationId> {
        match target.key() {
            PartitionKey::Conversation(id) => Ok(id),
            PartitionKey::User(_) => Err(AppError::Internal(format!(
                "{target} is not a conversation partition"
            ))),
        }
    }

    fn user_key(target: &ScanTarget) -> AppResult<UserId> {
        match target.key() {
            PartitionKey::User(id) => Ok(id),
            PartitionKey::Conversation(_) => Err(AppError::Internal(format!(
                "{target} is not a user partition"
            ))),
        }
    }

    fn execute(statement: &'static str, target: &ScanTarget) {
        trace!(partition = %target, cql = statement.trim(), "Executing statement");
    }

    /// Messages stored for a conversation, across the whole partition
    pub fn message_count(&self, conversation_id: ConversationId) -> usize {
        self.nodes
            .iter()
            .filter_map(|node| node.messages.get(&conversation_id).map(|p| p.read().len()))
            .sum()
    }

    /// Partitions held per node, in node order
    pub fn partitions_per_node(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .map(|node| node.messages.len() + node.conversations.len() + node.user_index.len())
            .collect()
    }
}

#[async_trait]
impl WideColumnStore for InMemoryStore {
    async fn insert_message(
        &self,
        target: &ScanTarget,
        message: Message,
    ) -> AppResult<InsertOutcome<Message>> {
        expect_table(target, TableName::MessagesByConversation)?;
        let conversation_id = Self::conversation_key(target)?;
        if message.conversation_id != conversation_id {
            return Err(AppError::Internal(format!(
                "message for {} routed to {target}",
                message.conversation_id
            )));
        }

        Self::execute(schema::INSERT_MESSAGE, target);
        let partition = self
            .node(target)?
            .messages
            .entry(conversation_id)
            .or_default()
            .clone();

        let outcome = partition.write().insert_if_absent(message);
        Ok(outcome)
    }

    async fn scan_messages(
        &self,
        target: &ScanTarget,
        range: &ClusteringRange,
    ) -> AppResult<Vec<Message>> {
        expect_table(target, TableName::MessagesByConversation)?;
        let conversation_id = Self::conversation_key(target)?;

        let statement = match (range.order, range.after.is_some()) {
            (ScanOrder::Reversed, _) => schema::SELECT_MESSAGES_OLDEST_FIRST,
            (ScanOrder::Clustering, false) => schema::SELECT_MESSAGES_PAGE,
            (ScanOrder::Clustering, true) => schema::SELECT_MESSAGES_AFTER_POSITION,
        };
        Self::execute(statement, target);

        let partition = match self.node(target)?.messages.get(&conversation_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(Vec::new()),
        };

        let rows = partition.read().scan(range);
        Ok(rows)
    }

    async fn get_conversation(&self, target: &ScanTarget) -> AppResult<Option<Conversation>> {
        expect_table(target, TableName::Conversations)?;
        let conversation_id = Self::conversation_key(target)?;

        Self::execute(schema::SELECT_CONVERSATION, target);
        Ok(self
            .node(target)?
            .conversations
            .get(&conversation_id)
            .map(|entry| entry.value().clone()))
    }

    async fn insert_conversation(
        &self,
        target: &ScanTarget,
        conversation: Conversation,
    ) -> AppResult<InsertOutcome<Conversation>> {
        expect_table(target, TableName::Conversations)?;
        let conversation_id = Self::conversation_key(target)?;

        Self::execute(schema::INSERT_CONVERSATION, target);
        let outcome = match self.node(target)?.conversations.entry(conversation_id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                InsertOutcome::Existing(existing.get().clone())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(conversation);
                InsertOutcome::Applied
            }
        };
        Ok(outcome)
    }

    async fn update_last_message(
        &self,
        target: &ScanTarget,
        last: &LastMessage,
    ) -> AppResult<bool> {
        expect_table(target, TableName::Conversations)?;
        let conversation_id = Self::conversation_key(target)?;

        Self::execute(schema::UPDATE_LAST_MESSAGE, target);
        let mut row = self
            .node(target)?
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| AppError::not_found("conversation", conversation_id))?;

        let changed = row.apply_last_message(last);
        if !changed {
            debug!(
                conversation_id = %conversation_id,
                message_id = %last.message_id,
                "Preview already at or past message; update skipped"
            );
        }
        Ok(changed)
    }

    async fn add_participants(
        &self,
        target: &ScanTarget,
        participants: &[UserId],
    ) -> AppResult<Conversation> {
        expect_table(target, TableName::Conversations)?;
        let conversation_id = Self::conversation_key(target)?;

        Self::execute(schema::ADD_PARTICIPANTS, target);
        let mut row = self
            .node(target)?
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| AppError::not_found("conversation", conversation_id))?;

        if row.add_participants(participants.iter().copied()) {
            debug!(
                conversation_id = %conversation_id,
                participants = row.participants.len(),
                "Conversation participants extended"
            );
        }
        Ok(row.clone())
    }

    async fn scan_conversations_containing(&self, user_id: UserId) -> AppResult<Vec<Conversation>> {
        trace!(
            user_id = %user_id,
            cql = schema::SELECT_CONVERSATIONS_CONTAINING_USER.trim(),
            "Executing statement on every node"
        );
        let rows = self
            .nodes
            .iter()
            .flat_map(|node| {
                node.conversations
                    .iter()
                    .filter(|entry| entry.value().has_participant(user_id))
                    .map(|entry| entry.value().clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        Ok(rows)
    }

    async fn upsert_user_conversation(
        &self,
        target: &ScanTarget,
        row: ConversationByUser,
    ) -> AppResult<bool> {
        expect_table(target, TableName::ConversationsByUser)?;
        let user_id = Self::user_key(target)?;
        if row.user_id != user_id {
            return Err(AppError::Internal(format!(
                "index row for user {} routed to {target}",
                row.user_id
            )));
        }

        Self::execute(schema::UPSERT_USER_CONVERSATION, target);
        let partition = self
            .node(target)?
            .user_index
            .entry(user_id)
            .or_default()
            .clone();

        let moved = partition.write().upsert(row);
        Ok(moved)
    }

    async fn scan_user_conversations(
        &self,
        target: &ScanTarget,
        range: &ClusteringRange,
    ) -> AppResult<Vec<ConversationByUser>> {
        expect_table(target, TableName::ConversationsByUser)?;
        let user_id = Self::user_key(target)?;

        Self::execute(
            if range.after.is_some() {
                schema::SELECT_USER_CONVERSATIONS_AFTER_POSITION
            } else {
                schema::SELECT_USER_CONVERSATIONS_PAGE
            },
            target,
        );
        let partition = match self.node(target)?.user_index.get(&user_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(Vec::new()),
        };

        let rows = partition.read().scan(range);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageId;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_713_000_000 + secs, 0).unwrap()
    }

    fn setup() -> (Arc<PartitionRouter>, InMemoryStore) {
        let router = Arc::new(PartitionRouter::new(3, 8));
        let store = InMemoryStore::new(router.clone());
        (router, store)
    }

    fn message(conversation_id: ConversationId, secs: i64) -> Message {
        Message {
            conversation_id,
            sent_at: ts(secs),
            message_id: MessageId::new(),
            sender_id: UserId(1),
            recipient_id: UserId(2),
            text: format!("hello {secs}"),
        }
    }

    #[tokio::test]
    async fn test_message_partition_round_trip() {
        let (router, store) = setup();
        let conversation_id = ConversationId::new();
        let target = router
            .route_conversation(TableName::MessagesByConversation, conversation_id)
            .unwrap();

        for secs in 0..5 {
            let outcome = store
                .insert_message(&target, message(conversation_id, secs))
                .await
                .unwrap();
            assert!(outcome.is_applied());
        }

        let rows = store
            .scan_messages(&target, &ClusteringRange::head(3))
            .await
            .unwrap();
        let times: Vec<_> = rows.iter().map(|m| m.sent_at).collect();
        assert_eq!(times, vec![ts(4), ts(3), ts(2)]);
        assert_eq!(store.message_count(conversation_id), 5);
    }

    #[tokio::test]
    async fn test_scan_of_unknown_partition_is_empty() {
        let (router, store) = setup();
        let target = router
            .route_conversation(TableName::MessagesByConversation, ConversationId::new())
            .unwrap();

        let rows = store
            .scan_messages(&target, &ClusteringRange::head(10))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_table_is_rejected() {
        let (router, store) = setup();
        let target = router
            .route_conversation(TableName::Conversations, ConversationId::new())
            .unwrap();

        let result = store
            .scan_messages(&target, &ClusteringRange::head(1))
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn test_update_last_message_requires_row() {
        let (router, store) = setup();
        let conversation_id = ConversationId::new();
        let target = router
            .route_conversation(TableName::Conversations, conversation_id)
            .unwrap();
        let last = LastMessage::from_message(&message(conversation_id, 1), 20);

        let missing = store.update_last_message(&target, &last).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        let conversation = Conversation::new(conversation_id, [UserId(1), UserId(2)], ts(0));
        assert!(store
            .insert_conversation(&target, conversation.clone())
            .await
            .unwrap()
            .is_applied());
        assert!(matches!(
            store.insert_conversation(&target, conversation).await.unwrap(),
            InsertOutcome::Existing(_)
        ));

        assert!(store.update_last_message(&target, &last).await.unwrap());
        let row = store.get_conversation(&target).await.unwrap().unwrap();
        assert_eq!(row.last_message_content.as_deref(), Some("hello 1"));
    }

    #[tokio::test]
    async fn test_add_participants_merges_into_row() {
        let (router, store) = setup();
        let conversation_id = ConversationId::new();
        let target = router
            .route_conversation(TableName::Conversations, conversation_id)
            .unwrap();

        let missing = store.add_participants(&target, &[UserId(3)]).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        store
            .insert_conversation(
                &target,
                Conversation::new(conversation_id, [UserId(1), UserId(2)], ts(0)),
            )
            .await
            .unwrap();
        let merged = store
            .add_participants(&target, &[UserId(3), UserId(1)])
            .await
            .unwrap();
        assert_eq!(merged.participants, vec![UserId(1), UserId(2), UserId(3)]);

        let found = store.scan_conversations_containing(UserId(3)).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_filtering_scan_visits_every_node() {
        let (router, store) = setup();
        let mut expected = Vec::new();

        for i in 0..30 {
            let conversation_id = ConversationId::new();
            let target = router
                .route_conversation(TableName::Conversations, conversation_id)
                .unwrap();
            let participants = if i % 2 == 0 {
                [UserId(7), UserId(100 + i)]
            } else {
                [UserId(8), UserId(100 + i)]
            };
            store
                .insert_conversation(&target, Conversation::new(conversation_id, participants, ts(i)))
                .await
                .unwrap();
            if i % 2 == 0 {
                expected.push(conversation_id);
            }
        }

        let mut found: Vec<_> = store
            .scan_conversations_containing(UserId(7))
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.conversation_id)
            .collect();
        found.sort();
        expected.sort();
        assert_eq!(found, expected);
        assert!(store.partitions_per_node().iter().filter(|n| **n > 0).count() > 1);
    }
}
