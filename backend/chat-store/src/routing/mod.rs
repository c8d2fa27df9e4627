//! Partition key routing.
//!
//! Callers get a [`ScanTarget`] naming the logical partition; which storage
//! node owns it stays inside the crate.

mod ring;

pub use ring::{NodeId, Token, TokenRing};

use crate::error::{AppError, AppResult};
use crate::models::{ConversationId, UserId};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableName {
    MessagesByConversation,
    Conversations,
    ConversationsByUser,
}

impl TableName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::MessagesByConversation => "messages_by_conversation",
            TableName::Conversations => "conversations",
            TableName::ConversationsByUser => "conversations_by_user",
        }
    }

    fn accepts(&self, key: &PartitionKey) -> bool {
        match self {
            TableName::MessagesByConversation | TableName::Conversations => {
                matches!(key, PartitionKey::Conversation(_))
            }
            TableName::ConversationsByUser => matches!(key, PartitionKey::User(_)),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    Conversation(ConversationId),
    User(UserId),
}

impl PartitionKey {
    fn to_bytes(self) -> Vec<u8> {
        match self {
            PartitionKey::Conversation(id) => id.0.as_bytes().to_vec(),
            PartitionKey::User(id) => id.0.to_be_bytes().to_vec(),
        }
    }

    fn validate(&self) -> AppResult<()> {
        match self {
            PartitionKey::Conversation(id) if id.0.is_nil() => Err(AppError::NotFound(
                "conversation partition key is the nil uuid".into(),
            )),
            PartitionKey::User(id) if id.0 <= 0 => Err(AppError::NotFound(format!(
                "user partition key {} is not a valid user id",
                id
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Conversation(id) => write!(f, "conversation_id={id}"),
            PartitionKey::User(id) => write!(f, "user_id={id}"),
        }
    }
}

/// The single partition a query or write is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanTarget {
    table: TableName,
    key: PartitionKey,
    token: Token,
}

impl ScanTarget {
    pub fn table(&self) -> TableName {
        self.table
    }

    pub fn key(&self) -> PartitionKey {
        self.key
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self.key {
            PartitionKey::Conversation(id) => Some(id),
            PartitionKey::User(_) => None,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self.key {
            PartitionKey::User(id) => Some(id),
            PartitionKey::Conversation(_) => None,
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.table, self.key)
    }
}

#[derive(Debug)]
pub struct PartitionRouter {
    ring: TokenRing,
}

impl PartitionRouter {
    pub fn new(node_count: usize, vnodes_per_node: usize) -> Self {
        Self {
            ring: TokenRing::new(node_count, vnodes_per_node),
        }
    }

    pub fn node_count(&self) -> usize {
        self.ring.node_count()
    }

    pub fn route(&self, table: TableName, key: PartitionKey) -> AppResult<ScanTarget> {
        key.validate()?;
        if !table.accepts(&key) {
            return Err(AppError::NotFound(format!(
                "{table} is not partitioned by {key}"
            )));
        }

        Ok(ScanTarget {
            table,
            key,
            token: Token::of(&key.to_bytes()),
        })
    }

    pub fn route_conversation(
        &self,
        table: TableName,
        conversation_id: ConversationId,
    ) -> AppResult<ScanTarget> {
        self.route(table, PartitionKey::Conversation(conversation_id))
    }

    pub fn route_user(&self, user_id: UserId) -> AppResult<ScanTarget> {
        self.route(TableName::ConversationsByUser, PartitionKey::User(user_id))
    }

    /// Route a textual identifier; unparsable ids address no partition.
    pub fn route_raw(&self, table: TableName, raw: &str) -> AppResult<ScanTarget> {
        let key = match table {
            TableName::MessagesByConversation | TableName::Conversations => {
                let uuid = Uuid::parse_str(raw.trim()).map_err(|e| {
                    AppError::NotFound(format!("conversation id '{raw}' is malformed: {e}"))
                })?;
                PartitionKey::Conversation(ConversationId(uuid))
            }
            TableName::ConversationsByUser => {
                let id = raw.trim().parse::<i64>().map_err(|e| {
                    AppError::NotFound(format!("user id '{raw}' is malformed: {e}"))
                })?;
                PartitionKey::User(UserId(id))
            }
        };
        self.route(table, key)
    }

    pub(crate) fn owner(&self, target: &ScanTarget) -> NodeId {
        self.ring.owner(target.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_routing_is_deterministic() {
        let router = PartitionRouter::new(4, 8);
        let id = ConversationId::new();

        let a = router
            .route_conversation(TableName::MessagesByConversation, id)
            .unwrap();
        let b = router
            .route_conversation(TableName::MessagesByConversation, id)
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(router.owner(&a), router.owner(&b));
        assert_eq!(a.conversation_id(), Some(id));
    }

    #[test]
    fn test_message_and_conversation_tables_share_token() {
        let router = PartitionRouter::new(4, 8);
        let id = ConversationId::new();

        let messages = router
            .route_conversation(TableName::MessagesByConversation, id)
            .unwrap();
        let conversation = router
            .route_conversation(TableName::Conversations, id)
            .unwrap();

        assert_eq!(messages.token(), conversation.token());
        assert_ne!(messages, conversation);
    }

    #[test]
    fn test_malformed_keys_are_not_found() {
        let router = PartitionRouter::new(2, 4);

        let nil = router.route_conversation(
            TableName::MessagesByConversation,
            ConversationId(Uuid::nil()),
        );
        assert!(matches!(nil, Err(AppError::NotFound(_))));

        assert!(matches!(router.route_user(UserId(0)), Err(AppError::NotFound(_))));
        assert!(matches!(router.route_user(UserId(-7)), Err(AppError::NotFound(_))));

        let garbage = router.route_raw(TableName::MessagesByConversation, "not-a-uuid");
        assert!(matches!(garbage, Err(AppError::NotFound(_))));

        let bad_user = router.route_raw(TableName::ConversationsByUser, "12abc");
        assert!(matches!(bad_user, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_key_kind_must_match_table() {
        let router = PartitionRouter::new(2, 4);
        let wrong = router.route(TableName::ConversationsByUser, PartitionKey::Conversation(ConversationId::new()));
        assert!(matches!(wrong, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_route_raw_parses_ids() {
        let router = PartitionRouter::new(2, 4);
        let id = ConversationId::new();

        let target = router
            .route_raw(TableName::Conversations, &id.to_string())
            .unwrap();
        assert_eq!(target.conversation_id(), Some(id));

        let user = router
            .route_raw(TableName::ConversationsByUser, " 42 ")
            .unwrap();
        assert_eq!(user.user_id(), Some(UserId(42)));
    }

    #[test]
    fn test_partitions_spread_across_nodes() {
        let router = PartitionRouter::new(4, 32);
        let owners: HashSet<NodeId> = (0..400)
            .map(|_| {
                let target = router
                    .route_conversation(TableName::MessagesByConversation, ConversationId::new())
                    .unwrap();
                router.owner(&target)
            })
            .collect();

        assert_eq!(owners.len(), 4);
    }
}
