//! Turns logical reads into partition-scoped range scans.
//!
//! Every message read is a single [`QueryPlan::PartitionSlice`]. Conversation
//! listings are a single slice of `conversations_by_user` under the default
//! schema variant, or a [`QueryPlan::FilteringScan`] over `conversations`
//! when the deployment runs without that index.

use crate::codec::{clustering_cmp, normalize_timestamp, ClusteringKey};
use crate::config::{Config, SchemaVariant};
use crate::error::{AppError, AppResult};
use crate::metrics::StoreMetrics;
use crate::models::{
    Conversation, ConversationByUser, ConversationId, ConversationSummary, Message, UserId,
};
use crate::pagination::{resolve_limit, CursorCodec, CursorScope, Page};
use crate::routing::{PartitionRouter, ScanTarget, TableName};
use crate::schema;
use crate::store::{ClusteringRange, WideColumnStore};
use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    /// Range scan inside one partition
    PartitionSlice {
        target: ScanTarget,
        range: ClusteringRange,
        page_size: usize,
    },
    /// Multi-partition scan filtered on a collection column
    FilteringScan {
        table: TableName,
        contains_user: UserId,
        after: Option<ClusteringKey>,
        page_size: usize,
    },
}

impl QueryPlan {
    pub fn is_single_partition(&self) -> bool {
        matches!(self, QueryPlan::PartitionSlice { .. })
    }

    pub fn page_size(&self) -> usize {
        match self {
            QueryPlan::PartitionSlice { page_size, .. }
            | QueryPlan::FilteringScan { page_size, .. } => *page_size,
        }
    }

    /// Statement a CQL backend would run for this plan
    pub fn cql(&self) -> &'static str {
        match self {
            QueryPlan::PartitionSlice { target, range, .. } => {
                match (target.table(), range.after.is_some()) {
                    (TableName::MessagesByConversation, false) => schema::SELECT_MESSAGES_PAGE,
                    (TableName::MessagesByConversation, true) => {
                        schema::SELECT_MESSAGES_AFTER_POSITION
                    }
                    (TableName::ConversationsByUser, false) => {
                        schema::SELECT_USER_CONVERSATIONS_PAGE
                    }
                    (TableName::ConversationsByUser, true) => {
                        schema::SELECT_USER_CONVERSATIONS_AFTER_POSITION
                    }
                    (TableName::Conversations, _) => schema::SELECT_CONVERSATION,
                }
            }
            QueryPlan::FilteringScan { .. } => schema::SELECT_CONVERSATIONS_CONTAINING_USER,
        }
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryPlan::PartitionSlice {
                target, page_size, ..
            } => write!(f, "slice {} limit {}", target, page_size),
            QueryPlan::FilteringScan {
                table,
                contains_user,
                page_size,
                ..
            } => write!(
                f,
                "filtering scan {} contains {} limit {}",
                table, contains_user, page_size
            ),
        }
    }
}

#[derive(Clone)]
pub struct QueryPlanner {
    router: Arc<PartitionRouter>,
    store: Arc<dyn WideColumnStore>,
    config: Arc<Config>,
    metrics: StoreMetrics,
}

impl QueryPlanner {
    pub fn new(
        router: Arc<PartitionRouter>,
        store: Arc<dyn WideColumnStore>,
        config: Arc<Config>,
        metrics: StoreMetrics,
    ) -> Self {
        Self {
            router,
            store,
            config,
            metrics,
        }
    }

    /// `None` falls back to the configured default page size.
    fn page_size(&self, limit: Option<i32>) -> AppResult<usize> {
        resolve_limit(
            limit.unwrap_or(self.config.default_page_size),
            self.config.max_page_size,
        )
    }

    pub fn plan_fetch_messages(
        &self,
        conversation_id: ConversationId,
        before_cursor: Option<&str>,
        limit: Option<i32>,
    ) -> AppResult<QueryPlan> {
        let page_size = self.page_size(limit)?;
        let target = self
            .router
            .route_conversation(TableName::MessagesByConversation, conversation_id)?;

        let range = match before_cursor {
            Some(token) => {
                let cursor =
                    CursorCodec::decode_for(token, CursorScope::Messages(conversation_id))?;
                ClusteringRange::after(&cursor.position, page_size + 1)
            }
            None => ClusteringRange::head(page_size + 1),
        };

        Ok(QueryPlan::PartitionSlice {
            target,
            range,
            page_size,
        })
    }

    /// Newest-first page of a conversation, resuming strictly after `before_cursor`.
    pub async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        before_cursor: Option<&str>,
        limit: Option<i32>,
    ) -> AppResult<Page<Message>> {
        let plan = self.plan_fetch_messages(conversation_id, before_cursor, limit)?;
        self.execute_message_slice(conversation_id, plan).await
    }

    /// Messages sent strictly before `before`, newest first.
    pub async fn fetch_messages_before(
        &self,
        conversation_id: ConversationId,
        before: DateTime<Utc>,
        limit: Option<i32>,
    ) -> AppResult<Page<Message>> {
        let page_size = self.page_size(limit)?;
        let target = self
            .router
            .route_conversation(TableName::MessagesByConversation, conversation_id)?;

        // A sub-millisecond bound still admits rows stored at its truncated millisecond
        let truncated = normalize_timestamp(before);
        let bound = if truncated == before {
            Some(before)
        } else {
            truncated.checked_add_signed(Duration::milliseconds(1))
        };

        // Past the last representable millisecond nothing is excluded
        let range = match bound {
            Some(bound) => {
                ClusteringRange::after(&ClusteringKey::after_timestamp(bound), page_size + 1)
            }
            None => ClusteringRange::head(page_size + 1),
        };

        let plan = QueryPlan::PartitionSlice {
            target,
            range,
            page_size,
        };
        self.execute_message_slice(conversation_id, plan).await
    }

    async fn execute_message_slice(
        &self,
        conversation_id: ConversationId,
        plan: QueryPlan,
    ) -> AppResult<Page<Message>> {
        let (target, range, page_size) = match plan {
            QueryPlan::PartitionSlice {
                target,
                range,
                page_size,
            } => (target, range, page_size),
            other => {
                return Err(AppError::Internal(format!(
                    "message read planned as {other}"
                )))
            }
        };

        debug!(
            conversation_id = %conversation_id,
            page_size,
            resumed = range.after.is_some(),
            "Scanning messages_by_conversation partition"
        );

        let rows = self.store.scan_messages(&target, &range).await?;
        if rows.is_empty() {
            self.ensure_conversation_exists(conversation_id).await?;
        }

        Ok(Page::from_overfetch(
            rows,
            page_size,
            CursorScope::Messages(conversation_id),
            Message::clustering_key,
        ))
    }

    /// Only consulted when a scan came back empty: tells an empty page from a missing conversation.
    async fn ensure_conversation_exists(&self, conversation_id: ConversationId) -> AppResult<()> {
        let conversation_target = self
            .router
            .route_conversation(TableName::Conversations, conversation_id)?;
        if self
            .store
            .get_conversation(&conversation_target)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let message_target = self
            .router
            .route_conversation(TableName::MessagesByConversation, conversation_id)?;
        let any = self
            .store
            .scan_messages(&message_target, &ClusteringRange::head(1))
            .await?;
        if any.is_empty() {
            return Err(AppError::not_found("conversation", conversation_id));
        }
        Ok(())
    }

    pub fn plan_fetch_conversations(
        &self,
        user_id: UserId,
        cursor: Option<&str>,
        limit: Option<i32>,
    ) -> AppResult<QueryPlan> {
        let page_size = self.page_size(limit)?;
        let target = self.router.route_user(user_id)?;

        let after = cursor
            .map(|token| CursorCodec::decode_for(token, CursorScope::Conversations(user_id)))
            .transpose()?
            .map(|c| c.position);

        let plan = match self.config.schema_variant {
            SchemaVariant::ConversationsByUser => QueryPlan::PartitionSlice {
                target,
                range: match after {
                    Some(position) => ClusteringRange::after(&position, page_size + 1),
                    None => ClusteringRange::head(page_size + 1),
                },
                page_size,
            },
            SchemaVariant::ConversationsTable => QueryPlan::FilteringScan {
                table: TableName::Conversations,
                contains_user: user_id,
                after,
                page_size,
            },
        };
        Ok(plan)
    }

    /// A user's conversations, most recent activity first.
    pub async fn fetch_conversations_for_user(
        &self,
        user_id: UserId,
        cursor: Option<&str>,
        limit: Option<i32>,
    ) -> AppResult<Page<ConversationSummary>> {
        let plan = self.plan_fetch_conversations(user_id, cursor, limit)?;
        debug!(user_id = %user_id, plan = %plan, "Listing conversations");

        match plan {
            QueryPlan::PartitionSlice {
                target,
                range,
                page_size,
            } => {
                let rows = self.store.scan_user_conversations(&target, &range).await?;
                let page = Page::from_overfetch(
                    rows,
                    page_size,
                    CursorScope::Conversations(user_id),
                    ConversationByUser::clustering_key,
                );

                let items = self.hydrate(page.items).await?;
                Ok(Page {
                    items,
                    next_cursor: page.next_cursor,
                })
            }
            QueryPlan::FilteringScan {
                contains_user,
                after,
                page_size,
                ..
            } => {
                self.metrics.filtering_scans.inc();
                let conversations = self
                    .store
                    .scan_conversations_containing(contains_user)
                    .await?;
                debug!(
                    user_id = %contains_user,
                    matched = conversations.len(),
                    "Filtering scan visited every node"
                );

                Ok(Self::page_filtered(conversations, contains_user, after, page_size))
            }
        }
    }

    /// Attach previews from `conversations` to index rows by primary-key reads.
    async fn hydrate(&self, rows: Vec<ConversationByUser>) -> AppResult<Vec<ConversationSummary>> {
        let lookups = rows.into_iter().map(|row| async move {
            let target = self
                .router
                .route_conversation(TableName::Conversations, row.conversation_id)?;
            let conversation = self.store.get_conversation(&target).await?;

            Ok::<_, AppError>(ConversationSummary {
                conversation_id: row.conversation_id,
                participant_id: Some(row.participant_id),
                last_activity: row.last_activity,
                last_message_preview: conversation.and_then(|c| c.last_message_content),
            })
        });

        try_join_all(lookups).await
    }

    fn page_filtered(
        conversations: Vec<Conversation>,
        user_id: UserId,
        after: Option<ClusteringKey>,
        page_size: usize,
    ) -> Page<ConversationSummary> {
        let mut summaries: Vec<ConversationSummary> = conversations
            .into_iter()
            .map(|c| ConversationSummary {
                conversation_id: c.conversation_id,
                participant_id: c.counterpart(user_id),
                last_activity: c.last_message_at,
                last_message_preview: c.last_message_content,
            })
            .filter(|s| match &after {
                Some(position) => clustering_cmp(&s.activity_key(), position) == Ordering::Greater,
                None => true,
            })
            .collect();

        summaries.sort_by(|a, b| clustering_cmp(&a.activity_key(), &b.activity_key()));
        summaries.truncate(page_size + 1);

        Page::from_overfetch(
            summaries,
            page_size,
            CursorScope::Conversations(user_id),
            ConversationSummary::activity_key,
        )
    }
}
