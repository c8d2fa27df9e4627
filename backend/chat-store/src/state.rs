use crate::config::Config;
use crate::error::AppResult;
use crate::metrics::StoreMetrics;
use crate::models::{
    Conversation, ConversationId, ConversationSummary, Message, NewMessage, SendReceipt, UserId,
};
use crate::pagination::Page;
use crate::repair::{
    IndexRepairer, RepairPassStats, RepairQueue, RepairTask, RepairWorker, RepairWorkerHandle,
};
use crate::routing::PartitionRouter;
use crate::services::{ConversationService, DualWriteCoordinator, IndexWriter, QueryPlanner};
use crate::store::{InMemoryStore, WideColumnStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Entry point wiring router, store, planner, coordinator and repair together.
#[derive(Clone)]
pub struct ChatStore {
    pub config: Arc<Config>,
    pub router: Arc<PartitionRouter>,
    pub store: Arc<dyn WideColumnStore>,
    pub planner: QueryPlanner,
    pub coordinator: Arc<DualWriteCoordinator>,
    pub conversations: Arc<ConversationService>,
    pub repair_queue: Arc<RepairQueue>,
    pub repair_worker: Arc<RepairWorker>,
    pub metrics: StoreMetrics,
}

impl ChatStore {
    /// Backed by the sharded in-process engine.
    pub fn in_memory(config: Config) -> AppResult<Self> {
        config.validate()?;
        let router = Arc::new(PartitionRouter::new(config.node_count, config.vnodes_per_node));
        let store = Arc::new(InMemoryStore::new(router.clone()));
        Self::with_backend(config, router, store)
    }

    /// Wire the services over any backing store routed by `router`.
    pub fn with_backend(
        config: Config,
        router: Arc<PartitionRouter>,
        store: Arc<dyn WideColumnStore>,
    ) -> AppResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = StoreMetrics::new("chat_store");

        let repair_queue = Arc::new(RepairQueue::new(
            config.repair.max_attempts,
            metrics.clone(),
        ));
        let index = IndexWriter::new(router.clone(), store.clone(), config.clone());

        let planner = QueryPlanner::new(
            router.clone(),
            store.clone(),
            config.clone(),
            metrics.clone(),
        );
        let coordinator = Arc::new(DualWriteCoordinator::new(
            router.clone(),
            store.clone(),
            index.clone(),
            repair_queue.clone(),
            metrics.clone(),
        ));
        let conversations = Arc::new(ConversationService::new(
            router.clone(),
            store.clone(),
            index.clone(),
            repair_queue.clone(),
            config.clone(),
            metrics.clone(),
        ));
        let repair_worker = Arc::new(RepairWorker::new(
            repair_queue.clone(),
            IndexRepairer::new(router.clone(), store.clone(), index),
            &config.repair,
            metrics.clone(),
        ));

        Ok(Self {
            config,
            router,
            store,
            planner,
            coordinator,
            conversations,
            repair_queue,
            repair_worker,
            metrics,
        })
    }

    pub async fn send_message(&self, message: NewMessage) -> AppResult<SendReceipt> {
        self.coordinator.send_message(message).await
    }

    /// Get-or-create the direct conversation, then send into it.
    pub async fn send_direct_message(
        &self,
        sender_id: UserId,
        recipient_id: UserId,
        text: impl Into<String>,
    ) -> AppResult<SendReceipt> {
        let conversation = self
            .conversations
            .open_direct_conversation(sender_id, recipient_id)
            .await?;
        self.coordinator
            .send_message(NewMessage::new(
                conversation.conversation_id,
                sender_id,
                recipient_id,
                text,
            ))
            .await
    }

    pub async fn resend_message(&self, message: &Message) -> AppResult<SendReceipt> {
        self.coordinator.resend_message(message).await
    }

    /// Pages default to `Config::default_page_size` when `limit` is `None`.
    pub async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        before_cursor: Option<&str>,
        limit: impl Into<Option<i32>>,
    ) -> AppResult<Page<Message>> {
        self.planner
            .fetch_messages(conversation_id, before_cursor, limit.into())
            .await
    }

    pub async fn fetch_messages_before(
        &self,
        conversation_id: ConversationId,
        before: DateTime<Utc>,
        limit: impl Into<Option<i32>>,
    ) -> AppResult<Page<Message>> {
        self.planner
            .fetch_messages_before(conversation_id, before, limit.into())
            .await
    }

    pub async fn fetch_conversations_for_user(
        &self,
        user_id: UserId,
        cursor: Option<&str>,
        limit: impl Into<Option<i32>>,
    ) -> AppResult<Page<ConversationSummary>> {
        self.planner
            .fetch_conversations_for_user(user_id, cursor, limit.into())
            .await
    }

    pub async fn open_direct_conversation(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> AppResult<Conversation> {
        self.conversations
            .open_direct_conversation(user_a, user_b)
            .await
    }

    pub async fn get_conversation(&self, conversation_id: ConversationId) -> AppResult<Conversation> {
        self.conversations.get_conversation(conversation_id).await
    }

    pub async fn run_repair_pass(&self) -> RepairPassStats {
        self.repair_worker.run_pass().await
    }

    pub async fn reconcile_conversation(&self, conversation_id: ConversationId) -> AppResult<()> {
        self.repair_worker.reconcile(conversation_id).await
    }

    pub fn spawn_repair_worker(&self) -> RepairWorkerHandle {
        self.repair_worker.clone().spawn()
    }

    pub fn repair_queue_depth(&self) -> usize {
        self.repair_queue.depth()
    }

    pub fn dead_letters(&self) -> Vec<RepairTask> {
        self.repair_queue.dead_letters()
    }
}
