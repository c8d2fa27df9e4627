#![allow(dead_code)]

use async_trait::async_trait;
use chat_store::models::{Conversation, ConversationByUser, LastMessage, Message};
use chat_store::routing::{PartitionRouter, ScanTarget};
use chat_store::store::{ClusteringRange, InMemoryStore, InsertOutcome, WideColumnStore};
use chat_store::{
    AppError, AppResult, ChatStore, Config, ConversationId, NewMessage, RepairConfig,
    SchemaVariant, SendReceipt, UserId,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Wraps the in-memory engine and fails index-table writes on demand.
/// `messages_by_conversation` writes always go through.
pub struct FlakyStore {
    inner: InMemoryStore,
    fail_index_writes: AtomicBool,
    injected_failures: AtomicU32,
}

impl FlakyStore {
    pub fn new(router: Arc<PartitionRouter>) -> Self {
        Self {
            inner: InMemoryStore::new(router),
            fail_index_writes: AtomicBool::new(false),
            injected_failures: AtomicU32::new(0),
        }
    }

    pub fn fail_index_writes(&self, fail: bool) {
        self.fail_index_writes.store(fail, Ordering::SeqCst);
    }

    pub fn injected_failures(&self) -> u32 {
        self.injected_failures.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &str) -> AppResult<()> {
        if self.fail_index_writes.load(Ordering::SeqCst) {
            self.injected_failures.fetch_add(1, Ordering::SeqCst);
            return Err(AppError::Storage(format!("{operation}: replica timeout")));
        }
        Ok(())
    }
}

#[async_trait]
impl WideColumnStore for FlakyStore {
    async fn insert_message(
        &self,
        target: &ScanTarget,
        message: Message,
    ) -> AppResult<InsertOutcome<Message>> {
        self.inner.insert_message(target, message).await
    }

    async fn scan_messages(
        &self,
        target: &ScanTarget,
        range: &ClusteringRange,
    ) -> AppResult<Vec<Message>> {
        self.inner.scan_messages(target, range).await
    }

    async fn get_conversation(&self, target: &ScanTarget) -> AppResult<Option<Conversation>> {
        self.inner.get_conversation(target).await
    }

    async fn insert_conversation(
        &self,
        target: &ScanTarget,
        conversation: Conversation,
    ) -> AppResult<InsertOutcome<Conversation>> {
        self.check("insert_conversation")?;
        self.inner.insert_conversation(target, conversation).await
    }

    async fn update_last_message(
        &self,
        target: &ScanTarget,
        last: &LastMessage,
    ) -> AppResult<bool> {
        self.check("update_last_message")?;
        self.inner.update_last_message(target, last).await
    }

    async fn add_participants(
        &self,
        target: &ScanTarget,
        participants: &[UserId],
    ) -> AppResult<Conversation> {
        self.check("add_participants")?;
        self.inner.add_participants(target, participants).await
    }

    async fn scan_conversations_containing(&self, user_id: UserId) -> AppResult<Vec<Conversation>> {
        self.inner.scan_conversations_containing(user_id).await
    }

    async fn upsert_user_conversation(
        &self,
        target: &ScanTarget,
        row: ConversationByUser,
    ) -> AppResult<bool> {
        self.check("upsert_user_conversation")?;
        self.inner.upsert_user_conversation(target, row).await
    }

    async fn scan_user_conversations(
        &self,
        target: &ScanTarget,
        range: &ClusteringRange,
    ) -> AppResult<Vec<ConversationByUser>> {
        self.inner.scan_user_conversations(target, range).await
    }
}

pub fn init() {
    chat_store::logging::init_tracing();
}

pub fn test_config(variant: SchemaVariant) -> Config {
    Config {
        schema_variant: variant,
        repair: RepairConfig {
            max_retries: 1,
            initial_backoff: std::time::Duration::from_millis(1),
            max_backoff: std::time::Duration::from_millis(5),
            max_attempts: 3,
            batch_size: 50,
            poll_interval: std::time::Duration::from_millis(20),
        },
        ..Config::default()
    }
}

pub fn memory_store(variant: SchemaVariant) -> ChatStore {
    init();
    ChatStore::in_memory(test_config(variant)).unwrap()
}

pub fn flaky_chat_store(config: Config) -> (ChatStore, Arc<FlakyStore>) {
    init();
    let router = Arc::new(PartitionRouter::new(config.node_count, config.vnodes_per_node));
    let flaky = Arc::new(FlakyStore::new(router.clone()));
    let store = ChatStore::with_backend(config, router, flaky.clone()).unwrap();
    (store, flaky)
}

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn base_time() -> DateTime<Utc> {
    at("2024-04-13T10:00:00Z")
}

/// Send `count` messages one second apart starting at `base_time()`; returns receipts oldest first.
pub async fn seed_messages(
    store: &ChatStore,
    conversation_id: ConversationId,
    count: i64,
) -> Vec<SendReceipt> {
    let mut receipts = Vec::new();
    for i in 0..count {
        let receipt = store
            .send_message(
                NewMessage::new(conversation_id, UserId(1), UserId(2), format!("message {i}"))
                    .with_sent_at(base_time() + Duration::seconds(i)),
            )
            .await
            .unwrap();
        receipts.push(receipt);
    }
    receipts
}
