//! Partitioned, clustered message store access layer.
//!
//! Messages live in `messages_by_conversation`, partitioned by conversation
//! and clustered newest first. Conversation lists are served from the
//! denormalized `conversations` / `conversations_by_user` tables, which the
//! dual-write coordinator keeps in step and the repair worker reconciles.

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pagination;
pub mod repair;
pub mod routing;
pub mod schema;
pub mod services;
pub mod state;
pub mod store;

pub use config::{Config, RepairConfig, SchemaVariant};
pub use error::{AppError, AppResult};
pub use models::{
    Conversation, ConversationId, ConversationSummary, IndexStatus, Message, MessageId,
    NewMessage, SendReceipt, UserId,
};
pub use pagination::Page;
pub use state::ChatStore;
