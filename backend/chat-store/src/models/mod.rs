mod conversation;
mod ids;
mod message;

pub use conversation::{Conversation, ConversationByUser, ConversationSummary, LastMessage};
pub use ids::{ConversationId, MessageId, UserId};
pub use message::{IndexStatus, Message, NewMessage, SendReceipt};
