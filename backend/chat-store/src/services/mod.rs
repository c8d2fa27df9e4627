pub mod conversation_service;
pub mod dual_write;
pub mod query_planner;

pub use conversation_service::ConversationService;
pub use dual_write::{DualWriteCoordinator, IndexWriter};
pub use query_planner::{QueryPlan, QueryPlanner};
