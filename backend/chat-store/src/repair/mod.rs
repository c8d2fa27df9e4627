//! Asynchronous reconciliation of denormalized conversation indexes.

mod backoff;
mod queue;
mod worker;

pub use backoff::{with_retry, RetryConfig, RetryError};
pub use queue::{RepairQueue, RepairTask, RequeueOutcome};
pub use worker::{IndexRepairer, RepairPassStats, RepairWorker, RepairWorkerHandle};
