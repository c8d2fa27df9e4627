use crate::metrics::StoreMetrics;
use crate::models::ConversationId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use tokio::sync::Notify;
use tracing::{error, info};

/// A conversation whose denormalized copies may be stale
#[derive(Debug, Clone, Serialize)]
pub struct RepairTask {
    pub conversation_id: ConversationId,
    /// Repair passes that already failed for this task
    pub attempts: u32,
    pub last_error: String,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    Requeued,
    /// Another failure re-queued the conversation while this task was in flight
    AlreadyQueued,
    DeadLettered,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<RepairTask>,
    queued: HashSet<ConversationId>,
    dead_letters: Vec<RepairTask>,
}

/// In-process repair queue, deduplicated per conversation.
///
/// Repair re-reads the source of truth, so one queued task covers any number
/// of failed index writes for the same conversation.
pub struct RepairQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    max_attempts: u32,
    metrics: StoreMetrics,
}

impl RepairQueue {
    pub fn new(max_attempts: u32, metrics: StoreMetrics) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            max_attempts: max_attempts.max(1),
            metrics,
        }
    }

    /// Returns false when the conversation was already waiting for repair.
    pub fn enqueue(&self, conversation_id: ConversationId, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let inserted = {
            let mut state = self.state.lock();
            if state.queued.insert(conversation_id) {
                state.pending.push_back(RepairTask {
                    conversation_id,
                    attempts: 0,
                    last_error: reason,
                    enqueued_at: Utc::now(),
                });
                true
            } else {
                if let Some(task) = state
                    .pending
                    .iter_mut()
                    .find(|t| t.conversation_id == conversation_id)
                {
                    task.last_error = reason;
                }
                false
            }
        };

        if inserted {
            self.publish_depth();
            self.notify.notify_one();
        }
        inserted
    }

    /// Remove up to `max` tasks from the front of the queue.
    pub fn take_batch(&self, max: usize) -> Vec<RepairTask> {
        let batch: Vec<RepairTask> = {
            let mut state = self.state.lock();
            let count = max.min(state.pending.len());
            let batch: Vec<RepairTask> = state.pending.drain(..count).collect();
            for task in &batch {
                state.queued.remove(&task.conversation_id);
            }
            batch
        };

        self.publish_depth();
        batch
    }

    /// Record a failed pass for `task`; dead-letters it once attempts run out.
    pub fn requeue_failed(&self, mut task: RepairTask, error: &str) -> RequeueOutcome {
        task.attempts += 1;
        task.last_error = error.to_string();

        if task.attempts >= self.max_attempts {
            self.push_dead_letter(task);
            return RequeueOutcome::DeadLettered;
        }

        let outcome = {
            let mut state = self.state.lock();
            if state.queued.insert(task.conversation_id) {
                info!(
                    conversation_id = %task.conversation_id,
                    attempts = task.attempts,
                    "Index repair failed, re-queued"
                );
                state.pending.push_back(task);
                RequeueOutcome::Requeued
            } else {
                RequeueOutcome::AlreadyQueued
            }
        };

        self.publish_depth();
        outcome
    }

    /// Abandon a task whose failure no retry can fix.
    pub fn dead_letter(&self, mut task: RepairTask, error: &str) {
        task.attempts += 1;
        task.last_error = error.to_string();
        self.push_dead_letter(task);
    }

    fn push_dead_letter(&self, task: RepairTask) {
        error!(
            conversation_id = %task.conversation_id,
            attempts = task.attempts,
            last_error = %task.last_error,
            "Index repair abandoned, dead-lettering (requires manual intervention)"
        );
        self.state.lock().dead_letters.push(task);
        self.metrics.repairs_dead_lettered.inc();
    }

    pub fn depth(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    pub fn contains(&self, conversation_id: ConversationId) -> bool {
        self.state.lock().queued.contains(&conversation_id)
    }

    pub fn dead_letters(&self) -> Vec<RepairTask> {
        self.state.lock().dead_letters.clone()
    }

    /// Dead letters as JSON, for operators replaying them by hand.
    pub fn dead_letter_report(&self) -> serde_json::Value {
        let dead_letters = self.dead_letters();
        serde_json::json!({
            "count": dead_letters.len(),
            "tasks": dead_letters,
        })
    }

    /// Resolves on the next enqueue.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    fn publish_depth(&self) {
        self.metrics.repair_queue_depth.set(self.depth() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(max_attempts: u32) -> RepairQueue {
        RepairQueue::new(max_attempts, StoreMetrics::new("repair_queue_test"))
    }

    #[test]
    fn test_enqueue_deduplicates_per_conversation() {
        let queue = queue(3);
        let id = ConversationId::new();

        assert!(queue.enqueue(id, "timeout"));
        assert!(!queue.enqueue(id, "timeout again"));
        assert!(queue.enqueue(ConversationId::new(), "timeout"));
        assert_eq!(queue.depth(), 2);

        let batch = queue.take_batch(10);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].conversation_id, id);
        assert_eq!(batch[0].last_error, "timeout again");
        assert!(queue.is_empty());
        assert!(!queue.contains(id));
    }

    #[test]
    fn test_take_batch_respects_size() {
        let queue = queue(3);
        for _ in 0..5 {
            queue.enqueue(ConversationId::new(), "timeout");
        }

        assert_eq!(queue.take_batch(2).len(), 2);
        assert_eq!(queue.depth(), 3);
    }

    #[test]
    fn test_failed_task_dead_lettered_after_max_attempts() {
        let queue = queue(2);
        let id = ConversationId::new();
        queue.enqueue(id, "timeout");

        let task = queue.take_batch(1).remove(0);
        assert_eq!(queue.requeue_failed(task, "still down"), RequeueOutcome::Requeued);

        let task = queue.take_batch(1).remove(0);
        assert_eq!(task.attempts, 1);
        assert_eq!(queue.requeue_failed(task, "still down"), RequeueOutcome::DeadLettered);

        assert!(queue.is_empty());
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].conversation_id, id);
        assert_eq!(dead[0].attempts, 2);
    }

    #[test]
    fn test_requeue_merges_with_newer_failure() {
        let queue = queue(5);
        let id = ConversationId::new();
        queue.enqueue(id, "first");

        let in_flight = queue.take_batch(1).remove(0);
        queue.enqueue(id, "second");

        assert_eq!(
            queue.requeue_failed(in_flight, "first again"),
            RequeueOutcome::AlreadyQueued
        );
        assert_eq!(queue.depth(), 1);
    }
}
