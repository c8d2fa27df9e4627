use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct StoreMetrics {
    pub messages_written: IntCounter,
    pub duplicate_resends: IntCounter,
    pub consistency_violations: IntCounter,
    pub index_write_failures: IntCounterVec,
    pub repair_queue_depth: IntGauge,
    pub repairs_succeeded: IntCounter,
    pub repairs_dead_lettered: IntCounter,
    pub filtering_scans: IntCounter,
}

impl StoreMetrics {
    pub fn new(store: &str) -> Self {
        let registry = prometheus::default_registry();

        let messages_written = IntCounter::with_opts(
            Opts::new(
                "chat_store_messages_written_total",
                "Messages accepted into messages_by_conversation",
            )
            .const_label("store", store.to_string()),
        )
        .expect("valid metric opts for chat_store_messages_written_total");

        let duplicate_resends = IntCounter::with_opts(
            Opts::new(
                "chat_store_duplicate_resends_total",
                "Resends that matched an existing identical message row",
            )
            .const_label("store", store.to_string()),
        )
        .expect("valid metric opts for chat_store_duplicate_resends_total");

        let consistency_violations = IntCounter::with_opts(
            Opts::new(
                "chat_store_consistency_violations_total",
                "Writes rejected because the clustering key was already taken",
            )
            .const_label("store", store.to_string()),
        )
        .expect("valid metric opts for chat_store_consistency_violations_total");

        let index_write_failures = IntCounterVec::new(
            Opts::new(
                "chat_store_index_write_failures_total",
                "Denormalized index writes that failed after the message write",
            )
            .const_label("store", store.to_string()),
            &["reason"],
        )
        .expect("valid metric opts for chat_store_index_write_failures_total");

        let repair_queue_depth = IntGauge::with_opts(
            Opts::new(
                "chat_store_repair_queue_depth",
                "Conversations waiting for index repair",
            )
            .const_label("store", store.to_string()),
        )
        .expect("valid metric opts for chat_store_repair_queue_depth");

        let repairs_succeeded = IntCounter::with_opts(
            Opts::new(
                "chat_store_repairs_succeeded_total",
                "Conversations whose indexes were reconciled",
            )
            .const_label("store", store.to_string()),
        )
        .expect("valid metric opts for chat_store_repairs_succeeded_total");

        let repairs_dead_lettered = IntCounter::with_opts(
            Opts::new(
                "chat_store_repairs_dead_lettered_total",
                "Repair tasks abandoned after exhausting their attempts",
            )
            .const_label("store", store.to_string()),
        )
        .expect("valid metric opts for chat_store_repairs_dead_lettered_total");

        let filtering_scans = IntCounter::with_opts(
            Opts::new(
                "chat_store_filtering_scans_total",
                "Conversation listings served by a multi-partition filtering scan",
            )
            .const_label("store", store.to_string()),
        )
        .expect("valid metric opts for chat_store_filtering_scans_total");

        for metric in [
            Box::new(messages_written.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(duplicate_resends.clone()),
            Box::new(consistency_violations.clone()),
            Box::new(index_write_failures.clone()),
            Box::new(repair_queue_depth.clone()),
            Box::new(repairs_succeeded.clone()),
            Box::new(repairs_dead_lettered.clone()),
            Box::new(filtering_scans.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register chat store metric: {}", e);
            }
        }

        Self {
            messages_written,
            duplicate_resends,
            consistency_violations,
            index_write_failures,
            repair_queue_depth,
            repairs_succeeded,
            repairs_dead_lettered,
            filtering_scans,
        }
    }
}
