use super::{ClusteringRange, InsertOutcome, ScanOrder};
use crate::codec::{ClusteringCodec, ClusteringKey, EncodedClusteringKey};
use crate::models::{ConversationByUser, ConversationId, Message};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

pub(crate) trait ClusteredRow: Clone {
    fn clustering_key(&self) -> ClusteringKey;
}

impl ClusteredRow for Message {
    fn clustering_key(&self) -> ClusteringKey {
        Message::clustering_key(self)
    }
}

impl ClusteredRow for ConversationByUser {
    fn clustering_key(&self) -> ClusteringKey {
        ConversationByUser::clustering_key(self)
    }
}

/// Rows of one partition, kept in encoded clustering order.
#[derive(Debug)]
pub(crate) struct Partition<R> {
    rows: BTreeMap<EncodedClusteringKey, R>,
}

impl<R> Default for Partition<R> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }
}

impl<R: ClusteredRow> Partition<R> {
    pub fn insert_if_absent(&mut self, row: R) -> InsertOutcome<R> {
        let key = ClusteringCodec::encode(&row.clustering_key());
        match self.rows.get(&key) {
            Some(existing) => InsertOutcome::Existing(existing.clone()),
            None => {
                self.rows.insert(key, row);
                InsertOutcome::Applied
            }
        }
    }

    pub fn remove(&mut self, key: &EncodedClusteringKey) -> Option<R> {
        self.rows.remove(key)
    }

    pub fn scan(&self, range: &ClusteringRange) -> Vec<R> {
        let bounds = match (range.order, range.after) {
            (_, None) => (Bound::Unbounded, Bound::Unbounded),
            (ScanOrder::Clustering, Some(after)) => (Bound::Excluded(after), Bound::Unbounded),
            (ScanOrder::Reversed, Some(after)) => (Bound::Unbounded, Bound::Excluded(after)),
        };
        let slice = self.rows.range(bounds).map(|(_, row)| row.clone());

        match range.order {
            ScanOrder::Clustering => slice.take(range.limit).collect(),
            ScanOrder::Reversed => slice.rev().take(range.limit).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// `conversations_by_user` partition: one row per conversation, re-keyed on activity.
#[derive(Debug, Default)]
pub(crate) struct UserIndexPartition {
    rows: Partition<ConversationByUser>,
    positions: HashMap<ConversationId, EncodedClusteringKey>,
}

impl UserIndexPartition {
    /// Returns false when the stored row is already at or past `row`'s activity.
    pub fn upsert(&mut self, row: ConversationByUser) -> bool {
        let key = ClusteringCodec::encode(&row.clustering_key());

        if let Some(current) = self.positions.get(&row.conversation_id).copied() {
            // Smaller encoded key means newer activity
            if key >= current {
                return false;
            }
            self.rows.remove(&current);
        }

        self.positions.insert(row.conversation_id, key);
        self.rows.insert_if_absent(row);
        true
    }

    pub fn scan(&self, range: &ClusteringRange) -> Vec<ConversationByUser> {
        self.rows.scan(range)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageId, UserId};
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_713_000_000 + secs, 0).unwrap()
    }

    fn message(secs: i64, id: u128) -> Message {
        Message {
            conversation_id: ConversationId(Uuid::from_u128(1)),
            sent_at: ts(secs),
            message_id: MessageId(Uuid::from_u128(id)),
            sender_id: UserId(1),
            recipient_id: UserId(2),
            text: format!("m{secs}-{id}"),
        }
    }

    fn ids(rows: &[Message]) -> Vec<u128> {
        rows.iter().map(|m| m.message_id.0.as_u128()).collect()
    }

    #[test]
    fn test_scan_follows_clustering_order() {
        let mut partition = Partition::default();
        partition.insert_if_absent(message(1, 10));
        partition.insert_if_absent(message(3, 30));
        partition.insert_if_absent(message(2, 21));
        partition.insert_if_absent(message(2, 20));

        let rows = partition.scan(&ClusteringRange::head(10));
        assert_eq!(ids(&rows), vec![30, 20, 21, 10]);

        let oldest = partition.scan(&ClusteringRange::tail(2));
        assert_eq!(ids(&oldest), vec![10, 21]);
    }

    #[test]
    fn test_scan_after_is_exclusive() {
        let mut partition = Partition::default();
        for (secs, id) in [(1, 10), (2, 20), (3, 30)] {
            partition.insert_if_absent(message(secs, id));
        }

        let position = message(2, 20).clustering_key();
        let rows = partition.scan(&ClusteringRange::after(&position, 10));
        assert_eq!(ids(&rows), vec![10]);
    }

    #[test]
    fn test_insert_if_absent_reports_existing_row() {
        let mut partition = Partition::default();
        assert!(partition.insert_if_absent(message(1, 10)).is_applied());

        let mut clash = message(1, 10);
        clash.text = "other".into();
        match partition.insert_if_absent(clash) {
            InsertOutcome::Existing(row) => assert_eq!(row, message(1, 10)),
            InsertOutcome::Applied => panic!("clustering key reused"),
        }
        assert_eq!(partition.len(), 1);
    }

    #[test]
    fn test_user_index_moves_row_forward_only() {
        let conversation_id = ConversationId(Uuid::from_u128(7));
        let row = |secs| ConversationByUser {
            user_id: UserId(1),
            last_activity: ts(secs),
            conversation_id,
            participant_id: UserId(2),
        };

        let mut partition = UserIndexPartition::default();
        assert!(partition.upsert(row(10)));
        assert!(partition.upsert(row(20)));
        assert!(!partition.upsert(row(15)));
        assert!(!partition.upsert(row(20)));

        let rows = partition.scan(&ClusteringRange::head(10));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].last_activity, ts(20));
        assert_eq!(partition.len(), 1);
    }
}
