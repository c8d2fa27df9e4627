//! Composite clustering keys: `(timestamp DESC, id ASC)`.
//!
//! Both clustered tables use this shape: `messages_by_conversation` clusters on
//! `(sent_at, message_id)` and `conversations_by_user` on
//! `(last_activity, conversation_id)`.
//!
//! Encoded layout (24 bytes, compared bytewise):
//!
//! ```text
//! [0..8)   !(millis ^ SIGN_BIT) as big-endian u64   -> newest first
//! [8..24)  uuid bytes                               -> ascending tie-break
//! ```

use crate::error::{AppError, AppResult};
use chrono::{DateTime, SubsecRound, Utc};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

pub const ENCODED_LEN: usize = 24;

const SIGN_BIT: u64 = 1 << 63;

/// Truncate to the millisecond resolution of the store's `timestamp` type.
pub fn normalize_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

/// Tagged clustering key. No `Ord`; ordering goes through [`clustering_cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusteringKey {
    timestamp: DateTime<Utc>,
    id: Uuid,
}

impl ClusteringKey {
    pub fn new(timestamp: DateTime<Utc>, id: Uuid) -> Self {
        Self {
            timestamp: normalize_timestamp(timestamp),
            id,
        }
    }

    /// Position sorting after every key with `timestamp`, i.e. the first key strictly older.
    pub fn after_timestamp(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, Uuid::from_bytes([0xff; 16]))
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Declared clustering order: timestamp descending, id ascending.
pub fn clustering_cmp(a: &ClusteringKey, b: &ClusteringKey) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| a.id.cmp(&b.id))
}

/// Order-preserving encoding of a [`ClusteringKey`]; bytewise order equals clustering order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncodedClusteringKey([u8; ENCODED_LEN]);

impl EncodedClusteringKey {
    pub fn as_bytes(&self) -> &[u8; ENCODED_LEN] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> AppResult<Self> {
        if bytes.len() != ENCODED_LEN {
            return Err(AppError::InvalidArgument(format!(
                "clustering key must be {} bytes, got {}",
                ENCODED_LEN,
                bytes.len()
            )));
        }
        let mut buf = [0u8; ENCODED_LEN];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }
}

impl fmt::Debug for EncodedClusteringKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedClusteringKey({})", hex::encode(self.0))
    }
}

pub struct ClusteringCodec;

impl ClusteringCodec {
    pub fn encode(key: &ClusteringKey) -> EncodedClusteringKey {
        let millis = key.timestamp.timestamp_millis();
        let descending = !((millis as u64) ^ SIGN_BIT);

        let mut buf = [0u8; ENCODED_LEN];
        buf[..8].copy_from_slice(&descending.to_be_bytes());
        buf[8..].copy_from_slice(key.id.as_bytes());
        EncodedClusteringKey(buf)
    }

    pub fn decode(encoded: &EncodedClusteringKey) -> AppResult<ClusteringKey> {
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&encoded.0[..8]);
        let millis = ((!u64::from_be_bytes(ts_bytes)) ^ SIGN_BIT) as i64;

        let timestamp = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
            AppError::InvalidArgument(format!("clustering timestamp {millis}ms out of range"))
        })?;

        let mut id_bytes = [0u8; 16];
        id_bytes.copy_from_slice(&encoded.0[8..]);

        Ok(ClusteringKey {
            timestamp,
            id: Uuid::from_bytes(id_bytes),
        })
    }

    /// Fixed-width lowercase hex; string order equals clustering order.
    pub fn encode_string(key: &ClusteringKey) -> String {
        hex::encode(Self::encode(key).0)
    }

    pub fn decode_str(value: &str) -> AppResult<ClusteringKey> {
        let bytes = hex::decode(value)
            .map_err(|e| AppError::InvalidArgument(format!("clustering key is not hex: {e}")))?;
        Self::decode(&EncodedClusteringKey::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_newer_timestamp_sorts_first() {
        let older = ClusteringKey::new(at("2024-04-13T10:00:00Z"), Uuid::from_u128(1));
        let newer = ClusteringKey::new(at("2024-04-13T10:00:01Z"), Uuid::from_u128(1));

        assert_eq!(clustering_cmp(&newer, &older), Ordering::Less);
        assert!(ClusteringCodec::encode(&newer) < ClusteringCodec::encode(&older));
    }

    #[test]
    fn test_equal_timestamps_tie_break_on_id() {
        let ts = at("2024-04-13T10:00:00Z");
        let a = ClusteringKey::new(ts, Uuid::from_u128(0x10));
        let b = ClusteringKey::new(ts, Uuid::from_u128(0x20));

        assert_eq!(clustering_cmp(&a, &b), Ordering::Less);
        assert!(ClusteringCodec::encode(&a) < ClusteringCodec::encode(&b));
    }

    #[test]
    fn test_pre_epoch_timestamps_keep_order() {
        let before = ClusteringKey::new(Utc.timestamp_opt(-5, 0).unwrap(), Uuid::nil());
        let epoch = ClusteringKey::new(Utc.timestamp_opt(0, 0).unwrap(), Uuid::nil());

        assert!(ClusteringCodec::encode(&epoch) < ClusteringCodec::encode(&before));
        assert_eq!(ClusteringCodec::decode(&ClusteringCodec::encode(&before)).unwrap(), before);
    }

    #[test]
    fn test_construction_truncates_to_millis() {
        let ts = Utc.timestamp_opt(1_713_002_400, 123_456_789).unwrap();
        let key = ClusteringKey::new(ts, Uuid::nil());
        assert_eq!(key.timestamp().timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn test_after_timestamp_bounds_equal_timestamps() {
        let ts = at("2024-04-13T10:00:00Z");
        let bound = ClusteringKey::after_timestamp(ts);
        let same_ts = ClusteringKey::new(ts, Uuid::new_v4());
        let older = ClusteringKey::new(at("2024-04-13T09:59:59.999Z"), Uuid::nil());

        assert_eq!(clustering_cmp(&same_ts, &bound), Ordering::Less);
        assert_eq!(clustering_cmp(&bound, &older), Ordering::Less);
    }

    #[test]
    fn test_string_form() {
        let key = ClusteringKey::new(at("2024-04-13T10:00:00Z"), Uuid::new_v4());
        let encoded = ClusteringCodec::encode_string(&key);
        assert_eq!(encoded.len(), ENCODED_LEN * 2);
        assert_eq!(ClusteringCodec::decode_str(&encoded).unwrap(), key);

        assert!(matches!(
            ClusteringCodec::decode_str("zz"),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            ClusteringCodec::decode_str("abcd"),
            Err(AppError::InvalidArgument(_))
        ));
    }

    fn arb_key() -> impl Strategy<Value = ClusteringKey> {
        // well inside chrono's representable range (about +/- 253,000 years)
        (-8_000_000_000_000_000i64..8_000_000_000_000_000i64, any::<u128>()).prop_map(
            |(millis, id)| {
                let ts = DateTime::<Utc>::from_timestamp_millis(millis).unwrap();
                ClusteringKey::new(ts, Uuid::from_u128(id))
            },
        )
    }

    proptest! {
        #[test]
        fn prop_round_trip_exact(key in arb_key()) {
            let encoded = ClusteringCodec::encode(&key);
            prop_assert_eq!(ClusteringCodec::decode(&encoded).unwrap(), key);
        }

        #[test]
        fn prop_byte_order_matches_comparator(a in arb_key(), b in arb_key()) {
            let bytes = ClusteringCodec::encode(&a).cmp(&ClusteringCodec::encode(&b));
            prop_assert_eq!(bytes, clustering_cmp(&a, &b));

            let strings = ClusteringCodec::encode_string(&a).cmp(&ClusteringCodec::encode_string(&b));
            prop_assert_eq!(strings, clustering_cmp(&a, &b));
        }
    }
}
