//! Opaque pagination cursors over clustering positions.
//!
//! A cursor names the last row a client has seen, plus the partition it came
//! from. The next page starts strictly after that row, so inserts that sort
//! after the cursor never shift or duplicate rows already served.
//!
//! Token layout before base64 (URL-safe, unpadded):
//!
//! ```text
//! [0]       version
//! [1]       scope tag (1 = messages, 2 = conversations)
//! [2..18)   scope id: conversation uuid, or big-endian user id + 8 zero bytes
//! [18..42)  encoded clustering key
//! ```

use crate::codec::{ClusteringCodec, ClusteringKey, EncodedClusteringKey, ENCODED_LEN};
use crate::error::{AppError, AppResult};
use crate::models::{ConversationId, UserId};
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use uuid::Uuid;

const CURSOR_VERSION: u8 = 1;
const TAG_MESSAGES: u8 = 1;
const TAG_CONVERSATIONS: u8 = 2;
const SCOPE_LEN: usize = 16;
const CURSOR_LEN: usize = 2 + SCOPE_LEN + ENCODED_LEN;

/// Partition a cursor belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorScope {
    Messages(ConversationId),
    Conversations(UserId),
}

impl CursorScope {
    fn describe(&self) -> String {
        match self {
            CursorScope::Messages(id) => format!("messages of conversation {id}"),
            CursorScope::Conversations(id) => format!("conversations of user {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub scope: CursorScope,
    /// Last row served; resumption is exclusive of it
    pub position: ClusteringKey,
}

pub struct CursorCodec;

impl CursorCodec {
    pub fn encode(cursor: &PageCursor) -> String {
        let mut buf = Vec::with_capacity(CURSOR_LEN);
        buf.push(CURSOR_VERSION);

        match cursor.scope {
            CursorScope::Messages(id) => {
                buf.push(TAG_MESSAGES);
                buf.extend_from_slice(id.0.as_bytes());
            }
            CursorScope::Conversations(id) => {
                buf.push(TAG_CONVERSATIONS);
                buf.extend_from_slice(&id.0.to_be_bytes());
                buf.extend_from_slice(&[0u8; SCOPE_LEN - 8]);
            }
        }

        buf.extend_from_slice(ClusteringCodec::encode(&cursor.position).as_bytes());
        general_purpose::URL_SAFE_NO_PAD.encode(buf)
    }

    pub fn decode(token: &str) -> AppResult<PageCursor> {
        let bytes = general_purpose::URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| AppError::InvalidArgument(format!("Invalid cursor format: {}", e)))?;

        if bytes.len() != CURSOR_LEN {
            return Err(AppError::InvalidArgument(format!(
                "Invalid cursor length: {}",
                bytes.len()
            )));
        }
        if bytes[0] != CURSOR_VERSION {
            return Err(AppError::InvalidArgument(format!(
                "Unsupported cursor version: {}",
                bytes[0]
            )));
        }

        let scope_bytes = &bytes[2..2 + SCOPE_LEN];
        let scope = match bytes[1] {
            TAG_MESSAGES => {
                let uuid = Uuid::from_slice(scope_bytes)
                    .map_err(|e| AppError::InvalidArgument(format!("Invalid cursor scope: {}", e)))?;
                CursorScope::Messages(ConversationId(uuid))
            }
            TAG_CONVERSATIONS => {
                if scope_bytes[8..].iter().any(|b| *b != 0) {
                    return Err(AppError::InvalidArgument(
                        "Invalid cursor scope padding".to_string(),
                    ));
                }
                let mut id = [0u8; 8];
                id.copy_from_slice(&scope_bytes[..8]);
                CursorScope::Conversations(UserId(i64::from_be_bytes(id)))
            }
            other => {
                return Err(AppError::InvalidArgument(format!(
                    "Unknown cursor scope tag: {}",
                    other
                )))
            }
        };

        let encoded = EncodedClusteringKey::from_slice(&bytes[2 + SCOPE_LEN..])?;
        let position = ClusteringCodec::decode(&encoded)?;

        Ok(PageCursor { scope, position })
    }

    /// Decode and check the cursor was issued for `scope`.
    pub fn decode_for(token: &str, scope: CursorScope) -> AppResult<PageCursor> {
        let cursor = Self::decode(token)?;
        if cursor.scope != scope {
            return Err(AppError::InvalidArgument(format!(
                "cursor belongs to {}, not {}",
                cursor.scope.describe(),
                scope.describe()
            )));
        }
        Ok(cursor)
    }
}

/// Effective page size: rejects non-positive limits, clamps to `max`.
pub fn resolve_limit(limit: i32, max: i32) -> AppResult<usize> {
    if limit <= 0 {
        return Err(AppError::InvalidArgument(format!(
            "limit must be positive, got {limit}"
        )));
    }
    Ok(limit.min(max.max(1)) as usize)
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Present exactly when rows exist past the last item
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    /// Build a page from a scan that fetched up to `limit + 1` rows.
    pub(crate) fn from_overfetch(
        mut rows: Vec<T>,
        limit: usize,
        scope: CursorScope,
        position: impl Fn(&T) -> ClusteringKey,
    ) -> Self {
        let has_more = rows.len() > limit;
        rows.truncate(limit);

        let next_cursor = if has_more {
            rows.last().map(|last| {
                CursorCodec::encode(&PageCursor {
                    scope,
                    position: position(last),
                })
            })
        } else {
            None
        };

        Self {
            items: rows,
            next_cursor,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn position() -> ClusteringKey {
        ClusteringKey::new(Utc.timestamp_opt(1_713_002_400, 0).unwrap(), Uuid::new_v4())
    }

    #[test]
    fn test_message_cursor_decodes_to_same_position() {
        let cursor = PageCursor {
            scope: CursorScope::Messages(ConversationId::new()),
            position: position(),
        };
        let token = CursorCodec::encode(&cursor);

        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(CursorCodec::decode(&token).unwrap(), cursor);
    }

    #[test]
    fn test_user_cursor_keeps_user_id() {
        let cursor = PageCursor {
            scope: CursorScope::Conversations(UserId(123_456)),
            position: position(),
        };
        let decoded = CursorCodec::decode(&CursorCodec::encode(&cursor)).unwrap();
        assert_eq!(decoded.scope, CursorScope::Conversations(UserId(123_456)));
    }

    #[test]
    fn test_cursor_from_other_scope_rejected() {
        let mine = ConversationId::new();
        let token = CursorCodec::encode(&PageCursor {
            scope: CursorScope::Messages(ConversationId::new()),
            position: position(),
        });

        let result = CursorCodec::decode_for(&token, CursorScope::Messages(mine));
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));

        let result = CursorCodec::decode_for(&token, CursorScope::Conversations(UserId(1)));
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn test_garbage_cursor_rejected() {
        for token in ["", "!!!", "bm90IGEgY3Vyc29y", "AQ"] {
            assert!(
                matches!(CursorCodec::decode(token), Err(AppError::InvalidArgument(_))),
                "accepted {token:?}"
            );
        }
    }

    #[test]
    fn test_tampered_version_rejected() {
        let token = CursorCodec::encode(&PageCursor {
            scope: CursorScope::Conversations(UserId(9)),
            position: position(),
        });
        let mut bytes = general_purpose::URL_SAFE_NO_PAD.decode(&token).unwrap();
        bytes[0] = 9;
        let tampered = general_purpose::URL_SAFE_NO_PAD.encode(bytes);

        assert!(matches!(
            CursorCodec::decode(&tampered),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_resolve_limit() {
        assert_eq!(resolve_limit(10, 100).unwrap(), 10);
        assert_eq!(resolve_limit(500, 100).unwrap(), 100);
        assert!(matches!(resolve_limit(0, 100), Err(AppError::InvalidArgument(_))));
        assert!(matches!(resolve_limit(-3, 100), Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn test_from_overfetch_sets_cursor_only_when_more_rows() {
        let scope = CursorScope::Conversations(UserId(1));
        let keys: Vec<ClusteringKey> = (0..4).map(|_| position()).collect();

        let page = Page::from_overfetch(keys.clone(), 3, scope, |k| *k);
        assert_eq!(page.len(), 3);
        let cursor = CursorCodec::decode(page.next_cursor.as_deref().unwrap()).unwrap();
        assert_eq!(cursor.position, keys[2]);

        let last = Page::from_overfetch(keys[..3].to_vec(), 3, scope, |k| *k);
        assert_eq!(last.len(), 3);
        assert!(last.next_cursor.is_none());
    }
}
