// Table definitions and statement texts for the wide-column layout.
// The in-process engine implements these semantics; the text is what a
// CQL-speaking backend would be handed, and what query plans report.

pub const CREATE_MESSAGES_BY_CONVERSATION: &str = r#"
    CREATE TABLE IF NOT EXISTS messages_by_conversation (
        conversation_id uuid,
        sent_at timestamp,
        message_id uuid,
        sender_id bigint,
        receiver_id bigint,
        content text,
        PRIMARY KEY ((conversation_id), sent_at, message_id)
    ) WITH CLUSTERING ORDER BY (sent_at DESC, message_id ASC)
"#;

pub const CREATE_CONVERSATIONS: &str = r#"
    CREATE TABLE IF NOT EXISTS conversations (
        conversation_id uuid PRIMARY KEY,
        list_of_users set<bigint>,
        last_message_content text,
        last_message_at timestamp,
        last_message_id uuid,
        created_at timestamp
    )
"#;

pub const CREATE_CONVERSATIONS_BY_USER: &str = r#"
    CREATE TABLE IF NOT EXISTS conversations_by_user (
        user_id bigint,
        last_activity timestamp,
        conversation_id uuid,
        participant_id bigint,
        PRIMARY KEY ((user_id), last_activity, conversation_id)
    ) WITH CLUSTERING ORDER BY (last_activity DESC, conversation_id ASC)
"#;

// messages_by_conversation
pub const INSERT_MESSAGE: &str = r#"
    INSERT INTO messages_by_conversation (
        conversation_id, sent_at, message_id, sender_id, receiver_id, content
    ) VALUES (?, ?, ?, ?, ?, ?)
    IF NOT EXISTS
"#;

pub const SELECT_MESSAGES_PAGE: &str = r#"
    SELECT conversation_id, sent_at, message_id, sender_id, receiver_id, content
    FROM messages_by_conversation
    WHERE conversation_id = ?
    LIMIT ?
"#;

pub const SELECT_MESSAGES_AFTER_POSITION: &str = r#"
    SELECT conversation_id, sent_at, message_id, sender_id, receiver_id, content
    FROM messages_by_conversation
    WHERE conversation_id = ? AND (sent_at, message_id) > (?, ?)
    LIMIT ?
"#;

pub const SELECT_MESSAGES_OLDEST_FIRST: &str = r#"
    SELECT conversation_id, sent_at, message_id, sender_id, receiver_id, content
    FROM messages_by_conversation
    WHERE conversation_id = ?
    ORDER BY sent_at ASC, message_id DESC
    LIMIT ?
"#;

// conversations
pub const INSERT_CONVERSATION: &str = r#"
    INSERT INTO conversations (
        conversation_id, list_of_users, last_message_at, created_at
    ) VALUES (?, ?, ?, ?)
    IF NOT EXISTS
"#;

pub const SELECT_CONVERSATION: &str = r#"
    SELECT conversation_id, list_of_users, last_message_content, last_message_at,
           last_message_id, created_at
    FROM conversations
    WHERE conversation_id = ?
"#;

// Write timestamp is the message's sent_at in microseconds, so older
// messages lose to newer ones regardless of arrival order.
pub const UPDATE_LAST_MESSAGE: &str = r#"
    UPDATE conversations USING TIMESTAMP ?
    SET last_message_content = ?, last_message_at = ?, last_message_id = ?
    WHERE conversation_id = ?
    IF EXISTS
"#;

pub const ADD_PARTICIPANTS: &str = r#"
    UPDATE conversations
    SET list_of_users = list_of_users + ?
    WHERE conversation_id = ?
    IF EXISTS
"#;

pub const SELECT_CONVERSATIONS_CONTAINING_USER: &str = r#"
    SELECT conversation_id, list_of_users, last_message_content, last_message_at,
           last_message_id, created_at
    FROM conversations
    WHERE list_of_users CONTAINS ?
    ALLOW FILTERING
"#;

// conversations_by_user
pub const UPSERT_USER_CONVERSATION: &str = r#"
    INSERT INTO conversations_by_user (
        user_id, last_activity, conversation_id, participant_id
    ) VALUES (?, ?, ?, ?)
"#;

pub const SELECT_USER_CONVERSATIONS_PAGE: &str = r#"
    SELECT user_id, last_activity, conversation_id, participant_id
    FROM conversations_by_user
    WHERE user_id = ?
    LIMIT ?
"#;

pub const SELECT_USER_CONVERSATIONS_AFTER_POSITION: &str = r#"
    SELECT user_id, last_activity, conversation_id, participant_id
    FROM conversations_by_user
    WHERE user_id = ? AND (last_activity, conversation_id) > (?, ?)
    LIMIT ?
"#;
