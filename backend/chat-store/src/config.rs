use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Which table answers "list my conversations".
///
/// Only one variant serves reads in a deployment. `ConversationsByUser` is the
/// production path; `ConversationsTable` keeps the single-table layout and pays
/// for it with a filtering scan over every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaVariant {
    /// Variant A: `conversations` only, listed via `list_of_users CONTAINS ?`
    ConversationsTable,
    /// Variant B: `conversations` plus the `conversations_by_user` index
    #[default]
    ConversationsByUser,
}

impl SchemaVariant {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "a" | "conversations" | "conversations_table" => Ok(SchemaVariant::ConversationsTable),
            "b" | "by_user" | "conversations_by_user" => Ok(SchemaVariant::ConversationsByUser),
            other => Err(AppError::Config(format!(
                "unknown CHAT_STORE_SCHEMA_VARIANT '{other}'"
            ))),
        }
    }

    pub fn maintains_user_index(&self) -> bool {
        matches!(self, SchemaVariant::ConversationsByUser)
    }
}

#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// In-pass retries for a single repair task
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Passes a task may fail before it is dead-lettered
    pub max_attempts: u32,
    /// Tasks drained per pass
    pub batch_size: usize,
    /// Idle wake-up interval of the background worker
    pub poll_interval: Duration,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            max_attempts: 5,
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Storage nodes of the in-process engine
    pub node_count: usize,
    /// Virtual nodes per storage node on the token ring
    pub vnodes_per_node: usize,
    pub schema_variant: SchemaVariant,
    pub default_page_size: i32,
    pub max_page_size: i32,
    /// Characters kept in `conversations.last_message_content`
    pub preview_max_chars: usize,
    pub repair: RepairConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_count: 3,
            vnodes_per_node: 16,
            schema_variant: SchemaVariant::default(),
            default_page_size: 20,
            max_page_size: 100,
            preview_max_chars: 120,
            repair: RepairConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let defaults = Config::default();
        let repair_defaults = RepairConfig::default();

        let schema_variant = match env::var("CHAT_STORE_SCHEMA_VARIANT") {
            Ok(value) => SchemaVariant::parse(&value)?,
            Err(_) => defaults.schema_variant,
        };

        let repair = RepairConfig {
            max_retries: env_parse("REPAIR_MAX_RETRIES", repair_defaults.max_retries)?,
            initial_backoff: Duration::from_millis(env_parse(
                "REPAIR_INITIAL_BACKOFF_MS",
                repair_defaults.initial_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(env_parse(
                "REPAIR_MAX_BACKOFF_MS",
                repair_defaults.max_backoff.as_millis() as u64,
            )?),
            max_attempts: env_parse("REPAIR_MAX_ATTEMPTS", repair_defaults.max_attempts)?,
            batch_size: env_parse("REPAIR_BATCH_SIZE", repair_defaults.batch_size)?,
            poll_interval: Duration::from_millis(env_parse(
                "REPAIR_POLL_INTERVAL_MS",
                repair_defaults.poll_interval.as_millis() as u64,
            )?),
        };

        let config = Self {
            node_count: env_parse("CHAT_STORE_NODES", defaults.node_count)?,
            vnodes_per_node: env_parse("CHAT_STORE_VNODES_PER_NODE", defaults.vnodes_per_node)?,
            schema_variant,
            default_page_size: env_parse("CHAT_STORE_DEFAULT_PAGE_SIZE", defaults.default_page_size)?,
            max_page_size: env_parse("CHAT_STORE_MAX_PAGE_SIZE", defaults.max_page_size)?,
            preview_max_chars: env_parse("CHAT_STORE_PREVIEW_MAX_CHARS", defaults.preview_max_chars)?,
            repair,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.node_count == 0 {
            return Err(AppError::Config("CHAT_STORE_NODES must be at least 1".into()));
        }
        if self.vnodes_per_node == 0 {
            return Err(AppError::Config(
                "CHAT_STORE_VNODES_PER_NODE must be at least 1".into(),
            ));
        }
        if self.default_page_size <= 0 || self.max_page_size <= 0 {
            return Err(AppError::Config("page sizes must be positive".into()));
        }
        if self.default_page_size > self.max_page_size {
            return Err(AppError::Config(format!(
                "default page size {} exceeds max page size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.repair.batch_size == 0 {
            return Err(AppError::Config("REPAIR_BATCH_SIZE must be at least 1".into()));
        }
        Ok(())
    }
}
