use std::{
    collections::HashMap,
    sync::{atomic::AtomicI64, Arc, Mutex, OnceLock},
    time::Duration,
};

use anyhow::anyhow;
use serde::Serialize;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::sync::{OnceCell, RwLock};

use super::{auth::hash_password, registry::Registry};

pub const DEFAULT_JSON_BODY_LIMIT_BYTES: usize = 1_048_576;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;
pub const DEFAULT_MAX_FRAME_BYTES: usize = agora_protocol::MAX_FRAME_BYTES;
pub const SESSION_TTL_SECS: i64 = 24 * 60 * 60;
pub const SESSION_REFRESH_WINDOW_SECS: i64 = 30;
/// Idle-read deadline; a connection that produces no frame (data or pong)
/// for this long is treated as dead.
pub const DEFAULT_READ_DEADLINE_SECS: u64 = 60;
pub const DEFAULT_WRITE_DEADLINE_SECS: u64 = 10;
pub(crate) const POSTS_PAGE_SIZE: usize = 10;
pub(crate) const CHAT_MESSAGES_PAGE_SIZE: usize = 10;
pub(crate) const POST_PREVIEW_CHARS: usize = 450;
pub(crate) const SESSION_COOKIE: &str = "agora_session_id";
pub(crate) const DEFAULT_CATEGORY_NAMES: [&str; 3] = ["General", "Questions", "Ideas"];
pub(crate) const METRICS_TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub(crate) static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    pub(crate) auth_failures: Mutex<HashMap<&'static str, u64>>,
    pub(crate) ws_disconnects: Mutex<HashMap<&'static str, u64>>,
    pub(crate) messages_emitted: Mutex<HashMap<(String, String), u64>>,
    pub(crate) messages_dropped: Mutex<HashMap<(String, String, String), u64>>,
    pub(crate) unknown_requests: Mutex<HashMap<String, u64>>,
    pub(crate) frames_rejected: Mutex<HashMap<&'static str, u64>>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub rate_limit_requests_per_minute: u32,
    pub outbound_queue: usize,
    pub max_frame_bytes: usize,
    pub read_deadline: Duration,
    pub write_deadline: Duration,
    pub session_ttl_secs: i64,
    pub session_refresh_window_secs: i64,
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_JSON_BODY_LIMIT_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            rate_limit_requests_per_minute: DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            read_deadline: Duration::from_secs(DEFAULT_READ_DEADLINE_SECS),
            write_deadline: Duration::from_secs(DEFAULT_WRITE_DEADLINE_SECS),
            session_ttl_secs: SESSION_TTL_SECS,
            session_refresh_window_secs: SESSION_REFRESH_WINDOW_SECS,
            database_url: None,
        }
    }
}

/// Keepalive probe period: 90% of the read deadline, so regular pings
/// keep a healthy peer inside its deadline.
#[must_use]
pub(crate) fn ping_period(read_deadline: Duration) -> Duration {
    read_deadline.mul_f64(0.9)
}

#[derive(Clone, Debug)]
pub(crate) struct RuntimeConfig {
    pub(crate) outbound_queue: usize,
    pub(crate) max_frame_bytes: usize,
    pub(crate) read_deadline: Duration,
    pub(crate) write_deadline: Duration,
    pub(crate) session_ttl_secs: i64,
    pub(crate) session_refresh_window_secs: i64,
}

/// Signal from the registry to the write pump of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionControl {
    Open,
    Close,
}

#[derive(Debug, Clone)]
pub(crate) struct UserRecord {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) email: String,
    pub(crate) password_hash: String,
    pub(crate) first_name: String,
    pub(crate) last_name: String,
    pub(crate) gender: String,
    pub(crate) date_birth: String,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct SessionRecord {
    pub(crate) user_id: i64,
    pub(crate) expires_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct CategoryRecord {
    pub(crate) id: i64,
    pub(crate) name: String,
}

#[derive(Debug, Clone)]
pub(crate) struct PostRecord {
    pub(crate) id: i64,
    pub(crate) theme: String,
    pub(crate) content: String,
    pub(crate) author_id: i64,
    pub(crate) created_at_unix: i64,
    pub(crate) category_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub(crate) struct CommentRecord {
    pub(crate) id: i64,
    pub(crate) post_id: i64,
    pub(crate) author_id: i64,
    pub(crate) content: String,
    pub(crate) created_at_unix: i64,
}

/// Private chat between two users; `member_a < member_b` and the name is
/// the canonical `a-b` pairing key.
#[derive(Debug, Clone)]
pub(crate) struct ChatRecord {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) member_a: i64,
    pub(crate) member_b: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct ChatMessageRecord {
    pub(crate) id: i64,
    pub(crate) chat_id: i64,
    pub(crate) author_id: i64,
    pub(crate) content: String,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct ReactionCounts {
    pub(crate) likes: i64,
    pub(crate) dislikes: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub(crate) db_pool: Option<PgPool>,
    pub(crate) db_init: Arc<OnceCell<()>>,
    pub(crate) registry: Registry,
    pub(crate) users: Arc<RwLock<HashMap<i64, UserRecord>>>,
    pub(crate) user_seq: Arc<AtomicI64>,
    pub(crate) sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
    pub(crate) categories: Arc<RwLock<HashMap<i64, CategoryRecord>>>,
    pub(crate) posts: Arc<RwLock<HashMap<i64, PostRecord>>>,
    pub(crate) post_seq: Arc<AtomicI64>,
    pub(crate) comments: Arc<RwLock<HashMap<i64, CommentRecord>>>,
    pub(crate) comment_seq: Arc<AtomicI64>,
    pub(crate) post_reactions: Arc<RwLock<HashMap<i64, HashMap<i64, bool>>>>,
    pub(crate) comment_reactions: Arc<RwLock<HashMap<i64, HashMap<i64, bool>>>>,
    pub(crate) chats: Arc<RwLock<HashMap<i64, ChatRecord>>>,
    pub(crate) chat_seq: Arc<AtomicI64>,
    pub(crate) chat_messages: Arc<RwLock<HashMap<i64, ChatMessageRecord>>>,
    pub(crate) chat_message_seq: Arc<AtomicI64>,
    pub(crate) dummy_password_hash: Arc<String>,
    pub(crate) runtime: Arc<RuntimeConfig>,
}

impl AppState {
    pub(crate) fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let dummy_password_hash = hash_password("agora-dummy-password")?;
        let db_pool = if let Some(database_url) = &config.database_url {
            Some(
                PgPoolOptions::new()
                    .max_connections(10)
                    .connect_lazy(database_url)
                    .map_err(|e| anyhow!("postgres pool init failed: {e}"))?,
            )
        } else {
            None
        };

        let mut categories = HashMap::new();
        if db_pool.is_none() {
            for (index, name) in DEFAULT_CATEGORY_NAMES.iter().enumerate() {
                let id = i64::try_from(index).unwrap_or(0) + 1;
                categories.insert(
                    id,
                    CategoryRecord {
                        id,
                        name: (*name).to_owned(),
                    },
                );
            }
        }

        Ok(Self {
            db_pool,
            db_init: Arc::new(OnceCell::new()),
            registry: Registry::new(),
            users: Arc::new(RwLock::new(HashMap::new())),
            user_seq: Arc::new(AtomicI64::new(0)),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            categories: Arc::new(RwLock::new(categories)),
            posts: Arc::new(RwLock::new(HashMap::new())),
            post_seq: Arc::new(AtomicI64::new(0)),
            comments: Arc::new(RwLock::new(HashMap::new())),
            comment_seq: Arc::new(AtomicI64::new(0)),
            post_reactions: Arc::new(RwLock::new(HashMap::new())),
            comment_reactions: Arc::new(RwLock::new(HashMap::new())),
            chats: Arc::new(RwLock::new(HashMap::new())),
            chat_seq: Arc::new(AtomicI64::new(0)),
            chat_messages: Arc::new(RwLock::new(HashMap::new())),
            chat_message_seq: Arc::new(AtomicI64::new(0)),
            dummy_password_hash: Arc::new(dummy_password_hash),
            runtime: Arc::new(RuntimeConfig {
                outbound_queue: config.outbound_queue,
                max_frame_bytes: config.max_frame_bytes,
                read_deadline: config.read_deadline,
                write_deadline: config.write_deadline,
                session_ttl_secs: config.session_ttl_secs,
                session_refresh_window_secs: config.session_refresh_window_secs,
            }),
        })
    }
}
