/// Interval between outbound heartbeat pings, in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Delay before each automatic reconnect attempt, in seconds
pub const RECONNECT_INTERVAL_SECS: u64 = 5;

/// Consecutive automatic reconnect attempts before giving up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default real-time endpoint (development only)
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080/ws";

/// Query parameter carrying the auth credential
pub const QUERY_TOKEN: &str = "token";

/// Query parameter carrying the client identifier
pub const QUERY_CLIENT_ID: &str = "clientId";

/// Conversation id reserved for platform notifications
pub const NOTIFICATION_CHAT_ID: &str = "000000";

/// Characters of text content kept in a chat-list preview
pub const PREVIEW_MAX_CHARS: usize = 50;

/// Storage key prefixes
pub const KEY_MESSAGES_PREFIX: &str = "chat_messages_";
pub const KEY_DRAFT_PREFIX: &str = "chat_draft_";
pub const KEY_CHAT_LIST: &str = "chat_list";
