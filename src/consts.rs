pub const CONTACTS_FILE: &str = "contacts.json";
pub const STATS_FILE: &str = "stats.json";
pub const MESSAGES_FILE: &str = "messages.json";
pub const MEDIA_INDEX_FILE: &str = "media_index.json";
pub const MEDIA_SUBDIR: &str = "media";

pub const PHONE_MIN_DIGITS: usize = 10;
pub const PHONE_MAX_DIGITS: usize = 15;
pub const GROUP_ID_MIN_DIGITS: usize = 10;
pub const GROUP_ID_MAX_DIGITS: usize = 25;
pub const NAME_MIN_CHARS: usize = 2;
pub const NAME_MAX_CHARS: usize = 50;

pub const MESSAGE_PREVIEW_MAX_CHARS: usize = 53;

/// Webhook delivery: attempt budget, per-attempt timeouts and the backoff
/// slept between consecutive attempts.
pub const WEBHOOK_MAX_ATTEMPTS: u32 = 3;
pub const WEBHOOK_FIRST_TIMEOUT_SECS: u64 = 5;
pub const WEBHOOK_RETRY_TIMEOUT_SECS: u64 = 10;
pub const WEBHOOK_BACKOFF_DELAYS_MS: [u64; 2] = [1_000, 2_000];

pub const SECONDARY_WEBHOOK_TIMEOUT_SECS: u64 = 5;
pub const ALERT_TIMEOUT_SECS: u64 = 5;
pub const TEST_WEBHOOK_TIMEOUT_SECS: u64 = 5;
pub const MENTION_WEBHOOK_TIMEOUT_SECS: u64 = 5;

pub const CONSECUTIVE_FAILURES_ALERT_THRESHOLD: u32 = 3;

pub const STATS_SAVE_INTERVAL_SECS: u64 = 300;
pub const MESSAGES_FLUSH_INTERVAL_SECS: u64 = 60;
pub const INGRESS_SAVE_EVERY_EVENTS: u64 = 100;

pub const CONNECTION_HISTORY_LIMIT: usize = 20;
pub const OUTGOING_IDS_LIMIT: usize = 500;

pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;
pub const RECONNECT_BASE_DELAY_SECS: u64 = 1;
pub const RECONNECT_MAX_DELAY_SECS: u64 = 30;

pub const ALERT_MAX_DETAIL_FIELDS: usize = 10;
pub const ALERT_MAX_ACTIONS: usize = 5;

pub const HEADER_FILTER_SOURCE: &str = "X-Filter-Source";
pub const HEADER_SOURCE_ID: &str = "X-Source-Id";
pub const HEADER_SOURCE_TYPE: &str = "X-Source-Type";
pub const HEADER_ENTITY_TYPE: &str = "X-Entity-Type";
pub const HEADER_EVENT_TYPE: &str = "X-Event-Type";
pub const HEADER_ALERT_LEVEL: &str = "X-Alert-Level";

pub const SELF_ENTITY_TYPE: &str = "SELF";

pub const DEFAULT_CONTACT_TYPES: [&str; 4] = ["PERSONAL", "BUSINESS", "VIP", "TEAM"];
pub const DEFAULT_GROUP_TYPES: [&str; 3] = ["WORK", "FAMILY", "COMMUNITY"];
