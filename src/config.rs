//! Abstraction of all the values needed to setup the gateway

use envconfig::Envconfig;
use std::sync::LazyLock;

/// Enviroment variables used to set a specific gateway instance.
///
/// Every option has a stable default so the struct always initializes;
/// hard requirements (admin credentials, a default destination when no
/// client adapter is enabled) are enforced once at startup.
#[derive(Envconfig, Clone)]
pub struct AppConfig {
    /// Default destination every allowed message is forwarded to.
    /// When set through the environment it wins over the persisted value
    /// and is never written back to disk.
    #[envconfig(from = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Optional fire-and-forget copy of every forward.
    #[envconfig(from = "SECONDARY_WEBHOOK_URL")]
    pub secondary_webhook_url: Option<String>,

    #[envconfig(from = "ADMIN_USERNAME", default = "")]
    pub admin_username: String,

    #[envconfig(from = "ADMIN_PASSWORD", default = "")]
    pub admin_password: String,

    /// Port the HTTP server binds on
    #[envconfig(from = "PORT", default = "3000")]
    pub port: u16,

    /// Comma separated list of client addresses allowed on the admin
    /// surface. Entries are exact IPs, prefixes ending with `.` or
    /// IPv4 CIDR blocks. Empty list disables the check.
    #[envconfig(from = "ALLOWED_IPS", default = "")]
    pub allowed_ips: String,

    #[envconfig(from = "MENTION_ENABLED", default = "false")]
    pub mention_enabled: bool,

    #[envconfig(from = "MENTION_WEBHOOK_URL")]
    pub mention_webhook_url: Option<String>,

    #[envconfig(from = "MENTION_WEBHOOK_TOKEN", default = "")]
    pub mention_webhook_token: String,

    /// Comma separated keywords that count as a mention of the owner.
    #[envconfig(from = "MENTION_KEYWORDS", default = "דוד,david")]
    pub mention_keywords: String,

    /// When set, a mentioned group message goes only to the mention
    /// destination and skips the regular forward.
    #[envconfig(from = "MENTION_ONLY_TO_MENTION_WEBHOOK", default = "false")]
    pub mention_only_to_mention_webhook: bool,

    #[envconfig(from = "FORWARD_OUTGOING", default = "false")]
    pub forward_outgoing: bool,

    #[envconfig(from = "FORWARD_MESSAGE_UPDATES", default = "false")]
    pub forward_message_updates: bool,

    /// Run the direct WhatsApp client instead of webhook-only ingress.
    #[envconfig(from = "WHATSAPP_CLIENT_ENABLED", default = "false")]
    pub whatsapp_client_enabled: bool,

    #[envconfig(from = "LOG_PRESENCE", default = "false")]
    pub log_presence: bool,

    #[envconfig(from = "RECENT_EVENTS_LIMIT", default = "100")]
    pub recent_events_limit: usize,

    #[envconfig(from = "MAX_MESSAGES_PER_SOURCE", default = "100")]
    pub max_messages_per_source: usize,

    #[envconfig(from = "MAX_TOTAL_MESSAGES", default = "5000")]
    pub max_total_messages: usize,

    #[envconfig(from = "MAX_MEDIA_FILES", default = "500")]
    pub max_media_files: usize,

    #[envconfig(from = "MAX_MEDIA_SIZE_BYTES", default = "10485760")]
    pub max_media_size_bytes: usize,

    /// Notification endpoint for operational alerts (generic JSON POST).
    #[envconfig(from = "ALERT_WEBHOOK_URL")]
    pub alert_webhook_url: Option<String>,

    /// Rich-format notification endpoint, used for critical/warning only.
    #[envconfig(from = "SLACK_WEBHOOK_URL")]
    pub slack_webhook_url: Option<String>,

    #[envconfig(from = "INSTANCE_NAME", default = "wa-gateway")]
    pub instance_name: String,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Directory holding every persistent file of the gateway.
    #[envconfig(from = "DATA_DIR", default = "data")]
    pub data_dir: String,

    /// Directory the client adapter keeps its session auth material in.
    #[envconfig(from = "WHATSAPP_AUTH_DIR", default = "auth")]
    pub whatsapp_auth_dir: String,
}

impl AppConfig {
    pub fn data_file(&self, name: &str) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join(name)
    }

    pub fn mention_keyword_list(&self) -> Vec<String> {
        self.mention_keywords
            .split(',')
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    }

    pub fn allowed_ip_list(&self) -> Vec<String> {
        self.allowed_ips
            .split(',')
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .collect()
    }

    pub fn has_admin_credentials(&self) -> bool {
        !self.admin_username.is_empty() && !self.admin_password.is_empty()
    }

    /// Startup validation; the only place a configuration problem is fatal.
    pub fn validate(&self, has_persisted_default: bool) -> anyhow::Result<()> {
        if !self.has_admin_credentials() {
            anyhow::bail!("ADMIN_USERNAME and ADMIN_PASSWORD must be set");
        }

        if !self.whatsapp_client_enabled
            && self.webhook_url.is_none()
            && !has_persisted_default
        {
            anyhow::bail!(
                "WEBHOOK_URL must be set when the WhatsApp client is disabled \
                 and no default destination was persisted"
            );
        }

        if self.mention_enabled && self.mention_webhook_url.is_none() {
            anyhow::bail!("MENTION_ENABLED requires MENTION_WEBHOOK_URL");
        }

        Ok(())
    }
}

pub static APP_CONFIG: LazyLock<AppConfig> =
    LazyLock::new(|| AppConfig::init_from_env().expect("invalid environment configuration"));

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_config() -> AppConfig {
        AppConfig::init_from_hashmap(&std::collections::HashMap::new())
            .expect("defaults should initialize")
    }

    #[test]
    fn defaults_initialize_without_env() {
        let config = blank_config();
        assert_eq!(config.port, 3000);
        assert_eq!(config.recent_events_limit, 100);
        assert_eq!(config.max_total_messages, 5000);
        assert!(!config.mention_enabled);
    }

    #[test]
    fn keyword_list_is_trimmed_and_lowercased() {
        let mut config = blank_config();
        config.mention_keywords = "David , BOSS,, דוד".to_string();
        assert_eq!(config.mention_keyword_list(), vec!["david", "boss", "דוד"]);
    }

    #[test]
    fn validate_requires_admin_credentials() {
        let config = blank_config();
        assert!(config.validate(true).is_err());
    }

    #[test]
    fn validate_requires_destination_without_adapter() {
        let mut config = blank_config();
        config.admin_username = "admin".into();
        config.admin_password = "secret".into();
        assert!(config.validate(false).is_err());
        assert!(config.validate(true).is_ok());

        config.webhook_url = Some("https://example.com/hook".into());
        assert!(config.validate(false).is_ok());
    }
}
