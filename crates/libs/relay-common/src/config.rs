//! Application settings, read from the environment once at startup.
//!
//! Every knob is read eagerly in [`Settings::from_env`] and frozen into an
//! immutable value that the server shares behind an `Arc`. There is no
//! config-file layer: the environment is the single source of truth.

use serde::Deserialize;
use std::path::PathBuf;

/// Parse boolean environment variable with truthy value detection
fn parse_bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "t" | "y"))
        .unwrap_or(default)
}

fn parse_int_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_str_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_csv_env(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Archive and attachment storage knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Root directory holding `projects/<slug>/` archives (one git repo).
    pub root: PathBuf,
    pub git_author_name: String,
    pub git_author_email: String,
    /// Inclusive threshold: attachments at or under this size are inlined.
    pub inline_image_max_bytes: u64,
    pub convert_images: bool,
    pub keep_original_images: bool,
    /// When true, unreadable attachment paths become `missing` entries
    /// instead of failing the send.
    pub allow_missing_attachments: bool,
}

impl StorageSettings {
    fn from_env() -> Self {
        Self {
            root: expand_tilde(&parse_str_env("STORAGE_ROOT", "~/.agent_relay_archive")),
            git_author_name: parse_str_env("GIT_AUTHOR_NAME", "relay-bot"),
            git_author_email: parse_str_env("GIT_AUTHOR_EMAIL", "relay-bot@localhost"),
            inline_image_max_bytes: parse_int_env("INLINE_IMAGE_MAX_BYTES", 64 * 1024),
            convert_images: parse_bool_env("CONVERT_IMAGES", true),
            keep_original_images: parse_bool_env("KEEP_ORIGINAL_IMAGES", false),
            allow_missing_attachments: parse_bool_env("ALLOW_MISSING_ATTACHMENTS", true),
        }
    }
}

/// Catalog database knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite database file. `DATABASE_URL` (file: prefix stripped) wins
    /// over `RELAY_DB_PATH`.
    pub path: PathBuf,
}

impl DatabaseSettings {
    fn from_env(storage_root: &std::path::Path) -> Self {
        let default_path = storage_root.join("relay.sqlite3");
        let path = std::env::var("DATABASE_URL")
            .ok()
            .map(|url| PathBuf::from(url.trim_start_matches("file:")))
            .or_else(|| std::env::var("RELAY_DB_PATH").ok().map(PathBuf::from))
            .unwrap_or(default_path);
        Self { path }
    }
}

/// File reservation sweep and force-release gates.
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationSettings {
    pub cleanup_enabled: bool,
    pub cleanup_interval_seconds: u64,
    /// Holder inactivity required before force-release is allowed.
    pub inactivity_seconds: i64,
    /// Sidecar quiescence required before force-release is allowed.
    pub activity_grace_seconds: i64,
    /// When true, sends are refused on conflicting exclusive reservations.
    pub enforcement_enabled: bool,
}

impl ReservationSettings {
    fn from_env() -> Self {
        Self {
            cleanup_enabled: parse_bool_env("FILE_RESERVATIONS_CLEANUP_ENABLED", true),
            cleanup_interval_seconds: parse_int_env(
                "FILE_RESERVATIONS_CLEANUP_INTERVAL_SECONDS",
                60,
            ),
            inactivity_seconds: parse_int_env("FILE_RESERVATION_INACTIVITY_SECONDS", 1800),
            activity_grace_seconds: parse_int_env("FILE_RESERVATION_ACTIVITY_GRACE_SECONDS", 900),
            enforcement_enabled: parse_bool_env("FILE_RESERVATIONS_ENFORCEMENT_ENABLED", true),
        }
    }
}

/// ACK TTL monitoring and escalation.
#[derive(Debug, Clone, Deserialize)]
pub struct AckSettings {
    pub ttl_enabled: bool,
    pub ttl_seconds: i64,
    pub scan_interval_seconds: u64,
    pub escalation_enabled: bool,
    /// "log" | "file_reservation"
    pub escalation_mode: String,
    pub escalation_claim_ttl_seconds: i64,
}

impl AckSettings {
    fn from_env() -> Self {
        Self {
            ttl_enabled: parse_bool_env("ACK_TTL_ENABLED", false),
            ttl_seconds: parse_int_env("ACK_TTL_SECONDS", 1800),
            scan_interval_seconds: parse_int_env("ACK_TTL_SCAN_INTERVAL_SECONDS", 60),
            escalation_enabled: parse_bool_env("ACK_ESCALATION_ENABLED", false),
            escalation_mode: parse_str_env("ACK_ESCALATION_MODE", "log"),
            escalation_claim_ttl_seconds: parse_int_env("ACK_ESCALATION_CLAIM_TTL_SECONDS", 3600),
        }
    }
}

/// Cross-project contact gating.
#[derive(Debug, Clone, Deserialize)]
pub struct ContactSettings {
    pub enforcement_enabled: bool,
    /// TTL applied to approved links when the responder does not give one.
    pub auto_ttl_seconds: i64,
}

impl ContactSettings {
    fn from_env() -> Self {
        Self {
            enforcement_enabled: parse_bool_env("CONTACT_ENFORCEMENT_ENABLED", true),
            auto_ttl_seconds: parse_int_env("CONTACT_AUTO_TTL_SECONDS", 86400),
        }
    }
}

/// Agent name handling during registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum NameEnforcementMode {
    /// Reject invalid provided names.
    Strict,
    /// Ignore invalid provided names and auto-generate a valid one.
    Coerce,
    /// Ignore any provided name and always auto-generate.
    AlwaysAuto,
}

impl NameEnforcementMode {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "strict" => Self::Strict,
            "always_auto" => Self::AlwaysAuto,
            _ => Self::Coerce,
        }
    }
}

/// Send-side leniency knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingSettings {
    /// Auto-create stub agents for unknown local recipients.
    pub auto_register_recipients: bool,
    /// Open a pending contact request instead of failing a gated send.
    pub auto_handshake_on_block: bool,
    pub agent_name_enforcement: NameEnforcementMode,
}

impl MessagingSettings {
    fn from_env() -> Self {
        Self {
            auto_register_recipients: parse_bool_env("MESSAGING_AUTO_REGISTER_RECIPIENTS", false),
            auto_handshake_on_block: parse_bool_env("MESSAGING_AUTO_HANDSHAKE_ON_BLOCK", false),
            agent_name_enforcement: NameEnforcementMode::parse(&parse_str_env(
                "AGENT_NAME_ENFORCEMENT_MODE",
                "coerce",
            )),
        }
    }
}

/// Filesystem signal files touched on delivery (agents poll; this is the
/// only push-adjacent mechanism).
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub signals_dir: PathBuf,
    pub debounce_ms: u64,
}

impl NotificationSettings {
    fn from_env() -> Self {
        Self {
            enabled: parse_bool_env("NOTIFICATIONS_ENABLED", false),
            signals_dir: expand_tilde(&parse_str_env(
                "NOTIFICATIONS_SIGNALS_DIR",
                "~/.agent_relay/signals",
            )),
            debounce_ms: parse_int_env("NOTIFICATIONS_DEBOUNCE_MS", 100),
        }
    }
}

/// Which tools are exposed to agents.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolFilterSettings {
    pub enabled: bool,
    /// "full" | "core" | "minimal" | "messaging" | "custom"
    pub profile: String,
    /// "include" | "exclude" (custom profile only)
    pub mode: String,
    pub clusters: Vec<String>,
    pub tools: Vec<String>,
}

impl ToolFilterSettings {
    fn from_env() -> Self {
        let profile = parse_str_env("TOOLS_FILTER_PROFILE", "full")
            .trim()
            .to_lowercase();
        let profile = match profile.as_str() {
            "full" | "core" | "minimal" | "messaging" | "custom" => profile,
            _ => "full".to_string(),
        };
        let mode = parse_str_env("TOOLS_FILTER_MODE", "include")
            .trim()
            .to_lowercase();
        let mode = if mode == "exclude" { mode } else { "include".to_string() };
        Self {
            enabled: parse_bool_env("TOOLS_FILTER_ENABLED", false),
            profile,
            mode,
            clusters: parse_csv_env("TOOLS_FILTER_CLUSTERS"),
            tools: parse_csv_env("TOOLS_FILTER_TOOLS"),
        }
    }
}

/// Retention/quota reporting (report only, never deletes).
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionSettings {
    pub report_enabled: bool,
    pub report_interval_seconds: u64,
    pub quota_enabled: bool,
    pub quota_attachments_limit_bytes: u64,
    pub quota_inbox_limit_count: i64,
}

impl RetentionSettings {
    fn from_env() -> Self {
        Self {
            report_enabled: parse_bool_env("RETENTION_REPORT_ENABLED", false),
            report_interval_seconds: parse_int_env("RETENTION_REPORT_INTERVAL_SECONDS", 3600),
            quota_enabled: parse_bool_env("QUOTA_ENABLED", false),
            quota_attachments_limit_bytes: parse_int_env(
                "QUOTA_ATTACHMENTS_LIMIT_BYTES",
                512 * 1024 * 1024,
            ),
            quota_inbox_limit_count: parse_int_env("QUOTA_INBOX_LIMIT_COUNT", 10_000),
        }
    }
}

/// Tool metric aggregation emission.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    pub emit_enabled: bool,
    pub emit_interval_seconds: u64,
}

impl MetricsSettings {
    fn from_env() -> Self {
        Self {
            emit_enabled: parse_bool_env("TOOL_METRICS_EMIT_ENABLED", false),
            emit_interval_seconds: parse_int_env("TOOL_METRICS_EMIT_INTERVAL_SECONDS", 60),
        }
    }
}

/// Optional LLM refinement for thread summaries. The core only carries
/// the knobs; the refinement step itself is a pluggable trait.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    pub enabled: bool,
    pub default_model: String,
}

impl LlmSettings {
    fn from_env() -> Self {
        Self {
            enabled: parse_bool_env("LLM_ENABLED", false),
            default_model: parse_str_env("LLM_DEFAULT_MODEL", "gpt-4o-mini"),
        }
    }
}

/// Top-level application settings, immutable after startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub storage: StorageSettings,
    pub database: DatabaseSettings,
    pub reservations: ReservationSettings,
    pub acks: AckSettings,
    pub contacts: ContactSettings,
    pub messaging: MessagingSettings,
    pub notifications: NotificationSettings,
    pub tool_filter: ToolFilterSettings,
    pub retention: RetentionSettings,
    pub metrics: MetricsSettings,
    pub llm: LlmSettings,
    /// LRU capacity for open git repository handles.
    pub repo_cache_size: usize,
    /// Days of inactivity before a window identity expires.
    pub window_identity_ttl_days: i64,
}

impl Settings {
    /// Read all knobs from the environment.
    pub fn from_env() -> Self {
        let storage = StorageSettings::from_env();
        let database = DatabaseSettings::from_env(&storage.root);
        Self {
            storage,
            database,
            reservations: ReservationSettings::from_env(),
            acks: AckSettings::from_env(),
            contacts: ContactSettings::from_env(),
            messaging: MessagingSettings::from_env(),
            notifications: NotificationSettings::from_env(),
            tool_filter: ToolFilterSettings::from_env(),
            retention: RetentionSettings::from_env(),
            metrics: MetricsSettings::from_env(),
            llm: LlmSettings::from_env(),
            repo_cache_size: parse_int_env("GIT_REPO_CACHE_SIZE", 16),
            window_identity_ttl_days: parse_int_env("WINDOW_IDENTITY_TTL_DAYS", 30),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageSettings {
                root: PathBuf::from("data/archive"),
                git_author_name: "relay-bot".to_string(),
                git_author_email: "relay-bot@localhost".to_string(),
                inline_image_max_bytes: 64 * 1024,
                convert_images: true,
                keep_original_images: false,
                allow_missing_attachments: true,
            },
            database: DatabaseSettings {
                path: PathBuf::from("data/relay.sqlite3"),
            },
            reservations: ReservationSettings {
                cleanup_enabled: true,
                cleanup_interval_seconds: 60,
                inactivity_seconds: 1800,
                activity_grace_seconds: 900,
                enforcement_enabled: true,
            },
            acks: AckSettings {
                ttl_enabled: false,
                ttl_seconds: 1800,
                scan_interval_seconds: 60,
                escalation_enabled: false,
                escalation_mode: "log".to_string(),
                escalation_claim_ttl_seconds: 3600,
            },
            contacts: ContactSettings {
                enforcement_enabled: true,
                auto_ttl_seconds: 86400,
            },
            messaging: MessagingSettings {
                auto_register_recipients: false,
                auto_handshake_on_block: false,
                agent_name_enforcement: NameEnforcementMode::Coerce,
            },
            notifications: NotificationSettings {
                enabled: false,
                signals_dir: PathBuf::from("data/signals"),
                debounce_ms: 100,
            },
            tool_filter: ToolFilterSettings {
                enabled: false,
                profile: "full".to_string(),
                mode: "include".to_string(),
                clusters: Vec::new(),
                tools: Vec::new(),
            },
            retention: RetentionSettings {
                report_enabled: false,
                report_interval_seconds: 3600,
                quota_enabled: false,
                quota_attachments_limit_bytes: 512 * 1024 * 1024,
                quota_inbox_limit_count: 10_000,
            },
            metrics: MetricsSettings {
                emit_enabled: false,
                emit_interval_seconds: 60,
            },
            llm: LlmSettings {
                enabled: false,
                default_model: "gpt-4o-mini".to_string(),
            },
            repo_cache_size: 16,
            window_identity_ttl_days: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_env_truthy() {
        for (key, val) in [
            ("RELAY_TEST_1", "1"),
            ("RELAY_TEST_T", "true"),
            ("RELAY_TEST_Y", "yes"),
        ] {
            temp_env::with_var(key, Some(val), || {
                assert!(parse_bool_env(key, false), "Expected true for {}={}", key, val);
            });
        }
    }

    #[test]
    fn test_parse_bool_env_falsy_and_default() {
        temp_env::with_var("RELAY_TEST_F", Some("0"), || {
            assert!(!parse_bool_env("RELAY_TEST_F", true));
        });
        temp_env::with_var_unset("RELAY_TEST_UNSET", || {
            assert!(parse_bool_env("RELAY_TEST_UNSET", true));
            assert!(!parse_bool_env("RELAY_TEST_UNSET", false));
        });
    }

    #[test]
    fn test_name_enforcement_parse() {
        assert_eq!(NameEnforcementMode::parse("strict"), NameEnforcementMode::Strict);
        assert_eq!(
            NameEnforcementMode::parse("always_auto"),
            NameEnforcementMode::AlwaysAuto
        );
        assert_eq!(NameEnforcementMode::parse("coerce"), NameEnforcementMode::Coerce);
        assert_eq!(NameEnforcementMode::parse("bogus"), NameEnforcementMode::Coerce);
    }

    #[test]
    fn test_tool_filter_profile_fallback() {
        temp_env::with_var("TOOLS_FILTER_PROFILE", Some("nonsense"), || {
            let tf = ToolFilterSettings::from_env();
            assert_eq!(tf.profile, "full");
        });
    }

    #[test]
    fn test_inline_threshold_default() {
        let settings = Settings::default();
        assert_eq!(settings.storage.inline_image_max_bytes, 65536);
    }
}
