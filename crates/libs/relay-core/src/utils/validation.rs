// Allow expect in this module: regex patterns are compile-time verified
#![allow(clippy::expect_used)]

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref AGENT_NAME_RE: Regex =
        Regex::new(r"^[a-zA-Z0-9_]{1,64}$").expect("valid regex pattern");
    static ref HUMAN_KEY_RE: Regex =
        Regex::new(r"^[a-zA-Z0-9._/ -]{1,255}$").expect("valid regex pattern");
}

/// Input validation errors with recovery hints
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ValidationError {
    #[error("Project key must be an absolute path or logical name, got: {provided}")]
    InvalidProjectKey {
        provided: String,
        suggestion: String,
    },

    #[error("Agent name must match ^[a-zA-Z0-9_]{{1,64}}$, got: {provided}")]
    InvalidAgentName {
        provided: String,
        suggestion: String,
    },

    #[error("TTL must be between {min}s and {max}s, got: {provided}s")]
    InvalidTtl {
        provided: i64,
        min: i64,
        max: i64,
        suggestion: i64,
    },

    #[error("Importance must be one of low, normal, high, urgent; got: {provided}")]
    InvalidImportance { provided: String },

    #[error("Contact policy must be one of open, auto, contacts_only, block_all; got: {provided}")]
    InvalidContactPolicy { provided: String },

    #[error("Attachments policy must be one of auto, inline, file, drop; got: {provided}")]
    InvalidAttachmentsPolicy { provided: String },
}

impl ValidationError {
    pub fn context(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Validate agent name
pub fn validate_agent_name(name: &str) -> Result<(), ValidationError> {
    if AGENT_NAME_RE.is_match(name) {
        return Ok(());
    }

    Err(ValidationError::InvalidAgentName {
        provided: name.to_string(),
        suggestion: sanitize_agent_name(name),
    })
}

/// Whether a provided agent name is valid at all (used by coerce mode).
pub fn agent_name_is_valid(name: &str) -> bool {
    AGENT_NAME_RE.is_match(name)
}

/// Sanitize agent name for suggestion
pub fn sanitize_agent_name(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .take(64)
        .collect::<String>()
}

/// Validate project key (absolute path or logical name)
pub fn validate_project_key(key: &str) -> Result<(), ValidationError> {
    if key.starts_with('/') {
        // Absolute-path form; existence is not required (logical keys can
        // name directories that do not exist on this host).
        return Ok(());
    }

    if HUMAN_KEY_RE.is_match(key) {
        return Ok(());
    }

    Err(ValidationError::InvalidProjectKey {
        provided: key.to_string(),
        suggestion: crate::utils::slugify(key),
    })
}

/// TTL bounds for reservations and contact links.
pub const TTL_MIN_SECONDS: i64 = 1;
pub const TTL_MAX_SECONDS: i64 = 7 * 24 * 3600;

pub fn validate_ttl(ttl_seconds: i64) -> Result<(), ValidationError> {
    if (TTL_MIN_SECONDS..=TTL_MAX_SECONDS).contains(&ttl_seconds) {
        return Ok(());
    }
    Err(ValidationError::InvalidTtl {
        provided: ttl_seconds,
        min: TTL_MIN_SECONDS,
        max: TTL_MAX_SECONDS,
        suggestion: ttl_seconds.clamp(TTL_MIN_SECONDS, TTL_MAX_SECONDS),
    })
}

pub fn validate_importance(importance: &str) -> Result<(), ValidationError> {
    match importance {
        "low" | "normal" | "high" | "urgent" => Ok(()),
        other => Err(ValidationError::InvalidImportance {
            provided: other.to_string(),
        }),
    }
}

pub fn validate_contact_policy(policy: &str) -> Result<(), ValidationError> {
    match policy {
        "open" | "auto" | "contacts_only" | "block_all" => Ok(()),
        other => Err(ValidationError::InvalidContactPolicy {
            provided: other.to_string(),
        }),
    }
}

pub fn validate_attachments_policy(policy: &str) -> Result<(), ValidationError> {
    match policy {
        "auto" | "inline" | "file" | "drop" => Ok(()),
        other => Err(ValidationError::InvalidAttachmentsPolicy {
            provided: other.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_name_valid() {
        assert!(validate_agent_name("BlueLake").is_ok());
        assert!(validate_agent_name("worker_1").is_ok());
        assert!(validate_agent_name("a").is_ok());
    }

    #[test]
    fn test_agent_name_invalid() {
        assert!(validate_agent_name("").is_err());
        assert!(validate_agent_name("has space").is_err());
        assert!(validate_agent_name("src/main.rs").is_err());
        let long = "x".repeat(65);
        assert!(validate_agent_name(&long).is_err());
    }

    #[test]
    fn test_sanitize_agent_name() {
        assert_eq!(sanitize_agent_name("src/main.rs"), "srcmainrs");
        assert_eq!(sanitize_agent_name("Blue Lake!"), "BlueLake");
    }

    #[test]
    fn test_project_key_absolute_path() {
        assert!(validate_project_key("/home/user/backend").is_ok());
        assert!(validate_project_key("backend").is_ok());
        assert!(validate_project_key("my project").is_ok());
    }

    #[test]
    fn test_ttl_bounds() {
        assert!(validate_ttl(1).is_ok());
        assert!(validate_ttl(3600).is_ok());
        assert!(validate_ttl(0).is_err());
        assert!(validate_ttl(TTL_MAX_SECONDS + 1).is_err());
    }

    #[test]
    fn test_importance_values() {
        for v in ["low", "normal", "high", "urgent"] {
            assert!(validate_importance(v).is_ok());
        }
        assert!(validate_importance("critical").is_err());
    }

    #[test]
    fn test_contact_policy_values() {
        for v in ["open", "auto", "contacts_only", "block_all"] {
            assert!(validate_contact_policy(v).is_ok());
        }
        assert!(validate_contact_policy("deny").is_err());
    }
}
