//! Structured error codes for tool responses.
//!
//! Every failure carries a machine-readable `error_code`, a short
//! message, and a structured `data` payload. Recoverable kinds
//! (transient contention) additionally carry `recoverable: true` so the
//! adapter can present them without stack traces.

use rmcp::ErrorData as McpError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,

    ProjectNotFound,
    AgentNotFound,
    MessageNotFound,
    ProductNotFound,

    RecipientProjectNotFound,
    RecipientNotFound,

    ContactRequired,
    ContactPending,

    FileReservationConflict,
    FileReservationNotStale,
    FileReservationNotFound,

    ResourceBusy,
    CircuitOpen,

    InternalError,
}

impl ErrorCode {
    pub fn to_mcp_error(self, message: &str, context: Option<serde_json::Value>) -> McpError {
        let mut data = context.unwrap_or_else(|| serde_json::json!({}));

        if let Some(obj) = data.as_object_mut() {
            obj.insert(
                "error_code".to_string(),
                serde_json::to_value(self).unwrap_or_default(),
            );
            if matches!(self, Self::ResourceBusy | Self::CircuitOpen) {
                obj.insert("recoverable".to_string(), serde_json::Value::Bool(true));
            }
        }

        match self {
            Self::InternalError => McpError::internal_error(message.to_string(), Some(data)),
            Self::ResourceBusy | Self::CircuitOpen => {
                McpError::internal_error(message.to_string(), Some(data))
            }
            _ => McpError::invalid_params(message.to_string(), Some(data)),
        }
    }
}

#[macro_export]
macro_rules! mcp_err {
    ($code:expr, $msg:expr) => {
        $code.to_mcp_error($msg, None)
    };
    ($code:expr, $msg:expr, $ctx:tt) => {
        $code.to_mcp_error($msg, Some(serde_json::json!($ctx)))
    };
}

pub use mcp_err;

/// Map a core error onto the structured tool-error taxonomy.
///
/// Known domain errors keep their message and carry their payloads;
/// unknown errors are logged in full and surfaced redacted.
pub fn map_core_error(err: relay_core::Error) -> McpError {
    use relay_core::Error as E;
    match &err {
        E::ProjectNotFound(_) => ErrorCode::ProjectNotFound.to_mcp_error(&err.to_string(), None),
        E::AgentNotFound { suggestions, .. } => ErrorCode::AgentNotFound.to_mcp_error(
            &err.to_string(),
            Some(serde_json::json!({ "suggestions": suggestions })),
        ),
        E::MessageNotFound(_) => ErrorCode::MessageNotFound.to_mcp_error(&err.to_string(), None),
        E::ProductNotFound(_) => ErrorCode::ProductNotFound.to_mcp_error(&err.to_string(), None),
        E::FileReservationNotFound(_) => {
            ErrorCode::FileReservationNotFound.to_mcp_error(&err.to_string(), None)
        }
        E::RecipientProjectNotFound(_) => {
            ErrorCode::RecipientProjectNotFound.to_mcp_error(&err.to_string(), None)
        }
        E::RecipientNotFound { .. } => {
            ErrorCode::RecipientNotFound.to_mcp_error(&err.to_string(), None)
        }
        E::ContactRequired { from, to } => ErrorCode::ContactRequired.to_mcp_error(
            &err.to_string(),
            Some(serde_json::json!({ "from": from, "to": to })),
        ),
        E::ContactPending { from, to, link_id } => ErrorCode::ContactPending.to_mcp_error(
            &err.to_string(),
            Some(serde_json::json!({ "from": from, "to": to, "link_id": link_id })),
        ),
        E::ReservationConflict { conflicts } => ErrorCode::FileReservationConflict.to_mcp_error(
            &err.to_string(),
            Some(serde_json::json!({ "conflicts": conflicts })),
        ),
        E::ReservationNotStale { id, reason } => ErrorCode::FileReservationNotStale.to_mcp_error(
            &err.to_string(),
            Some(serde_json::json!({ "reservation_id": id, "reason": reason })),
        ),
        E::ResourceBusy { operation, attempts } => ErrorCode::ResourceBusy.to_mcp_error(
            &err.to_string(),
            Some(serde_json::json!({ "operation": operation, "attempts": attempts })),
        ),
        E::CircuitOpen => ErrorCode::CircuitOpen.to_mcp_error(&err.to_string(), None),
        E::Validation(v) => {
            ErrorCode::InvalidArgument.to_mcp_error(&err.to_string(), Some(v.context()))
        }
        E::InvalidInput(_) | E::WindowIdentityNotFound(_) | E::NotFound => {
            ErrorCode::InvalidArgument.to_mcp_error(&err.to_string(), None)
        }
        _ => {
            tracing::error!(error = %err, "internal error in tool handler");
            ErrorCode::InternalError.to_mcp_error("internal error", None)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serialization() {
        let code = ErrorCode::FileReservationConflict;
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"FILE_RESERVATION_CONFLICT\"");
    }

    #[test]
    fn test_to_mcp_error_includes_error_code() {
        let err = ErrorCode::AgentNotFound.to_mcp_error("Agent 'test' not found", None);
        let data = err.data.expect("should have data");
        assert_eq!(data.get("error_code").unwrap(), "AGENT_NOT_FOUND");
    }

    #[test]
    fn test_recoverable_flag_on_resource_busy() {
        let err = ErrorCode::ResourceBusy.to_mcp_error("busy", None);
        let data = err.data.expect("should have data");
        assert_eq!(data.get("recoverable").unwrap(), true);

        let err = ErrorCode::AgentNotFound.to_mcp_error("nope", None);
        let data = err.data.expect("should have data");
        assert!(data.get("recoverable").is_none());
    }

    #[test]
    fn test_map_contact_pending_payload() {
        let core = relay_core::Error::ContactPending {
            from: "BlueLake@alpha".into(),
            to: "PurpleBear@beta".into(),
            link_id: 7,
        };
        let err = map_core_error(core);
        let data = err.data.expect("should have data");
        assert_eq!(data.get("error_code").unwrap(), "CONTACT_PENDING");
        assert_eq!(data.get("link_id").unwrap(), 7);
    }

    #[test]
    fn test_map_internal_error_redacts() {
        let core = relay_core::Error::Io(std::io::Error::other("secret disk path"));
        let err = map_core_error(core);
        assert!(!err.message.contains("secret"));
    }

    #[test]
    fn test_mcp_err_macro_with_context() {
        let err = mcp_err!(
            ErrorCode::InvalidArgument,
            "bad ttl",
            { "ttl_seconds": -5 }
        );
        let data = err.data.expect("should have data");
        assert_eq!(data.get("error_code").unwrap(), "INVALID_ARGUMENT");
        assert_eq!(data.get("ttl_seconds").unwrap(), -5);
    }
}
