//! Tool parameter types.
//!
//! Every tool takes a typed parameter struct. Unknown fields are
//! rejected so agent-side contract drift surfaces as INVALID_ARGUMENT
//! instead of being silently dropped.

use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EnsureProjectParams {
    /// Absolute path of the working copy, or a logical project name
    pub human_key: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RegisterAgentParams {
    /// Project key (slug, human key, or path)
    pub project_key: String,
    /// Agent program (e.g., "claude-code", "codex")
    pub program: String,
    /// Model identifier (e.g., "gpt-5")
    pub model: String,
    /// Desired agent name; subject to the name enforcement mode
    #[serde(alias = "agent_name")]
    pub name: Option<String>,
    /// Description of the agent's task
    pub task_description: Option<String>,
    /// auto | inline | file | drop
    pub attachments_policy: Option<String>,
    /// open | auto | contacts_only | block_all
    pub contact_policy: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateAgentIdentityParams {
    /// Project key
    pub project_key: String,
    /// Agent program
    pub program: String,
    /// Model identifier
    pub model: String,
    /// Optional naming hint; a memorable name is generated regardless
    pub name_hint: Option<String>,
    /// Description of the agent's task
    pub task_description: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WhoisParams {
    /// Project key
    pub project_key: String,
    /// Agent name to look up
    pub agent_name: String,
    /// Include recent archive commits touching the agent's tree
    pub include_recent_commits: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SetContactPolicyParams {
    /// Project key
    pub project_key: String,
    /// Agent name
    pub agent_name: String,
    /// open | auto | contacts_only | block_all
    pub policy: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BindWindowIdentityParams {
    /// Project key
    pub project_key: String,
    /// Stable terminal-window UUID
    pub window_uuid: String,
    /// Display name bound to this window
    pub display_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SendMessageParams {
    /// Project key of the sender
    pub project_key: String,
    /// Sender agent name
    pub sender_name: String,
    /// Primary recipients. Grammar: `Name`, `Name@project`,
    /// `project:slug#Name`
    pub to: Vec<String>,
    /// CC recipients (same grammar)
    pub cc: Option<Vec<String>>,
    /// BCC recipients (same grammar)
    pub bcc: Option<Vec<String>>,
    /// Message subject
    pub subject: String,
    /// Message body in markdown
    pub body_md: String,
    /// Thread id to continue an existing conversation
    pub thread_id: Option<String>,
    /// Optional free-form topic tag
    pub topic: Option<String>,
    /// low | normal | high | urgent
    pub importance: Option<String>,
    /// Whether recipients must acknowledge this message
    pub ack_required: Option<bool>,
    /// Filesystem paths to attach
    pub attachment_paths: Option<Vec<String>>,
    /// Convert image attachments to WebP
    pub convert_images: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReplyMessageParams {
    /// Project key
    pub project_key: String,
    /// Message id to reply to
    pub message_id: i64,
    /// Sender agent name
    pub sender_name: String,
    /// Reply body in markdown
    pub body_md: String,
    /// Override recipients (defaults to the original sender)
    pub to: Option<Vec<String>>,
    /// CC recipients
    pub cc: Option<Vec<String>>,
    /// BCC recipients
    pub bcc: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FetchInboxParams {
    /// Project key
    pub project_key: String,
    /// Agent name
    pub agent_name: String,
    /// Maximum messages to return
    pub limit: Option<i64>,
    /// Include full message bodies
    pub include_bodies: Option<bool>,
    /// Only urgent messages
    pub urgent_only: Option<bool>,
    /// Only messages newer than this (YYYY-MM-DD HH:MM:SS, UTC)
    pub since_ts: Option<String>,
    /// Filter by topic
    pub topic: Option<String>,
    /// Filter by thread id
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListOutboxParams {
    /// Project key
    pub project_key: String,
    /// Agent name
    pub agent_name: String,
    /// Maximum messages to return
    pub limit: Option<i64>,
    /// Include full message bodies
    pub include_bodies: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MarkMessageReadParams {
    /// Project key
    pub project_key: String,
    /// Agent name marking the message read
    pub agent_name: String,
    /// Message id
    pub message_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AcknowledgeMessageParams {
    /// Project key
    pub project_key: String,
    /// Agent name acknowledging the message
    pub agent_name: String,
    /// Message id
    pub message_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchMessagesParams {
    /// Project key
    pub project_key: String,
    /// Query: bare tokens, `subject:X`, `body:X`, quoted phrases
    pub query: String,
    /// Maximum results
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SummarizeThreadParams {
    /// Project key
    pub project_key: String,
    /// Thread id, or `msg:<id>` for a singleton thread
    pub thread_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FileReservationPathsParams {
    /// Project key
    pub project_key: String,
    /// Agent requesting the reservations
    pub agent_name: String,
    /// Gitignore-style path patterns, project-root-relative
    pub paths: Vec<String>,
    /// TTL in seconds
    pub ttl_seconds: Option<i64>,
    /// Exclusive reservation (collides with any overlapping active one)
    pub exclusive: Option<bool>,
    /// Reason for the reservation
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReleaseFileReservationsParams {
    /// Project key
    pub project_key: String,
    /// Agent releasing its reservations
    pub agent_name: String,
    /// Patterns to release
    pub paths: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RenewFileReservationsParams {
    /// Project key
    pub project_key: String,
    /// Agent renewing its reservations
    pub agent_name: String,
    /// Patterns to renew
    pub paths: Vec<String>,
    /// Seconds to extend from now
    pub extend_seconds: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ForceReleaseFileReservationParams {
    /// Project key
    pub project_key: String,
    /// Agent requesting the force release
    pub agent_name: String,
    /// Reservation id to release
    pub reservation_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListFileReservationsParams {
    /// Project key
    pub project_key: String,
    /// Only reservations that are currently active
    pub active_only: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RequestContactParams {
    /// Requesting agent's project key
    pub project_key: String,
    /// Requesting agent name
    pub agent_name: String,
    /// Target: `Name@project` or `project:slug#Name`
    pub to: String,
    /// Why contact is requested
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RespondContactParams {
    /// Responding agent's project key
    pub project_key: String,
    /// Responding agent name (the request target)
    pub agent_name: String,
    /// Requester: `Name@project` or `project:slug#Name`
    pub from: String,
    /// Accept (approve) or refuse (block)
    pub accept: bool,
    /// TTL for the approved link in seconds
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListContactsParams {
    /// Project key
    pub project_key: String,
    /// Agent name
    pub agent_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateProductParams {
    /// Product name
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LinkProjectToProductParams {
    /// Product uid or name
    pub product: String,
    /// Project key to link
    pub project_key: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProductInboxParams {
    /// Product uid or name
    pub product: String,
    /// Agent name to aggregate across linked projects
    pub agent_name: String,
    /// Maximum messages to return
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProductSearchParams {
    /// Product uid or name
    pub product: String,
    /// Search query
    pub query: String,
    /// Maximum results
    pub limit: Option<i64>,
}
