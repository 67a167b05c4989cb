//! Error types for relay-core operations.
//!
//! Errors are categorized into:
//!
//! - **External errors**: wrapped errors from dependencies (libsql, git2,
//!   serde_json, io)
//! - **Internal errors**: generic failure modes
//! - **Domain errors**: entity-specific failures that map 1:1 onto the
//!   structured error kinds the tool surface returns (contact gating,
//!   reservation conflicts, staleness, retry exhaustion)

use crate::model::file_reservation::ReservationConflictInfo;
use strum_macros::AsRefStr;
use thiserror::Error;

/// The error type for relay-core operations.
///
/// Implements [`std::error::Error`] via `thiserror` with `From`
/// conversions for the underlying stores. Domain variants carry the
/// structured payloads that the dispatch layer serializes into the
/// `data` field of tool error responses.
#[derive(Debug, Error, AsRefStr)]
pub enum Error {
    // -- External errors from dependencies
    /// Database error from libsql.
    #[error("Libsql Error: {0}")]
    Libsql(#[from] libsql::Error),

    /// Git repository error.
    #[error("Git Error: {0}")]
    Git2(#[from] git2::Error),

    /// JSON serialization/deserialization error.
    #[error("Serde JSON Error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Standard I/O error.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    // -- Internal errors for common failure modes
    /// Generic entity not found.
    #[error("Entity not found")]
    NotFound,

    /// Input validation error with a free-form message.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // -- Model-specific not-found errors
    /// Project not found by slug, human key or id.
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Agent not found by name or id. Carries near-miss suggestions.
    #[error("Agent not found: {identifier}")]
    AgentNotFound {
        identifier: String,
        suggestions: Vec<String>,
    },

    /// Message not found by ID.
    #[error("Message not found: {0}")]
    MessageNotFound(i64),

    /// File reservation not found.
    #[error("FileReservation not found: {0}")]
    FileReservationNotFound(String),

    /// Product not found by uid or name.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Window identity not found for (project, window_uuid).
    #[error("Window identity not found: {0}")]
    WindowIdentityNotFound(String),

    // -- Send-time recipient resolution
    /// Recipient's project reference did not resolve.
    #[error("Recipient project not found: {0}")]
    RecipientProjectNotFound(String),

    /// Recipient agent did not resolve in the target project.
    #[error("Recipient not found: {recipient} in project '{project}'")]
    RecipientNotFound { recipient: String, project: String },

    // -- Contact gating
    /// Cross-project send without an approved link.
    #[error("Contact required: {from} -> {to}")]
    ContactRequired { from: String, to: String },

    /// Auto-handshake opened a pending request instead of delivering.
    #[error("Contact pending: {from} -> {to} (link {link_id})")]
    ContactPending {
        from: String,
        to: String,
        link_id: i64,
    },

    // -- Reservations
    /// Send or grant overlaps an active exclusive reservation held by
    /// another agent. Conflicts carry holder details for the response.
    #[error("File reservation conflict on {} pattern(s)", conflicts.len())]
    ReservationConflict {
        conflicts: Vec<ReservationConflictInfo>,
    },

    /// Force-release attempted on a reservation whose holder is still
    /// active (or whose sidecar was touched too recently).
    #[error("File reservation {id} is not stale: {reason}")]
    ReservationNotStale { id: i64, reason: String },

    // -- Storage contention
    /// Transient lock contention survived all retries. Recoverable.
    #[error("Resource busy after {attempts} attempts: {operation}")]
    ResourceBusy { operation: String, attempts: u32 },

    /// The database circuit breaker is open.
    #[error("Circuit breaker open; retry after cooldown")]
    CircuitOpen,

    /// Archive lock acquisition timed out.
    #[error("Lock timeout on {path}, held by PID {owner_pid}")]
    LockTimeout { path: String, owner_pid: u32 },

    /// Structured validation error with actionable suggestion.
    #[error("Validation error: {0}")]
    Validation(#[from] crate::utils::validation::ValidationError),
}

impl Error {
    pub fn project_not_found(identifier: impl Into<String>) -> Self {
        Self::ProjectNotFound(identifier.into())
    }

    pub fn agent_not_found(identifier: impl Into<String>) -> Self {
        Self::AgentNotFound {
            identifier: identifier.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn agent_not_found_with_suggestions(
        identifier: impl Into<String>,
        suggestions: Vec<String>,
    ) -> Self {
        Self::AgentNotFound {
            identifier: identifier.into(),
            suggestions,
        }
    }

    /// Whether the caller can reasonably retry the operation as-is.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ResourceBusy { .. } | Self::CircuitOpen)
    }
}

/// A specialized [`Result`] type for relay-core operations.
pub type Result<T> = core::result::Result<T, Error>;
