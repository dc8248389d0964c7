//! Audit log entries (`oauth_audit_log`, append-only).

use serde::{Deserialize, Serialize};

/// A single audit event. Rows are only ever inserted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: String,
    /// Dotted event name, e.g. `token.issued`, `client.registered`.
    pub event_type: String,
    /// What the event acted on (token id, client id, ...).
    pub subject: Option<String>,
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    /// JSON text with event-specific detail.
    pub metadata: Option<String>,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
}
