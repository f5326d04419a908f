use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event organised for a client under exactly one contract.
/// Its status is not stored: it always mirrors the contract's `signed` flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub client_id: Uuid,
    pub contract_id: Uuid,
    pub support_id: Uuid,
    pub attendees: u32,
    pub starts_at: DateTime<Utc>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
