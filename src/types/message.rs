use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A published message. Immutable once written; `id` is also the global
/// publish order across every channel.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Message {
    pub id: u64,
    pub channel: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
