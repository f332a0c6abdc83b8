use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entrada append-only de la bitácora de una orden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpLog {
    pub username: String,
    pub order_id: Uuid,
    pub msg: String,
    pub created_at: DateTime<Utc>,
}

impl OpLog {
    pub fn new(username: impl Into<String>, order_id: Uuid, msg: impl Into<String>) -> Self {
        Self { username: username.into(),
               order_id,
               msg: msg.into(),
               created_at: Utc::now() }
    }
}
