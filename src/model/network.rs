use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A logical scan target (§3). Created by an admin, destroyed explicitly;
/// destruction cascades to every device/interface/lease/scan row scoped to
/// it (enforced by `ON DELETE CASCADE` in the schema, §persistence).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub root_ip: String,
    pub root_username: String,
    pub root_password: String,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub device_count: i64,
    pub is_online: bool,
}

impl Network {
    pub fn new(id: impl Into<String>, name: impl Into<String>, root_ip: impl Into<String>, root_username: impl Into<String>, root_password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            root_ip: root_ip.into(),
            root_username: root_username.into(),
            root_password: root_password.into(),
            last_scanned_at: None,
            device_count: 0,
            is_online: false,
        }
    }
}
