use serde::{Deserialize, Serialize};

/// A (username, password) pair, optionally scoped to one network (§3). A
/// `None` `network_id` marks a global credential tried against every
/// network after network-scoped ones are exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Credential {
    pub id: String,
    pub network_id: Option<String>,
    pub username: String,
    pub password: String,
}

/// Links a credential to the MAC it last succeeded against, so the next
/// scan tries the winning credential first (§3, §8 property 9).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MatchedDevice {
    pub credential_id: String,
    pub mac: String,
}
