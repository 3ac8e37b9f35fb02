use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::user::{Role, User};

/// Server-side record binding a logical login to device context, stored in
/// the key-value backend as JSON under `session:{id}`. The stateless token
/// and this record must always agree on user id and email; the auth pipeline
/// treats any disagreement as a hard failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
    pub org_unit_id: i64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub client_ip: String,
    pub user_agent: String,
}

impl Session {
    pub fn new(user: &User, client_ip: &str, user_agent: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            org_unit_id: user.org_unit_id,
            created_at: now,
            last_activity: now,
            client_ip: client_ip.to_string(),
            user_agent: user_agent.to_string(),
        }
    }
}
