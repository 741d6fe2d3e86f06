use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A timestamped observation of an IP within a partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub sighting_id: Uuid,
    pub ip: String,
    pub partition: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Sighting {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.last_seen < now - ttl
    }
}
