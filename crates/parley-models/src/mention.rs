use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub message_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Mentions that survived validation and were persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionOutcome {
    pub created_user_ids: Vec<i64>,
    pub usernames: Vec<String>,
}

impl MentionOutcome {
    pub fn is_empty(&self) -> bool {
        self.created_user_ids.is_empty()
    }
}
