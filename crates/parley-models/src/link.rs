use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of the user-visible short form of a tracking link.
pub const SHORT_LINK_PREFIX: &str = "m+";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingLink {
    pub id: i64,
    pub token: String,
    pub original_url: String,
    pub conversation_id: i64,
    pub created_by: Option<i64>,
    /// Unknown until the owning message is persisted.
    pub message_id: Option<i64>,
    pub is_active: bool,
    pub click_count: i64,
    pub created_at: DateTime<Utc>,
}

impl TrackingLink {
    pub fn short_form(&self) -> String {
        short_form(&self.token)
    }
}

pub fn short_form(token: &str) -> String {
    format!("{SHORT_LINK_PREFIX}{token}")
}

/// A link referenced by one rewrite pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedLink {
    pub original_url: String,
    pub token: String,
    /// False when an existing live link was reused.
    pub newly_created: bool,
}
