use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
    Public,
    Global,
    Broadcast,
}

impl ConversationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Public => "public",
            Self::Global => "global",
            Self::Broadcast => "broadcast",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            "public" => Some(Self::Public),
            "global" => Some(Self::Global),
            "broadcast" => Some(Self::Broadcast),
            _ => None,
        }
    }
}

/// Cipher strategy configured on a conversation.
///
/// - `Server`: ciphertext at rest, key held by the server (mode A).
/// - `E2ee`: end-to-end, key held by clients; the server never encrypts (mode B).
/// - `Hybrid`: a server layer plus a client-applied layer (mode C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    Server,
    E2ee,
    Hybrid,
}

impl EncryptionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::E2ee => "e2ee",
            Self::Hybrid => "hybrid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "server" => Some(Self::Server),
            "e2ee" => Some(Self::E2ee),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }

    /// Whether clients are allowed to submit their own ciphertext.
    pub fn accepts_client_payload(self) -> bool {
        matches!(self, Self::E2ee | Self::Hybrid)
    }
}

/// Encryption column as read from storage. Unknown values are kept verbatim
/// so the selector can report them instead of silently dropping them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EncryptionSetting {
    #[default]
    Disabled,
    Mode(EncryptionMode),
    Unrecognized(String),
}

impl EncryptionSetting {
    pub fn from_db(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::Disabled,
            Some(value) => EncryptionMode::parse(value)
                .map(Self::Mode)
                .unwrap_or_else(|| Self::Unrecognized(value.to_string())),
        }
    }

    pub fn mode(&self) -> Option<EncryptionMode> {
        match self {
            Self::Mode(mode) => Some(*mode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: i64,
    pub can_send_messages: bool,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: i64,
    /// Human-readable slug, unique across the server.
    pub identifier: String,
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub allow_anonymous: bool,
    pub encryption: EncryptionSetting,
    pub encryption_enabled_at: Option<DateTime<Utc>>,
    pub server_key_id: Option<String>,
    /// Active members only.
    pub members: Vec<Membership>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn membership(&self, user_id: i64) -> Option<&Membership> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn is_member(&self, user_id: i64) -> bool {
        self.membership(user_id).is_some()
    }

    pub fn member_ids(&self) -> Vec<i64> {
        self.members.iter().map(|m| m.user_id).collect()
    }

    /// Encryption mode in effect at `now`, ignoring modes whose activation
    /// timestamp is missing or still in the future.
    pub fn active_encryption(&self, now: DateTime<Utc>) -> &EncryptionSetting {
        const DISABLED: &EncryptionSetting = &EncryptionSetting::Disabled;
        match self.encryption_enabled_at {
            Some(enabled_at) if enabled_at <= now => &self.encryption,
            _ => DISABLED,
        }
    }
}
