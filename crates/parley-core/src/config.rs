use parley_models::conversation::ConversationKind;
use parley_models::user::UserRole;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Characters allowed for standard users.
    pub max_content_length: usize,
    /// Characters allowed for moderators and above.
    pub elevated_max_content_length: usize,
    pub max_attachments: usize,
    pub max_mentions: usize,
    /// Longer messages are not sent for translation.
    pub max_translation_length: usize,
    /// Characters of plaintext carried in a notification.
    pub notification_excerpt_length: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_content_length: 2000,
            elevated_max_content_length: 4000,
            max_attachments: 10,
            max_mentions: 50,
            max_translation_length: 10_000,
            notification_excerpt_length: 100,
        }
    }
}

impl LimitsConfig {
    pub fn content_limit_for(&self, role: UserRole) -> usize {
        if role.is_elevated() {
            self.elevated_max_content_length
        } else {
            self.max_content_length
        }
    }
}

/// Who may post where.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostingPolicy {
    /// Kinds treated as open to everyone on the server.
    pub global_kinds: Vec<ConversationKind>,
    pub global_allows_anonymous: bool,
    pub global_allows_non_members: bool,
    pub anonymous_can_mention: bool,
}

impl Default for PostingPolicy {
    fn default() -> Self {
        Self {
            global_kinds: vec![ConversationKind::Global, ConversationKind::Public],
            global_allows_anonymous: false,
            global_allows_non_members: true,
            anonymous_can_mention: true,
        }
    }
}

impl PostingPolicy {
    pub fn is_global(&self, kind: ConversationKind) -> bool {
        self.global_kinds.contains(&kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionSettings {
    /// Store plaintext when server-side sealing fails instead of rejecting.
    pub fail_open: bool,
    pub max_concurrent_jobs: usize,
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            fail_open: true,
            max_concurrent_jobs: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub token_length: usize,
    /// Fresh tokens tried after a token collision.
    pub max_token_attempts: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            token_length: 6,
            max_token_attempts: 3,
        }
    }
}

/// Everything the pipeline needs from configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub worker_id: u16,
    pub default_language: String,
    pub limits: LimitsConfig,
    pub policy: PostingPolicy,
    pub encryption: EncryptionSettings,
    pub links: LinkSettings,
}

impl PipelineConfig {
    /// Language used when neither the request nor detection provides one.
    pub fn fallback_language(&self) -> &str {
        if self.default_language.trim().is_empty() {
            "en"
        } else {
            &self.default_language
        }
    }
}
