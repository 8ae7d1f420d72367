use crate::config::{LimitsConfig, PostingPolicy};
use crate::error::{PipelineError, ValidationIssue};
use chrono::{DateTime, Utc};
use parley_db::messages::SenderRef;
use parley_db::DbPool;
use parley_models::conversation::{Conversation, EncryptionSetting};
use parley_models::request::{AuthContext, MessageRequest, SenderIdentity};
use parley_models::user::{AnonymousParticipant, User, UserRole};
use parley_util::validation;

/// Outcome of the shape checks; every problem is reported, not just the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub ok: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationResult {
    fn from_issues(errors: Vec<ValidationIssue>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
        }
    }

    pub fn into_result(self) -> Result<(), PipelineError> {
        if self.ok {
            Ok(())
        } else {
            Err(PipelineError::Validation(self.errors))
        }
    }
}

/// The sender as loaded from storage once permissions pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedSender {
    User(User),
    Anonymous(AnonymousParticipant),
}

impl ResolvedSender {
    pub fn sender_ref(&self) -> SenderRef {
        match self {
            Self::User(user) => SenderRef::User(user.id),
            Self::Anonymous(participant) => SenderRef::Anonymous(participant.id),
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            Self::User(user) => Some(user.id),
            Self::Anonymous(_) => None,
        }
    }

    pub fn role(&self) -> UserRole {
        match self {
            Self::User(user) => user.role,
            Self::Anonymous(_) => UserRole::User,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionResult {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Present exactly when `allowed` is true.
    pub sender: Option<ResolvedSender>,
}

impl PermissionResult {
    fn allow(sender: ResolvedSender) -> Self {
        Self {
            allowed: true,
            reason: None,
            sender: Some(sender),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            sender: None,
        }
    }

    pub fn into_sender(self) -> Result<ResolvedSender, PipelineError> {
        match (self.allowed, self.sender) {
            (true, Some(sender)) => Ok(sender),
            _ => Err(PipelineError::PermissionDenied(
                self.reason.unwrap_or_else(|| "not allowed".to_string()),
            )),
        }
    }
}

/// Build the identifier cache with a 10-minute TTL and 10k max entries.
/// Identifiers never change once assigned, so entries only age out.
pub fn build_identifier_cache() -> moka::future::Cache<String, i64> {
    moka::future::Cache::builder()
        .max_capacity(10_000)
        .time_to_live(std::time::Duration::from_secs(600))
        .build()
}

pub struct RequestValidator {
    pool: DbPool,
    limits: LimitsConfig,
    policy: PostingPolicy,
    identifiers: moka::future::Cache<String, i64>,
}

impl RequestValidator {
    pub fn new(pool: DbPool, limits: LimitsConfig, policy: PostingPolicy) -> Self {
        Self {
            pool,
            limits,
            policy,
            identifiers: build_identifier_cache(),
        }
    }

    /// Request shape only; no storage access.
    pub fn validate(&self, request: &MessageRequest) -> ValidationResult {
        let mut issues = Vec::new();

        match (request.sender_id, &request.anonymous_session) {
            (Some(_), Some(_)) => issues.push(ValidationIssue::new(
                "sender",
                "registered and anonymous identities are mutually exclusive",
            )),
            (None, None) => issues.push(ValidationIssue::new("sender", "missing sender identity")),
            (None, Some(session)) if session.session_token.trim().is_empty() => issues.push(
                ValidationIssue::new("anonymous_session.session_token", "required"),
            ),
            _ => {}
        }

        if request.conversation.trim().is_empty() {
            issues.push(ValidationIssue::new("conversation", "required"));
        }

        if request.content.trim().is_empty()
            && !request.has_attachments()
            && request.encrypted_payload.is_none()
        {
            issues.push(ValidationIssue::new(
                "content",
                "message must have content or attachments",
            ));
        }
        if let Err(err) = validation::validate_message_content(
            &request.content,
            self.limits.elevated_max_content_length,
        ) {
            issues.push(ValidationIssue::new("content", err.to_string()));
        }

        if request.attachment_ids.len() > self.limits.max_attachments {
            issues.push(ValidationIssue::new(
                "attachment_ids",
                format!("at most {} attachments", self.limits.max_attachments),
            ));
        }
        if let Some(ids) = &request.mentioned_user_ids {
            if ids.len() > self.limits.max_mentions {
                issues.push(ValidationIssue::new(
                    "mentioned_user_ids",
                    format!("at most {} mentions", self.limits.max_mentions),
                ));
            }
        }

        if let Some(language) = request.language.as_deref().map(str::trim) {
            if !language.is_empty() && validation::validate_language_code(language).is_err() {
                issues.push(ValidationIssue::new(
                    "language",
                    format!("'{language}' is not a language code"),
                ));
            }
        }

        if let Some(payload) = &request.encrypted_payload {
            if payload.ciphertext.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    "encrypted_payload.ciphertext",
                    "required",
                ));
            }
        }

        ValidationResult::from_issues(issues)
    }

    /// Checks that depend on the target conversation's configuration.
    pub fn validate_for_conversation(
        &self,
        request: &MessageRequest,
        conversation: &Conversation,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let mut issues = Vec::new();
        if request.encrypted_payload.is_some() {
            let accepts = match conversation.active_encryption(now) {
                EncryptionSetting::Mode(mode) => mode.accepts_client_payload(),
                _ => false,
            };
            if !accepts {
                issues.push(ValidationIssue::new(
                    "encrypted_payload",
                    "conversation does not accept client-encrypted messages",
                ));
            }
        }
        ValidationResult::from_issues(issues)
    }

    /// Accepts a numeric id or an identifier slug.
    pub async fn resolve_conversation_id(&self, reference: &str) -> Result<i64, PipelineError> {
        let reference = reference.trim();
        if let Ok(id) = reference.parse::<i64>() {
            if parley_db::conversations::get_conversation(&self.pool, id)
                .await?
                .is_some()
            {
                return Ok(id);
            }
        }

        if let Some(id) = self.identifiers.get(reference).await {
            return Ok(id);
        }
        if validation::validate_conversation_identifier(reference).is_err() {
            return Err(PipelineError::ConversationNotFound(reference.to_string()));
        }
        match parley_db::conversations::resolve_identifier(&self.pool, reference).await? {
            Some(id) => {
                self.identifiers.insert(reference.to_string(), id).await;
                Ok(id)
            }
            None => Err(PipelineError::ConversationNotFound(reference.to_string())),
        }
    }

    /// Authorization for posting `request` into `conversation` as `auth`.
    /// Denials are values; only storage failures are errors.
    pub async fn check_permissions(
        &self,
        request: &MessageRequest,
        auth: &AuthContext,
        conversation: &Conversation,
    ) -> Result<PermissionResult, PipelineError> {
        let Some(identity) = request.sender() else {
            return Ok(PermissionResult::deny("missing sender identity"));
        };
        if !auth.matches(&identity) {
            return Ok(PermissionResult::deny(
                "sender does not match the authenticated principal",
            ));
        }

        let result = match identity {
            SenderIdentity::Registered { user_id } => {
                self.check_registered(user_id, conversation).await?
            }
            SenderIdentity::Anonymous { session_token } => {
                self.check_anonymous(&session_token, conversation).await?
            }
        };

        if let Some(sender) = &result.sender {
            let limit = self.limits.content_limit_for(sender.role());
            if request.content.chars().count() > limit {
                return Ok(PermissionResult::deny(format!(
                    "content exceeds {limit} characters for role {}",
                    sender.role().as_str()
                )));
            }
        }
        Ok(result)
    }

    async fn check_registered(
        &self,
        user_id: i64,
        conversation: &Conversation,
    ) -> Result<PermissionResult, PipelineError> {
        let Some(row) = parley_db::users::get_user(&self.pool, user_id).await? else {
            return Ok(PermissionResult::deny("unknown user"));
        };
        let user: User = row.into();
        if !user.is_active {
            return Ok(PermissionResult::deny("user account is inactive"));
        }

        match conversation.membership(user_id) {
            Some(membership) if membership.can_send_messages => {
                Ok(PermissionResult::allow(ResolvedSender::User(user)))
            }
            Some(_) => Ok(PermissionResult::deny(
                "user may not send messages in this conversation",
            )),
            None if self.policy.is_global(conversation.kind)
                && self.policy.global_allows_non_members =>
            {
                Ok(PermissionResult::allow(ResolvedSender::User(user)))
            }
            None => Ok(PermissionResult::deny(
                "user is not a member of this conversation",
            )),
        }
    }

    async fn check_anonymous(
        &self,
        session_token: &str,
        conversation: &Conversation,
    ) -> Result<PermissionResult, PipelineError> {
        let Some(row) =
            parley_db::anonymous::get_by_session_token(&self.pool, session_token).await?
        else {
            return Ok(PermissionResult::deny("unknown anonymous session"));
        };
        let participant: AnonymousParticipant = row.into();
        if !participant.is_active {
            return Ok(PermissionResult::deny("anonymous session is inactive"));
        }
        if !participant.can_send_messages {
            return Ok(PermissionResult::deny(
                "anonymous participant may not send messages",
            ));
        }

        let admitted_here =
            participant.conversation_id == conversation.id && conversation.allow_anonymous;
        let admitted_globally =
            self.policy.is_global(conversation.kind) && self.policy.global_allows_anonymous;
        if admitted_here || admitted_globally {
            Ok(PermissionResult::allow(ResolvedSender::Anonymous(participant)))
        } else {
            Ok(PermissionResult::deny(
                "conversation does not accept anonymous participants",
            ))
        }
    }

    /// Declared language (normalized), else a guess from the content, else
    /// `fallback`.
    pub fn resolve_language(&self, request: &MessageRequest, fallback: &str) -> String {
        if let Some(declared) = request.language.as_deref().map(str::trim) {
            if !declared.is_empty() {
                return validation::normalize_language_code(declared);
            }
        }
        match parley_util::language::detect_language(&request.content) {
            Some(detected) => {
                tracing::debug!(language = detected, "detected message language");
                detected.to_string()
            }
            None => fallback.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_models::encryption::ClientEncryptedPayload;
    use parley_models::request::AnonymousSession;

    async fn validator() -> RequestValidator {
        let pool = parley_db::create_pool("sqlite::memory:", 1).await.unwrap();
        parley_db::run_migrations(&pool).await.unwrap();
        RequestValidator::new(pool, LimitsConfig::default(), PostingPolicy::default())
    }

    fn request(content: &str) -> MessageRequest {
        MessageRequest {
            sender_id: Some(1),
            conversation: "general".into(),
            content: content.into(),
            ..Default::default()
        }
    }

    fn fields(result: &ValidationResult) -> Vec<&'static str> {
        result.errors.iter().map(|issue| issue.field).collect()
    }

    #[tokio::test]
    async fn accepts_a_plain_message() {
        let v = validator().await;
        assert!(v.validate(&request("hello")).ok);
    }

    #[tokio::test]
    async fn empty_content_needs_attachments() {
        let v = validator().await;
        let result = v.validate(&request("   "));
        assert_eq!(fields(&result), vec!["content"]);

        let mut with_file = request("");
        with_file.attachment_ids = vec![5];
        assert!(v.validate(&with_file).ok);
    }

    #[tokio::test]
    async fn sender_identities_are_exclusive() {
        let v = validator().await;
        let mut both = request("hi");
        both.anonymous_session = Some(AnonymousSession {
            session_token: "tok".into(),
        });
        assert_eq!(fields(&v.validate(&both)), vec!["sender"]);

        let mut blank_session = request("hi");
        blank_session.sender_id = None;
        blank_session.anonymous_session = Some(AnonymousSession::default());
        assert_eq!(
            fields(&v.validate(&blank_session)),
            vec!["anonymous_session.session_token"]
        );

        let mut nobody = request("hi");
        nobody.sender_id = None;
        assert_eq!(fields(&v.validate(&nobody)), vec!["sender"]);
    }

    #[tokio::test]
    async fn reports_every_problem() {
        let v = validator().await;
        let mut bad = request(&"x".repeat(4001));
        bad.conversation = " ".into();
        bad.language = Some("english".into());
        bad.attachment_ids = (0..11).collect();
        bad.mentioned_user_ids = Some((0..51).collect());
        bad.encrypted_payload = Some(ClientEncryptedPayload {
            ciphertext: "".into(),
            metadata: serde_json::Value::Null,
        });
        let result = v.validate(&bad);
        assert!(!result.ok);
        assert_eq!(
            fields(&result),
            vec![
                "conversation",
                "content",
                "attachment_ids",
                "mentioned_user_ids",
                "language",
                "encrypted_payload.ciphertext",
            ]
        );
        assert!(matches!(
            result.into_result(),
            Err(PipelineError::Validation(issues)) if issues.len() == 6
        ));
    }

    #[tokio::test]
    async fn unknown_references_are_not_found() {
        let v = validator().await;
        assert!(matches!(
            v.resolve_conversation_id("missing-room").await,
            Err(PipelineError::ConversationNotFound(r)) if r == "missing-room"
        ));
        assert!(matches!(
            v.resolve_conversation_id("Not A Slug").await,
            Err(PipelineError::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn declared_language_wins_over_detection() {
        let v = validator().await;
        let mut req = request("Bonjour, je pense que c'est pour vous");
        assert_eq!(v.resolve_language(&req, "en"), "fr");
        req.language = Some("PT-br".into());
        assert_eq!(v.resolve_language(&req, "en"), "pt");
        let short = request("ok");
        assert_eq!(v.resolve_language(&short, "de"), "de");
    }
}
