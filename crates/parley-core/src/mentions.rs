use crate::config::PostingPolicy;
use crate::validator::ResolvedSender;
use parley_db::users::UserRow;
use parley_db::{DbError, DbPool};
use parley_models::mention::MentionOutcome;
use parley_models::message::Message;
use parley_models::request::MessageRequest;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// `@name` not glued to a preceding word character (skips e-mail addresses).
static MENTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9_@])@([A-Za-z0-9_]{1,32})").expect("valid mention regex")
});

/// Lowercased usernames mentioned in `content`, in first-occurrence order.
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    MENTION_PATTERN
        .captures_iter(content)
        .map(|caps| caps[1].to_lowercase())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

pub struct MentionResolver {
    pool: DbPool,
    policy: PostingPolicy,
}

impl MentionResolver {
    pub fn new(pool: DbPool, policy: PostingPolicy) -> Self {
        Self { pool, policy }
    }

    /// Create mention rows for the permitted targets and record their
    /// usernames on the message. Failures are logged and yield an empty
    /// outcome; the message itself is already committed.
    pub async fn resolve(
        &self,
        request: &MessageRequest,
        message: &Message,
        sender: &ResolvedSender,
        final_content: &str,
    ) -> MentionOutcome {
        match self
            .try_resolve(request, message, sender, final_content)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    message_id = message.id,
                    error = %e,
                    "mention resolution failed"
                );
                MentionOutcome::default()
            }
        }
    }

    async fn try_resolve(
        &self,
        request: &MessageRequest,
        message: &Message,
        sender: &ResolvedSender,
        final_content: &str,
    ) -> Result<MentionOutcome, DbError> {
        if sender.is_anonymous() && !self.policy.anonymous_can_mention {
            return Ok(MentionOutcome::default());
        }

        let candidates = self.candidates(request, final_content).await?;
        if candidates.is_empty() {
            return Ok(MentionOutcome::default());
        }

        let members: HashSet<i64> =
            parley_db::conversations::get_active_members(&self.pool, message.conversation_id)
                .await?
                .into_iter()
                .map(|member| member.user_id)
                .collect();

        let sender_id = sender.user_id();
        let mut outcome = MentionOutcome::default();
        for user in candidates {
            if Some(user.id) == sender_id {
                continue;
            }
            if !user.is_active || !members.contains(&user.id) {
                tracing::debug!(
                    message_id = message.id,
                    user_id = user.id,
                    "mention target is not an active member, dropping"
                );
                continue;
            }
            outcome.created_user_ids.push(user.id);
            outcome.usernames.push(user.username);
        }

        if outcome.is_empty() {
            return Ok(outcome);
        }

        parley_db::mentions::insert_mentions(&self.pool, message.id, &outcome.created_user_ids)
            .await?;
        parley_db::messages::set_validated_mentions(&self.pool, message.id, &outcome.usernames)
            .await?;
        Ok(outcome)
    }

    /// Explicit ids take precedence over parsing the content.
    async fn candidates(
        &self,
        request: &MessageRequest,
        final_content: &str,
    ) -> Result<Vec<UserRow>, DbError> {
        match request.mentioned_user_ids.as_deref() {
            Some(ids) if !ids.is_empty() => {
                let mut unique = Vec::with_capacity(ids.len());
                for id in ids {
                    if !unique.contains(id) {
                        unique.push(*id);
                    }
                }
                let mut rows = parley_db::users::get_users_by_ids(&self.pool, &unique).await?;
                rows.sort_by_key(|row| unique.iter().position(|id| *id == row.id));
                Ok(rows)
            }
            _ => {
                let names = extract_mentions(final_content);
                let mut rows = parley_db::users::get_users_by_usernames(&self.pool, &names).await?;
                rows.sort_by_key(|row| {
                    let lowered = row.username.to_lowercase();
                    names.iter().position(|name| *name == lowered)
                });
                Ok(rows)
            }
        }
    }
}
