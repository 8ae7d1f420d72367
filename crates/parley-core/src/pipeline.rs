use crate::collaborators::{NotificationSink, TranslationQueue};
use crate::config::PipelineConfig;
use crate::encryption::EncryptionSelector;
use crate::error::PipelineError;
use crate::links::LinkRewriter;
use crate::mentions::MentionResolver;
use crate::notifications::NotificationFanout;
use crate::persist::{Persistor, ProcessedMessage};
use crate::validator::{RequestValidator, ResolvedSender};
use chrono::Utc;
use parley_db::DbPool;
use parley_models::conversation::Conversation;
use parley_models::encryption::EncryptionContext;
use parley_models::message::Message;
use parley_models::notification::{TranslationJob, TranslationPriority};
use parley_models::request::{AuthContext, MessageRequest, MessageResponse};
use parley_util::cipher::Keyring;
use parley_util::validation::normalize_language_code;
use std::sync::Arc;
use uuid::Uuid;

/// Ingests one message at a time: validation, link rewriting, encryption,
/// the write, then mention/notification/translation enrichment.
#[derive(Clone)]
pub struct MessagePipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    pool: DbPool,
    config: PipelineConfig,
    validator: RequestValidator,
    links: LinkRewriter,
    encryption: EncryptionSelector,
    persistor: Persistor,
    mentions: MentionResolver,
    fanout: NotificationFanout,
    translations: Arc<dyn TranslationQueue>,
}

/// What the post-write phase produced.
#[derive(Debug, Default)]
struct Enrichment {
    mentioned_user_ids: Vec<i64>,
    mentioned_usernames: Vec<String>,
    translation_queued: bool,
}

/// Everything the post-write task needs, owned.
struct Committed {
    request: MessageRequest,
    message: Message,
    conversation: Conversation,
    sender: ResolvedSender,
    content: String,
    language: String,
    encryption: EncryptionContext,
}

impl MessagePipeline {
    pub fn new(
        pool: DbPool,
        config: PipelineConfig,
        keyring: Option<Keyring>,
        notifications: Arc<dyn NotificationSink>,
        translations: Arc<dyn TranslationQueue>,
    ) -> Self {
        let inner = PipelineInner {
            validator: RequestValidator::new(
                pool.clone(),
                config.limits.clone(),
                config.policy.clone(),
            ),
            links: LinkRewriter::new(pool.clone(), config.worker_id, config.links.clone()),
            encryption: EncryptionSelector::new(keyring, config.encryption.clone()),
            persistor: Persistor::new(pool.clone(), config.worker_id),
            mentions: MentionResolver::new(pool.clone(), config.policy.clone()),
            fanout: NotificationFanout::new(
                notifications,
                config.limits.notification_excerpt_length,
            ),
            translations,
            config,
            pool,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub async fn submit(
        &self,
        request: MessageRequest,
        auth: &AuthContext,
    ) -> Result<MessageResponse, PipelineError> {
        let inner = &self.inner;
        let now = Utc::now();

        inner.validator.validate(&request).into_result()?;
        let conversation_id = inner
            .validator
            .resolve_conversation_id(&request.conversation)
            .await?;
        let conversation = parley_db::conversations::load_conversation(&inner.pool, conversation_id)
            .await?
            .ok_or_else(|| PipelineError::ConversationNotFound(request.conversation.clone()))?;
        inner
            .validator
            .validate_for_conversation(&request, &conversation, now)
            .into_result()?;

        let sender = inner
            .validator
            .check_permissions(&request, auth, &conversation)
            .await?
            .into_sender()?;
        let language = inner
            .validator
            .resolve_language(&request, inner.config.fallback_language());

        let rewritten = inner
            .links
            .rewrite(&request.content, conversation.id, sender.user_id())
            .await;
        let encryption = inner
            .encryption
            .select_context(
                &conversation,
                &rewritten.content,
                request.kind,
                request.encrypted_payload.as_ref(),
                now,
            )
            .await?;

        let message = inner
            .persistor
            .save(&ProcessedMessage {
                request: &request,
                conversation_id: conversation.id,
                sender: &sender,
                content: &rewritten.content,
                language: &language,
                encryption: &encryption,
                created_at: now,
            })
            .await?;
        tracing::info!(
            message_id = message.id,
            conversation_id = conversation.id,
            links = rewritten.links.len(),
            encrypted = message.is_encrypted,
            "message accepted"
        );

        // The row is committed; run enrichment on its own task so a dropped
        // caller cannot cut it short.
        let committed = Committed {
            request,
            message: message.clone(),
            conversation,
            sender,
            content: rewritten.content,
            language,
            encryption,
        };
        let task_inner = Arc::clone(&self.inner);
        let enrichment =
            match tokio::spawn(async move { task_inner.enrich(committed).await }).await {
                Ok(enrichment) => enrichment,
                Err(e) => {
                    tracing::error!(message_id = message.id, error = %e, "post-write task failed");
                    Enrichment::default()
                }
            };

        let mut message = message;
        message.validated_mentions = enrichment.mentioned_usernames;
        Ok(MessageResponse {
            message,
            mentioned_user_ids: enrichment.mentioned_user_ids,
            tracking_links: rewritten.links,
            translation_queued: enrichment.translation_queued,
        })
    }
}

impl PipelineInner {
    async fn enrich(self: Arc<Self>, committed: Committed) -> Enrichment {
        let Committed {
            request,
            message,
            conversation,
            sender,
            content,
            language,
            encryption,
        } = committed;

        if let Err(e) = self
            .links
            .backfill(&content, conversation.id, message.id)
            .await
        {
            tracing::error!(message_id = message.id, error = %e, "tracking link backfill failed");
        }

        let outcome = self
            .mentions
            .resolve(&request, &message, &sender, &content)
            .await;

        if !outcome.created_user_ids.is_empty() {
            let this = Arc::clone(&self);
            let targets = outcome.created_user_ids.clone();
            let message = message.clone();
            let conversation = conversation.clone();
            tokio::spawn(async move {
                this.fanout.notify(&targets, &message, &conversation).await;
            });
        }

        let translation_queued = self
            .queue_translation(&message, &content, &language, &encryption)
            .await;

        Enrichment {
            mentioned_user_ids: outcome.created_user_ids,
            mentioned_usernames: outcome.usernames,
            translation_queued,
        }
    }

    async fn queue_translation(
        &self,
        message: &Message,
        content: &str,
        language: &str,
        encryption: &EncryptionContext,
    ) -> bool {
        if !encryption.server_readable() || content.trim().is_empty() {
            return false;
        }
        if content.chars().count() > self.config.limits.max_translation_length {
            tracing::debug!(message_id = message.id, "content too long to translate");
            return false;
        }

        let languages =
            match parley_db::conversations::participant_languages(&self.pool, message.conversation_id)
                .await
            {
                Ok(languages) => languages,
                Err(e) => {
                    tracing::error!(
                        message_id = message.id,
                        error = %e,
                        "could not load participant languages"
                    );
                    return false;
                }
            };
        let targets = translation_targets(&languages, language);
        if targets.is_empty() {
            return false;
        }

        let job = TranslationJob {
            job_id: Uuid::new_v4(),
            message_id: message.id,
            conversation_id: message.conversation_id,
            source_language: language.to_string(),
            target_languages: targets,
            text: content.to_string(),
            priority: TranslationPriority::for_text(content),
        };
        let job_id = job.job_id;
        match self.translations.enqueue(job).await {
            Ok(()) => {
                tracing::debug!(message_id = message.id, job_id = %job_id, "translation queued");
                true
            }
            Err(e) => {
                tracing::error!(message_id = message.id, error = %e, "translation enqueue failed");
                false
            }
        }
    }
}

/// Participant languages other than `source`, normalized and deduplicated.
pub fn translation_targets(languages: &[String], source: &str) -> Vec<String> {
    let source = normalize_language_code(source);
    let mut targets: Vec<String> = Vec::new();
    for language in languages {
        let code = normalize_language_code(language);
        if code.is_empty() || code == source || targets.contains(&code) {
            continue;
        }
        targets.push(code);
    }
    targets
}
