use crate::config::EncryptionSettings;
use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use parley_models::conversation::{Conversation, EncryptionMode, EncryptionSetting};
use parley_models::encryption::{CipherMetadata, ClientEncryptedPayload, EncryptionContext};
use parley_models::message::MessageKind;
use parley_util::cipher::{Keyring, SealedText, ALGORITHM};
use std::sync::Arc;
use tokio::sync::Semaphore;

const SERVER_LAYER: &str = "server";

/// Decides how a message body is stored and seals it when the server holds
/// the key.
pub struct EncryptionSelector {
    keyring: Option<Arc<Keyring>>,
    settings: EncryptionSettings,
    permits: Arc<Semaphore>,
}

impl EncryptionSelector {
    pub fn new(keyring: Option<Keyring>, settings: EncryptionSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));
        Self {
            keyring: keyring.map(Arc::new),
            settings,
            permits,
        }
    }

    pub async fn select_context(
        &self,
        conversation: &Conversation,
        content: &str,
        kind: MessageKind,
        client_payload: Option<&ClientEncryptedPayload>,
        now: DateTime<Utc>,
    ) -> Result<EncryptionContext, PipelineError> {
        if kind.is_system() {
            return Ok(EncryptionContext::Plaintext);
        }

        match conversation.active_encryption(now) {
            EncryptionSetting::Disabled => Ok(EncryptionContext::Plaintext),
            EncryptionSetting::Unrecognized(value) => {
                tracing::warn!(
                    conversation_id = conversation.id,
                    mode = %value,
                    "unrecognized encryption mode, storing plaintext"
                );
                Ok(EncryptionContext::Plaintext)
            }
            EncryptionSetting::Mode(EncryptionMode::E2ee) => match client_payload {
                Some(payload) => Ok(EncryptionContext::ClientSealed {
                    payload: payload.clone(),
                }),
                None => {
                    tracing::warn!(
                        conversation_id = conversation.id,
                        "plaintext submitted to an end-to-end conversation"
                    );
                    Ok(EncryptionContext::Plaintext)
                }
            },
            EncryptionSetting::Mode(mode) => {
                let client_layer = match mode {
                    EncryptionMode::Hybrid => client_payload.cloned(),
                    _ => None,
                };
                if content.is_empty() && client_layer.is_none() {
                    return Ok(EncryptionContext::Plaintext);
                }
                match self
                    .seal_server_layer(conversation, content, *mode, client_layer)
                    .await
                {
                    Ok(ctx) => Ok(ctx),
                    Err(reason) if self.settings.fail_open => {
                        tracing::warn!(
                            conversation_id = conversation.id,
                            error = %reason,
                            "server-side encryption failed, storing plaintext"
                        );
                        Ok(EncryptionContext::Plaintext)
                    }
                    Err(reason) => {
                        tracing::error!(
                            conversation_id = conversation.id,
                            error = %reason,
                            "server-side encryption failed, rejecting message"
                        );
                        Err(PipelineError::Encryption(reason))
                    }
                }
            }
        }
    }

    async fn seal_server_layer(
        &self,
        conversation: &Conversation,
        content: &str,
        mode: EncryptionMode,
        client_layer: Option<ClientEncryptedPayload>,
    ) -> Result<EncryptionContext, String> {
        let key_id = conversation
            .server_key_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| "conversation has no active server key".to_string())?;
        let keyring = self
            .keyring
            .clone()
            .ok_or_else(|| "no master key configured".to_string())?;

        let sealed = self.seal(keyring, key_id.clone(), content.to_string()).await?;
        Ok(EncryptionContext::ServerSealed {
            ciphertext: sealed.ciphertext,
            metadata: CipherMetadata {
                mode,
                layer: SERVER_LAYER.to_string(),
                algorithm: ALGORITHM.to_string(),
                key_id,
                iv: sealed.iv,
                auth_tag: sealed.auth_tag,
                client_layer,
            },
        })
    }

    /// AES work runs on the blocking pool, bounded by the permit count.
    async fn seal(
        &self,
        keyring: Arc<Keyring>,
        key_id: String,
        plaintext: String,
    ) -> Result<SealedText, String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| format!("encryption pool closed: {e}"))?;
        tokio::task::spawn_blocking(move || keyring.seal(&key_id, &plaintext))
            .await
            .map_err(|e| format!("encryption task failed: {e}"))?
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parley_models::conversation::{ConversationKind, Membership};
    use parley_util::cipher::KEY_SIZE;

    fn conversation(setting: EncryptionSetting, key_id: Option<&str>) -> Conversation {
        Conversation {
            id: 1,
            identifier: "general".into(),
            kind: ConversationKind::Group,
            title: None,
            allow_anonymous: false,
            encryption: setting,
            encryption_enabled_at: Some(Utc::now() - Duration::hours(1)),
            server_key_id: key_id.map(str::to_string),
            members: vec![Membership {
                user_id: 1,
                can_send_messages: true,
            }],
            created_at: Utc::now(),
        }
    }

    fn selector(fail_open: bool) -> EncryptionSelector {
        EncryptionSelector::new(
            Some(Keyring::new([9u8; KEY_SIZE])),
            EncryptionSettings {
                fail_open,
                max_concurrent_jobs: 2,
            },
        )
    }

    fn client_payload() -> ClientEncryptedPayload {
        ClientEncryptedPayload {
            ciphertext: "Y2xpZW50".into(),
            metadata: serde_json::json!({"alg": "x25519"}),
        }
    }

    #[tokio::test]
    async fn server_mode_seals_with_conversation_key() {
        let conv = conversation(EncryptionSetting::Mode(EncryptionMode::Server), Some("K1"));
        let ctx = selector(true)
            .select_context(&conv, "secret plan", MessageKind::Text, None, Utc::now())
            .await
            .unwrap();
        let EncryptionContext::ServerSealed { ciphertext, metadata } = &ctx else {
            panic!("expected server-sealed context, got {ctx:?}");
        };
        assert_eq!(metadata.key_id, "K1");
        assert_eq!(metadata.algorithm, "aes-256-gcm");
        assert_eq!(metadata.mode, EncryptionMode::Server);

        let opened = Keyring::new([9u8; KEY_SIZE])
            .open(
                "K1",
                &SealedText {
                    ciphertext: ciphertext.clone(),
                    iv: metadata.iv.clone(),
                    auth_tag: metadata.auth_tag.clone(),
                },
            )
            .unwrap();
        assert_eq!(opened, "secret plan");
    }

    #[tokio::test]
    async fn system_messages_and_pending_modes_stay_plaintext() {
        let conv = conversation(EncryptionSetting::Mode(EncryptionMode::Server), Some("K1"));
        let sel = selector(true);
        let ctx = sel
            .select_context(&conv, "joined", MessageKind::System, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(ctx, EncryptionContext::Plaintext);

        let mut pending = conv.clone();
        pending.encryption_enabled_at = Some(Utc::now() + Duration::hours(1));
        let ctx = sel
            .select_context(&pending, "hi", MessageKind::Text, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(ctx, EncryptionContext::Plaintext);

        let unknown = conversation(EncryptionSetting::Unrecognized("rot13".into()), Some("K1"));
        let ctx = sel
            .select_context(&unknown, "hi", MessageKind::Text, None, Utc::now())
            .await
            .unwrap();
        assert!(!ctx.is_encrypted());
    }

    #[tokio::test]
    async fn e2ee_passes_client_payload_through() {
        let conv = conversation(EncryptionSetting::Mode(EncryptionMode::E2ee), None);
        let sel = selector(true);
        let payload = client_payload();
        let ctx = sel
            .select_context(&conv, "", MessageKind::Text, Some(&payload), Utc::now())
            .await
            .unwrap();
        assert_eq!(ctx, EncryptionContext::ClientSealed { payload });

        let ctx = sel
            .select_context(&conv, "oops plaintext", MessageKind::Text, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(ctx, EncryptionContext::Plaintext);
    }

    #[tokio::test]
    async fn hybrid_carries_client_layer_in_metadata() {
        let conv = conversation(EncryptionSetting::Mode(EncryptionMode::Hybrid), Some("K2"));
        let payload = client_payload();
        let ctx = selector(true)
            .select_context(&conv, "both layers", MessageKind::Text, Some(&payload), Utc::now())
            .await
            .unwrap();
        let json = ctx.metadata_json().unwrap();
        assert_eq!(json["mode"], "hybrid");
        assert_eq!(json["layer"], "server");
        assert_eq!(json["client_layer"]["ciphertext"], "Y2xpZW50");
    }

    #[tokio::test]
    async fn missing_key_follows_fail_open_setting() {
        let conv = conversation(EncryptionSetting::Mode(EncryptionMode::Server), None);
        let ctx = selector(true)
            .select_context(&conv, "hi", MessageKind::Text, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(ctx, EncryptionContext::Plaintext);

        let err = selector(false)
            .select_context(&conv, "hi", MessageKind::Text, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Encryption(_)));

        let keyless = EncryptionSelector::new(None, EncryptionSettings::default());
        let conv = conversation(EncryptionSetting::Mode(EncryptionMode::Server), Some("K1"));
        let ctx = keyless
            .select_context(&conv, "hi", MessageKind::Text, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(ctx, EncryptionContext::Plaintext);
    }
}
