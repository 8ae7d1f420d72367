use serde::{Deserialize, Serialize};

use crate::encryption::ClientEncryptedPayload;
use crate::link::IssuedLink;
use crate::message::{ForwardSource, Message, MessageKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousSession {
    #[serde(default)]
    pub session_token: String,
}

/// Inbound message submission as deserialized from the transport.
///
/// Sender fields are both optional on the wire; validation enforces that
/// exactly one identity is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    #[serde(default)]
    pub sender_id: Option<i64>,
    #[serde(default)]
    pub anonymous_session: Option<AnonymousSession>,
    /// Numeric conversation id or its human-readable identifier.
    pub conversation: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub reply_to_id: Option<i64>,
    #[serde(default)]
    pub forwarded_from: Option<ForwardSource>,
    #[serde(default)]
    pub mentioned_user_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub attachment_ids: Vec<i64>,
    #[serde(default)]
    pub encrypted_payload: Option<ClientEncryptedPayload>,
}

impl MessageRequest {
    /// The sender identity, if the request carries exactly one.
    pub fn sender(&self) -> Option<SenderIdentity> {
        match (self.sender_id, &self.anonymous_session) {
            (Some(user_id), None) => Some(SenderIdentity::Registered { user_id }),
            (None, Some(session)) if !session.session_token.trim().is_empty() => {
                Some(SenderIdentity::Anonymous {
                    session_token: session.session_token.trim().to_string(),
                })
            }
            _ => None,
        }
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachment_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SenderIdentity {
    Registered { user_id: i64 },
    Anonymous { session_token: String },
}

/// Principal authenticated by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthContext {
    User { user_id: i64 },
    Anonymous { session_token: String },
}

impl AuthContext {
    pub fn matches(&self, sender: &SenderIdentity) -> bool {
        match (self, sender) {
            (Self::User { user_id }, SenderIdentity::Registered { user_id: sender_id }) => {
                user_id == sender_id
            }
            (
                Self::Anonymous { session_token },
                SenderIdentity::Anonymous {
                    session_token: sender_token,
                },
            ) => session_token.trim() == sender_token.trim(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: Message,
    pub mentioned_user_ids: Vec<i64>,
    pub tracking_links: Vec<IssuedLink>,
    pub translation_queued: bool,
}
