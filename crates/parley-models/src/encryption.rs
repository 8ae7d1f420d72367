use serde::{Deserialize, Serialize};

use crate::conversation::EncryptionMode;

/// Ciphertext produced by a client for end-to-end (or hybrid) conversations.
/// The server stores it as-is and never inspects `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEncryptedPayload {
    pub ciphertext: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Parameters needed to open a server-sealed layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CipherMetadata {
    pub mode: EncryptionMode,
    /// Which layer this record describes; the server only ever writes `server`.
    pub layer: String,
    pub algorithm: String,
    pub key_id: String,
    /// Base64 nonce.
    pub iv: String,
    /// Base64 GCM tag, detached from the ciphertext.
    pub auth_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_layer: Option<ClientEncryptedPayload>,
}

/// How a message body is stored.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EncryptionContext {
    #[default]
    Plaintext,
    /// Sealed by the server (mode A, or the server layer of mode C).
    ServerSealed {
        ciphertext: String,
        metadata: CipherMetadata,
    },
    /// Sealed by the client (mode B); passed through untouched.
    ClientSealed { payload: ClientEncryptedPayload },
}

impl EncryptionContext {
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Self::Plaintext)
    }

    pub fn mode(&self) -> Option<EncryptionMode> {
        match self {
            Self::Plaintext => None,
            Self::ServerSealed { metadata, .. } => Some(metadata.mode),
            Self::ClientSealed { .. } => Some(EncryptionMode::E2ee),
        }
    }

    pub fn ciphertext(&self) -> Option<&str> {
        match self {
            Self::Plaintext => None,
            Self::ServerSealed { ciphertext, .. } => Some(ciphertext),
            Self::ClientSealed { payload } => Some(&payload.ciphertext),
        }
    }

    pub fn metadata_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Plaintext => None,
            Self::ServerSealed { metadata, .. } => serde_json::to_value(metadata).ok(),
            Self::ClientSealed { payload } => Some(payload.metadata.clone()),
        }
    }

    /// The server can read the text whenever it is not client-sealed.
    pub fn server_readable(&self) -> bool {
        !matches!(self, Self::ClientSealed { .. })
    }
}
