use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Moderator,
    Admin,
    Bigboss,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
            Self::Bigboss => "bigboss",
        }
    }

    /// Unknown roles map to the least privileged one.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "moderator" => Self::Moderator,
            "admin" => Self::Admin,
            "bigboss" => Self::Bigboss,
            _ => Self::User,
        }
    }

    /// Moderator and above get the longer content limit.
    pub fn is_elevated(self) -> bool {
        !matches!(self, Self::User)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub system_language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymousParticipant {
    pub id: i64,
    pub conversation_id: i64,
    pub nickname: String,
    pub is_active: bool,
    pub can_send_messages: bool,
    pub language: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::UserRole;

    #[test]
    fn role_parsing_defaults_to_user() {
        assert_eq!(UserRole::parse("MODERATOR"), UserRole::Moderator);
        assert_eq!(UserRole::parse("superuser"), UserRole::User);
        assert!(UserRole::Admin.is_elevated());
        assert!(!UserRole::User.is_elevated());
    }
}
