use anyhow::Result;
use parley_core::config::{
    EncryptionSettings, LimitsConfig, LinkSettings, PipelineConfig, PostingPolicy,
};
use parley_util::cipher::Keyring;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub policy: PostingPolicy,
    #[serde(default)]
    pub links: LinkSettings,
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_engine")]
    pub engine: DatabaseEngine,
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    #[default]
    Sqlite,
    Postgres,
}

impl DatabaseEngine {
    pub fn as_db_engine(self) -> parley_db::DatabaseEngine {
        match self {
            Self::Sqlite => parley_db::DatabaseEngine::Sqlite,
            Self::Postgres => parley_db::DatabaseEngine::Postgres,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: default_database_engine(),
            url: "sqlite://./data/parley.db?mode=rwc".into(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EncryptionConfig {
    /// Environment variable holding the base64 master key.
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,
    /// Refuse to start without a master key.
    #[serde(default)]
    pub require_master_key: bool,
    #[serde(default = "default_true")]
    pub fail_open: bool,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            master_key_env: default_master_key_env(),
            require_master_key: false,
            fail_open: true,
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CollaboratorsConfig {
    #[serde(default = "default_channel_capacity")]
    pub notification_capacity: usize,
    #[serde(default = "default_channel_capacity")]
    pub translation_capacity: usize,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            notification_capacity: default_channel_capacity(),
            translation_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PipelineSection {
    #[serde(default = "default_worker_id")]
    pub worker_id: u16,
    #[serde(default = "default_language")]
    pub default_language: String,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            default_language: default_language(),
        }
    }
}

fn default_database_engine() -> DatabaseEngine {
    DatabaseEngine::Sqlite
}
fn default_max_connections() -> u32 {
    10
}
fn default_master_key_env() -> String {
    "PARLEY_MASTER_KEY".into()
}
fn default_true() -> bool {
    true
}
fn default_max_concurrent_jobs() -> usize {
    4
}
fn default_channel_capacity() -> usize {
    1024
}
fn default_log_filter() -> String {
    "parley=info,sqlx=warn".into()
}
fn default_worker_id() -> u16 {
    1
}
fn default_language() -> String {
    "en".into()
}

fn validate_configuration(config: &Config) -> Result<()> {
    if config.database.url.trim().is_empty() {
        anyhow::bail!("Invalid database.url: must not be empty");
    }
    let detected = parley_db::detect_database_engine(&config.database.url)?;
    if detected != config.database.engine.as_db_engine() {
        anyhow::bail!(
            "database.engine is '{}' but database.url points elsewhere",
            config.database.engine.as_str()
        );
    }
    if config.pipeline.worker_id > 1023 {
        anyhow::bail!("Invalid pipeline.worker_id: must be between 0 and 1023");
    }
    if config.links.token_length < 4 || config.links.token_length > 32 {
        anyhow::bail!("Invalid links.token_length: must be between 4 and 32");
    }

    match std::env::var(&config.encryption.master_key_env) {
        Ok(raw) if !raw.trim().is_empty() => {
            Keyring::from_base64(raw.trim()).map_err(|e| {
                anyhow::anyhow!(
                    "Invalid master key in ${}: {e}",
                    config.encryption.master_key_env
                )
            })?;
        }
        _ if config.encryption.require_master_key => {
            anyhow::bail!(
                "encryption.require_master_key is set but ${} is empty",
                config.encryption.master_key_env
            );
        }
        _ => {}
    }
    Ok(())
}

/// Generate a commented config file template with the given values filled in.
fn generate_config_template(config: &Config) -> String {
    let global_kinds = config
        .policy
        .global_kinds
        .iter()
        .map(|kind| format!("\"{}\"", kind.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"# Parley Configuration
# Generated automatically on first run. Edit as needed.

[database]
engine = "{db_engine}"
url = "{db_url}"
max_connections = {max_connections}

[limits]
max_content_length = {max_content_length}
# Moderators and admins
elevated_max_content_length = {elevated_max_content_length}
max_attachments = {max_attachments}
max_mentions = {max_mentions}
max_translation_length = {max_translation_length}
notification_excerpt_length = {notification_excerpt_length}

[encryption]
# Name of the environment variable holding the base64-encoded 32-byte master key.
master_key_env = "{master_key_env}"
require_master_key = {require_master_key}
# Store plaintext (true) or reject the message (false) when server-side encryption fails.
fail_open = {fail_open}
max_concurrent_jobs = {max_concurrent_jobs}

[policy]
global_kinds = [{global_kinds}]
global_allows_anonymous = {global_allows_anonymous}
global_allows_non_members = {global_allows_non_members}
anonymous_can_mention = {anonymous_can_mention}

[links]
token_length = {token_length}
max_token_attempts = {max_token_attempts}

[collaborators]
notification_capacity = {notification_capacity}
translation_capacity = {translation_capacity}

[logging]
filter = "{log_filter}"
json = {log_json}

[pipeline]
worker_id = {worker_id}
default_language = "{default_language}"
"#,
        db_engine = config.database.engine.as_str(),
        db_url = config.database.url,
        max_connections = config.database.max_connections,
        max_content_length = config.limits.max_content_length,
        elevated_max_content_length = config.limits.elevated_max_content_length,
        max_attachments = config.limits.max_attachments,
        max_mentions = config.limits.max_mentions,
        max_translation_length = config.limits.max_translation_length,
        notification_excerpt_length = config.limits.notification_excerpt_length,
        master_key_env = config.encryption.master_key_env,
        require_master_key = config.encryption.require_master_key,
        fail_open = config.encryption.fail_open,
        max_concurrent_jobs = config.encryption.max_concurrent_jobs,
        global_kinds = global_kinds,
        global_allows_anonymous = config.policy.global_allows_anonymous,
        global_allows_non_members = config.policy.global_allows_non_members,
        anonymous_can_mention = config.policy.anonymous_can_mention,
        token_length = config.links.token_length,
        max_token_attempts = config.links.max_token_attempts,
        notification_capacity = config.collaborators.notification_capacity,
        translation_capacity = config.collaborators.translation_capacity,
        log_filter = config.logging.filter,
        log_json = config.logging.json,
        worker_id = config.pipeline.worker_id,
        default_language = config.pipeline.default_language,
    )
}

// ── Config Loading ───────────────────────────────────────────────────────────

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();
            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, generate_config_template(&config))?;
            config
        };

        // Environment variable overrides
        if let Ok(value) = std::env::var("PARLEY_DATABASE_URL") {
            config.database.url = value;
        }
        if let Ok(value) = std::env::var("PARLEY_DATABASE_ENGINE") {
            match value.trim().to_ascii_lowercase().as_str() {
                "sqlite" => config.database.engine = DatabaseEngine::Sqlite,
                "postgres" | "postgresql" => config.database.engine = DatabaseEngine::Postgres,
                _ => {
                    tracing::warn!(
                        "Ignoring invalid PARLEY_DATABASE_ENGINE value '{}'; expected sqlite or postgres",
                        value
                    );
                }
            }
        }
        if let Ok(value) = std::env::var("PARLEY_DATABASE_MAX_CONNECTIONS") {
            if let Ok(parsed) = value.parse::<u32>() {
                config.database.max_connections = parsed.max(1);
            }
        }
        if let Ok(value) = std::env::var("PARLEY_MASTER_KEY_ENV") {
            if !value.trim().is_empty() {
                config.encryption.master_key_env = value;
            }
        }
        if let Ok(value) = std::env::var("PARLEY_ENCRYPTION_FAIL_OPEN") {
            if let Ok(parsed) = value.parse::<bool>() {
                config.encryption.fail_open = parsed;
            }
        }
        if let Ok(value) = std::env::var("PARLEY_ENCRYPTION_MAX_CONCURRENT_JOBS") {
            if let Ok(parsed) = value.parse::<usize>() {
                config.encryption.max_concurrent_jobs = parsed.clamp(1, 256);
            }
        }
        if let Ok(value) = std::env::var("PARLEY_MAX_CONTENT_LENGTH") {
            if let Ok(parsed) = value.parse::<usize>() {
                config.limits.max_content_length = parsed;
            }
        }
        if let Ok(value) = std::env::var("PARLEY_POLICY_GLOBAL_ALLOWS_ANONYMOUS") {
            if let Ok(parsed) = value.parse::<bool>() {
                config.policy.global_allows_anonymous = parsed;
            }
        }
        if let Ok(value) = std::env::var("PARLEY_POLICY_ANONYMOUS_CAN_MENTION") {
            if let Ok(parsed) = value.parse::<bool>() {
                config.policy.anonymous_can_mention = parsed;
            }
        }
        if let Ok(value) = std::env::var("PARLEY_LOG_FILTER") {
            config.logging.filter = value;
        }
        if let Ok(value) = std::env::var("PARLEY_LOG_JSON") {
            if let Ok(parsed) = value.parse::<bool>() {
                config.logging.json = parsed;
            }
        }
        if let Ok(value) = std::env::var("PARLEY_WORKER_ID") {
            if let Ok(parsed) = value.parse::<u16>() {
                config.pipeline.worker_id = parsed;
            }
        }
        if let Ok(value) = std::env::var("PARLEY_DEFAULT_LANGUAGE") {
            if !value.trim().is_empty() {
                config.pipeline.default_language = value;
            }
        }

        validate_configuration(&config)?;
        Ok(config)
    }

    /// The server-side keyring, when a master key is configured.
    pub fn keyring(&self) -> Result<Option<Keyring>> {
        match std::env::var(&self.encryption.master_key_env) {
            Ok(raw) if !raw.trim().is_empty() => Ok(Some(Keyring::from_base64(raw.trim())?)),
            _ => Ok(None),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            worker_id: self.pipeline.worker_id,
            default_language: self.pipeline.default_language.clone(),
            limits: self.limits.clone(),
            policy: self.policy.clone(),
            encryption: EncryptionSettings {
                fail_open: self.encryption.fail_open,
                max_concurrent_jobs: self.encryption.max_concurrent_jobs,
            },
            links: self.links.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, DatabaseConfig, DatabaseEngine};

    #[test]
    fn database_defaults_to_sqlite_engine() {
        let db = DatabaseConfig::default();
        assert_eq!(db.engine, DatabaseEngine::Sqlite);
    }

    #[test]
    fn missing_file_generates_loadable_template() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("nested").join("parley.toml");
        let path = config_path.to_str().expect("config path utf8");

        let generated = Config::load(path).expect("generate config");
        assert!(config_path.exists());
        let reloaded = Config::load(path).expect("reload config");

        assert_eq!(reloaded.limits.max_content_length, 2000);
        assert_eq!(reloaded.limits.elevated_max_content_length, 4000);
        assert!(reloaded.encryption.fail_open);
        assert_eq!(reloaded.pipeline.default_language, "en");
        assert_eq!(
            reloaded.policy.global_kinds,
            generated.policy.global_kinds
        );
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("parley.toml");
        std::fs::write(
            &config_path,
            "[limits]\nmax_content_length = 500\n\n[encryption]\nfail_open = false\n",
        )
        .expect("write config");

        let config = Config::load(config_path.to_str().expect("utf8")).expect("load config");
        assert_eq!(config.limits.max_content_length, 500);
        assert_eq!(config.limits.max_translation_length, 10_000);
        assert!(!config.encryption.fail_open);

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.limits.max_content_length, 500);
        assert!(!pipeline.encryption.fail_open);
    }

    #[test]
    fn malformed_master_key_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("parley.toml");
        std::fs::write(
            &config_path,
            "[encryption]\nmaster_key_env = \"PARLEY_TEST_SHORT_MASTER_KEY\"\n",
        )
        .expect("write config");

        std::env::set_var("PARLEY_TEST_SHORT_MASTER_KEY", "c2hvcnQ=");
        let result = Config::load(config_path.to_str().expect("utf8"));
        std::env::remove_var("PARLEY_TEST_SHORT_MASTER_KEY");
        assert!(result.is_err());
    }

    #[test]
    fn required_master_key_must_be_present() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("parley.toml");
        std::fs::write(
            &config_path,
            "[encryption]\nmaster_key_env = \"PARLEY_TEST_ABSENT_MASTER_KEY\"\nrequire_master_key = true\n",
        )
        .expect("write config");

        assert!(Config::load(config_path.to_str().expect("utf8")).is_err());
    }
}
