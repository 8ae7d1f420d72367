use anyhow::{Context, Result};
use clap::Parser;
use parley_core::{ChannelNotificationSink, ChannelTranslationQueue, MessagePipeline};
use parley_models::request::{AuthContext, MessageRequest, SenderIdentity};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let fresh_config = !Path::new(&args.config).exists();
    let config = config::Config::load(&args.config)?;
    init_tracing(&config.logging);
    if fresh_config {
        tracing::info!("Generated default config at '{}'", args.config);
    }

    ensure_sqlite_dir(&config.database.url);
    let pool = parley_db::create_pool_with_engine(
        &config.database.url,
        config.database.max_connections,
        Some(config.database.engine.as_db_engine()),
    )
    .await
    .context("failed to open database")?;
    parley_db::run_migrations_for_engine(&pool, config.database.engine.as_db_engine()).await?;

    match args.command {
        cli::Command::Migrate => {
            tracing::info!("database is up to date");
            Ok(())
        }
        cli::Command::Ingest {
            request,
            as_user,
            as_session,
        } => {
            let raw = std::fs::read_to_string(&request)
                .with_context(|| format!("failed to read {}", request.display()))?;
            let request: MessageRequest =
                serde_json::from_str(&raw).context("request is not a valid message request")?;
            let auth = auth_context(&request, as_user, as_session)?;

            let (sink, notifications) =
                ChannelNotificationSink::channel(config.collaborators.notification_capacity);
            let (queue, translations) =
                ChannelTranslationQueue::channel(config.collaborators.translation_capacity);
            let drains = [
                drain("notification", notifications),
                drain("translation", translations),
            ];

            let keyring = config.keyring()?;
            if keyring.is_none() {
                tracing::warn!(
                    "no master key in ${}, server-side encryption unavailable",
                    config.encryption.master_key_env
                );
            }
            let pipeline = MessagePipeline::new(
                pool,
                config.pipeline_config(),
                keyring,
                Arc::new(sink),
                Arc::new(queue),
            );

            let outcome = pipeline.submit(request, &auth).await;
            // Closing the pipeline closes both channels once detached work ends.
            drop(pipeline);
            for handle in drains {
                let _ = handle.await;
            }

            let response = match outcome {
                Ok(response) => response,
                Err(e) if e.is_client_error() => {
                    tracing::warn!(error = %e, "message rejected");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::error!(error = %e, "message ingestion failed");
                    return Err(e.into());
                }
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Explicit flags win; otherwise the request's own identity is trusted.
fn auth_context(
    request: &MessageRequest,
    as_user: Option<i64>,
    as_session: Option<String>,
) -> Result<AuthContext> {
    if let Some(user_id) = as_user {
        return Ok(AuthContext::User { user_id });
    }
    if let Some(session_token) = as_session {
        return Ok(AuthContext::Anonymous { session_token });
    }
    match request.sender() {
        Some(SenderIdentity::Registered { user_id }) => Ok(AuthContext::User { user_id }),
        Some(SenderIdentity::Anonymous { session_token }) => {
            Ok(AuthContext::Anonymous { session_token })
        }
        None => anyhow::bail!("request has no sender; pass --as-user or --as-session"),
    }
}

fn drain<T>(kind: &'static str, mut receiver: mpsc::Receiver<T>) -> JoinHandle<()>
where
    T: serde::Serialize + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(item) = receiver.recv().await {
            match serde_json::to_string(&item) {
                Ok(payload) => tracing::info!(kind, payload = %payload, "collaborator item"),
                Err(e) => tracing::warn!(kind, error = %e, "collaborator item not serializable"),
            }
        }
    })
}

fn ensure_sqlite_dir(url: &str) {
    let Some(path) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
    else {
        return;
    };
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return;
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("Failed to create database directory {:?}: {}", parent, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::auth_context;
    use parley_models::request::{AnonymousSession, AuthContext, MessageRequest};

    #[test]
    fn flags_override_request_identity() {
        let request = MessageRequest {
            sender_id: Some(5),
            conversation: "general".into(),
            ..Default::default()
        };
        assert_eq!(
            auth_context(&request, None, None).unwrap(),
            AuthContext::User { user_id: 5 }
        );
        assert_eq!(
            auth_context(&request, Some(9), None).unwrap(),
            AuthContext::User { user_id: 9 }
        );

        let anonymous = MessageRequest {
            anonymous_session: Some(AnonymousSession {
                session_token: "tok".into(),
            }),
            conversation: "general".into(),
            ..Default::default()
        };
        assert_eq!(
            auth_context(&anonymous, None, None).unwrap(),
            AuthContext::Anonymous {
                session_token: "tok".into()
            }
        );
        assert!(auth_context(&MessageRequest::default(), None, None).is_err());
    }
}
