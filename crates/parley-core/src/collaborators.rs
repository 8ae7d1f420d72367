//! Seams to the services that consume pipeline output: push/e-mail delivery
//! and the translation worker.

use async_trait::async_trait;
use parley_models::notification::{NotificationBatchRequest, TranslationJob};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{0} queue is full")]
    Full(&'static str),
    #[error("{0} queue is closed")]
    Closed(&'static str),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one batch covering every target of a message.
    async fn send_batch(&self, batch: NotificationBatchRequest) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait TranslationQueue: Send + Sync {
    async fn enqueue(&self, job: TranslationJob) -> Result<(), CollaboratorError>;
}

/// Bounded in-process queue; never waits for the consumer.
#[derive(Clone)]
pub struct ChannelNotificationSink {
    sender: mpsc::Sender<NotificationBatchRequest>,
}

impl ChannelNotificationSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<NotificationBatchRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl NotificationSink for ChannelNotificationSink {
    async fn send_batch(&self, batch: NotificationBatchRequest) -> Result<(), CollaboratorError> {
        match self.sender.try_send(batch) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(batch)) => {
                tracing::warn!(
                    message_id = batch.message.id,
                    targets = batch.target_user_ids.len(),
                    "notification queue full, dropping batch"
                );
                Err(CollaboratorError::Full("notification"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CollaboratorError::Closed("notification")),
        }
    }
}

#[derive(Clone)]
pub struct ChannelTranslationQueue {
    sender: mpsc::Sender<TranslationJob>,
}

impl ChannelTranslationQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TranslationJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TranslationQueue for ChannelTranslationQueue {
    async fn enqueue(&self, job: TranslationJob) -> Result<(), CollaboratorError> {
        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(
                    message_id = job.message_id,
                    job_id = %job.job_id,
                    "translation queue full, dropping job"
                );
                Err(CollaboratorError::Full("translation"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CollaboratorError::Closed("translation")),
        }
    }
}
