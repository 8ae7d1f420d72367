pub mod collaborators;
pub mod config;
pub mod encryption;
pub mod error;
pub mod links;
pub mod mentions;
pub mod notifications;
pub mod persist;
pub mod pipeline;
pub mod validator;

pub use collaborators::{
    ChannelNotificationSink, ChannelTranslationQueue, CollaboratorError, NotificationSink,
    TranslationQueue,
};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::MessagePipeline;
