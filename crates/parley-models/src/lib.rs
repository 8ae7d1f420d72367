pub mod attachment;
pub mod conversation;
pub mod encryption;
pub mod link;
pub mod mention;
pub mod message;
pub mod notification;
pub mod request;
pub mod user;
