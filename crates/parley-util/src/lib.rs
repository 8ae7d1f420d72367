pub mod cipher;
pub mod language;
pub mod snowflake;
pub mod validation;
