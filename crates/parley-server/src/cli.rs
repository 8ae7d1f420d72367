use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "parley", about = "Parley message ingestion pipeline")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/parley.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply pending database migrations and exit.
    Migrate,
    /// Run one message request through the pipeline and print the response.
    Ingest {
        /// JSON-encoded message request
        #[arg(long)]
        request: PathBuf,

        /// Authenticate as this registered user
        #[arg(long, conflicts_with = "as_session")]
        as_user: Option<i64>,

        /// Authenticate with this anonymous session token
        #[arg(long)]
        as_session: Option<String>,
    },
}
