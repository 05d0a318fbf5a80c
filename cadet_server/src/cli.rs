use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "cadet", version, about = "Long-poll sync broker for the cadet worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default if no subcommand given).
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "PORT", default_value = "8000")]
        port: u16,
        /// Bearer token the worker must present on `/worker/*`.
        #[arg(long, env = "CADET_WORKER_TOKEN", hide_env_values = true)]
        worker_token: Option<String>,
    },

    /// Print the effective broker configuration.
    Config,
}
