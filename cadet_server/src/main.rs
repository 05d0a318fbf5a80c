use cadet_core::BrokerConfig;
use cadet_server::cli::{Cli, Commands};
use clap::Parser;
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // JSON logs on stdout; CADET_LOG_FORMAT=pretty for local runs.
    cadet_core::o11y::init_global_from_env()?;
    let cli = Cli::parse();
    let cfg = BrokerConfig::from_env()?;

    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let cmd = cli.command.unwrap_or(Commands::Serve {
        host: "0.0.0.0".to_string(),
        port,
        worker_token: std::env::var("CADET_WORKER_TOKEN").ok(),
    });

    match cmd {
        Commands::Serve {
            host,
            port,
            worker_token,
        } => {
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            cadet_server::server::serve(addr, cfg, worker_token).await?;
        }
        Commands::Config => {
            let out = serde_json::json!({
                "poll_interval_secs": cfg.poll_interval.as_secs(),
                "graph_interval_secs": cfg.graph_interval.as_secs(),
                "refresh_timeout_secs": cfg.refresh_timeout.as_secs(),
                "max_hook_bytes": cfg.max_hook_bytes,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}
