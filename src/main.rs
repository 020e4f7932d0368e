//! llmgw - multi-provider LLM gateway.
//!
//! A gateway that fronts several chat-completion providers behind one
//! OpenAI-compatible API, with per-tenant authentication, token rate
//! limiting and usage accounting.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llmgw::{proxy, Config};

#[derive(Parser)]
#[command(name = "llmgw")]
#[command(about = "Multi-provider LLM gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve,

    /// Validate the environment configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llmgw=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let config = Config::from_env()?;
            tracing::info!(port = config.port, "starting llm gateway");
            proxy::run_server(config).await
        }

        Commands::Check => {
            let config = Config::from_env()?;
            tracing::info!(
                port = config.port,
                default_rate_limit_tpm = config.default_rate_limit_tpm,
                run_seed = config.run_seed,
                "configuration ok"
            );
            Ok(())
        }
    }
}
