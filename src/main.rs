use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use persona_chat::chat;
use persona_chat::config::{AppConfig, Secrets};
use persona_chat::embedding::HfEmbedder;
use persona_chat::index::build_index;
use persona_chat::llm_interaction::ChatModel;
use persona_chat::profile::Profile;
use persona_chat::web_server;

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    config: AppConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the chat web UI.
    Start {
        #[arg(long, default_value_t = 9900, help = "Port for the web server.")]
        port: u16,
        #[arg(long, default_value = "0.0.0.0", help = "Address to bind the web server to.")]
        host: IpAddr,
    },
    /// Chat with the assistant in the terminal.
    Chat {
        #[arg(long, value_enum, default_value_t = ChatModel::default(), help = "Hosted model to answer with.")]
        model: ChatModel,
    },
    /// Build the vector index from the profile.
    BuildIndex {
        #[arg(long, help = "Output directory (defaults to --index-dir).")]
        out: Option<PathBuf>,
    },
    /// List the selectable models.
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for GROQ_API_KEY / HF_TOKEN)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g., RUST_LOG=info,persona_chat=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    info!("persona-chat starting with command: {:?}", cli.command);

    match cli.command {
        Commands::Start { port, host } => {
            let addr = SocketAddr::new(host, port);
            let mut web_server_handle = tokio::spawn(async move {
                if let Err(e) = web_server::start_web_server(cli.config, addr).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, initiating shutdown...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                info!("Aborting web server task...");
                web_server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Chat { model } => {
            chat::run_terminal_chat(&cli.config, model)
                .await
                .context("Chat session failed")?;
        }
        Commands::BuildIndex { out } => {
            let out = out.unwrap_or_else(|| cli.config.index_dir.clone());
            let secrets = Secrets::load(&cli.config.secrets)?;
            let profile = Profile::load(&cli.config.profile)?;
            let embedder = HfEmbedder::new(secrets.hf_token);

            let index = build_index(&profile, &embedder)
                .await
                .context("Failed to build the vector index")?;
            let path = index.save(&out)?;
            println!("Indexed {} chunks of {}'s profile into {}", index.len(), profile.name, path.display());
        }
        Commands::Models => {
            for model in ChatModel::ALL {
                let marker = if model == ChatModel::default() { " (default)" } else { "" };
                println!("{}{}", model, marker);
            }
        }
    }

    Ok(())
}
