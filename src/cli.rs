use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::BmoConfig;
use crate::memories::{MemoriesClient, PinGate, format_memories};
use crate::server::{ServerConfig, run_server};
use crate::token::{CLI_IDENTITY, CLI_NAME, CLI_ROOM, CLI_TTL, cli_token};

#[derive(Parser)]
#[command(name = "bmo")]
#[command(about = "BMO voice companion: terminal face, token server and memories")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the token endpoint, the web frontend and the /api proxy
    Serve {
        /// Port to listen on (default 3001 or $PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Directory holding the built frontend
        #[arg(long)]
        dist: Option<PathBuf>,
    },
    Token {
        #[command(subcommand)]
        token_command: TokenCommands,
    },
    /// Browse and edit what BMO remembers
    Memories {
        /// PIN for the memories API; remembered once accepted
        #[arg(long, global = true)]
        pin: Option<String>,
        #[command(subcommand)]
        memories_command: MemoriesCommands,
    },
    /// Show resolved configuration
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Mint a long-lived room token
    Create {
        #[arg(long, default_value = CLI_ROOM)]
        room: String,
        #[arg(long, default_value = CLI_IDENTITY)]
        identity: String,
        #[arg(long, default_value = CLI_NAME)]
        name: String,
        /// Lifetime in seconds (default 30 days)
        #[arg(long)]
        ttl: Option<u64>,
        /// Print as VITE_LIVEKIT_TOKEN / VITE_LIVEKIT_URL lines
        #[arg(long)]
        env: bool,
    },
}

#[derive(Subcommand)]
pub enum MemoriesCommands {
    /// List memories grouped by category
    List {
        /// Oldest first
        #[arg(long)]
        asc: bool,
    },
    /// Add a memory
    Add {
        text: String,
        #[arg(long, default_value = "uncategorized")]
        category: String,
    },
    /// Change a memory's text (and optionally its category)
    Edit {
        id: String,
        text: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Delete a memory
    Delete { id: String },
    /// Forget the stored PIN
    Lock,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show resolved configuration with secrets masked
    Show,
}

pub async fn handle_cli_command(command: Commands) -> Result<()> {
    let config = BmoConfig::load()?;
    match command {
        Commands::Serve { port, dist } => {
            let credentials = config
                .credentials()
                .context("Set them in the config file or the environment")?;
            run_server(ServerConfig {
                port: port.unwrap_or_else(|| config.port()),
                dist_dir: dist.unwrap_or_else(|| config.dist_dir()),
                memory_api_url: Some(config.memory_api_url().to_string()),
                credentials,
            })
            .await
        }
        Commands::Token { token_command } => match token_command {
            TokenCommands::Create {
                room,
                identity,
                name,
                ttl,
                env,
            } => {
                let credentials = config.credentials()?;
                let ttl = ttl.map(Duration::from_secs).unwrap_or(CLI_TTL);
                let token = cli_token(&credentials, &room, &identity, &name, ttl)?;
                if env {
                    println!("VITE_LIVEKIT_TOKEN={}", token);
                    println!("VITE_LIVEKIT_URL={}", credentials.url);
                } else {
                    println!("{}", token);
                }
                Ok(())
            }
        },
        Commands::Memories {
            pin,
            memories_command,
        } => handle_memories(&config, pin, memories_command).await,
        Commands::Config { config_command } => match config_command {
            ConfigCommands::Show => {
                println!("{}", config.display_masked());
                Ok(())
            }
        },
    }
}

async fn handle_memories(
    config: &BmoConfig,
    pin: Option<String>,
    command: MemoriesCommands,
) -> Result<()> {
    let mut gate = PinGate::load(&PinGate::default_path());
    if let MemoriesCommands::Lock = command {
        gate.lock();
        println!("Memories locked.");
        return Ok(());
    }

    let client = MemoriesClient::new(config.memory_api_url());
    if let Some(pin) = pin {
        gate.unlock(&client, &pin).await?;
    }
    if !gate.is_unlocked() {
        bail!("Memories are locked. Pass --pin to unlock them.");
    }
    let pin = gate.pin()?.to_string();

    match command {
        MemoriesCommands::List { asc } => {
            let memories = gate.guard(client.list(&pin).await)?;
            print!("{}", format_memories(&memories, asc));
        }
        MemoriesCommands::Add { text, category } => {
            gate.guard(client.add(&pin, &text, &category).await)?;
            println!("Memory added.");
        }
        MemoriesCommands::Edit { id, text, category } => {
            let category = match category {
                Some(c) => c,
                None => {
                    let memories = gate.guard(client.list(&pin).await)?;
                    memories
                        .iter()
                        .find(|m| m.id == id)
                        .map(|m| m.category().to_string())
                        .with_context(|| format!("No memory with id {}", id))?
                }
            };
            gate.guard(client.update(&pin, &id, &text, &category).await)?;
            println!("Memory {} updated.", id);
        }
        MemoriesCommands::Delete { id } => {
            gate.guard(client.delete(&pin, &id).await)?;
            println!("Memory {} deleted.", id);
        }
        MemoriesCommands::Lock => {}
    }
    Ok(())
}
