//! # waypoint
//!
//! Command-line front end for the Waypoint sync engine.
//!
//! ## Commands
//!
//! - `init`: Create the config, cache and remote snapshot
//! - `status`: Show cache and remote status
//! - `sync` / `refresh`: Run a cache-first sync cycle for a collection
//! - `count` / `invalidate`: Inspect or wipe the cache of a collection
//! - `chat`: Open conversations, send and list messages, show the roster
//!
//! ## Example
//!
//! ```bash
//! waypoint init
//! waypoint sync cities
//! waypoint sync locations --owner alice --parent c1
//! waypoint chat open alice bob
//! waypoint chat send alice_bob alice "Dinner at 8?"
//! waypoint chat list bob
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use sync_client::Query;
use sync_types::EntityKind;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod session;

use commands::{cache, chat, init, status, sync};
use config::Config;
use session::Session;

/// Command-line front end for the Waypoint sync engine.
#[derive(Parser, Debug)]
#[command(name = "waypoint")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory holding the config, cache and remote snapshot
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: waypoint.toml in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Make every remote call fail as unavailable
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the data directory
    Init,

    /// Show cache and remote status
    Status,

    /// Run a cache-first sync cycle and print each state
    Sync(QueryArgs),

    /// Fetch and merge eagerly, printing the result
    Refresh(QueryArgs),

    /// Print the number of cached records of a collection
    Count {
        /// cities, locations or reviews
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,
    },

    /// Wipe the cache of a collection
    Invalidate {
        /// cities, locations or reviews
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,
    },

    /// Conversations
    Chat {
        #[command(subcommand)]
        command: ChatCommand,
    },
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// cities, locations or reviews
    #[arg(value_parser = parse_kind)]
    kind: EntityKind,

    /// Owner of the parent city
    #[arg(long, requires = "parent")]
    owner: Option<String>,

    /// Parent city id
    #[arg(long, requires = "owner")]
    parent: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ChatCommand {
    /// Print the conversation id of two users
    Id { a: String, b: String },

    /// Open a conversation, creating it on first contact
    Open { user: String, peer: String },

    /// Send a message
    Send {
        conversation: String,
        sender: String,
        text: String,
    },

    /// Print a conversation's messages
    Messages { conversation: String },

    /// Print a user's conversation roster
    List { user: String },
}

fn parse_kind(s: &str) -> Result<EntityKind, String> {
    s.parse().map_err(|e: sync_types::ModelError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    let command = match cli.command {
        Commands::Init => {
            init_tracing(&Config::default().logging.filter);
            return init::run(&data_dir, cli.config.as_deref()).await;
        }
        Commands::Status => Op::Status,
        Commands::Sync(args) => Op::Sync(sync::query(args.kind, args.owner, args.parent)?),
        Commands::Refresh(args) => Op::Refresh(sync::query(args.kind, args.owner, args.parent)?),
        Commands::Count { kind } => Op::Count(kind),
        Commands::Invalidate { kind } => Op::Invalidate(kind),
        Commands::Chat { command } => match command {
            ChatCommand::Id { a, b } => {
                chat::id(&a, &b);
                return Ok(());
            }
            ChatCommand::Open { user, peer } => Op::Open { user, peer },
            ChatCommand::Send {
                conversation,
                sender,
                text,
            } => Op::Send {
                conversation,
                sender,
                text,
            },
            ChatCommand::Messages { conversation } => Op::Messages { conversation },
            ChatCommand::List { user } => Op::List { user },
        },
    };

    let config = Config::resolve(cli.config.as_deref(), &data_dir)?;
    init_tracing(&config.logging.filter);

    let session = Session::open(&data_dir, config, cli.offline).await?;
    let result = dispatch(&session, &data_dir, cli.offline, command).await;
    session.close().await;
    result
}

/// A command that runs against an opened session.
enum Op {
    Status,
    Sync(Query),
    Refresh(Query),
    Count(EntityKind),
    Invalidate(EntityKind),
    Open {
        user: String,
        peer: String,
    },
    Send {
        conversation: String,
        sender: String,
        text: String,
    },
    Messages {
        conversation: String,
    },
    List {
        user: String,
    },
}

async fn dispatch(session: &Session, data_dir: &Path, offline: bool, op: Op) -> Result<()> {
    match op {
        Op::Status => status::run(session, data_dir, offline).await,
        Op::Sync(query) => sync::run(session, query).await,
        Op::Refresh(query) => sync::refresh(session, query).await,
        Op::Count(kind) => cache::count(session, kind).await,
        Op::Invalidate(kind) => cache::invalidate(session, kind).await,
        Op::Open { user, peer } => chat::open(session, &user, &peer).await,
        Op::Send {
            conversation,
            sender,
            text,
        } => chat::send(session, &conversation, &sender, &text).await,
        Op::Messages { conversation } => chat::messages(session, &conversation).await,
        Op::List { user } => chat::list(session, &user).await,
    }
}

/// Install the log subscriber. `RUST_LOG` overrides the configured filter.
fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Get the default data directory for waypoint.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("app", "waypoint", "waypoint")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
