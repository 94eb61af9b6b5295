// crates/ncp-server/src/main.rs
// NCP command-line entry point

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use ncp::config::{BaseDirs, McpDescriptor, ProfileStore, TransportKind, env::debug_enabled};

#[derive(Parser)]
#[command(
    name = "ncp",
    version,
    about = "N-to-1 orchestrator for the Model Context Protocol"
)]
struct Cli {
    /// Profile to serve
    #[arg(long, env = "NCP_PROFILE", default_value = "all")]
    profile: String,

    /// Base directory for profiles, cache and logs (default ~/.ncp)
    #[arg(long, env = "NCP_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// Run the MCP server on stdio (the default when no subcommand is given)
    #[arg(long)]
    server: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server on stdio
    Serve,
    /// Add a downstream MCP to the profile
    Add {
        name: String,
        command: String,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Remove a downstream MCP from the profile
    Remove { name: String },
    /// List the configured downstream MCPs
    List,
    /// Show global settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from the base dir only (never from CWD — a hostile repo
    // could override API keys).
    if let Some(home) = dirs::home_dir() {
        let _ = dotenvy::from_path(home.join(".ncp/.env"));
    }

    let cli = Cli::parse();
    let base = BaseDirs::resolve(cli.working_dir.clone());

    // stdout belongs to the protocol; logs go to stderr and logs/. Quiet by
    // default for MCP stdio, verbose under NCP_DEBUG, overridable via NCP_LOG.
    let default_level = if debug_enabled() { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("NCP_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _log_guard = match std::fs::create_dir_all(base.logs_dir()) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(base.logs_dir(), "ncp.log");
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
                .with(fmt::layer().with_writer(file_writer).with_ansi(false))
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
                .init();
            None
        }
    };

    if cli.server {
        ncp::server::serve(base, &cli.profile).await?;
        return Ok(());
    }

    match cli.command {
        None | Some(Commands::Serve) => {
            ncp::server::serve(base, &cli.profile).await?;
        }
        Some(Commands::Add { name, command, args }) => {
            let store = load_profile(&base, &cli.profile)?;
            let added = store.upsert(
                McpDescriptor {
                    name: name.clone(),
                    transport: TransportKind::Stdio,
                    command,
                    args,
                    env: Default::default(),
                    working_dir: None,
                    enabled: true,
                },
                false,
            )?;
            if added {
                println!("Added '{name}' to profile '{}'", cli.profile);
            } else {
                println!("'{name}' already exists in profile '{}'", cli.profile);
            }
        }
        Some(Commands::Remove { name }) => {
            let store = load_profile(&base, &cli.profile)?;
            if store.remove(&name)? {
                println!("Removed '{name}'");
            } else {
                println!("No MCP named '{name}' in profile '{}'", cli.profile);
            }
        }
        Some(Commands::List) => {
            let store = load_profile(&base, &cli.profile)?;
            let descriptors = store.descriptors();
            if descriptors.is_empty() {
                println!("Profile '{}' has no MCPs configured.", cli.profile);
            }
            for descriptor in descriptors {
                println!(
                    "{}\t{}\t{} {}",
                    descriptor.name,
                    if descriptor.enabled { "enabled" } else { "disabled" },
                    descriptor.command,
                    descriptor.args.join(" ")
                );
            }
        }
        Some(Commands::Config) => {
            let settings = ncp::config::SettingsStore::load(base.settings())?;
            println!("{}", serde_json::to_string_pretty(&settings.snapshot())?);
        }
    }

    Ok(())
}

fn load_profile(base: &BaseDirs, profile: &str) -> Result<ProfileStore> {
    base.ensure()?;
    Ok(ProfileStore::load(base.profile_file(profile), profile)?)
}
