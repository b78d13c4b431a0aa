use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use sgroups::{Config, LoggedUser, Mright};
use std::path::{Path, PathBuf};

mod commands;
mod logging;

use commands::{config, cron, sgroup};

/// Administration of sgroups: stems, groups, and their synchronization
#[derive(Parser)]
#[command(name = "sgroupsctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = sgroups::config::CONFIG_PATH_ENV, default_value = "config/sgroups.yaml")]
    config: PathBuf,

    /// Run as this user instead of a trusted administrator
    #[arg(short = 'u', long, global = true)]
    as_user: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write daily rotated log files in this directory
    #[arg(long, global = true, env = "SGROUPS_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Create the root stem if missing
    Init,

    /// Show a stem or a group
    Show {
        id: String,

        /// Output format (json, yaml, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Recompute the flattened subjects of a group
    Sync {
        id: String,

        /// Mrights to recompute (member, reader, updater, admin), all of them by default
        mrights: Vec<Mright>,
    },

    /// Run a remote query without storing it
    TestRemote {
        /// Group the query is meant for
        id: String,
        query: String,
    },

    /// Show the audit logs of an sgroup
    Logs {
        id: String,

        /// Only the end of the log file
        #[arg(short, long, default_value_t = 10_000)]
        bytes: u64,

        /// Flattened subjects changes instead of user actions
        #[arg(long)]
        sync: bool,
    },

    /// Search people and groups in the subject sources
    Search {
        term: String,

        /// Only this subject source
        #[arg(long)]
        source: Option<String>,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Synchronize the groups having a remote query, forever
    Cron,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration, with defaults filled in
    Show {
        /// Output format (json, yaml)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Check the configuration can be loaded
    Check,
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load configuration {:?}", path))
}

async fn run(cli: Cli) -> Result<()> {
    let user = match cli.as_user {
        Some(uid) => LoggedUser::User(uid),
        None => LoggedUser::TrustedAdmin,
    };

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show { format } => config::show(&load_config(&cli.config)?, &format)?,
            ConfigAction::Check => config::check(&load_config(&cli.config)?),
        },
        Commands::Init => sgroup::init(load_config(&cli.config)?).await?,
        Commands::Show { id, format } => {
            sgroup::show(load_config(&cli.config)?, &user, id, &format).await?
        }
        Commands::Sync { id, mrights } => {
            sgroup::sync(load_config(&cli.config)?, &user, id, mrights).await?
        }
        Commands::TestRemote { id, query } => {
            sgroup::test_remote(load_config(&cli.config)?, &user, id, &query).await?
        }
        Commands::Logs { id, bytes, sync } => {
            sgroup::logs(load_config(&cli.config)?, &user, id, bytes, sync).await?
        }
        Commands::Search { term, source, limit } => {
            sgroup::search(load_config(&cli.config)?, &term, source.as_deref(), limit).await?
        }
        Commands::Cron => cron::execute(load_config(&cli.config)?).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let _guard = match logging::init_logging(cli.verbose, cli.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{} failed to initialize logging: {:#}", "Error:".red().bold(), e);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
