// ABOUTME: Command-line interface definitions using clap
// ABOUTME: Defines all subcommands and global flags

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "qbo-sync")]
#[command(about = "Sync QuickBooks Online accounts and items with local CSV files", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Company (realm) id to operate on
    #[arg(long, global = true)]
    pub realm: Option<String>,

    /// OAuth client id (overrides config/env)
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    /// OAuth client secret (overrides config/env)
    #[arg(long, global = true)]
    pub client_secret: Option<String>,

    /// Disable throttling (not recommended)
    #[arg(long, global = true)]
    pub no_throttle: bool,

    /// Throttle range in ms (min:max)
    #[arg(long, global = true, value_parser = parse_throttle_range)]
    pub throttle_ms: Option<(u64, u64)>,
}

fn parse_throttle_range(s: &str) -> Result<(u64, u64), String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 {
        return Err("Expected format: min:max".into());
    }

    let min = parts[0].parse().map_err(|_| "Invalid min value")?;
    let max = parts[1].parse().map_err(|_| "Invalid max value")?;

    if min > max {
        return Err("min must be <= max".into());
    }

    Ok((min, max))
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Authorize access to a company and store the credential
    Login {
        /// Print the authorization URL without opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Refresh the stored access token
    Refresh,

    /// Export all accounts to CSV
    Accounts {
        /// Output file (defaults to the exports dir)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Export all items to CSV and record their SyncTokens
    Items {
        /// Output file (defaults to the exports dir)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Push item edits from a CSV file
    Push {
        /// CSV file of item edits
        csv: PathBuf,

        /// Use stored SyncTokens without querying items first
        #[arg(long)]
        skip_pull: bool,
    },

    /// Show stored realms and tracked entity counts (default)
    Status,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Status)
    }
}
