//! keysync - mirror key prefixes of an etcd-compatible store.
//!
//! # Usage
//!
//! ```text
//! keysync range-end <prefix>
//! keysync get-range <key> [range_end] [--prefix]
//! keysync diff <source_prefix> <destination_prefix>
//! keysync sync-prefixes <source_prefix> <destination_prefix>
//! keysync sync-directory <key_prefix> <directory> --source directory|key-prefix
//! keysync set-keys <prefix> [SUFFIX=VALUE]...
//! keysync clear-range <key> <range_end>
//! keysync auth status|enable|disable
//! ```
//!
//! Every command except `range-end` talks to the store through the gateway
//! endpoints listed in `KEYSYNC_ENDPOINTS`.

mod commands;
mod config;
mod gateway;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{
    auth::AuthArgs,
    diff::DiffArgs,
    range::{ClearRangeArgs, GetRangeArgs, RangeEndArgs},
    sync::{SetKeysArgs, SyncDirectoryArgs, SyncPrefixesArgs},
};

#[derive(Parser, Debug)]
#[command(
    name = "keysync",
    version,
    about = "Mirror key prefixes of an etcd-compatible store",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the range end covering every key under a prefix.
    RangeEnd(RangeEndArgs),

    /// Print the keys of a range as JSON.
    GetRange(GetRangeArgs),

    /// Print what a prefix synchronization would change.
    Diff(DiffArgs),

    /// Make one prefix a copy of another.
    SyncPrefixes(SyncPrefixesArgs),

    /// Synchronize a key prefix with a directory.
    SyncDirectory(SyncDirectoryArgs),

    /// Make a prefix hold exactly the given keys.
    SetKeys(SetKeysArgs),

    /// Delete every key in a range.
    ClearRange(ClearRangeArgs),

    /// Show or change whether the store enforces authentication.
    Auth(AuthArgs),
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keysync=info,keysync_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::RangeEnd(args) => args.run(),
        Commands::GetRange(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::SyncPrefixes(args) => args.run(),
        Commands::SyncDirectory(args) => args.run(),
        Commands::SetKeys(args) => args.run(),
        Commands::ClearRange(args) => args.run(),
        Commands::Auth(args) => args.run(),
    }
}
