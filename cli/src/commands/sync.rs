//! `keysync sync-prefixes`, `keysync sync-directory` and `keysync set-keys`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use keysync_engine::{
    directory::{parse_mode, DEFAULT_MODE},
    DirectorySync, FilePermissions, Identity, KeyPrefixSet, PrefixSync, SyncReport, SyncSource,
};

use super::connect;

/// Arguments for `keysync sync-prefixes`.
#[derive(Args, Debug)]
pub struct SyncPrefixesArgs {
    /// Prefix holding the desired content.
    pub source_prefix: String,

    /// Prefix made into a copy of the source.
    pub destination_prefix: String,
}

impl SyncPrefixesArgs {
    pub fn run(self) -> Result<()> {
        let sync = PrefixSync::new(self.source_prefix, self.destination_prefix);
        let report = sync.run(&connect()?).with_context(|| {
            format!(
                "sync failed for '{}' -> '{}'",
                sync.source_prefix, sync.destination_prefix
            )
        })?;

        println!("{}", sync.identity().to_identity_string());
        print_report(&report);
        Ok(())
    }
}

/// Arguments for `keysync sync-directory`.
#[derive(Args, Debug)]
pub struct SyncDirectoryArgs {
    /// Key prefix mirrored with the directory.
    pub key_prefix: String,

    /// Directory mirrored with the key prefix.
    pub directory: PathBuf,

    /// Authoritative side: `directory` or `key-prefix`.
    #[arg(long)]
    pub source: SyncSource,

    /// Octal mode for files written to the directory.
    #[arg(long, default_value = "0700", value_parser = parse_permission)]
    pub files_permission: u32,

    /// Octal mode for directories created in the directory.
    #[arg(long, default_value = "0700", value_parser = parse_permission)]
    pub directory_permission: u32,
}

impl SyncDirectoryArgs {
    pub fn run(self) -> Result<()> {
        let sync = DirectorySync::new(self.key_prefix, self.directory, self.source)
            .with_permissions(FilePermissions {
                files: self.files_permission,
                directories: self.directory_permission,
            });

        let report = sync.run(&connect()?).with_context(|| {
            format!(
                "sync failed between '{}' and '{}'",
                sync.key_prefix,
                sync.directory.display()
            )
        })?;

        println!("{}", sync.identity()?.to_identity_string());
        print_report(&report);
        Ok(())
    }
}

/// Arguments for `keysync set-keys`.
#[derive(Args, Debug)]
pub struct SetKeysArgs {
    /// Prefix owned by the set. Keys under it that are not listed are deleted.
    pub prefix: String,

    /// `SUFFIX=VALUE` pairs, relative to the prefix.
    #[arg(value_parser = parse_assignment)]
    pub keys: Vec<(String, String)>,
}

impl SetKeysArgs {
    pub fn run(self) -> Result<()> {
        let set = self
            .keys
            .into_iter()
            .fold(KeyPrefixSet::new(self.prefix), |set, (suffix, value)| {
                set.with_key(suffix, value)
            });

        let report = set
            .run(&connect()?)
            .with_context(|| format!("setting keys failed for '{}'", set.prefix))?;

        println!("{}", set.identity());
        print_report(&report);
        Ok(())
    }
}

fn parse_assignment(value: &str) -> std::result::Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(suffix, value)| (suffix.to_string(), value.to_string()))
        .ok_or_else(|| format!("invalid key '{value}'; expected SUFFIX=VALUE"))
}

fn parse_permission(value: &str) -> std::result::Result<u32, String> {
    parse_mode(value).ok_or_else(|| {
        format!("invalid mode '{value}'; expected an octal mode such as {DEFAULT_MODE:04o}")
    })
}

fn print_report(report: &SyncReport) {
    if report.is_noop() {
        println!("Already in sync.");
    } else {
        println!(
            "Applied {} upsert(s) and {} deletion(s).",
            report.upserts, report.deletions
        );
    }
}
