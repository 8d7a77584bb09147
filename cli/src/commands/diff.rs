//! `keysync diff <source_prefix> <destination_prefix>`.

use anyhow::{Context, Result};
use clap::Args;

use super::{connect, render};

/// Arguments for `keysync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Prefix holding the desired content.
    pub source_prefix: String,

    /// Prefix that would be changed.
    pub destination_prefix: String,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let diff = connect()?
            .diff_prefixes(&self.source_prefix, &self.destination_prefix)
            .with_context(|| {
                format!(
                    "diff failed for '{}' -> '{}'",
                    self.source_prefix, self.destination_prefix
                )
            })?;

        let json =
            serde_json::to_string_pretty(&render::diff(&diff)).context("failed to render diff")?;
        println!("{json}");
        Ok(())
    }
}
