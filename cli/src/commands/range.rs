//! `keysync range-end`, `keysync get-range` and `keysync clear-range`.

use anyhow::{Context, Result};
use clap::Args;
use keysync_engine::{prefix_range_end, KeyRange, RangeKey};

use super::{connect, render};

/// Arguments for `keysync range-end`.
#[derive(Args, Debug)]
pub struct RangeEndArgs {
    /// Key prefix.
    pub prefix: String,
}

impl RangeEndArgs {
    pub fn run(self) -> Result<()> {
        let end = prefix_range_end(self.prefix.as_bytes())?;
        println!("{}", String::from_utf8_lossy(&end));
        Ok(())
    }
}

/// Arguments for `keysync get-range`.
#[derive(Args, Debug)]
pub struct GetRangeArgs {
    /// First key of the range.
    pub key: String,

    /// Exclusive end of the range. Without it only `key` is read.
    #[arg(conflicts_with = "prefix")]
    pub range_end: Option<String>,

    /// Read every key starting with `key`.
    #[arg(long)]
    pub prefix: bool,
}

impl GetRangeArgs {
    pub fn run(self) -> Result<()> {
        let conn = connect()?;

        let mut keys: Vec<RangeKey> = match (self.prefix, self.range_end) {
            (true, _) => conn.get_prefix(&self.key)?.into_values().collect(),
            (false, Some(range_end)) => conn
                .get_key_range(&KeyRange::new(self.key.as_str(), range_end))?
                .into_values()
                .collect(),
            (false, None) => conn.get_key(&self.key)?.into_iter().collect(),
        };
        keys.sort_by(|a, b| a.key.cmp(&b.key));

        let keys: Vec<_> = keys.iter().map(render::range_key).collect();
        let json = serde_json::to_string_pretty(&keys).context("failed to render keys")?;
        println!("{json}");
        Ok(())
    }
}

/// Arguments for `keysync clear-range`.
#[derive(Args, Debug)]
pub struct ClearRangeArgs {
    /// First key of the range.
    pub key: String,

    /// Exclusive end of the range.
    pub range_end: String,
}

impl ClearRangeArgs {
    pub fn run(self) -> Result<()> {
        let range = KeyRange::new(self.key, self.range_end);
        connect()?.delete_key_range(&range)?;
        println!("Cleared {range}.");
        Ok(())
    }
}
