//! `keysync auth status|enable|disable`.

use anyhow::Result;
use clap::{Args, ValueEnum};

use super::connect;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthAction {
    /// Print whether authentication is enabled.
    Status,
    /// Turn authentication on. Needs a `root` user holding the `root` role.
    Enable,
    /// Turn authentication off.
    Disable,
}

/// Arguments for `keysync auth`.
#[derive(Args, Debug)]
pub struct AuthArgs {
    #[arg(value_enum)]
    pub action: AuthAction,
}

impl AuthArgs {
    pub fn run(self) -> Result<()> {
        let conn = connect()?;
        match self.action {
            AuthAction::Status => {
                let enabled = conn.get_auth_status()?;
                println!("{}", if enabled { "enabled" } else { "disabled" });
            }
            AuthAction::Enable => {
                conn.set_auth_status(true)?;
                println!("Authentication enabled.");
            }
            AuthAction::Disable => {
                conn.set_auth_status(false)?;
                println!("Authentication disabled.");
            }
        }
        Ok(())
    }
}
