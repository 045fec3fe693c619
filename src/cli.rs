//! Command-line argument parsing (spec.md §6 "CLI").
//!
//! Two mutually exclusive modes: `--serve <group>` exposes a group as an MCP
//! server over stdio; `--admin` launches the admin surface. Validated in
//! `mode()` rather than via a `clap::ArgGroup` so the usage-error message is
//! exactly the one §6 describes, and so `main` can map it to exit code 2.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "mcp-proxy", version, about = "MCP proxy and aggregator")]
pub struct Cli {
    /// Expose `<GROUP>` as an MCP server over stdio.
    #[arg(short = 's', long = "serve", value_name = "GROUP")]
    pub serve: Option<String>,

    /// Launch the admin surface (non-interactive discovery/validation slice).
    #[arg(short = 'a', long = "admin")]
    pub admin: bool,

    /// Override the resolved user config directory (default: XDG config dir).
    #[arg(long, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

pub enum Mode {
    Serve(String),
    Admin,
}

impl Cli {
    pub fn mode(&self) -> Result<Mode, String> {
        match (&self.serve, self.admin) {
            (Some(group), false) => Ok(Mode::Serve(group.clone())),
            (None, true) => Ok(Mode::Admin),
            (None, false) => Err("one of --serve <GROUP> or --admin is required".to_string()),
            (Some(_), true) => Err("--serve and --admin are mutually exclusive".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(serve: Option<&str>, admin: bool) -> Cli {
        Cli {
            serve: serve.map(str::to_string),
            admin,
            config_dir: None,
        }
    }

    #[test]
    fn serve_mode_requires_only_the_group_flag() {
        match cli(Some("dev"), false).mode() {
            Ok(Mode::Serve(name)) => assert_eq!(name, "dev"),
            _ => panic!("expected Serve mode"),
        }
    }

    #[test]
    fn admin_mode_requires_only_the_admin_flag() {
        assert!(matches!(cli(None, true).mode(), Ok(Mode::Admin)));
    }

    #[test]
    fn neither_flag_is_a_usage_error() {
        assert!(cli(None, false).mode().is_err());
    }

    #[test]
    fn both_flags_is_a_usage_error() {
        assert!(cli(Some("dev"), true).mode().is_err());
    }
}
