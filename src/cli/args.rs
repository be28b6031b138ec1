//! CLI argument definitions
// (c) 2026 Dolt Authors

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "dolt",
    about = "Version-controlled database tooling",
    version,
    infer_subcommands = true
)]
pub(crate) struct CliArgs {
    /// Directory containing the repository to operate on
    #[arg(long, global = true, value_name = "DIR", default_value = ".")]
    pub(crate) data_dir: PathBuf,

    /// Enable detailed debug output (on stderr)
    #[arg(short, long, global = true)]
    pub(crate) debug: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Serve repository data over stdin/stdout for remote transfers.
    ///
    /// Spawned on the far side of an ssh connection by clients operating on
    /// `ssh://` remotes; not intended for direct use.
    #[command(hide = true)]
    Transfer,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::{CliArgs, Command};
    use clap::Parser as _;

    #[test]
    fn transfer_with_data_dir() {
        let args = CliArgs::parse_from(["dolt", "--data-dir", "/srv/repo", "transfer"]);
        assert_eq!(args.data_dir.to_str(), Some("/srv/repo"));
        assert!(matches!(args.command, Command::Transfer));
    }

    #[test]
    fn transfer_is_hidden_from_help() {
        use clap::CommandFactory as _;
        let mut help = Vec::new();
        CliArgs::command().write_help(&mut help).unwrap();
        let help = String::from_utf8(help).unwrap();
        assert!(!help.contains("transfer"), "{help}");
    }
}
