//! CLI argument parsing for the roster-sync-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "roster-sync-worker", about = "Roster synchronization worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Run one upload file against the database and print the result as JSON
    Upload {
        /// CSV file to upload
        file: PathBuf,
        /// Roster id or external id used for rows without an email
        #[arg(long)]
        target: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["roster-sync-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["roster-sync-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_serve_command_parses() {
        let cli = Cli::parse_from(["roster-sync-worker", "serve"]);
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn test_cli_upload_with_target() {
        let cli = Cli::parse_from(["roster-sync-worker", "upload", "roster.csv", "--target", "GC-8001"]);
        match cli.command {
            Some(Command::Upload { file, target }) => {
                assert_eq!(file, PathBuf::from("roster.csv"));
                assert_eq!(target.as_deref(), Some("GC-8001"));
            }
            _ => panic!("expected upload command"),
        }
    }

    #[test]
    fn test_cli_upload_requires_file() {
        assert!(Cli::try_parse_from(["roster-sync-worker", "upload"]).is_err());
    }
}
