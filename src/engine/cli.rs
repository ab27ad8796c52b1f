//! AirQuery CLI Module
//! Command-line interface for the content provider and ad-hoc queries

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "airquery")]
#[command(author = "AirDB Team")]
#[command(version)]
#[command(about = "Typed query engine over SQLite and content providers", long_about = None)]
pub struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write an airquery.config.json for a local database
    Init {
        /// Database path, relative to the project directory
        #[arg(long, default_value = "data/airquery.db")]
        db: PathBuf,

        /// Remote content provider base URL
        #[arg(long)]
        remote: Option<String>,
    },

    /// Serve the project database as a content provider
    Serve {
        /// Authority clients address, as in content://<authority>/<table>
        #[arg(short, long)]
        authority: String,

        /// Port to listen on
        #[arg(long, default_value = "54330")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Select rows from a table or content:// endpoint
    Query {
        /// Table name or content:// identifier
        target: String,

        /// Where clause with '?' placeholders
        #[arg(short = 'w', long = "where")]
        selection: Option<String>,

        /// Placeholder arguments, in order
        #[arg(short = 'a', long = "arg", requires = "selection")]
        args: Vec<String>,

        /// ORDER BY expression
        #[arg(short, long)]
        sort: Option<String>,

        /// Maximum rows returned
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// Show project configuration
    Status,
}

impl Cli {
    pub fn get_project_dir(&self) -> PathBuf {
        self.project
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn header(title: &str) {
    println!("\n{}", title.bright_cyan().bold());
    println!("{}", "─".repeat(title.chars().count()).bright_black());
}

pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.bright_white().bold(), value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::try_parse_from([
            "airquery", "query", "people", "--where", "age > ?", "--arg", "30", "--limit", "2",
        ])
        .unwrap();

        match cli.command {
            Commands::Query { target, selection, args, limit, .. } => {
                assert_eq!(target, "people");
                assert_eq!(selection.as_deref(), Some("age > ?"));
                assert_eq!(args, vec!["30"]);
                assert_eq!(limit, 2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_query_args_need_where() {
        let err = Cli::try_parse_from(["airquery", "query", "people", "--arg", "30"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["airquery", "--format", "json", "serve", "-a", "notes"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Serve { port: 54330, .. }));
    }
}
