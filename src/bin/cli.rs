//! AirQuery CLI - Main entry point for the `airquery` binary
//!
//! Initializes project configuration, serves a project database as a
//! content provider and runs ad-hoc selects.

use airquery::engine::{
    adapter::{ContentUri, SqliteStore},
    cli::{self, Cli, Commands, OutputFormat},
    config::{Config, RemoteConfig},
    context::QueryContext,
    provider::{self, ProviderState},
    query::Target,
    record::RawRow,
};
use anyhow::{anyhow, bail, Context};
use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run_cli(cli) {
        cli::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let project_dir = cli.get_project_dir();
    let json_output = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Init { db, remote } => cmd_init(&project_dir, &db, remote, json_output),
        Commands::Serve { authority, port, host } => cmd_serve(&project_dir, &authority, &host, port),
        Commands::Query {
            target,
            selection,
            args,
            sort,
            limit,
        } => cmd_query(&project_dir, &target, selection.as_deref(), &args, sort.as_deref(), limit),
        Commands::Status => cmd_status(&project_dir, json_output),
    }
}

fn cmd_init(project_dir: &Path, db: &Path, remote: Option<String>, json: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(project_dir)?;

    let mut config = Config::default_for_database(db);
    config.remote = remote.map(|base_url| RemoteConfig {
        base_url,
        timeout_secs: 30,
    });
    config.save(project_dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        cli::success(&format!("Wrote config in {}", project_dir.display()));
    }
    Ok(())
}

fn cmd_serve(project_dir: &Path, authority: &str, host: &str, port: u16) -> anyhow::Result<()> {
    let config = Config::load(project_dir)?;
    let db_path = config
        .database_path(project_dir)
        .ok_or_else(|| anyhow!("no database configured in {}", project_dir.display()))?;
    let store = SqliteStore::new(&db_path).with_context(|| format!("opening {}", db_path.display()))?;

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let state = ProviderState::new(authority, Arc::new(store));

    cli::header("AirQuery Content Provider");
    cli::kv("Database", &db_path.display().to_string());
    cli::kv("Authority", &format!("content://{}", authority));
    cli::kv("Listening", &format!("http://{}", addr));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(provider::serve(addr, state))?;
    Ok(())
}

fn cmd_query(
    project_dir: &Path,
    target: &str,
    selection: Option<&str>,
    args: &[String],
    sort: Option<&str>,
    limit: usize,
) -> anyhow::Result<()> {
    let config = Config::load(project_dir)?;
    let ctx = QueryContext::from_config(&config, project_dir)?;

    let target = if target.starts_with("content://") {
        Target::Endpoint(ContentUri::parse(target)?)
    } else {
        Target::Table(target.to_string())
    };

    let mut query = ctx.select::<RawRow>(target)?.limit(limit);
    match selection {
        Some(selection) => query = query.and_where(selection, args)?,
        None if !args.is_empty() => bail!("{} argument(s) given without a --where clause", args.len()),
        None => {}
    }
    if let Some(sort) = sort {
        query = query.sort(sort);
    }

    let rows: Vec<_> = query
        .all()?
        .unwrap_or_default()
        .into_iter()
        .map(|row| row.values)
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn cmd_status(project_dir: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(project_dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    cli::header("AirQuery Project");
    cli::kv("Directory", &project_dir.display().to_string());
    cli::kv("Version", &config.version);
    match config.database_path(project_dir) {
        Some(path) => cli::kv("Database", &path.display().to_string()),
        None => cli::kv("Database", "(none)"),
    }
    match &config.remote {
        Some(remote) => cli::kv("Remote", &remote.base_url),
        None => cli::kv("Remote", "(none)"),
    }
    cli::kv("Max in flight", &config.runner.max_in_flight.to_string());
    Ok(())
}
