use clap::Parser;
use dbpeek::config::{self, Config};
use dbpeek::core::Result;
use dbpeek::repl::{self, Session};
use dbpeek::storage::HistoryStore;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// A portable, offline viewer for local SQLite database files.
#[derive(Debug, Parser)]
#[command(name = "dbpeek", version, about)]
struct Cli {
    /// Database file to open on startup (.db, .sqlite, .sqlite3)
    database: Option<PathBuf>,

    /// Configuration file (defaults to <config dir>/dbpeek/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Query history database (overrides the configured location)
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::load_default()?,
    };
    init_logging(&config);

    info!("Starting dbpeek...");

    let history = match cli.history.clone().or_else(|| config.history.path.clone()) {
        Some(path) => HistoryStore::open(path)?,
        None => HistoryStore::open_default()?,
    };
    info!(path = %history.path().display(), "query history ready");

    let mut session = Session::new(config, history);
    if let Some(database) = &cli.database {
        match session.open(database) {
            Ok(()) => println!("Opened {}", database.display()),
            Err(e) => eprintln!("Failed to open database: {}", e),
        }
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    repl::run_repl(&mut session, stdin.lock(), stdout.lock())?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "dbpeek exited with an error");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
