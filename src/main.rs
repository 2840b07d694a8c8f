use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use trellis_lib::{init_tracing, Config, Result, ScopeRef, Store};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Maintenance tasks for a trellis board database")]
struct Cli {
    /// Database file (overrides TRELLIS_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or upgrade the schema
    Init,

    /// Report boards and lists whose active positions are not 1..N
    Audit,

    /// Rewrite the active positions of one board or list to 1..N
    Renumber(RenumberArgs),
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct RenumberArgs {
    /// Renumber the lists of this board
    #[arg(long)]
    board: Option<String>,

    /// Renumber the cards of this list
    #[arg(long)]
    list: Option<String>,
}

impl RenumberArgs {
    fn scope(self) -> Option<ScopeRef> {
        match (self.board, self.list) {
            (Some(board), _) => Some(ScopeRef::Board(board)),
            (None, Some(list)) => Some(ScopeRef::List(list)),
            (None, None) => None,
        }
    }
}

fn run(cli: Cli, config: Config) -> Result<()> {
    let mut store = Store::open(&config)?;
    match cli.command {
        Command::Init => {
            info!(path = %config.db_path.display(), "schema ready");
        }
        Command::Audit => {
            let drifted = store.audit_orders()?;
            println!("{}", serde_json::to_string_pretty(&drifted)?);
            info!(count = drifted.len(), "audit finished");
        }
        Command::Renumber(args) => {
            if let Some(scope) = args.scope() {
                let changed = store.repair_order(&scope)?;
                println!("{changed} position(s) rewritten");
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("trellis: {err}");
            return ExitCode::FAILURE;
        }
    };
    let config = match cli.db.clone() {
        Some(path) => config.with_db_path(path),
        None => config,
    };
    init_tracing(config.log_filter.as_deref());

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(kind = ?err.kind(), "{err}");
            eprintln!("trellis: {err}");
            ExitCode::FAILURE
        }
    }
}
