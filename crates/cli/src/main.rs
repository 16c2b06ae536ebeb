mod commands;
mod config;
mod error;
mod logging;
mod serve;
mod services;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use customs_sync_engine::period::parse_day;
use customs_sync_engine::RateSyncMode;
use time::Date;

use crate::config::Config;
use crate::error::CliError;
use crate::services::Services;

/// Exchange-rate and customs-declaration synchronization.
#[derive(Parser)]
#[command(name = "customs-sync", version, about = "Exchange-rate and customs-declaration sync")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database URL (`sqlite://file.db` or `memory`); overrides the config
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP trigger server
    Serve {
        /// Port to listen on (overrides the config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Sync exchange rates: full backfill or daily gap-fill
    SyncRates {
        /// full | daily
        #[arg(long, default_value = "daily", value_parser = parse_mode)]
        mode: RateSyncMode,
        /// Print per-day progress to stderr
        #[arg(long)]
        progress: bool,
    },

    /// Recompute declaration summaries page by page until done
    BackfillSummaries {
        /// Rows per page (clamped to 1..=500)
        #[arg(long, default_value = "100")]
        batch_size: usize,
        /// Resume after this declaration id
        #[arg(long)]
        cursor: Option<i64>,
    },

    /// Run a declaration sync job for one company
    SyncDeclarations {
        #[arg(long)]
        company: i64,
        /// First day (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        from: Date,
        /// Last day (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        to: Date,
    },

    /// Cancel a processing sync job
    CancelJob { id: i64 },

    /// Show a sync job and its error log
    Job { id: i64 },

    /// Compare stored rates with the source, printing NDJSON events
    AuditRates {
        #[arg(long, value_parser = parse_date)]
        from: Date,
        #[arg(long, value_parser = parse_date)]
        to: Date,
        /// Rewrite mismatching days from the source
        #[arg(long)]
        repair: bool,
    },

    /// Print the chunks a date range splits into
    Split {
        #[arg(long, value_parser = parse_date)]
        from: Date,
        #[arg(long, value_parser = parse_date)]
        to: Date,
        #[arg(long, default_value = "7")]
        max_days: u32,
    },
}

fn parse_date(s: &str) -> Result<Date, String> {
    parse_day(s).map_err(|e| e.to_string())
}

fn parse_mode(s: &str) -> Result<RateSyncMode, String> {
    s.parse().map_err(|e: customs_sync_engine::EngineError| e.to_string())
}

fn main() {
    let cli = Cli::parse();
    logging::init();

    // Pure computation; needs neither config nor store.
    if let Commands::Split { from, to, max_days } = cli.command {
        commands::split_range(from, to, max_days);
        return;
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(cli.command, config)) {
        eprintln!("error: {}", e);
        process::exit(e.exit_code());
    }
}

async fn run(command: Commands, mut config: Config) -> Result<(), CliError> {
    if let Commands::Serve { port: Some(port) } = command {
        config.port = port;
    }
    let services = Services::open(&config).await?;

    match command {
        Commands::Serve { .. } => serve::start_server(&config, services).await,
        Commands::SyncRates { mode, progress } => {
            commands::sync_rates(&services, mode, progress).await
        }
        Commands::BackfillSummaries { batch_size, cursor } => {
            commands::backfill_summaries(&services, batch_size, cursor).await
        }
        Commands::SyncDeclarations { company, from, to } => {
            commands::sync_declarations(&services, company, from, to).await
        }
        Commands::CancelJob { id } => commands::cancel_job(&services, id).await,
        Commands::Job { id } => commands::show_job(&services, id).await,
        Commands::AuditRates { from, to, repair } => {
            commands::audit_rates(&services, from, to, repair).await
        }
        Commands::Split { from, to, max_days } => {
            commands::split_range(from, to, max_days);
            Ok(())
        }
    }
}
