//! TESSERA operator CLI.
//!
//! Opens the ledger described by a TOML config (or an in-memory ledger when
//! none is given) and runs one administrative command against it.
//!
//! Usage:
//!   tessera demo
//!   tessera --config config/tessera.toml record goal-create --actor user-7 --current '{"amount":500}'
//!   tessera --config config/tessera.toml list --operation goal-update --page 2
//!   tessera --config config/tessera.toml verify --anchor genesis
//!   tessera --config config/tessera.toml sweep
//!   tessera --config config/tessera.toml history

mod commands;
mod demo;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use tessera_config::LedgerConfig;
use tessera_contracts::{error::LedgerResult, ids::ActorId, operation::OperationType, query::Role};

// ── CLI definition ────────────────────────────────────────────────────────────

/// TESSERA: tamper-evident audit ledger.
#[derive(Parser)]
#[command(
    name = "tessera",
    about = "TESSERA audit ledger operator tool",
    long_about = "Records, lists, verifies and archives entries of a TESSERA hash-chained\n\
                  audit ledger.  Without --config the ledger lives in memory for one command."
)]
struct Cli {
    /// Ledger configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `store.path` from the configuration.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk through recording, querying, verifying and sweeping a small ledger.
    Demo,

    /// Append one event and print its append status.
    Record {
        /// Operation type, e.g. `goal-update`.
        operation: OperationType,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        resource_type: Option<String>,
        #[arg(long, requires = "resource_type")]
        resource_id: Option<String>,
        /// Snapshot before the operation, as JSON.
        #[arg(long)]
        previous: Option<String>,
        /// Snapshot after the operation, as JSON.
        #[arg(long)]
        current: Option<String>,
        /// Amount in minor units (cents).
        #[arg(long, requires = "currency")]
        amount_minor: Option<i64>,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        tax_year: Option<u16>,
        /// Record the operation as failed with this message.
        #[arg(long)]
        failed: Option<String>,
    },

    /// List entries as a reporting caller would see them.
    List {
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        operation: Option<OperationType>,
        /// Inclusive RFC 3339 lower bound.
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Exclusive RFC 3339 upper bound.
        #[arg(long)]
        to: Option<DateTime<Utc>>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        page_size: Option<u32>,
        #[arg(long, value_enum, default_value_t = RoleArg::Auditor)]
        role: RoleArg,
        /// Identity of the caller.
        #[arg(long, default_value = "operator")]
        caller: String,
    },

    /// Replay the live chain and report the first break.
    Verify {
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
        /// `auto`, `genesis`, or a 64-character hex hash.
        #[arg(long, default_value = "auto")]
        anchor: String,
    },

    /// Archive and purge entries past the retention horizon.
    Sweep {
        /// Override `retention.horizon_years`.
        #[arg(long, conflicts_with = "before")]
        horizon_years: Option<u32>,
        /// Sweep everything created before this RFC 3339 instant instead.
        #[arg(long)]
        before: Option<DateTime<Utc>>,
    },

    /// Replay spilled events into the live store.
    Reconcile,

    /// Verify every archive followed by the live store, from genesis.
    History {
        /// Override `retention.archive_dir`.
        #[arg(long)]
        archive_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Auditor,
    Administrator,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Auditor => Role::Auditor,
            RoleArg::Administrator => Role::Administrator,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("tessera: {}", e);
            std::process::exit(1);
        }
    }
}

/// Run one command, returning the process exit code.
fn run(cli: Cli) -> LedgerResult<i32> {
    let mut config = match &cli.config {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::default(),
    };
    if let Some(db) = cli.db {
        config.store.path = Some(db);
    }

    match cli.command {
        Command::Demo => demo::run(&config).map(|()| 0),
        Command::Record {
            operation,
            actor,
            session,
            resource_type,
            resource_id,
            previous,
            current,
            amount_minor,
            currency,
            tax_year,
            failed,
        } => commands::record(
            &config,
            commands::RecordArgs {
                operation,
                actor: actor.map(ActorId::new),
                session,
                resource_type,
                resource_id,
                previous,
                current,
                amount_minor,
                currency,
                tax_year,
                failed,
            },
        ),
        Command::List {
            actor,
            operation,
            from,
            to,
            page,
            page_size,
            role,
            caller,
        } => commands::list(
            &config,
            commands::ListArgs {
                actor: actor.map(ActorId::new),
                operation,
                from,
                to,
                page,
                page_size,
                caller: ActorId::new(caller),
                role: role.into(),
            },
        ),
        Command::Verify { from, to, anchor } => commands::verify(&config, from, to, &anchor),
        Command::Sweep { horizon_years, before } => commands::sweep(&config, horizon_years, before),
        Command::Reconcile => commands::reconcile(&config),
        Command::History { archive_dir } => commands::history(&config, archive_dir),
    }
}
