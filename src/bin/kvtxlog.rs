//! kvtxlog Binary
//!
//! Recovers the store from the configured transaction log, runs one command
//! against it and closes the log again.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use kvtxlog::txlog::{self, Operation};
use kvtxlog::{Config, KvService, LogError, PostgresParams, SyncPolicy};
use tracing_subscriber::{fmt, EnvFilter};

/// Key-value store backed by a transaction log
#[derive(Parser, Debug)]
#[command(name = "kvtxlog")]
#[command(about = "Key-value store backed by a transaction log")]
#[command(version)]
struct Args {
    /// Log backend
    #[arg(short, long, value_enum, default_value_t = Backend::File)]
    backend: Backend,

    /// Log file (file backend)
    #[arg(short = 'f', long, default_value = Config::DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// fsync after every N log lines (file backend)
    #[arg(long, default_value = "1")]
    sync_every: usize,

    /// PostgreSQL host
    #[arg(long, default_value = "localhost")]
    pg_host: String,

    /// PostgreSQL port
    #[arg(long, default_value = "5432")]
    pg_port: u16,

    /// PostgreSQL database name
    #[arg(long, default_value = "kvtxlog")]
    pg_database: String,

    /// PostgreSQL user
    #[arg(long, default_value = "postgres")]
    pg_user: String,

    /// PostgreSQL password
    #[arg(long, env = "KVTXLOG_PG_PASSWORD", default_value = "", hide_env_values = true)]
    pg_password: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    File,
    Postgres,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// Print every key-value pair after recovery
    Dump,

    /// Print the raw events stored in the log
    Events,
}

fn main() {
    // Logs go to stderr so command output stays clean on stdout
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kvtxlog=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("kvtxlog v{}", kvtxlog::VERSION);

    let config = build_config(&args);

    if let Err(e) = run(&args, &config) {
        match e {
            LogError::NoSuchKey => eprintln!("key not found"),
            e => tracing::error!("{}", e),
        }
        std::process::exit(1);
    }
}

fn build_config(args: &Args) -> Config {
    let sync_policy = match args.sync_every {
        1 => SyncPolicy::EveryWrite,
        count => SyncPolicy::EveryNEntries { count },
    };
    let builder = Config::builder().sync_policy(sync_policy);

    match args.backend {
        Backend::File => builder.log_file(&args.log_file).build(),
        Backend::Postgres => builder
            .postgres(
                PostgresParams::new(&args.pg_database, &args.pg_host, &args.pg_user, &args.pg_password)
                    .with_port(args.pg_port),
            )
            .build(),
    }
}

fn run(args: &Args, config: &Config) -> kvtxlog::Result<()> {
    if let Commands::Events = args.command {
        // Raw replay only; the log is never started.
        let log = txlog::open_log(config)?;
        for event in log.read_events()?.collect_all()? {
            match &event.operation {
                Operation::Put { key, value } => println!(
                    "{}\tPUT\t{}\t{}",
                    event.sequence,
                    String::from_utf8_lossy(key),
                    String::from_utf8_lossy(value)
                ),
                Operation::Delete { key } => {
                    println!("{}\tDELETE\t{}", event.sequence, String::from_utf8_lossy(key))
                }
            }
        }
        return log.close();
    }

    let service = KvService::open(config)?;
    let report = service.recovery_report();
    tracing::info!(
        "Recovered {} keys from {} events",
        service.store().len(),
        report.events_applied
    );

    let outcome = execute(&service, &args.command);
    let closed = service.close();
    outcome?;
    closed
}

fn execute(service: &KvService, command: &Commands) -> kvtxlog::Result<()> {
    match command {
        Commands::Get { key } => {
            let value = service.get(key.as_bytes())?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Commands::Put { key, value } => service.put(key.as_bytes(), value.as_bytes())?,
        Commands::Delete { key } => service.delete(key.as_bytes())?,
        Commands::Dump => {
            for (key, value) in service.store().snapshot() {
                println!("{}\t{}", String::from_utf8_lossy(&key), String::from_utf8_lossy(&value));
            }
        }
        Commands::Events => unreachable!("handled before recovery"),
    }
    Ok(())
}
