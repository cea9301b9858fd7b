use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use vigil_daemon::daemon::{run_daemon, DaemonOpts};
use vigil_daemon::provider::SocketProvider;
use vigil_daemon::report::format_sessions;
use vigil_daemon::shutdown::Shutdown;
use vigil_daemon::store::Store;

const DEFAULT_DB_PATH: &str = "vigil.db";
const DEFAULT_PROVIDER_SOCKET: &str = "/tmp/vigil/provider.sock";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Parser)]
#[command(name = "vigil", about = "Presence sampling and online-session tracking")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sampling daemon (default when no subcommand given)
    Daemon {
        /// SQLite database path
        #[arg(long, env = "VIGIL_DB", default_value = DEFAULT_DB_PATH)]
        db: PathBuf,

        /// Unix socket of the presence provider service
        #[arg(long, env = "VIGIL_PROVIDER_SOCKET", default_value = DEFAULT_PROVIDER_SOCKET)]
        provider_socket: PathBuf,

        /// Polling interval in seconds
        #[arg(long, env = "VIGIL_POLL_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
        poll_interval_secs: u64,
    },
    /// Register an identity for presence polling
    Track {
        handle: String,

        /// SQLite database path
        #[arg(long, env = "VIGIL_DB", default_value = DEFAULT_DB_PATH)]
        db: PathBuf,
    },
    /// Stop polling an identity (its history is kept)
    Untrack {
        handle: String,

        /// SQLite database path
        #[arg(long, env = "VIGIL_DB", default_value = DEFAULT_DB_PATH)]
        db: PathBuf,
    },
    /// List tracked identities
    Identities {
        /// SQLite database path
        #[arg(long, env = "VIGIL_DB", default_value = DEFAULT_DB_PATH)]
        db: PathBuf,
    },
    /// Show recently persisted online sessions
    Sessions {
        /// SQLite database path
        #[arg(long, env = "VIGIL_DB", default_value = DEFAULT_DB_PATH)]
        db: PathBuf,

        /// Maximum number of sessions to show
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing. Respects RUST_LOG env var, defaults to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        // Default to the daemon when no subcommand is given.
        None | Some(Commands::Daemon { .. }) => {
            let (db, provider_socket, poll_interval_secs) = match cli.command {
                Some(Commands::Daemon {
                    db,
                    provider_socket,
                    poll_interval_secs,
                }) => (db, provider_socket, poll_interval_secs),
                _ => (
                    PathBuf::from(DEFAULT_DB_PATH),
                    PathBuf::from(DEFAULT_PROVIDER_SOCKET),
                    DEFAULT_POLL_INTERVAL_SECS,
                ),
            };

            let shutdown = Shutdown::new();
            tokio::spawn(shutdown.clone().listen_for_signals());

            let provider = Arc::new(SocketProvider::new(provider_socket));
            let opts = DaemonOpts {
                db_path: db,
                poll_interval: Duration::from_secs(poll_interval_secs),
            };
            run_daemon(opts, provider, shutdown).await?;
        }
        Some(Commands::Track { handle, db }) => {
            let store = Store::open(&db)?;
            store.add_identity(&handle)?;
            println!("tracking {handle}");
        }
        Some(Commands::Untrack { handle, db }) => {
            let store = Store::open(&db)?;
            if store.deactivate_identity(&handle)? {
                println!("stopped tracking {handle}");
            } else {
                println!("{handle} was not tracked");
            }
        }
        Some(Commands::Identities { db }) => {
            let store = Store::open(&db)?;
            let identities = store.list_identities()?;
            if identities.is_empty() {
                println!("no identities tracked");
            }
            for identity in identities {
                let flag = if identity.active { "active" } else { "inactive" };
                println!("{} ({flag})", identity.handle);
            }
        }
        Some(Commands::Sessions { db, limit }) => {
            let store = Store::open(&db)?;
            let sessions = store.recent_sessions(limit)?;
            print!("{}", format_sessions(&sessions));
        }
    }

    Ok(())
}
