use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use edgemeter::{
    AppState,
    auth::{TokenClaims, issue_token},
    build_app,
    config::MeterConfig,
    db, observability,
    retention::{RetentionSweeper, SweeperHandle},
    services::BandwidthService,
};

const DEFAULT_CONFIG_PATH: &str = "edgemeter.toml";

/// CLI arguments for the edgemeter service
#[derive(Parser, Debug)]
#[command(version, about = "Edge bandwidth metering service", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./edgemeter.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the metering server (default)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Run one retention sweep and exit
    Sweep {
        /// Count expired samples without deleting them
        #[arg(long)]
        dry_run: bool,
    },
    /// Mint an RPC token for a configured node
    Token {
        /// Node id from `[[auth.api_tokens]]`
        #[arg(long)]
        node_id: String,
        /// Tenant id embedded in the token
        #[arg(long, default_value_t = 0)]
        tenant: i64,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command {
        Some(Command::Migrate) => run_migrate(config_path).await,
        Some(Command::Sweep { dry_run }) => run_sweep(config_path, dry_run).await,
        Some(Command::Token { node_id, tenant }) => run_token(config_path, &node_id, tenant),
        Some(Command::Serve) | None => run_server(config_path).await,
    }
}

fn load_config(explicit_path: Option<&str>) -> (PathBuf, MeterConfig) {
    let path = PathBuf::from(explicit_path.unwrap_or(DEFAULT_CONFIG_PATH));
    match MeterConfig::from_file(&path) {
        Ok(config) => (path, config),
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn init_tracing_or_exit(config: &MeterConfig) {
    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }
}

async fn run_server(explicit_config_path: Option<&str>) {
    let (config_path, config) = load_config(explicit_config_path);
    init_tracing_or_exit(&config);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics, continuing without them");
    }

    tracing::info!(
        config_file = %config_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting edgemeter"
    );

    let state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize application state");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let sweeper = state.sweeper.clone().start();
    let app = build_app(&config, state);

    let addr = config.server.socket_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "Failed to bind");
            eprintln!("Error: Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "Listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sweeper))
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal(sweeper: Option<SweeperHandle>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping retention sweeper...");
    if let Some(handle) = sweeper {
        handle.shutdown().await;
    }
    tracing::info!("Background tasks stopped");
}

async fn connect(config: &MeterConfig) -> db::DbPool {
    if config.database.is_none() {
        eprintln!("Error: Database is not configured.");
        std::process::exit(1);
    }

    match db::DbPool::from_config(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_migrate(explicit_config_path: Option<&str>) {
    let (config_path, config) = load_config(explicit_config_path);
    init_tracing_or_exit(&config);

    tracing::info!(
        config_file = %config_path.display(),
        "Running database migrations"
    );

    let pool = connect(&config).await;
    match pool.run_migrations().await {
        Ok(()) => {
            tracing::info!("Database migrations completed successfully");
        }
        Err(e) => {
            tracing::error!(error = %e, "Database migrations failed");
            eprintln!("Error: Database migrations failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_sweep(explicit_config_path: Option<&str>, dry_run: bool) {
    let (_, mut config) = load_config(explicit_config_path);
    init_tracing_or_exit(&config);
    config.retention.safety.dry_run |= dry_run;

    let pool = connect(&config).await;
    if config.database.run_migrations()
        && let Err(e) = pool.run_migrations().await
    {
        eprintln!("Error: Database migrations failed: {}", e);
        std::process::exit(1);
    }

    let service = BandwidthService::new(Arc::new(pool));
    let sweeper = RetentionSweeper::new(service, config.retention.clone());
    match sweeper.sweep().await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error: Failed to serialize sweep report: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Retention sweep failed");
            eprintln!("Error: Retention sweep failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_token(explicit_config_path: Option<&str>, node_id: &str, tenant_id: i64) {
    let (_, config) = load_config(explicit_config_path);

    let Some(credential) = config.auth.find_token(node_id) else {
        eprintln!("Error: No auth.api_tokens entry for node '{}'", node_id);
        std::process::exit(1);
    };

    let claims = TokenClaims {
        timestamp: chrono::Utc::now().timestamp(),
        role: credential.role,
        tenant_id,
    };
    match issue_token(&credential.secret, &claims) {
        Ok(token) => println!("{token}"),
        Err(e) => {
            eprintln!("Error: Failed to issue token: {}", e);
            std::process::exit(1);
        }
    }
}
