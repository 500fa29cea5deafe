//! KeyGate server
//!
//! Issues device-bound access keys for protected scripts, verifies them, and
//! delivers script payloads to clients holding a valid key.
//!
//! Usage:
//!   keygate-server serve --port 8080 --database keygate.db
//!   keygate-server add-script --name loader --payload-file loader.lua
//!   keygate-server shared-key --script-id <uuid>

use std::{fs, net::SocketAddr, path::{Path, PathBuf}, sync::Arc, time::Duration};
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use keygate_license::{Ceiling, KeyExpiry, KeyService, OperationLimits, Script};
use keygate_server::{build_router, AppState, ServerConfig, DEFAULT_ALLOWED_ORIGINS};
use keygate_storage::{SqliteConfig, SqliteStore};
use keygate_types::ScriptId;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "keygate-server")]
#[command(about = "Access-key issuance and script delivery service")]
struct Args {
    /// Path to the SQLite database
    #[arg(short, long, global = true, default_value = "keygate.db")]
    database: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Add or replace a protected script
    AddScript(AddScriptArgs),
    /// Issue a shared key that any device may present
    SharedKey {
        /// Script to issue the key for
        #[arg(long)]
        script_id: String,
    },
}

#[derive(ClapArgs, Debug)]
struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Origin allowed to call /issue and /verify (repeatable)
    #[arg(long = "allowed-origin")]
    allowed_origins: Vec<String>,

    /// Upper bound on a single store operation, in milliseconds
    #[arg(long, default_value = "5000")]
    store_timeout_ms: u64,

    /// Issuance requests per caller and device per window
    #[arg(long, default_value = "5")]
    issue_limit: u32,

    /// Verification requests per caller per window
    #[arg(long, default_value = "10")]
    verify_limit: u32,

    /// Delivery requests per caller per window
    #[arg(long, default_value = "20")]
    deliver_limit: u32,

    /// Rate-limit window length in seconds
    #[arg(long, default_value = "60")]
    window_secs: u64,
}

#[derive(ClapArgs, Debug)]
struct AddScriptArgs {
    /// Display name
    #[arg(long)]
    name: String,

    /// File holding the payload to deliver
    #[arg(long)]
    payload_file: PathBuf,

    /// Key lifetime in hours; -1 for keys that never expire
    #[arg(long, default_value = "24", allow_hyphen_values = true)]
    expiry_hours: i64,

    /// Deliver without requiring a key
    #[arg(long)]
    no_key_system: bool,

    /// Reuse an existing script id instead of generating one
    #[arg(long)]
    id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    match args.command {
        Command::Serve(serve_args) => serve(&args.database, serve_args).await,
        Command::AddScript(script_args) => add_script(&args.database, script_args),
        Command::SharedKey { script_id } => shared_key(&args.database, &script_id),
    }
}

fn open_store(path: &Path, timeout: Duration) -> Result<Arc<SqliteStore>> {
    let config = SqliteConfig {
        busy_timeout: timeout,
        lock_timeout: timeout,
    };
    let store = SqliteStore::open(path, &config)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn serve(database: &Path, args: ServeArgs) -> Result<()> {
    info!("KeyGate starting...");
    let store_timeout = Duration::from_millis(args.store_timeout_ms);
    let store = open_store(database, store_timeout)?;

    let window = Duration::from_secs(args.window_secs);
    let limits = OperationLimits {
        issue: Ceiling { max_requests: args.issue_limit, window },
        verify: Ceiling { max_requests: args.verify_limit, window },
        deliver: Ceiling { max_requests: args.deliver_limit, window },
        ..OperationLimits::default()
    };
    let allowed_origins = if args.allowed_origins.is_empty() {
        DEFAULT_ALLOWED_ORIGINS.iter().map(|o| (*o).to_owned()).collect()
    } else {
        args.allowed_origins
    };
    let config = ServerConfig {
        allowed_origins,
        store_timeout,
    };
    info!(
        issue = limits.issue.max_requests,
        verify = limits.verify.max_requests,
        deliver = limits.deliver.max_requests,
        window_secs = args.window_secs,
        "rate limits configured"
    );

    let service = KeyService::new(store.clone(), store, limits);
    let app = build_router(AppState::new(service, config));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port))
        .await
        .with_context(|| format!("Failed to bind port {}", args.port))?;
    info!("HTTP API listening on port {}", args.port);

    println!("\n========================================");
    println!("  KeyGate Running");
    println!("========================================");
    println!("  Database:  {}", database.display());
    println!("  HTTP Port: {}", args.port);
    println!("========================================\n");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("HTTP server failed")
}

fn add_script(database: &Path, args: AddScriptArgs) -> Result<()> {
    let store = open_store(database, Duration::from_secs(5))?;
    let payload = fs::read_to_string(&args.payload_file)
        .with_context(|| format!("Failed to read payload file {}", args.payload_file.display()))?;
    let key_expiry = KeyExpiry::from_hours(args.expiry_hours)
        .with_context(|| format!("Invalid expiry {}: use a positive hour count or -1", args.expiry_hours))?;
    let id = match args.id {
        Some(id) => ScriptId::parse(&id).context("Invalid script id")?,
        None => ScriptId::new(),
    };

    let script = Script {
        id,
        name: args.name,
        key_system_enabled: !args.no_key_system,
        key_expiry,
        payload,
    };
    store.put_script(&script).context("Failed to store script")?;
    info!(script_id = %script.id, name = %script.name, "script stored");
    println!("{}", script.id);
    Ok(())
}

fn shared_key(database: &Path, script_id: &str) -> Result<()> {
    let store = open_store(database, Duration::from_secs(5))?;
    let service = KeyService::new(store.clone(), store, OperationLimits::default());
    let issued = service
        .issue_shared(script_id)
        .context("Failed to issue shared key")?;
    println!("Key:     {}", issued.key.as_str());
    println!("Expires: {}", issued.expires_at.to_rfc3339());
    Ok(())
}
