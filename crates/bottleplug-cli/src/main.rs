//! bottleplug - command-line client for the bottleplug storefront API.
//!
//! Signs in against the backend, issues authenticated requests, restores
//! the stored session at start-up and can run the periodic session check
//! alongside the realtime notification socket.

mod commands;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bottleplug_core::auth::{IdentityProvider, NoIdentity, StaticIdentity};
use bottleplug_core::config::StorageBackend;
use bottleplug_core::storage::{EncryptedFileStore, FileStore, KeychainStore, MemoryStore};
use bottleplug_core::{ApiClient, AuthManager, ClientConfig, KeyValueStore, SessionManager, SignInRedirector};

// ============================================================================
// Constants
// ============================================================================

/// Directory for rolling log files; file logging is off when unset
const ENV_LOG_DIR: &str = "BOTTLEPLUG_LOG_DIR";

/// Passphrase for the encrypted credential file
const ENV_PASSPHRASE: &str = "BOTTLEPLUG_PASSPHRASE";

const CREDENTIALS_FILE: &str = "credentials.json";
const ENCRYPTED_CREDENTIALS_FILE: &str = "credentials.enc";

/// Platform reported in the `X-Platform` header
const CLI_PLATFORM: &str = "cli";

#[derive(Parser)]
#[command(name = "bottleplug", version)]
#[command(about = "Command-line client for the bottleplug storefront and dashboard API")]
struct Cli {
    /// API base URL (overrides the config file)
    #[arg(long, global = true, env = "BOTTLEPLUG_API_BASE_URL")]
    api_url: Option<String>,

    /// Identity provider token used for sign-in and as the live bearer token
    #[arg(long, global = true, env = "BOTTLEPLUG_ID_TOKEN", hide_env_values = true)]
    id_token: Option<String>,

    /// Where to keep tokens for this run (overrides the config file)
    #[arg(long, global = true, value_enum, ignore_case = true)]
    storage: Option<StorageArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with the identity token, or with email and password
    Login {
        /// Backend-only sign-in with this email; the password is prompted
        #[arg(long)]
        email: Option<String>,
    },
    /// Sign out and erase stored credentials
    Logout,
    /// Show the local session and stored credentials
    Status,
    /// Validate the stored session against the backend
    Restore,
    /// Check that the backend is reachable
    Ping,
    /// GET a path relative to the API base URL and print the body
    Get {
        path: String,
        /// Query parameter as key=value, repeatable
        #[arg(long = "query", short = 'q', value_parser = parse_key_val)]
        query: Vec<(String, String)>,
        /// Send without credentials
        #[arg(long)]
        public: bool,
    },
    /// POST a JSON body to a path
    Post {
        path: String,
        /// JSON body; `{}` when omitted
        #[arg(long, short = 'd')]
        data: Option<String>,
    },
    /// POST a multipart form to a path
    Upload {
        path: String,
        /// Text field as name=value, repeatable
        #[arg(long = "field", short = 'f', value_parser = parse_key_val)]
        fields: Vec<(String, String)>,
        /// File field as name=path, repeatable
        #[arg(long = "file", value_parser = parse_key_val)]
        files: Vec<(String, String)>,
    },
    /// List or search products
    Products {
        #[arg(long, short = 's')]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// List orders
    Orders {
        /// Only orders placed by the signed-in user
        #[arg(long)]
        mine: bool,
    },
    /// Outstanding balance of each of your orders
    Balance,
    /// Show or change the cart
    Cart {
        #[command(subcommand)]
        action: Option<CartAction>,
    },
    /// List notifications
    Notifications {
        /// Mark all notifications as read afterwards
        #[arg(long)]
        mark_read: bool,
    },
    /// Stream realtime notifications and watch the session until Ctrl-C
    Watch {
        /// Seconds between session checks
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StorageArg {
    File,
    Encrypted,
    Keychain,
    Memory,
}

impl From<StorageArg> for StorageBackend {
    fn from(arg: StorageArg) -> Self {
        match arg {
            StorageArg::File => StorageBackend::File,
            StorageArg::Encrypted => StorageBackend::Encrypted,
            StorageArg::Keychain => StorageBackend::Keychain,
            StorageArg::Memory => StorageBackend::Memory,
        }
    }
}

#[derive(Subcommand)]
enum CartAction {
    Show,
    Add {
        product: String,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
    },
    Update {
        item_id: String,
        quantity: u32,
    },
    Remove {
        item_id: String,
    },
    Clear,
}

/// Parse a `key=value` argument
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Configuration for one run, split from what goes back to disk
struct RunConfig {
    effective: ClientConfig,
    /// Set when the file config gained a device id and must be saved
    to_save: Option<ClientConfig>,
}

/// Derive the run configuration from the file configuration.
///
/// Only a newly generated device id is written back. Environment and
/// flag overrides apply to this run alone.
fn resolve_config(mut file_config: ClientConfig, cli: &Cli) -> RunConfig {
    let to_save = if file_config.device_id.is_none() {
        file_config.device_id_or_generate();
        Some(file_config.clone())
    } else {
        None
    };

    let mut effective = file_config;
    effective.apply_env();
    if let Some(url) = cli.api_url.clone() {
        effective.api_base_url = Some(url);
    }
    if let Some(storage) = cli.storage {
        effective.storage = storage.into();
    }
    if effective.platform.is_none() {
        effective.platform = Some(CLI_PLATFORM.to_string());
    }

    RunConfig { effective, to_save }
}

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` controls the level (default `warn`). When `BOTTLEPLUG_LOG_DIR`
/// is set, a daily rolling file is written as well; the returned guard must
/// stay alive for buffered lines to be flushed.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(ENV_LOG_DIR) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(PathBuf::from(dir), "bottleplug.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Open the credential store selected in the config
fn open_store(config: &ClientConfig) -> Result<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match config.storage {
        StorageBackend::File => {
            let dir = config.data_dir()?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let store = FileStore::open(dir.join(CREDENTIALS_FILE))
                .context("Failed to open credential file")?;
            Arc::new(store)
        }
        StorageBackend::Encrypted => {
            let passphrase = std::env::var(ENV_PASSPHRASE)
                .with_context(|| format!("{} must be set for encrypted storage", ENV_PASSPHRASE))?;
            let dir = config.data_dir()?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let store = EncryptedFileStore::open(dir.join(ENCRYPTED_CREDENTIALS_FILE), &passphrase)
                .context("Failed to open encrypted credential file")?;
            Arc::new(store)
        }
        StorageBackend::Keychain => Arc::new(KeychainStore::default()),
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();
    let cli = Cli::parse();

    let file_config = ClientConfig::load().context("Failed to load configuration")?;
    let RunConfig { effective: mut config, to_save } = resolve_config(file_config, &cli);
    if let Some(file_config) = to_save {
        file_config.save().context("Failed to save configuration")?;
    }
    let device_id = config.device_id_or_generate();
    debug!(base_url = %config.api_base_url(), storage = ?config.storage, "Configuration loaded");

    let identity: Arc<dyn IdentityProvider> = match cli.id_token.clone() {
        Some(token) => Arc::new(StaticIdentity::new(Some(token))),
        None => Arc::new(NoIdentity),
    };
    let navigator = Arc::new(SignInRedirector::default());
    let sessions = SessionManager::new(open_store(&config)?);

    // Expired or unreadable sessions are cleared before anything runs
    if let Some(session) = sessions.check_existing_session()? {
        info!(uid = %session.uid, minutes_left = session.minutes_until_expiry(), "Existing session found");
    }

    let api = ApiClient::builder(config.clone(), sessions)
        .identity(identity)
        .navigator(navigator.clone())
        .build()
        .context("Failed to build API client")?;
    let auth = AuthManager::new(api, device_id);

    let outcome = commands::run(cli.command, &auth, &config).await;

    if let Some(location) = navigator.location() {
        debug!(location = %location, "Navigator location at exit");
    }
    if navigator.redirect_count() > 0 {
        eprintln!("Session ended. Sign in again with `bottleplug login`.");
    }
    outcome
}
