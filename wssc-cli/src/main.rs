//! WSSC CLI - command-line interface for secure conversation sessions
//!
//! Issues test sessions, derives computed keys, manages configuration and runs
//! persistent-store maintenance.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use wssc_core::{
    config_error, init_logging, log_operation_error, log_operation_start, log_operation_success,
    validation_error, ErrorContext, Identity, OsSecureRandom, SystemClock, WsscConfig, WsscError,
    WsscResult,
};
use wssc_persist::PersistentSessionStore;
use wssc_session::{
    InboundSessionManager, InboundSessionRequest, PrfAlgorithm, SessionKeyDeriver, SessionStore,
};

#[derive(Parser)]
#[command(name = "wssc")]
#[command(about = "WS-SecureConversation session tooling")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Print the effective configuration
        #[arg(long)]
        show: bool,

        /// Validate the effective configuration
        #[arg(long)]
        validate: bool,
    },

    /// Issue an inbound session and print its identifier and validity
    Issue {
        /// User id of the session owner
        #[arg(long)]
        user: String,

        /// Identity provider of the owner
        #[arg(long, default_value = "internal")]
        provider: String,

        /// Login name, defaults to the user id
        #[arg(long)]
        login: Option<String>,

        /// Session lifetime in milliseconds
        #[arg(long, default_value = "3600000")]
        duration_ms: i64,

        /// Secure conversation namespace
        #[arg(long)]
        namespace: Option<String>,

        /// Requested key size in bits
        #[arg(long, default_value = "0")]
        key_bits: i64,

        /// Client entropy as hex
        #[arg(long)]
        client_entropy: Option<String>,

        /// Also print the shared secret
        #[arg(long)]
        show_secret: bool,
    },

    /// Derive a computed key from client and server entropy
    Derive {
        /// Client entropy as hex
        #[arg(long)]
        client: String,

        /// Server entropy as hex
        #[arg(long)]
        server: String,

        /// Key size in bytes
        #[arg(long, default_value = "32")]
        key_size: usize,

        /// Use P_SHA256 instead of P_SHA1
        #[arg(long)]
        sha256: bool,
    },

    /// Run maintenance over the persistent session store
    Maintain {
        /// Keep running on the configured maintenance interval until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> WsscResult<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;

    let mut logging_config = config.logging.clone();
    if cli.verbose {
        logging_config.level = "debug".to_string();
    }
    init_logging(&logging_config).map_err(|e| WsscError::Config {
        message: format!("Failed to initialize logging: {}", e),
        source: Some(e),
        context: ErrorContext::new("cli")
            .with_operation("init_logging")
            .with_suggestion("Check logging configuration"),
    })?;

    info!("Starting wssc v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Config {
            init,
            show,
            validate,
        } => handle_config(&config, init, show, validate).await?,
        Commands::Issue {
            user,
            provider,
            login,
            duration_ms,
            namespace,
            key_bits,
            client_entropy,
            show_secret,
        } => {
            let owner = Identity::new(provider, user.clone(), login.unwrap_or(user));
            let mut request =
                InboundSessionRequest::new(owner, duration_ms).with_key_size_bits(key_bits);
            if let Some(namespace) = namespace {
                request = request.with_namespace(namespace);
            }
            if let Some(entropy) = client_entropy {
                request = request.with_client_entropy(parse_hex("client-entropy", &entropy)?);
            }
            handle_issue(&config, request, show_secret).await?;
        }
        Commands::Derive {
            client,
            server,
            key_size,
            sha256,
        } => handle_derive(&client, &server, key_size, sha256)?,
        Commands::Maintain { watch } => handle_maintain(&config, watch).await?,
    }

    Ok(())
}

/// Load from an explicit path or the first default location that exists,
/// with `WSSC_*` environment overrides applied on top
fn load_config(config_path: Option<&PathBuf>) -> WsscResult<WsscConfig> {
    if let Some(path) = config_path {
        return WsscConfig::load(Some(path.as_path()));
    }

    let found = default_config_paths().into_iter().find(|path| path.exists());
    WsscConfig::load(found.as_deref())
}

fn default_config_paths() -> Vec<PathBuf> {
    [
        dirs::config_dir().map(|d| d.join("wssc").join("config.toml")),
        dirs::home_dir().map(|d| d.join(".wssc").join("config.toml")),
        Some(PathBuf::from("wssc.toml")),
    ]
    .into_iter()
    .flatten()
    .collect()
}

async fn handle_config(config: &WsscConfig, init: bool, show: bool, validate: bool) -> WsscResult<()> {
    if init {
        let config_dir = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|d| d.join(".config")))
            .ok_or_else(|| config_error!("No configuration directory available", "cli"))?
            .join("wssc");

        tokio::fs::create_dir_all(&config_dir).await?;
        let config_path = config_dir.join("config.toml");
        WsscConfig::default().save_to_file(&config_path)?;
        println!("Configuration initialized at: {}", config_path.display());
    }

    if show {
        let rendered = toml::to_string_pretty(config).map_err(|e| WsscError::Config {
            message: format!("Failed to render config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("cli").with_operation("config_show"),
        })?;
        println!("{}", rendered);
    }

    if validate {
        // Loading already validated; report it for scripts
        config.validate()?;
        println!("Configuration is valid");
    }

    Ok(())
}

async fn handle_issue(
    config: &WsscConfig,
    request: InboundSessionRequest,
    show_secret: bool,
) -> WsscResult<()> {
    log_operation_start!("issue_session", user_id = %request.owner.user_id);

    let store = Arc::new(SessionStore::from_config(&config.session, Arc::new(SystemClock))?);
    let manager =
        InboundSessionManager::new(store, config.session.clone(), Arc::new(OsSecureRandom))?;

    let session = manager.create_session(request).await.map_err(|e| {
        log_operation_error!("issue_session", e);
        e
    })?;

    println!("identifier: {}", session.identifier());
    println!("created:    {}", format_millis(session.creation()));
    println!("expires:    {}", format_millis(session.expiration()));
    println!("key size:   {} bytes", session.shared_secret().len());
    if let Some(server) = session.server_entropy() {
        println!("server entropy: {}", hex::encode(server));
    }
    if show_secret {
        println!("shared secret:  {}", hex::encode(session.shared_secret()));
    }

    log_operation_success!("issue_session", identifier = session.identifier());
    Ok(())
}

fn handle_derive(client: &str, server: &str, key_size: usize, sha256: bool) -> WsscResult<()> {
    let algorithm = if sha256 {
        PrfAlgorithm::PSha256
    } else {
        PrfAlgorithm::PSha1
    };
    let key = SessionKeyDeriver::new(algorithm).derive(
        &parse_hex("client", client)?,
        &parse_hex("server", server)?,
        key_size,
    )?;
    println!("{}", hex::encode(key.as_bytes()));
    Ok(())
}

async fn handle_maintain(config: &WsscConfig, watch: bool) -> WsscResult<()> {
    log_operation_start!("maintain", database = %config.cluster.database_url);

    let store = Arc::new(
        PersistentSessionStore::from_config(&config.cluster, Arc::new(SystemClock)).await?,
    );
    let deleted = store.run_maintenance().await.map_err(|e| {
        log_operation_error!("maintain", e);
        e
    })?;

    println!("Removed {} stale session(s)", deleted);
    log_operation_success!("maintain", deleted);

    if watch {
        let interval = config.cluster.maintenance_interval();
        info!(interval_ms = config.cluster.maintenance_interval_ms, "Watching persistent session store");
        let handle = Arc::clone(&store).spawn_maintenance(interval);

        tokio::signal::ctrl_c().await?;
        handle.abort();
        info!("Maintenance stopped");
    }
    Ok(())
}

fn parse_hex(field: &str, value: &str) -> WsscResult<Vec<u8>> {
    hex::decode(value.trim())
        .map_err(|e| validation_error!(format!("{} is not valid hex: {}", field, e), field, "cli"))
}

fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}
