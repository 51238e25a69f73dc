use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use smcp_audit::{AuditConfig, AuditLevel, AuditLogger};
use smcp_backend::{BackendManager, ClientTimeouts};
use smcp_config::{resolve_config_path, AggregatorConfig};
use smcp_security::{AuthManager, RateLimiter, AUTH_KEYS_FILE_ENV, DEFAULT_KEYS_PATH};
use smcp_server::Dispatcher;

#[derive(Parser)]
#[command(name = "search-mcp")]
#[command(about = "Aggregating MCP proxy with a searchable namespaced tool catalog")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (overrides MCP_CONFIG_PATH)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP over stdin/stdout (the default)
    Serve,

    /// Start backends and print the aggregated catalog
    Tools,

    /// Validate the configuration file
    ValidateConfig,

    /// Generate an API key; the plaintext is printed exactly once
    GenerateKey {
        /// Human-readable key name
        #[arg(long)]
        name: String,

        /// Comma-separated permission patterns (default: tools:*)
        #[arg(long, value_delimiter = ',')]
        permissions: Vec<String>,

        /// Expiry in days from now; omit for a non-expiring key
        #[arg(long)]
        expires_in_days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout belongs to the MCP channel; all diagnostics go to stderr
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config_path).await,
        Commands::Tools => tools(config_path).await,
        Commands::ValidateConfig => validate_config(config_path).await,
        Commands::GenerateKey {
            name,
            permissions,
            expires_in_days,
        } => generate_key(name, permissions, expires_in_days).await,
    }
}

async fn serve(config_path: PathBuf) -> Result<()> {
    let audit = Arc::new(AuditLogger::new(AuditConfig::default()).await);
    let auth = Arc::new(AuthManager::from_env().await?);
    let limiter = Arc::new(RateLimiter::new());
    let _eviction = Arc::clone(&limiter).spawn_eviction();
    let manager = Arc::new(BackendManager::new(
        Arc::clone(&audit),
        ClientTimeouts::default(),
    ));

    let dispatcher = Dispatcher::new(manager, limiter, auth, audit, config_path);
    tracing::info!("search-mcp ready on stdio");

    tokio::select! {
        result = dispatcher.run_stdio() => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            dispatcher.shutdown().await;
        }
    }
    Ok(())
}

async fn tools(config_path: PathBuf) -> Result<()> {
    let audit = Arc::new(AuditLogger::in_memory(AuditLevel::Info).await);
    let manager = BackendManager::new(audit, ClientTimeouts::default());
    manager.load_config_file(&config_path).await?;
    manager.start_all().await;

    let tools = manager.list_tools().await;
    println!("Aggregated tools ({}):", tools.len());
    for tool in &tools {
        println!("  {} - {}", tool.name, tool.description);
    }

    manager.stop_all().await;
    Ok(())
}

async fn validate_config(config_path: PathBuf) -> Result<()> {
    let config = AggregatorConfig::from_file(&config_path)?;
    println!("Configuration valid: {}", config_path.display());
    for (name, backend) in &config.mcp_servers {
        let state = if backend.enabled { "enabled" } else { "disabled" };
        println!("  {} ({}) -> {}", name, state, backend.command);
    }
    Ok(())
}

async fn generate_key(
    name: String,
    permissions: Vec<String>,
    expires_in_days: Option<i64>,
) -> Result<()> {
    let path = std::env::var(AUTH_KEYS_FILE_ENV)
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_KEYS_PATH.to_string());
    let auth = AuthManager::load(&path, true).await?.with_enabled(true);

    let permissions = if permissions.is_empty() {
        vec!["tools:*".to_string()]
    } else {
        permissions
    };
    let generated = auth
        .generate(name, permissions, expires_in_days.map(chrono::Duration::days))
        .await?;

    println!("API key generated (shown once, not recoverable):");
    println!("{}", generated.plaintext);
    println!("id: {}", generated.key.id);
    println!("store: {}", path);
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
