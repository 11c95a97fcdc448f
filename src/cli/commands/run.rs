//! Run command - execute the server in the foreground

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::auth::{AuthPolicy, Policy, PolicyKind};
use crate::cli::args::RunArgs;
use crate::config::{Config, ServerSettings, load_config_or_default};
use crate::keys::{load_authorized_keys, load_or_generate_host_key};
use crate::logging::AuditLog;
use crate::session::{ConnectionHandler, Server, SessionContext, SessionRegistry};
use crate::transport::{RusshTransport, TransportOptions};

/// Execute the run command
pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config_file =
        load_config_or_default(config_path.as_deref()).context("Failed to load configuration")?;
    match &config_file.source {
        Some(path) => info!(path = %path.display(), "Using configuration file"),
        None => info!("No configuration file found, using defaults"),
    }

    let mut config = config_file.config;
    apply_overrides(&args, &mut config);
    let settings = config.resolve().context("Invalid configuration")?;

    serve(settings).await
}

/// Apply command line flags on top of the configuration file
fn apply_overrides(args: &RunArgs, config: &mut Config) {
    if let Some(address) = &args.address {
        config.address = address.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host_key) = &args.host_key {
        config.host_key = host_key.to_string_lossy().into_owned();
    }
    if let Some(policy) = &args.policy {
        config.auth.policy = policy.clone();
    }
    if let Some(path) = &args.authorized_keys {
        config.auth.authorized_keys = Some(path.to_string_lossy().into_owned());
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }
    if let Some(log) = &args.log {
        config.log_path = Some(log.to_string_lossy().into_owned());
    }
}

/// Bind, serve until a shutdown signal, then drain active connections
async fn serve(settings: ServerSettings) -> Result<()> {
    let audit = Arc::new(match &settings.log_path {
        Some(path) => {
            info!(log = %path.display(), "JSONL audit logging enabled");
            AuditLog::open(path)?
        }
        None => AuditLog::disabled(),
    });

    let host_key = load_or_generate_host_key(&settings.host_key)?;
    let keys = load_authorized_keys(&settings.auth)?;

    if settings.auth.policy.is_insecure() {
        warn!(
            policy = %settings.auth.policy,
            "Authentication policy accepts any credential. Do not expose this server."
        );
    }
    if settings.auth.policy == PolicyKind::PublicKeyOnly && keys.is_empty() {
        warn!("No authorized keys configured, every login will be rejected");
    }

    let policy: Arc<dyn AuthPolicy> = Arc::new(Policy::new(settings.auth.policy, keys));
    let transport = Arc::new(RusshTransport::new(
        host_key,
        Arc::clone(&policy),
        &TransportOptions {
            methods: policy.advertised_methods(),
            max_auth_attempts: settings.session.max_auth_attempts,
            ..TransportOptions::default()
        },
    ));

    let server = Server::bind(settings.listen, settings.max_connections).await?;
    let registry = Arc::new(SessionRegistry::new());
    let ctx = Arc::new(SessionContext::new(
        settings.session.clone(),
        server.local_addr(),
        policy,
        Arc::clone(&registry),
        Arc::clone(&audit),
    ));
    let handler = ConnectionHandler::new(ctx);

    // Whatever path leaves this function, no connection task outlives it
    let _abort_on_exit = scopeguard::guard(Arc::clone(&registry), |registry| {
        registry.abort_all();
    });

    let mut signals = ShutdownSignals::install()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        let name = signals.recv().await;
        info!(signal = name, "Received shutdown signal, stopping...");
        let _ = shutdown_tx.send(true);

        let name = signals.recv().await;
        warn!(signal = name, "Received second signal, closing active connections");
        signal_registry.abort_all();
    });

    info!(
        addr = %server.local_addr(),
        policy = %settings.auth.policy,
        max_connections = settings.max_connections,
        "echo-sshd started. Press Ctrl+C to stop."
    );

    server.run(transport, handler, shutdown_rx).await?;

    if !registry.is_empty() {
        info!(
            active = registry.len(),
            "Waiting for active connections to finish (signal again to force)"
        );
        registry.wait_empty().await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// SIGINT and SIGTERM
struct ShutdownSignals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let terminate =
                signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
            Ok(Self { terminate })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next signal and return its name
    async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = self.terminate.recv() => "SIGTERM",
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            "Ctrl-C"
        }
    }
}
