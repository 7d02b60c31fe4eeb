use crownex::application::auto_trader::spawn_daily_reset;
use crownex::application::gateway::Gateway;
use crownex::application::reconciler::FillReconciler;
use crownex::auth::AuthService;
use crownex::config::ServerConfig;
use crownex::infrastructure::key_vault::KeyVault;
use crownex::persistence::Store;
use crownex::server::{router, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const TICKER_INTERVAL: Duration = Duration::from_secs(5);
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crownex=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;

    // AEAD key setup is fatal on failure, same as the store below.
    let vault = Arc::new(match &config.encryption_key_hex {
        Some(hex) => KeyVault::from_key_hex(hex)?,
        None => KeyVault::from_password(&config.vault_password, &config.vault_salt)?,
    });

    let store = Store::open(&config.db_path).await?;
    let gateway = Gateway::bootstrap(store.clone(), vault).await?;
    let auth = AuthService::new(store.clone(), &config.jwt_secret);

    // Background tasks: synthetic DEX ticker, midnight counter reset, fill
    // reconciliation, session expiry sweep.
    let ticker_gateway = gateway.clone();
    let ticker = tokio::spawn(async move {
        loop {
            tokio::time::sleep(TICKER_INTERVAL).await;
            ticker_gateway.dex_tick().await;
        }
    });
    let daily_reset = spawn_daily_reset(gateway.clone());
    let reconciler = FillReconciler::new(gateway.clone()).spawn();
    let sweep_auth = auth.clone();
    let session_sweep = tokio::spawn(async move {
        loop {
            tokio::time::sleep(SESSION_SWEEP_INTERVAL).await;
            if let Err(e) = sweep_auth.sweep_sessions().await {
                error!(error = %e, "session sweep failed");
            }
        }
    });

    let state = AppState {
        gateway: gateway.clone(),
        auth,
    };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_signal = async {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started. Press Ctrl+C to stop.");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Shutting down...");
    ticker.abort();
    daily_reset.abort();
    reconciler.abort();
    session_sweep.abort();

    // Best-effort flush, then close the store.
    gateway.flush_pools().await;
    store.close().await;
    info!("Shutdown complete");
    Ok(())
}
