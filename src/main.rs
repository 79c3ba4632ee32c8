use std::time::Duration;

use idstore::{
    app::{build_app, serve},
    config::{AppConfig, LogFormat, LoggerConfig},
    db::BackendRegistry,
    state::AppState,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(&config.logger);
    tracing::info!("logger initialized");

    let registry = BackendRegistry::builtin();
    tracing::info!(
        backend = %config.database.backend,
        available = ?registry.tags(),
        "initializing database connection"
    );
    let app_state = AppState::init(config, &registry).await?;

    let app = build_app(app_state.clone());
    let served = serve(app, &app_state.config.server, shutdown_signal()).await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "server error");
    }

    tracing::info!("closing database connection");
    match tokio::time::timeout(SHUTDOWN_GRACE, app_state.store.close()).await {
        Ok(Ok(())) => tracing::info!("application shutdown complete"),
        Ok(Err(e)) => tracing::error!(error = %e, "failed to close database connection"),
        Err(_) => tracing::error!("database close exceeded the shutdown grace period"),
    }

    served
}

fn init_tracing(logger: &LoggerConfig) {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        format!(
            "idstore={level},tower_http={level},sqlx=warn",
            level = logger.level
        )
    });

    match logger.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(env_filter).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
    tracing::info!("received shutdown signal, starting graceful shutdown");
}
