use std::sync::Arc;

use chatter::{
    chat::Broadcaster,
    config::Config,
    domain::Registry,
    gateway,
    message::{HistoryStore, InMemoryStore, SqliteStore},
    AppState,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.json_logs);

    let history: Arc<dyn HistoryStore> = match &config.database_url {
        Some(url) => {
            tracing::info!(url = %url, "keeping history in sqlite");
            Arc::new(SqliteStore::connect(url, config.db_max_connections).await?)
        }
        None => Arc::new(InMemoryStore::new()),
    };
    let registry = Arc::new(Registry::new());

    let cancel = CancellationToken::new();
    let (broadcaster, broadcaster_handle) = Broadcaster::new(registry.clone(), history.clone());
    let broadcaster_task = tokio::spawn(broadcaster.run(cancel.clone()));

    let app = gateway::app(AppState {
        registry,
        history,
        broadcaster: broadcaster_handle,
    });

    let listener = tokio::net::TcpListener::bind(config.addr()).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    tokio::spawn(shutdown_signal(cancel.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    cancel.cancel();
    broadcaster_task.await?;
    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chatter=info,tower_http=info"));

    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
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
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
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

    tracing::info!("shutting server down");
    cancel.cancel();
}
