use chapter_gate::config::Config;
use chapter_gate::logging::init_tracing;
use chapter_gate::state::AppState;
use chapter_gate::{build_app, seed};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log_level);

    let state = match AppState::from_config(&config).await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "failed to initialise application state");
            std::process::exit(1);
        }
    };

    seed::seed_from_config(&state, &config).await;

    let app = build_app(state);

    let addr = config.bind_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%addr, error = %err, "bind listener failed");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, backend = config.store_backend.as_str(), "chapter-gate listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
    }

    tracing::info!("graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
