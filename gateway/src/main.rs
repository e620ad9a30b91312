//! Binary entry point: wire the listeners together and run until
//! shutdown.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gymgate::config::Config;
use gymgate::credentials::CredentialStore;
use gymgate::hub;
use gymgate::proxy::ReverseProxyGate;
use gymgate::routes::{create_router, AppState};
use gymgate::session::{self, SessionRegistry};
use gymgate::ws::create_ws_router;
use gymgate::{bridge, routes};

/// Attempts for the bounded bind retry, two seconds apart.
const BIND_ATTEMPTS: u32 = 5;
const BIND_BACKOFF: Duration = Duration::from_secs(2);

/// Interval for the background session sweep.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Binds a listener with bounded retry. Ports freed by a restarting
/// predecessor need a moment to leave TIME_WAIT.
async fn bind_with_retry(port: u16, what: &str) -> std::io::Result<TcpListener> {
    let addr = ("0.0.0.0", port);
    let mut last_err = None;
    for attempt in 1..=BIND_ATTEMPTS {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(port, what, "listener bound");
                return Ok(listener);
            }
            Err(err) => {
                warn!(port, what, attempt, error = %err, "bind failed, retrying");
                last_err = Some(err);
                tokio::time::sleep(BIND_BACKOFF).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| std::io::Error::other("bind retries exhausted")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("configuration error: {err}");
            eprintln!("check the GYMGATE_* environment variables and try again");
            return ExitCode::FAILURE;
        }
    };

    let credentials = Arc::new(CredentialStore::new(config.credential_file.clone()));
    if !credentials.is_configured() {
        info!(path = %credentials.path().display(), "no credential found, setup flow active");
    }
    let sessions = Arc::new(SessionRegistry::new(config.session_ttl));

    let (hub, hub_task) = hub::spawn();

    // The event bridge runs on its own blocking thread; a bind failure
    // here is fatal like any other listener.
    let (bridge_addr, _bridge_thread) = match bridge::spawn(config.event_port, hub.clone()) {
        Ok(spawned) => spawned,
        Err(err) => {
            error!(port = config.event_port, error = %err, "event bridge failed to bind");
            return ExitCode::FAILURE;
        }
    };
    info!(addr = %bridge_addr, "event bridge ready");

    let state = AppState {
        config: Arc::clone(&config),
        credentials: Arc::clone(&credentials),
        sessions: Arc::clone(&sessions),
        hub: hub.clone(),
    };

    let http_listener = match bind_with_retry(config.http_port, "http gate").await {
        Ok(listener) => listener,
        Err(err) => {
            error!(port = config.http_port, error = %err, "http gate failed to bind");
            return ExitCode::FAILURE;
        }
    };
    let ws_listener = match bind_with_retry(config.ws_port, "websocket").await {
        Ok(listener) => listener,
        Err(err) => {
            error!(port = config.ws_port, error = %err, "websocket failed to bind");
            return ExitCode::FAILURE;
        }
    };
    let proxy_listener = match bind_with_retry(config.proxy_port, "proxy gate").await {
        Ok(listener) => listener,
        Err(err) => {
            error!(port = config.proxy_port, error = %err, "proxy gate failed to bind");
            return ExitCode::FAILURE;
        }
    };

    let cleanup_task = session::spawn_cleanup_task(Arc::clone(&sessions), SESSION_SWEEP_INTERVAL);

    let ws_task = {
        let router = create_ws_router(state.clone());
        tokio::spawn(async move {
            if let Err(err) = axum::serve(ws_listener, router).await {
                error!(error = %err, "websocket server exited");
            }
        })
    };

    let proxy_task = {
        let gate = Arc::new(ReverseProxyGate::new(
            Arc::clone(&credentials),
            config.upstream.clone(),
        ));
        tokio::spawn(gate.run(proxy_listener))
    };

    info!(
        http_port = config.http_port,
        ws_port = config.ws_port,
        proxy_port = config.proxy_port,
        upstream = %config.upstream,
        entry_page = routes::ENTRY_PAGE,
        "gymgate running"
    );

    let router = create_router(state);
    if let Err(err) = axum::serve(http_listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %err, "http gate exited with error");
        return ExitCode::FAILURE;
    }

    ws_task.abort();
    proxy_task.abort();
    cleanup_task.abort();
    hub_task.abort();
    info!("gymgate stopped");
    ExitCode::SUCCESS
}
