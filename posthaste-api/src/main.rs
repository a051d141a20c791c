use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{CONTENT_TYPE, InvalidHeaderValue},
    },
};
use config::{Env, MissingSettingError};
use posthaste_broker::client::{BrokerClient, BrokerError};
use posthaste_storage::{
    backend::OpendalStore,
    client::{StorageClient, StorageError},
};
use server::ServerState;
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error(transparent)]
    MissingSetting(#[from] MissingSettingError),
    #[error("Invalid CORS origin: {0}")]
    CorsOrigin(#[from] InvalidHeaderValue),
    #[error("Error setting up the broker client: {0}")]
    Broker(#[from] BrokerError),
    #[error("Error setting up asset storage: {0}")]
    Storage(#[from] StorageError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "posthaste_api=debug,\
                posthaste_broker=debug,\
                posthaste_storage=debug,\
                tower_http=debug,axum::rejection=trace,async_nats=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer, InitError> {
    let origins = origins
        .iter()
        .map(|origin| HeaderValue::from_str(origin))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let broker = BrokerClient::from_config(&env.broker_config())?;
    if let Err(err) = broker.check().await {
        warn!(error = %err, "Broker is not reachable yet, requests will retry on demand");
    }

    let store = OpendalStore::new(&env.backend_config()?, env.storage_public_url.clone())?;
    let storage = StorageClient::new(Arc::new(store), env.storage_timeout());

    let state = ServerState { broker, storage };
    let app: Router = server::router(state, env.max_upload_bytes)
        .layer(cors_layer(&env.cors_origins)?)
        .layer(TraceLayer::new_for_http());

    let server_address = SocketAddr::new(env.server_address, env.port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
