// define modules in crate
mod auth;
mod config;
mod cqrs;
mod domain;
mod dtos;
mod error;
mod events;
mod extract;
mod metrics;
mod repositories;
mod routes;
mod state;
mod uow;

use std::{
    env,
    error::Error,
    fs::File,
    sync::{Arc, Mutex},
};

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use config::Config;
use dotenv::dotenv;
use events::{LoggingMessageBroker, MessageBroker, RabbitMqInitializationInfo, RabbitMqMessageBroker};
use metrics::BusinessMetrics;
use mongodb::Client;
use repositories::MongoDbInitializationInfo;
use state::AppState;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{event, Level};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

use crate::{auth::TokenService, uow::RepositoryContext};

#[tokio::main]
async fn main() {
    dotenv().ok();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run().await {
        event!(Level::ERROR, "Server stopped: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing() -> Result<(), Box<dyn Error>> {
    let writer = match env::var("LOG_PATH") {
        Ok(path) if !path.trim().is_empty() => BoxMakeWriter::new(Mutex::new(File::create(path)?)),
        _ => BoxMakeWriter::new(std::io::stdout),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false)
        .json()
        .with_file(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_writer(writer)
        .init();

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;

    let message_broker: Arc<dyn MessageBroker> = match &config.rabbitmq {
        Some(rabbitmq) => Arc::new(
            RabbitMqMessageBroker::new(RabbitMqInitializationInfo::new(
                rabbitmq.uri.clone(),
                rabbitmq.port,
                rabbitmq.username.clone(),
                rabbitmq.password.clone(),
            ))
            .await?,
        ),
        None => {
            event!(Level::WARN, "RABBITMQ_URI not set, events will only be logged");
            Arc::new(LoggingMessageBroker)
        }
    };

    let repositories = match &config.mongodb_uri {
        Some(uri) => {
            let info = MongoDbInitializationInfo {
                uri: uri.clone(),
                database: config.mongodb_db.clone(),
            };
            let client = Client::with_uri_str(&info.uri).await?;
            RepositoryContext::mongodb(&info, &client, message_broker).await?
        }
        None => {
            event!(Level::WARN, "MONGODB_URI not set, using in-memory storage");
            RepositoryContext::in_memory(message_broker)
        }
    };
    let repositories = Arc::new(repositories);

    if let Some(admin) = &config.admin {
        cqrs::auth::ensure_admin(&repositories, admin).await?;
    }

    let business_metrics = Arc::new(BusinessMetrics::new()?);
    let token_service = Arc::new(TokenService::new(
        &config.jwt_secret,
        config.access_token_ttl_secs,
        config.refresh_token_ttl_secs,
    ));
    let state = Arc::new(AppState::new(repositories, token_service, business_metrics.clone()));

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();

    let app = routes::create_router(state)
        .route(
            "/metrics",
            get(move || async move { format!("{}{}", metrics_handle.render(), business_metrics.render()) }),
        )
        .layer(prometheus_layer)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    event!(Level::INFO, "Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            event!(Level::WARN, "Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        event!(Level::INFO, "Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                event!(Level::INFO, "Received terminate signal, shutting down");
            }
            Err(e) => {
                event!(Level::WARN, "Failed to install terminate handler: {}", e);
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
}
