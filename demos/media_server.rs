use std::env;
use std::sync::Arc;

use actix_web::{App, HttpResponse, HttpServer, Responder};
use conclave::config::{MediaConfig, ServerConfig};
use conclave::engine::MediaEngine;
use conclave::gateway::SignalingGateway;
use conclave::loopback::LoopbackEngine;
use conclave::registry::RoomRegistry;
use conclave::session::SessionTable;
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let engine = LoopbackEngine::new();
    let registry = RoomRegistry::new(engine.clone(), MediaConfig::default());
    let sessions = Arc::new(SessionTable::new());
    let gateway = SignalingGateway::new(registry, sessions);

    // Engine death is fatal. Give in-flight error replies a moment to drain,
    // then let the supervisor restart the whole process.
    let server_config = ServerConfig::default();
    tokio::spawn(async move {
        engine.died().await;
        tracing::error!("media engine died, shutting down");
        tokio::time::sleep(server_config.engine_exit_grace).await;
        std::process::exit(1);
    });

    let port = env::var("PORT").unwrap_or_else(|_| "4000".to_string());

    HttpServer::new(move || {
        App::new()
            .service(index)
            .configure(|cfg| gateway.clone().configure(cfg))
    })
    .bind(format!("0.0.0.0:{}", port))?
    .run()
    .await
}

#[actix_web::get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body("healthy")
}
