use std::net::SocketAddr;
use std::sync::Arc;

use chatbot_server::{app, config::RUNTIME_ADDR_ENV, logging, AppState, Config, OllamaRuntime, SqliteUserStore};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::args().any(|a| a == "--version" || a == "-V") {
        println!("chatbot-server {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // A missing .env file is fine
    dotenv::dotenv().ok();

    let config = Config::load().map_err(|e| {
        format!(
            "Failed to load configuration: {} (is CHATBOT__AUTH__JWT_SECRET set?)",
            e
        )
    })?;

    logging::init_tracing(&config.logging.level);

    tracing::info!("Starting chatbot server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Model runtime at {} (override with {})",
        config.runtime.base_url,
        RUNTIME_ADDR_ENV
    );

    let runtime = Arc::new(OllamaRuntime::new(&config.runtime)?);
    let users = Arc::new(SqliteUserStore::new(&config.database.path)?);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, runtime, users));
    let app = app(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
