use parley_ai::{
    AudioSessionBridge, GatewayConfig, GeminiBackend, GeminiConfig, GeminiLiveConfig,
    GeminiLiveConnector, GenerationGateway,
};
use parley_conversation::{AudioPersistence, ConversationOrchestrator, OrchestratorConfig};
use parley_core::OwnerId;
use parley_server::{
    config::ServerConfig,
    db::PgConversationStore,
    routes::{self, AppState},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let owner = OwnerId::new(&config.chat.default_owner).expect("invalid CHAT__DEFAULT_OWNER");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let ai = config.ai;
    let backend = GeminiBackend::new(
        GeminiConfig::new(&ai.api_key)
            .with_base_url(&ai.base_url)
            .with_model(&ai.text_model),
    );
    let connector = GeminiLiveConnector::new(GeminiLiveConfig::new(&ai.api_key).with_url(&ai.live_url));
    let bridge = AudioSessionBridge::new(Arc::new(connector)).with_buffer(ai.audio_buffer);
    let gateway = GenerationGateway::new(
        Arc::new(backend),
        bridge,
        GatewayConfig {
            system_prompt: config.chat.system_prompt,
            audio_model: ai.audio_model,
            voice: ai.voice,
        },
    );
    tracing::info!(model = %ai.text_model, "Generation gateway ready");

    let audio_persistence = if config.chat.persist_audio {
        AudioPersistence::Persist
    } else {
        AudioPersistence::Discard
    };
    let orchestrator = ConversationOrchestrator::new(
        PgConversationStore::new(db_pool),
        gateway,
        OrchestratorConfig {
            audio_persistence,
            audio_buffer: ai.audio_buffer,
        },
    );

    let app = routes::router(Arc::new(AppState::new(orchestrator, owner)))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
