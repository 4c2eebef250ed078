use std::sync::Arc;

use arogya::channels::{MediaSource, OutboundSender, WhatsAppChannel};
use arogya::config::Config;
use arogya::pipeline::Orchestrator;
use arogya::provider::{GeminiProvider, GroqProvider, ModelProvider, ProviderChain};
use arogya::server::{self, AppState};
use arogya::store::{ConversationStore, LibSqlStore};
use arogya::sweep::{ReminderSweep, spawn_sweep_task};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  Required: GEMINI_API_KEY, WHATSAPP_ACCESS_TOKEN,");
        eprintln!("            WHATSAPP_PHONE_NUMBER_ID, VERIFY_TOKEN");
        std::process::exit(1);
    });

    eprintln!("🩺 Arogya v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Primary models: {}", config.gemini_models.join(", "));
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook", config.port);

    run(config).await?;
    Ok(())
}

async fn run(config: Config) -> arogya::Result<()> {
    // ── Database ─────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let store: Arc<dyn ConversationStore> = Arc::new(LibSqlStore::new_local(db_path).await?);

    // ── Provider chain ───────────────────────────────────────────────
    let primaries: Vec<Arc<dyn ModelProvider>> = config
        .gemini_models
        .iter()
        .map(|model| {
            Arc::new(GeminiProvider::new(config.gemini_api_key.clone(), model))
                as Arc<dyn ModelProvider>
        })
        .collect();

    let fallback: Option<Arc<dyn ModelProvider>> = match config.groq_api_key.clone() {
        Some(key) => Some(Arc::new(GroqProvider::new(key, config.groq_model.clone()))),
        None => {
            tracing::warn!("GROQ_API_KEY not set, running without a fallback provider");
            None
        }
    };
    let chain = Arc::new(ProviderChain::new(primaries, fallback));

    // ── WhatsApp channel ─────────────────────────────────────────────
    let whatsapp = Arc::new(WhatsAppChannel::new(
        config.whatsapp_token.clone(),
        config.whatsapp_phone_id.clone(),
    ));
    // Logged, not fatal: a token that expires later fails the same way.
    if let Err(e) = whatsapp.validate_token().await {
        tracing::error!(error = %e, "WhatsApp credential check failed");
    } else {
        tracing::info!("WhatsApp credentials verified");
    }
    let sender: Arc<dyn OutboundSender> = whatsapp.clone();
    let media: Arc<dyn MediaSource> = whatsapp.clone();

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        chain,
        Arc::clone(&sender),
        media,
        config.history_limit,
    ));

    // ── Reminder sweep ───────────────────────────────────────────────
    let sweep = Arc::new(ReminderSweep::new(Arc::clone(&store), sender));
    let _sweep_task = spawn_sweep_task(sweep, config.sweep_interval);
    tracing::info!(every_secs = config.sweep_interval.as_secs(), "Reminder sweep started");

    // ── HTTP server ──────────────────────────────────────────────────
    let app = server::router(AppState {
        orchestrator,
        verify_token: Arc::new(config.verify_token.clone()),
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Webhook server started");
    axum::serve(listener, app).await?;

    Ok(())
}
