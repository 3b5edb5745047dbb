use raifbot::{
    agent::{AgentProvider, RagProvider, ScriptedAgent},
    api::{start_server, AppState},
    config::Settings,
    history::build_store,
    llm::http_client,
    Relay,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const OFFLINE_REPLY: [&str; 3] = [
    "RaifBot is running without an OpenAI key. ",
    "Set OPENAI_API_KEY or call /update_api_key_and_openai_model/ ",
    "to enable real answers.",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load environment variables
    let settings = Settings::from_env();

    info!("🚀 RaifBot - API Server");
    info!("📍 Port: {}", settings.port);

    let store = build_store(settings.database_url.as_deref());

    let provider: Arc<dyn AgentProvider> =
        Arc::new(RagProvider::new(http_client(), settings.clone()));

    let relay = if settings.has_llm_credential() {
        Relay::new(
            provider,
            &settings.openai_api_key,
            &settings.llm_name,
            settings.agent_timeout,
        )?
    } else {
        warn!("⚠️  OPENAI_API_KEY not set in .env, answering with the offline agent");
        let offline = ScriptedAgent::new(
            settings.llm_name.clone(),
            OFFLINE_REPLY.iter().map(|s| s.to_string()).collect(),
        );
        Relay::with_initial_agent(
            provider,
            Arc::new(offline),
            &settings.openai_api_key,
            &settings.llm_name,
            settings.agent_timeout,
        )
    };

    info!(model = %settings.llm_name, "✅ Relay initialized");
    info!("📡 Starting API server...");

    start_server(AppState::new(store, Arc::new(relay)), settings.port).await?;

    Ok(())
}
