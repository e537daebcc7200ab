use diligence_engine::{
    agents::create_default_registry,
    api::start_server,
    config::Settings,
    events::ProgressChannel,
    jobs::JobManager,
    llm::{GeminiClient, LlmRouter, OpenAiClient, StubLlm},
    providers::{
        FilingsProvider, HttpFilings, HttpMarketData, HttpSearch, MarketDataProvider,
        StubFilings, StubMarketData, WebSearchProvider,
    },
    scheduler::{Collaborators, Orchestrator},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn build_llm(settings: &Settings) -> LlmRouter {
    let router = match (&settings.gemini_api_key, &settings.openai_api_key) {
        (Some(gemini), Some(openai)) => {
            LlmRouter::new(Arc::new(GeminiClient::new(gemini.clone())))
                .with_fallback(Arc::new(OpenAiClient::new(openai.clone())))
        }
        (Some(gemini), None) => {
            warn!("no fallback LLM configured; running on the primary provider only");
            LlmRouter::new(Arc::new(GeminiClient::new(gemini.clone())))
        }
        (None, Some(openai)) => {
            warn!("no primary LLM configured; promoting OpenAI to primary");
            LlmRouter::new(Arc::new(OpenAiClient::new(openai.clone())))
        }
        (None, None) => {
            warn!("no LLM credentials; using the stub client (dev mode)");
            LlmRouter::new(Arc::new(StubLlm::succeeding(
                "stub-primary",
                "Stubbed diligence narrative.",
            )))
        }
    };

    router.with_fallback_timeout(settings.llm_fallback_timeout)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    dotenv::dotenv().ok();
    let settings = Settings::from_env();

    info!("M&A Due-Diligence Engine - API Server");
    info!("Port: {}", settings.port);

    let market: Arc<dyn MarketDataProvider> = match (
        &settings.market_data_base_url,
        &settings.market_data_api_key,
    ) {
        (Some(url), Some(key)) => Arc::new(HttpMarketData::new(url.clone(), key.clone())),
        _ => {
            warn!("no market data credentials; using the stub provider (dev mode)");
            Arc::new(StubMarketData::new())
        }
    };

    let filings: Arc<dyn FilingsProvider> = match &settings.filings_base_url {
        Some(url) => Arc::new(HttpFilings::new(url.clone())),
        None => {
            warn!("no filings endpoint; using the stub provider (dev mode)");
            Arc::new(StubFilings)
        }
    };

    let search: Option<Arc<dyn WebSearchProvider>> =
        match (&settings.search_base_url, &settings.search_api_key) {
            (Some(url), Some(key)) => Some(Arc::new(HttpSearch::new(url.clone(), key.clone()))),
            _ => None,
        };

    let collaborators = Collaborators {
        llm: Arc::new(build_llm(&settings)),
        market,
        filings,
        search,
    };

    let jobs = Arc::new(JobManager::from_database_url(
        settings.database_url.as_deref(),
    ));
    let events = Arc::new(ProgressChannel::new());

    let registry = create_default_registry();
    registry.validate()?;
    let agent_count = registry.len();

    let orchestrator = Arc::new(Orchestrator::new(
        registry,
        collaborators,
        jobs,
        events,
        settings.clone(),
    ));

    info!("orchestrator initialized with {} agents", agent_count);
    start_server(orchestrator, settings.port).await?;

    Ok(())
}
