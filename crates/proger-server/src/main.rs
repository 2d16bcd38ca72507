use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use lm_client::LmClient;
use proger_server::config::Config;
use proger_server::sandbox::Sandbox;
use proger_server::{AppStateInner, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proger=debug,lm_client=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("Sandbox mode: {:?}, LLM endpoint: {}", config.sandbox, config.lm.api_url);

    let lm = LmClient::new(config.lm.clone())?;
    let state = AppStateInner::new(Sandbox::new(config.sandbox), lm);

    let origins = config
        .cors_origins
        .iter()
        .map(|o| HeaderValue::from_str(o))
        .collect::<Result<Vec<_>, _>>()?;
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = router(state).layer(cors).layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Proger backend listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
