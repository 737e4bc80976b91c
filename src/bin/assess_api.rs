use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use meatwise::{
    AssessmentPipeline, AssessmentRequest, AssessmentResponse, BibliographicSource, CacheStore,
    CrossrefSource, Lexicon, MemoryCache, OpenAiReasoner, PubMedSource, ReasoningService,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "meatwise-api",
    about = "HTTP API producing citation-backed health assessments for packaged meat products"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "MEATWISE_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// API key for the reasoning service.
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Base URL for OpenAI-compatible endpoints.
    #[arg(
        long,
        env = "MEATWISE_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    openai_base_url: String,

    /// Reasoning model identifier.
    #[arg(long, env = "MEATWISE_OPENAI_MODEL", default_value = "gpt-4o-mini")]
    openai_model: String,

    /// Sampling temperature for reasoning calls.
    #[arg(long, env = "MEATWISE_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Seconds before reasoning HTTP requests time out at the transport.
    #[arg(long, env = "MEATWISE_OPENAI_TIMEOUT_SECS", default_value_t = 60)]
    openai_timeout_secs: u64,

    /// Contact email sent to NCBI and Crossref as API etiquette.
    #[arg(long, env = "MEATWISE_CONTACT_EMAIL")]
    contact_email: Option<String>,

    /// Max cached entries across all cache tiers.
    #[arg(long, env = "MEATWISE_CACHE_CAPACITY", default_value_t = 4096)]
    cache_capacity: usize,

    /// Max requests per minute allowed (0 disables rate limiting).
    #[arg(long, default_value_t = 60)]
    max_requests_per_minute: u32,

    /// Rate-limit burst size (tokens available instantly).
    #[arg(long, default_value_t = 10)]
    rate_limit_burst: u32,

    #[command(flatten)]
    controls: meatwise::Cli,
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<AssessmentPipeline>,
    rate_limiter: Option<RateLimiter>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = ApiCli::parse();
    let controls = Arc::new(cli.controls.build_controls());
    let reasoning = Arc::new(OpenAiReasoner::new(
        cli.openai_api_key,
        cli.openai_base_url,
        cli.openai_model,
        cli.temperature,
        Duration::from_secs(cli.openai_timeout_secs.max(1)),
    )?) as Arc<dyn ReasoningService>;

    let source_timeout = controls.search_timeout.max(controls.verify_timeout);
    let sources: Vec<Arc<dyn BibliographicSource>> = vec![
        Arc::new(PubMedSource::new(source_timeout, cli.contact_email.clone())?),
        Arc::new(CrossrefSource::new(source_timeout, cli.contact_email)?),
    ];
    let cache = Arc::new(MemoryCache::new(cli.cache_capacity)) as Arc<dyn CacheStore>;

    let pipeline = Arc::new(AssessmentPipeline::new(
        reasoning,
        sources,
        cache,
        Arc::new(Lexicon::default()),
        controls,
    ));
    let state = AppState {
        pipeline,
        rate_limiter: RateLimiter::new(cli.max_requests_per_minute, cli.rate_limit_burst),
    };
    let app = Router::new()
        .route("/health", get(health))
        .route("/v1/assess", post(assess_handler))
        .with_state(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    info!("meatwise-api listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn assess_handler(
    State(state): State<AppState>,
    Json(request): Json<AssessmentRequest>,
) -> Result<Json<AssessmentResponse>, (StatusCode, Json<ErrorBody>)> {
    if let Some(limiter) = &state.rate_limiter {
        if !limiter.acquire().await {
            return Err((
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorBody {
                    message: "rate limit exceeded".to_string(),
                }),
            ));
        }
    }
    // The pipeline is infallible: downstream outages degrade the assessment
    // instead of failing the request, so every reply here is a 200.
    let response = state.pipeline.assess(&request).await;
    Ok(Json(response))
}

#[derive(Clone)]
struct RateLimiter {
    state: Arc<Mutex<RateState>>,
    capacity: f64,
    refill_per_sec: f64,
}

struct RateState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    fn new(max_per_minute: u32, burst: u32) -> Option<Self> {
        if max_per_minute == 0 || burst == 0 {
            return None;
        }
        let capacity = burst as f64;
        let refill_per_sec = max_per_minute as f64 / 60.0;
        Some(Self {
            state: Arc::new(Mutex::new(RateState {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            capacity,
            refill_per_sec,
        })
    }

    async fn acquire(&self) -> bool {
        let mut guard = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(guard.last_refill).as_secs_f64();
        guard.last_refill = now;
        guard.tokens = (guard.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
