use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use meatwise::{
    AssessmentPipeline, AssessmentRequest, BibliographicSource, CacheStore, CrossrefSource,
    Lexicon, MeatType, MemoryCache, OpenAiReasoner, ProductInput, PubMedSource, ReasoningService,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "meatwise",
    about = "One-shot health assessment for a packaged meat product"
)]
struct AssessCli {
    /// Path to a product JSON file; reads stdin when omitted.
    #[arg(long)]
    product: Option<PathBuf>,

    /// Meat category of the product.
    #[arg(long, value_enum, default_value_t = MeatType::Pork)]
    meat_type: MeatType,

    /// Emit the mobile projection instead of the full assessment.
    #[arg(long)]
    mobile: bool,

    /// Skip cache reads (fresh results are still written back).
    #[arg(long)]
    bypass_cache: bool,

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

    #[command(flatten)]
    controls: meatwise::Cli,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = AssessCli::parse();
    let product = read_product(cli.product.as_deref())?;
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
    let pipeline = AssessmentPipeline::new(
        reasoning,
        sources,
        Arc::new(MemoryCache::new(64)) as Arc<dyn CacheStore>,
        Arc::new(Lexicon::default()),
        controls,
    );

    let request = AssessmentRequest {
        product,
        meat_type: cli.meat_type,
        mobile: cli.mobile,
        bypass_cache: cli.bypass_cache,
    };
    let response = pipeline.assess(&request).await;
    let rendered =
        serde_json::to_string_pretty(&response).context("failed to render assessment")?;
    println!("{rendered}");
    Ok(())
}

fn read_product(path: Option<&std::path::Path>) -> Result<ProductInput> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read product JSON from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("product JSON did not match the expected shape")
}
