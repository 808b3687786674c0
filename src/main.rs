use adinsight::api::{AskRequest, InsightApi};
use adinsight::composer::AnswerComposer;
use adinsight::executor::QueryExecutor;
use adinsight::knowledge::KnowledgeCorpus;
use adinsight::llm::{LlmBackend, LlmRouter, OpenAiBackend};
use adinsight::pipeline::{AskOutcome, AskPipeline, AskSession, ModeFlags};
use adinsight::store::CampaignStore;
use adinsight::translator::QueryTranslator;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "adinsight")]
#[command(about = "Ask natural-language questions about advertising-campaign data")]
struct Args {
    /// The question in natural language
    question: String,

    /// Path to the campaign records CSV
    #[arg(short, long, default_value = "data/campaigns.csv")]
    data: PathBuf,

    /// Optional knowledge corpus (JSON array of passages)
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Ground the answer with passages from the knowledge corpus
    #[arg(long)]
    use_external_knowledge: bool,

    /// OpenAI-compatible API key (or set OPENAI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Chat model ids, primary first; fallbacks follow in order
    #[arg(long, default_values_t = vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()])]
    models: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("question: {}", args.question);

    let store = CampaignStore::from_csv(&args.data)?;
    let description = store.catalog().describe();
    info!(
        "catalog: {} dimensions, {} metrics",
        description.dimensions.len(),
        description.metrics.len()
    );

    let api_key = args
        .api_key
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_default();
    let base_url = std::env::var("OPENAI_BASE_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

    let backends: Vec<Arc<dyn LlmBackend>> = args
        .models
        .iter()
        .map(|model| {
            Arc::new(OpenAiBackend::new(
                model,
                api_key.clone(),
                base_url.clone(),
                model.clone(),
            )) as Arc<dyn LlmBackend>
        })
        .collect();
    let router = LlmRouter::new(backends);

    let mut pipeline = AskPipeline::new(
        QueryTranslator::new(router.clone()),
        QueryExecutor::new(store.clone()),
        AnswerComposer::new(router),
    );
    if let Some(ref corpus_path) = args.corpus {
        pipeline = pipeline.with_corpus(KnowledgeCorpus::from_json_file(corpus_path)?);
    }

    let api = InsightApi::new(AskSession::new(pipeline), store);
    let outcome = api
        .ask(AskRequest {
            question: args.question,
            mode_flags: ModeFlags {
                use_external_knowledge: args.use_external_knowledge,
            },
        })
        .await?;

    match outcome {
        AskOutcome::Answered(response) => {
            println!("\n{}", response.answer);
            if let Some(query) = response.supporting_query {
                println!("\nSupporting query: {}", serde_json::to_string_pretty(&query)?);
            }
            println!("Executed in {}ms", response.execution_time_ms);
        }
        AskOutcome::NeedsClarification { prompts } => {
            println!("\nI need a bit more detail:");
            for prompt in prompts {
                println!("  - {}", prompt);
            }
        }
        AskOutcome::Rejected { reason, hint } => {
            println!("\nQuery rejected: {}", reason);
            if let Some(hint) = hint {
                println!("Did you mean '{}'?", hint);
            }
        }
        AskOutcome::Superseded => {
            println!("\nSuperseded by a newer question.");
        }
    }

    Ok(())
}
