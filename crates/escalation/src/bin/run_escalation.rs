use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use escalation::{
    DecisionEngine, JsonlAuditSink, Metrics, Pipeline, PipelineConfig, ReportEmitter, RetryPolicy, RunSummary,
    TokenTracker, ollama_invoker,
};
use eval::ModeConfig;
use extract::Document;

#[derive(Parser, Debug)]
#[command(name = "run_escalation", about = "Run primary/understudy extraction over a batch of documents")]
struct Args {
    /// JSON array of {"document_id", "text"} objects
    #[arg(value_name = "DOCUMENTS")]
    documents: PathBuf,

    /// Mode config (thresholds, weights, run mode). Defaults to the production profile
    #[arg(short, long, value_name = "FILE")]
    mode: Option<PathBuf>,

    /// Pipeline config (models, concurrency, retries, audit dir)
    #[arg(short, long, value_name = "FILE")]
    pipeline: Option<PathBuf>,

    /// Where to write the run summary
    #[arg(short, long, default_value = "escalation_summary.json")]
    output: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mode_config = match &args.mode {
        Some(path) => ModeConfig::from_file(path)?,
        None => ModeConfig::production(),
    };
    let mut pipeline_config = match &args.pipeline {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    pipeline_config.apply_env_overrides()?;

    let json = std::fs::read_to_string(&args.documents)
        .with_context(|| format!("Failed to read documents: {}", args.documents.display()))?;
    let documents: Vec<Document> = serde_json::from_str(&json)
        .with_context(|| format!("Invalid documents file: {}", args.documents.display()))?;

    let run_id = Uuid::new_v4();
    let sink = JsonlAuditSink::open(&pipeline_config.audit.dir, run_id).await?;
    info!(
        run_id = %run_id,
        mode = mode_config.mode.name(),
        audit = %sink.path().display(),
        documents = documents.len(),
        "Run configured"
    );

    let engine = DecisionEngine::new(
        ollama_invoker(&pipeline_config),
        mode_config,
        ReportEmitter::new(run_id, Arc::new(sink)),
    )
    .with_retry(RetryPolicy::from_config(&pipeline_config.retry))
    .with_tracker(Arc::new(
        TokenTracker::new(pipeline_config.costs).with_max_documents(pipeline_config.usage.max_tracked_documents),
    ))
    .with_metrics(Arc::new(Metrics::new()));

    let pipeline = Pipeline::new(
        Arc::new(engine),
        pipeline_config.concurrency.max_concurrent_documents,
    )
    .with_run_timeout(pipeline_config.run_timeout());

    let results = pipeline.run(documents).await?;
    let summary = pipeline.summarize(&results);
    print_summary(&summary);

    let output = serde_json::json!({
        "summary": summary,
        "metrics": pipeline.engine().metrics().snapshot(),
        "documents": results,
    });
    std::fs::write(&args.output, serde_json::to_string_pretty(&output)?)
        .with_context(|| format!("Failed to write summary: {}", args.output.display()))?;
    println!("\nSummary saved to {}", args.output.display());

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== RUN {} ({}) ===\n", summary.run_id, summary.mode);
    println!("  Documents:           {}", summary.documents);
    println!("  Accepted (primary):  {}", summary.accepted_primary);
    println!("  Accepted (understudy): {}", summary.accepted_understudy);
    println!("  Rejected:            {}", summary.rejected);
    println!("  Escalation failed:   {}", summary.escalation_failed);
    println!("  Errors:              {}", summary.errors);
    println!("  Skipped:             {}", summary.skipped);
    println!("  Escalation rate:     {:.1}%", summary.escalation_rate * 100.0);
    println!("  Tokens:              {}", summary.usage.total_tokens);
}
