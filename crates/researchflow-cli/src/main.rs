use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use researchflow_core::agents::demo::{demo_agents, is_demo_mode_allowed};
use researchflow_core::agents::llm::build_agents;
use researchflow_core::{
    Config, ConfigLoader, Query, ResearchPipeline, ResearchResult, StreamEvent, TelemetryOptions,
    init_telemetry, load_queries, metrics, run_batch,
};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "researchflow",
    version,
    about = "Plan, gather, synthesize and verify research with LLM agents"
)]
struct Cli {
    /// Path to a TOML config file (defaults to $RESEARCHFLOW_CONFIG, then ./researchflow.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Research a single query.
    Run(RunArgs),
    /// Research every query in a dataset and summarise the outcome.
    Batch(BatchArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Question to research (1-1000 characters).
    query: String,

    /// Write the full result as JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Use canned fixture agents instead of calling an LLM provider.
    #[arg(long)]
    demo: bool,

    /// Print progress events while the run is in flight.
    #[arg(long)]
    stream: bool,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Dataset file: JSON array of {id, query, category} or one query per line.
    #[arg(long)]
    queries: PathBuf,

    /// Where to write the batch summary.
    #[arg(long, default_value = "batch-summary.json")]
    output: PathBuf,

    /// Directory receiving one JSON file per successful query.
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Identifier recorded in the summary (random when omitted).
    #[arg(long)]
    run_id: Option<String>,

    /// Use canned fixture agents instead of calling an LLM provider.
    #[arg(long)]
    demo: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load(cli.config.clone())?;

    init_telemetry(TelemetryOptions::from(&config.logging))?;
    metrics::init_metrics_from_env("researchflow-cli");

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(&config, args).await?,
            Command::Batch(args) => batch_command(&config, args).await?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn build_pipeline(config: &Config, demo: bool) -> Result<ResearchPipeline> {
    let agents = if demo {
        if !is_demo_mode_allowed() {
            bail!("demo mode is only available when ENVIRONMENT is development or staging");
        }
        info!("using demo agents");
        demo_agents()
    } else {
        build_agents(config)?
    };
    Ok(ResearchPipeline::new(agents).with_settings(config.pipeline_settings()))
}

async fn run_command(config: &Config, args: RunArgs) -> Result<()> {
    let query = Query::new(&args.query).context("invalid query")?;
    let pipeline = build_pipeline(config, args.demo)?;

    let result = if args.stream {
        stream_run(&pipeline, query).await?
    } else {
        match pipeline.execute(&query).await {
            Ok(result) => result,
            Err(err) => {
                debug!(cause = %researchflow_core::logging::scrub(err.cause()), "run failed");
                bail!("{} ({})", err.sanitized().message, err.kind());
            }
        }
    };

    if let Some(path) = &args.output {
        write_json(path, &result)?;
        info!(path = %path.display(), "result written");
    }
    println!("{}", render_report(&result));
    Ok(())
}

async fn stream_run(pipeline: &ResearchPipeline, query: Query) -> Result<ResearchResult> {
    let mut stream = pipeline.stream(query);
    let correlation_id = stream.correlation_id().to_string();
    let mut outcome = None;

    loop {
        let event = tokio::select! {
            event = stream.next() => event,
            _ = tokio::signal::ctrl_c() => {
                let state = stream.close().await;
                warn!(?state, "interrupted");
                bail!("interrupted");
            }
        };
        let Some(event) = event else { break };
        eprintln!("{}", describe(&event));
        match event {
            StreamEvent::Complete { result } => outcome = Some(*result),
            StreamEvent::Error { error, .. } => {
                bail!("{error} (correlation id {correlation_id})")
            }
            _ => {}
        }
    }

    outcome.context("stream ended without a result")
}

/// One-line progress description for the terminal.
fn describe(event: &StreamEvent) -> String {
    match event {
        StreamEvent::PhaseStart { phase, message } => format!("[{phase}] {message}"),
        StreamEvent::PhaseComplete {
            phase, duration_ms, ..
        } => format!("[{phase}] done in {duration_ms}ms"),
        StreamEvent::PhaseWarning { phase, warning, .. } => format!("[{phase}] warning: {warning}"),
        StreamEvent::GatheringProgress {
            phase,
            completed,
            total,
            failed,
            current_query,
        } => format!("[{phase}] {completed}/{total} searches ({failed} failed): {current_query}"),
        StreamEvent::Heartbeat { phase, .. } => match phase {
            Some(phase) => format!("[{phase}] still working"),
            None => "still working".to_string(),
        },
        StreamEvent::Complete { .. } => "research complete".to_string(),
        StreamEvent::Error { error, .. } => format!("error: {error}"),
    }
}

fn render_report(result: &ResearchResult) -> String {
    let report = &result.report;
    let mut out = format!("# {}\n\n{}\n", report.title, report.summary);

    if !report.key_findings.is_empty() {
        out.push_str("\nKey findings:\n");
        for finding in &report.key_findings {
            out.push_str(&format!("- {finding}\n"));
        }
    }
    if !report.sources.is_empty() {
        out.push_str("\nSources:\n");
        for source in &report.sources {
            out.push_str(&format!("- {source}\n"));
        }
    }
    if !report.limitations.is_empty() {
        out.push_str(&format!("\nLimitations: {}\n", report.limitations));
    }
    for warning in &result.warnings {
        out.push_str(&format!("\nWarning ({}): {}\n", warning.phase, warning.message));
    }

    let validation = &result.validation;
    out.push_str(&format!(
        "\nVerification: {} (confidence {:.2}) • {}ms total",
        if validation.is_valid { "valid" } else { "needs review" },
        validation.confidence_score,
        result.timings.total_ms
    ));
    out
}

async fn batch_command(config: &Config, args: BatchArgs) -> Result<()> {
    let queries = load_queries(&args.queries)?;
    if queries.is_empty() {
        bail!("no queries found in {}", args.queries.display());
    }
    let pipeline = build_pipeline(config, args.demo)?;
    let run_id = args
        .run_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..8].to_string());

    let run = run_batch(&pipeline, run_id, &queries).await;

    if let Some(dir) = &args.results_dir {
        for (id, result) in &run.results {
            write_json(&dir.join(format!("query_{id}.json")), result)?;
        }
    }
    run.summary.save(&args.output)?;
    println!("{}", run.summary.headline());
    for failure in &run.summary.failed_queries {
        println!("  failed {}: {}", failure.id, failure.error);
    }
    Ok(())
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}
