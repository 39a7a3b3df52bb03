use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use callaudit::io::write_json;
use callaudit::stages::{render_timeline, spawn_progress_forwarder, ProgressEmitter, TracingProgressSink};
use callaudit::{
    compute_compliance, parse_config_file, parse_outcomes_file, parse_recordings_file,
    timeline_from_recordings, AnalysisConfig, AnthropicClient, AnthropicConfig, AssemblerConfig,
    AuditPipeline, AuditSummary, JsonFileStore, JsonProductCatalog, PipelineConfig, RerunConfig,
    RerunCoordinator, ScoringConfig, StepAnalysisOrchestrator, TranscriptFallback,
};

#[derive(Parser)]
#[command(name = "callaudit")]
#[command(author, version, about = "Compliance audit of recorded sales calls", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit every step of a config against a case's recordings
    Run {
        /// Audit config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Recordings of the case, in chronological order (JSON array)
        #[arg(short, long)]
        recordings: PathBuf,

        /// Case identifier
        #[arg(long)]
        fiche_id: String,

        /// Output file for the audit report (JSON)
        #[arg(short, long)]
        output: PathBuf,

        /// Output file for a human-readable summary
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Directory holding products/<fiche_id>.json
        #[arg(long)]
        products_dir: Option<PathBuf>,

        /// Store directory to save the audit into, for later reruns
        #[arg(long)]
        store: Option<PathBuf>,

        /// Messages per chunk
        #[arg(long, default_value = "10")]
        chunk_size: usize,

        /// Analysis attempts per step
        #[arg(long, default_value = "3")]
        max_attempts: u32,

        /// Steps analyzed at the same time
        #[arg(long, default_value = "4")]
        max_concurrency: usize,

        /// Deadline for the whole run, in seconds (0 disables it)
        #[arg(long, default_value = "900")]
        timeout_secs: u64,
    },

    /// Print the timeline built from a recordings file
    Timeline {
        #[arg(short, long)]
        recordings: PathBuf,

        #[arg(long, default_value = "10")]
        chunk_size: usize,
    },

    /// Recompute the compliance score from stored step outcomes
    Score {
        #[arg(short, long)]
        config: PathBuf,

        /// Step outcomes: a bare array or a report with a `steps` field
        #[arg(long)]
        results: PathBuf,
    },

    /// Rerun one step of a stored audit and compare with the original
    RerunStep {
        #[arg(long)]
        store: PathBuf,

        #[arg(long)]
        audit_id: String,

        #[arg(long)]
        position: u32,

        /// Extra guidance appended to the step prompt
        #[arg(long)]
        instructions: Option<String>,

        /// Output file for the rerun outcome (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rerun control points of a stored step and compare with the original
    RerunControlPoint {
        #[arg(long)]
        store: PathBuf,

        #[arg(long)]
        audit_id: String,

        #[arg(long)]
        position: u32,

        /// Control point indices (zero-based, repeatable)
        #[arg(long = "point", required = true, num_args = 1..)]
        points: Vec<usize>,

        #[arg(long)]
        instructions: Option<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            recordings,
            fiche_id,
            output,
            summary,
            products_dir,
            store,
            chunk_size,
            max_attempts,
            max_concurrency,
            timeout_secs,
        } => {
            let analysis = AnalysisConfig {
                max_attempts,
                max_concurrent_steps: max_concurrency,
                run_timeout_secs: (timeout_secs > 0).then_some(timeout_secs),
                ..Default::default()
            };
            let pipeline_config = PipelineConfig {
                assembler: AssemblerConfig { chunk_size },
                analysis,
                ..Default::default()
            };
            run_audit(
                config,
                recordings,
                fiche_id,
                output,
                summary,
                products_dir,
                store,
                pipeline_config,
            )
            .await
        }
        Commands::Timeline {
            recordings,
            chunk_size,
        } => print_timeline(recordings, chunk_size),
        Commands::Score { config, results } => score_results(config, results),
        Commands::RerunStep {
            store,
            audit_id,
            position,
            instructions,
            output,
        } => {
            let coordinator = rerun_coordinator(store)?;
            let outcome = coordinator
                .rerun_step(&audit_id, position, instructions.as_deref())
                .await?;
            info!(
                "Step {} rerun: changed={}",
                position,
                outcome.comparison.has_changes()
            );
            emit_json(&outcome, output.as_ref())
        }
        Commands::RerunControlPoint {
            store,
            audit_id,
            position,
            points,
            instructions,
            output,
        } => {
            let coordinator = rerun_coordinator(store)?;
            let outcomes = coordinator
                .rerun_control_points(&audit_id, position, &points, instructions.as_deref())
                .await?;

            let mut report = Vec::with_capacity(outcomes.len());
            for (index, outcome) in points.iter().zip(outcomes) {
                match outcome {
                    Ok(outcome) => report.push(serde_json::to_value(&outcome)?),
                    Err(e) => {
                        warn!("Control point {} failed: {}", index, e);
                        report.push(serde_json::json!({
                            "point_index": index,
                            "error": e.to_string(),
                        }));
                    }
                }
            }
            emit_json(&report, output.as_ref())
        }
    }
}

fn setup_logging(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
        return;
    }

    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn emit_json<T: serde::Serialize>(value: &T, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            write_json(value, path)?;
            info!("Output written to {:?}", path);
        }
        None => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_audit(
    config_path: PathBuf,
    recordings_path: PathBuf,
    fiche_id: String,
    output: PathBuf,
    summary: Option<PathBuf>,
    products_dir: Option<PathBuf>,
    store: Option<PathBuf>,
    pipeline_config: PipelineConfig,
) -> Result<()> {
    info!("Loading audit config from {:?}", config_path);
    let config = parse_config_file(&config_path).context("Failed to load audit config")?;
    let recordings =
        parse_recordings_file(&recordings_path).context("Failed to load recordings")?;

    info!(
        "Loaded config '{}' ({} steps), {} recordings",
        config.name,
        config.steps.len(),
        recordings.len()
    );

    let client = AnthropicClient::new(AnthropicConfig::from_env()?);
    let (emitter, receiver) = ProgressEmitter::channel(64);
    let forwarder = spawn_progress_forwarder(receiver, TracingProgressSink);

    let report = {
        let mut pipeline = AuditPipeline::new(Arc::new(client), pipeline_config).with_progress(emitter);
        if let Some(dir) = products_dir {
            pipeline = pipeline.with_products(Arc::new(JsonProductCatalog::new(dir)));
        }
        pipeline.run(&fiche_id, &config, &recordings).await
    };
    // The pipeline (and its emitter) is gone, so the forwarder drains and exits
    forwarder.await.ok();

    write_json(&report, &output)?;
    info!("Report written to {:?}", output);

    if let Some(path) = summary {
        AuditSummary::new(&report).write_file(&path)?;
        info!("Summary written to {:?}", path);
    }

    // Reruns need the config and transcripts next to the audit
    if let Some(dir) = store {
        let store = JsonFileStore::new(dir);
        let audit_id = report.run_id.to_string();
        store
            .save_config(&config)
            .await
            .context("Failed to save audit config")?;
        store
            .save_recordings(&fiche_id, &recordings)
            .await
            .context("Failed to save recordings")?;
        store
            .save_audit(&report.to_stored(&audit_id))
            .await
            .context("Failed to save audit")?;
        info!("Audit saved as {} in {:?}", audit_id, store.root());
    }

    info!(
        "Complete: score {:.2} ({}), {}/{} steps succeeded",
        report.compliance.score,
        report.compliance.niveau.as_str(),
        report.statistics.successful,
        report.statistics.total
    );

    Ok(())
}

fn print_timeline(recordings_path: PathBuf, chunk_size: usize) -> Result<()> {
    let recordings =
        parse_recordings_file(&recordings_path).context("Failed to load recordings")?;
    let timeline = timeline_from_recordings(
        &recordings,
        &AssemblerConfig { chunk_size },
        &TranscriptFallback::default(),
    );

    println!("{}", render_timeline(&timeline.recordings));
    if !timeline.warnings.is_empty() {
        println!("Warnings");
        println!("--------");
        for warning in &timeline.warnings {
            println!("- {}", warning);
        }
    }

    Ok(())
}

fn score_results(config_path: PathBuf, results_path: PathBuf) -> Result<()> {
    let config = parse_config_file(&config_path).context("Failed to load audit config")?;
    let outcomes = parse_outcomes_file(&results_path).context("Failed to load step results")?;

    let score = compute_compliance(&config.steps, &outcomes, &ScoringConfig::default());

    println!("Compliance");
    println!("==========");
    println!("Score: {:.2}/100", score.score);
    println!("Level: {}", score.niveau.as_str());
    println!("Critical points: {}", score.points_critiques);
    println!("Weight: {}/{}", score.poids_obtenu, score.poids_total);

    Ok(())
}

fn rerun_coordinator(store: PathBuf) -> Result<RerunCoordinator> {
    let config = RerunConfig::default();
    let client = AnthropicClient::new(AnthropicConfig::from_env()?);
    let orchestrator = StepAnalysisOrchestrator::new(Arc::new(client), config.analysis.clone());
    let catalog = JsonProductCatalog::new(&store);

    Ok(RerunCoordinator::new(Arc::new(JsonFileStore::new(store)), orchestrator, config)
        .with_products(Arc::new(catalog)))
}
