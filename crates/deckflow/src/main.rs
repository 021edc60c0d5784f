use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use deckflow::{
    config::Config,
    metrics::gather_metrics,
    pipeline::{build_executor, default_steps},
    skills::{names, run_dir, AssembledDeck, DeckRequest},
    workflow::{RunConfig, RunHandle, RunId, WorkflowExecutor, WorkflowState},
};

#[derive(Parser)]
#[command(author, version, about = "Research, draft and assemble slide decks", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run and follow it to the end
    Run {
        /// Deck topic
        #[arg(short, long)]
        topic: Option<String>,

        /// Number of content slides
        #[arg(short, long)]
        slides: Option<usize>,

        /// Output template (marp or html)
        #[arg(long)]
        template: Option<String>,

        #[arg(long)]
        audience: Option<String>,

        #[arg(long)]
        tone: Option<String>,

        /// Skip image generation
        #[arg(long)]
        no_images: bool,

        /// YAML run file; flags above override its request
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the final checkpoint as JSON
        #[arg(long)]
        json: bool,

        /// Print Prometheus metrics once the run stops
        #[arg(long)]
        metrics: bool,
    },
    /// Continue a failed or interrupted run from its last checkpoint
    Resume {
        run_id: String,

        #[arg(long)]
        json: bool,

        #[arg(long)]
        metrics: bool,
    },
    /// Stop a run and release its lock
    Abort {
        run_id: String,

        #[arg(short, long, default_value = "aborted by operator")]
        reason: String,
    },
    /// Show the latest checkpoint of a run
    Status {
        run_id: String,

        #[arg(long)]
        json: bool,
    },
    /// List recent runs
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("deckflow={},warn", cli.log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().context("Failed to load configuration")?;
    let executor = build_executor(&config)
        .await
        .context("Failed to initialize the pipeline")?;

    match cli.command {
        Commands::Run {
            topic,
            slides,
            template,
            audience,
            tone,
            no_images,
            config: run_file,
            json,
            metrics,
        } => {
            let mut run = match run_file {
                Some(path) => RunConfig::from_yaml_file(&path)
                    .with_context(|| format!("Failed to read run file {}", path.display()))?,
                None => {
                    let topic = topic.clone().context("--topic is required without --config")?;
                    RunConfig::new(DeckRequest::new(topic), Vec::new())
                }
            };
            if let Some(topic) = topic {
                run.request.topic = topic;
            }
            if let Some(slides) = slides {
                run.request.slide_count = slides;
            }
            if let Some(template) = template {
                run.request.template = template;
            }
            if audience.is_some() {
                run.request.audience = audience;
            }
            if tone.is_some() {
                run.request.tone = tone;
            }
            if no_images {
                run.request.include_images = false;
            }
            if run.steps.is_empty() {
                run.steps = default_steps(&config.pipeline.retry_policy());
            }

            let handle = executor.start(run).await?;
            follow(&executor, handle, &config.pipeline.output_dir, json, metrics).await
        }
        Commands::Resume {
            run_id,
            json,
            metrics,
        } => {
            let run_id = parse_run_id(&run_id)?;
            let handle = executor.resume(run_id).await?;
            follow(&executor, handle, &config.pipeline.output_dir, json, metrics).await
        }
        Commands::Abort { run_id, reason } => {
            let state = executor.abort(parse_run_id(&run_id)?, &reason).await?;
            report(&state, &config.pipeline.output_dir, false)
        }
        Commands::Status { run_id, json } => {
            let state = executor.status(parse_run_id(&run_id)?).await?;
            report(&state, &config.pipeline.output_dir, json)
        }
        Commands::List { limit, offset } => {
            let runs = executor.list(limit, offset).await?;
            if runs.is_empty() {
                println!("No runs found");
            }
            for run in runs {
                let note = match (&run.failed_step, run.cancelled) {
                    (_, true) => " (cancelled)".to_string(),
                    (Some(step), false) => format!(" (failed at {})", step),
                    (None, false) => String::new(),
                };
                println!(
                    "{}  {:<9}  {}/{}  attempt {}  {}  {:?}{}",
                    run.run_id,
                    run.status,
                    run.current_step,
                    run.total_steps,
                    run.attempt,
                    run.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    run.topic,
                    note
                );
            }
            Ok(())
        }
    }
}

fn parse_run_id(raw: &str) -> Result<RunId> {
    raw.parse::<RunId>()
        .with_context(|| format!("Invalid run id: {}", raw))
}

/// Wait for a run in the foreground. Ctrl-C aborts it so its lock is not
/// left behind.
async fn follow(
    executor: &WorkflowExecutor,
    handle: RunHandle,
    output_dir: &Path,
    json: bool,
    metrics: bool,
) -> Result<()> {
    let run_id = handle.run_id();
    eprintln!("Run {}", run_id);

    let outcome = tokio::select! {
        result = handle.wait() => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; aborting run {}", run_id);
            let state = executor.abort(run_id, "interrupted").await?;
            report(&state, output_dir, json)?;
            bail!("Run {} was interrupted", run_id);
        }
    };

    if metrics {
        print!("{}", gather_metrics()?);
    }

    match outcome {
        Ok(state) => {
            report(&state, output_dir, json)?;
            if state.last_error.is_some() || state.cancellation.is_some() {
                bail!("Run {} did not complete", run_id);
            }
            Ok(())
        }
        Err(e) => {
            if let Ok(state) = executor.status(run_id).await {
                report(&state, output_dir, json)?;
            }
            info!("Resume with: deckflow resume {}", run_id);
            Err(e).with_context(|| format!("Run {} did not complete", run_id))
        }
    }
}

fn report(state: &WorkflowState, output_dir: &Path, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
        return Ok(());
    }

    println!(
        "{}  {}  step {}/{}  attempt {}",
        state.run_id,
        state.status,
        state.current_step,
        state.total_steps(),
        state.attempt
    );
    if let Some(failure) = &state.last_error {
        println!(
            "  failed at {} after {} attempt(s) [{}]: {}",
            failure.step, failure.attempts, failure.kind, failure.message
        );
    }
    if let Some(cancellation) = &state.cancellation {
        println!("  cancelled: {}", cancellation.reason);
    }
    if let Some(output) = state.output(names::ASSEMBLE) {
        let deck: AssembledDeck = serde_json::from_value(output.clone())?;
        println!(
            "  deck: {} ({} slides)",
            run_dir(output_dir, &state.run_id).join(&deck.path).display(),
            deck.slide_count
        );
    }
    Ok(())
}
