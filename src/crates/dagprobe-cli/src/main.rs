//! dagprobe command-line interface.
//!
//! `run` executes the full pipeline over one dataset and writes the report
//! JSON; `report` renders a stored report to HTML; `serve` hosts the run API
//! with the SSE event stream.
//!
//! Exit codes for `run`: 0 ok, 1 validation failure, 2 LLM unreachable,
//! 3 internal error.

use clap::{Parser, Subcommand};
use dagprobe_core::{Dataset, Metadata};
use llm::{LlmConfig, LlmRunner, OpenAiClient};
use orchestrator::api::{create_router, AppState};
use orchestrator::{
    DifficultyFilter, EventPublisher, Orchestrator, OrchestratorError, RunConfig, RunRegistry,
    RunReport,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dagprobe", version, about = "LLM DAG-authoring evaluation over tabular datasets")]
struct Cli {
    /// Verbose logging (also prints run events).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the full pipeline and emit the report JSON.
    Run {
        /// Path to the dataset bundle (JSON object).
        #[arg(long)]
        dataset: PathBuf,

        /// Path to the metadata document (JSON). Missing file is non-fatal.
        #[arg(long)]
        metadata: Option<PathBuf>,

        /// Output report path; defaults to eval_results_<timestamp>.json.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Number of questions to generate.
        #[arg(long, default_value_t = 10)]
        questions: usize,

        /// Difficulty filter: all|easy|medium|hard.
        #[arg(long, default_value = "all")]
        difficulty: String,

        /// Maximum build/critique iterations per question.
        #[arg(long, default_value_t = 3)]
        max_iterations: u32,

        /// Model identifier for the OpenAI-compatible provider.
        #[arg(long, env = "DAGPROBE_MODEL", default_value = "gpt-4o-mini")]
        model: String,
    },

    /// Render a stored report to HTML.
    Report {
        /// Path to a results JSON file.
        #[arg(long)]
        results: PathBuf,

        /// Output HTML path.
        #[arg(long)]
        output: PathBuf,
    },

    /// Host the run API (POST /run, SSE events, result files).
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,

        #[arg(long)]
        dataset: PathBuf,

        #[arg(long)]
        metadata: Option<PathBuf>,

        /// Directory for eval_results_*.json files.
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,

        #[arg(long, env = "DAGPROBE_MODEL", default_value = "gpt-4o-mini")]
        model: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Commands::Run {
            dataset,
            metadata,
            output,
            questions,
            difficulty,
            max_iterations,
            model,
        } => {
            run_command(
                &dataset,
                metadata.as_deref(),
                output,
                questions,
                &difficulty,
                max_iterations,
                &model,
                cli.verbose,
            )
            .await
        }
        Commands::Report { results, output } => report_command(&results, &output),
        Commands::Serve {
            host,
            port,
            dataset,
            metadata,
            results_dir,
            model,
        } => serve_command(&host, port, &dataset, metadata.as_deref(), &results_dir, &model).await,
    };

    std::process::exit(code);
}

fn exit_code(err: &OrchestratorError) -> i32 {
    match err {
        OrchestratorError::Validation(_) => 1,
        OrchestratorError::Llm(_) => 2,
        _ => 3,
    }
}

fn load_dataset(path: &Path) -> Result<Dataset, OrchestratorError> {
    let bytes = std::fs::read(path).map_err(|e| {
        OrchestratorError::Validation(format!("cannot read dataset {}: {e}", path.display()))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        OrchestratorError::Validation(format!("dataset {} is not a JSON object: {e}", path.display()))
    })
}

/// A missing metadata file is non-fatal; a malformed one is a validation
/// failure.
fn load_metadata(path: Option<&Path>) -> Result<Metadata, OrchestratorError> {
    let Some(path) = path else {
        return Ok(Metadata::default());
    };
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "metadata unreadable, continuing with empty schema");
            return Ok(Metadata::default());
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| {
        OrchestratorError::Validation(format!("metadata {} is malformed: {e}", path.display()))
    })
}

fn build_runner(model: &str) -> Result<LlmRunner, OrchestratorError> {
    let config = LlmConfig::openai_from_env(model)?;
    let client = OpenAiClient::new(config)?;
    Ok(LlmRunner::new(Arc::new(client)))
}

fn dataset_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset")
        .to_string()
}

#[allow(clippy::too_many_arguments)]
async fn run_command(
    dataset_path: &Path,
    metadata_path: Option<&Path>,
    output: Option<PathBuf>,
    questions: usize,
    difficulty: &str,
    max_iterations: u32,
    model: &str,
    verbose: bool,
) -> i32 {
    let result = async {
        let dataset = Arc::new(load_dataset(dataset_path)?);
        let metadata = Arc::new(load_metadata(metadata_path)?);
        let difficulty: DifficultyFilter = difficulty
            .parse()
            .map_err(OrchestratorError::Validation)?;
        if questions == 0 {
            return Err(OrchestratorError::Validation(
                "question count must be at least 1".to_string(),
            ));
        }

        let runner = build_runner(model)?;
        let orchestrator = Orchestrator::new(runner);
        let config = RunConfig {
            num_questions: questions,
            difficulty,
            max_iterations,
            dataset_name: dataset_name(dataset_path),
            ..RunConfig::default()
        };

        let (publisher, mut events) = EventPublisher::channel("cli");
        let drain = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if verbose {
                    match serde_json::to_string(&event) {
                        Ok(line) => eprintln!("{line}"),
                        Err(_) => eprintln!("{:?}", event.kind),
                    }
                }
            }
        });

        let (_cancel_tx, cancel) = tokio::sync::watch::channel(false);
        let report = orchestrator
            .execute_run(dataset, metadata, &config, publisher, cancel)
            .await?;
        drain.abort();

        let output_path = output.unwrap_or_else(|| {
            PathBuf::from(format!(
                "eval_results_{}.json",
                chrono::Utc::now().format("%Y%m%d_%H%M%S")
            ))
        });
        std::fs::write(&output_path, serde_json::to_vec_pretty(&report)?)?;
        info!(
            output = %output_path.display(),
            passed = report.summary.passed,
            total = report.summary.total,
            "report written"
        );
        println!(
            "{}/{} passed ({:.0}%), report: {}",
            report.summary.passed,
            report.summary.total,
            report.summary.pass_rate * 100.0,
            output_path.display()
        );
        Ok::<(), OrchestratorError>(())
    }
    .await;

    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            exit_code(&err)
        }
    }
}


fn report_command(results: &Path, output: &Path) -> i32 {
    let rendered = std::fs::read(results)
        .map_err(|e| format!("cannot read {}: {e}", results.display()))
        .and_then(|bytes| {
            serde_json::from_slice::<RunReport>(&bytes)
                .map_err(|e| format!("{} is not a RunReport: {e}", results.display()))
        })
        .map(|report| report.render_html())
        .and_then(|html| {
            std::fs::write(output, html)
                .map_err(|e| format!("cannot write {}: {e}", output.display()))
        });

    match rendered {
        Ok(()) => {
            println!("report rendered: {}", output.display());
            0
        }
        Err(message) => {
            eprintln!("error: {message}");
            1
        }
    }
}

async fn serve_command(
    host: &str,
    port: u16,
    dataset_path: &Path,
    metadata_path: Option<&Path>,
    results_dir: &Path,
    model: &str,
) -> i32 {
    let result = async {
        let dataset = Arc::new(load_dataset(dataset_path)?);
        let metadata = Arc::new(load_metadata(metadata_path)?);
        std::fs::create_dir_all(results_dir)?;
        let runner = build_runner(model)?;

        let state = AppState {
            registry: Arc::new(RunRegistry::default()),
            orchestrator: Arc::new(Orchestrator::new(runner)),
            dataset,
            metadata,
            results_dir: results_dir.to_path_buf(),
            defaults: RunConfig {
                dataset_name: dataset_name(dataset_path),
                ..RunConfig::default()
            },
        };

        let router = create_router(state);
        let addr = format!("{host}:{port}");
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %addr, "dagprobe API listening");
        axum::serve(listener, router)
            .await
            .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
        Ok::<(), OrchestratorError>(())
    }
    .await;

    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            exit_code(&err)
        }
    }
}
