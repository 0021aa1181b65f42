//! CLI command definitions for prompt-eval.
//!
//! Every command opens the SQLite database, builds an [`EvaluationService`]
//! over it and prints its result as JSON. Commands that launch a pass stay
//! attached and stream the pass events as JSON lines until it ends; Ctrl-C
//! pauses the run before exiting.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::error::LlmError;
use crate::evaluation::{
    EngineConfig, Evaluation, EvaluationService, NewEvaluationRequest, RunOutcome,
};
use crate::llm::{
    invoke_model, GenerationParams, GenerationRequest, GenerationResponse, LiteLlmClient,
    LlmProvider,
};
use crate::metrics::{export_metrics, init_metrics};
use crate::storage::{NewPrompt, SqliteStore};

/// Default database location.
const DEFAULT_DATABASE_URL: &str = "sqlite://prompt-eval.db";

/// Default owner recorded on evaluations created from the CLI.
const DEFAULT_ACTOR: &str = "cli";

/// Prompt evaluation engine.
#[derive(Parser)]
#[command(name = "prompt-eval")]
#[command(about = "Run prompt evaluations against labelled datasets")]
#[command(version)]
#[command(
    long_about = "prompt-eval runs a prompt template against every message of a labelled dataset through an OpenAI-compatible LLM endpoint and reports classification accuracy.\n\nExample usage:\n  prompt-eval prompt add --name spam --model gpt-4o-mini --text 'Is this spam? {{messageContent}}'\n  prompt-eval dataset import --name inbox --file inbox.jsonl\n  prompt-eval create --name 'spam v1' --prompt-id 1 --dataset-id 2\n  prompt-eval start 3"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// SQLite database URL.
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL, global = true)]
    pub database_url: String,

    /// Identity that owns the evaluations touched by this command.
    #[arg(long, env = "PROMPT_EVAL_ACTOR", default_value = DEFAULT_ACTOR, global = true)]
    pub actor: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Manage prompt configurations.
    Prompt(PromptArgs),

    /// Manage labelled datasets.
    Dataset(DatasetArgs),

    /// Create a pending evaluation.
    Create(CreateArgs),

    /// Start a pending evaluation.
    Start(RunArgs),

    /// Resume a paused or failed evaluation.
    Resume(RunArgs),

    /// Pause a running evaluation.
    Stop(IdArgs),

    /// Discard the results of a failed or running evaluation.
    Reset(IdArgs),

    /// Reprocess the messages that ended in an error.
    #[command(name = "retry-errors")]
    RetryErrors(RunArgs),

    /// Start a copy of a completed evaluation.
    Rerun(RunArgs),

    /// Show an evaluation with a liveness diagnosis.
    Status(IdArgs),

    /// Print the stored results of an evaluation.
    Results(IdArgs),

    /// List all evaluations.
    List,

    /// Delete an evaluation and its results.
    Delete(IdArgs),

    /// Send a probe request to the configured LLM endpoint.
    Ping(PingArgs),

    /// Print the Prometheus metrics of this process.
    Metrics,
}

/// Arguments for `prompt-eval prompt`.
#[derive(Parser, Debug)]
pub struct PromptArgs {
    #[command(subcommand)]
    pub command: PromptSubcommand,
}

/// Prompt subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum PromptSubcommand {
    /// Add a prompt to the catalog.
    Add(PromptAddArgs),
}

/// Arguments for `prompt-eval prompt add`.
#[derive(Parser, Debug)]
pub struct PromptAddArgs {
    /// Prompt name.
    #[arg(long)]
    pub name: String,

    /// Model id sent to the LLM endpoint.
    #[arg(short = 'm', long)]
    pub model: String,

    /// Template text containing `{{messageContent}}`.
    #[arg(long, conflicts_with = "text_file")]
    pub text: Option<String>,

    /// Read the template text from a file.
    #[arg(long)]
    pub text_file: Option<String>,

    /// Tag opening the verdict in the model answer.
    #[arg(long, default_value = "<answer>")]
    pub opening_tag: String,

    /// Tag closing the verdict in the model answer.
    #[arg(long, default_value = "</answer>")]
    pub closing_tag: String,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub temperature: Option<f64>,

    #[arg(long)]
    pub top_p: Option<f64>,

    /// Stop sequence; may be repeated.
    #[arg(long = "stop")]
    pub stop_sequences: Vec<String>,
}

/// Arguments for `prompt-eval dataset`.
#[derive(Parser, Debug)]
pub struct DatasetArgs {
    #[command(subcommand)]
    pub command: DatasetSubcommand,
}

/// Dataset subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum DatasetSubcommand {
    /// Import a JSONL file of `{"message": "...", "label": true}` lines.
    Import(DatasetImportArgs),
}

/// Arguments for `prompt-eval dataset import`.
#[derive(Parser, Debug)]
pub struct DatasetImportArgs {
    #[arg(long)]
    pub name: String,

    /// JSONL file to import.
    #[arg(short = 'f', long)]
    pub file: String,
}

/// Arguments for `prompt-eval create`.
#[derive(Parser, Debug)]
pub struct CreateArgs {
    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub prompt_id: i64,

    #[arg(long)]
    pub dataset_id: i64,
}

/// Arguments for commands that launch a pass.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Evaluation id.
    pub id: i64,

    /// Return right after the status change instead of following the run.
    #[arg(long)]
    pub detach: bool,
}

/// Arguments for commands that only need an evaluation id.
#[derive(Parser, Debug)]
pub struct IdArgs {
    /// Evaluation id.
    pub id: i64,
}

/// Arguments for `prompt-eval ping`.
#[derive(Parser, Debug)]
pub struct PingArgs {
    /// Model to probe; defaults to `LITELLM_DEFAULT_MODEL`.
    #[arg(short = 'm', long)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DatasetLine {
    message: String,
    label: bool,
}

#[derive(Debug, Serialize)]
struct DatasetImportOutput {
    dataset_id: i64,
    name: String,
    messages: usize,
}

#[derive(Debug, Serialize)]
struct PingOutput {
    model: String,
    response_time_ms: u64,
    content: String,
}

/// Provider used when no LLM endpoint is configured; every call fails.
struct UnconfiguredProvider;

#[async_trait]
impl LlmProvider for UnconfiguredProvider {
    async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        Err(LlmError::MissingApiBase)
    }
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Metrics registry unavailable");
    }

    let command = match cli.command {
        Commands::Ping(args) => return run_ping_command(args).await,
        Commands::Metrics => {
            print!("{}", export_metrics());
            return Ok(());
        }
        command => command,
    };

    let store = Arc::new(SqliteStore::connect(&cli.database_url).await?);
    let actor = cli.actor.as_str();

    match command {
        Commands::Prompt(args) => match args.command {
            PromptSubcommand::Add(args) => run_prompt_add_command(&store, args).await,
        },
        Commands::Dataset(args) => match args.command {
            DatasetSubcommand::Import(args) => run_dataset_import_command(&store, args).await,
        },
        Commands::List => print_json(&store.list_evaluations().await?),
        command => {
            let service = build_service(store.clone(), launches_pass(&command))?;
            run_evaluation_command(&service, command, actor).await
        }
    }
}

fn launches_pass(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Start(_) | Commands::Resume(_) | Commands::RetryErrors(_) | Commands::Rerun(_)
    )
}

fn build_service(store: Arc<SqliteStore>, needs_llm: bool) -> anyhow::Result<EvaluationService> {
    let config = EngineConfig::from_env()?;
    let provider: Arc<dyn LlmProvider> = match LiteLlmClient::from_env() {
        Ok(client) => Arc::new(client),
        Err(e) if needs_llm => return Err(e.into()),
        Err(_) => Arc::new(UnconfiguredProvider),
    };
    Ok(EvaluationService::new(store.clone(), store, provider, config)?)
}

async fn run_evaluation_command(
    service: &EvaluationService,
    command: Commands,
    actor: &str,
) -> anyhow::Result<()> {
    match command {
        Commands::Create(args) => {
            let evaluation = service
                .create_evaluation(
                    NewEvaluationRequest {
                        name: args.name,
                        description: args.description,
                        prompt_id: args.prompt_id,
                        dataset_id: args.dataset_id,
                    },
                    actor,
                )
                .await?;
            print_json(&evaluation)
        }
        Commands::Start(args) => {
            let evaluation = service.start(args.id, actor).await?;
            follow_run(service, evaluation, actor, args.detach).await
        }
        Commands::Resume(args) => {
            let evaluation = service.resume(args.id, actor).await?;
            follow_run(service, evaluation, actor, args.detach).await
        }
        Commands::RetryErrors(args) => {
            let evaluation = service.retry_errors(args.id, actor).await?;
            follow_run(service, evaluation, actor, args.detach).await
        }
        Commands::Rerun(args) => {
            let evaluation = service.rerun(args.id, actor).await?;
            follow_run(service, evaluation, actor, args.detach).await
        }
        Commands::Stop(args) => print_json(&service.stop(args.id, actor).await?),
        Commands::Reset(args) => print_json(&service.reset(args.id, actor).await?),
        Commands::Status(args) => print_json(&service.validate_status(args.id, actor).await?),
        Commands::Results(args) => print_json(&service.results(args.id, actor).await?),
        Commands::Delete(args) => {
            service.delete(args.id, actor).await?;
            print_json(&serde_json::json!({ "deleted": args.id }))
        }
        Commands::Prompt(_)
        | Commands::Dataset(_)
        | Commands::List
        | Commands::Ping(_)
        | Commands::Metrics => Ok(()),
    }
}

/// Streams the events of a launched pass until it ends.
///
/// Ctrl-C pauses the evaluation and waits for in-flight calls to drain.
async fn follow_run(
    service: &EvaluationService,
    evaluation: Evaluation,
    actor: &str,
    detach: bool,
) -> anyhow::Result<()> {
    let id = evaluation.id;
    print_json_line(&evaluation)?;
    if detach {
        return Ok(());
    }

    let mut subscription = service.subscribe(id);
    let printer = tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            if let Err(e) = print_json_line(&event) {
                warn!(error = %e, "Failed to print event");
            }
        }
    });

    let outcome = tokio::select! {
        outcome = service.wait_for_run(id) => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!(evaluation_id = id, "Interrupted, pausing evaluation");
            if let Err(e) = service.stop(id, actor).await {
                warn!(evaluation_id = id, error = %e, "Failed to pause evaluation");
            }
            service.wait_for_run(id).await
        }
    };

    match outcome {
        Some(RunOutcome::Completed) | Some(RunOutcome::Failed(_)) => {
            if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
                warn!(evaluation_id = id, "Event stream did not close");
            }
        }
        _ => printer.abort(),
    }

    match outcome {
        Some(RunOutcome::Failed(reason)) => Err(anyhow::anyhow!(
            "Evaluation {} failed: {}",
            id,
            reason
        )),
        _ => Ok(()),
    }
}

async fn run_prompt_add_command(store: &SqliteStore, args: PromptAddArgs) -> anyhow::Result<()> {
    let text = match (args.text, args.text_file) {
        (Some(text), _) => text,
        (None, Some(path)) => fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read prompt file {}: {}", path, e))?,
        (None, None) => return Err(anyhow::anyhow!("Either --text or --text-file is required")),
    };

    let mut prompt = NewPrompt::new(args.name, args.model, text, args.opening_tag, args.closing_tag)
        .with_stop_sequences(args.stop_sequences);
    if let Some(max_tokens) = args.max_tokens {
        prompt = prompt.with_max_tokens(max_tokens);
    }
    if let Some(temperature) = args.temperature {
        prompt = prompt.with_temperature(temperature);
    }
    if let Some(top_p) = args.top_p {
        prompt = prompt.with_top_p(top_p);
    }

    print_json(&store.insert_prompt(prompt).await?)
}

async fn run_dataset_import_command(
    store: &SqliteStore,
    args: DatasetImportArgs,
) -> anyhow::Result<()> {
    let content = fs::read_to_string(&args.file)
        .map_err(|e| anyhow::anyhow!("Failed to read dataset file {}: {}", args.file, e))?;

    let mut messages = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: DatasetLine = serde_json::from_str(line)
            .map_err(|e| anyhow::anyhow!("{}:{}: {}", args.file, idx + 1, e))?;
        messages.push((parsed.message, parsed.label));
    }

    let dataset_id = store.insert_dataset(&args.name, &messages).await?;
    print_json(&DatasetImportOutput {
        dataset_id,
        name: args.name,
        messages: messages.len(),
    })
}

async fn run_ping_command(args: PingArgs) -> anyhow::Result<()> {
    let client = LiteLlmClient::from_env()?;
    let config = EngineConfig::from_env()?;
    let model = args
        .model
        .unwrap_or_else(|| client.default_model().to_string());

    let params = GenerationParams {
        max_tokens: 16,
        ..GenerationParams::default()
    };
    let invocation = invoke_model(
        &client,
        &model,
        "Reply with the single word: pong",
        &params,
        config.llm_timeout,
    )
    .await?;

    print_json(&PingOutput {
        model,
        response_time_ms: invocation.response_time_ms,
        content: invocation.content,
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn print_json_line<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
