use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Agent task execution and event-streaming orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit events and results as JSON lines instead of styled text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a single task and stream its events to the terminal
    Run {
        /// Task id; a random one is generated if omitted
        #[arg(long)]
        task_id: Option<String>,
        /// Task prompt text
        #[arg(long, conflicts_with = "prompt_file")]
        prompt: Option<String>,
        /// Read the prompt from a file instead
        #[arg(long)]
        prompt_file: Option<PathBuf>,
        /// Capability profile: write, review, ask, or analyze
        #[arg(long, default_value = "write")]
        mode: String,
        /// Repository URL to clone into the session workspace
        #[arg(long)]
        repo: Option<String>,
        /// Cap on agent iterations
        #[arg(long)]
        max_turns: Option<u32>,
        /// Wall-clock timeout in seconds (0 disables)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Process task descriptors (one JSON object per line) from a file or stdin
    Worker {
        /// Read descriptors from this file instead of stdin
        #[arg(long)]
        tasks: Option<PathBuf>,
        /// Maximum tasks running at once
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    dotenvy::dotenv().ok();
    let config = conductor::config::Config::from_env();
    let _log_guard = init_tracing(&cli, &config)?;

    match cli.command {
        Commands::Run {
            ref task_id,
            ref prompt,
            ref prompt_file,
            ref mode,
            ref repo,
            max_turns,
            timeout_secs,
        } => {
            let descriptor = cmd::run::build_descriptor(
                task_id.clone(),
                prompt.clone(),
                prompt_file.clone(),
                mode,
                repo.clone(),
                max_turns,
            )?;
            let mut config = config;
            if let Some(secs) = timeout_secs {
                config.task_timeout = (secs > 0).then(|| std::time::Duration::from_secs(secs));
            }
            cmd::run::cmd_run(config, descriptor, cli.json).await
        }
        Commands::Worker {
            ref tasks,
            max_concurrent,
        } => {
            let mut config = config;
            if let Some(n) = max_concurrent
                && n > 0
            {
                config.max_concurrent_tasks = n;
            }
            cmd::worker::cmd_worker(config, tasks.clone(), cli.json).await
        }
    }
}

/// Tracing goes to stderr so stdout stays clean for the event stream; with a
/// configured log dir a non-blocking rolling file layer is added too.
fn init_tracing(
    cli: &Cli,
    config: &conductor::config::Config,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("conductor={}", default_level)));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "conductor.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().json().with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            Ok(None)
        }
    }
}
