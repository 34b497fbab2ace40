use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::info;

use booksum::config::{default_config_path, load_config, BooksumConfig};
use booksum::jobs::JobStore;
use booksum::pipeline::{LogProgress, Orchestrator, Pipeline, PipelineConfig, PipelineContext};
use booksum::processor::LocalDocumentSource;
use booksum::queue::LocalQueue;
use booksum::sanitize::redact_path;
use booksum::secrets::expand_home;
use booksum::store::open_backend;
use booksum::telemetry::init_tracing;
use booksum::{Dispatcher, GeminiService};

#[derive(Parser)]
#[command(name = "booksum", version, about = "Chapter-by-chapter book summaries into a Markdown vault")]
struct Cli {
    /// Config file (defaults to ~/.booksum/config.json)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a document for summarization
    Submit {
        /// Path to a PDF or text file, or a reference inside the document root
        file: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Process queued and unfinished jobs
    Run {
        /// Stop once nothing is left to do instead of waiting for Ctrl-C
        #[arg(long)]
        once: bool,
    },
    /// Print a job's status document
    Status { job_id: String },
    /// List unfinished jobs with no progress for a while
    Stale {
        #[arg(long, default_value_t = 30)]
        minutes: u64,
    },
    /// Retry the failed chapters of a job and run until idle
    Retry { job_id: String },
    /// Validate the config file
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = read_config(cli.config.as_deref())?;

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("Logging disabled: {}", e);
    }

    match cli.command {
        Command::CheckConfig => {
            println!("Configuration is valid");
            Ok(())
        }
        Command::Submit { file, category } => submit(&config, &file, category.as_deref()).await,
        Command::Status { job_id } => {
            let jobs = job_store(&config)?;
            let status = jobs
                .read_status(&job_id)
                .await
                .with_context(|| format!("reading status of {}", job_id))?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Stale { minutes } => {
            let jobs = job_store(&config)?;
            let max_age = chrono::Duration::minutes(minutes as i64);
            let stale = jobs.stale_jobs(max_age).await?;
            if stale.is_empty() {
                println!("No stale jobs");
            }
            for status in stale {
                println!(
                    "{}  {}  last update {}",
                    status.job_id,
                    status.status,
                    status.updated_at.to_rfc3339()
                );
            }
            Ok(())
        }
        Command::Run { once } => run(&config, once).await,
        Command::Retry { job_id } => retry(&config, &job_id).await,
    }
}

fn read_config(path: Option<&Path>) -> anyhow::Result<BooksumConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(BooksumConfig::default()),
        },
    };
    load_config(&path).with_context(|| format!("loading {}", redact_path(&path)))
}

fn job_store(config: &BooksumConfig) -> anyhow::Result<JobStore> {
    let store = open_backend(&config.storage.job_store).context("opening job store")?;
    Ok(JobStore::new(store))
}

/// Creates the job and leaves the prepare step to `booksum run`, which
/// recovers every unfinished job on start.
async fn submit(config: &BooksumConfig, file: &str, category: Option<&str>) -> anyhow::Result<()> {
    let root = PathBuf::from(expand_home(&config.storage.document_root));
    let file_id = stage_document(&root, file).await?;

    let category = category.unwrap_or(config.pipeline.default_category.as_str());
    let metadata = job_store(config)?.create_job(&file_id, category, None).await?;

    println!("{}", metadata.job_id);
    info!("Submitted {} as job {}; start `booksum run` to process it", file_id, metadata.job_id);
    Ok(())
}

/// Copies a local file into the document root and returns its reference.
/// Anything that is not an existing file is taken as a reference already.
async fn stage_document(root: &Path, file: &str) -> anyhow::Result<String> {
    let path = Path::new(file);
    if !path.is_file() {
        return Ok(file.to_string());
    }
    let Some(name) = path.file_name() else {
        bail!("{} has no file name", file);
    };

    let target = root.join(name);
    let same = match (tokio::fs::canonicalize(path).await, tokio::fs::canonicalize(&target).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if !same {
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("creating {}", redact_path(root)))?;
        tokio::fs::copy(path, &target)
            .await
            .with_context(|| format!("copying into {}", redact_path(root)))?;
    }
    Ok(name.to_string_lossy().into_owned())
}

struct Runtime {
    queue: Arc<LocalQueue>,
    pipeline: Arc<Pipeline>,
}

fn build_runtime(config: &BooksumConfig) -> anyhow::Result<Runtime> {
    let jobs = job_store(config)?.with_retry_policy(config.pipeline.retry.clone());
    let output = open_backend(&config.storage.output_store).context("opening output store")?;
    let source = LocalDocumentSource::new(expand_home(&config.storage.document_root));
    let ai = GeminiService::from_config(&config.ai).context("configuring AI service")?;
    let queue = Arc::new(LocalQueue::new());

    let ctx = PipelineContext::new(
        Arc::new(PipelineConfig::from_config(config)),
        jobs,
        queue.clone(),
        Arc::new(source),
        Arc::new(ai),
        output,
    )
    .with_progress(Arc::new(LogProgress));

    Ok(Runtime {
        queue,
        pipeline: Arc::new(Pipeline::new(ctx)),
    })
}

async fn run(config: &BooksumConfig, once: bool) -> anyhow::Result<()> {
    let runtime = build_runtime(config)?;
    let recovered = runtime.pipeline.orchestrator().recover_jobs().await?;
    info!("{} tasks queued from unfinished jobs", recovered);

    let dispatcher = Dispatcher::new(runtime.pipeline.clone(), runtime.queue.clone(), &config.pipeline);
    let stats = if once {
        dispatcher.run_until_idle().await
    } else {
        let token = dispatcher.shutdown_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, finishing running tasks");
                token.cancel();
            }
        });
        dispatcher.run().await
    };

    println!(
        "{} succeeded, {} redelivered, {} failed",
        stats.succeeded, stats.redelivered, stats.failed
    );
    Ok(())
}

async fn retry(config: &BooksumConfig, job_id: &str) -> anyhow::Result<()> {
    let runtime = build_runtime(config)?;
    let orchestrator: Orchestrator = runtime.pipeline.orchestrator();
    let count = orchestrator.retry_failed_chapters(job_id).await?;
    if count == 0 {
        println!("Job {} has no failed chapters", job_id);
        return Ok(());
    }

    let dispatcher = Dispatcher::new(runtime.pipeline.clone(), runtime.queue.clone(), &config.pipeline);
    let stats = dispatcher.run_until_idle().await;
    let status = orchestrator.get_job_status(job_id).await?;
    println!(
        "Retried {} chapters ({} failed deliveries); job is {}",
        count, stats.failed, status.status
    );
    Ok(())
}
