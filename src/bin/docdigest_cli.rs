use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;

use docdigest::config::Config;
use docdigest::logging::{self, ConsoleTarget};
use docdigest::pipeline::{
    CancellationFlag, DigestPipeline, DigestRequest, DocType, Document, FileCacheStore,
    ProgressEvent,
};

#[derive(Parser)]
#[command(
    name = "docdigest-cli",
    about = "Digest large documents from the command line"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline over an extracted text file and print the answer.
    Digest {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        pages: usize,
        #[arg(long)]
        question: String,
        #[arg(long)]
        name: Option<String>,
        /// Chunking strategy; detected from the text when omitted.
        #[arg(long)]
        doc_type: Option<String>,
    },
    /// Delete expired cache entries.
    PruneCache,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    logging::init_tracing(ConsoleTarget::Stderr);
    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command {
        Command::Digest {
            input,
            pages,
            question,
            name,
            doc_type,
        } => digest(&config, &input, pages, question, name, doc_type.as_deref()).await,
        Command::PruneCache => prune_cache(&config),
    }
}

async fn digest(
    config: &Config,
    input: &Path,
    pages: usize,
    question: String,
    name: Option<String>,
    doc_type: Option<&str>,
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("--question must not be empty");
    }
    let doc_type = doc_type.map(str::parse::<DocType>).transpose()?;
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read document text at {}", input.display()))?;
    let name = name.unwrap_or_else(|| {
        input
            .file_name()
            .map(|file| file.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    });

    let pipeline = DigestPipeline::from_config(config).context("failed to build completion client")?;
    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ncancelling…");
                cancel.cancel();
            }
        });
    }

    let observer = |event: ProgressEvent| {
        eprintln!("[{}/{}] {}", event.current, event.total, event.status);
    };
    let request = DigestRequest {
        document: Document {
            text,
            total_pages: pages,
            name,
            doc_type,
        },
        question,
    };

    let mut fragments = pipeline.run(&request, &observer, &cancel).await?;
    let mut stdout = std::io::stdout();
    while let Some(fragment) = fragments.next().await {
        if cancel.is_cancelled() {
            bail!("cancelled");
        }
        let fragment = fragment.context("final answer stream interrupted")?;
        stdout.write_all(fragment.as_bytes())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    let metrics = pipeline.metrics_snapshot();
    tracing::info!(
        chunks_analyzed = metrics.chunks_analyzed,
        chunk_failures = metrics.chunk_failures,
        cache_hits = metrics.cache_hits,
        forced_truncations = metrics.forced_truncations,
        "Digest finished"
    );
    Ok(())
}

fn prune_cache(config: &Config) -> Result<()> {
    let store = FileCacheStore::new(&config.cache_dir);
    let summary = store
        .prune_expired(config.cache_ttl)
        .with_context(|| format!("failed to prune cache at {}", store.dir().display()))?;
    println!(
        "scanned {} entries, removed {} from {}",
        summary.scanned,
        summary.removed,
        store.dir().display()
    );
    Ok(())
}
