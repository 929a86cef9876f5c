//! Perioscope: scientific article analysis and claim validation.
//! Entry point for the command-line binary.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use perioscope_analysis::{AnalysisOptions, DocumentAnalyzer, ProgressStatus, ResearchProgress};
use perioscope_llm::build_backend;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "perioscope", version, about = "Methodological analysis of scientific articles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Config file (defaults to ./perioscope.toml)
    #[arg(long, global = true, env = config::CONFIG_ENV)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an article and print the result as JSON
    Analyze {
        /// Plain-text article, or "-" for stdin
        input: PathBuf,
        /// Validate the article's claims against the literature
        #[arg(long)]
        deep: bool,
        /// Research rounds per concept
        #[arg(long)]
        depth: Option<usize>,
        /// Queries per concept per round
        #[arg(long)]
        breadth: Option<usize>,
        /// Restrict deep research to concepts matching this topic (repeatable)
        #[arg(long = "topic")]
        topics: Vec<String>,
        /// Known article title, used ahead of the one read from the text
        #[arg(long)]
        title: Option<String>,
    },
    /// Suggest research topics for an article
    Topics {
        /// Plain-text article, or "-" for stdin
        input: PathBuf,
    },
}

async fn read_input(input: &Path) -> anyhow::Result<String> {
    if input == Path::new("-") {
        let mut text = String::new();
        tokio::io::stdin().read_to_string(&mut text).await?;
        return Ok(text);
    }
    tokio::fs::read_to_string(input)
        .await
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", input.display()))
}

/// Prints research progress to stderr until the sender side is dropped.
fn spawn_progress_printer(mut rx: broadcast::Receiver<ResearchProgress>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(progress) => eprintln!("{}", ProgressStatus::from(&progress)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Initialise structured logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("perioscope=debug,info")),
        )
        .init();

    let cli = Cli::parse();
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => {
            let mut c = config::Config::load_from(path)?;
            c.apply_env_keys(|name| std::env::var(name).ok());
            c
        }
        None => config::Config::load()?,
    };
    info!(backend = config.llm.kind.as_str(), model = %config.llm.model, "Configuration loaded");

    let llm = build_backend(&config.llm.backend_config())?;
    let analyzer = DocumentAnalyzer::from_config(llm, &config.analysis)?;

    match cli.command {
        Commands::Topics { input } => {
            let text = read_input(&input).await?;
            let suggestions = analyzer.suggest_topics(&text)?;
            println!("{}", serde_json::to_string_pretty(&suggestions)?);
        }
        Commands::Analyze { input, deep, depth, breadth, topics, title } => {
            let text = read_input(&input).await?;
            let options = AnalysisOptions {
                deep_analysis: deep,
                depth,
                breadth,
                selected_topics: topics,
                title,
            };

            let (tx, rx) = broadcast::channel(256);
            let printer = spawn_progress_printer(rx);
            let result = analyzer.analyze(&text, &options, Some(tx)).await;
            // The analyzer owned the only sender; the printer drains and exits.
            let _ = printer.await;

            let result = result?;
            info!(
                chunks = result.chunks_analyzed,
                failed = result.chunks_failed,
                deep = result.deep_analysis.is_some(),
                "Analysis complete"
            );
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
