//! Data Agent CLI
//!
//! Runs search turns against a data-agent backend from the terminal.

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::manual_let_else)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use data_agent_client::config::{AppConfig, BackendConfig, Cli, LogFormat, LoggingConfig};
use data_agent_client::report::ReportClient;
use data_agent_client::session::{SessionCoordinator, SessionEvent, SessionSearch};
use data_agent_client::stream::{NodeResponse, StreamClient, StreamRequest};

#[derive(Parser, Debug)]
#[command(name = "data-agent", author, version, about, long_about = None)]
struct Opts {
    #[command(flatten)]
    global: Cli,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream one search turn and print each node as it arrives
    Search(SearchArgs),
    /// Print the stream URL a search would use, without connecting
    Url(SearchArgs),
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Agent to query
    #[arg(long)]
    agent_id: String,

    /// Natural-language query
    #[arg(short, long)]
    query: String,

    /// Continue an existing thread
    #[arg(long)]
    thread_id: Option<String>,

    /// Session to run the turn in (random when omitted)
    #[arg(long)]
    session_id: Option<String>,

    /// Only run the NL2SQL stage
    #[arg(long)]
    nl2sql_only: bool,

    /// Send human feedback on the current plan
    #[arg(long)]
    human_feedback: bool,

    /// Feedback text
    #[arg(long, requires = "human_feedback")]
    feedback: Option<String>,

    /// Reject the current plan
    #[arg(long, requires = "human_feedback")]
    rejected_plan: bool,

    /// Download the turn's HTML report into this directory
    #[arg(long)]
    save_report: Option<PathBuf>,
}

impl SearchArgs {
    fn to_request(&self) -> StreamRequest {
        let mut request =
            StreamRequest::new(&self.agent_id, &self.query).nl2sql_only(self.nl2sql_only);
        if let Some(thread_id) = &self.thread_id {
            request = request.with_thread_id(thread_id);
        }
        if self.human_feedback {
            request = request.with_human_feedback(self.feedback.clone(), self.rejected_plan);
        }
        request
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let opts = Opts::parse();
    let config = AppConfig::load_from_cli(&opts.global).context("Failed to load configuration")?;

    init_tracing(&config.logging);

    info!(
        name: "config.loaded",
        base_url = %config.backend.base_url,
        stream_path = %config.backend.stream_path,
        "Configuration loaded"
    );

    let client = StreamClient::from_config(&config.backend)?;

    match opts.command {
        Command::Url(args) => {
            println!("{}", client.request_url(&args.to_request()));
            Ok(())
        }
        Command::Search(args) => run_search(client, &config.backend, &args).await,
    }
}

/// Initialize tracing (M-LOG-STRUCTURED). Logs go to stderr; nodes go to stdout.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run_search(
    client: StreamClient,
    backend: &BackendConfig,
    args: &SearchArgs,
) -> anyhow::Result<()> {
    let (search, mut events) = SessionSearch::new(client, SessionCoordinator::new()).with_events();
    let session_id = args
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    search.start(&session_id, args.to_request())?;

    let mut failure = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Node { node, .. }) => print_node(&node),
                Some(SessionEvent::Error { error, fatal: false, .. }) => {
                    eprintln!("warning: {error}");
                }
                Some(SessionEvent::Error { error, .. }) => {
                    failure = Some(error);
                    break;
                }
                Some(SessionEvent::Completed { .. }) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                search.sessions().destroy(&session_id);
                bail!("search interrupted");
            }
        }
    }

    let Some(state) = search.sessions().snapshot(&session_id) else {
        bail!("session {session_id} disappeared during the turn");
    };
    info!(
        name: "search.finished",
        session_id = %session_id,
        nodes = state.node_blocks.iter().map(Vec::len).sum::<usize>(),
        html_report_bytes = state.html_report_size,
        markdown_report_bytes = state.markdown_report_content.len(),
        "Search turn finished"
    );

    if let Some(error) = failure {
        bail!("search failed: {error}; run the same command again to retry");
    }

    if let Some(dir) = &args.save_report {
        if state.html_report_content.is_empty() {
            eprintln!("warning: the turn produced no HTML report");
        } else {
            save_report(backend, &session_id, &state.html_report_content, dir).await?;
        }
    }
    Ok(())
}

async fn save_report(
    backend: &BackendConfig,
    session_id: &str,
    content: &str,
    dir: &Path,
) -> anyhow::Result<()> {
    let report = ReportClient::from_config(backend)?
        .download_html(session_id, content)
        .await
        .context("Failed to download HTML report")?;
    let path = dir.join(&report.filename);
    tokio::fs::write(&path, &report.body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("report saved to {}", path.display());
    Ok(())
}

fn print_node(node: &NodeResponse) {
    let marker = if node.error { "!" } else { " " };
    match node.result_set() {
        Ok(Some(data)) => {
            let rows = &data.result_set;
            println!("{marker}[{}:{}] {}", node.node_name, node.text_type, rows.column.join(" | "));
            for index in 0..rows.data.len() {
                if let Some(cells) = rows.row(index) {
                    println!("    {}", cells.join(" | "));
                }
            }
            if let Some(error) = &rows.error_msg {
                println!("!   {error}");
            }
        }
        _ => println!("{marker}[{}:{}] {}", node.node_name, node.text_type, node.text),
    }
}
