//! TriRed Control Panel - Main Entry Point
//!
//! Terminal front end for the control session: print node status, toggle
//! nodes, send queries to the leader, or watch the fleet continuously.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trired_common::{TriRedConfig, METRICS};
use trired_panel::{ControlSession, DispatchOutcome, NodeId, RegistrySnapshot, ToggleReport};

const BUSY_NOTICE: &str = "PROCESSING... previous query still in flight";

/// TriRed control panel
#[derive(Parser, Debug)]
#[command(name = "trired-panel")]
#[command(about = "Control panel for a leader-routed inference fleet", long_about = None)]
struct Cli {
    /// YAML configuration file (built-in three-node defaults when absent)
    #[arg(short = 'c', long = "config", env = "TRIRED_CONFIG")]
    config: Option<PathBuf>,

    /// Print Prometheus metrics before exiting
    #[arg(long = "metrics")]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every node once and print the result
    Status,

    /// Start a stopped node or stop a running one
    Toggle {
        /// Node id
        id: NodeId,
    },

    /// Send a query to the current leader
    Query {
        /// Query text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Poll continuously and accept commands on stdin
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TriRedConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TriRedConfig::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;

    init_logging(&config);

    info!(
        "Panel configuration loaded: {} nodes, poll every {:?}, request timeout {:?}",
        config.nodes.len(),
        config.poll_interval(),
        config.request_timeout()
    );

    let session = Arc::new(ControlSession::from_config(&config)?);

    match cli.command {
        Command::Status => {
            let snapshot = session.refresh().await;
            print!("{}", render(&snapshot));
        }
        Command::Toggle { id } => {
            session.refresh().await;
            let report = session.toggle(id).await?;
            print_toggle(&report);
        }
        Command::Query { text } => {
            session.refresh().await;
            if let Some(outcome) = session.dispatch(&text.join(" ")).await {
                println!("{}", outcome);
            }
        }
        Command::Watch => watch(session.clone()).await?,
    }

    session.shutdown().await;

    if cli.metrics && config.observability.enable_metrics {
        print!("{}", METRICS.gather());
    }

    Ok(())
}

fn init_logging(config: &TriRedConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "trired_panel={level},trired_common={level}",
            level = config.observability.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.structured_logging {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Keep the session active, redraw on every snapshot, take commands on stdin
async fn watch(session: Arc<ControlSession>) -> Result<()> {
    let mut updates = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    session.activate();
    println!("Commands: status | toggle <id> | query <text> | quit");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                print!("{}", render(&snapshot));
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !handle_line(&session, line.trim()) {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Run one operator command; returns false on `quit`
fn handle_line(session: &Arc<ControlSession>, line: &str) -> bool {
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));

    match word {
        "" => {}
        "quit" | "exit" => return false,
        "status" => print!("{}", render(&session.snapshot())),
        "toggle" => match rest.trim().parse::<NodeId>() {
            Ok(id) => {
                let session = session.clone();
                tokio::spawn(async move {
                    match session.toggle(id).await {
                        Ok(report) => print_toggle(&report),
                        Err(e) => println!("{}", e),
                    }
                });
            }
            Err(_) => println!("usage: toggle <id>"),
        },
        "query" => {
            if session.is_busy() {
                println!("{}", BUSY_NOTICE);
            } else {
                let session = session.clone();
                let query = rest.to_string();
                tokio::spawn(async move {
                    let outcome = session.dispatch(&query).await;
                    if let Some(line) = dispatch_line(&query, outcome.as_ref()) {
                        println!("{}", line);
                    }
                });
            }
        }
        other => warn!("Unknown command: {}", other),
    }

    true
}

/// Line to print for a background dispatch
///
/// `dispatch` refuses a non-blank query only while another one is in flight
/// (or after teardown), which can happen between the `is_busy` check and the
/// spawned call.
fn dispatch_line(query: &str, outcome: Option<&DispatchOutcome>) -> Option<String> {
    match outcome {
        Some(outcome) => Some(format!("> {}", outcome)),
        None if query.trim().is_empty() => None,
        None => Some(BUSY_NOTICE.to_string()),
    }
}

fn print_toggle(report: &ToggleReport) {
    match &report.command_error {
        Some(e) => println!(
            "Failed to {} node {}: {}",
            report.command.as_str(),
            report.node_id,
            e
        ),
        None => println!("Sent {} to node {}", report.command.as_str(), report.node_id),
    }
    print!("{}", render(&report.snapshot));
}

fn render(snapshot: &RegistrySnapshot) -> String {
    let mut out = format!(
        "{:<6}{:<24}{:<10}{}\n",
        "NODE", "ADDRESS", "STATUS", "ROLE"
    );
    for node in snapshot.iter() {
        let role = if node.is_leader() { "leader" } else { "" };
        out.push_str(&format!(
            "{:<6}{:<24}{:<10}{}\n",
            node.id(),
            node.address(),
            node.status().as_str(),
            role
        ));
    }
    out
}
