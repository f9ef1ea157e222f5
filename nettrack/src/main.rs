//! Entry point for the nettrack console monitor. Parses args, starts the monitor and prints
//! one line (or one JSON snapshot) per tick.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use tracing_subscriber::EnvFilter;

use nettrack::monitor::{traffic_scalar, MonitorOptions, TrafficMonitor};
use nettrack::report::summary_line;
use nettrack::settings::{default_store_path, load_settings};
use nettrack::store::{JsonFileStore, MemoryStore, TrafficStore};
use nettrack::supervisor::{agent_process_entrypoint, in_process_entrypoint, WorkerSupervisor};
use nettrack_agent::config::AgentConfig;
use nettrack_agent::sources::{HostSource, SystemSource};

struct ParsedArgs {
    filters: Vec<String>,
    agent: Option<PathBuf>,
    json: bool,
    ticks: Option<u64>,
    no_store: bool,
}

fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--filter NAME|-f NAME]... [--agent PATH|-a PATH] [--json] [--ticks N] [--no-store]"
    )
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "nettrack".into());
    let mut filters = Vec::new();
    let mut agent: Option<PathBuf> = None;
    let mut json = false;
    let mut ticks: Option<u64> = None;
    let mut no_store = false;

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(usage(&prog)),
            "--filter" | "-f" => {
                if let Some(v) = it.next() {
                    filters.push(v);
                }
            }
            "--agent" | "-a" => {
                agent = it.next().map(PathBuf::from);
            }
            "--json" => json = true,
            "--no-store" => no_store = true,
            "--ticks" => {
                ticks = it.next().and_then(|v| v.parse().ok());
            }
            _ if arg.starts_with("--filter=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        filters.push(v.to_string());
                    }
                }
            }
            _ if arg.starts_with("--agent=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        agent = Some(PathBuf::from(v));
                    }
                }
            }
            _ => return Err(format!("Unexpected argument '{arg}'. {}", usage(&prog))),
        }
    }
    Ok(ParsedArgs {
        filters,
        agent,
        json,
        ticks,
        no_store,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(());
        }
    };

    let mut settings = load_settings();
    if !parsed.filters.is_empty() {
        settings.filters = parsed.filters;
    }
    if parsed.agent.is_some() {
        settings.agent_path = parsed.agent;
    }

    let store: Arc<dyn TrafficStore> = if parsed.no_store {
        Arc::new(MemoryStore::new())
    } else {
        let path = settings.store_path.clone().unwrap_or_else(default_store_path);
        Arc::new(JsonFileStore::open(path))
    };

    let entrypoint = match settings.agent_path.clone() {
        Some(path) => agent_process_entrypoint(path),
        None => {
            let source: Arc<dyn SystemSource> =
                tokio::task::spawn_blocking(|| Arc::new(HostSource::default()) as Arc<dyn SystemSource>)
                    .await?;
            in_process_entrypoint(source, AgentConfig::from_env())
        }
    };

    let supervisor = WorkerSupervisor::new();
    let monitor = TrafficMonitor::start(
        supervisor.clone(),
        entrypoint,
        store,
        MonitorOptions::from(&settings),
    )?;
    let mut ticks = monitor.subscribe();
    let mut liveness = tokio::time::interval(Duration::from_millis(500));
    let mut worker_died = false;

    loop {
        tokio::select! {
            changed = ticks.changed() => {
                if changed.is_err() {
                    break;
                }
                let n = *ticks.borrow_and_update();
                let snapshot = monitor.analyze();
                if parsed.json {
                    println!("{}", serde_json::to_string(&snapshot)?);
                } else {
                    let (upload, download) = traffic_scalar(&snapshot);
                    println!("{}", summary_line(&snapshot, upload, download, 3));
                }
                if parsed.ticks.is_some_and(|limit| n >= limit) {
                    break;
                }
            }
            _ = liveness.tick() => {
                if !monitor.is_running() {
                    warn!("worker exited");
                    worker_died = true;
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(monitor);
    supervisor.stop_all();
    if worker_died {
        anyhow::bail!("traffic worker exited unexpectedly");
    }
    Ok(())
}
