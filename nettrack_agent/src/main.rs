//! nettrack_agent: sampling worker process. Speaks newline-delimited JSON on stdin/stdout
//! (control in, snapshots out), or prints a single snapshot with `--once`.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use nettrack_agent::config::AgentConfig;
use nettrack_agent::correlator::correlate;
use nettrack_agent::sampler::Sampler;
use nettrack_agent::sources::{HostSource, SystemSource};
use nettrack_agent::stdio::serve_stdio;
use nettrack_agent::worker::SamplingWorker;

struct ParsedArgs {
    once: bool,
    interval_ms: Option<u64>,
    filters: Vec<String>,
}

fn usage(prog: &str) -> String {
    format!("Usage: {prog} [--once] [--interval MS|-i MS] [--filter NAME|-f NAME]...")
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "nettrack_agent".into());
    let mut once = false;
    let mut interval_ms: Option<u64> = None;
    let mut filters = Vec::new();

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(usage(&prog)),
            "--once" => once = true,
            "--interval" | "-i" => {
                interval_ms = it.next().and_then(|v| v.parse().ok());
            }
            "--filter" | "-f" => {
                if let Some(v) = it.next() {
                    filters.push(v);
                }
            }
            _ if arg.starts_with("--interval=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    interval_ms = v.parse().ok();
                }
            }
            _ if arg.starts_with("--filter=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        filters.push(v.to_string());
                    }
                }
            }
            _ => return Err(format!("Unexpected argument '{arg}'. {}", usage(&prog))),
        }
    }
    Ok(ParsedArgs {
        once,
        interval_ms: interval_ms.filter(|ms| *ms > 0),
        filters,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; logs go to stderr
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

    let mut config = AgentConfig::from_env();
    if let Some(ms) = parsed.interval_ms {
        config.interval = Duration::from_millis(ms);
    }
    if !parsed.filters.is_empty() {
        config.filters = parsed.filters;
    }

    let source: Arc<dyn SystemSource> = Arc::new(HostSource::default());
    let sampler = Sampler::new(source);

    if parsed.once {
        return print_once(&sampler, &config).await;
    }
    serve_stdio(SamplingWorker::new(sampler, config)).await
}

// Rates need two refreshes, so sample twice one interval apart.
async fn print_once(sampler: &Sampler, config: &AgentConfig) -> anyhow::Result<()> {
    sampler.sample().await?;
    tokio::time::sleep(config.interval).await;
    let raw = sampler.sample().await?;
    let snapshot = correlate(&raw, &config.filters);
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
