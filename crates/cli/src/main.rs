//! mnemos command line.
//!
//! Usage:
//!   mnemos query "why did we pick rust" [--json]
//!   mnemos remember "Team chose Rust for the kernel"
//!   mnemos ingest records.jsonl
//!   mnemos recent [LIMIT]
//!   mnemos walk <ID> [DEPTH]
//!
//! # Environment Variables
//!
//! - `MNEMOS_CONFIG` - Path to a TOML config file
//! - `MNEMOS_STORE_PATH` - Store file, overrides `store.path`
//! - `RUST_LOG` - Log filter (default: info,mnemos_memory=debug)

use std::path::PathBuf;

use anyhow::{bail, Context};
use mnemos_memory::format::format_record;
use mnemos_memory::{ContextPipeline, MemoryRecord, MnemosConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "\
Usage: mnemos [OPTIONS] <COMMAND> [ARGS]

Commands:
  query <TEXT> [--json]   Build a context block for TEXT
  remember <TEXT>         Append a fact record
  ingest <FILE>           Append JSON-lines records from FILE (- for stdin)
  recent [LIMIT]          Print the most recent records
  walk <ID> [DEPTH]       Follow relationships from ID

Options:
  -c, --config <FILE>     Path to config.toml (env: MNEMOS_CONFIG)
  -s, --store <FILE>      Store file (env: MNEMOS_STORE_PATH)
  -h, --help              Show this help message";

enum Command {
    Query { text: String, json: bool },
    Remember { text: String },
    Ingest { source: String },
    Recent { limit: usize },
    Walk { id: String, depth: Option<usize> },
}

struct Args {
    config: Option<PathBuf>,
    store: Option<PathBuf>,
    command: Command,
}

fn parse_args(raw: &[String]) -> anyhow::Result<Option<Args>> {
    let mut config = None;
    let mut store = None;
    let mut json = false;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "--config" | "-c" => {
                let value = raw.get(i + 1).context("--config needs a path")?;
                config = Some(PathBuf::from(value));
                i += 1;
            }
            "--store" | "-s" => {
                let value = raw.get(i + 1).context("--store needs a path")?;
                store = Some(PathBuf::from(value));
                i += 1;
            }
            "--json" => json = true,
            "--help" | "-h" => return Ok(None),
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("query") => {
            let text = positional.collect::<Vec<_>>().join(" ");
            if text.trim().is_empty() {
                bail!("query needs text");
            }
            Command::Query { text, json }
        }
        Some("remember") => {
            let text = positional.collect::<Vec<_>>().join(" ");
            if text.trim().is_empty() {
                bail!("remember needs text");
            }
            Command::Remember { text }
        }
        Some("ingest") => Command::Ingest {
            source: positional.next().context("ingest needs a file or -")?,
        },
        Some("recent") => Command::Recent {
            limit: match positional.next() {
                Some(n) => n.parse::<usize>().context("LIMIT must be a number")?,
                None => 10,
            },
        },
        Some("walk") => Command::Walk {
            id: positional.next().context("walk needs a record id")?,
            depth: positional
                .next()
                .map(|d| d.parse::<usize>())
                .transpose()
                .context("DEPTH must be a number")?,
        },
        Some(other) => bail!("unknown command: {other}"),
        None => return Ok(None),
    };

    Ok(Some(Args {
        config,
        store,
        command,
    }))
}

fn load_config(args: &Args) -> anyhow::Result<MnemosConfig> {
    // CLI flag > env var > defaults
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("MNEMOS_CONFIG").ok().map(PathBuf::from));

    let mut config = match config_path {
        Some(path) => MnemosConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => MnemosConfig::default(),
    };

    if let Some(store) = args
        .store
        .clone()
        .or_else(|| std::env::var("MNEMOS_STORE_PATH").ok().map(PathBuf::from))
    {
        config.store.path = store;
    }
    Ok(config)
}

async fn read_records(source: &str) -> anyhow::Result<Vec<MemoryRecord>> {
    let contents = if source == "-" {
        use tokio::io::AsyncReadExt;
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("reading {source}"))?
    };

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{source}:{}: invalid record", n + 1))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mnemos_memory=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let Some(args) = parse_args(&raw)? else {
        println!("{USAGE}");
        return Ok(());
    };

    let config = load_config(&args)?;
    let max_record_chars = config.context.max_record_chars;
    let default_depth = config.graph.max_depth;
    let pipeline = ContextPipeline::from_config(&config).context("building embedding backend")?;

    match args.command {
        Command::Query { text, json } => {
            let output = pipeline.build_context(&text).await;
            if json {
                let value = serde_json::json!({
                    "entity": output.entity,
                    "path": output.path,
                    "retrieved": output.retrieved,
                    "block": output.block,
                    "read_warning": output.read_warning,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{}", output.block.text);
            }
        }
        Command::Remember { text } => {
            let record = MemoryRecord::fact(text);
            let id = record.id.clone();
            let outcomes = pipeline.ingest(vec![record]).await?;
            tracing::info!(id = %id, outcome = ?outcomes.first(), "Remembered");
            println!("{id}");
        }
        Command::Ingest { source } => {
            let records = read_records(&source).await?;
            let total = records.len();
            let outcomes = pipeline.ingest(records).await?;
            let appended = outcomes
                .iter()
                .filter(|o| **o == mnemos_memory::AppendOutcome::Appended)
                .count();
            println!("{appended} appended, {} already present", total - appended);
        }
        Command::Recent { limit } => {
            for record in pipeline.store().get_recent(limit).await? {
                println!("{}", format_record(&record, max_record_chars));
            }
        }
        Command::Walk { id, depth } => {
            let chain = pipeline
                .store()
                .walk(&id, depth.unwrap_or(default_depth))
                .await?;
            if chain.is_empty() {
                bail!("no record with id {id}");
            }
            for link in chain {
                let via = link
                    .relationship
                    .as_ref()
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "unknown".into());
                println!(
                    "{}{} ({via}) {}",
                    "  ".repeat(link.depth),
                    link.record.id,
                    format_record(&link.record, max_record_chars)
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_parse_query_with_flags() {
        let parsed = parse_args(&args("--store /tmp/m.jsonl query why rust --json"))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.store, Some(PathBuf::from("/tmp/m.jsonl")));
        match parsed.command {
            Command::Query { text, json } => {
                assert_eq!(text, "why rust");
                assert!(json);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_parse_walk_depth() {
        let parsed = parse_args(&args("walk f1 3")).unwrap().unwrap();
        assert!(matches!(parsed.command, Command::Walk { ref id, depth: Some(3) } if id == "f1"));
    }

    #[test]
    fn test_no_command_is_help() {
        assert!(parse_args(&[]).unwrap().is_none());
        assert!(parse_args(&args("-h")).unwrap().is_none());
    }

    #[test]
    fn test_unknown_command_errors() {
        assert!(parse_args(&args("frobnicate")).is_err());
    }
}
