//! flowtrace - SmartFlow + agent session log debugger
//!
//! Loads already-fetched SmartFlow and agent logs (and optionally the flow
//! definitions) from disk, builds the merged session timeline and prints it
//! as JSON.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/flowtrace/flowtrace.log (~/.local/state/flowtrace/flowtrace.log)
//! - Config: $XDG_CONFIG_HOME/flowtrace/config.toml (~/.config/flowtrace/config.toml)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowtrace_core::ingest::{self, session_id};
use flowtrace_core::{
    AgentInfo, AgentType, Config, Infrastructure, NormalizedEvent, RawLogEntry, Session,
    SessionStore, Summary,
};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "flowtrace")]
#[command(about = "Merge SmartFlow and agent logs into one annotated session timeline")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/flowtrace/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Compact JSON output (default: pretty)
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print one session's timeline and summary
    Inspect {
        #[command(flatten)]
        input: Input,

        /// Show only the summary (no timeline)
        #[arg(long)]
        summary: bool,

        /// Include the raw log arrays in the output
        #[arg(long)]
        include_raw: bool,
    },

    /// Print every loaded session as one export document
    Export {
        #[command(flatten)]
        input: Input,
    },

    /// Print per-session counts
    Sessions {
        #[command(flatten)]
        input: Input,
    },

    /// Print the flow diagram of the loaded definitions
    Flow {
        #[command(flatten)]
        input: Input,
    },

    /// Print one BlockAgent block definition
    Block {
        #[command(flatten)]
        input: Input,

        /// Block id to look up
        block_id: String,
    },
}

#[derive(clap::Args)]
struct Input {
    /// SmartFlow debug log (JSON array, or text dump with --text)
    #[arg(long)]
    smartflow: PathBuf,

    /// Agent log (service envelope or JSON array)
    #[arg(long)]
    agent: Option<PathBuf>,

    /// Session id (default: taken from the logs)
    #[arg(long)]
    session_id: Option<String>,

    /// Parse the SmartFlow file as the plain-text dump format
    #[arg(long)]
    text: bool,

    /// BlockAgent definition (JSON array of blocks)
    #[arg(long)]
    blockagent_infra: Option<PathBuf>,

    /// SmartFlow chain XML, or an export containing it
    #[arg(long)]
    smartflow_xml: Option<PathBuf>,
}

/// Inspect output; raw arrays only on request
#[derive(Serialize)]
struct InspectOutput<'a> {
    session_id: &'a str,
    agent_type: AgentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_info: Option<&'a AgentInfo>,
    raw_digest: &'a str,
    summary: &'a Summary,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeline: Option<&'a [NormalizedEvent]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_smartflow_log: Option<&'a [RawLogEntry]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_agent_log: Option<&'a [RawLogEntry]>,
}

impl<'a> InspectOutput<'a> {
    fn new(session: &'a Session, summary_only: bool, include_raw: bool) -> Self {
        Self {
            session_id: &session.session_id,
            agent_type: session.agent_type,
            agent_info: session.agent_info.as_ref(),
            raw_digest: &session.raw_digest,
            summary: &session.summary,
            timeline: (!summary_only).then_some(session.timeline.as_slice()),
            raw_smartflow_log: include_raw.then_some(session.raw_smartflow_log.as_slice()),
            raw_agent_log: include_raw.then_some(session.raw_agent_log.as_slice()),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    let _log_guard =
        flowtrace_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("flowtrace starting");

    let store = SessionStore::with_config(config.normalize.clone());

    match &args.command {
        Command::Inspect {
            input,
            summary,
            include_raw,
        } => {
            let id = load(&store, input, &config)?;
            let session = store.require(&id)?;
            print_json(&InspectOutput::new(&session, *summary, *include_raw), args.compact)?;
        }
        Command::Export { input } => {
            load(&store, input, &config)?;
            let exported = store.export().context("failed to export sessions")?;
            if args.compact {
                let value: Value = serde_json::from_str(&exported)?;
                println!("{}", serde_json::to_string(&value)?);
            } else {
                println!("{exported}");
            }
        }
        Command::Sessions { input } => {
            load(&store, input, &config)?;
            print_json(&store.overviews(), args.compact)?;
        }
        Command::Flow { input } => {
            let id = load(&store, input, &config)?;
            print_json(&store.flow_diagram(&id)?, args.compact)?;
        }
        Command::Block { input, block_id } => {
            load(&store, input, &config)?;
            let Some(block) = store.block_info(block_id) else {
                bail!("block not found: {block_id} (is --blockagent-infra set?)");
            };
            print_json(&block, args.compact)?;
        }
    }

    Ok(())
}

/// Read both logs, resolve the session id and put the session in the store.
fn load(store: &SessionStore, input: &Input, config: &Config) -> Result<String> {
    let smartflow_text = read(&input.smartflow)?;
    let smartflow = if input.text {
        ingest::text::parse_smartflow_text(&smartflow_text, &config.ingest)
    } else {
        smartflow_entries(&smartflow_text)
            .with_context(|| format!("invalid SmartFlow log {}", input.smartflow.display()))?
    };

    let agent_payload = match &input.agent {
        Some(path) => {
            let text = read(path)?;
            serde_json::from_str::<Value>(&text)
                .with_context(|| format!("invalid JSON in agent log {}", path.display()))?
        }
        None => Value::Array(Vec::new()),
    };
    let agent_log = ingest::agent_log(&agent_payload).context("invalid agent log")?;

    let id = input
        .session_id
        .clone()
        .or_else(|| agent_log.session_id.clone())
        .or_else(|| session_id::from_entries(&smartflow))
        .or_else(|| {
            input
                .text
                .then(|| session_id::from_text(&smartflow_text))
                .flatten()
        });
    let Some(id) = id else {
        bail!("could not determine the session id from the logs; pass --session-id");
    };

    tracing::info!(
        session_id = %id,
        smartflow_entries = smartflow.len(),
        agent_entries = agent_log.entries.len(),
        "Loading session"
    );
    store
        .put_agent_envelope(&id, smartflow, &agent_payload)
        .with_context(|| format!("failed to build session {id}"))?;

    if input.blockagent_infra.is_some() || input.smartflow_xml.is_some() {
        let infrastructure = Infrastructure::from_files(
            input.blockagent_infra.as_deref(),
            input.smartflow_xml.as_deref(),
        )
        .context("failed to load infrastructure")?;
        store.attach_infrastructure(&id, infrastructure)?;
    }
    Ok(id.trim().to_string())
}

fn smartflow_entries(text: &str) -> Result<Vec<RawLogEntry>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Array(entries) => Ok(entries),
        _ => bail!("expected a JSON array of log entries (use --text for text dumps)"),
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    if compact {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}
