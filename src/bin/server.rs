//! scene-sync-server binary
//!
//! Starts the sync engine and serves it over a line-oriented reference
//! transport: each stdin line is `<subject> <json>`, each stdout line is an
//! outbound frame in the same shape. Real deployments put a WebSocket or
//! bus adapter in front of [`SyncAgent`] instead.
//!
//! ## Configuration (defaults → TOML file → env → flags)
//!
//! | Key / env var                        | Default   | Description                        |
//! |--------------------------------------|-----------|------------------------------------|
//! | `SCENE_SYNC_CONFIG`                  | *(none)*  | Optional TOML config file          |
//! | `SCENE_SYNC_SESSION`                 | `default` | Session name stamped on events     |
//! | `SCENE_SYNC_QUEUE_CAPACITY`          | `1024`    | Pending-delta queue bound          |
//! | `SCENE_SYNC_CAUSALITY_TIMEOUT_MS`    | `5000`    | Discard queued deltas after this   |
//! | `SCENE_SYNC_RESOLVER_POLL_MS`        | `10`      | Resolver poll interval             |
//! | `SCENE_SYNC_DELTA_LOG_CAPACITY`      | `1000`    | Audit log length                   |
//! | `SCENE_SYNC_CHECKSUM_ALGORITHM`      | `sha256`  | `sha256` or `md5` (any case)       |
//! | `SCENE_SYNC_EVENT_BUFFER`            | `256`     | Applied-delta broadcast buffer     |
//! | `SCENE_SYNC_CLIENT_OP_HISTORY`       | `256`     | Op ids kept per client             |

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use scene_sync::{ChecksumAlgorithm, Frame, SyncAgent, SyncAgentConfig, SyncConfig, SyncService};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "scene-sync-server", about = "Scene Sync Engine", version)]
struct Args {
    /// Optional TOML configuration file
    #[arg(long, env = "SCENE_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Session name stamped on outbound events
    #[arg(long, env = "SCENE_SYNC_SESSION", default_value = "default")]
    session: String,

    /// Pending-delta queue capacity
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Causality timeout (ms) before a queued delta is discarded
    #[arg(long)]
    causality_timeout_ms: Option<u64>,

    /// Resolver poll interval (ms)
    #[arg(long)]
    resolver_poll_ms: Option<u64>,

    /// Checksum algorithm (sha256 | md5)
    #[arg(long)]
    checksum: Option<ChecksumAlgorithm>,

    /// Do not forward applied-delta events to stdout
    #[arg(long)]
    no_events: bool,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn load_config(args: &Args) -> Result<SyncConfig> {
    let mut builder =
        config::Config::builder().add_source(config::Config::try_from(&SyncConfig::default())?);

    if let Some(path) = &args.config {
        builder = builder.add_source(config::File::from(path.as_path()));
    }

    builder = builder.add_source(config::Environment::with_prefix("SCENE_SYNC").try_parsing(true));

    let mut cfg: SyncConfig = builder.build()?.try_deserialize()?;

    if let Some(v) = args.queue_capacity {
        cfg.queue_capacity = v;
    }
    if let Some(v) = args.causality_timeout_ms {
        cfg.causality_timeout_ms = v;
    }
    if let Some(v) = args.resolver_poll_ms {
        cfg.resolver_poll_ms = v;
    }
    if let Some(v) = args.checksum {
        cfg.checksum_algorithm = v;
    }
    Ok(cfg)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging (stderr – stdout carries frames)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scene_sync=debug".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args).context("Failed to load configuration")?;

    tracing::info!(
        session = %args.session,
        queue_capacity = config.queue_capacity,
        causality_timeout_ms = config.causality_timeout_ms,
        checksum = %config.checksum_algorithm,
        "Starting scene-sync-server"
    );

    let service = Arc::new(SyncService::start(config));

    let (inbound_tx, inbound_rx) = mpsc::channel::<Frame>(256);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(256);

    let agent = SyncAgent::new(
        SyncAgentConfig {
            session: args.session.clone(),
            forward_events: !args.no_events,
        },
        service.clone(),
    );
    let agent_handle = tokio::spawn(agent.run(inbound_rx, outbound_tx));

    // Outbound frames → stdout
    let writer_handle = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = outbound_rx.recv().await {
            let line = format!(
                "{} {}\n",
                frame.subject,
                String::from_utf8_lossy(&frame.payload)
            );
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                log::warn!("stdout closed: {}", e);
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    // stdin lines → inbound frames
    let reader = async {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (subject, body) = line.split_once(' ').unwrap_or((line, ""));
            let frame = Frame::new(subject.to_string(), body.trim().to_string());
            if inbound_tx.send(frame).await.is_err() {
                break;
            }
        }
        anyhow::Ok(())
    };

    tokio::select! {
        result = reader => result.context("Failed to read frames from stdin")?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("scene-sync-server shutting down (SIGINT)");
        }
    }

    // Closing the inbound side stops the agent, which closes outbound.
    drop(inbound_tx);
    agent_handle.await.context("SyncAgent task panicked")??;
    writer_handle.await.context("stdout writer task panicked")?;

    let service = Arc::try_unwrap(service)
        .map_err(|_| anyhow!("SyncService still shared at shutdown"))?;
    let final_state = service.shutdown().await;

    tracing::info!(
        version = final_state.version,
        checksum = %final_state.checksum,
        "scene-sync-server stopped"
    );
    Ok(())
}
