//! Demo host for the `navy` election engine: wires CLI flags and an optional
//! TOML file into a running [`navy::Member`], logs every promotion/demotion
//! to a plain append-only file, and resigns cleanly on SIGINT/SIGTERM.

mod config;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use navy::{EngineConfig, Member, PeerInfo, Proto};

use crate::config::{default_discovery_backoff, FileConfig, HostConfig};

#[derive(Parser, Debug)]
#[command(name = "navy", version, about = "Run a fleet member of the navy leader election engine")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// This member's fleet rank. Higher wins ties.
    #[arg(long)]
    rank: Option<i64>,

    /// Address other members should dial to reach this one.
    #[arg(long)]
    external_address: Option<String>,

    /// Address to bind the listener on, if different from `external_address`.
    #[arg(long)]
    bind_address: Option<String>,

    /// Fleet identifier; members with a different callsign are rejected.
    #[arg(long, default_value = "default")]
    callsign: String,

    /// Seed address(es) to ask "who is the leader" during discovery. Omit to
    /// bootstrap a new fleet instead.
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// Pre-known peer(s) to connect to at startup, as `rank=address`. Unlike
    /// `--seed` these are dialed directly rather than used for discovery.
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Address family restriction: tcp, tcp4, or tcp6.
    #[arg(long, default_value = "tcp")]
    proto: String,

    /// Opaque payload (UTF-8) this member advertises if it becomes leader.
    #[arg(long)]
    payload: Option<String>,

    /// Where to append promotion/demotion log lines.
    #[arg(long, default_value = "navy-events.log")]
    event_log: PathBuf,

    /// Skip discovery and bootstrap a fleet of one.
    #[arg(long)]
    solo: bool,
}

fn resolve(cli: Cli) -> anyhow::Result<HostConfig> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let rank = cli.rank.or(file.rank).ok_or_else(|| anyhow::anyhow!("--rank is required (or set `rank` in the config file)"))?;
    let external_address = cli
        .external_address
        .or(file.external_address)
        .ok_or_else(|| anyhow::anyhow!("--external-address is required (or set `external_address` in the config file)"))?;
    let bind_address = cli.bind_address.or(file.bind_address).unwrap_or_else(|| external_address.clone());
    let callsign = if cli.callsign != "default" { cli.callsign } else { file.callsign.unwrap_or_else(|| "default".to_string()) };
    let seeds = if !cli.seeds.is_empty() { cli.seeds } else { file.seeds };
    let solo = cli.solo;

    let proto_str = file.proto.as_deref().unwrap_or(&cli.proto).to_string();
    let proto: Proto = HostConfig::proto_from_str(&proto_str)?;

    let mut engine = EngineConfig::default();
    engine.proto = proto;
    if let Some(retries) = file.max_retries {
        engine.max_retries = retries;
    }

    let mut discovery_backoff = default_discovery_backoff();
    if let Some(retries) = file.discovery_retries {
        discovery_backoff.max_retries = retries;
    }

    Ok(HostConfig {
        rank,
        external_address,
        bind_address,
        callsign,
        seeds,
        solo,
        engine,
        discovery_backoff,
    })
}

fn parse_static_peer(spec: &str) -> anyhow::Result<PeerInfo> {
    let (rank, address) = spec
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("--peer must be formatted as rank=address, got {spec:?}"))?;
    Ok(PeerInfo {
        rank: rank.parse().map_err(|_| anyhow::anyhow!("invalid rank in --peer {spec:?}"))?,
        address: address.to_string(),
        ready: true,
    })
}

fn log_event(path: &PathBuf, line: &str) {
    let timestamp = chrono::Utc::now().to_rfc3339();
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| writeln!(f, "{timestamp} {line}"));
    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to write event log");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        tracing::warn!(error = %e, "failed to install metrics exporter, navy_peer_count will not be exported");
    }

    let cli = Cli::parse();
    let event_log = cli.event_log.clone();
    let payload = cli.payload.clone().map(String::into_bytes);
    let static_peers = cli.peers.iter().map(|s| parse_static_peer(s)).collect::<anyhow::Result<Vec<_>>>()?;
    let host = resolve(cli)?;

    let member = Member::new(host.rank, host.external_address.clone(), host.callsign.clone(), host.engine);
    if payload.is_some() {
        member.set_payload(payload).await;
    }

    let promoted_log = event_log.clone();
    member
        .on_promotion(Arc::new(move |signal| {
            log_event(&promoted_log, "PROMOTED to admiral");
            signal.complete();
        }))
        .await;

    let demoted_log = event_log.clone();
    member
        .on_demotion(Arc::new(move |signal| {
            log_event(&demoted_log, "DEMOTED from admiral");
            signal.complete();
        }))
        .await;

    member.listen(&host.bind_address).await?;

    if !static_peers.is_empty() {
        member.connect(&static_peers).await?;
    }

    if host.solo || host.seeds.is_empty() {
        tracing::info!("no seeds configured, bootstrapping a fleet of one");
    } else {
        member.discover_with_backoff(&host.seeds, host.discovery_backoff).await?;
    }

    let run_handle = {
        let member = member.clone();
        tokio::spawn(async move {
            if let Err(e) = member.run(None).await {
                tracing::error!(error = %e, "run loop exited with an error");
            }
        })
    };

    tracing::info!(rank = host.rank, address = %host.external_address, "navy member running, press Ctrl-C to resign");
    wait_for_shutdown_signal().await;

    member.resign().await?;
    let _ = run_handle.await;
    tracing::info!("resigned, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_cli() -> Cli {
        Cli {
            config: None,
            rank: None,
            external_address: None,
            bind_address: None,
            callsign: "default".to_string(),
            seeds: Vec::new(),
            peers: Vec::new(),
            proto: "tcp".to_string(),
            payload: None,
            event_log: PathBuf::from("navy-events.log"),
            solo: false,
        }
    }

    #[test]
    fn parse_static_peer_splits_rank_and_address() {
        let peer = parse_static_peer("3=127.0.0.1:9003").unwrap();
        assert_eq!(peer.rank, 3);
        assert_eq!(peer.address, "127.0.0.1:9003");
        assert!(peer.ready);
    }

    #[test]
    fn parse_static_peer_rejects_missing_equals() {
        assert!(parse_static_peer("127.0.0.1:9003").is_err());
    }

    #[test]
    fn parse_static_peer_rejects_non_numeric_rank() {
        assert!(parse_static_peer("x=127.0.0.1:9003").is_err());
    }

    #[test]
    fn resolve_requires_rank_and_external_address() {
        let err = resolve(bare_cli()).unwrap_err();
        assert!(err.to_string().contains("--rank"));
    }

    #[test]
    fn resolve_fills_bind_address_from_external_address_by_default() {
        let mut cli = bare_cli();
        cli.rank = Some(7);
        cli.external_address = Some("10.0.0.1:9000".to_string());
        let host = resolve(cli).unwrap();
        assert_eq!(host.bind_address, "10.0.0.1:9000");
    }

    #[test]
    fn resolve_merges_config_file_under_cli_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"rank = 2
external_address = "127.0.0.1:9100"
callsign = "from-file"
seeds = ["127.0.0.1:9200"]
"#)
        .unwrap();

        let mut cli = bare_cli();
        cli.config = Some(file.path().to_path_buf());
        // CLI rank overrides the file's.
        cli.rank = Some(9);

        let host = resolve(cli).unwrap();
        assert_eq!(host.rank, 9);
        assert_eq!(host.external_address, "127.0.0.1:9100");
        assert_eq!(host.callsign, "from-file");
        assert_eq!(host.seeds, vec!["127.0.0.1:9200".to_string()]);
    }

    #[test]
    fn resolve_rejects_unknown_proto() {
        let mut cli = bare_cli();
        cli.rank = Some(1);
        cli.external_address = Some("127.0.0.1:9000".to_string());
        cli.proto = "sctp".to_string();
        assert!(resolve(cli).is_err());
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
