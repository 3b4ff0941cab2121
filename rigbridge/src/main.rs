//! rigbridge - radio control and telemetry bridge
//!
//! Loads the configuration, starts the bridge and logs rig changes until
//! interrupted.

use std::path::PathBuf;

use anyhow::{bail, Context};
use rig_bridge::{Bridge, BridgeConfig, RadioKind};
use rig_detect::PortScanner;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str =
    "rigbridge=info,rig_protocol=info,rig_detect=info,rig_relay=info,rig_bridge=info,rig_sim=info";

const VERBOSE_FILTER: &str =
    "rigbridge=debug,rig_protocol=debug,rig_detect=debug,rig_relay=debug,rig_bridge=debug,rig_sim=debug";

const USAGE: &str = "\
usage: rigbridge [options]

  --config <path>   read configuration from <path>
  --radio <type>    none, yaesu, kenwood, icom, flrig, rigctld or mock
  --list-ports      print local serial ports and exit
  --verbose         debug logging unless RUST_LOG is set
  --help            show this text";

/// Command line overrides
#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    radio: Option<RadioKind>,
    list_ports: bool,
    verbose: bool,
    help: bool,
}

fn parse_args<I>(args: I) -> anyhow::Result<Args>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--radio" | "-r" => {
                let kind = args.next().context("--radio needs a type")?;
                parsed.radio = Some(kind.parse()?);
            }
            "--list-ports" => parsed.list_ports = true,
            "--verbose" | "-v" => parsed.verbose = true,
            "--help" | "-h" => parsed.help = true,
            other => bail!("unknown argument {:?}\n\n{}", other, USAGE),
        }
    }
    Ok(parsed)
}

fn init_logging(verbose: bool) {
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(args: &Args) -> BridgeConfig {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load_from(path),
        None => BridgeConfig::load(),
    };
    config.apply_env();
    if let Some(kind) = args.radio {
        config.radio.kind = kind;
    }
    config
}

fn list_ports() -> anyhow::Result<()> {
    let ports = PortScanner::new().enumerate_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}  {}", port.port, port.description());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        println!("{}", USAGE);
        return Ok(());
    }

    init_logging(args.verbose);
    if args.list_ports {
        return list_ports();
    }

    let config = load_config(&args);
    println!("rigbridge {}", env!("CARGO_PKG_VERSION"));

    let bridge = Bridge::start(config).await;

    let (snapshot, mut updates) = bridge.subscribe().await?;
    info!(
        "Rig: connected={} {} Hz {}",
        snapshot.connected, snapshot.frequency_hz, snapshot.mode
    );

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => debug!("Rig {:?}", update.field),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Dropped {} rig updates", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for ctrl-c")?;
                info!("Interrupted");
                break;
            }
        }
    }

    bridge.shutdown().await;
    Ok(())
}
