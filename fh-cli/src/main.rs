mod cli;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cli::{Commands, LogFormat, Opt, RunArgs};
use fh_engine::{Orchestrator, ResultStore, RuleSet, StepRunner, ToolConfig};
use fh_link::{HubLink, StatusCache};
use fh_monitor::{DeviceMonitor, DeviceRegistry, MonitorConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    init_tracing(opt.log_format);

    let link = HubLink::new();
    link.connect(&opt.host, opt.port)
        .await
        .with_context(|| format!("failed to connect to hub at {}:{}", opt.host, opt.port))?;

    let outcome = dispatch(&link, opt.command).await;
    link.disconnect().await;
    outcome
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
    }
}

async fn dispatch(link: &HubLink, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run(link, args).await,
        Commands::Power { port, level } => {
            link.power_port(port, level.into()).await?;
            Ok(())
        }
        Commands::Reset {
            pulse,
            hold,
            release,
        } => {
            if hold || release {
                link.set_reset(hold).await?;
            } else {
                link.pulse_reset(pulse).await?;
            }
            Ok(())
        }
        Commands::Boot { state } => {
            link.set_boot(state.as_bool()).await?;
            Ok(())
        }
        Commands::AllOff => {
            link.all_off().await?;
            Ok(())
        }
        Commands::Status => status(link).await,
    }
}

async fn run(link: &HubLink, args: RunArgs) -> anyhow::Result<()> {
    let rules = RuleSet::load(&args.config)
        .await
        .with_context(|| format!("failed to load rules from {}", args.config.display()))?;
    if rules.is_empty() {
        warn!(config = %args.config.display(), "no usable rules loaded");
    }
    let port_map = parse_port_map(&args.port_map)?;

    let root = CancellationToken::new();
    let registry = DeviceRegistry::new();
    let monitor = DeviceMonitor::new(
        MonitorConfig {
            sysfs_root: args.sysfs_root,
            port_map,
            ..MonitorConfig::default()
        },
        registry.clone(),
        &root,
    );
    let events = monitor.start();

    let tools = ToolConfig {
        esptool: args.esptool,
        dfu_util: args.dfu_util,
        serial_port: args.serial_port,
        baud: args.baud,
    };
    let runner = StepRunner::new(link.clone(), registry, tools, &root);
    let results = ResultStore::new();
    let orchestrator = Orchestrator::new(rules, runner, results.clone(), &root);

    info!("watching for devices, press Ctrl-C to stop");
    tokio::select! {
        _ = orchestrator.run(events) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("shutdown requested");
            root.cancel();
        }
    }

    monitor.stop();
    if let Err(error) = link.all_off().await {
        warn!(%error, "failed to power down hub ports on shutdown");
    }

    println!("{}", results.report());
    Ok(())
}

async fn status(link: &HubLink) -> anyhow::Result<()> {
    let cache = StatusCache::attach(link);
    match link.status().await? {
        Some(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            // The cache consumes the broadcast stream on its own task; give
            // it a beat to apply the reply before reading the snapshot.
            tokio::time::sleep(Duration::from_millis(50)).await;
            let snapshot = cache.snapshot();
            if !snapshot.ports.is_empty() {
                println!();
                for (port, state) in &snapshot.ports {
                    println!("port {port}: {}", state.power);
                }
            }
        }
        None => println!("no response from hub"),
    }
    Ok(())
}

fn parse_port_map(entries: &[String]) -> anyhow::Result<HashMap<String, u8>> {
    let mut map = HashMap::new();
    for entry in entries {
        let (key, port) = entry
            .split_once('=')
            .with_context(|| format!("invalid --map entry {entry:?}, expected KEY=PORT"))?;
        let port = port
            .parse::<u8>()
            .with_context(|| format!("invalid hub port in --map entry {entry:?}"))?;
        map.insert(key.to_owned(), port);
    }
    Ok(map)
}
