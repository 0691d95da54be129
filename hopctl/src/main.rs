use std::{net::SocketAddr, path::PathBuf, process::ExitCode};

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use hopctl::{
    tc::{QueueBackend, RecordingBackend, TcBackend},
    transport::{Inbox, Listener, TcpPush},
    Config, ConfigError, Controller, Iperf3Results, SysfsCounters, Topology,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "/etc/hopctl/hopctl.yaml";

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Control(#[from] hopctl::Error),
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

fn cli() -> Command {
    Command::new("hopctl")
        .about("Distributed bandwidth admission control for multi-hop wireless backhauls")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Path to the YAML configuration")
                .default_value(DEFAULT_CONFIG)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .help("Validate the configuration, print the topology and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .help("Run a single cycle and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Log queue directives instead of running tc and iptables")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("sudo")
                .long("sudo")
                .help("Run tc, ip and iptables through sudo")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Log at debug level unless RUST_LOG is set")
                .action(ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();

    let level = if matches.get_flag("verbose") { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&matches).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(matches: &ArgMatches) -> Result<(), StartupError> {
    let path =
        matches.get_one::<PathBuf>("config").cloned().unwrap_or_else(|| DEFAULT_CONFIG.into());
    let topology = Config::load(&path)?.validate()?;
    tracing::info!(config = %path.display(), node = %topology.node, "configuration loaded");

    if matches.get_flag("check") {
        print_summary(&topology);
        return Ok(());
    }

    let once = matches.get_flag("once");
    let inbox = Inbox::new();

    let listener = if once {
        None
    } else {
        let addr = topology.listen;
        let listener = Listener::bind(addr, inbox.clone())
            .await
            .map_err(|source| StartupError::Bind { addr, source })?;
        Some(listener.spawn())
    };

    let backend: Box<dyn QueueBackend> = if matches.get_flag("dry-run") {
        Box::new(RecordingBackend::new())
    } else {
        Box::new(TcBackend::new().with_sudo(matches.get_flag("sudo")))
    };
    let push = TcpPush::new(topology.push.clone());
    let source = Iperf3Results::new(&topology.measurement_dir);

    let mut controller =
        Controller::new(topology, backend, push, source, SysfsCounters::default(), inbox)?;

    if once {
        let report = controller.run_cycle().await;
        tracing::info!(?report, "single cycle complete");
    } else {
        controller.run_until(shutdown_signal()).await;
    }

    if let Some(listener) = listener {
        listener.abort();
    }

    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM where available.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot watch SIGTERM, waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn print_summary(topology: &Topology) {
    println!("node:       {} ({:?})", topology.node, topology.role);
    println!("authority:  {}", topology.authority);
    println!(
        "loop:       period {:?}, stability {}, beta {}, floor {} kbps, {:?}",
        topology.period, topology.stability, topology.beta, topology.floor_kbps, topology.formula
    );
    println!("listen:     {}", topology.listen);

    for (node, addr) in &topology.peers {
        println!("peer:       {node} at {addr}");
    }

    for link in &topology.links {
        println!("link {} (k = {}):", link.id, link.k);
        for member in &link.members {
            println!("  {member}: guarantee {} kbps", topology.guarantee(member));
        }
    }

    for group in &topology.shaping {
        let devices: Vec<&str> = group.interfaces.iter().map(|i| i.target()).collect();
        println!(
            "shaping {}/{}: {} classes on {}",
            group.owner,
            group.direction,
            group.classes.len(),
            devices.join(", ")
        );
    }

    for counter in &topology.counters {
        println!(
            "counter:    {}/{} from {} ({:?})",
            counter.node, counter.direction, counter.device, counter.counter
        );
    }
}
