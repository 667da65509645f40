use clap::Parser;
use config::Config;
use rvgate::{
    ConnectionDispatcher, Error, Gateway, GatewayCell, GatewayOptions, GatewaySettings,
    MasterAddress, MethodRegistry, MonitorSet, StaticPolicy, TcpUpstream,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const WORK_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Tracing Initialization
// ============================================================================

/// Initialize tracing for the rvgate crate based on verbosity level
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => return, // No tracing
        1 => "info",
        2 => "debug",
        _ => "trace", // 3 or more
    };

    let filter = format!("rvgate={}", level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// CLI Argument Parsing
// ============================================================================

#[derive(Parser)]
#[command(author, version, about = "Access-control gateway for a ROS master", long_about = None)]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(long)]
    config: Option<String>,

    /// Topic whose publishers are redirected to the monitor (repeatable)
    #[arg(long = "monitor-topic", value_name = "TOPIC")]
    monitor_topics: Vec<String>,

    /// Port to listen on, overriding the configuration and ROS_MASTER_URI
    #[arg(short, long)]
    port: Option<u16>,

    /// URI of the real master, overriding the configuration
    #[arg(long)]
    upstream: Option<String>,

    /// Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let args = Args::parse();

    init_tracing(args.verbose);

    // Create config - load from file if specified, otherwise use defaults
    let config = if let Some(config_path) = &args.config {
        match Config::builder()
            .add_source(config::File::with_name(config_path))
            .build()
        {
            Ok(c) => c,
            Err(err) => {
                eprintln!("Failed to load config file '{}': {}", config_path, err);
                return ExitCode::FAILURE;
            }
        }
    } else {
        Config::default()
    };

    let master = match MasterAddress::from_env() {
        Ok(master) => master,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let mut settings = match GatewaySettings::new(&config, master) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = args.port {
        settings.listen_port = port;
    }
    if let Some(uri) = &args.upstream {
        settings.upstream = match MasterAddress::parse(uri) {
            Ok(upstream) => upstream,
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        };
    }

    let monitor: MonitorSet = settings
        .monitor_topics
        .iter()
        .chain(args.monitor_topics.iter())
        .cloned()
        .collect();
    for topic in monitor.topics() {
        info!(%topic, "Monitoring topic");
    }

    let cell = GatewayCell::new();
    let gateway = match cell.get_or_try_init(|| -> Result<Gateway, Error> {
        Ok(Gateway::new(
            Box::new(TcpUpstream::from_settings(&settings)),
            Box::new(StaticPolicy::from_config(&config, "")),
            Arc::new(monitor.clone()),
            GatewayOptions::from_settings(&settings),
        ))
    }) {
        Ok(gateway) => gateway,
        Err(err) => {
            eprintln!("Failed to construct gateway: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut registry = MethodRegistry::with_policy(settings.duplicate_methods);
    registry.enable_introspection(settings.introspection);
    if let Err(err) = gateway.register_all(&mut registry) {
        eprintln!("Failed to register gateway methods: {err}");
        return ExitCode::FAILURE;
    }

    let mut dispatcher = match ConnectionDispatcher::from_settings(&settings, registry) {
        Ok(dispatcher) => dispatcher,
        Err(err) => {
            eprintln!("Failed to initialize dispatcher: {err:?}");
            return ExitCode::FAILURE;
        }
    };
    if !dispatcher.bind_and_listen(settings.listen_port, settings.backlog) {
        eprintln!("Failed to listen on port {}", settings.listen_port);
        return ExitCode::FAILURE;
    }
    println!(
        "Forwarding port {} to {}",
        dispatcher.port().unwrap_or(settings.listen_port),
        settings.upstream.to_uri()
    );

    // The external run loop; every pass is bounded by WORK_INTERVAL.
    loop {
        if let Err(err) = dispatcher.work(WORK_INTERVAL) {
            eprintln!("Fatal error in dispatcher loop: {err:?}");
            dispatcher.shutdown();
            return ExitCode::FAILURE;
        }
    }
}
