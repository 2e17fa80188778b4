use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use usb_gadgetd::config::{AppConfig, ConfigStore};
use usb_gadgetd::events::EventBus;
use usb_gadgetd::gadget::{
    ChargingCurrentTuner, ConfigFsBackend, FfsMonitor, FunctionSet, GadgetController,
    IrqAffinity, NoopAffinity, ProcIrqAffinity, UsbGadgetService,
};
use usb_gadgetd::state::AppState;
use usb_gadgetd::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// usb-gadgetd command line arguments
#[derive(Parser, Debug)]
#[command(name = "usb-gadgetd")]
#[command(version, about = "USB gadget function switching daemon", long_about = None)]
struct CliArgs {
    /// Listen address (overrides config file)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config file)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Data directory path (default: /etc/usb-gadgetd)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Configuration file (default: <data dir>/usb-gadgetd.json)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting usb-gadgetd v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg takes precedence
    let data_dir = args.data_dir.unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());

    let config_path = args
        .config
        .unwrap_or_else(|| data_dir.join("usb-gadgetd.json"));
    let config_store = ConfigStore::new(&config_path).await?;
    let config = config_store.get();

    let events = Arc::new(EventBus::new());
    let shutdown = CancellationToken::new();

    let backend = Arc::new(ConfigFsBackend::new(&config.paths, &config.gadget));
    if !backend.is_available() {
        tracing::warn!(
            "Gadget {} not found, function switches will fail until it is created",
            backend.gadget_dir().display()
        );
    }

    let monitor = Arc::new(FfsMonitor::new(
        backend.clone(),
        events.clone(),
        &config.paths,
        Duration::from_millis(config.gadget.monitor_poll_ms),
        shutdown.clone(),
    ));
    monitor.spawn_link_watcher();

    let affinity: Arc<dyn IrqAffinity> = if config.tuning.irq_affinity_enabled {
        Arc::new(ProcIrqAffinity::new(&config.paths, &config.tuning))
    } else {
        tracing::info!("IRQ affinity tuning disabled");
        Arc::new(NoopAffinity)
    };

    let controller = Arc::new(
        GadgetController::new(backend, monitor, events.clone(), &config, shutdown.clone())
            .with_affinity(affinity)
            .with_charging_tuner(ChargingCurrentTuner::new(&config.paths, &config.tuning)),
    );
    controller.spawn_speed_watcher();
    controller.spawn_pull_up_watcher();

    let gadget = Arc::new(UsbGadgetService::new(
        controller,
        config.gadget.default_timeout_ms,
    ));

    apply_initial_functions(&gadget, &config).await;

    let state = AppState::new(config_store.clone(), gadget, events, shutdown.clone());
    let app = web::create_router(state);

    let bind_addr = resolve_bind_addr(&config, args.address.as_deref(), args.http_port)?;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let shutdown_signal = {
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!("Failed to listen for shutdown signal: {}", e);
                    }
                    tracing::info!("Shutdown signal received");
                }
                _ = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Apply the configured startup function set, if any
async fn apply_initial_functions(gadget: &UsbGadgetService, config: &AppConfig) {
    let Some(initial) = config.gadget.initial_functions.as_deref() else {
        return;
    };

    match initial.parse::<FunctionSet>() {
        Ok(functions) => {
            tracing::info!("Applying initial USB functions: {}", functions);
            // The monitor keeps waiting for the daemons after the timeout
            gadget
                .set_current_usb_functions(functions, None, config.gadget.default_timeout_ms)
                .await;
        }
        Err(e) => tracing::warn!("Ignoring initial_functions {:?}: {}", initial, e),
    }
}

fn resolve_bind_addr(
    config: &AppConfig,
    address: Option<&str>,
    port: Option<u16>,
) -> anyhow::Result<SocketAddr> {
    let address = address.unwrap_or(&config.web.bind_address);
    let ip: IpAddr = address
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {:?}: {}", address, e))?;
    Ok(SocketAddr::new(ip, port.unwrap_or(config.web.http_port)))
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "usb_gadgetd=error,tower_http=error",
        LogLevel::Warn => "usb_gadgetd=warn,tower_http=warn",
        LogLevel::Info => "usb_gadgetd=info,tower_http=info",
        LogLevel::Verbose => "usb_gadgetd=debug,tower_http=info",
        LogLevel::Debug => "usb_gadgetd=debug,tower_http=debug",
        LogLevel::Trace => "usb_gadgetd=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("USB_GADGETD_DATA_DIR") {
        return PathBuf::from(path);
    }

    PathBuf::from("/etc/usb-gadgetd")
}
