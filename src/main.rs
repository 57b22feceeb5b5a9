use anyhow::Result;
use clap::Parser;
use sentinel::{ConfigManager, SentinelConfig, SentinelOrchestrator};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "sentinel")]
#[command(about = "Multi-camera fire and smoke detection platform")]
#[command(version)]
#[command(long_about = "Monitors multiple camera feeds for fire and smoke, classifies \
detections into tiered alerts, persists them with frame snapshots, and exposes system \
state over an HTTP API.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "sentinel.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - initialize but don't start components
    #[arg(long, help = "Perform dry run - build the component graph but don't start it")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a file in this directory
    #[arg(long, value_name = "DIR", help = "Directory for rotating log files")]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return Ok(());
    }

    // The appender guard must outlive the system so buffered logs flush
    // on exit
    let _log_guard = init_logging(&args)?;

    info!("Starting Sentinel v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match SentinelConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut orchestrator = SentinelOrchestrator::new(config).await.map_err(|e| {
        error!("Failed to build system: {}", e);
        e
    })?;

    if args.dry_run {
        info!("Dry run mode - components built but not started");
        println!("✓ Dry run completed successfully");
        return Ok(());
    }

    let config_manager = match ConfigManager::new(&args.config) {
        Ok(manager) => Some(manager),
        Err(e) => {
            error!("Config hot reload disabled: {}", e);
            None
        }
    };

    orchestrator.start(config_manager).await.map_err(|e| {
        error!("Failed to start system: {}", e);
        e
    })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("Sentinel exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sentinel={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let registry = tracing_subscriber::registry().with(fmt_layer).with(env_filter);

    match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sentinel.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# Sentinel Configuration File");
    println!("# This is the default configuration with all available options");
    println!();

    let default_config = r#"[detection]
# Confidence at or above which an alert is Critical
immediate_alert_threshold = 0.95
# Confidence at or above which an alert goes to the review queue
review_queue_threshold = 0.85
# Confidence at or above which a detection is logged
log_only_threshold = 0.70

[system]
# Upper bound on registered cameras
max_concurrent_cameras = 16
# Default capture pacing
target_fps = 10
# Alert retention period in days
retention_days = 30
# Deployment-wide alert caps
max_alerts_per_hour = 50
max_alerts_per_day = 200
# Base directory for alert records and frame images
data_dir = "./data"

[api]
# IP address to bind to
ip = "0.0.0.0"
# Port to listen on
port = 8080
enabled = true

# One [[cameras]] block per camera. Schemes: sim:// (synthetic feed),
# http:// (MJPEG stream)
[[cameras]]
camera_id = "front"
source_uri = "sim://front"
target_fps = 10
resolution = [640, 480]
connect_timeout_seconds = 10
retry_interval_seconds = 5
enabled = true
# username = "admin"
# password = "secret"
"#;

    println!("{}", default_config);
}
