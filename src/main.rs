use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use dualshot::{
    CaptureSequencer, DualshotConfig, GallerySink, RunEvent, RunOutcome, SimCameraSystem,
    StaticPermissionGate,
};

#[derive(Parser, Debug)]
#[command(name = "dualshot")]
#[command(about = "Two-camera still capture sequencer producing paired back and front photos")]
#[command(version)]
#[command(long_about = "Captures a paired set of photos per run: the back camera first, then \
the front camera, each after a fixed convergence delay under a live preview. Images are stored \
in the configured pictures directory and registered in a gallery index. Runs against the \
built-in simulated camera pair.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "dualshot.toml", help = "Path to TOML configuration file")]
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
    #[arg(long, help = "Validate configuration file and exit without capturing")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - wire everything up but don't start a run
    #[arg(long, help = "Perform dry run - initialize components but don't capture")]
    dry_run: bool,

    /// Number of capture runs to perform
    #[arg(long, default_value_t = 1, help = "Number of back+front capture runs to perform")]
    runs: u32,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config();
        return Ok(());
    }

    // Initialize logging
    init_logging(&args)?;

    info!("Starting dualshot v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    // Load and validate configuration
    let config = match DualshotConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate()?;

    // Wire up the simulated camera pair, the gallery sink, and the
    // permission gate.
    let provider = Arc::new(SimCameraSystem::with_default_pair());
    let sink = Arc::new(GallerySink::new(&config.storage));
    let gate = Arc::new(StaticPermissionGate::new(config.system.camera_permission));

    let mut sequencer = CaptureSequencer::new(config, provider, sink, gate);

    if args.dry_run {
        info!("Dry run mode - components initialized but no run started");
        println!("✓ Dry run completed successfully - all components initialized");
        return Ok(());
    }

    // Print run notifications as they arrive.
    let mut notifications = sequencer.subscribe();
    let notifier = tokio::spawn(async move {
        while let Ok(event) = notifications.recv().await {
            match &event {
                RunEvent::CaptureSuccess { index, camera, .. } => {
                    println!("✓ Shot {} captured on camera {}", index + 1, camera);
                }
                RunEvent::CaptureFailed { index, reason, .. } => {
                    println!("✗ Shot {} failed: {}", index + 1, reason);
                }
                RunEvent::RunComplete { .. } => {
                    println!("✓ Run complete: back and front photos stored");
                }
                RunEvent::RunAborted { reason, .. } => {
                    println!("✗ Run aborted: {}", reason);
                }
            }
        }
    });

    let mut exit_code = 0;
    for run in 1..=args.runs {
        info!("Starting capture run {} of {}", run, args.runs);
        match sequencer.start_run().await {
            Ok(run_id) => {
                info!("Run {} in progress", run_id);
            }
            Err(e) => {
                error!("Failed to start run: {}", e);
                eprintln!("✗ Failed to start run: {}", e);
                exit_code = 1;
                break;
            }
        }

        match sequencer.join_run().await {
            Some(RunOutcome::Complete { stored }) => {
                for location in stored {
                    info!("Stored {}", location.path.display());
                }
            }
            Some(RunOutcome::Aborted { error }) => {
                error!("Run aborted: {}", error);
                exit_code = 1;
                break;
            }
            None => break,
        }
    }

    sequencer.shutdown().await;
    notifier.abort();

    info!("dualshot exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, fmt, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // Create environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dualshot={}", log_level)));

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed()
        }
        Some("compact") => {
            fmt::layer()
                .compact()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .boxed()
        }
        Some("pretty") | None => {
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
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

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# Dualshot Configuration File");
    println!("# This is the default configuration with all available options");
    println!();

    let default_config = r#"[camera]
# Still capture resolution (width, height)
resolution = [1920, 1080]
# Number of in-flight encoded images the capture target can hold
capture_capacity = 2

[convergence]
# Preview frames to wait before firing the still capture
frames = 30
# Estimated preview frame interval in milliseconds
frame_interval_ms = 33

[storage]
# Shared pictures directory for stored captures
pictures_dir = "./pictures"
# Register stored images in the gallery index file
gallery_index = true

[system]
# Run event bus capacity
event_bus_capacity = 100
# Whether the camera permission is granted to this process
camera_permission = true
"#;

    println!("{}", default_config);
}
