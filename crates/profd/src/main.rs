//! profd - sampling telemetry agent.
//!
//! Runs the profilers named in the configuration string against a process
//! and writes their metrics to a log file until interrupted.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod jemalloc;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use profd_core::clock::SystemClock;
use profd_core::collector::{ProcRuntime, RealFs};
use profd_core::config::Config;
use profd_core::profiler::{ProfilerRegistry, Providers};
use profd_core::reporter::{LogReporter, OutputFormat, Reporter, default_container_id};
use profd_core::{Agent, AgentConfig};

use crate::jemalloc::JemallocRuntime;

const DEFAULT_LOG_DIR: &str = "./log";

/// Sampling telemetry agent.
#[derive(Parser)]
#[command(name = "profd", about = "Sampling telemetry agent", version)]
struct Args {
    /// Agent configuration, e.g. "reportingMs=5000,CPUTimeProfiler,StackTraceProfiler[profilingMs=20]".
    #[arg(short, long, env = "PROFD_CONFIG", default_value = "")]
    config: String,

    /// Process to observe. Defaults to the agent itself.
    #[arg(long)]
    pid: Option<u32>,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// Directory of the metrics log. Overrides `dir` from the configuration.
    #[arg(long, env = "PROFD_LOG_DIR")]
    log_dir: Option<String>,

    /// Metrics line format: tsv or json. Overrides `format` from the configuration.
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = ["profd", "profd_core"]
        .iter()
        .filter_map(|target| format!("{}={}", target, level).parse::<Directive>().ok())
        .fold(EnvFilter::from_default_env(), |filter, directive| {
            filter.add_directive(directive)
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Where and how metric lines are written. Command-line flags win over the
/// global configuration keys.
struct LogSettings {
    dir: String,
    format: OutputFormat,
    container_id: String,
}

impl LogSettings {
    fn resolve(args: &Args, global: &Config) -> Result<Self, String> {
        let dir = match &args.log_dir {
            Some(dir) => dir.clone(),
            None => global.get_or("dir", DEFAULT_LOG_DIR).to_string(),
        };
        let format = match (args.format, global.get("format")) {
            (Some(format), _) => format,
            (None, Some(raw)) => raw.parse()?,
            (None, None) => OutputFormat::default(),
        };
        let container_id = global
            .get("containerId")
            .map(str::to_string)
            .unwrap_or_else(default_container_id);
        Ok(Self {
            dir,
            format,
            container_id,
        })
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("profd {} starting", env!("CARGO_PKG_VERSION"));

    let config = match AgentConfig::parse(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let settings = match LogSettings::resolve(&args, config.global()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let own_pid = std::process::id();
    let pid = args.pid.unwrap_or(own_pid);
    info!(
        "Config: pid={}, proc={}, log={}/{}, format={:?}",
        pid,
        args.proc_path,
        settings.dir,
        profd_core::reporter::LOG_FILE_NAME,
        settings.format
    );

    let mut providers = Providers::from_proc(&args.proc_path, pid);
    if pid == own_pid {
        // Our own heap is best described by the allocator.
        providers.runtime = Arc::new(JemallocRuntime::new(ProcRuntime::new(
            RealFs,
            &args.proc_path,
            pid,
        )));
    }

    let reporter: Arc<dyn Reporter> = Arc::new(LogReporter::new(
        &settings.dir,
        settings.container_id,
        settings.format,
    ));
    let registry = match ProfilerRegistry::from_config(
        &config,
        providers,
        Arc::clone(&reporter),
        Arc::new(SystemClock),
    ) {
        Ok(registry) => registry,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if registry.is_empty() {
        warn!("No profilers enabled");
    }

    let mut agent = match Agent::start(registry, reporter) {
        Ok(agent) => agent,
        Err(e) => {
            error!("Failed to start agent: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("Shutting down...");
    agent.shutdown();
    info!("Shutdown complete");
    ExitCode::SUCCESS
}
