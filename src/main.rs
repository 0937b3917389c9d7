// Chaos Agent - Main Entry Point
//
// Subcommands:
// - run: the fault-injection loop
// - inject: control-plane request mapped onto a focused run
// - targets: eligibility report for the current containers

use anyhow::{Context, Result};
use chaos_agent::agent::ChaosAgent;
use chaos_agent::config::{Config, RunMode};
use chaos_agent::control::{self, ControlFault, InjectMode, InjectOutcome, InjectRequest};
use chaos_agent::eligibility::Monitor;
use chaos_agent::event_log::EventLog;
use chaos_agent::faults::FaultKind;
use chaos_agent::metrics_server::start_metrics_server;
use chaos_agent::runtime::RuntimeClient;
use chaos_agent::stats::Summary;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// Chaos agent for containerized microservices
#[derive(Parser, Debug)]
#[command(name = "chaos-agent")]
#[command(version)]
#[command(about = "Inject faults into running containers and observe their health", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.config/chaos-agent/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the chaos loop
    Run(RunArgs),

    /// Execute a control-plane fault request
    Inject(InjectArgs),

    /// Show which containers are eligible for injection
    Targets {
        /// Comma-separated container names to check
        #[arg(long, value_delimiter = ',')]
        targets: Vec<String>,
    },
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// focused repeats one fault, mixed draws a fault per iteration [default: focused]
    #[arg(long, value_enum)]
    mode: Option<RunMode>,

    /// Fault for focused mode [default: cpu_hog]
    #[arg(long)]
    fault: Option<FaultKind>,

    /// Comma-separated container names
    #[arg(long, value_delimiter = ',')]
    targets: Option<Vec<String>>,

    /// Total run time in seconds [default: 300]
    #[arg(long)]
    duration: Option<u64>,

    /// Seconds between iterations [default: 30]
    #[arg(long)]
    interval: Option<u64>,

    /// Emit action events as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Path to write the event log [default: fault_agent/chaos.log]
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Probe target /metrics before and after each action
    #[arg(long)]
    probe: bool,

    /// Prometheus base URL [default: http://localhost:9090]
    #[arg(long)]
    prom_url: Option<String>,

    /// Prometheus job name for instance discovery [default: test_app]
    #[arg(long)]
    prom_job: Option<String>,

    /// Memory MB allocated by memory_hog [default: 1024]
    #[arg(long)]
    hog_mem_mb: Option<u64>,
}

#[derive(ClapArgs, Debug)]
struct InjectArgs {
    #[arg(long, value_enum)]
    fault_type: ControlFault,

    /// Target service or cluster hint
    #[arg(long)]
    target: String,

    /// Duration in seconds
    #[arg(long)]
    duration: u64,

    #[arg(long, value_enum)]
    mode: InjectMode,

    /// Intensity 0-100
    #[arg(long, default_value_t = 50)]
    intensity: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file {:?} does not exist", path);
            }
            Config::load_from_path(path)?
        }
        None => Config::load()?,
    };
    if let Commands::Run(run) = &args.command {
        apply_run_args(&mut config, run);
    }
    config.validate()?;

    init_logging(&config, args.verbose)?;
    info!("Chaos agent v{} starting", env!("CARGO_PKG_VERSION"));

    if config.metrics.enabled {
        let port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(port).await {
                error!("Metrics server failed: {:#}", e);
            }
        });
    }

    let runtime = RuntimeClient::new(config.runtime.binary.clone())
        .with_timeout(config.runtime.control_timeout());

    match args.command {
        Commands::Run(_) => run_chaos(&config, runtime).await?,
        Commands::Inject(inject) => run_inject(&config, runtime, inject).await?,
        Commands::Targets { targets } => show_targets(&config, runtime, targets).await,
    }

    Ok(())
}

fn init_logging(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

fn apply_run_args(config: &mut Config, args: &RunArgs) {
    let run = &mut config.run;
    if let Some(mode) = args.mode {
        run.mode = mode;
    }
    if let Some(fault) = args.fault {
        run.fault = fault;
    }
    if let Some(targets) = &args.targets {
        run.targets = targets
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }
    if let Some(duration) = args.duration {
        run.duration_secs = duration;
    }
    if let Some(interval) = args.interval {
        run.interval_secs = interval;
    }
    if args.json {
        run.json = true;
    }
    if let Some(path) = &args.log_file {
        run.log_file = path.clone();
    }
    if args.probe {
        run.probe = true;
    }
    if let Some(mb) = args.hog_mem_mb {
        run.hog_mem_mb = Some(mb);
    }
    if let Some(url) = &args.prom_url {
        config.observe.prom_url = url.clone();
    }
    if let Some(job) = &args.prom_job {
        config.observe.prom_job = job.clone();
    }
}

fn print_summary(summary: &Summary) -> Result<()> {
    let text = serde_json::to_string_pretty(summary).context("Failed to render summary")?;
    println!("Summary:\n{}", text);
    Ok(())
}

/// Run the loop; Ctrl-C restores in-flight targets and keeps a partial summary
async fn run_chaos(config: &Config, runtime: RuntimeClient) -> Result<()> {
    let mut agent = ChaosAgent::new(config, runtime);

    let finished = tokio::select! {
        summary = agent.run() => Some(summary),
        _ = tokio::signal::ctrl_c() => None,
    };
    let summary = match finished {
        Some(summary) => summary,
        None => agent.interrupt().await,
    };

    if let Some(empty) = agent.no_targets() {
        println!("No eligible target containers found (after exclusions): {}", empty.message);
    }
    print_summary(&summary)
}

async fn run_inject(config: &Config, runtime: RuntimeClient, args: InjectArgs) -> Result<()> {
    let request = InjectRequest {
        fault_type: args.fault_type,
        target_hint: args.target,
        duration_secs: args.duration,
        mode: args.mode,
        intensity: args.intensity,
    };
    if request.intensity > 100 {
        anyhow::bail!("Intensity must be between 0 and 100");
    }

    println!("Fault Type:   {}", request.fault_type.as_str());
    println!("Target:       {}", request.target_hint);
    println!("Duration:     {}s", request.duration_secs);
    println!("Mode:         {:?}", request.mode);
    println!("Intensity:    {}%", request.intensity);

    match control::inject(&request, config, runtime).await? {
        InjectOutcome::DryRun {
            fault,
            duration_secs,
        } => {
            println!(
                "[DRY-RUN] Would inject {} fault ({}) for {}s",
                request.fault_type.as_str(),
                fault,
                duration_secs
            );
        }
        InjectOutcome::Completed { plan, summary } => {
            println!("Fault: {}", plan.fault);
            println!("Targets: {}", plan.targets.join(","));
            print_summary(&summary)?;
        }
    }
    Ok(())
}

async fn show_targets(config: &Config, runtime: RuntimeClient, targets: Vec<String>) {
    let log = EventLog::new(config.run.log_file.clone());
    let monitor = Monitor::with_exclusions(runtime, log, config.exclusions.clone());

    let configured = if targets.is_empty() {
        config.run.targets.clone()
    } else {
        targets
    };

    let pool = monitor.pick_targets(&configured).await;
    if pool.is_empty() {
        println!("No eligible target containers found (after exclusions).");
    } else {
        println!("Eligible targets: {}", pool.join(", "));
    }

    for verdict in monitor.verdicts(&configured).await {
        let status = verdict.reason.as_deref().unwrap_or("eligible");
        println!("  {}: {}", verdict.target, status);
    }
}
