use clap::Parser;
use colored::*;
use eyre::{Context as _, Result, bail};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::Cli;
use cli::commands::{Commands, SimulateArgs};
use pacer::clock::{Clock, MockClock};
use pacer::config::{PacerConfig, SimulationConfig};
use pacer::runner::SchedulerPool;
use pacer::scheduler::{Context, Scheduler, Service};
use pacer::simulation::{BacklogSource, EndpointStats, RateLimitedEndpoint, RoundRecord};

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pacer")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("pacer.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    let env = env_logger::Env::default().default_filter_or(level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Everything `simulate --json` prints.
#[derive(Debug, Serialize)]
struct SimulationSummary {
    settings: SimulationConfig,
    completed: usize,
    total_jobs: usize,
    elapsed: Duration,
    endpoint: EndpointStats,
    rounds: Vec<RoundRecord>,
}

async fn run_application(cli: &Cli, config: &PacerConfig) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Simulate(args) => handle_simulate_command(args, config).await,
        Commands::Config => handle_config_command(config),
    }
}

async fn handle_simulate_command(args: &SimulateArgs, config: &PacerConfig) -> Result<()> {
    let settings = args.apply(&config.simulation);
    if !(0.0..=1.0).contains(&settings.failure_rate) {
        bail!("failure rate must be between 0 and 1, got {}", settings.failure_rate);
    }
    info!("Running simulation: {:?}", settings);

    let clock = MockClock::new();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());

    let endpoint = Arc::new(
        RateLimitedEndpoint::new(settings.capacity, shared.clone()).with_failures(settings.failure_rate, settings.seed),
    );

    let mut rng = StdRng::seed_from_u64(settings.seed);
    let costs: Vec<u64> = (0..settings.jobs)
        .map(|_| rng.random_range(1..=settings.max_cost.max(1)))
        .collect();

    let source = BacklogSource::new(&costs, settings.batch_size, endpoint.clone(), shared.clone());
    let completed = source.completed();
    let history = source.history();
    let total_jobs = source.total_jobs();

    let service = Service::from_policy(config.service.clone()).context("Invalid service policy")?;
    let scheduler = Scheduler::new("simulated-endpoint", source, service, shared.clone());

    let mut pool = SchedulerPool::new(shared, Context::new(config.naptime()));
    pool.add(scheduler);

    let done = || completed.lock().map(|ids| ids.len()).unwrap_or(total_jobs);
    let ticks = pool.run_while(|| done() < total_jobs, settings.max_ticks).await;
    info!("Simulation stopped after {} ticks", ticks);

    let rounds = history.lock().map(|rounds| rounds.clone()).unwrap_or_default();
    let summary = SimulationSummary {
        settings,
        completed: done(),
        total_jobs,
        elapsed: clock.elapsed(),
        endpoint: endpoint.stats(),
        rounds,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?);
    } else {
        print_summary(&summary);
    }

    Ok(())
}

fn print_summary(summary: &SimulationSummary) {
    println!(
        "{} {} jobs, capacity {} per minute, batches of {}",
        "Simulating:".cyan(),
        summary.total_jobs,
        summary.settings.capacity,
        summary.settings.batch_size
    );

    for (index, round) in summary.rounds.iter().enumerate() {
        let report = &round.report;
        let factor = report.updated_limits.as_ref().map_or(1.0, |limits| limits.delay_factor);
        let next = summary
            .rounds
            .get(index + 1)
            .map(|next| format!("+{:.1}s", next.elapsed.saturating_sub(round.elapsed).as_secs_f64()))
            .unwrap_or_else(|| "-".to_string());

        let errors = report.error_count();
        let errors = if errors > 0 { errors.to_string().red() } else { errors.to_string().normal() };
        let deferred = if report.deferred_cost > 0 {
            report.deferred_cost.to_string().yellow()
        } else {
            report.deferred_cost.to_string().normal()
        };

        println!(
            "  [{:>8.1}s] ok {:>3}  deferred {:>4}  errors {:>2}  factor {:>6.2}  next {}",
            round.elapsed.as_secs_f64(),
            report.success_count.to_string().green(),
            deferred,
            errors,
            factor,
            next
        );
    }

    let status = if summary.completed == summary.total_jobs {
        "Done:".green()
    } else {
        "Stopped:".yellow()
    };
    println!(
        "{} {}/{} jobs in {:.1}s of virtual time ({} calls, {} throttled, {} unavailable)",
        status,
        summary.completed,
        summary.total_jobs,
        summary.elapsed.as_secs_f64(),
        summary.endpoint.calls,
        summary.endpoint.throttled,
        summary.endpoint.unavailable
    );
}

fn handle_config_command(config: &PacerConfig) -> Result<()> {
    let yaml = config.to_yaml().context("Failed to render configuration")?;
    print!("{}", yaml);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = PacerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
