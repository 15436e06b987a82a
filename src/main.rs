mod cli;
mod logging;
mod status;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use dotenv::dotenv;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

use cli::{Cli, Commands};
use sentry_recorder::devices::{CommandCamera, CommandMotor, FeedDetector, FileIgnition, SystemClock};
use sentry_recorder::{
    load_configuration, register_shutdown_flag, AppConfig, ControllerSettings, DirectoryUsage, Itinerary, MotorTracker,
    Mp4BoxTranscoder, QueueStore, QuotaEnforcer, RecordingController, TrackingConfig,
    TranscodePipeline,
};
use status::RecoveryBar;

fn main() {
    dotenv().ok();

    let guard = logging::init_logger();

    let args = Cli::parse();

    let config = match load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {}", err);
            drop(guard);
            process::exit(1);
        }
    };

    let result = match args.command.unwrap_or(Commands::Run) {
        Commands::Run => run_recorder(&config),
        Commands::Recover => recover(&config),
        Commands::EnforceQuota => enforce_quota(&config),
        Commands::PrintConfig => print_config(&config),
        Commands::PrintQueues => print_queues(&config),
        Commands::RetryFailed => retry_failed(&config),
        Commands::ClearFailed => clear_failed(&config),
        Commands::CenterMotor => center_motor(&config),
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        drop(guard);
        process::exit(1);
    }
}

struct Services {
    store: Arc<QueueStore>,
    quota: Arc<QuotaEnforcer>,
    pipeline: Arc<TranscodePipeline>,
}

fn open_store(config: &AppConfig) -> Result<Arc<QueueStore>> {
    let path = &config.storage.queue_db_path;
    let store = QueueStore::open(path)
        .with_context(|| format!("Cannot open itinerary store at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn open_services(config: &AppConfig) -> Result<Services> {
    let store = open_store(config)?;
    let quota = Arc::new(QuotaEnforcer::new(
        store.clone(),
        Box::new(DirectoryUsage::new(&config.storage.root)),
        config.storage.ceiling_gb,
    ));
    let pipeline = Arc::new(TranscodePipeline::new(
        store.clone(),
        Arc::new(Mp4BoxTranscoder::new(&config.transcode)),
        quota.clone(),
        config.transcode.workers,
    )?);
    Ok(Services {
        store,
        quota,
        pipeline,
    })
}

fn new_tracker(config: &AppConfig) -> Result<MotorTracker> {
    let tracker = MotorTracker::new(
        TrackingConfig::new(&config.motor, &config.motion),
        config.recording.frame_rate,
        Arc::new(CommandMotor::new(&config.motor)),
    )?;
    Ok(tracker)
}

fn run_recorder(config: &AppConfig) -> Result<()> {
    let shutdown = register_shutdown_flag().context("Could not install signal handlers")?;
    let services = open_services(config)?;

    let resumed = services.pipeline.resume_pending()?;
    if resumed > 0 {
        info!("Converting {} recordings left by the previous run", resumed);
    }

    let mut controller = RecordingController::new(
        ControllerSettings::from_config(config),
        CommandCamera::new(config.camera.clone()),
        FeedDetector,
        Box::new(FileIgnition::new(&config.ignition)),
        new_tracker(config)?,
        services.pipeline.clone(),
        Arc::new(SystemClock),
    );
    controller.run(&shutdown);

    println!(
        "{} {} retained, {} awaiting conversion, {} failed",
        "Recorder stopped:".bold(),
        format!("{}", services.store.len(Itinerary::Retained)?).green(),
        format!("{}", services.store.len(Itinerary::Conversion)?).yellow(),
        format!("{}", services.store.len(Itinerary::Failed)?).red(),
    );
    Ok(())
}

fn recover(config: &AppConfig) -> Result<()> {
    recover_with(&open_services(config)?)
}

fn recover_with(services: &Services) -> Result<()> {
    let report = services.pipeline.recover_pending(&RecoveryBar::new())?;

    println!(
        "{} pending, {} recovered, {} dropped, {} failed",
        report.pending,
        format!("{}", report.recovered).green(),
        format!("{}", report.dropped).yellow(),
        format!("{}", report.failed).red(),
    );
    if let Some(quota) = report.quota {
        println!(
            "Storage: {} GB used, {} evicted",
            format!("{:.2}", quota.used_gb).green(),
            quota.evicted
        );
    }
    Ok(())
}

fn enforce_quota(config: &AppConfig) -> Result<()> {
    let services = open_services(config)?;
    let report = services.quota.enforce()?;
    println!(
        "Storage: {} GB used of {:.2} GB, {} evicted ({} already missing)",
        format!("{:.2}", report.used_gb).green(),
        services.quota.ceiling_gb(),
        format!("{}", report.evicted).red(),
        report.missing
    );
    Ok(())
}

fn print_config(config: &AppConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Cannot render configuration")?;
    println!("{}", rendered);
    Ok(())
}

fn print_queues(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    for itinerary in Itinerary::ALL {
        let items = store.load(itinerary)?;
        println!("{} ({})", itinerary.name().bold(), items.len());
        for item in items {
            println!("  {}", item);
        }
    }
    Ok(())
}

fn retry_failed(config: &AppConfig) -> Result<()> {
    let services = open_services(config)?;
    let failed = services.store.load(Itinerary::Failed)?;
    for item in &failed {
        services
            .store
            .transfer(Itinerary::Failed, Itinerary::Conversion, item)?;
    }
    info!("Requeued {} failed recordings", failed.len());
    recover_with(&services)
}

fn clear_failed(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let cleared = store.clear(Itinerary::Failed)?;
    println!("Cleared {} failed recordings", format!("{}", cleared).yellow());
    Ok(())
}

fn center_motor(config: &AppConfig) -> Result<()> {
    let mut tracker = new_tracker(config)?;
    let mv = tracker.center();
    tracker.wait_idle();
    println!(
        "Motor centred at {} ({:.2}s travel)",
        format!("{:.1}", mv.target).green(),
        mv.travel_time.as_secs_f64()
    );
    Ok(())
}
