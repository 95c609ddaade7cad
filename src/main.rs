use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::Result;
use haptic_bridge::config::DriverConfig;
use haptic_bridge::device::{SimulatedHandler, SimulationProbe};
use haptic_bridge::driver::{DriverError, HapticDriver};
use haptic_bridge::transport::MqttTransport;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    setup()?;

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
    Ok(())
}

async fn run() -> Result<(), DriverError> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = DriverConfig::load_or_default(config_path.as_deref())?;
    info!(
        "Starting {} at {} Hz (force output {})",
        config.node_name,
        config.publish_rate_hz,
        if config.force_output { "enabled" } else { "disabled" }
    );

    let mut handler = SimulatedHandler::new(
        config.simulation.clone(),
        Arc::new(SimulationProbe::new()),
    );
    let driver = HapticDriver::create(config.clone()).connect(&mut handler)?;

    let transport = MqttTransport::connect(&config.mqtt, &config.node_name);
    let publisher = transport.publisher();
    let dispatcher = transport.into_dispatcher(config.topics.force.clone(), driver.intake());

    let run_token = driver.run_token();
    let dispatcher_handle = tokio::spawn(dispatcher.run(run_token.clone()));

    let signal_token = run_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!("Unable to listen for interrupt: {}", e),
        }
        signal_token.cancel();
    });

    let stopped = driver.run(publisher).await;
    // The dispatcher shares the run token; make sure it stops on every path
    run_token.cancel();
    let report = stopped?.release()?;

    match dispatcher_handle.await {
        Ok(stats) => info!(
            "Dispatcher: {} commands accepted, {} rejected",
            stats.commands_accepted, stats.commands_rejected
        ),
        Err(e) => warn!("Dispatcher task failed: {}", e),
    }

    info!(
        "Published {} cycles, device ran {} iterations, final health {}",
        report.publish.cycles, report.device.iterations, report.health
    );
    report.check()
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
