//! Plant Simulator - data seeding and load generation for the plant
//! monitoring API.
//!
//! ## Modes
//!
//! - `load`: provision a plant and its sensors, send a fixed number of
//!   readings back to back and report throughput
//! - `simulate`: provision a plant and its sensors, then send one small
//!   batch per cycle until Ctrl+C, paced by a JSON file re-read every cycle
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `API_URL`: API base URL (default: http://localhost:3000)
//! - `SIMULATOR_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 10)
//! - `SIMULATOR_MAX_ATTEMPTS`: attempts per request (default: 5)
//! - `SIMULATOR_PACING_FILE`: pacing file (default: simulator_config.json)
//! - `RUST_LOG`: Logging level filter (default: info)

use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use plant_simulator::client::ApiClient;
use plant_simulator::config::Config;
use plant_simulator::load_test::{run_load_test, LoadTestOptions};
use plant_simulator::pacing::{run_simulator, SimulatorOptions};
use plant_simulator::provision::DEFAULT_PLANT_TYPE;

#[derive(Debug, Parser)]
#[command(name = "plant-simulator", version, about = "Seed and load the plant monitoring API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a fixed number of readings as fast as possible
    Load {
        /// Plant to provision and send readings for
        #[arg(long, default_value = "Planta de Carga")]
        plant_name: String,

        #[arg(long, default_value = DEFAULT_PLANT_TYPE)]
        plant_type: String,

        /// Readings to send in total
        #[arg(long, default_value_t = 10_000)]
        total_readings: usize,

        /// Readings per sensor in each request
        #[arg(long, default_value = "50")]
        per_call: NonZeroUsize,
    },

    /// Send readings continuously, paced by the pacing file
    Simulate {
        /// Plant to provision and send readings for
        #[arg(long, default_value = "Invernadero Central")]
        plant_name: String,

        #[arg(long, default_value = DEFAULT_PLANT_TYPE)]
        plant_type: String,

        /// Overrides SIMULATOR_PACING_FILE
        #[arg(long)]
        pacing_file: Option<PathBuf>,

        /// Readings per sensor in each cycle
        #[arg(long, default_value = "1")]
        readings_per_sensor: NonZeroUsize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber with environment filter
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                api_url = %config.api_url,
                request_timeout_secs = config.request_timeout.as_secs(),
                max_attempts = config.max_attempts,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let client = match ApiClient::new(&config) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let succeeded = match cli.command {
        Command::Load {
            plant_name,
            plant_type,
            total_readings,
            per_call,
        } => {
            let options = LoadTestOptions {
                plant_type,
                ..LoadTestOptions::new(plant_name, total_readings, per_call.get())
            };
            run_load(&client, &options).await
        }
        Command::Simulate {
            plant_name,
            plant_type,
            pacing_file,
            readings_per_sensor,
        } => {
            let pacing_file = pacing_file.unwrap_or_else(|| config.pacing_file.clone());
            let options = SimulatorOptions {
                plant_type,
                readings_per_sensor: readings_per_sensor.get(),
                ..SimulatorOptions::new(plant_name, pacing_file)
            };
            run_simulate(&client, &options).await
        }
    };

    let stats = client.stats();
    info!(
        attempts = stats.attempts,
        retries = stats.retries,
        exhausted = stats.exhausted,
        "HTTP summary"
    );

    if !succeeded {
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

async fn run_load(client: &ApiClient, options: &LoadTestOptions) -> bool {
    info!(
        plant = %options.plant_name,
        total_readings = options.total_readings,
        per_call = options.per_call,
        "Starting load test"
    );

    match run_load_test(client, options).await {
        Ok(report) => {
            info!(
                plant_id = %report.plant_id,
                batches = format!("{}/{}", report.batches_ok, report.plan.num_batches),
                total_sent = report.total_sent,
                elapsed_secs = format!("{:.2}", report.elapsed.as_secs_f64()),
                throughput = format!("{:.2} readings/s", report.throughput()),
                "Load test summary"
            );
            !report.aborted
        }
        Err(e) => {
            error!(error = %e, "Load test could not start. Is the API running?");
            false
        }
    }
}

async fn run_simulate(client: &ApiClient, options: &SimulatorOptions) -> bool {
    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping..."),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        on_signal.cancel();
    });

    info!("Simulator running. Press Ctrl+C to stop.");
    match run_simulator(client, options, cancel).await {
        Ok(stats) => {
            info!(
                batches_sent = stats.batches_sent,
                batches_failed = stats.batches_failed,
                readings_sent = stats.readings_sent,
                "Simulator summary"
            );
            true
        }
        Err(e) => {
            error!(error = %e, "Simulator could not start. Is the API running?");
            false
        }
    }
}
