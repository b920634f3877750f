use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use smx_rs::sensor::{PANEL_COUNT, PanelReading, SENSORS_PER_PANEL};
use smx_rs::{DeviceLock, DeviceSession, SensorTestMode, SimulatedHandle, SimulatedPad, UpdateReason, WakeSignal};

type Pad = DeviceSession<SimulatedPad>;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Off,
    Uncalibrated,
    Calibrated,
    Noise,
    Tare,
}

impl From<ModeArg> for SensorTestMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Off => SensorTestMode::Off,
            ModeArg::Uncalibrated => SensorTestMode::UncalibratedValues,
            ModeArg::Calibrated => SensorTestMode::CalibratedValues,
            ModeArg::Noise => SensorTestMode::Noise,
            ModeArg::Tare => SensorTestMode::Tare,
        }
    }
}

/// Drive simulated StepManiaX pads and print what the session layer sees.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of pads to simulate (1 or 2).
    #[arg(short, long, default_value_t = 1)]
    pads: usize,
    /// Polling interval in milliseconds.
    #[arg(short, long, default_value_t = 50)]
    interval_ms: u64,
    /// Number of ticks to run. Runs until Ctrl+C if omitted.
    #[arg(short = 'n', long)]
    ticks: Option<u32>,
    /// Sensor test mode to poll.
    #[arg(short, long, value_enum, default_value_t = ModeArg::Calibrated)]
    sensor_mode: ModeArg,
    /// Factory reset every pad once connected.
    #[arg(long)]
    factory_reset: bool,
    /// Force a recalibration once connected.
    #[arg(long)]
    recalibrate: bool,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_thread_ids(false);

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file =
            File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

/// A pad whose panels report plausible sensor values.
fn demo_pad(pad: usize) -> SimulatedPad {
    let mut config = [0u8; smx_rs::CONFIG_SIZE];
    for (i, byte) in config.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_add(pad as u8);
    }

    let mut sim = SimulatedPad::with_config(config.into());
    for panel in 0..PANEL_COUNT {
        // Corner panels have no sensors fitted.
        if panel % 2 == 0 && panel != 4 {
            continue;
        }
        let base = (panel as i16 + 1) * 100;
        sim.set_panel(
            panel,
            Some(PanelReading {
                bad_sensor_input: [false; SENSORS_PER_PANEL],
                sensor_level: [base, base + 1, base + 2, base + 3],
                dip_switch: panel as u8,
            }),
        );
    }
    sim
}

fn run_driver(pads: &[Arc<Pad>], lock: &DeviceLock, wake: &WakeSignal, cli_ticks: Option<u32>, interval: Duration, stop: &AtomicBool) {
    let mut tick = 0u32;
    while !stop.load(Ordering::Relaxed) && cli_ticks.is_none_or(|limit| tick < limit) {
        {
            let guard = lock.lock();
            for (index, pad) in pads.iter().enumerate() {
                if let Err(e) = pad.locked(&guard).update() {
                    warn!(pad = index, "update failed: {}", e);
                }
            }
        }
        tick += 1;
        wake.wait_timeout(interval);
    }
    info!(ticks = tick, "driver stopped");
}

fn print_summary(pads: &[Arc<Pad>]) {
    for (index, pad) in pads.iter().enumerate() {
        let info = pad.info();
        println!("--- Pad {} ---", index);
        if !info.connected {
            println!("  not connected");
            continue;
        }
        println!("  Serial:           {}", info.serial_hex());
        println!("  Firmware version: {}", info.firmware_version);

        let (config, have_config) = pad.config();
        println!(
            "  Config ({}):  {}...",
            if have_config { "read" } else { "not read" },
            hex::encode(&config.as_bytes()[..16])
        );

        match pad.sensor_test_data() {
            Some(data) => {
                for panel in 0..PANEL_COUNT {
                    match data.panel(panel) {
                        Some(reading) => println!(
                            "  Panel {}: levels {:?}  bad {:?}  dip {}",
                            panel, reading.sensor_level, reading.bad_sensor_input, reading.dip_switch
                        ),
                        None => println!("  Panel {}: no data", panel),
                    }
                }
            }
            None => println!("  No sensor data"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = run(cli).await {
        error!("Application failed: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    if !(1..=2).contains(&cli.pads) {
        bail!("--pads must be 1 or 2, got {}", cli.pads);
    }

    let lock = DeviceLock::new();
    let wake = WakeSignal::new();
    let mode = SensorTestMode::from(cli.sensor_mode);

    let mut pads = Vec::with_capacity(cli.pads);
    for index in 0..cli.pads {
        let pad = Arc::new(DeviceSession::new(demo_pad(index), lock.clone(), Some(wake.clone())));
        pad.set_update_callback(Some(Box::new(|pad: usize, reason: UpdateReason| match reason {
            UpdateReason::Updated => tracing::debug!(pad, "pad updated"),
            UpdateReason::FactoryResetComplete => info!(pad, "factory reset complete"),
        })));
        pad.open_device_handle(SimulatedHandle::player(index))
            .with_context(|| format!("Failed to open pad {}", index))?;
        pad.set_sensor_test_mode(mode);
        pads.push(pad);
    }
    info!(pads = pads.len(), %mode, "pads opened");

    let stop = Arc::new(AtomicBool::new(false));
    let interval = Duration::from_millis(cli.interval_ms);
    let driver = {
        let pads = pads.clone();
        let lock = lock.clone();
        let wake = wake.clone();
        let stop = stop.clone();
        let ticks = cli.ticks;
        tokio::task::spawn_blocking(move || run_driver(&pads, &lock, &wake, ticks, interval, &stop))
    };

    if cli.factory_reset || cli.recalibrate {
        // Commands are only accepted once the transport is up; give the
        // driver a few ticks to activate the pads.
        while !pads.iter().all(|pad| pad.is_connected()) {
            if driver.is_finished() {
                bail!("driver stopped before the pads connected");
            }
            tokio::time::sleep(interval).await;
        }
        for pad in &pads {
            if cli.factory_reset {
                pad.factory_reset();
            }
            if cli.recalibrate {
                pad.force_recalibration();
            }
        }
    }

    tokio::select! {
        res = driver => {
            res.context("driver task panicked")?;
        }
        _ = signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down gracefully.");
            stop.store(true, Ordering::Relaxed);
            wake.wake();
        }
    }

    print_summary(&pads);
    for pad in &pads {
        pad.close_device();
    }
    Ok(())
}
