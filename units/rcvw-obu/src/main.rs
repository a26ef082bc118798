mod config;
mod replay;
mod udp_stream;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use clap::Parser;
use config::{parse_hri_list, ConfigWatcher, SystemConfig};
use log::{info, warn};
use rcvw_core::{
    Clock, CoreInputs, LogSink, MonotonicClock, Scheduler, SimpleLaneMatcher, StatusBoard,
};
use udp_stream::{FanoutSink, UdpAlertSink};

/// Rail crossing violation warning on-board unit
#[derive(Debug, Parser)]
#[command(name = "rcvw-obu", version, about)]
struct Cli {
    /// JSON configuration file (watched for changes)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Crossing list in the {"HRIs":[...]} shape; replaces known_crossings
    #[arg(long)]
    hri_list: Option<PathBuf>,

    /// JSON-lines recording of decoded inputs to replay
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Serial device or capture file streaming NMEA 0183
    #[arg(long)]
    gnss_device: Option<PathBuf>,

    /// Override the UDP alert target (host:port)
    #[arg(long)]
    udp_target: Option<String>,

    /// Stop after this many seconds
    #[arg(long)]
    duration_s: Option<u64>,

    /// Config file poll interval (ms)
    #[arg(long, default_value_t = 1000)]
    watch_interval_ms: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("rcvw-obu: no usable configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(target) = &cli.udp_target {
        config.transport.udp_target = Some(target.clone());
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    info!("=== RCVW On-Board Unit ===");
    info!(
        "Vehicle: {:?}, {:.1} m, antenna {:.1} m from front",
        config.core.vehicle.class, config.core.vehicle.length_m, config.core.vehicle.antenna_from_front_m
    );
    info!(
        "Formula: {:?}, cadence {} ms, {} known crossings",
        config.core.stopping.formula,
        config.core.scheduler.cadence_ms,
        config.core.known_crossings.len()
    );

    let stop = Arc::new(AtomicBool::new(false));
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let status = StatusBoard::new();
    let inputs = Arc::new(CoreInputs::new(
        config.core.fusion.clone(),
        Arc::new(SimpleLaneMatcher::new(config.core.crossing.near_lane_extent_pct)),
        Arc::clone(&status),
    ));

    let mut scheduler = Scheduler::new(config.core.clone(), Arc::clone(&inputs), build_sink(&config));
    let config_slot = scheduler.config_slot();

    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    if let Some(path) = &cli.replay {
        match replay::spawn_replay(path, Arc::clone(&inputs), Arc::clone(&clock), Arc::clone(&stop)) {
            Ok(handles) => threads.extend(handles),
            Err(e) => warn!("Replay of {} unavailable: {}", path.display(), e),
        }
    }
    if let Some(path) = &cli.gnss_device {
        match replay::spawn_gnss_reader(path, Arc::clone(&inputs), Arc::clone(&clock), Arc::clone(&stop)) {
            Ok(handle) => threads.push(handle),
            Err(e) => warn!("GNSS source {} unavailable: {}", path.display(), e),
        }
    }
    if threads.is_empty() {
        warn!("No input sources; the unit will report missing inputs");
    }

    if let Some(path) = cli.config.clone() {
        let overlay = if cli.hri_list.is_some() {
            config.core.known_crossings.clone()
        } else {
            Vec::new()
        };
        let mut watcher = ConfigWatcher::new(path, config.clone(), overlay, config_slot);
        let stop = Arc::clone(&stop);
        let interval = Duration::from_millis(cli.watch_interval_ms.max(50));
        let spawned = thread::Builder::new()
            .name("config-watch".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    watcher.poll();
                }
            });
        match spawned {
            Ok(handle) => threads.push(handle),
            Err(e) => warn!("Config watcher not started: {}", e),
        }
    }

    let evaluator = {
        let clock = Arc::clone(&clock);
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("evaluator".to_string())
            .spawn(move || scheduler.run(clock.as_ref(), &stop))
    };
    let evaluator = match evaluator {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Evaluator thread failed to start: {}", e);
            stop.store(true, Ordering::Relaxed);
            return ExitCode::FAILURE;
        }
    };

    // Main thread: periodic status until the run ends
    let started = Instant::now();
    let deadline = cli.duration_s.map(Duration::from_secs);
    let status_interval = Duration::from_millis(config.transport.status_interval_ms.max(100));
    let mut last_status = Instant::now();
    loop {
        thread::sleep(Duration::from_millis(100));
        if deadline.is_some_and(|d| started.elapsed() >= d) || evaluator.is_finished() {
            break;
        }
        if last_status.elapsed() >= status_interval {
            last_status = Instant::now();
            let line = status
                .snapshot()
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect::<Vec<_>>()
                .join(", ");
            info!("Status: {}", line);
        }
    }

    info!("Shutting down");
    stop.store(true, Ordering::Relaxed);
    if evaluator.join().is_err() {
        warn!("Evaluator thread panicked");
    }
    for handle in threads {
        if handle.join().is_err() {
            warn!("Producer thread panicked");
        }
    }

    ExitCode::SUCCESS
}

fn load_config(cli: &Cli) -> Result<SystemConfig, Box<dyn std::error::Error>> {
    let mut config = SystemConfig::load(cli.config.as_deref())?;
    if let Some(path) = &cli.hri_list {
        let text = std::fs::read_to_string(path)?;
        config.core.known_crossings = parse_hri_list(&text)?;
        config.core.validate()?;
    }
    Ok(config)
}

fn build_sink(config: &SystemConfig) -> FanoutSink {
    let mut sink = FanoutSink::new();
    sink.push(Box::new(LogSink));

    if let Some(target) = &config.transport.udp_target {
        let mut udp = UdpAlertSink::new(target);
        match udp.init() {
            Ok(()) => sink.push(Box::new(udp)),
            Err(e) => warn!("UDP alerts disabled: {}", e),
        }
    }

    info!("Publishing alerts to {} sinks", sink.len());
    sink
}
