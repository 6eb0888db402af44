//! # TXT Link Binary
//!
//! Connects to a TXT controller (or an in-process simulation), applies the
//! slot setup from a TOML file, logs every callback event and prints the
//! link status on shutdown.
//!
//! # Usage
//!
//! ```bash
//! # Simulated controller with one extension
//! txt_link --simulate --interfaces 2 -v
//!
//! # Real controller, setup from file, frame log in /tmp/txt
//! txt_link --config config/txt.toml --host 192.168.7.2 --log-dir /tmp/txt
//!
//! # Synchronized move demo (M1 leads M2) on the simulator
//! txt_link --simulate --demo-sync
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;
use txt_common::config::{AppConfig, ConfigLoader};
use txt_link::prelude::*;

/// TXT Link - transfer-area link to a fischertechnik TXT controller
#[derive(Parser, Debug)]
#[command(name = "txt_link")]
#[command(version)]
#[command(about = "Transfer-area link to a TXT controller and its extensions")]
#[command(long_about = None)]
struct Args {
    /// Path to the TOML configuration file ([link] and [setup] sections)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Controller host (overrides the file)
    #[arg(long)]
    host: Option<String>,

    /// Controller port (overrides the file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of interfaces to exchange: 1 = local controller only
    #[arg(short, long)]
    interfaces: Option<usize>,

    /// Use the in-process simulated controller
    #[arg(short = 's', long)]
    simulate: bool,

    /// Run a synchronized M1/M2 distance move once the link is up
    #[arg(long)]
    demo_sync: bool,

    /// Directory for the JSON-lines frame log
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("txt_link failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    setup_tracing(&args);

    info!("TXT Link v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut app = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };
    if let Some(host) = &args.host {
        app.link.host = host.clone();
    }
    if let Some(port) = args.port {
        app.link.port = port;
    }
    if let Some(count) = args.interfaces {
        app.link.interface_count = count;
    }
    if args.log_dir.is_some() {
        app.link.log_dir = args.log_dir.clone();
    }

    let interface_count = app.link.interface_count;
    let mut engine = TxtEngine::new(app.link.clone())?;
    engine.apply_setup(&app.setup)?;
    register_event_logging(&engine, interface_count)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        engine.set_link_lost_handler(move |misses| {
            error!("Link lost after {} misses, shutting down", misses);
            running.store(false, Ordering::SeqCst);
        });
    }
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            running.store(false, Ordering::SeqCst);
        })?;
    }

    if args.simulate {
        info!("Simulation mode enabled");
        let (controller, _handle) = SimulatedController::new(interface_count);
        engine.start_with_transport(Box::new(controller))?;
    } else {
        engine.start()?;
    }

    if args.demo_sync {
        if let Err(e) = demo_sync(&engine) {
            warn!("Sync demo aborted: {}", e);
        }
    }

    while running.load(Ordering::SeqCst) && engine.state() == EngineState::Running {
        std::thread::sleep(Duration::from_millis(100));
    }

    engine.stop()?;
    let status = engine.status();
    info!(
        "Link {:?}: {} exchanges, {} misses ({} malformed), {} timing violations, max cycle {}us",
        status.state,
        status.exchanges,
        status.total_misses,
        status.malformed_frames,
        status.timing_violations,
        status.max_cycle_time_us
    );
    if let Some(fault) = status.fault {
        warn!("Link fault: {:?}", fault);
    }

    info!("TXT Link shutdown complete");
    Ok(())
}

/// Log every event of every slot on every interface.
fn register_event_logging(engine: &TxtEngine, interface_count: usize) -> TxtResult<()> {
    let log_event = callback(|event| info!("Event: {:?}", event));
    for raw in 0..interface_count {
        let Some(interface) = InterfaceId::from_u8(raw as u8) else {
            continue;
        };
        for category in [
            CallbackCategory::InputChange,
            CallbackCategory::MotorReached,
            CallbackCategory::CounterValue,
            CallbackCategory::CounterResetReady,
        ] {
            for slot in 0..category.slot_count() {
                engine.register_callback(interface, category, slot as u8, Arc::clone(&log_event))?;
            }
        }
    }
    Ok(())
}

/// M1 leads M2 over 400 steps at speed 256, then both are stopped.
fn demo_sync(engine: &TxtEngine) -> TxtResult<()> {
    let iface = InterfaceId::LocalIo;
    let poll = Duration::from_millis(10);
    let timeout = Some(Duration::from_secs(10));

    engine.wait_config_committed(iface, poll, timeout)?;
    engine.request_counter_reset(iface, Counter::C1)?;
    engine.request_counter_reset(iface, Counter::C2)?;
    engine.wait_action_complete(iface, ActionKind::CounterReset, Counter::C1 as u8, poll, timeout)?;
    engine.wait_action_complete(iface, ActionKind::CounterReset, Counter::C2 as u8, poll, timeout)?;

    let (m1, m2) = engine.request_motor_sync(
        iface,
        Motor::M1,
        400,
        Direction::Cw,
        Motor::M2,
        Direction::Cw,
        256,
    )?;
    info!("Sync move requested (M1 {}, M2 {})", m1, m2);
    engine.wait_action_complete(iface, ActionKind::MotorEx, Motor::M1 as u8, poll, timeout)?;
    engine.wait_action_complete(iface, ActionKind::MotorEx, Motor::M2 as u8, poll, timeout)?;
    info!(
        "Sync move done: C1={} C2={}",
        engine.counter_value(iface, Counter::C1)?,
        engine.counter_value(iface, Counter::C2)?
    );

    engine.request_motor_stop(iface, Motor::M1)?;
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
