//! EK-PAR - Host Harness
//!
//! Runs both sides of the pipeline in one process: a simulated real-time
//! loop reading parameters, and the background task fed with JSON command
//! files through the command mailbox. Prints the parameter map, every status
//! line and the final active values.

use clap::Parser;
use ekpar::{
    background::{BackgroundTask, CycleReport, ParameterSetting},
    component::{ComponentTree, ParameterSet, Verify},
    config::PipelineConfig,
    hal::{posix::PosixHal, Hal, Ticker},
    mailbox::{MailboxRegion, Reader},
    param_enum,
    parameter::{ParamReader, Parameter},
    snapshot::ParameterMap,
    types::{ComponentId, Warning},
    warning,
};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Feed JSON command files through the parameter pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON command files, processed in order (one message per file)
    commands: Vec<PathBuf>,

    /// Pipeline config (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Real-time loop period in microseconds
    #[arg(long, default_value = "100")]
    rt_period_us: u32,

    /// Skip printing the parameter map
    #[arg(long)]
    no_map: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

// ============================================================================
// Demo Component Tree
// ============================================================================

param_enum! {
    /// Converter operating mode
    enum Mode { Off, Standby, Run }
}

/// Integral action needs a proportional term
struct PidGains;

impl Verify for PidGains {
    fn verify_parameters(&self, parameters: &ParameterSet<'_>) -> Option<Warning> {
        let kp = parameters.staged::<f64>("kp")?;
        let ki = parameters.staged::<f64>("ki")?;
        (kp == 0.0 && ki != 0.0).then(|| {
            warning!(
                "Integral gain {} requires a non-zero proportional gain.\n",
                ki
            )
        })
    }
}

/// Output range must be ordered
struct OutputRange;

impl Verify for OutputRange {
    fn verify_parameters(&self, parameters: &ParameterSet<'_>) -> Option<Warning> {
        let [low, high] = parameters.staged::<[f64; 2]>("range")?;
        (low >= high).then(|| warning!("Output range [{}, {}] is empty.\n", low, high))
    }
}

/// Real-time side handles
struct Handles {
    mode: ParamReader<Mode>,
    kp: ParamReader<f64>,
    ki: ParamReader<f64>,
    kd: ParamReader<f64>,
    range: ParamReader<[f64; 2]>,
}

fn build_tree(tree: &mut ComponentTree) -> ekpar::Result<(ComponentId, Handles)> {
    let root = tree.add_component(None, "Converter", "main")?;
    let mode = tree.add_parameter(root, "mode", Parameter::new(Mode::Off))?;
    tree.add_parameter(root, "phases", Parameter::new(3u8).with_limits(1.0, 3.0)?)?;

    let pid = tree.add_component_with(Some(root), "PID", "current", PidGains)?;
    let kp = tree.add_parameter(pid, "kp", Parameter::new(0.5f64).with_limits(0.0, 1000.0)?)?;
    let ki = tree.add_parameter(pid, "ki", Parameter::new(0.0f64).with_limits(0.0, 1000.0)?)?;
    let kd = tree.add_parameter(pid, "kd", Parameter::new(0.0f64).with_limits(0.0, 1000.0)?)?;

    let limiter = tree.add_component_with(Some(root), "Limiter", "output", OutputRange)?;
    let range = tree.add_parameter(limiter, "range", Parameter::new([-1.0f64, 1.0]))?;

    Ok((
        root,
        Handles {
            mode,
            kp,
            ki,
            kd,
            range,
        },
    ))
}

// ============================================================================
// Real-Time Loop (simulated)
// ============================================================================

/// PI(D) on a fixed error signal; only exercises the readers
fn control_loop(handles: &Handles, hal: &PosixHal, period_us: u32, stop: &AtomicBool, cycles: &AtomicU64) {
    let mut integral = 0.0;
    let mut previous = 0.0;
    let dt = f64::from(period_us) * 1e-6;

    while !stop.load(Ordering::Relaxed) {
        if handles.mode.read() == Mode::Run {
            let error = 1.0;
            integral += error * dt;
            let derivative = (error - previous) / dt;
            previous = error;

            let [low, high] = handles.range.read();
            let output = handles.kp.read() * error + handles.ki.read() * integral + handles.kd.read() * derivative;
            std::hint::black_box(output.clamp(low, high));
        }
        cycles.fetch_add(1, Ordering::Relaxed);
        hal.delay_us(period_us);
    }
}

// ============================================================================
// Main
// ============================================================================

fn print_pending(label: &str, reader: &mut Reader<'_>, scratch: &mut [u8]) -> ekpar::Result<()> {
    if let Some(message) = reader.read(scratch)? {
        println!("{}: {}", label, String::from_utf8_lossy(message.payload).trim_end());
    }
    Ok(())
}

fn summarize(file: &Path, cycle: Option<CycleReport>) {
    match cycle {
        Some(cycle) => info!(
            file = %file.display(),
            applied = cycle.applied,
            failed = cycle.failed,
            committed = cycle.commit.committed.len(),
            rejected = cycle.commit.rejected.len(),
            "message processed"
        ),
        None => warn!(file = %file.display(), "no message received"),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => PipelineConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => PipelineConfig::default(),
    };
    info!(commit_policy = ?config.commit_policy, "EK-PAR harness v{}", ekpar::VERSION_STRING);

    // Shared regions (one per direction)
    let command_region = MailboxRegion::new(config.command_queue_size);
    let status_region = MailboxRegion::new(config.status_queue_size);
    let map_region = MailboxRegion::new(config.parameter_map_queue_size);

    let mut tree = ComponentTree::new();
    let (root, handles) = build_tree(&mut tree)?;

    let setting = ParameterSetting::new(command_region.reader()?, status_region.writer()?, &config);
    let parameter_map = ParameterMap::new(map_region.writer()?, config.parameter_map_version);
    let mut task = BackgroundTask::new(setting, parameter_map, root, &config);

    // Operator side
    let mut command_writer = command_region.writer::<()>()?;
    let mut status_reader = status_region.reader::<()>()?;
    let mut map_reader = map_region.reader::<()>()?;
    let mut scratch = vec![0u8; config.parameter_map_queue_size.max(config.status_queue_size)];

    task.start(&tree)?;
    if !args.no_map {
        print_pending("parameter map", &mut map_reader, &mut scratch)?;
    }

    let hal = PosixHal::new();
    let stop = AtomicBool::new(false);
    let cycles = AtomicU64::new(0);

    std::thread::scope(|scope| -> Result<(), Box<dyn Error>> {
        let rt_hal = PosixHal::new();
        let (stop, cycles) = (&stop, &cycles);
        scope.spawn(move || control_loop(&handles, &rt_hal, args.rt_period_us, stop, cycles));

        let mut ticker = Ticker::new(config.tick_period_us);
        let mut feed = || -> Result<(), Box<dyn Error>> {
            for file in &args.commands {
                let text = std::fs::read(file)?;
                command_writer.write_bytes(&text)?;

                ticker.wait(&hal);
                summarize(file, task.tick(&mut tree)?);
                print_pending("status", &mut status_reader, &mut scratch)?;
            }
            Ok(())
        };
        let outcome = feed();

        // The scope joins the real-time thread, so stop it on every path
        stop.store(true, Ordering::Relaxed);
        outcome
    })?;

    info!(cycles = cycles.load(Ordering::Relaxed), "real-time loop stopped");
    let mut names: Vec<&str> = tree.registry().names().collect();
    names.sort_unstable();
    for name in names {
        if let Some(parameter) = tree.lookup(name) {
            println!("active: {} = {}", name, parameter.active_json());
        }
    }
    Ok(())
}
