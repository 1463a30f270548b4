use clap::Parser;
use eyre::{Context, Result};
use nalgebra::{DVector, Vector3};
use simcore_lib::{init_tracing, DhChain, SceneConfig, Target};
use sim_runtime::{DhKinematics, JointSpaceBackend, JsonlSink, RobotSystem};
use std::fs::File;
use std::io::BufWriter;
use tracing::info;

#[derive(Parser)]
#[command(name = "scene_runner")]
#[command(about = "Run a simulated robot scene")]
struct Cli {
    #[arg(short, long, default_value = "config/two_link_arm.toml")]
    config: String,

    /// Number of ticks to run; unbounded when omitted.
    #[arg(short, long)]
    ticks: Option<u64>,

    /// JSONL log output path; logging is off when omitted.
    #[arg(short, long)]
    log: Option<String>,

    /// Joint-space target for every torque device, e.g. "0.4,0.2".
    #[arg(long)]
    joint_target: Option<String>,
}

fn main() -> Result<()> {
    let _guard = init_tracing();
    let cli = Cli::parse();

    let config = SceneConfig::load_from_file(&cli.config)
        .with_context(|| format!("loading scene {}", cli.config))?;
    info!(
        "scene '{}': {} device(s), dt = {}s",
        config.name,
        config.devices.len(),
        config.timestep
    );

    let mut system = build_system(&config)?;

    if let Some(path) = &cli.log {
        let file = File::create(path).with_context(|| format!("creating log file {path}"))?;
        let sink = JsonlSink::new(BufWriter::new(file));
        system
            .attach_logging(Box::new(sink))
            .context("initializing log pipeline")?;
    }

    if let Some(raw) = &cli.joint_target {
        let q = parse_joint_target(raw)?;
        for device in config.to_registry().ids() {
            system
                .set_target(device, Target::joints(q.clone()))
                .with_context(|| format!("setting target for {device}"))?;
        }
    }

    let summary = system.run_for(cli.ticks)?;
    info!(
        "run complete: {} ticks, {:.3}s simulated, {} records, {} fallback(s)",
        summary.ticks, summary.sim_time, summary.records_written, summary.fallbacks
    );
    Ok(())
}

fn build_system(config: &SceneConfig) -> Result<RobotSystem> {
    let provider = DhKinematics::from_config(config)?;
    let gravity = Vector3::from(config.gravity);

    let mut backend = JointSpaceBackend::new();
    for device in &config.devices {
        let chain = DhChain::from_config(&device.kinematics, gravity)?;
        backend.add_device(
            device.device_id(),
            device.actuation,
            device.home_configuration(),
            Some(chain),
        );
    }

    Ok(RobotSystem::from_config(
        config,
        Box::new(provider),
        Box::new(backend),
    )?)
}

fn parse_joint_target(raw: &str) -> Result<DVector<f64>> {
    let values: Vec<f64> = raw
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("parsing joint target '{raw}'"))?;
    Ok(DVector::from_vec(values))
}
