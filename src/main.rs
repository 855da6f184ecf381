//! flyline - simulated visual-velocity landing mission

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use flyline::io::MissionConfig;
use flyline::link::encode_blocks;
use flyline::mission::{GeoCoordinate, LocationFix, MissionState, OperatorEvent, SharedLocation, TargetWaypointPair};
use flyline::sim::{GroundCamera, PatternScene, RecordingActuator, ScriptedReceiver, SimulatedRanging, StaticOrientation};
use flyline::system::{MissionEvent, MissionHardware, MissionSystem};
use flyline::velocity::EstimatorKind;

const CAMERA_PERIOD: Duration = Duration::from_millis(33);
const START: (f64, f64) = (55.6740, 12.5650);
/// Pattern position seen from above the landing site, inside the acceptance box.
const CENTRED: (f64, f64) = (190.0, 150.0);
const OFF_CENTRE: (f64, f64) = (60.0, 40.0);

#[derive(Parser)]
#[command(name = "flyline")]
#[command(about = "Runs a simulated quad-rotor landing mission")]
#[command(version)]
struct Cli {
    /// Mission configuration (YAML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Velocity estimator: optical-flow or pose-delta.
    #[arg(short, long)]
    estimator: Option<EstimatorKind>,

    /// Seconds of simulated flight before shutting down.
    #[arg(short, long, default_value_t = 20.0)]
    duration_secs: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => MissionConfig::load(path)?,
        None => MissionConfig::default(),
    };
    if let Some(kind) = cli.estimator {
        config.estimator = kind;
    }
    run(&config, Duration::from_secs_f64(cli.duration_secs.max(0.0)))
}

fn run(config: &MissionConfig, duration: Duration) -> Result<()> {
    let target = TargetWaypointPair::new(GeoCoordinate::new(55.6761, 12.5683), GeoCoordinate::new(55.6771, 12.5701));
    let frames = encode_blocks(&target, 5).context("Failed to encode target pair")?;

    let scene = PatternScene::new(320, 240);
    let location = Arc::new(SharedLocation::new());
    let recorder = RecordingActuator::new();
    let hardware = MissionHardware {
        actuator: Box::new(recorder.clone()),
        ranging: Box::new(SimulatedRanging::new(150.0)),
        modem: Arc::new(ScriptedReceiver::new(frames)),
        pattern_camera: Box::new(scene.source()),
        orientation: Arc::new(StaticOrientation::level()),
        location: location.clone(),
    };
    let mut system = MissionSystem::start(config, hardware)?;

    let camera = GroundCamera::new(config.estimator, 160, 120, config.optical_flow.metres_per_pixel)
        .with_speed(0.4, 0.1);
    let feed = system.camera_feed();
    let aim = target.aim_point();

    system.send_event(OperatorEvent::ConfirmCalibration)?;
    let start = Instant::now();
    let mut pattern_shown = false;
    while start.elapsed() < duration && system.is_running() {
        let elapsed = start.elapsed();
        feed.push(camera.sample(elapsed.as_nanos() as u64)?);

        let progress = (elapsed.as_secs_f64() / duration.as_secs_f64()).min(1.0);
        location.update(LocationFix {
            latitude: START.0 + (aim.latitude - START.0) * progress,
            longitude: START.1 + (aim.longitude - START.1) * progress,
            altitude_m: 12.0,
            accuracy_m: 8.0 - 5.0 * progress,
        });

        if !pattern_shown && progress > 0.3 {
            scene.place_pattern(Some(OFF_CENTRE));
            pattern_shown = true;
        }

        let events: Vec<MissionEvent> = system.events().try_iter().collect();
        for event in events {
            match event {
                MissionEvent::TargetAcquired(pair) => {
                    info!(?pair, distance_m = pair.first.distance_to(&pair.second), "target received");
                    system.send_event(OperatorEvent::ConfirmLiftoff)?;
                }
                MissionEvent::StateChanged { to: MissionState::VisualSeek, .. } => {
                    scene.place_pattern(Some(CENTRED));
                }
                MissionEvent::StateChanged { to: MissionState::Landing, .. } => {
                    system.send_event(OperatorEvent::ConfirmLanded)?;
                }
                MissionEvent::StateChanged { from, to, tick } => info!(%from, %to, tick, "state changed"),
                MissionEvent::PatternSighted { fix, location } => {
                    info!(x = fix.x, y = fix.y, ?location, "pattern sighted")
                }
                MissionEvent::LockRequested(request) => {
                    info!(state = %request.state, guidance = ?request.guidance, height_cm = ?request.height_cm, "visual lock requested")
                }
                MissionEvent::LinkFault(e) | MissionEvent::TransportLost(e) => warn!("{}", e),
                other => info!(event = ?other, "mission event"),
            }
        }
        if system.state() == MissionState::Landed {
            break;
        }
        thread::sleep(CAMERA_PERIOD);
    }

    let exit = system.shutdown();
    info!(
        ?exit,
        state = %system.state(),
        motor_writes = recorder.commands().len(),
        "simulation finished"
    );
    Ok(())
}
