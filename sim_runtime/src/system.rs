use crate::backend::SimulationBackend;
use crate::kinematics::{enrich, KinematicsProvider};
use crate::logging::{LogPipeline, LogSink};
use motion_control::{ControllerManager, DeviceParams};
use simcore_lib::{
    ActuationMode, Command, ControlError, ControllerMode, DeviceId, DeviceInfo, DeviceRegistry,
    LogError, LogRecord, LogSchema, RobotState, SceneConfig, SimulationError, Target, TargetKind,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Idle,
    Running,
    /// Terminal: entered on a stop request, a backend terminal condition,
    /// or a backend failure. A stopped system executes no further ticks.
    Stopped,
}

/// Outcome of one `run_for` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Ticks executed by this call.
    pub ticks: u64,
    /// Tick counter after the run.
    pub final_tick: u64,
    /// Simulated time after the run (s).
    pub sim_time: f64,
    /// Records accepted by the logging pipeline so far.
    pub records_written: u64,
    /// Device-ticks that fell back to a safe command.
    pub fallbacks: u64,
}

enum ControlRequest {
    SetTarget(DeviceId, Target),
    SetMode(DeviceId, ControllerMode),
}

/// State shared between the running system and its handles. The mode
/// mirror tracks each device's next-boundary mode so handles can validate
/// targets without touching the manager.
struct SharedControl {
    registry: DeviceRegistry,
    modes: Mutex<BTreeMap<DeviceId, ControllerMode>>,
    queue: Mutex<Vec<ControlRequest>>,
    stop: AtomicBool,
}

/// Cloneable handle for steering a running system from another thread.
///
/// Requests are validated synchronously against the device registry and
/// the mode mirror, then queued; the tick loop drains the queue at the
/// next tick boundary, so a command never takes effect mid-tick.
#[derive(Clone)]
pub struct SystemHandle {
    shared: Arc<SharedControl>,
}

impl SystemHandle {
    pub fn set_target(&self, device: &DeviceId, target: Target) -> Result<(), ControlError> {
        let info = self.device_info(device)?;
        let modes = self
            .shared
            .modes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mode = modes
            .get(device)
            .copied()
            .ok_or_else(|| ControlError::UnknownDevice(device.clone()))?;

        match (&target, mode) {
            (Target::Joint { q, gains }, ControllerMode::JointPosition) => {
                if q.len() != info.dof {
                    return Err(ControlError::TargetShape {
                        device: device.clone(),
                        expected: info.dof,
                        actual: q.len(),
                    });
                }
                if let Some(gains) = gains {
                    if gains.dof() != info.dof {
                        return Err(ControlError::TargetShape {
                            device: device.clone(),
                            expected: info.dof,
                            actual: gains.dof(),
                        });
                    }
                }
            }
            (Target::Cartesian { .. }, ControllerMode::Impedance) => {}
            (other, mode) => {
                return Err(ControlError::TargetKind {
                    device: device.clone(),
                    mode,
                    kind: other.kind(),
                });
            }
        }
        drop(modes);

        self.push(ControlRequest::SetTarget(device.clone(), target));
        Ok(())
    }

    pub fn set_controller_mode(
        &self,
        device: &DeviceId,
        mode: ControllerMode,
    ) -> Result<(), ControlError> {
        let info = self.device_info(device)?;
        if !mode.supported_by(info.actuation) {
            return Err(ControlError::InvalidModeTransition {
                device: device.clone(),
                mode,
                actuation: info.actuation,
            });
        }
        self.shared
            .modes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.clone(), mode);
        self.push(ControlRequest::SetMode(device.clone(), mode));
        Ok(())
    }

    /// Request a stop; the loop finishes the current tick and halts.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }

    fn device_info(&self, device: &DeviceId) -> Result<DeviceInfo, ControlError> {
        self.shared
            .registry
            .get(device)
            .cloned()
            .ok_or_else(|| ControlError::UnknownDevice(device.clone()))
    }

    fn push(&self, request: ControlRequest) {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
    }
}

/// The tick-loop orchestrator.
///
/// Each tick: drain queued requests, apply pending mode switches, read
/// every device's state, run every controller, commit every command, log,
/// then advance physics exactly once. A kinematics or controller failure
/// on one device downgrades only that device to a safe fallback command
/// for the tick; backend read/write/advance failures halt the run.
pub struct RobotSystem {
    scene: String,
    registry: DeviceRegistry,
    manager: ControllerManager,
    provider: Box<dyn KinematicsProvider>,
    backend: Box<dyn SimulationBackend>,
    pipeline: Option<LogPipeline>,
    timestep: f64,
    compute_budget: Option<Duration>,
    state: SystemState,
    tick: u64,
    sim_time: f64,
    fallbacks: u64,
    shared: Arc<SharedControl>,
}

impl RobotSystem {
    pub fn from_config(
        config: &SceneConfig,
        provider: Box<dyn KinematicsProvider>,
        backend: Box<dyn SimulationBackend>,
    ) -> Result<Self, ControlError> {
        let registry = config.to_registry();
        let mut manager = ControllerManager::new(config.timestep);
        let mut modes = BTreeMap::new();

        for device in &config.devices {
            let id = device.device_id();
            let info = registry
                .get(&id)
                .cloned()
                .ok_or_else(|| ControlError::UnknownDevice(id.clone()))?;
            let cartesian_gains = device.cartesian_gains().map_err(|source| {
                ControlError::Gains {
                    device: id.clone(),
                    source,
                }
            })?;
            let joint_gains = device.joint_gains().map_err(|source| ControlError::Gains {
                device: id.clone(),
                source,
            })?;
            manager.register(DeviceParams {
                info,
                initial_mode: device.controller,
                cartesian_gains,
                joint_gains,
                torque_limit: device.torque_limits(),
            })?;
            modes.insert(id, device.controller);
        }

        let shared = Arc::new(SharedControl {
            registry: registry.clone(),
            modes: Mutex::new(modes),
            queue: Mutex::new(Vec::new()),
            stop: AtomicBool::new(false),
        });

        Ok(Self {
            scene: config.name.clone(),
            registry,
            manager,
            provider,
            backend,
            pipeline: None,
            timestep: config.timestep,
            compute_budget: config
                .compute_budget_ms
                .map(|ms| Duration::from_secs_f64(ms / 1000.0)),
            state: SystemState::Idle,
            tick: 0,
            sim_time: 0.0,
            fallbacks: 0,
            shared,
        })
    }

    /// Attach a logging sink; the run schema covers every registered device.
    pub fn attach_logging(&mut self, sink: Box<dyn LogSink>) -> Result<(), LogError> {
        let schema = LogSchema::new(
            self.scene.clone(),
            self.timestep,
            self.registry.ids().cloned().collect(),
        );
        info!("logging run {} for scene {}", schema.run_id, schema.scene);
        self.pipeline = Some(LogPipeline::new(schema, sink)?);
        Ok(())
    }

    pub fn handle(&self) -> SystemHandle {
        SystemHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn mode(&self, device: &DeviceId) -> Result<ControllerMode, ControlError> {
        self.manager.mode(device)
    }

    /// Direct (same-thread) target assignment, validated immediately.
    pub fn set_target(&mut self, device: &DeviceId, target: Target) -> Result<(), ControlError> {
        self.manager.set_target(device, target)
    }

    /// Direct (same-thread) mode switch, effective at the next boundary.
    pub fn set_controller_mode(
        &mut self,
        device: &DeviceId,
        mode: ControllerMode,
    ) -> Result<(), ControlError> {
        self.manager.set_mode(device, mode)?;
        self.shared
            .modes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.clone(), mode);
        Ok(())
    }

    /// Run until stopped or the backend reports a terminal condition.
    pub fn run(&mut self) -> Result<RunSummary, SimulationError> {
        self.run_for(None)
    }

    /// Run for at most `max_ticks` ticks (unbounded when `None`).
    ///
    /// Exhausting a bounded run leaves the system `Idle` and resumable; a
    /// stop request, a backend terminal condition, or a backend failure
    /// moves it to the terminal `Stopped` state, after which further calls
    /// execute nothing.
    pub fn run_for(&mut self, max_ticks: Option<u64>) -> Result<RunSummary, SimulationError> {
        let start_tick = self.tick;
        let records_before = self.records_written();

        if self.state != SystemState::Stopped {
            self.state = SystemState::Running;
            let result = loop {
                if self.shared.stop.load(Ordering::SeqCst) {
                    info!("stop requested, halting at tick {}", self.tick);
                    self.state = SystemState::Stopped;
                    break Ok(());
                }
                if let Some(max) = max_ticks {
                    if self.tick - start_tick >= max {
                        self.state = SystemState::Idle;
                        break Ok(());
                    }
                }
                if self.backend.is_terminal() {
                    info!("backend reached terminal condition at tick {}", self.tick);
                    self.state = SystemState::Stopped;
                    break Ok(());
                }
                if let Err(e) = self.tick_once() {
                    self.state = SystemState::Stopped;
                    break Err(e);
                }
            };
            result?;
        }

        Ok(RunSummary {
            ticks: self.tick - start_tick,
            final_tick: self.tick,
            sim_time: self.sim_time,
            records_written: self.records_written().saturating_sub(records_before),
            fallbacks: self.fallbacks,
        })
    }

    fn records_written(&self) -> u64 {
        self.pipeline
            .as_ref()
            .map(LogPipeline::records_written)
            .unwrap_or(0)
    }

    fn drain_requests(&mut self) {
        let requests = std::mem::take(
            &mut *self
                .shared
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for request in requests {
            // Requests were validated by the handle; a failure here means a
            // later request in the same batch invalidated this one.
            let outcome = match request {
                ControlRequest::SetTarget(device, target) => {
                    self.manager.set_target(&device, target)
                }
                ControlRequest::SetMode(device, mode) => self.manager.set_mode(&device, mode),
            };
            if let Err(e) = outcome {
                warn!("dropping stale control request: {e}");
            }
        }
    }

    fn tick_once(&mut self) -> Result<(), SimulationError> {
        self.drain_requests();
        self.manager.begin_tick();

        // Gather all, then commit all: no device's command for this tick
        // observes another device's command.
        let mut staged: Vec<(DeviceId, RobotState, ControllerMode, Option<TargetKind>, Command, bool)> =
            Vec::with_capacity(self.registry.len());

        let infos: Vec<DeviceInfo> = self.registry.iter().cloned().collect();
        for info in &infos {
            let state = self.backend.read_state(&info.id)?;
            let started = Instant::now();

            let outcome = match enrich(self.provider.as_ref(), &info.model, state.clone()) {
                Ok(enriched) => self
                    .manager
                    .step(&info.id, &enriched)
                    .map(|command| (command, enriched.state)),
                Err(e) => Err(ControlError::Kinematics(e)),
            };

            let (mut command, logged_state, mut fallback) = match outcome {
                Ok((command, enriched_state)) => (command, enriched_state, false),
                Err(e) => {
                    warn!("device {}: control failed, applying fallback: {e}", info.id);
                    (fallback_command(info, &state), state, true)
                }
            };

            if let Some(budget) = self.compute_budget {
                if !fallback && started.elapsed() > budget {
                    warn!(
                        "device {}: compute budget exceeded ({:?}), applying fallback",
                        info.id, budget
                    );
                    command = fallback_command(info, &logged_state);
                    fallback = true;
                }
            }

            if fallback {
                self.fallbacks += 1;
            }
            let mode = self
                .manager
                .mode(&info.id)
                .map_err(|e| SimulationError::Backend(e.to_string()))?;
            let target = self
                .manager
                .target_kind(&info.id)
                .map_err(|e| SimulationError::Backend(e.to_string()))?;
            staged.push((info.id.clone(), logged_state, mode, target, command, fallback));
        }

        for (id, _, _, _, command, _) in &staged {
            self.backend.write_command(id, command)?;
        }

        if let Some(pipeline) = self.pipeline.as_mut() {
            let mut failed = None;
            for (id, state, mode, target, command, fallback) in &staged {
                let record = LogRecord {
                    tick: self.tick,
                    sim_time: self.sim_time,
                    device: id.clone(),
                    mode: *mode,
                    q: state.q.clone(),
                    qd: state.qd.clone(),
                    ee_pose: state.ee_pose,
                    target: *target,
                    command: Some(command.clone()),
                    fallback: *fallback,
                };
                if let Err(e) = pipeline.append(&record) {
                    failed = Some(e);
                    break;
                }
            }
            // A logging failure never stops control; drop the pipeline and
            // keep running.
            if let Some(e) = failed {
                warn!("logging pipeline failed, disabling: {e}");
                self.pipeline = None;
            }
        }

        self.backend.advance(self.timestep)?;
        self.tick += 1;
        self.sim_time += self.timestep;
        debug!("tick {} complete (t = {:.4}s)", self.tick, self.sim_time);
        Ok(())
    }
}

fn fallback_command(info: &DeviceInfo, state: &RobotState) -> Command {
    match info.actuation {
        ActuationMode::Torque => Command::zero_torque(info.dof),
        ActuationMode::Position => Command::hold_position(state.q.clone()),
    }
}
