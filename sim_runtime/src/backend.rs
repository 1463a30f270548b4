use nalgebra::DVector;
use simcore_lib::{
    ActuationMode, Command, DeviceId, DhChain, RobotState, SimulationError,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Boundary to the external physics engine.
///
/// The tick loop gathers every device's state, pushes every command, and
/// only then advances the engine — `advance` is called exactly once per
/// tick, after all writes for that tick.
pub trait SimulationBackend: Send {
    /// Reset the simulation to its initial state.
    fn reset(&mut self) -> Result<(), SimulationError>;

    /// Advance physics by one timestep.
    fn advance(&mut self, dt: f64) -> Result<(), SimulationError>;

    /// Snapshot one device's joint state.
    fn read_state(&mut self, device: &DeviceId) -> Result<RobotState, SimulationError>;

    /// Stage one device's actuator command for the next `advance`. The
    /// command's actuation tag must match the device's capability.
    fn write_command(&mut self, device: &DeviceId, command: &Command) -> Result<(), SimulationError>;

    /// Whether the simulation reached a terminal condition.
    fn is_terminal(&self) -> bool {
        false
    }
}

struct DeviceSim {
    actuation: ActuationMode,
    q: DVector<f64>,
    qd: DVector<f64>,
    home: DVector<f64>,
    /// Gravity load model; omit for gravity-free devices.
    chain: Option<DhChain>,
    /// Viscous joint damping (N·m·s/rad), kills null-space drift.
    damping: f64,
    /// Tracking rate limit for position-actuated devices (rad/s).
    max_velocity: f64,
    command: Option<Command>,
}

/// Built-in joint-space reference backend.
///
/// Torque-actuated devices integrate unit-inertia dynamics
/// `q̈ = τ − g(q) − b·q̇` with semi-implicit Euler; position-actuated
/// devices track their setpoint with a velocity limit. Deliberately
/// simple — it exists so scenes and end-to-end tests can run without an
/// external engine, not as a contact-resolving physics solver.
pub struct JointSpaceBackend {
    devices: BTreeMap<DeviceId, DeviceSim>,
    tick: u64,
    sim_time: f64,
}

impl JointSpaceBackend {
    pub fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
            tick: 0,
            sim_time: 0.0,
        }
    }

    pub fn add_device(
        &mut self,
        id: DeviceId,
        actuation: ActuationMode,
        home: DVector<f64>,
        chain: Option<DhChain>,
    ) {
        self.devices.insert(
            id,
            DeviceSim {
                actuation,
                q: home.clone(),
                qd: DVector::zeros(home.len()),
                home,
                chain,
                damping: 2.0,
                max_velocity: 2.0,
                command: None,
            },
        );
    }

    pub fn set_damping(&mut self, id: &DeviceId, damping: f64) {
        if let Some(device) = self.devices.get_mut(id) {
            device.damping = damping;
        }
    }

    fn device(&self, id: &DeviceId) -> Result<&DeviceSim, SimulationError> {
        self.devices
            .get(id)
            .ok_or_else(|| SimulationError::UnknownDevice(id.clone()))
    }
}

impl Default for JointSpaceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationBackend for JointSpaceBackend {
    fn reset(&mut self) -> Result<(), SimulationError> {
        self.tick = 0;
        self.sim_time = 0.0;
        for device in self.devices.values_mut() {
            device.q = device.home.clone();
            device.qd.fill(0.0);
            device.command = None;
        }
        Ok(())
    }

    fn advance(&mut self, dt: f64) -> Result<(), SimulationError> {
        for (id, device) in self.devices.iter_mut() {
            match device.actuation {
                ActuationMode::Torque => {
                    let dof = device.q.len();
                    let tau = match &device.command {
                        Some(Command::Torque(tau)) => tau.clone(),
                        _ => DVector::zeros(dof),
                    };
                    let gravity_load = match &device.chain {
                        Some(chain) => chain.gravity(&device.q).map_err(|e| {
                            SimulationError::Backend(format!("gravity model for {id}: {e}"))
                        })?,
                        None => DVector::zeros(dof),
                    };
                    // Semi-implicit Euler on q̈ = τ − g(q) − b·q̇.
                    let qdd = tau - gravity_load - device.damping * &device.qd;
                    device.qd += dt * qdd;
                    let step = dt * &device.qd;
                    device.q += step;
                }
                ActuationMode::Position => {
                    if let Some(Command::Position { q: q_des, .. }) = &device.command {
                        let max_step = device.max_velocity * dt;
                        for i in 0..device.q.len() {
                            let delta = (q_des[i] - device.q[i]).clamp(-max_step, max_step);
                            device.q[i] += delta;
                            device.qd[i] = delta / dt;
                        }
                    } else {
                        device.qd.fill(0.0);
                    }
                }
            }
        }
        self.tick += 1;
        self.sim_time += dt;
        debug!("backend advanced to tick {}", self.tick);
        Ok(())
    }

    fn read_state(&mut self, id: &DeviceId) -> Result<RobotState, SimulationError> {
        let device = self.device(id)?;
        Ok(RobotState {
            device: id.clone(),
            tick: self.tick,
            sim_time: self.sim_time,
            q: device.q.clone(),
            qd: device.qd.clone(),
            ee_pose: None,
            ee_twist: None,
            tau: None,
            external_wrench: None,
        })
    }

    fn write_command(&mut self, id: &DeviceId, command: &Command) -> Result<(), SimulationError> {
        let device = self
            .devices
            .get_mut(id)
            .ok_or_else(|| SimulationError::UnknownDevice(id.clone()))?;
        if command.actuation() != device.actuation {
            return Err(SimulationError::ActuationMismatch {
                device: id.clone(),
                expected: device.actuation,
                got: command.actuation(),
            });
        }
        if command.dof() != device.q.len() {
            return Err(SimulationError::CommandShape {
                device: id.clone(),
                expected: device.q.len(),
                actual: command.dof(),
            });
        }
        device.command = Some(command.clone());
        Ok(())
    }
}
