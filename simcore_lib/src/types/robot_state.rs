use crate::types::device::DeviceId;
use crate::types::pose::{Pose, Twist};
use nalgebra::{DMatrix, DVector, Vector6};
use serde::{Deserialize, Serialize};

/// Snapshot of one device's joint and Cartesian state at a tick.
///
/// Produced fresh each tick from the simulation backend and never mutated
/// afterwards; controllers consume it read-only. Cartesian fields are
/// optional because not every backend reports them — the kinematics
/// adapter fills them in when it enriches the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub device: DeviceId,
    pub tick: u64,
    /// Simulation time in seconds (tick × timestep).
    pub sim_time: f64,
    pub q: DVector<f64>,
    pub qd: DVector<f64>,
    pub ee_pose: Option<Pose>,
    pub ee_twist: Option<Twist>,
    /// Measured joint torques, when the backend reports them.
    pub tau: Option<DVector<f64>>,
    /// External wrench at the end effector, when the backend reports it.
    pub external_wrench: Option<Vector6<f64>>,
}

impl RobotState {
    pub fn dof(&self) -> usize {
        self.q.len()
    }
}

/// One device's state enriched with the kinematic quantities computed for
/// exactly this configuration: end-effector pose and twist, geometric
/// Jacobian (6×DoF, linear rows then angular rows) and the gravity
/// compensation vector. Valid only for the tick that produced it; the
/// orchestrator discards it at tick end and never caches it.
#[derive(Debug, Clone)]
pub struct EnrichedState {
    pub state: RobotState,
    pub ee_pose: Pose,
    pub ee_twist: Twist,
    pub jacobian: DMatrix<f64>,
    pub gravity: DVector<f64>,
    pub mass_matrix: Option<DMatrix<f64>>,
    pub coriolis: Option<DVector<f64>>,
}

impl EnrichedState {
    pub fn device(&self) -> &DeviceId {
        &self.state.device
    }

    pub fn dof(&self) -> usize {
        self.state.dof()
    }
}
