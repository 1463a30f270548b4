use crate::types::command::{Command, ControllerMode};
use crate::types::device::DeviceId;
use crate::types::pose::Pose;
use crate::types::target::TargetKind;
use chrono::{DateTime, Utc};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Schema of a logging run, declared once when logging starts. Every
/// subsequent record must conform: same device set, strictly advancing
/// time, one record per device per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSchema {
    pub run_id: Uuid,
    pub scene: String,
    pub started_at: DateTime<Utc>,
    pub timestep: f64,
    pub devices: BTreeSet<DeviceId>,
}

impl LogSchema {
    pub fn new(scene: impl Into<String>, timestep: f64, devices: BTreeSet<DeviceId>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scene: scene.into(),
            started_at: Utc::now(),
            timestep,
            devices,
        }
    }
}

/// One row per tick per device: the tick's inputs (state, target) and
/// outputs (command, mode) plus a flag marking per-device fallback.
/// Records form an append-only sequence with monotonically increasing time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub tick: u64,
    pub sim_time: f64,
    pub device: DeviceId,
    pub mode: ControllerMode,
    pub q: DVector<f64>,
    pub qd: DVector<f64>,
    pub ee_pose: Option<Pose>,
    pub target: Option<TargetKind>,
    pub command: Option<Command>,
    /// True when this device's command for the tick is the safe fallback
    /// (kinematics/controller failure or compute-budget overrun).
    pub fallback: bool,
}
