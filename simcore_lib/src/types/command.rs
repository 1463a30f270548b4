use crate::types::device::ActuationMode;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Controller mode active for a device. Exactly one mode is active per
/// device at any time; switches take effect at the next tick boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerMode {
    /// Cartesian impedance control toward a pose target (torque output).
    Impedance,
    /// Per-joint position control toward a joint configuration target.
    JointPosition,
}

impl ControllerMode {
    /// Whether a device with the given actuation capability can run this mode.
    /// Impedance control needs torque actuation; joint-position control works
    /// on both torque- and position-actuated devices.
    pub fn supported_by(&self, actuation: ActuationMode) -> bool {
        match self {
            ControllerMode::Impedance => actuation == ActuationMode::Torque,
            ControllerMode::JointPosition => true,
        }
    }
}

impl fmt::Display for ControllerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerMode::Impedance => f.write_str("impedance"),
            ControllerMode::JointPosition => f.write_str("joint_position"),
        }
    }
}

/// Controller output for one device for one tick, tagged by the actuation
/// mode the simulation backend expects. Dimensionality always matches the
/// device DoF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Joint torques (N·m).
    Torque(DVector<f64>),
    /// Joint position setpoints, with optional feed-forward velocities.
    Position {
        q: DVector<f64>,
        qd: Option<DVector<f64>>,
    },
}

impl Command {
    pub fn zero_torque(dof: usize) -> Self {
        Command::Torque(DVector::zeros(dof))
    }

    /// Hold the given configuration (position-actuated fallback).
    pub fn hold_position(q: DVector<f64>) -> Self {
        Command::Position { q, qd: None }
    }

    pub fn dof(&self) -> usize {
        match self {
            Command::Torque(tau) => tau.len(),
            Command::Position { q, .. } => q.len(),
        }
    }

    /// Actuation mode this command targets.
    pub fn actuation(&self) -> ActuationMode {
        match self {
            Command::Torque(_) => ActuationMode::Torque,
            Command::Position { .. } => ActuationMode::Position,
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Command::Torque(tau) => tau.iter().all(|v| v.is_finite()),
            Command::Position { q, qd } => {
                q.iter().all(|v| v.is_finite())
                    && qd.as_ref().map_or(true, |v| v.iter().all(|x| x.is_finite()))
            }
        }
    }
}
