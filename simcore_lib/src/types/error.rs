use crate::types::command::ControllerMode;
use crate::types::device::{ActuationMode, DeviceId};
use crate::types::target::TargetKind;
use thiserror::Error;

/// Fatal configuration problems: bad device/mode registration or an invalid
/// scene file. Raised at startup, never during the tick loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid scene configuration: {0}")]
    Validation(String),

    #[error("device {device}: {source}")]
    Gains {
        device: DeviceId,
        #[source]
        source: GainError,
    },
}

/// Gain validation failures. Gains are rejected at assignment time, never
/// silently clamped.
#[derive(Debug, Error)]
pub enum GainError {
    #[error("{block} gain matrix is not positive semi-definite")]
    NotPositiveSemiDefinite { block: &'static str },

    #[error("{block} gains have dimension {actual}, expected {expected}")]
    Dimension {
        block: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{block} gains contain non-finite entries")]
    NonFinite { block: &'static str },
}

/// Failures reported by the kinematics provider. Recoverable per tick: the
/// affected device falls back to a safe command for that tick.
#[derive(Debug, Error)]
pub enum KinematicsError {
    #[error("unknown kinematic model '{0}'")]
    UnknownModel(String),

    #[error("joint vector has length {actual}, model expects {expected}")]
    DofMismatch { expected: usize, actual: usize },

    #[error("kinematics produced non-finite {what}")]
    NonFinite { what: &'static str },

    #[error("configuration unreachable: {0}")]
    Unreachable(String),
}

/// Errors from the controller layer and its caller-facing setters.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown device '{0}'")]
    UnknownDevice(DeviceId),

    #[error("device {device}: target has dimension {actual}, device has {expected} DoF")]
    TargetShape {
        device: DeviceId,
        expected: usize,
        actual: usize,
    },

    #[error("device {device}: {kind} target is not accepted in {mode} mode")]
    TargetKind {
        device: DeviceId,
        mode: ControllerMode,
        kind: TargetKind,
    },

    #[error("device {device}: mode {mode} requires torque actuation, device is {actuation}-actuated")]
    InvalidModeTransition {
        device: DeviceId,
        mode: ControllerMode,
        actuation: ActuationMode,
    },

    #[error("device {device}: controller produced a command of dimension {actual}, expected {expected}")]
    CommandShape {
        device: DeviceId,
        expected: usize,
        actual: usize,
    },

    #[error("device {device}: {source}")]
    Gains {
        device: DeviceId,
        #[source]
        source: GainError,
    },

    #[error(transparent)]
    Kinematics(#[from] KinematicsError),
}

/// Logging-contract violations. Fatal for the logging pipeline only;
/// control keeps running when one is raised.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("record for device '{0}' which is not part of the run schema")]
    UnknownDevice(DeviceId),

    #[error("record time {got} does not advance past {last}")]
    NonMonotonicTime { last: f64, got: f64 },

    #[error("duplicate record for device '{device}' at tick {tick}")]
    DuplicateRecord { device: DeviceId, tick: u64 },

    #[error("record does not conform to the declared schema: {0}")]
    SchemaViolation(String),

    #[error("log sink failed: {0}")]
    Sink(String),
}

/// Failures at the simulation backend boundary. `read_state`/`advance`
/// failures are unrecoverable and halt the tick loop.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("unknown device '{0}'")]
    UnknownDevice(DeviceId),

    #[error("device {device}: {got} command sent to a {expected}-actuated device")]
    ActuationMismatch {
        device: DeviceId,
        expected: ActuationMode,
        got: ActuationMode,
    },

    #[error("device {device}: command has dimension {actual}, device has {expected} DoF")]
    CommandShape {
        device: DeviceId,
        expected: usize,
        actual: usize,
    },

    #[error("simulation backend failure: {0}")]
    Backend(String),
}
