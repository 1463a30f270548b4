//! Controllers and per-device dispatch.
//!
//! Each controller is a pure mapping from (enriched state, target, gains)
//! to a command; the [`ControllerManager`] owns one active controller per
//! device, validates caller requests, and applies mode switches atomically
//! at tick boundaries.

pub mod impedance;
pub mod joint_position;
pub mod manager;

pub use impedance::ImpedanceController;
pub use joint_position::JointPositionController;
pub use manager::{ControllerManager, DeviceParams};
