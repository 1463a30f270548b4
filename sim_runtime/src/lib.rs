//! Tick-loop orchestration for simulated robot scenes.
//!
//! Owns the boundaries to the external engines — the simulation backend
//! (physics stepping) and the kinematics provider (FK/Jacobian/dynamics
//! terms) — plus the time-synchronized logging pipeline and the
//! [`RobotSystem`] orchestrator that drives everything once per tick.

pub mod backend;
pub mod kinematics;
pub mod logging;
pub mod system;

pub use backend::{JointSpaceBackend, SimulationBackend};
pub use kinematics::{enrich, DhKinematics, KinematicsProvider};
pub use logging::{JsonlSink, LogPipeline, LogSink, MemorySink, MemorySinkHandle};
pub use system::{RobotSystem, RunSummary, SystemHandle, SystemState};
