//! End-to-end tick-loop behavior: record cadence, per-device failure
//! isolation, mode switches during a run, and logging-failure handling.

use nalgebra::{DMatrix, DVector, Vector3};
use simcore_lib::{
    ActuationMode, Command, ControllerMode, DeviceConfig, DeviceId, DhChain, DhParameter,
    GainsConfig, KinematicsConfig, KinematicsError, LogError, LogRecord, Pose, SceneConfig,
};
use sim_runtime::{
    DhKinematics, JointSpaceBackend, KinematicsProvider, LogSink, MemorySink, MemorySinkHandle,
    RobotSystem,
};
use std::cell::Cell;
use std::time::Duration;

fn arm_device(id: &str) -> DeviceConfig {
    DeviceConfig {
        id: id.to_string(),
        dof: 2,
        actuation: ActuationMode::Torque,
        controller: ControllerMode::JointPosition,
        model: None,
        kinematics: KinematicsConfig {
            dh_parameters: vec![
                DhParameter { a: 0.3, alpha: 0.0, d: 0.0, theta: 0.0 },
                DhParameter { a: 0.25, alpha: 0.0, d: 0.0, theta: 0.0 },
            ],
            link_masses: vec![1.0, 0.8],
            link_com: vec![[-0.15, 0.0, 0.0], [-0.125, 0.0, 0.0]],
            base_offset: [0.0, 0.0, 0.0],
        },
        joint_limits: vec![],
        gains: GainsConfig {
            cartesian_stiffness: [500.0, 500.0, 500.0, 50.0, 50.0, 50.0],
            cartesian_damping: [45.0, 45.0, 45.0, 14.0, 14.0, 14.0],
            joint_kp: vec![100.0, 100.0],
            joint_kd: vec![10.0, 10.0],
            joint_ki: vec![],
        },
        home: None,
    }
}

fn two_arm_scene() -> SceneConfig {
    SceneConfig {
        name: "two_arms".to_string(),
        timestep: 0.001,
        gravity: [0.0, -9.81, 0.0],
        compute_budget_ms: None,
        devices: vec![arm_device("left"), arm_device("right")],
    }
}

fn backend_for(config: &SceneConfig) -> JointSpaceBackend {
    let mut backend = JointSpaceBackend::new();
    for device in &config.devices {
        let chain =
            DhChain::from_config(&device.kinematics, Vector3::from(config.gravity)).unwrap();
        backend.add_device(
            device.device_id(),
            device.actuation,
            device.home_configuration(),
            Some(chain),
        );
    }
    backend
}

fn build_system(
    config: &SceneConfig,
    provider: Box<dyn KinematicsProvider>,
) -> (RobotSystem, MemorySinkHandle) {
    let backend = backend_for(config);
    let mut system = RobotSystem::from_config(config, provider, Box::new(backend)).unwrap();
    let sink = MemorySink::new();
    let handle = sink.handle();
    system.attach_logging(Box::new(sink)).unwrap();
    (system, handle)
}

fn records_for(records: &[LogRecord], device: &DeviceId) -> Vec<LogRecord> {
    records.iter().filter(|r| &r.device == device).cloned().collect()
}

/// Provider that fails every query for one model, leaving the others
/// untouched.
struct FlakyProvider {
    inner: DhKinematics,
    broken_model: String,
}

impl FlakyProvider {
    fn check(&self, model: &str) -> Result<(), KinematicsError> {
        if model == self.broken_model {
            Err(KinematicsError::Unreachable("solver diverged".to_string()))
        } else {
            Ok(())
        }
    }
}

impl KinematicsProvider for FlakyProvider {
    fn forward_kinematics(&self, model: &str, q: &DVector<f64>) -> Result<Pose, KinematicsError> {
        self.check(model)?;
        self.inner.forward_kinematics(model, q)
    }

    fn jacobian(&self, model: &str, q: &DVector<f64>) -> Result<DMatrix<f64>, KinematicsError> {
        self.check(model)?;
        self.inner.jacobian(model, q)
    }

    fn gravity(&self, model: &str, q: &DVector<f64>) -> Result<DVector<f64>, KinematicsError> {
        self.check(model)?;
        self.inner.gravity(model, q)
    }
}

/// Provider that stalls a fixed number of queries for one model, then
/// behaves normally.
struct SlowProvider {
    inner: DhKinematics,
    slow_model: String,
    slow_calls: Cell<u32>,
}

impl SlowProvider {
    fn stall(&self, model: &str) {
        if model == self.slow_model && self.slow_calls.get() > 0 {
            self.slow_calls.set(self.slow_calls.get() - 1);
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

impl KinematicsProvider for SlowProvider {
    fn forward_kinematics(&self, model: &str, q: &DVector<f64>) -> Result<Pose, KinematicsError> {
        self.stall(model);
        self.inner.forward_kinematics(model, q)
    }

    fn jacobian(&self, model: &str, q: &DVector<f64>) -> Result<DMatrix<f64>, KinematicsError> {
        self.inner.jacobian(model, q)
    }

    fn gravity(&self, model: &str, q: &DVector<f64>) -> Result<DVector<f64>, KinematicsError> {
        self.inner.gravity(model, q)
    }
}

/// Sink that fails permanently after a fixed number of records.
struct FailingSink {
    remaining: usize,
}

impl LogSink for FailingSink {
    fn append(&mut self, _record: &LogRecord) -> Result<(), LogError> {
        if self.remaining == 0 {
            return Err(LogError::Sink("disk full".to_string()));
        }
        self.remaining -= 1;
        Ok(())
    }
}

#[test]
fn test_n_ticks_yield_n_records_per_device() {
    let config = two_arm_scene();
    let provider = DhKinematics::from_config(&config).unwrap();
    let (mut system, records) = build_system(&config, Box::new(provider));

    let summary = system.run_for(Some(20)).unwrap();
    assert_eq!(summary.ticks, 20);
    assert_eq!(summary.fallbacks, 0);

    let snapshot = records.snapshot();
    assert_eq!(snapshot.len(), 40);

    for id in ["left", "right"] {
        let device = records_for(&snapshot, &DeviceId::new(id));
        assert_eq!(device.len(), 20);
        for (i, record) in device.iter().enumerate() {
            assert_eq!(record.tick, i as u64);
            assert!(record.ee_pose.is_some());
            assert!(matches!(record.command, Some(Command::Torque(_))));
        }
        // Strictly increasing time per device.
        for pair in device.windows(2) {
            assert!(pair[1].sim_time > pair[0].sim_time);
        }
    }
}

#[test]
fn test_kinematics_failure_downgrades_only_that_device() {
    let config = two_arm_scene();
    let provider = FlakyProvider {
        inner: DhKinematics::from_config(&config).unwrap(),
        broken_model: "left".to_string(),
    };
    let (mut system, records) = build_system(&config, Box::new(provider));

    let summary = system.run_for(Some(10)).unwrap();
    assert_eq!(summary.ticks, 10);
    assert_eq!(summary.fallbacks, 10);

    let snapshot = records.snapshot();
    for record in records_for(&snapshot, &DeviceId::new("left")) {
        assert!(record.fallback);
        // Torque device falls back to zero torque.
        let Some(Command::Torque(tau)) = &record.command else {
            panic!("expected a torque command");
        };
        assert_eq!(tau.iter().filter(|t| **t != 0.0).count(), 0);
    }
    for record in records_for(&snapshot, &DeviceId::new("right")) {
        assert!(!record.fallback);
    }
}

#[test]
fn test_budget_overrun_falls_back_for_that_tick_only() {
    let mut config = two_arm_scene();
    config.compute_budget_ms = Some(2.0);
    let provider = SlowProvider {
        inner: DhKinematics::from_config(&config).unwrap(),
        slow_model: "left".to_string(),
        slow_calls: Cell::new(1),
    };
    let (mut system, records) = build_system(&config, Box::new(provider));

    let summary = system.run_for(Some(5)).unwrap();
    assert_eq!(summary.ticks, 5);
    assert_eq!(summary.fallbacks, 1);

    let snapshot = records.snapshot();
    let left = records_for(&snapshot, &DeviceId::new("left"));
    assert!(left[0].fallback, "over-budget tick not downgraded");
    let Some(Command::Torque(tau)) = &left[0].command else {
        panic!("expected a torque command");
    };
    assert!(tau.iter().all(|t| *t == 0.0));
    // The downgrade is scoped to the over-budget tick.
    for record in &left[1..] {
        assert!(!record.fallback);
    }
    for record in records_for(&snapshot, &DeviceId::new("right")) {
        assert!(!record.fallback);
    }
}

#[test]
fn test_mode_switch_during_run_takes_effect_at_boundary() {
    let config = two_arm_scene();
    let provider = DhKinematics::from_config(&config).unwrap();
    let (mut system, records) = build_system(&config, Box::new(provider));
    let left = DeviceId::new("left");
    let handle = system.handle();

    system.run_for(Some(3)).unwrap();
    handle
        .set_controller_mode(&left, ControllerMode::Impedance)
        .unwrap();
    system.run_for(Some(3)).unwrap();

    let device = records_for(&records.snapshot(), &left);
    let modes: Vec<ControllerMode> = device.iter().map(|r| r.mode).collect();
    assert_eq!(
        modes,
        vec![
            ControllerMode::JointPosition,
            ControllerMode::JointPosition,
            ControllerMode::JointPosition,
            ControllerMode::Impedance,
            ControllerMode::Impedance,
            ControllerMode::Impedance,
        ]
    );
}

#[test]
fn test_rejected_mode_request_leaves_run_unaffected() {
    let mut config = two_arm_scene();
    config.devices[1].actuation = ActuationMode::Position;
    let provider = DhKinematics::from_config(&config).unwrap();
    let (mut system, records) = build_system(&config, Box::new(provider));
    let right = DeviceId::new("right");

    let err = system
        .handle()
        .set_controller_mode(&right, ControllerMode::Impedance)
        .unwrap_err();
    assert!(matches!(
        err,
        simcore_lib::ControlError::InvalidModeTransition { .. }
    ));

    system.run_for(Some(2)).unwrap();
    for record in records_for(&records.snapshot(), &right) {
        assert_eq!(record.mode, ControllerMode::JointPosition);
    }
}

#[test]
fn test_logging_failure_disables_pipeline_but_run_continues() {
    let config = two_arm_scene();
    let provider = DhKinematics::from_config(&config).unwrap();
    let backend = backend_for(&config);
    let mut system =
        RobotSystem::from_config(&config, Box::new(provider), Box::new(backend)).unwrap();
    system
        .attach_logging(Box::new(FailingSink { remaining: 3 }))
        .unwrap();

    let summary = system.run_for(Some(10)).unwrap();
    assert_eq!(summary.ticks, 10);
    assert_eq!(summary.fallbacks, 0);
    assert_eq!(system.tick(), 10);
}
