use crate::impedance::ImpedanceController;
use crate::joint_position::JointPositionController;
use nalgebra::DVector;
use simcore_lib::{
    CartesianGains, Command, ControlError, ControllerMode, DeviceId, DeviceInfo, EnrichedState,
    JointGains, Target, TargetKind,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Per-device controller parameters resolved from the scene configuration.
#[derive(Debug, Clone)]
pub struct DeviceParams {
    pub info: DeviceInfo,
    pub initial_mode: ControllerMode,
    pub cartesian_gains: CartesianGains,
    pub joint_gains: JointGains,
    pub torque_limit: Option<DVector<f64>>,
}

/// The controller active for one device, dispatched on the device's
/// current mode (a tagged variant, not run-time type inspection).
#[derive(Debug)]
enum ActiveController {
    Impedance(ImpedanceController),
    JointPosition(JointPositionController),
}

#[derive(Debug)]
struct DeviceSlot {
    params: DeviceParams,
    mode: ControllerMode,
    pending_mode: Option<ControllerMode>,
    controller: ActiveController,
    target: Option<Target>,
}

impl DeviceSlot {
    /// Mode that will be active at the next tick boundary.
    fn effective_mode(&self) -> ControllerMode {
        self.pending_mode.unwrap_or(self.mode)
    }
}

/// Owns one active controller per device: validates targets, schedules
/// mode switches for the next tick boundary, and invokes the active
/// controller each tick.
///
/// `begin_tick` applies pending switches before any `step` of that tick,
/// constructing a fresh controller so the outgoing controller's internal
/// state (integral terms) is discarded.
#[derive(Debug)]
pub struct ControllerManager {
    devices: BTreeMap<DeviceId, DeviceSlot>,
    timestep: f64,
}

impl ControllerManager {
    pub fn new(timestep: f64) -> Self {
        Self {
            devices: BTreeMap::new(),
            timestep,
        }
    }

    /// Register a device. Fails with `InvalidModeTransition` when the
    /// initial mode is incompatible with the device's actuation capability;
    /// the caller treats this as a fatal configuration error.
    pub fn register(&mut self, params: DeviceParams) -> Result<(), ControlError> {
        if !params.initial_mode.supported_by(params.info.actuation) {
            return Err(ControlError::InvalidModeTransition {
                device: params.info.id.clone(),
                mode: params.initial_mode,
                actuation: params.info.actuation,
            });
        }
        let controller = self.build_controller(&params, params.initial_mode);
        self.devices.insert(
            params.info.id.clone(),
            DeviceSlot {
                mode: params.initial_mode,
                pending_mode: None,
                controller,
                target: None,
                params,
            },
        );
        Ok(())
    }

    fn build_controller(&self, params: &DeviceParams, mode: ControllerMode) -> ActiveController {
        match mode {
            ControllerMode::Impedance => {
                ActiveController::Impedance(ImpedanceController::new(params.cartesian_gains.clone()))
            }
            ControllerMode::JointPosition => {
                ActiveController::JointPosition(JointPositionController::new(
                    params.joint_gains.clone(),
                    params.info.actuation,
                    params.torque_limit.clone(),
                    self.timestep,
                ))
            }
        }
    }

    fn slot(&self, device: &DeviceId) -> Result<&DeviceSlot, ControlError> {
        self.devices
            .get(device)
            .ok_or_else(|| ControlError::UnknownDevice(device.clone()))
    }

    fn slot_mut(&mut self, device: &DeviceId) -> Result<&mut DeviceSlot, ControlError> {
        self.devices
            .get_mut(device)
            .ok_or_else(|| ControlError::UnknownDevice(device.clone()))
    }

    pub fn mode(&self, device: &DeviceId) -> Result<ControllerMode, ControlError> {
        Ok(self.slot(device)?.mode)
    }

    /// Mode that will be active at the next tick boundary (the pending
    /// switch when one is scheduled).
    pub fn effective_mode(&self, device: &DeviceId) -> Result<ControllerMode, ControlError> {
        Ok(self.slot(device)?.effective_mode())
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.devices.keys()
    }

    /// Replace the device's target, last-write-wins. The target's kind must
    /// match the mode that will be active at the next boundary and its
    /// dimensions must match the device DoF; on failure the current target
    /// is left untouched.
    pub fn set_target(&mut self, device: &DeviceId, target: Target) -> Result<(), ControlError> {
        let slot = self.slot_mut(device)?;
        let dof = slot.params.info.dof;

        match (&target, slot.effective_mode()) {
            (Target::Joint { q, gains }, ControllerMode::JointPosition) => {
                if q.len() != dof {
                    return Err(ControlError::TargetShape {
                        device: device.clone(),
                        expected: dof,
                        actual: q.len(),
                    });
                }
                if let Some(gains) = gains {
                    if gains.dof() != dof {
                        return Err(ControlError::TargetShape {
                            device: device.clone(),
                            expected: dof,
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

        slot.target = Some(target);
        Ok(())
    }

    /// Schedule a mode switch, effective at the next tick boundary. The
    /// device's actuation capability is validated synchronously; the active
    /// mode is unchanged on failure.
    pub fn set_mode(&mut self, device: &DeviceId, mode: ControllerMode) -> Result<(), ControlError> {
        let slot = self.slot_mut(device)?;
        if !mode.supported_by(slot.params.info.actuation) {
            return Err(ControlError::InvalidModeTransition {
                device: device.clone(),
                mode,
                actuation: slot.params.info.actuation,
            });
        }
        if mode == slot.effective_mode() {
            slot.pending_mode = None;
            return Ok(());
        }
        slot.pending_mode = Some(mode);
        Ok(())
    }

    /// Apply pending mode switches. Called by the orchestrator at the start
    /// of each tick, before any device steps: the outgoing controller (and
    /// its internal state) is dropped. A target whose kind matches the
    /// incoming mode was validated against it by `set_target` and survives
    /// the switch; a mismatched leftover is cleared so the first step in
    /// the new mode latches a hold target.
    pub fn begin_tick(&mut self) {
        let switches: Vec<(DeviceId, ControllerMode)> = self
            .devices
            .iter()
            .filter_map(|(id, slot)| slot.pending_mode.map(|mode| (id.clone(), mode)))
            .collect();

        for (id, mode) in switches {
            let controller = {
                let slot = &self.devices[&id];
                self.build_controller(&slot.params, mode)
            };
            let slot = self.devices.get_mut(&id).expect("known device");
            debug!("device {}: switching {} -> {}", id, slot.mode, mode);
            slot.mode = mode;
            slot.pending_mode = None;
            slot.controller = controller;
            let target_matches = match (&slot.target, mode) {
                (Some(Target::Cartesian { .. }), ControllerMode::Impedance) => true,
                (Some(Target::Joint { .. }), ControllerMode::JointPosition) => true,
                _ => false,
            };
            if !target_matches {
                slot.target = None;
            }
        }
    }

    /// Invoke the active controller for one device with the current target.
    /// A device without a target holds: the first step latches the measured
    /// pose (impedance) or configuration (joint position) as the target.
    pub fn step(&mut self, device: &DeviceId, enriched: &EnrichedState) -> Result<Command, ControlError> {
        let slot = self.slot_mut(device)?;
        let dof = slot.params.info.dof;

        if slot.target.is_none() {
            let hold = match slot.mode {
                ControllerMode::Impedance => Target::pose(enriched.ee_pose),
                ControllerMode::JointPosition => Target::joints(enriched.state.q.clone()),
            };
            debug!("device {}: no target set, holding current state", device);
            slot.target = Some(hold);
        }
        let target = slot.target.as_ref().expect("target latched above");

        let command = match &mut slot.controller {
            ActiveController::Impedance(c) => c.compute(enriched, target)?,
            ActiveController::JointPosition(c) => c.compute(enriched, target)?,
        };

        if command.dof() != dof {
            return Err(ControlError::CommandShape {
                device: device.clone(),
                expected: dof,
                actual: command.dof(),
            });
        }
        Ok(command)
    }

    /// Current target kind for logging.
    pub fn target_kind(&self, device: &DeviceId) -> Result<Option<TargetKind>, ControlError> {
        Ok(self.slot(device)?.target.as_ref().map(Target::kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, UnitQuaternion, Vector3, Vector6};
    use simcore_lib::{ActuationMode, Pose, RobotState, Twist};

    fn params(id: &str, actuation: ActuationMode, mode: ControllerMode) -> DeviceParams {
        DeviceParams {
            info: DeviceInfo {
                id: DeviceId::new(id),
                dof: 2,
                actuation,
                model: id.to_string(),
            },
            initial_mode: mode,
            cartesian_gains: CartesianGains::from_diagonals(
                Vector6::repeat(100.0),
                Vector6::repeat(10.0),
            )
            .unwrap(),
            joint_gains: JointGains::new(
                DVector::repeat(2, 50.0),
                DVector::repeat(2, 5.0),
                DVector::repeat(2, 1.0),
            )
            .unwrap(),
            torque_limit: None,
        }
    }

    fn enriched(id: &str, q: Vec<f64>) -> EnrichedState {
        let dof = q.len();
        EnrichedState {
            state: RobotState {
                device: DeviceId::new(id),
                tick: 0,
                sim_time: 0.0,
                q: DVector::from_vec(q),
                qd: DVector::zeros(dof),
                ee_pose: None,
                ee_twist: None,
                tau: None,
                external_wrench: None,
            },
            ee_pose: Pose::identity(),
            ee_twist: Twist::zero(),
            jacobian: DMatrix::identity(6, dof),
            gravity: DVector::zeros(dof),
            mass_matrix: None,
            coriolis: None,
        }
    }

    fn manager_with(
        id: &str,
        actuation: ActuationMode,
        mode: ControllerMode,
    ) -> (ControllerManager, DeviceId) {
        let mut manager = ControllerManager::new(0.001);
        manager.register(params(id, actuation, mode)).unwrap();
        (manager, DeviceId::new(id))
    }

    #[test]
    fn test_unknown_device_rejected() {
        let (mut manager, _) =
            manager_with("arm", ActuationMode::Torque, ControllerMode::JointPosition);
        let ghost = DeviceId::new("ghost");
        assert!(matches!(
            manager.set_target(&ghost, Target::joints(DVector::zeros(2))),
            Err(ControlError::UnknownDevice(_))
        ));
        assert!(matches!(
            manager.set_mode(&ghost, ControllerMode::Impedance),
            Err(ControlError::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_impedance_on_position_device_rejected() {
        let (mut manager, id) =
            manager_with("gripper", ActuationMode::Position, ControllerMode::JointPosition);
        let err = manager.set_mode(&id, ControllerMode::Impedance).unwrap_err();
        assert!(matches!(err, ControlError::InvalidModeTransition { .. }));
        assert_eq!(manager.mode(&id).unwrap(), ControllerMode::JointPosition);
    }

    #[test]
    fn test_register_with_unsupported_mode_fails() {
        let mut manager = ControllerManager::new(0.001);
        let err = manager
            .register(params("gripper", ActuationMode::Position, ControllerMode::Impedance))
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidModeTransition { .. }));
    }

    #[test]
    fn test_bad_target_leaves_current_target_unchanged() {
        let (mut manager, id) =
            manager_with("arm", ActuationMode::Torque, ControllerMode::JointPosition);
        manager
            .set_target(&id, Target::joints(DVector::from_vec(vec![0.1, 0.2])))
            .unwrap();

        let err = manager
            .set_target(&id, Target::joints(DVector::zeros(3)))
            .unwrap_err();
        assert!(matches!(err, ControlError::TargetShape { expected: 2, actual: 3, .. }));

        // Old target still drives the device.
        let state = enriched("arm", vec![0.0, 0.0]);
        let Command::Torque(tau) = manager.step(&id, &state).unwrap() else {
            panic!("expected torque");
        };
        assert_relative_eq!(tau[0], 50.0 * 0.1 + 1.0 * 0.1 * 0.001, epsilon = 1e-9);
    }

    #[test]
    fn test_target_kind_must_match_mode() {
        let (mut manager, id) =
            manager_with("arm", ActuationMode::Torque, ControllerMode::JointPosition);
        let err = manager
            .set_target(&id, Target::pose(Pose::identity()))
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::TargetKind { kind: TargetKind::Cartesian, .. }
        ));
    }

    #[test]
    fn test_mode_switch_applies_at_tick_boundary() {
        let (mut manager, id) =
            manager_with("arm", ActuationMode::Torque, ControllerMode::JointPosition);

        manager.set_mode(&id, ControllerMode::Impedance).unwrap();
        // Not yet applied.
        assert_eq!(manager.mode(&id).unwrap(), ControllerMode::JointPosition);
        assert_eq!(manager.effective_mode(&id).unwrap(), ControllerMode::Impedance);

        manager.begin_tick();
        assert_eq!(manager.mode(&id).unwrap(), ControllerMode::Impedance);
    }

    #[test]
    fn test_target_validates_against_pending_mode() {
        let (mut manager, id) =
            manager_with("arm", ActuationMode::Torque, ControllerMode::JointPosition);
        manager.set_mode(&id, ControllerMode::Impedance).unwrap();

        // Joint target no longer matches the mode taking effect next tick.
        assert!(manager
            .set_target(&id, Target::joints(DVector::zeros(2)))
            .is_err());
        assert!(manager.set_target(&id, Target::pose(Pose::identity())).is_ok());
    }

    #[test]
    fn test_target_for_pending_mode_survives_switch() {
        let (mut manager, id) =
            manager_with("arm", ActuationMode::Torque, ControllerMode::JointPosition);

        // Switch and matching target set together, before the boundary.
        manager.set_mode(&id, ControllerMode::Impedance).unwrap();
        let goal = Pose::new(Vector3::new(0.1, 0.0, 0.0), UnitQuaternion::identity());
        manager.set_target(&id, Target::pose(goal)).unwrap();

        manager.begin_tick();
        assert_eq!(manager.target_kind(&id).unwrap(), Some(TargetKind::Cartesian));

        // The first step tracks the queued pose instead of latching a hold
        // at the measured pose (which would command zero torque here).
        let state = enriched("arm", vec![0.0, 0.0]);
        let Command::Torque(tau) = manager.step(&id, &state).unwrap() else {
            panic!("expected torque");
        };
        assert_relative_eq!(tau[0], 100.0 * 0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_mismatched_target_cleared_at_switch() {
        let (mut manager, id) =
            manager_with("arm", ActuationMode::Torque, ControllerMode::JointPosition);
        manager
            .set_target(&id, Target::joints(DVector::from_vec(vec![1.0, 1.0])))
            .unwrap();

        manager.set_mode(&id, ControllerMode::Impedance).unwrap();
        manager.begin_tick();

        // The joint target is stale for impedance; the first step holds.
        let state = enriched("arm", vec![0.0, 0.0]);
        let Command::Torque(tau) = manager.step(&id, &state).unwrap() else {
            panic!("expected torque");
        };
        assert_relative_eq!(tau.norm(), 0.0, epsilon = 1e-9);
        assert_eq!(manager.target_kind(&id).unwrap(), Some(TargetKind::Cartesian));
    }

    #[test]
    fn test_mode_switch_discards_integral_state() {
        let (mut manager, id) =
            manager_with("arm", ActuationMode::Torque, ControllerMode::JointPosition);
        let state = enriched("arm", vec![0.0, 0.0]);

        // Accumulate integral torque against a persistent error.
        manager
            .set_target(&id, Target::joints(DVector::from_vec(vec![1.0, 1.0])))
            .unwrap();
        for _ in 0..100 {
            manager.step(&id, &state).unwrap();
        }
        let Command::Torque(wound_up) = manager.step(&id, &state).unwrap() else {
            panic!()
        };

        // Round-trip through impedance and back.
        manager.set_mode(&id, ControllerMode::Impedance).unwrap();
        manager.begin_tick();
        manager.step(&id, &state).unwrap();
        manager.set_mode(&id, ControllerMode::JointPosition).unwrap();
        manager.begin_tick();

        manager
            .set_target(&id, Target::joints(DVector::from_vec(vec![1.0, 1.0])))
            .unwrap();
        let Command::Torque(fresh) = manager.step(&id, &state).unwrap() else {
            panic!()
        };

        // Stale integral torque must not survive the round trip.
        assert!(fresh[0] < wound_up[0] - 1e-6);
        assert_relative_eq!(fresh[0], 50.0 + 1.0 * 1.0 * 0.001, epsilon = 1e-9);
    }

    #[test]
    fn test_step_without_target_holds_current_configuration() {
        let (mut manager, id) =
            manager_with("arm", ActuationMode::Torque, ControllerMode::JointPosition);
        let state = enriched("arm", vec![0.3, -0.4]);

        let Command::Torque(tau) = manager.step(&id, &state).unwrap() else {
            panic!()
        };
        // Holding the measured configuration: zero error, zero torque.
        assert_relative_eq!(tau.norm(), 0.0, epsilon = 1e-9);
        assert_eq!(manager.target_kind(&id).unwrap(), Some(TargetKind::Joint));
    }
}
