use nalgebra::{DVector, Vector6};
use simcore_lib::{
    pose_error, CartesianGains, Command, ControlError, ControllerMode, EnrichedState, Target,
    TargetKind,
};

/// Cartesian impedance controller.
///
/// Renders the end effector as a spring-damper toward the target pose:
///
/// ```text
/// F = Kp·(x_des ⊖ x) + Kd·(ẋ_des − ẋ)
/// τ = Jᵀ·F + g(q)
/// ```
///
/// The orientation part of `⊖` is the SO(3) log-map error, not a naive
/// quaternion difference. The wrench is mapped to joint torques through the
/// Jacobian transpose — never a pseudo-inverse — so a near-singular
/// configuration degrades tracking but cannot blow up the command.
#[derive(Debug, Clone)]
pub struct ImpedanceController {
    gains: CartesianGains,
}

impl ImpedanceController {
    pub fn new(gains: CartesianGains) -> Self {
        Self { gains }
    }

    pub fn compute(&mut self, enriched: &EnrichedState, target: &Target) -> Result<Command, ControlError> {
        let Target::Cartesian { pose, twist, gains } = target else {
            return Err(ControlError::TargetKind {
                device: enriched.device().clone(),
                mode: ControllerMode::Impedance,
                kind: target.kind(),
            });
        };
        let gains = gains.as_ref().unwrap_or(&self.gains);

        let error = pose_error(&enriched.ee_pose, pose);
        let velocity_error: Vector6<f64> = twist.to_vector() - enriched.ee_twist.to_vector();

        let wrench = gains.stiffness() * error + gains.damping() * velocity_error;
        let wrench = DVector::from_column_slice(wrench.as_slice());

        let tau = enriched.jacobian.transpose() * wrench + &enriched.gravity;

        let command = Command::Torque(tau);
        if !command.is_finite() {
            return Err(ControlError::Kinematics(
                simcore_lib::KinematicsError::NonFinite { what: "impedance torque" },
            ));
        }
        Ok(command)
    }
}
