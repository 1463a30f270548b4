use nalgebra::DVector;
use simcore_lib::{
    ActuationMode, Command, ControlError, ControllerMode, EnrichedState, JointGains, Target,
    TargetKind,
};

/// Joint-space position controller.
///
/// On torque-actuated devices this is a per-joint PID with gravity
/// feed-forward:
///
/// ```text
/// τ = Kp·(q_des − q) + Kd·(−q̇) + Ki·∫e + g(q)
/// ```
///
/// On position-actuated devices it forwards the setpoint unchanged and the
/// backend's own servo tracks it.
///
/// The integral term and anti-windup follow the usual discrete PID shape:
/// the accumulator backs off when the commanded torque saturates against
/// the per-joint limit. This is the only controller-internal state and it
/// is discarded when the manager swaps controllers on a mode switch.
#[derive(Debug, Clone)]
pub struct JointPositionController {
    gains: JointGains,
    actuation: ActuationMode,
    torque_limit: Option<DVector<f64>>,
    dt: f64,
    integral: DVector<f64>,
}

impl JointPositionController {
    pub fn new(
        gains: JointGains,
        actuation: ActuationMode,
        torque_limit: Option<DVector<f64>>,
        dt: f64,
    ) -> Self {
        let dof = gains.dof();
        Self {
            gains,
            actuation,
            torque_limit,
            dt,
            integral: DVector::zeros(dof),
        }
    }

    /// Clear the accumulated integral term.
    pub fn reset(&mut self) {
        self.integral.fill(0.0);
    }

    #[cfg(test)]
    pub(crate) fn integral(&self) -> &DVector<f64> {
        &self.integral
    }

    pub fn compute(&mut self, enriched: &EnrichedState, target: &Target) -> Result<Command, ControlError> {
        let Target::Joint { q: q_des, gains } = target else {
            return Err(ControlError::TargetKind {
                device: enriched.device().clone(),
                mode: ControllerMode::JointPosition,
                kind: target.kind(),
            });
        };

        let dof = enriched.dof();
        if q_des.len() != dof {
            return Err(ControlError::TargetShape {
                device: enriched.device().clone(),
                expected: dof,
                actual: q_des.len(),
            });
        }

        if self.actuation == ActuationMode::Position {
            return Ok(Command::Position {
                q: q_des.clone(),
                qd: None,
            });
        }

        let gains = gains.as_ref().unwrap_or(&self.gains);
        if gains.dof() != dof {
            return Err(ControlError::TargetShape {
                device: enriched.device().clone(),
                expected: dof,
                actual: gains.dof(),
            });
        }
        let error = q_des - &enriched.state.q;

        self.integral.axpy(self.dt, &error, 1.0);

        let mut tau = DVector::zeros(dof);
        for i in 0..dof {
            tau[i] = gains.kp()[i] * error[i] - gains.kd()[i] * enriched.state.qd[i]
                + gains.ki()[i] * self.integral[i]
                + enriched.gravity[i];
        }

        if let Some(limit) = &self.torque_limit {
            for i in 0..dof {
                let bounded = tau[i].clamp(-limit[i], limit[i]);
                if bounded != tau[i] {
                    // Saturated: back the integral off so it does not wind up.
                    self.integral[i] -= error[i] * self.dt;
                    tau[i] = bounded;
                }
            }
        }

        let command = Command::Torque(tau);
        if !command.is_finite() {
            return Err(ControlError::Kinematics(
                simcore_lib::KinematicsError::NonFinite { what: "joint torque" },
            ));
        }
        Ok(command)
    }
}
