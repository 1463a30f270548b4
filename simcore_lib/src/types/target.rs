use crate::types::error::GainError;
use crate::types::pose::{Pose, Twist};
use nalgebra::{DVector, Matrix6, Vector6};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cartesian stiffness/damping as 6x6 matrices (position block first,
/// orientation block second; typically block-diagonal). Validated positive
/// semi-definite on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartesianGains {
    stiffness: Matrix6<f64>,
    damping: Matrix6<f64>,
}

impl CartesianGains {
    pub fn new(stiffness: Matrix6<f64>, damping: Matrix6<f64>) -> Result<Self, GainError> {
        validate_psd(&stiffness, "stiffness")?;
        validate_psd(&damping, "damping")?;
        Ok(Self { stiffness, damping })
    }

    /// Diagonal gains: `[x, y, z, rx, ry, rz]` stiffness and damping.
    pub fn from_diagonals(stiffness: Vector6<f64>, damping: Vector6<f64>) -> Result<Self, GainError> {
        Self::new(
            Matrix6::from_diagonal(&stiffness),
            Matrix6::from_diagonal(&damping),
        )
    }

    pub fn stiffness(&self) -> &Matrix6<f64> {
        &self.stiffness
    }

    pub fn damping(&self) -> &Matrix6<f64> {
        &self.damping
    }
}

fn validate_psd(matrix: &Matrix6<f64>, block: &'static str) -> Result<(), GainError> {
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(GainError::NonFinite { block });
    }
    if (matrix - matrix.transpose()).amax() > 1e-9 {
        return Err(GainError::NotPositiveSemiDefinite { block });
    }
    let eigenvalues = matrix.symmetric_eigenvalues();
    if eigenvalues.iter().any(|&l| l < -1e-9) {
        return Err(GainError::NotPositiveSemiDefinite { block });
    }
    Ok(())
}

/// Per-joint PID gains with gravity feed-forward. All entries must be
/// finite and non-negative; dimension equals the device DoF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointGains {
    kp: DVector<f64>,
    kd: DVector<f64>,
    ki: DVector<f64>,
}

impl JointGains {
    pub fn new(kp: DVector<f64>, kd: DVector<f64>, ki: DVector<f64>) -> Result<Self, GainError> {
        let dof = kp.len();
        for (name, v) in [("kd", &kd), ("ki", &ki)] {
            if v.len() != dof {
                return Err(GainError::Dimension {
                    block: name,
                    expected: dof,
                    actual: v.len(),
                });
            }
        }
        for (name, v) in [("kp", &kp), ("kd", &kd), ("ki", &ki)] {
            if v.iter().any(|x| !x.is_finite()) {
                return Err(GainError::NonFinite { block: name });
            }
            if v.iter().any(|&x| x < 0.0) {
                return Err(GainError::NotPositiveSemiDefinite { block: name });
            }
        }
        Ok(Self { kp, kd, ki })
    }

    /// PD gains with the integral term disabled.
    pub fn pd(kp: DVector<f64>, kd: DVector<f64>) -> Result<Self, GainError> {
        let dof = kp.len();
        Self::new(kp, kd, DVector::zeros(dof))
    }

    pub fn dof(&self) -> usize {
        self.kp.len()
    }

    pub fn kp(&self) -> &DVector<f64> {
        &self.kp
    }

    pub fn kd(&self) -> &DVector<f64> {
        &self.kd
    }

    pub fn ki(&self) -> &DVector<f64> {
        &self.ki
    }
}

/// Which kind of target a `Target` carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Cartesian,
    Joint,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Cartesian => f.write_str("cartesian"),
            TargetKind::Joint => f.write_str("joint"),
        }
    }
}

/// Control target for one device. Set between ticks by the caller, read
/// (never mutated) by the active controller, and replaced last-write-wins.
/// Optional gains override the device defaults for as long as the target
/// is in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Target {
    /// Cartesian pose target with a desired end-effector twist.
    Cartesian {
        pose: Pose,
        twist: Twist,
        gains: Option<CartesianGains>,
    },
    /// Joint configuration target.
    Joint {
        q: DVector<f64>,
        gains: Option<JointGains>,
    },
}

impl Target {
    /// Pose target with zero desired velocity and default gains.
    pub fn pose(pose: Pose) -> Self {
        Target::Cartesian {
            pose,
            twist: Twist::zero(),
            gains: None,
        }
    }

    /// Joint configuration target with default gains.
    pub fn joints(q: DVector<f64>) -> Self {
        Target::Joint { q, gains: None }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Cartesian { .. } => TargetKind::Cartesian,
            Target::Joint { .. } => TargetKind::Joint,
        }
    }
}
