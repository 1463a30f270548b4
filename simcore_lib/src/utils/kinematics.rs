use crate::types::config::KinematicsConfig;
use crate::types::error::KinematicsError;
use crate::types::pose::Pose;
use nalgebra::{DMatrix, DVector, Matrix4, Vector3};

/// Serial-chain kinematics from Denavit-Hartenberg parameters: forward
/// kinematics, geometric Jacobian and gravity compensation vector.
///
/// All joints are revolute about the local z axis, with DH rows
/// `(a, alpha, d, theta_offset)` and an optional base offset. Link masses
/// and centers of mass (in each link's frame) feed the gravity vector.
#[derive(Debug, Clone)]
pub struct DhChain {
    dh_params: Vec<DhRow>,
    link_masses: Vec<f64>,
    link_com: Vec<Vector3<f64>>,
    base_offset: Vector3<f64>,
    gravity: Vector3<f64>,
}

#[derive(Debug, Clone, Copy)]
struct DhRow {
    a: f64,
    alpha: f64,
    d: f64,
    theta: f64,
}

impl DhChain {
    pub fn from_config(config: &KinematicsConfig, gravity: Vector3<f64>) -> Result<Self, KinematicsError> {
        let dof = config.dh_parameters.len();
        if config.link_masses.len() != dof || config.link_com.len() != dof {
            return Err(KinematicsError::DofMismatch {
                expected: dof,
                actual: config.link_masses.len().min(config.link_com.len()),
            });
        }
        Ok(Self {
            dh_params: config
                .dh_parameters
                .iter()
                .map(|p| DhRow {
                    a: p.a,
                    alpha: p.alpha,
                    d: p.d,
                    theta: p.theta,
                })
                .collect(),
            link_masses: config.link_masses.clone(),
            link_com: config.link_com.iter().map(|c| Vector3::from(*c)).collect(),
            base_offset: Vector3::from(config.base_offset),
            gravity,
        })
    }

    pub fn dof(&self) -> usize {
        self.dh_params.len()
    }

    /// Cumulative transforms base → frame i, length DoF+1. `transforms[i]`
    /// carries joint i's axis (z column) and origin; the last entry is the
    /// end-effector frame.
    fn link_transforms(&self, q: &DVector<f64>) -> Result<Vec<Matrix4<f64>>, KinematicsError> {
        if q.len() != self.dof() {
            return Err(KinematicsError::DofMismatch {
                expected: self.dof(),
                actual: q.len(),
            });
        }

        let mut transform = Matrix4::identity();
        transform[(0, 3)] = self.base_offset.x;
        transform[(1, 3)] = self.base_offset.y;
        transform[(2, 3)] = self.base_offset.z;

        let mut transforms = Vec::with_capacity(self.dof() + 1);
        transforms.push(transform);

        for (i, row) in self.dh_params.iter().enumerate() {
            let theta = q[i] + row.theta;
            transform *= dh_transformation(row.a, row.alpha, row.d, theta);
            transforms.push(transform);
        }
        Ok(transforms)
    }

    pub fn forward_kinematics(&self, q: &DVector<f64>) -> Result<Pose, KinematicsError> {
        let transforms = self.link_transforms(q)?;
        let pose = Pose::from_homogeneous(transforms.last().expect("non-empty chain"));
        if !pose.position.iter().all(|v| v.is_finite()) {
            return Err(KinematicsError::NonFinite { what: "pose" });
        }
        Ok(pose)
    }

    /// Geometric Jacobian, 6×DoF: rows 0..3 linear, rows 3..6 angular.
    pub fn jacobian(&self, q: &DVector<f64>) -> Result<DMatrix<f64>, KinematicsError> {
        let transforms = self.link_transforms(q)?;
        let ee_position = translation(transforms.last().expect("non-empty chain"));

        let mut jacobian = DMatrix::zeros(6, self.dof());
        for i in 0..self.dof() {
            let axis = z_axis(&transforms[i]);
            let origin = translation(&transforms[i]);
            let linear = axis.cross(&(ee_position - origin));

            jacobian[(0, i)] = linear.x;
            jacobian[(1, i)] = linear.y;
            jacobian[(2, i)] = linear.z;
            jacobian[(3, i)] = axis.x;
            jacobian[(4, i)] = axis.y;
            jacobian[(5, i)] = axis.z;
        }
        if !jacobian.iter().all(|v| v.is_finite()) {
            return Err(KinematicsError::NonFinite { what: "jacobian" });
        }
        Ok(jacobian)
    }

    /// World positions of each link's center of mass.
    pub fn com_positions(&self, q: &DVector<f64>) -> Result<Vec<Vector3<f64>>, KinematicsError> {
        let transforms = self.link_transforms(q)?;
        Ok(self
            .link_com
            .iter()
            .enumerate()
            .map(|(i, com)| {
                let t = &transforms[i + 1];
                let rot = t.fixed_view::<3, 3>(0, 0);
                translation(t) + rot * com
            })
            .collect())
    }

    /// Gravity compensation vector: the joint torques that exactly cancel
    /// gravitational load at configuration `q` (the gradient of the chain's
    /// potential energy).
    pub fn gravity(&self, q: &DVector<f64>) -> Result<DVector<f64>, KinematicsError> {
        let transforms = self.link_transforms(q)?;
        let mut tau: DVector<f64> = DVector::zeros(self.dof());

        for (link, com) in self.com_positions(q)?.iter().enumerate() {
            let weight = self.link_masses[link] * self.gravity;
            // Joints 0..=link move this link's COM.
            for i in 0..=link {
                let axis = z_axis(&transforms[i]);
                let origin = translation(&transforms[i]);
                let column = axis.cross(&(com - origin));
                tau[i] -= weight.dot(&column);
            }
        }
        if !tau.iter().all(|v| v.is_finite()) {
            return Err(KinematicsError::NonFinite { what: "gravity vector" });
        }
        Ok(tau)
    }

    /// Potential energy of the chain at `q`, relative to the world origin.
    pub fn potential_energy(&self, q: &DVector<f64>) -> Result<f64, KinematicsError> {
        Ok(self
            .com_positions(q)?
            .iter()
            .zip(&self.link_masses)
            .map(|(com, mass)| -mass * self.gravity.dot(com))
            .sum())
    }
}

fn dh_transformation(a: f64, alpha: f64, d: f64, theta: f64) -> Matrix4<f64> {
    let cos_theta = theta.cos();
    let sin_theta = theta.sin();
    let cos_alpha = alpha.cos();
    let sin_alpha = alpha.sin();

    Matrix4::new(
        cos_theta, -sin_theta * cos_alpha,  sin_theta * sin_alpha, a * cos_theta,
        sin_theta,  cos_theta * cos_alpha, -cos_theta * sin_alpha, a * sin_theta,
        0.0,        sin_alpha,              cos_alpha,             d,
        0.0,        0.0,                    0.0,                   1.0,
    )
}

fn translation(t: &Matrix4<f64>) -> Vector3<f64> {
    Vector3::new(t[(0, 3)], t[(1, 3)], t[(2, 3)])
}

fn z_axis(t: &Matrix4<f64>) -> Vector3<f64> {
    Vector3::new(t[(0, 2)], t[(1, 2)], t[(2, 2)])
}
