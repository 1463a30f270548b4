use nalgebra::{DMatrix, DVector, Vector3};
use simcore_lib::{
    DhChain, EnrichedState, KinematicsError, Pose, RobotState, SceneConfig, Twist,
};
use std::collections::BTreeMap;

/// Boundary to an external kinematics provider.
///
/// Purely a translation layer: implementations perform no physics of their
/// own and report `KinematicsError` when the underlying provider cannot
/// evaluate the requested configuration (DoF disagreement, unreachable or
/// non-finite result). Outputs are tied to the joint configuration they
/// were computed from and must never be cached across ticks.
pub trait KinematicsProvider: Send {
    fn forward_kinematics(&self, model: &str, q: &DVector<f64>) -> Result<Pose, KinematicsError>;

    fn jacobian(&self, model: &str, q: &DVector<f64>) -> Result<DMatrix<f64>, KinematicsError>;

    fn gravity(&self, model: &str, q: &DVector<f64>) -> Result<DVector<f64>, KinematicsError>;

    /// Joint-space mass matrix, when the provider computes one.
    fn mass_matrix(
        &self,
        _model: &str,
        _q: &DVector<f64>,
    ) -> Result<Option<DMatrix<f64>>, KinematicsError> {
        Ok(None)
    }

    /// Coriolis/centrifugal torques, when the provider computes them.
    fn coriolis(
        &self,
        _model: &str,
        _q: &DVector<f64>,
        _qd: &DVector<f64>,
    ) -> Result<Option<DVector<f64>>, KinematicsError> {
        Ok(None)
    }
}

/// Built-in provider backed by the DH serial-chain numerics in
/// `simcore_lib`, one chain per kinematic model id.
pub struct DhKinematics {
    chains: BTreeMap<String, DhChain>,
}

impl DhKinematics {
    pub fn new() -> Self {
        Self {
            chains: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, model: impl Into<String>, chain: DhChain) {
        self.chains.insert(model.into(), chain);
    }

    /// Build one chain per device model from the scene configuration.
    pub fn from_config(config: &SceneConfig) -> Result<Self, KinematicsError> {
        let gravity = Vector3::from(config.gravity);
        let mut provider = Self::new();
        for device in &config.devices {
            let chain = DhChain::from_config(&device.kinematics, gravity)?;
            provider.insert(device.model_id(), chain);
        }
        Ok(provider)
    }

    pub fn chain(&self, model: &str) -> Result<&DhChain, KinematicsError> {
        self.chains
            .get(model)
            .ok_or_else(|| KinematicsError::UnknownModel(model.to_string()))
    }
}

impl Default for DhKinematics {
    fn default() -> Self {
        Self::new()
    }
}

impl KinematicsProvider for DhKinematics {
    fn forward_kinematics(&self, model: &str, q: &DVector<f64>) -> Result<Pose, KinematicsError> {
        self.chain(model)?.forward_kinematics(q)
    }

    fn jacobian(&self, model: &str, q: &DVector<f64>) -> Result<DMatrix<f64>, KinematicsError> {
        self.chain(model)?.jacobian(q)
    }

    fn gravity(&self, model: &str, q: &DVector<f64>) -> Result<DVector<f64>, KinematicsError> {
        self.chain(model)?.gravity(q)
    }
}

/// Enrich one raw state snapshot with the kinematic quantities valid for
/// its configuration: FK pose, geometric Jacobian, end-effector twist
/// (J·q̇) and the gravity compensation vector. Called once per device per
/// tick; the result is discarded at tick end.
pub fn enrich(
    provider: &dyn KinematicsProvider,
    model: &str,
    mut state: RobotState,
) -> Result<EnrichedState, KinematicsError> {
    let ee_pose = provider.forward_kinematics(model, &state.q)?;
    let jacobian = provider.jacobian(model, &state.q)?;
    let gravity = provider.gravity(model, &state.q)?;

    if jacobian.nrows() != 6 || jacobian.ncols() != state.dof() {
        return Err(KinematicsError::DofMismatch {
            expected: state.dof(),
            actual: jacobian.ncols(),
        });
    }
    if gravity.len() != state.dof() {
        return Err(KinematicsError::DofMismatch {
            expected: state.dof(),
            actual: gravity.len(),
        });
    }

    let twist_vec = &jacobian * &state.qd;
    let ee_twist = Twist::new(
        Vector3::new(twist_vec[0], twist_vec[1], twist_vec[2]),
        Vector3::new(twist_vec[3], twist_vec[4], twist_vec[5]),
    );

    let mass_matrix = provider.mass_matrix(model, &state.q)?;
    let coriolis = provider.coriolis(model, &state.q, &state.qd)?;

    state.ee_pose = Some(ee_pose);
    state.ee_twist = Some(ee_twist);

    Ok(EnrichedState {
        state,
        ee_pose,
        ee_twist,
        jacobian,
        gravity,
        mass_matrix,
        coriolis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use simcore_lib::{DeviceId, DhParameter, KinematicsConfig};

    fn provider() -> DhKinematics {
        let config = KinematicsConfig {
            dh_parameters: vec![
                DhParameter { a: 0.3, alpha: 0.0, d: 0.0, theta: 0.0 },
                DhParameter { a: 0.25, alpha: 0.0, d: 0.0, theta: 0.0 },
            ],
            link_masses: vec![1.0, 1.0],
            link_com: vec![[-0.15, 0.0, 0.0], [-0.125, 0.0, 0.0]],
            base_offset: [0.0, 0.0, 0.0],
        };
        let chain = DhChain::from_config(&config, Vector3::new(0.0, -9.81, 0.0)).unwrap();
        let mut provider = DhKinematics::new();
        provider.insert("planar2", chain);
        provider
    }

    fn raw_state(q: Vec<f64>, qd: Vec<f64>) -> RobotState {
        RobotState {
            device: DeviceId::new("arm"),
            tick: 3,
            sim_time: 0.003,
            q: DVector::from_vec(q),
            qd: DVector::from_vec(qd),
            ee_pose: None,
            ee_twist: None,
            tau: None,
            external_wrench: None,
        }
    }

    #[test]
    fn test_enrich_fills_pose_twist_jacobian_gravity() {
        let provider = provider();
        let state = raw_state(vec![0.0, 0.0], vec![1.0, 0.0]);

        let enriched = enrich(&provider, "planar2", state).unwrap();
        assert_relative_eq!(enriched.ee_pose.position.x, 0.55, epsilon = 1e-12);
        // Joint 1 spinning at 1 rad/s sweeps the stretched arm: ẏ = 0.55.
        assert_relative_eq!(enriched.ee_twist.linear.y, 0.55, epsilon = 1e-12);
        assert_relative_eq!(enriched.ee_twist.angular.z, 1.0, epsilon = 1e-12);
        assert_eq!(enriched.jacobian.shape(), (6, 2));
        assert_eq!(enriched.gravity.len(), 2);
        assert!(enriched.state.ee_pose.is_some());
    }

    #[test]
    fn test_unknown_model_reported() {
        let provider = provider();
        let err = enrich(&provider, "missing", raw_state(vec![0.0, 0.0], vec![0.0, 0.0]))
            .unwrap_err();
        assert!(matches!(err, KinematicsError::UnknownModel(_)));
    }

    #[test]
    fn test_dof_mismatch_reported() {
        let provider = provider();
        let err = enrich(&provider, "planar2", raw_state(vec![0.0; 3], vec![0.0; 3])).unwrap_err();
        assert!(matches!(err, KinematicsError::DofMismatch { .. }));
    }
}
