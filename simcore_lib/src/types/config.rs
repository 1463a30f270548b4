use crate::types::command::ControllerMode;
use crate::types::device::{ActuationMode, DeviceId, DeviceInfo, DeviceRegistry};
use crate::types::error::ConfigError;
use crate::types::target::{CartesianGains, JointGains};
use nalgebra::{DVector, Vector6};
use serde::{Deserialize, Serialize};
use std::fs;

/// Top-level scene configuration: the resolved device registry plus the
/// loop parameters. Loaded once, validated, then passed by value into the
/// system constructor — there is no process-wide config state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    pub name: String,
    /// Physics/control timestep in seconds.
    pub timestep: f64,
    /// World gravity vector (m/s²).
    #[serde(default = "default_gravity")]
    pub gravity: [f64; 3],
    /// Per-device compute budget in milliseconds; overruns trigger the
    /// per-tick fallback for that device.
    #[serde(default)]
    pub compute_budget_ms: Option<f64>,
    pub devices: Vec<DeviceConfig>,
}

fn default_gravity() -> [f64; 3] {
    [0.0, 0.0, -9.81]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub dof: usize,
    pub actuation: ActuationMode,
    /// Controller mode active when the run starts.
    pub controller: ControllerMode,
    /// Kinematic model identifier; defaults to the device id.
    #[serde(default)]
    pub model: Option<String>,
    pub kinematics: KinematicsConfig,
    #[serde(default)]
    pub joint_limits: Vec<JointLimit>,
    pub gains: GainsConfig,
    /// Initial joint configuration; zeros when omitted.
    #[serde(default)]
    pub home: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinematicsConfig {
    pub dh_parameters: Vec<DhParameter>,
    /// Mass of each link (kg), used for the gravity vector.
    pub link_masses: Vec<f64>,
    /// Center of mass of each link, expressed in that link's frame.
    pub link_com: Vec<[f64; 3]>,
    #[serde(default)]
    pub base_offset: [f64; 3], // x, y, z
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhParameter {
    pub a: f64,     // link length
    pub alpha: f64, // link twist
    pub d: f64,     // link offset
    pub theta: f64, // joint angle offset
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointLimit {
    pub min_angle: f64,
    pub max_angle: f64,
    pub max_velocity: f64,
    #[serde(default)]
    pub max_torque: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GainsConfig {
    /// Diagonal Cartesian stiffness [x, y, z, rx, ry, rz].
    pub cartesian_stiffness: [f64; 6],
    /// Diagonal Cartesian damping [x, y, z, rx, ry, rz].
    pub cartesian_damping: [f64; 6],
    pub joint_kp: Vec<f64>,
    pub joint_kd: Vec<f64>,
    #[serde(default)]
    pub joint_ki: Vec<f64>,
}

impl SceneConfig {
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        let config: SceneConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(ConfigError::Validation(format!(
                "timestep must be positive, got {}",
                self.timestep
            )));
        }
        if self.devices.is_empty() {
            return Err(ConfigError::Validation("scene has no devices".to_string()));
        }
        for device in &self.devices {
            device.validate()?;
        }
        let mut ids: Vec<&str> = self.devices.iter().map(|d| d.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.devices.len() {
            return Err(ConfigError::Validation("duplicate device ids".to_string()));
        }
        Ok(())
    }

    /// Resolved device registry consumed by the runtime.
    pub fn to_registry(&self) -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        for device in &self.devices {
            registry.register(DeviceInfo {
                id: DeviceId::new(&device.id),
                dof: device.dof,
                actuation: device.actuation,
                model: device.model_id().to_string(),
            });
        }
        registry
    }
}

impl DeviceConfig {
    pub fn model_id(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.id)
    }

    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(&self.id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dof == 0 {
            return Err(ConfigError::Validation(format!(
                "device {}: DoF must be non-zero",
                self.id
            )));
        }
        if self.kinematics.dh_parameters.len() != self.dof {
            return Err(ConfigError::Validation(format!(
                "device {}: DH parameters count ({}) doesn't match DoF ({})",
                self.id,
                self.kinematics.dh_parameters.len(),
                self.dof
            )));
        }
        if self.kinematics.link_masses.len() != self.dof {
            return Err(ConfigError::Validation(format!(
                "device {}: link masses count ({}) doesn't match DoF ({})",
                self.id,
                self.kinematics.link_masses.len(),
                self.dof
            )));
        }
        if self.kinematics.link_com.len() != self.dof {
            return Err(ConfigError::Validation(format!(
                "device {}: link COM count ({}) doesn't match DoF ({})",
                self.id,
                self.kinematics.link_com.len(),
                self.dof
            )));
        }
        if !self.joint_limits.is_empty() && self.joint_limits.len() != self.dof {
            return Err(ConfigError::Validation(format!(
                "device {}: joint limits count ({}) doesn't match DoF ({})",
                self.id,
                self.joint_limits.len(),
                self.dof
            )));
        }
        if let Some(home) = &self.home {
            if home.len() != self.dof {
                return Err(ConfigError::Validation(format!(
                    "device {}: home configuration length ({}) doesn't match DoF ({})",
                    self.id,
                    home.len(),
                    self.dof
                )));
            }
        }
        if !self.controller.supported_by(self.actuation) {
            return Err(ConfigError::Validation(format!(
                "device {}: initial mode {} not supported by {} actuation",
                self.id, self.controller, self.actuation
            )));
        }
        // Gains are shape- and definiteness-checked through their typed
        // constructors so a bad scene file fails at startup.
        self.cartesian_gains().map_err(|source| ConfigError::Gains {
            device: self.device_id(),
            source,
        })?;
        self.joint_gains().map_err(|source| ConfigError::Gains {
            device: self.device_id(),
            source,
        })?;
        Ok(())
    }

    pub fn cartesian_gains(&self) -> Result<CartesianGains, crate::types::error::GainError> {
        CartesianGains::from_diagonals(
            Vector6::from_row_slice(&self.gains.cartesian_stiffness),
            Vector6::from_row_slice(&self.gains.cartesian_damping),
        )
    }

    pub fn joint_gains(&self) -> Result<JointGains, crate::types::error::GainError> {
        let ki = if self.gains.joint_ki.is_empty() {
            DVector::zeros(self.gains.joint_kp.len())
        } else {
            DVector::from_vec(self.gains.joint_ki.clone())
        };
        JointGains::new(
            DVector::from_vec(self.gains.joint_kp.clone()),
            DVector::from_vec(self.gains.joint_kd.clone()),
            ki,
        )
    }

    /// Per-joint torque limits, when every joint limit declares one.
    pub fn torque_limits(&self) -> Option<DVector<f64>> {
        if self.joint_limits.len() != self.dof {
            return None;
        }
        let limits: Option<Vec<f64>> = self.joint_limits.iter().map(|l| l.max_torque).collect();
        limits.map(DVector::from_vec)
    }

    pub fn home_configuration(&self) -> DVector<f64> {
        match &self.home {
            Some(home) => DVector::from_vec(home.clone()),
            None => DVector::zeros(self.dof),
        }
    }
}
