use nalgebra::{Matrix4, Rotation3, UnitQuaternion, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Rigid-body pose: position in meters plus an orientation on SO(3).
///
/// The orientation is a `UnitQuaternion`, so it is always a valid rotation
/// by construction. Poses are immutable value types; composition and
/// inversion return new poses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl Pose {
    pub fn new(position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
        }
    }

    /// Build a pose from a homogeneous 4x4 transform whose rotation block
    /// is orthonormal (e.g. the product of DH transforms).
    pub fn from_homogeneous(transform: &Matrix4<f64>) -> Self {
        let position = Vector3::new(transform[(0, 3)], transform[(1, 3)], transform[(2, 3)]);
        let rot = transform.fixed_view::<3, 3>(0, 0).into_owned();
        let orientation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rot));
        Self {
            position,
            orientation,
        }
    }

    /// Compose two poses: `self ∘ other` (apply `other` in `self`'s frame).
    pub fn compose(&self, other: &Pose) -> Pose {
        Pose {
            position: self.position + self.orientation * other.position,
            orientation: self.orientation * other.orientation,
        }
    }

    /// Inverse pose, so that `self.compose(&self.inverse())` is identity.
    pub fn inverse(&self) -> Pose {
        let inv_orientation = self.orientation.inverse();
        Pose {
            position: -(inv_orientation * self.position),
            orientation: inv_orientation,
        }
    }
}

/// End-effector spatial velocity: linear (m/s) and angular (rad/s) parts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    pub linear: Vector3<f64>,
    pub angular: Vector3<f64>,
}

impl Twist {
    pub fn new(linear: Vector3<f64>, angular: Vector3<f64>) -> Self {
        Self { linear, angular }
    }

    pub fn zero() -> Self {
        Self {
            linear: Vector3::zeros(),
            angular: Vector3::zeros(),
        }
    }

    /// Stacked [linear; angular] 6-vector.
    pub fn to_vector(&self) -> Vector6<f64> {
        let mut v = Vector6::zeros();
        v.fixed_rows_mut::<3>(0).copy_from(&self.linear);
        v.fixed_rows_mut::<3>(3).copy_from(&self.angular);
        v
    }

    pub fn from_vector(v: &Vector6<f64>) -> Self {
        Self {
            linear: Vector3::new(v[0], v[1], v[2]),
            angular: Vector3::new(v[3], v[4], v[5]),
        }
    }
}

impl std::ops::Sub for Twist {
    type Output = Twist;

    fn sub(self, rhs: Twist) -> Twist {
        Twist {
            linear: self.linear - rhs.linear,
            angular: self.angular - rhs.angular,
        }
    }
}

/// Rotation-vector orientation error on SO(3).
///
/// Computes the log map of the relative rotation `R_desired * R_measured⁻¹`:
/// the returned 3-vector's direction is the rotation axis and its magnitude
/// the rotation angle, valid for any error magnitude including near π. The
/// vector points from `measured` toward `desired`.
///
/// The relative quaternion is canonicalized to the positive hemisphere
/// before taking the log, so the shortest arc is always chosen and
/// `|orientation_error| <= π`. The log map itself is stable as the angle
/// approaches zero (no division by a vanishing sine term).
pub fn orientation_error(
    measured: &UnitQuaternion<f64>,
    desired: &UnitQuaternion<f64>,
) -> Vector3<f64> {
    let mut relative = desired * measured.inverse();
    if relative.w < 0.0 {
        // q and -q encode the same rotation; pick the short way around.
        relative = UnitQuaternion::new_unchecked(-relative.into_inner());
    }
    relative.scaled_axis()
}

/// Stacked 6-vector pose error [position; rotation-vector], measured → desired.
pub fn pose_error(measured: &Pose, desired: &Pose) -> Vector6<f64> {
    let mut e = Vector6::zeros();
    e.fixed_rows_mut::<3>(0)
        .copy_from(&(desired.position - measured.position));
    e.fixed_rows_mut::<3>(3)
        .copy_from(&orientation_error(&measured.orientation, &desired.orientation));
    e
}
