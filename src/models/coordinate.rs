use nalgebra::{Matrix3, Vector3};

use crate::error::{ExtractError, Result};

/// The positive direction of one axis of a coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Backward,
}

impl Direction {
    /// The unit vector for this direction in the canonical basis
    /// (x right, y up, z backward; a right-handed triple).
    pub fn unit_vector(self) -> Vector3<f64> {
        match self {
            Direction::Right => Vector3::new(1.0, 0.0, 0.0),
            Direction::Left => Vector3::new(-1.0, 0.0, 0.0),
            Direction::Up => Vector3::new(0.0, 1.0, 0.0),
            Direction::Down => Vector3::new(0.0, -1.0, 0.0),
            Direction::Forward => Vector3::new(0.0, 0.0, -1.0),
            Direction::Backward => Vector3::new(0.0, 0.0, 1.0),
        }
    }
}

/// Handedness of a coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    /// The axis directions are not mutually orthogonal.
    Undefined,
    Left,
    Right,
}

/// A 3-D coordinate system described by the positive direction of its three
/// axes. Stateless: the named constructors below cover the conventions of the
/// tools this crate exchanges poses with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateSystem {
    pub x_direction: Direction,
    pub y_direction: Direction,
    pub z_direction: Direction,
}

impl CoordinateSystem {
    pub const fn new(x_direction: Direction, y_direction: Direction, z_direction: Direction) -> Self {
        Self {
            x_direction,
            y_direction,
            z_direction,
        }
    }

    pub const fn open_gl() -> Self {
        Self::new(Direction::Right, Direction::Up, Direction::Backward)
    }

    pub const fn open_cv() -> Self {
        Self::new(Direction::Right, Direction::Down, Direction::Forward)
    }

    pub const fn colmap() -> Self {
        Self::new(Direction::Right, Direction::Down, Direction::Forward)
    }

    pub const fn nerfstudio_camera() -> Self {
        Self::new(Direction::Right, Direction::Up, Direction::Backward)
    }

    pub const fn nerfstudio_world() -> Self {
        Self::new(Direction::Right, Direction::Forward, Direction::Up)
    }

    pub const fn pytorch_3d() -> Self {
        Self::new(Direction::Left, Direction::Up, Direction::Forward)
    }

    pub const fn blender() -> Self {
        Self::new(Direction::Right, Direction::Forward, Direction::Up)
    }

    pub const fn unity() -> Self {
        Self::new(Direction::Right, Direction::Up, Direction::Forward)
    }

    pub const fn unreal() -> Self {
        Self::new(Direction::Forward, Direction::Right, Direction::Up)
    }

    /// The row-major matrix whose rows are the axis unit vectors.
    pub fn mat(&self) -> Matrix3<f64> {
        Matrix3::from_rows(&[
            self.x_direction.unit_vector().transpose(),
            self.y_direction.unit_vector().transpose(),
            self.z_direction.unit_vector().transpose(),
        ])
    }

    /// Handedness from the sign of the determinant of the transposed axis
    /// matrix. [`Handedness::Undefined`] marks a degenerate system whose axes
    /// are not mutually orthogonal; callers must treat it as invalid input.
    pub fn handedness(&self) -> Handedness {
        let det = self.mat().transpose().determinant();
        if det > 0.0 {
            Handedness::Right
        } else if det < 0.0 {
            Handedness::Left
        } else {
            Handedness::Undefined
        }
    }

    pub fn is_right_handed(&self) -> bool {
        self.handedness() == Handedness::Right
    }

    pub fn is_left_handed(&self) -> bool {
        self.handedness() == Handedness::Left
    }

    /// The composed operator `target.mat * self.mat^-1` that maps matrices
    /// from this system into `target`. Fails with
    /// [`ExtractError::DegenerateGeometry`] when either system's axes are not
    /// mutually orthogonal.
    pub fn conversion_to(&self, target: &CoordinateSystem) -> Result<Matrix3<f64>> {
        let inv = self
            .mat()
            .try_inverse()
            .ok_or(ExtractError::DegenerateGeometry)?;
        if target.handedness() == Handedness::Undefined {
            return Err(ExtractError::DegenerateGeometry);
        }
        Ok(target.mat() * inv)
    }

    /// Converts a matrix (3×N, column-major vectors) from this system to the
    /// target system.
    pub fn convert(&self, mat: &Matrix3<f64>, target: &CoordinateSystem) -> Result<Matrix3<f64>> {
        Ok(self.conversion_to(target)? * mat)
    }

    /// Returns a reusable conversion function from this system to the target,
    /// caching the composed operator.
    pub fn convert_func(
        &self,
        target: &CoordinateSystem,
    ) -> Result<impl Fn(&Matrix3<f64>) -> Matrix3<f64>> {
        let op = self.conversion_to(target)?;
        Ok(move |mat: &Matrix3<f64>| op * mat)
    }

    /// Converts a pose (rotation + translation) from this system to the
    /// target system with one composed operator.
    pub fn convert_pose(
        &self,
        rotation: &Matrix3<f64>,
        translation: &Vector3<f64>,
        target: &CoordinateSystem,
    ) -> Result<(Matrix3<f64>, Vector3<f64>)> {
        let op = self.conversion_to(target)?;
        Ok((op * rotation, op * translation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_handedness() {
        let rh = CoordinateSystem::new(Direction::Right, Direction::Up, Direction::Backward);
        let lh = CoordinateSystem::new(Direction::Left, Direction::Up, Direction::Backward);
        assert_eq!(rh.handedness(), Handedness::Right);
        assert!(rh.is_right_handed());
        assert_eq!(lh.handedness(), Handedness::Left);
        assert!(lh.is_left_handed());
        assert!(CoordinateSystem::colmap().is_right_handed());
    }

    #[test]
    fn test_degenerate_axes_rejected() {
        let bad = CoordinateSystem::new(Direction::Right, Direction::Right, Direction::Up);
        assert_eq!(bad.handedness(), Handedness::Undefined);
        assert!(matches!(
            bad.conversion_to(&CoordinateSystem::colmap()),
            Err(ExtractError::DegenerateGeometry)
        ));
        assert!(matches!(
            CoordinateSystem::colmap().conversion_to(&bad),
            Err(ExtractError::DegenerateGeometry)
        ));
    }

    #[test]
    fn test_identity_conversion() {
        let sys = CoordinateSystem::nerfstudio_world();
        let convert = sys.convert_func(&sys).unwrap();
        let m = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
        assert_relative_eq!(convert(&m), m, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip_conversion() {
        let a = CoordinateSystem::colmap();
        let b = CoordinateSystem::nerfstudio_world();
        let m = Matrix3::new(0.5, -1.0, 2.0, 3.0, 0.25, -4.0, 1.5, 2.5, 0.0);
        let there = a.convert(&m, &b).unwrap();
        let back = b.convert(&there, &a).unwrap();
        assert_relative_eq!(back, m, epsilon = 1e-12);
    }

    #[test]
    fn test_convert_pose_round_trip() {
        let a = CoordinateSystem::colmap();
        let b = CoordinateSystem::open_gl();
        let rotation = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let translation = Vector3::new(1.0, -2.0, 3.0);

        let (r2, t2) = a.convert_pose(&rotation, &translation, &b).unwrap();
        let (r3, t3) = b.convert_pose(&r2, &t2, &a).unwrap();
        assert_relative_eq!(r3, rotation, epsilon = 1e-12);
        assert_relative_eq!(t3, translation, epsilon = 1e-12);
    }

    #[test]
    fn test_known_axis_mapping() {
        // colmap (right, down, forward) -> nerfstudio world (right, forward, up):
        // a point one unit "down" in colmap terms maps to minus one unit "up".
        let conv = CoordinateSystem::colmap()
            .conversion_to(&CoordinateSystem::nerfstudio_world())
            .unwrap();
        let down = Vector3::new(0.0, 1.0, 0.0);
        let mapped = conv * down;
        assert_relative_eq!(mapped, Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-12);
    }
}
