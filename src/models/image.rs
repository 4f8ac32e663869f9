/// Sentinel `point3d_id` for a 2-D observation without a triangulated point.
pub const INVALID_POINT3D_ID: u64 = u64::MAX;

/// A 2-D observation in an image: pixel position plus the id of the 3-D
/// point it observes, or [`INVALID_POINT3D_ID`] if unobserved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
    pub point3d_id: u64,
}

impl Point2D {
    pub fn new(x: f64, y: f64, point3d_id: u64) -> Self {
        Self { x, y, point3d_id }
    }

    pub fn is_observed(&self) -> bool {
        self.point3d_id != INVALID_POINT3D_ID
    }
}

/// A posed image in the reconstruction.
///
/// The orientation quaternion is stored in (w, x, y, z) order and is expected
/// (not enforced) to be unit-norm. `camera_id` must reference a camera present
/// in the same reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub identifier: u32,
    pub r_quat: [f64; 4],
    pub t_vec: [f64; 3],
    pub camera_id: u32,
    pub name: String,
    pub points2d: Vec<Point2D>,
}

impl Image {
    pub fn new(
        identifier: u32,
        r_quat: [f64; 4],
        t_vec: [f64; 3],
        camera_id: u32,
        name: String,
        points2d: Vec<Point2D>,
    ) -> Self {
        Self {
            identifier,
            r_quat,
            t_vec,
            camera_id,
            name,
            points2d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_sentinel() {
        let seen = Point2D::new(12.5, 40.0, 7);
        let unseen = Point2D::new(12.5, 40.0, INVALID_POINT3D_ID);
        assert!(seen.is_observed());
        assert!(!unseen.is_observed());
    }
}
