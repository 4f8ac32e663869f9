use crate::error::{ExtractError, Result};

/// A triangulated 3-D point with its observation track.
///
/// `image_ids` and `point2d_idxs` are parallel sequences: entry *i* means
/// image `image_ids[i]` observes this point at local index `point2d_idxs[i]`
/// in that image's 2-D point list.
#[derive(Debug, Clone, PartialEq)]
pub struct Point3D {
    pub identifier: u64,
    pub xyz: [f64; 3],
    pub rgb: [u8; 3],
    pub error: f64,
    pub image_ids: Vec<u32>,
    pub point2d_idxs: Vec<u32>,
}

impl Point3D {
    /// Creates a point, validating that the track sequences have equal length.
    pub fn new(
        identifier: u64,
        xyz: [f64; 3],
        rgb: [u8; 3],
        error: f64,
        image_ids: Vec<u32>,
        point2d_idxs: Vec<u32>,
    ) -> Result<Self> {
        if image_ids.len() != point2d_idxs.len() {
            return Err(ExtractError::FormatMismatch(format!(
                "point {}: track has {} image ids but {} 2-D indices",
                identifier,
                image_ids.len(),
                point2d_idxs.len()
            )));
        }
        Ok(Self {
            identifier,
            xyz,
            rgb,
            error,
            image_ids,
            point2d_idxs,
        })
    }

    pub fn track_len(&self) -> usize {
        self.image_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_length_validation() {
        let ok = Point3D::new(1, [0.0, 1.0, 2.0], [255, 0, 0], 0.5, vec![1, 2], vec![0, 3]);
        assert_eq!(ok.unwrap().track_len(), 2);

        let bad = Point3D::new(1, [0.0, 1.0, 2.0], [255, 0, 0], 0.5, vec![1, 2], vec![0]);
        assert!(matches!(bad, Err(ExtractError::FormatMismatch(_))));
    }
}
