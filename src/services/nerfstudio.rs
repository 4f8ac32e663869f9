use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::Serialize;
use tracing::info;

use crate::error::{ExtractError, Result};
use crate::models::{Camera, CoordinateSystem, Image};
use crate::services::colmap_io::{read_cameras, read_images};

/// The pose document consumed by neural-rendering tools: shared camera
/// intrinsics plus one camera-to-world transform per image.
#[derive(Debug, Serialize)]
pub struct TransformsDocument {
    pub w: u64,
    pub h: u64,
    pub fl_x: f64,
    pub fl_y: f64,
    pub cx: f64,
    pub cy: f64,
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub camera_model: String,
    pub frames: Vec<TransformFrame>,
}

#[derive(Debug, Serialize)]
pub struct TransformFrame {
    pub file_path: String,
    pub transform_matrix: [[f64; 4]; 4],
}

/// Converts a reconstruction (camera file + image file, binary or text by
/// extension) into the transforms document, written as `transforms.json` in
/// `output_dir`. Returns the path of the written file.
pub fn colmap_to_nerfstudio<P: AsRef<Path>>(
    camera_file: P,
    image_file: P,
    output_dir: P,
    images_root: &str,
) -> Result<PathBuf> {
    let cameras = read_cameras(camera_file)?;
    let images = read_images(image_file)?;
    let document = build_transforms(&cameras, &images, images_root)?;

    let out_path = output_dir.as_ref().join("transforms.json");
    let writer = BufWriter::new(File::create(&out_path)?);
    serde_json::to_writer_pretty(writer, &document)?;
    info!(path = ?out_path, frames = document.frames.len(), "wrote transforms document");
    Ok(out_path)
}

/// Builds the transforms document. Requires a single shared camera with the
/// `OPENCV` model; anything else is rejected rather than silently exported
/// with the wrong distortion semantics.
pub fn build_transforms(
    cameras: &[Camera],
    images: &[Image],
    images_root: &str,
) -> Result<TransformsDocument> {
    let camera = match cameras {
        [camera] => camera,
        _ => {
            return Err(ExtractError::UnsupportedModel(format!(
                "only a single camera shared for all images is supported, got {}",
                cameras.len()
            )))
        }
    };
    if camera.model.model_name != "OPENCV" {
        return Err(ExtractError::UnsupportedModel(format!(
            "only the OPENCV camera model is supported, got {}",
            camera.model.model_name
        )));
    }

    // The composed conversion operator is cached once and reused for every
    // pose (rotation and translation alike).
    let convert =
        CoordinateSystem::colmap().conversion_to(&CoordinateSystem::nerfstudio_world())?;
    let images_root = Path::new(images_root);

    let frames = images
        .iter()
        .map(|image| {
            // Stored order is (w, x, y, z).
            let [w, x, y, z] = image.r_quat;
            let rotation = UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z))
                .to_rotation_matrix()
                .into_inner();
            let rotation = convert * rotation;
            let translation = convert * Vector3::from(image.t_vec);

            let mut transform = [[0.0; 4]; 4];
            for row in 0..3 {
                for col in 0..3 {
                    transform[row][col] = rotation[(row, col)];
                }
                transform[row][3] = translation[row];
            }
            transform[3][3] = 1.0;

            TransformFrame {
                file_path: images_root.join(&image.name).to_string_lossy().into_owned(),
                transform_matrix: transform,
            }
        })
        .collect();

    Ok(TransformsDocument {
        w: camera.width,
        h: camera.height,
        fl_x: camera.params[0],
        fl_y: camera.params[1],
        cx: camera.params[2],
        cy: camera.params[3],
        k1: camera.params[4],
        k2: camera.params[5],
        p1: camera.params[6],
        p2: camera.params[7],
        camera_model: camera.model.model_name.to_string(),
        frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::camera_model_by_name;
    use approx::assert_relative_eq;

    fn opencv_camera() -> Camera {
        Camera::new(
            1,
            camera_model_by_name("OPENCV").unwrap(),
            3840,
            2160,
            vec![2900.0, 2905.0, 1920.0, 1080.0, 0.01, -0.002, 0.0003, -0.0001],
        )
        .unwrap()
    }

    fn identity_image() -> Image {
        Image::new(
            0,
            [1.0, 0.0, 0.0, 0.0],
            [2.0, 3.0, 4.0],
            1,
            "frame.png".to_string(),
            Vec::new(),
        )
    }

    #[test]
    fn test_intrinsics_copied() {
        let doc = build_transforms(&[opencv_camera()], &[identity_image()], "./images").unwrap();
        assert_eq!(doc.w, 3840);
        assert_eq!(doc.h, 2160);
        assert_eq!(doc.fl_x, 2900.0);
        assert_eq!(doc.fl_y, 2905.0);
        assert_eq!(doc.cx, 1920.0);
        assert_eq!(doc.cy, 1080.0);
        assert_eq!(doc.k1, 0.01);
        assert_eq!(doc.camera_model, "OPENCV");
        assert_eq!(doc.frames.len(), 1);
        assert_eq!(doc.frames[0].file_path, "./images/frame.png");
    }

    #[test]
    fn test_identity_pose_converts_axes() {
        let doc = build_transforms(&[opencv_camera()], &[identity_image()], ".").unwrap();
        let m = &doc.frames[0].transform_matrix;

        // colmap (right, down, forward) -> nerfstudio world (right, forward, up):
        // y and z rows swap, with sign flips from the axis reversal.
        let expected_rotation = [[1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, -1.0, 0.0]];
        for row in 0..3 {
            for col in 0..3 {
                assert_relative_eq!(m[row][col], expected_rotation[row][col], epsilon = 1e-12);
            }
        }
        // Translation converts through the same operator.
        assert_relative_eq!(m[0][3], 2.0, epsilon = 1e-12);
        assert_relative_eq!(m[1][3], 4.0, epsilon = 1e-12);
        assert_relative_eq!(m[2][3], -3.0, epsilon = 1e-12);
        assert_relative_eq!(m[3][3], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_multiple_cameras_rejected() {
        let cameras = vec![opencv_camera(), opencv_camera()];
        assert!(matches!(
            build_transforms(&cameras, &[], "."),
            Err(ExtractError::UnsupportedModel(_))
        ));
    }

    #[test]
    fn test_non_opencv_model_rejected() {
        let pinhole = Camera::new(
            1,
            camera_model_by_name("PINHOLE").unwrap(),
            640,
            480,
            vec![500.0, 500.0, 320.0, 240.0],
        )
        .unwrap();
        assert!(matches!(
            build_transforms(&[pinhole], &[], "."),
            Err(ExtractError::UnsupportedModel(_))
        ));
    }
}
