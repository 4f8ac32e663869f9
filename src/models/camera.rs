use crate::error::{ExtractError, Result};

/// One of the fixed camera models of the reconstruction exchange format,
/// identified by a stable integer id, name, and parameter count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraModel {
    pub model_id: i32,
    pub model_name: &'static str,
    pub num_params: usize,
}

pub const CAMERA_MODELS: [CameraModel; 11] = [
    CameraModel {
        model_id: 0,
        model_name: "SIMPLE_PINHOLE",
        num_params: 3,
    },
    CameraModel {
        model_id: 1,
        model_name: "PINHOLE",
        num_params: 4,
    },
    CameraModel {
        model_id: 2,
        model_name: "SIMPLE_RADIAL",
        num_params: 4,
    },
    CameraModel {
        model_id: 3,
        model_name: "RADIAL",
        num_params: 5,
    },
    CameraModel {
        model_id: 4,
        model_name: "OPENCV",
        num_params: 8,
    },
    CameraModel {
        model_id: 5,
        model_name: "OPENCV_FISHEYE",
        num_params: 8,
    },
    CameraModel {
        model_id: 6,
        model_name: "FULL_OPENCV",
        num_params: 12,
    },
    CameraModel {
        model_id: 7,
        model_name: "FOV",
        num_params: 5,
    },
    CameraModel {
        model_id: 8,
        model_name: "SIMPLE_RADIAL_FISHEYE",
        num_params: 4,
    },
    CameraModel {
        model_id: 9,
        model_name: "RADIAL_FISHEYE",
        num_params: 5,
    },
    CameraModel {
        model_id: 10,
        model_name: "THIN_PRISM_FISHEYE",
        num_params: 12,
    },
];

/// Looks up a camera model by its stable integer id.
pub fn camera_model_by_id(model_id: i32) -> Result<CameraModel> {
    CAMERA_MODELS
        .iter()
        .find(|m| m.model_id == model_id)
        .copied()
        .ok_or_else(|| ExtractError::UnsupportedModel(format!("model id {model_id}")))
}

/// Looks up a camera model by name (e.g. `"OPENCV"`).
pub fn camera_model_by_name(name: &str) -> Result<CameraModel> {
    CAMERA_MODELS
        .iter()
        .find(|m| m.model_name == name)
        .copied()
        .ok_or_else(|| ExtractError::UnsupportedModel(name.to_string()))
}

/// A camera in the reconstruction, immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub identifier: u32,
    pub model: CameraModel,
    pub width: u64,
    pub height: u64,
    pub params: Vec<f64>,
}

impl Camera {
    /// Creates a camera, validating the parameter vector length against the
    /// model's parameter count.
    pub fn new(
        identifier: u32,
        model: CameraModel,
        width: u64,
        height: u64,
        params: Vec<f64>,
    ) -> Result<Self> {
        if params.len() != model.num_params {
            return Err(ExtractError::FormatMismatch(format!(
                "camera {} ({}): expected {} params, got {}",
                identifier,
                model.model_name,
                model.num_params,
                params.len()
            )));
        }
        Ok(Self {
            identifier,
            model,
            width,
            height,
            params,
        })
    }
}
