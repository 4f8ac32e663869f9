mod camera;
mod coordinate;
mod image;
mod point;
mod telemetry;

pub use camera::{camera_model_by_id, camera_model_by_name, Camera, CameraModel, CAMERA_MODELS};
pub use coordinate::{CoordinateSystem, Direction, Handedness};
pub use image::{Image, Point2D, INVALID_POINT3D_ID};
pub use point::Point3D;
pub use telemetry::{
    FlagField, InterpolationPolicy, NumericField, TelemetryFrame, TextField, FLAG_FIELDS,
    NUMERIC_FIELDS, TEXT_FIELDS,
};
