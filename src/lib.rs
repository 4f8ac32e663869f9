//! Telemetry-synchronized camera pose extraction for aerial survey video.
//!
//! The crate fuses asynchronous telemetry (flight-log records,
//! video-subtitle telemetry, and an elevation-model origin) into prior
//! camera poses for a downstream reconstruction tool, and converts finished
//! reconstructions into the transforms document used by neural-rendering
//! tools.
//!
//! Video decoding/encoding, CLI handling, and directory management stay
//! outside this crate; see [`services::pipeline`] for the orchestration entry
//! points and their collaborator hooks.

pub mod error;
pub mod models;
pub mod services;

pub use error::{ExtractError, Result};
pub use models::{Camera, CameraModel, CoordinateSystem, Image, Point2D, Point3D, TelemetryFrame};
pub use services::{
    FlightLogParser, SrtParser, TelemetryParser, TemporalAligner, TimeInterpolator,
};
