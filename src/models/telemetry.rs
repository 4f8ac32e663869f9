use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A single sample of drone telemetry.
///
/// This is the union of the flight-log and subtitle field families; each
/// source populates its own subset and leaves the rest `None`. Frames are
/// value snapshots: parsers and the interpolator always build new frames,
/// and the only post-construction mutation is the one-time timestamp shift
/// applied after temporal alignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Zero-based sequence id, monotonically increasing per parse.
    pub id: u32,
    /// Absolute timestamp (UTC once synchronized).
    pub timestamp: Option<DateTime<Utc>>,

    // Flight-log fields
    /// Milliseconds since the start of the flight log.
    pub time_ms: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub height_above_takeoff: Option<f64>,
    pub altitude_above_sea_level: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub distance: Option<f64>,
    pub mileage: Option<f64>,
    pub satellites: Option<f64>,
    pub gps_level: Option<f64>,
    pub voltage: Option<f64>,
    pub x_speed: Option<f64>,
    pub y_speed: Option<f64>,
    pub z_speed: Option<f64>,
    pub compass_heading: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    pub is_photo: Option<bool>,
    pub is_video: Option<bool>,
    pub gimbal_heading: Option<f64>,
    pub gimbal_pitch: Option<f64>,
    pub gimbal_roll: Option<f64>,
    pub battery_percent: Option<f64>,
    pub fly_state: Option<String>,
    pub message: Option<String>,

    // Subtitle fields
    pub frame_cnt: Option<f64>,
    pub diff_time: Option<String>,
    /// Caption display window, milliseconds since the start of the video.
    pub start_time_ms: Option<f64>,
    pub end_time_ms: Option<f64>,
    pub iso: Option<f64>,
    pub shutter: Option<String>,
    pub fnum: Option<f64>,
    pub ev: Option<f64>,
    pub focal_len: Option<f64>,
    pub dzoom: Option<f64>,
    pub dzoom_ratio: Option<f64>,
    pub color_md: Option<String>,
    pub ct: Option<f64>,
    pub rel_alt: Option<f64>,
    pub abs_alt: Option<f64>,
    pub gimbal_yaw: Option<f64>,
}

impl TelemetryFrame {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// The one-time synchronization correction: shifts the absolute timestamp
    /// by the offset found during temporal alignment.
    pub fn shift_timestamp(&mut self, delta: Duration) {
        if let Some(ts) = self.timestamp {
            self.timestamp = Some(ts + delta);
        }
    }
}

/// How a numeric field is resampled between two bracketing source frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationPolicy {
    /// Plain linear interpolation/extrapolation.
    Linear,
    /// Degrees wrapping at 360: interpolate along the shorter arc and re-wrap
    /// the result into [0, 360).
    AngularDegrees,
    /// Geographic latitude with the pole-proximity crossing heuristic.
    Latitude,
    /// Geographic longitude with the antimeridian crossing heuristic.
    Longitude,
}

/// One numeric field of [`TelemetryFrame`] with its interpolation policy.
///
/// The tables below replace runtime field reflection: every resampled field
/// is listed explicitly with typed accessors.
pub struct NumericField {
    pub name: &'static str,
    pub policy: InterpolationPolicy,
    pub get: fn(&TelemetryFrame) -> Option<f64>,
    pub set: fn(&mut TelemetryFrame, f64),
}

/// A boolean-like flag field, resolved to a source frame rather than
/// interpolated.
pub struct FlagField {
    pub name: &'static str,
    pub get: fn(&TelemetryFrame) -> Option<bool>,
    pub set: fn(&mut TelemetryFrame, bool),
}

/// A free-text field, carried over from a source frame.
pub struct TextField {
    pub name: &'static str,
    pub get: fn(&TelemetryFrame) -> Option<String>,
    pub set: fn(&mut TelemetryFrame, String),
}

macro_rules! numeric_field {
    ($field:ident, $policy:expr) => {
        NumericField {
            name: stringify!($field),
            policy: $policy,
            get: |f| f.$field,
            set: |f, v| f.$field = Some(v),
        }
    };
}

use InterpolationPolicy::{AngularDegrees, Latitude, Linear, Longitude};

pub const NUMERIC_FIELDS: &[NumericField] = &[
    numeric_field!(time_ms, Linear),
    numeric_field!(latitude, Latitude),
    numeric_field!(longitude, Longitude),
    numeric_field!(height_above_takeoff, Linear),
    numeric_field!(altitude_above_sea_level, Linear),
    numeric_field!(altitude, Linear),
    numeric_field!(speed, Linear),
    numeric_field!(distance, Linear),
    numeric_field!(mileage, Linear),
    numeric_field!(satellites, Linear),
    numeric_field!(gps_level, Linear),
    numeric_field!(voltage, Linear),
    numeric_field!(x_speed, Linear),
    numeric_field!(y_speed, Linear),
    numeric_field!(z_speed, Linear),
    numeric_field!(compass_heading, AngularDegrees),
    numeric_field!(pitch, AngularDegrees),
    numeric_field!(roll, AngularDegrees),
    numeric_field!(gimbal_heading, AngularDegrees),
    numeric_field!(gimbal_pitch, AngularDegrees),
    numeric_field!(gimbal_roll, AngularDegrees),
    numeric_field!(gimbal_yaw, AngularDegrees),
    numeric_field!(battery_percent, Linear),
    numeric_field!(frame_cnt, Linear),
    numeric_field!(start_time_ms, Linear),
    numeric_field!(end_time_ms, Linear),
    numeric_field!(iso, Linear),
    numeric_field!(fnum, Linear),
    numeric_field!(ev, Linear),
    numeric_field!(focal_len, Linear),
    numeric_field!(dzoom, Linear),
    numeric_field!(dzoom_ratio, Linear),
    numeric_field!(ct, Linear),
    numeric_field!(rel_alt, Linear),
    numeric_field!(abs_alt, Linear),
];

pub const FLAG_FIELDS: &[FlagField] = &[
    FlagField {
        name: "is_photo",
        get: |f| f.is_photo,
        set: |f, v| f.is_photo = Some(v),
    },
    FlagField {
        name: "is_video",
        get: |f| f.is_video,
        set: |f, v| f.is_video = Some(v),
    },
];

pub const TEXT_FIELDS: &[TextField] = &[
    TextField {
        name: "fly_state",
        get: |f| f.fly_state.clone(),
        set: |f, v| f.fly_state = Some(v),
    },
    TextField {
        name: "message",
        get: |f| f.message.clone(),
        set: |f, v| f.message = Some(v),
    },
    TextField {
        name: "diff_time",
        get: |f| f.diff_time.clone(),
        set: |f, v| f.diff_time = Some(v),
    },
    TextField {
        name: "shutter",
        get: |f| f.shutter.clone(),
        set: |f, v| f.shutter = Some(v),
    },
    TextField {
        name: "color_md",
        get: |f| f.color_md.clone(),
        set: |f, v| f.color_md = Some(v),
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angular_fields_use_wrap_policy() {
        for name in [
            "compass_heading",
            "pitch",
            "roll",
            "gimbal_heading",
            "gimbal_pitch",
            "gimbal_roll",
            "gimbal_yaw",
        ] {
            let field = NUMERIC_FIELDS
                .iter()
                .find(|f| f.name == name)
                .expect("angular field in table");
            assert_eq!(field.policy, InterpolationPolicy::AngularDegrees);
        }
    }

    #[test]
    fn test_geographic_fields_use_crossing_policy() {
        let lat = NUMERIC_FIELDS.iter().find(|f| f.name == "latitude").unwrap();
        let lon = NUMERIC_FIELDS
            .iter()
            .find(|f| f.name == "longitude")
            .unwrap();
        assert_eq!(lat.policy, InterpolationPolicy::Latitude);
        assert_eq!(lon.policy, InterpolationPolicy::Longitude);
    }

    #[test]
    fn test_field_accessors_round_trip() {
        let mut frame = TelemetryFrame::new(0);
        for field in NUMERIC_FIELDS {
            (field.set)(&mut frame, 42.5);
            assert_eq!((field.get)(&frame), Some(42.5), "field {}", field.name);
        }
        for field in FLAG_FIELDS {
            (field.set)(&mut frame, true);
            assert_eq!((field.get)(&frame), Some(true), "field {}", field.name);
        }
        for field in TEXT_FIELDS {
            (field.set)(&mut frame, "x".to_string());
            assert_eq!(
                (field.get)(&frame),
                Some("x".to_string()),
                "field {}",
                field.name
            );
        }
    }

    #[test]
    fn test_shift_timestamp() {
        let mut frame = TelemetryFrame::new(3);
        frame.timestamp = Some("2023-06-01T10:00:00Z".parse().unwrap());
        frame.shift_timestamp(Duration::milliseconds(2500));
        assert_eq!(
            frame.timestamp,
            Some("2023-06-01T10:00:02.500Z".parse().unwrap())
        );

        let mut bare = TelemetryFrame::new(4);
        bare.shift_timestamp(Duration::seconds(1));
        assert_eq!(bare.timestamp, None);
    }
}
