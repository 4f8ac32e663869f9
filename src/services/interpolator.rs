use chrono::{DateTime, Utc};

use crate::error::{ExtractError, Result};
use crate::models::{
    InterpolationPolicy, TelemetryFrame, FLAG_FIELDS, NUMERIC_FIELDS, TEXT_FIELDS,
};

/// Crossing thresholds for the geographic wraparound heuristics.
///
/// These are tuned to typical flight-path geometry, not general great-circle
/// interpolation, which is why they are configurable rather than baked in:
/// latitude endpoints on opposite sides of ±45° are treated as a pole
/// crossing, longitude endpoints on opposite sides of ±90° as an
/// antimeridian crossing.
#[derive(Debug, Clone, Copy)]
pub struct WrapConfig {
    pub latitude_threshold_deg: f64,
    pub longitude_threshold_deg: f64,
}

impl Default for WrapConfig {
    fn default() -> Self {
        Self {
            latitude_threshold_deg: 45.0,
            longitude_threshold_deg: 90.0,
        }
    }
}

/// Resamples a telemetry frame sequence at arbitrary timestamps.
///
/// Targets may lie outside the source range; the boundary segment is
/// extrapolated rather than rejected. Each numeric field follows its policy
/// from the frame model's field table; flags and strings are carried from a
/// bracketing source frame.
pub struct TimeInterpolator {
    frames: Vec<TelemetryFrame>,
    seconds: Vec<f64>,
    start: Option<DateTime<Utc>>,
    wrap: WrapConfig,
}

impl TimeInterpolator {
    /// Builds an interpolator over time-ordered frames. Every frame must
    /// carry a timestamp; elapsed seconds are measured from the first frame.
    pub fn new(frames: Vec<TelemetryFrame>) -> Result<Self> {
        Self::with_wrap_config(frames, WrapConfig::default())
    }

    pub fn with_wrap_config(frames: Vec<TelemetryFrame>, wrap: WrapConfig) -> Result<Self> {
        for frame in &frames {
            if frame.timestamp.is_none() {
                return Err(ExtractError::MalformedInput(format!(
                    "frame {} has no timestamp; all frames must be timestamped",
                    frame.id
                )));
            }
        }
        let start = frames.first().and_then(|f| f.timestamp);
        let seconds = frames
            .iter()
            .map(|f| elapsed_seconds(start.unwrap(), f.timestamp.unwrap()))
            .collect();
        Ok(Self {
            frames,
            seconds,
            start,
            wrap,
        })
    }

    /// Produces one interpolated frame per target timestamp. An empty source
    /// sequence yields no output; a single-frame source repeats that frame.
    pub fn sample_at(&self, targets: &[DateTime<Utc>]) -> Vec<TelemetryFrame> {
        let Some(start) = self.start else {
            return Vec::new();
        };
        targets
            .iter()
            .enumerate()
            .map(|(i, &target)| self.sample_one(elapsed_seconds(start, target), target, i as u32))
            .collect()
    }

    fn sample_one(&self, t: f64, target: DateTime<Utc>, id: u32) -> TelemetryFrame {
        if self.frames.len() == 1 {
            let mut frame = self.frames[0].clone();
            frame.id = id;
            return frame;
        }

        // Bracketing segment via binary search; targets beyond either end
        // reuse the boundary segment, which extrapolates.
        let hi = self
            .seconds
            .partition_point(|&s| s <= t)
            .clamp(1, self.frames.len() - 1);
        let lo = hi - 1;
        let dt = self.seconds[hi] - self.seconds[lo];
        let weight = if dt == 0.0 {
            0.0
        } else {
            (t - self.seconds[lo]) / dt
        };

        // At an exact source timestamp the source frame is reproduced
        // verbatim, including angular fields outside [0, 360).
        if weight == 0.0 {
            let mut frame = self.frames[lo].clone();
            frame.id = id;
            return frame;
        }
        if weight == 1.0 {
            let mut frame = self.frames[hi].clone();
            frame.id = id;
            return frame;
        }

        let a = &self.frames[lo];
        let b = &self.frames[hi];
        let mut frame = TelemetryFrame::new(id);
        frame.timestamp = Some(target);

        for field in NUMERIC_FIELDS {
            let value = match ((field.get)(a), (field.get)(b)) {
                (Some(va), Some(vb)) => Some(self.interpolate(field.policy, va, vb, weight)),
                (Some(va), None) => Some(va),
                (None, Some(vb)) => Some(vb),
                (None, None) => None,
            };
            if let Some(value) = value {
                (field.set)(&mut frame, value);
            }
        }
        // Flags and strings take the earlier bracket frame below weight 1
        // (the boundary convention handled above).
        for field in FLAG_FIELDS {
            if let Some(value) = (field.get)(a).or_else(|| (field.get)(b)) {
                (field.set)(&mut frame, value);
            }
        }
        for field in TEXT_FIELDS {
            if let Some(value) = (field.get)(a).or_else(|| (field.get)(b)) {
                (field.set)(&mut frame, value);
            }
        }
        frame
    }

    fn interpolate(&self, policy: InterpolationPolicy, a: f64, b: f64, weight: f64) -> f64 {
        match policy {
            InterpolationPolicy::Linear => lerp(a, b, weight),
            InterpolationPolicy::AngularDegrees => lerp_degrees(a, b, weight),
            InterpolationPolicy::Latitude => {
                lerp_crossing(a, b, weight, self.wrap.latitude_threshold_deg, 90.0)
            }
            InterpolationPolicy::Longitude => {
                lerp_crossing(a, b, weight, self.wrap.longitude_threshold_deg, 180.0)
            }
        }
    }
}

fn elapsed_seconds(start: DateTime<Utc>, t: DateTime<Utc>) -> f64 {
    let delta = t - start;
    delta.num_microseconds().map_or_else(
        || delta.num_milliseconds() as f64 / 1e3,
        |us| us as f64 / 1e6,
    )
}

fn lerp(a: f64, b: f64, weight: f64) -> f64 {
    a + (b - a) * weight
}

/// Shortest-arc interpolation for angles in degrees: the source pair is
/// unwrapped (discontinuity over 180° removed) and the result re-wrapped into
/// [0, 360), so 350° to 10° passes through 0°, not 180°.
fn lerp_degrees(a: f64, b: f64, weight: f64) -> f64 {
    let mut delta = (b - a).rem_euclid(360.0);
    if delta > 180.0 {
        delta -= 360.0;
    }
    (a + delta * weight).rem_euclid(360.0)
}

/// Threshold-based crossing interpolation for geographic coordinates with
/// valid range [-limit, limit]. When the endpoints sit on opposite sides of
/// ±threshold, the value travels the shorter path through ±limit and wraps by
/// the full period; otherwise this is plain linear interpolation.
fn lerp_crossing(a: f64, b: f64, weight: f64, threshold: f64, limit: f64) -> f64 {
    let period = 2.0 * limit;
    if a < -threshold && b > threshold {
        // Descending through -limit, re-entering from +limit.
        let distance = ((limit + a) + (limit - b)) * weight;
        let value = a - distance;
        if value < -limit {
            value + period
        } else {
            value
        }
    } else if b < -threshold && a > threshold {
        let distance = ((limit - a) + (limit + b)) * weight;
        let value = a + distance;
        if value > limit {
            value - period
        } else {
            value
        }
    } else {
        lerp(a, b, weight)
    }
}

/// Boundary-clamped piecewise-linear resampling of a series, used by the
/// temporal aligner: outside the source range the end values are held, not
/// extrapolated.
pub(crate) fn lerp_series(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    debug_assert_eq!(xs.len(), ys.len());
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[xs.len() - 1] {
        return ys[ys.len() - 1];
    }
    let hi = xs.partition_point(|&v| v <= x).clamp(1, xs.len() - 1);
    let lo = hi - 1;
    let dt = xs[hi] - xs[lo];
    if dt == 0.0 {
        return ys[lo];
    }
    lerp(ys[lo], ys[hi], (x - xs[lo]) / dt)
}
