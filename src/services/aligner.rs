use argmin::core::{CostFunction, Error as SolverError, Executor, State};
use argmin::solver::neldermead::NelderMead;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{ExtractError, Result};
use crate::models::TelemetryFrame;
use crate::services::interpolator::lerp_series;

/// Outcome of the time-offset search.
///
/// `final_mse` is the objective value at the found offset; convergence is not
/// guaranteed for pathological (non-unimodal) error surfaces, so callers
/// should sanity-check it before trusting the offset.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentResult {
    pub offset_seconds: f64,
    pub final_mse: f64,
}

/// Finds the scalar time offset between the subtitle stream and the
/// flight-log stream that best aligns their positions.
///
/// The objective is the mean squared lat/lon error between the subtitle
/// stream's own positions and the flight-log positions resampled at
/// `subtitle_time + offset`; it is minimized with a derivative-free
/// Nelder-Mead simplex starting from offset 0.
pub struct TemporalAligner {
    max_iters: u64,
    sd_tolerance: f64,
}

impl TemporalAligner {
    pub fn new() -> Self {
        Self {
            max_iters: 200,
            sd_tolerance: 1e-10,
        }
    }

    pub fn with_max_iters(mut self, max_iters: u64) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn align(
        &self,
        subtitle_frames: &[TelemetryFrame],
        log_frames: &[TelemetryFrame],
    ) -> Result<AlignmentResult> {
        let cost = OffsetCost::from_frames(subtitle_frames, log_frames)?;

        // A 1-D simplex is a pair of points around the zero starting offset.
        let solver = NelderMead::new(vec![vec![0.0], vec![1.0]])
            .with_sd_tolerance(self.sd_tolerance)
            .map_err(|e| ExtractError::Alignment(e.to_string()))?;
        let result = Executor::new(cost, solver)
            .configure(|state| state.max_iters(self.max_iters))
            .run()
            .map_err(|e| ExtractError::Alignment(e.to_string()))?;

        let state = result.state();
        let offset_seconds = state
            .get_best_param()
            .and_then(|p| p.first().copied())
            .ok_or_else(|| ExtractError::Alignment("no best parameter found".to_string()))?;
        let final_mse = state.get_best_cost();
        debug!(offset_seconds, final_mse, "aligned subtitle stream");
        Ok(AlignmentResult {
            offset_seconds,
            final_mse,
        })
    }
}

impl Default for TemporalAligner {
    fn default() -> Self {
        Self::new()
    }
}

/// Precomputed series for the MSE objective: everything in elapsed seconds
/// from the first flight-log frame.
struct OffsetCost {
    subtitle_seconds: Vec<f64>,
    subtitle_lats: Vec<f64>,
    subtitle_lons: Vec<f64>,
    log_seconds: Vec<f64>,
    log_lats: Vec<f64>,
    log_lons: Vec<f64>,
}

impl OffsetCost {
    fn from_frames(
        subtitle_frames: &[TelemetryFrame],
        log_frames: &[TelemetryFrame],
    ) -> Result<Self> {
        let start = log_frames
            .first()
            .and_then(|f| f.timestamp)
            .ok_or_else(|| {
                ExtractError::MalformedInput(
                    "flight-log stream is empty or missing timestamps".to_string(),
                )
            })?;

        let mut log_seconds = Vec::with_capacity(log_frames.len());
        let mut log_lats = Vec::with_capacity(log_frames.len());
        let mut log_lons = Vec::with_capacity(log_frames.len());
        for frame in log_frames {
            let (Some(ts), Some(lat), Some(lon)) =
                (frame.timestamp, frame.latitude, frame.longitude)
            else {
                continue;
            };
            log_seconds.push(seconds_from(start, ts));
            log_lats.push(lat);
            log_lons.push(lon);
        }

        let mut subtitle_seconds = Vec::with_capacity(subtitle_frames.len());
        let mut subtitle_lats = Vec::with_capacity(subtitle_frames.len());
        let mut subtitle_lons = Vec::with_capacity(subtitle_frames.len());
        for frame in subtitle_frames {
            let (Some(ts), Some(lat), Some(lon)) =
                (frame.timestamp, frame.latitude, frame.longitude)
            else {
                continue;
            };
            subtitle_seconds.push(seconds_from(start, ts));
            subtitle_lats.push(lat);
            subtitle_lons.push(lon);
        }

        if log_seconds.is_empty() || subtitle_seconds.is_empty() {
            return Err(ExtractError::MalformedInput(
                "alignment needs positioned frames in both streams".to_string(),
            ));
        }
        Ok(Self {
            subtitle_seconds,
            subtitle_lats,
            subtitle_lons,
            log_seconds,
            log_lats,
            log_lons,
        })
    }

    fn mse(&self, offset: f64) -> f64 {
        let mut sum = 0.0;
        for i in 0..self.subtitle_seconds.len() {
            let t = self.subtitle_seconds[i] + offset;
            let lon = lerp_series(&self.log_seconds, &self.log_lons, t);
            let lat = lerp_series(&self.log_seconds, &self.log_lats, t);
            let d_lon = lon - self.subtitle_lons[i];
            let d_lat = lat - self.subtitle_lats[i];
            sum += d_lon * d_lon + d_lat * d_lat;
        }
        sum / self.subtitle_seconds.len() as f64
    }
}

impl CostFunction for OffsetCost {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> std::result::Result<Self::Output, SolverError> {
        Ok(self.mse(param[0]))
    }
}

fn seconds_from(start: DateTime<Utc>, t: DateTime<Utc>) -> f64 {
    (t - start).num_milliseconds() as f64 / 1e3
}
