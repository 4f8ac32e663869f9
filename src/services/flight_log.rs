use std::collections::HashMap;
use std::io::Read;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};
use tracing::debug;

use crate::error::{ExtractError, Result};
use crate::models::TelemetryFrame;
use crate::services::TelemetryParser;

/// Maximum distance between a video timestamp and the closest photo/video
/// marker in the flight log before synchronization is considered failed.
const VIDEO_OFFSET_TOLERANCE_SECONDS: i64 = 60;

const FEET_PER_METER: f64 = 3.28;
const KMH_PER_MPH: f64 = 1.6093;

/// Parser for delimited flight-log exports.
///
/// The header row names each column, optionally with a parenthesized unit
/// suffix (e.g. `height_above_takeoff(feet)`). Units are stripped into a
/// unit table and recognized ones are normalized at parse time.
pub struct FlightLogParser {
    delimiter: u8,
}

impl FlightLogParser {
    pub fn new() -> Self {
        Self { delimiter: b',' }
    }

    pub fn with_delimiter(delimiter: u8) -> Self {
        Self { delimiter }
    }

    /// Streaming entry point: one frame per data row, lazily.
    pub fn frames<R: Read>(
        &self,
        reader: R,
        skip: usize,
        limit: Option<usize>,
    ) -> FlightLogFrames<R> {
        let records = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(reader)
            .into_records();
        FlightLogFrames {
            records,
            header: None,
            next_id: 0,
            skip,
            limit,
            accepted: 0,
        }
    }
}

impl Default for FlightLogParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryParser for FlightLogParser {
    /// Batch entry point: collects the streaming iterator.
    fn parse_reader<R: Read>(
        &self,
        reader: R,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<TelemetryFrame>> {
        self.frames(reader, skip, limit).collect()
    }
}

struct Header {
    names: Vec<String>,
    units: HashMap<String, String>,
}

/// Lazy frame iterator over flight-log rows.
pub struct FlightLogFrames<R: Read> {
    records: StringRecordsIntoIter<R>,
    header: Option<Header>,
    next_id: u32,
    skip: usize,
    limit: Option<usize>,
    accepted: usize,
}

impl<R: Read> Iterator for FlightLogFrames<R> {
    type Item = Result<TelemetryFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(limit) = self.limit {
            if self.accepted >= limit {
                return None;
            }
        }
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(err) => return Some(Err(err.into())),
            };
            if self.header.is_none() {
                self.header = Some(parse_header(&record));
                continue;
            }
            let header = self.header.as_ref().expect("header parsed above");

            let id = self.next_id;
            self.next_id += 1;
            if (id as usize) < self.skip {
                continue;
            }

            let frame = parse_row(header, &record, id);
            self.accepted += 1;
            return Some(Ok(frame));
        }
    }
}

fn parse_header(record: &StringRecord) -> Header {
    let mut names = Vec::with_capacity(record.len());
    let mut units = HashMap::new();
    for column in record.iter() {
        if let Some(open) = column.find('(') {
            let name = column[..open].trim().to_string();
            let unit = column[open + 1..].trim_end_matches(')').to_string();
            units.insert(name.clone(), unit);
            names.push(name);
        } else {
            names.push(column.trim().to_string());
        }
    }
    Header { names, units }
}

fn parse_row(header: &Header, record: &StringRecord, id: u32) -> TelemetryFrame {
    let mut frame = TelemetryFrame::new(id);
    for (i, raw) in record.iter().enumerate() {
        let Some(name) = header.names.get(i) else {
            continue;
        };
        let cell = classify_cell(raw.trim(), header.units.get(name).map(String::as_str));
        apply_cell(&mut frame, name, cell);
    }
    frame
}

/// A classified flight-log cell value.
enum Cell {
    Empty,
    Number(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

/// Digit-shape check mirroring the export format: a numeric cell contains
/// only digits plus `.`, `-`, and `e`.
fn looks_numeric(value: &str) -> bool {
    value.chars().any(|c| c.is_ascii_digit())
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | 'e'))
}

fn classify_cell(value: &str, unit: Option<&str>) -> Cell {
    if value.is_empty() {
        return Cell::Empty;
    }
    if looks_numeric(value) {
        if let Ok(number) = value.parse::<f64>() {
            return Cell::Number(normalize_unit(number, unit));
        }
    }
    // Flight logs carry datetimes in UTC without an explicit zone marker.
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Cell::Timestamp(Utc.from_utc_datetime(&naive));
    }
    Cell::Text(value.to_string())
}

fn normalize_unit(value: f64, unit: Option<&str>) -> f64 {
    match unit.map(str::to_ascii_lowercase).as_deref() {
        Some("feet") => value / FEET_PER_METER,
        Some("mph") => value * KMH_PER_MPH,
        _ => value,
    }
}

fn apply_cell(frame: &mut TelemetryFrame, name: &str, cell: Cell) {
    let number = match &cell {
        Cell::Number(n) => Some(*n),
        _ => None,
    };
    match name {
        "time" => frame.time_ms = number,
        "datetime" => {
            if let Cell::Timestamp(ts) = cell {
                frame.timestamp = Some(ts);
            }
        }
        "latitude" => frame.latitude = number,
        "longitude" => frame.longitude = number,
        "height_above_takeoff" => frame.height_above_takeoff = number,
        "altitude_above_seaLevel" => frame.altitude_above_sea_level = number,
        "altitude" => frame.altitude = number,
        "speed" => frame.speed = number,
        "distance" => frame.distance = number,
        "mileage" => frame.mileage = number,
        "satellites" => frame.satellites = number,
        "gpslevel" => frame.gps_level = number,
        "voltage" => frame.voltage = number,
        "xSpeed" => frame.x_speed = number,
        "ySpeed" => frame.y_speed = number,
        "zSpeed" => frame.z_speed = number,
        "compass_heading" => frame.compass_heading = number,
        "pitch" => frame.pitch = number,
        "roll" => frame.roll = number,
        "isPhoto" => frame.is_photo = number.map(|n| n != 0.0),
        "isVideo" => frame.is_video = number.map(|n| n != 0.0),
        "gimbal_heading" => frame.gimbal_heading = number,
        "gimbal_pitch" => frame.gimbal_pitch = number,
        "gimbal_roll" => frame.gimbal_roll = number,
        "battery_percent" => frame.battery_percent = number,
        "flycState" => {
            if let Cell::Text(text) = cell {
                frame.fly_state = Some(text);
            }
        }
        "message" => {
            if let Cell::Text(text) = cell {
                frame.message = Some(text);
            }
        }
        // Columns outside the fixed frame field set are ignored.
        _ => {}
    }
}

/// Returns the millisecond offset (into the flight log) of the photo/video
/// marker closest in time to `video_time`.
///
/// Fails with [`ExtractError::SynchronizationFailure`] when no marker lies
/// within the 60-second tolerance.
pub fn video_offset_ms(frames: &[TelemetryFrame], video_time: DateTime<Utc>) -> Result<i64> {
    let mut best: Option<(&TelemetryFrame, chrono::Duration)> = None;
    for frame in frames {
        if frame.is_video != Some(true) && frame.is_photo != Some(true) {
            continue;
        }
        let Some(ts) = frame.timestamp else {
            continue;
        };
        let diff = (ts - video_time).abs();
        match best {
            None => best = Some((frame, diff)),
            Some((_, min_diff)) => {
                if diff < min_diff {
                    best = Some((frame, diff));
                } else if diff > min_diff {
                    // Markers are time-ordered, so the distance only grows
                    // from here.
                    break;
                }
            }
        }
    }

    let (frame, diff) = best.ok_or_else(|| {
        ExtractError::SynchronizationFailure("no photo or video markers in flight log".to_string())
    })?;
    if diff > chrono::Duration::seconds(VIDEO_OFFSET_TOLERANCE_SECONDS) {
        return Err(ExtractError::SynchronizationFailure(format!(
            "closest marker is {}s away from the video timestamp (> {}s)",
            diff.num_seconds(),
            VIDEO_OFFSET_TOLERANCE_SECONDS
        )));
    }
    let time_ms = frame.time_ms.ok_or_else(|| {
        ExtractError::MalformedInput(format!("frame {} has no time offset", frame.id))
    })?;
    debug!(frame = frame.id, offset_ms = time_ms, "matched video marker");
    Ok(time_ms.round() as i64)
}

/// First and last frame timestamps, or `None` when the log carries fewer than
/// two timestamped rows.
pub fn time_bounds(frames: &[TelemetryFrame]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    if frames.len() < 2 {
        return None;
    }
    let start = frames.first()?.timestamp?;
    let end = frames.last()?.timestamp?;
    Some((start, end))
}

/// The contiguous run of video-flagged frames starting at or after
/// `ms_offset`: the segment recorded as one video.
pub fn video_segment(frames: &[TelemetryFrame], ms_offset: i64) -> Result<&[TelemetryFrame]> {
    let in_video = |frame: &TelemetryFrame| {
        frame.is_video == Some(true) && frame.time_ms.map_or(false, |t| t >= ms_offset as f64)
    };

    let first_idx = frames.iter().position(in_video).ok_or_else(|| {
        ExtractError::MalformedInput("no video-flagged frames at or after the offset".to_string())
    })?;
    let last_idx = frames[first_idx..]
        .iter()
        .position(|f| f.is_video != Some(true))
        .map(|rel| first_idx + rel - 1)
        .unwrap_or(frames.len() - 1);

    if first_idx >= last_idx {
        return Err(ExtractError::MalformedInput(format!(
            "frames {first_idx} and {last_idx} do not form a valid video"
        )));
    }
    if first_idx > 0 && frames[first_idx - 1].is_video == Some(true) {
        return Err(ExtractError::MalformedInput(format!(
            "frame {first_idx} is not the start of a video recording"
        )));
    }
    if last_idx + 1 < frames.len() && frames[last_idx + 1].is_video == Some(true) {
        return Err(ExtractError::MalformedInput(format!(
            "frame {last_idx} is not the end of a video recording"
        )));
    }
    Ok(&frames[first_idx..=last_idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const LOG: &str = "\
time(millisecond),datetime(utc),latitude,longitude,height_above_takeoff(feet),speed(mph),compass_heading(degrees),isPhoto,isVideo,flycState,message
0,2023-06-01 10:00:00,48.1,11.5,10,2,350,0,0,GPS_Atti,
1000,2023-06-01 10:00:01,48.2,11.6,20,4,355,0,1,GPS_Atti,recording
2000,2023-06-01 10:00:02,48.3,11.7,30,6,5,0,1,GPS_Atti,
3000,2023-06-01 10:00:03,48.4,11.8,40,8,10,0,0,GPS_Atti,
";

    fn parse_log() -> Vec<TelemetryFrame> {
        FlightLogParser::new()
            .parse_reader(LOG.as_bytes(), 0, None)
            .unwrap()
    }

    #[test]
    fn test_unit_normalization() {
        let frames = parse_log();
        assert_eq!(frames.len(), 4);
        assert_relative_eq!(frames[0].height_above_takeoff.unwrap(), 10.0 / 3.28);
        assert_relative_eq!(frames[1].speed.unwrap(), 4.0 * 1.6093);
        // Unrecognized units are left untouched.
        assert_relative_eq!(frames[0].time_ms.unwrap(), 0.0);
    }

    #[test]
    fn test_cell_classification() {
        let frames = parse_log();
        assert_eq!(
            frames[0].timestamp,
            Some("2023-06-01T10:00:00Z".parse().unwrap())
        );
        assert_eq!(frames[1].fly_state.as_deref(), Some("GPS_Atti"));
        assert_eq!(frames[1].message.as_deref(), Some("recording"));
        // Empty trailing cell stays absent.
        assert_eq!(frames[0].message, None);
        assert_eq!(frames[1].is_video, Some(true));
        assert_eq!(frames[0].is_video, Some(false));
    }

    #[test]
    fn test_frame_ids_and_skip_limit() {
        let frames = parse_log();
        assert_eq!(frames.iter().map(|f| f.id).collect::<Vec<_>>(), [0, 1, 2, 3]);

        let parser = FlightLogParser::new();
        let windowed = parser.parse_reader(LOG.as_bytes(), 1, Some(2)).unwrap();
        assert_eq!(windowed.iter().map(|f| f.id).collect::<Vec<_>>(), [1, 2]);
    }

    #[test]
    fn test_video_offset_within_tolerance() {
        let frames = parse_log();
        let target = "2023-06-01T10:00:01.200Z".parse().unwrap();
        assert_eq!(video_offset_ms(&frames, target).unwrap(), 1000);
    }

    #[test]
    fn test_video_offset_too_far() {
        let frames = parse_log();
        let target = "2023-06-01T10:05:00Z".parse().unwrap();
        assert!(matches!(
            video_offset_ms(&frames, target),
            Err(ExtractError::SynchronizationFailure(_))
        ));
    }

    #[test]
    fn test_time_bounds() {
        let frames = parse_log();
        let (start, end) = time_bounds(&frames).unwrap();
        assert_eq!(start, "2023-06-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(end, "2023-06-01T10:00:03Z".parse::<DateTime<Utc>>().unwrap());
        assert!(time_bounds(&frames[..1]).is_none());
    }

    #[test]
    fn test_video_segment() {
        let frames = parse_log();
        let segment = video_segment(&frames, 1000).unwrap();
        assert_eq!(segment.len(), 2);
        assert_eq!(segment[0].id, 1);
        assert_eq!(segment[1].id, 2);
    }

    #[test]
    fn test_video_segment_requires_run() {
        let frames = parse_log();
        // Only one video frame at/after offset 2000: not a valid run.
        assert!(matches!(
            video_segment(&frames, 2000),
            Err(ExtractError::MalformedInput(_))
        ));
    }
}
