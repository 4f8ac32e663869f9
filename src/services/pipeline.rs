use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use nalgebra::{Matrix3, Rotation3, UnitQuaternion};
use tracing::info;

use crate::error::{ExtractError, Result};
use crate::models::{Image, TelemetryFrame};
use crate::services::aligner::{AlignmentResult, TemporalAligner};
use crate::services::colmap_io::write_images;
use crate::services::flight_log::{video_offset_ms, video_segment, FlightLogParser};
use crate::services::geo::{DemOrigin, UtmProjection, SURVEY_UTM_ZONE};
use crate::services::interpolator::TimeInterpolator;
use crate::services::srt_parser::SrtParser;
use crate::services::TelemetryParser;

/// Subtitle frames of all videos concatenated, with the per-frame video index.
#[derive(Debug)]
pub struct SubtitleSet {
    pub frames: Vec<TelemetryFrame>,
    pub frame_to_video: Vec<usize>,
    pub num_videos: usize,
}

impl SubtitleSet {
    /// The frames belonging to one video, cloned out of the combined set.
    pub fn frames_for_video(&self, video: usize) -> Vec<TelemetryFrame> {
        self.frames
            .iter()
            .zip(&self.frame_to_video)
            .filter(|(_, &v)| v == video)
            .map(|(f, _)| f.clone())
            .collect()
    }
}

/// One image handed back by the video-decoding collaborator: the file it
/// wrote and the telemetry timestamp it corresponds to.
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    pub file_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Parses the subtitle files of a recording session into one combined frame
/// sequence. Caption timestamps are device wall-clock; `utc_offset_seconds`
/// is subtracted to bring them to UTC (owning "local time" is left to the
/// caller).
pub fn parse_subtitle_files(paths: &[PathBuf], utc_offset_seconds: i64) -> Result<SubtitleSet> {
    let parser = SrtParser::new();
    let mut frames = Vec::new();
    let mut frame_to_video = Vec::new();
    let mut num_videos = 0;

    for path in paths {
        let mut parsed = parser.parse_path(path)?;
        for frame in &mut parsed {
            frame.shift_timestamp(Duration::seconds(-utc_offset_seconds));
        }
        frame_to_video.extend(std::iter::repeat(num_videos).take(parsed.len()));
        frames.append(&mut parsed);
        num_videos += 1;
    }
    Ok(SubtitleSet {
        frames,
        frame_to_video,
        num_videos,
    })
}

/// Rebuilds every flight-log timestamp from the first timestamped frame and
/// the per-frame millisecond offsets. Flight logs can arbitrarily miss
/// datetime cells; the millisecond column is always present.
pub fn rebase_log_timestamps(frames: &mut [TelemetryFrame]) -> Result<()> {
    let start = frames
        .iter()
        .find_map(|f| f.timestamp)
        .ok_or_else(|| ExtractError::MalformedInput("flight log has no timestamps".to_string()))?;
    let first_ms = frames
        .first()
        .and_then(|f| f.time_ms)
        .ok_or_else(|| ExtractError::MalformedInput("flight log has no time offsets".to_string()))?;

    for frame in frames.iter_mut() {
        let ms = frame.time_ms.ok_or_else(|| {
            ExtractError::MalformedInput(format!("frame {} has no time offset", frame.id))
        })?;
        frame.timestamp = Some(start + Duration::milliseconds((ms - first_ms).round() as i64));
    }
    Ok(())
}

/// Parses the flight log and reduces it to the segment recorded as the video
/// starting near `video_start`.
pub fn video_flight_frames<P: AsRef<Path>>(
    log_path: P,
    video_start: DateTime<Utc>,
) -> Result<Vec<TelemetryFrame>> {
    let mut frames = FlightLogParser::new().parse_path(log_path)?;
    rebase_log_timestamps(&mut frames)?;
    let offset_ms = video_offset_ms(&frames, video_start)?;
    Ok(video_segment(&frames, offset_ms)?.to_vec())
}

/// Finds the subtitle-to-flight-log time offset and applies it to every
/// subtitle frame.
pub fn synchronize(
    subtitles: &mut SubtitleSet,
    log_frames: &[TelemetryFrame],
) -> Result<AlignmentResult> {
    let result = TemporalAligner::new().align(&subtitles.frames, log_frames)?;
    let delta = Duration::milliseconds((result.offset_seconds * 1e3).round() as i64);
    for frame in &mut subtitles.frames {
        frame.shift_timestamp(delta);
    }
    info!(
        offset_seconds = result.offset_seconds,
        final_mse = result.final_mse,
        "applied subtitle time offset"
    );
    Ok(result)
}

/// Maps world axes to the reconstruction camera axes: Y and Z flip.
fn axis_flip() -> Matrix3<f64> {
    Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0)
}

/// Synthesizes the prior pose for one interpolated telemetry frame.
///
/// Translation: UTM-projected position relative to the elevation-model
/// origin, height from the altitude difference. Rotation: gimbal pitch
/// raised by 90° (the gimbal's zero faces forward, the reconstruction's
/// faces down), zero roll, compass heading as yaw. Both are mapped through
/// the fixed axis flip; the quaternion is returned in (w, x, y, z) order.
pub fn frame_pose(
    frame: &TelemetryFrame,
    origin: &DemOrigin,
    projection: &UtmProjection,
) -> Result<([f64; 4], [f64; 3])> {
    let (Some(latitude), Some(longitude)) = (frame.latitude, frame.longitude) else {
        return Err(ExtractError::MalformedInput(format!(
            "frame {} has no position fix",
            frame.id
        )));
    };
    let (easting, northing) = projection.project(latitude, longitude);
    let height_diff = frame.altitude.unwrap_or(0.0) - origin.altitude;
    let t = axis_flip()
        * nalgebra::Vector3::new(easting - origin.easting, northing - origin.northing, height_diff);

    let pitch_deg = frame.gimbal_pitch.map_or(0.0, |p| p + 90.0).rem_euclid(360.0);
    let heading_deg = frame.compass_heading.unwrap_or(0.0).rem_euclid(360.0);
    let rotation = Rotation3::from_euler_angles(pitch_deg.to_radians(), 0.0, heading_deg.to_radians());

    let flipped = axis_flip() * rotation.matrix();
    let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(flipped));
    Ok(([q.w, q.i, q.j, q.k], [t.x, t.y, t.z]))
}

/// Everything the extraction needs besides the video decoder.
#[derive(Debug, Clone)]
pub struct ReconstructionRequest {
    /// Video files; each is expected to have a subtitle file of the same
    /// base name next to it.
    pub video_files: Vec<PathBuf>,
    pub dem_config_file: PathBuf,
    pub flight_log_file: PathBuf,
    pub output_dir: PathBuf,
    /// Camera id written into every image entry.
    pub camera_id: u32,
    /// UTC offset of the device wall clock the captions were stamped with.
    pub utc_offset_seconds: i64,
}

/// Runs the full extraction: parse subtitles, cut the flight log to the video
/// segment, align the two streams, let the collaborator decode video frames,
/// interpolate telemetry at the image timestamps, and write the posed image
/// file. Returns the number of images written.
///
/// `extract_frames` is the video-decoding collaborator: given a video path,
/// that video's aligned subtitle frames, and the image target directory, it
/// decodes frames and reports what it wrote.
pub fn create_reconstruction<F>(
    request: &ReconstructionRequest,
    mut extract_frames: F,
) -> anyhow::Result<usize>
where
    F: FnMut(&Path, &[TelemetryFrame], &Path) -> anyhow::Result<Vec<ExtractedImage>>,
{
    let images_dir = request.output_dir.join("images");
    fs::create_dir_all(&images_dir).context("creating image output directory")?;

    let subtitle_files: Vec<PathBuf> = request
        .video_files
        .iter()
        .map(|v| v.with_extension("srt"))
        .collect();
    let mut subtitles = parse_subtitle_files(&subtitle_files, request.utc_offset_seconds)
        .context("parsing subtitle telemetry")?;
    let video_start = subtitles
        .frames
        .first()
        .and_then(|f| f.timestamp)
        .ok_or_else(|| anyhow!("subtitle stream is empty"))?;

    let log_frames = video_flight_frames(&request.flight_log_file, video_start)
        .context("reducing flight log to the video segment")?;
    synchronize(&mut subtitles, &log_frames).context("aligning telemetry streams")?;

    let mut images = Vec::new();
    for (video, video_file) in request.video_files.iter().enumerate() {
        let frames = subtitles.frames_for_video(video);
        let extracted = extract_frames(video_file, &frames, &images_dir)
            .with_context(|| format!("extracting frames from {}", video_file.display()))?;
        images.extend(extracted);
    }
    info!(count = images.len(), "collected extracted images");

    let timestamps: Vec<DateTime<Utc>> = images.iter().map(|i| i.timestamp).collect();
    let interpolated = TimeInterpolator::new(log_frames)?.sample_at(&timestamps);

    let projection = UtmProjection::zone(SURVEY_UTM_ZONE);
    let origin = DemOrigin::load(&request.dem_config_file, &projection);

    let posed: Vec<Image> = images
        .iter()
        .zip(&interpolated)
        .enumerate()
        .map(|(i, (image, frame))| {
            let (r_quat, t_vec) = frame_pose(frame, &origin, &projection)?;
            Ok(Image::new(
                i as u32,
                r_quat,
                t_vec,
                request.camera_id,
                image.file_name.clone(),
                Vec::new(),
            ))
        })
        .collect::<Result<_>>()?;

    write_images(request.output_dir.join("images.txt"), &posed)
        .context("writing posed image file")?;
    Ok(posed.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ts(seconds: f64) -> DateTime<Utc> {
        let base: DateTime<Utc> = "2023-06-01T10:00:00Z".parse().unwrap();
        base + Duration::milliseconds((seconds * 1e3).round() as i64)
    }

    #[test]
    fn test_rebase_log_timestamps() {
        let mut frames: Vec<TelemetryFrame> = (0..4)
            .map(|i| {
                let mut f = TelemetryFrame::new(i);
                f.time_ms = Some(500.0 + i as f64 * 100.0);
                f
            })
            .collect();
        // Only the third row carries a datetime.
        frames[2].timestamp = Some(ts(10.0));

        rebase_log_timestamps(&mut frames).unwrap();
        assert_eq!(frames[0].timestamp, Some(ts(10.0)));
        assert_eq!(frames[1].timestamp, Some(ts(10.1)));
        assert_eq!(frames[3].timestamp, Some(ts(10.3)));
    }

    #[test]
    fn test_rebase_requires_some_timestamp() {
        let mut frames = vec![TelemetryFrame::new(0)];
        frames[0].time_ms = Some(0.0);
        assert!(matches!(
            rebase_log_timestamps(&mut frames),
            Err(ExtractError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_frame_pose_translation() {
        let projection = UtmProjection::zone(SURVEY_UTM_ZONE);
        let mut origin = DemOrigin::default();
        let (oe, on) = projection.project(48.0, 15.0);
        origin.easting = oe;
        origin.northing = on;
        origin.altitude = 100.0;

        let mut frame = TelemetryFrame::new(0);
        frame.latitude = Some(48.0);
        frame.longitude = Some(15.0);
        frame.altitude = Some(150.0);

        let (_, t_vec) = frame_pose(&frame, &origin, &projection).unwrap();
        assert_relative_eq!(t_vec[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(t_vec[1], 0.0, epsilon = 1e-9);
        // Height difference of +50 m flips with the Z axis.
        assert_relative_eq!(t_vec[2], -50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_frame_pose_default_orientation() {
        let projection = UtmProjection::zone(SURVEY_UTM_ZONE);
        let origin = DemOrigin::default();
        let mut frame = TelemetryFrame::new(0);
        frame.latitude = Some(0.0);
        frame.longitude = Some(15.0);

        // No gimbal pitch and no heading: pitch defaults to 0 (not 90), so
        // the rotation is the bare axis flip composed with identity.
        let (r_quat, _) = frame_pose(&frame, &origin, &projection).unwrap();
        let q = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
            r_quat[0], r_quat[1], r_quat[2], r_quat[3],
        ));
        let m = q.to_rotation_matrix();
        assert_relative_eq!(m[(0, 0)], 1.0, epsilon = 1e-9);
        assert_relative_eq!(m[(1, 1)], -1.0, epsilon = 1e-9);
        assert_relative_eq!(m[(2, 2)], -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_frame_pose_gimbal_pitch_raised() {
        let projection = UtmProjection::zone(SURVEY_UTM_ZONE);
        let origin = DemOrigin::default();
        let mut frame = TelemetryFrame::new(0);
        frame.latitude = Some(0.0);
        frame.longitude = Some(15.0);
        frame.gimbal_pitch = Some(-90.0);
        frame.compass_heading = Some(0.0);

        // Gimbal pointing straight down becomes a zero X rotation after the
        // +90 raise: flip-only orientation again.
        let (r_quat, _) = frame_pose(&frame, &origin, &projection).unwrap();
        let q = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
            r_quat[0], r_quat[1], r_quat[2], r_quat[3],
        ));
        let m = q.to_rotation_matrix();
        assert_relative_eq!(m[(0, 0)], 1.0, epsilon = 1e-9);
        assert_relative_eq!(m[(1, 1)], -1.0, epsilon = 1e-9);
        assert_relative_eq!(m[(2, 2)], -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_frame_pose_requires_position() {
        let projection = UtmProjection::zone(SURVEY_UTM_ZONE);
        let origin = DemOrigin::default();
        let frame = TelemetryFrame::new(0);
        assert!(matches!(
            frame_pose(&frame, &origin, &projection),
            Err(ExtractError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_subtitle_set_video_split() {
        let mut frames = Vec::new();
        let mut frame_to_video = Vec::new();
        for video in 0..2 {
            for i in 0..3 {
                let mut f = TelemetryFrame::new(i);
                f.frame_cnt = Some((video * 3 + i as usize) as f64);
                frames.push(f);
                frame_to_video.push(video);
            }
        }
        let set = SubtitleSet {
            frames,
            frame_to_video,
            num_videos: 2,
        };
        let second = set.frames_for_video(1);
        assert_eq!(second.len(), 3);
        assert_eq!(second[0].frame_cnt, Some(3.0));
    }
}
