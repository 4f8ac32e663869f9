use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::Result;
use crate::models::TelemetryFrame;

pub mod aligner;
pub mod colmap_io;
pub mod flight_log;
pub mod geo;
pub mod interpolator;
pub mod nerfstudio;
pub mod pipeline;
pub mod srt_parser;

pub use aligner::{AlignmentResult, TemporalAligner};
pub use flight_log::FlightLogParser;
pub use geo::{DemOrigin, UtmProjection, SURVEY_UTM_ZONE};
pub use interpolator::{TimeInterpolator, WrapConfig};
pub use nerfstudio::{colmap_to_nerfstudio, TransformsDocument};
pub use pipeline::{create_reconstruction, ExtractedImage, ReconstructionRequest, SubtitleSet};
pub use srt_parser::SrtParser;

/// Shared contract of the two telemetry parsers: produce a frame sequence
/// from a byte source, restartable per call.
///
/// `parse_reader` is the batch entry point; both implementations also expose
/// a `frames` method returning the underlying lazy iterator for streaming
/// consumption.
pub trait TelemetryParser {
    fn parse_reader<R: Read>(
        &self,
        reader: R,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<TelemetryFrame>>;

    /// Opens the file and parses it completely; the handle is released on
    /// every exit path.
    fn parse_path<P: AsRef<Path>>(&self, path: P) -> Result<Vec<TelemetryFrame>> {
        let file = File::open(path)?;
        self.parse_reader(BufReader::new(file), 0, None)
    }
}
