use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

/// UTM zone the survey poses are projected into.
pub const SURVEY_UTM_ZONE: u32 = 33;

// WGS-84 ellipsoid.
const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;

const UTM_SCALE: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;

/// Forward transverse-Mercator projection for one UTM zone (northern
/// hemisphere), using the Krüger series to fourth order in the third
/// flattening. Millimeter-level agreement with geodesy-library output over a
/// survey area.
#[derive(Debug, Clone, Copy)]
pub struct UtmProjection {
    central_meridian_deg: f64,
}

impl UtmProjection {
    pub fn zone(zone: u32) -> Self {
        Self {
            central_meridian_deg: zone as f64 * 6.0 - 183.0,
        }
    }

    /// Projects WGS-84 degrees to (easting, northing) meters.
    pub fn project(&self, latitude_deg: f64, longitude_deg: f64) -> (f64, f64) {
        let n = WGS84_F / (2.0 - WGS84_F);
        let n2 = n * n;
        let n3 = n2 * n;
        let radius = WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0);

        let alpha = [
            n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
            13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
            61.0 * n3 / 240.0,
        ];

        let phi = latitude_deg.to_radians();
        let lambda = (longitude_deg - self.central_meridian_deg).to_radians();

        let e = (WGS84_F * (2.0 - WGS84_F)).sqrt();
        let t = (phi.sin().atanh() - e * (e * phi.sin()).atanh()).sinh();

        let xi = t.atan2(lambda.cos());
        let eta = (lambda.sin() / (t * t + lambda.cos() * lambda.cos()).sqrt()).asinh();

        let mut xi_sum = xi;
        let mut eta_sum = eta;
        for (j, a) in alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_sum += a * (k * xi).sin() * (k * eta).cosh();
            eta_sum += a * (k * xi).cos() * (k * eta).sinh();
        }

        let easting = UTM_FALSE_EASTING + UTM_SCALE * radius * eta_sum;
        let northing = UTM_SCALE * radius * xi_sum;
        (easting, northing)
    }
}

#[derive(Debug, Deserialize)]
struct DemConfig {
    origin_wgs84: OriginWgs84,
}

#[derive(Debug, Deserialize)]
struct OriginWgs84 {
    longitude: f64,
    latitude: f64,
    altitude: f64,
}

/// The elevation-model origin the camera translations are measured from.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemOrigin {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
    pub easting: f64,
    pub northing: f64,
}

impl DemOrigin {
    /// Loads the origin from a DEM config JSON file
    /// (`{"origin_wgs84": {"longitude": .., "latitude": .., "altitude": ..}}`).
    ///
    /// Any failure (missing file, bad JSON, missing field) falls back to
    /// the (0, 0) origin rather than aborting the extraction.
    pub fn load<P: AsRef<Path>>(path: P, projection: &UtmProjection) -> Self {
        let path = path.as_ref();
        match File::open(path) {
            Ok(file) => Self::from_reader(file, projection).unwrap_or_else(|err| {
                warn!(?path, %err, "unreadable DEM config, using (0, 0) origin");
                Self::default()
            }),
            Err(err) => {
                warn!(?path, %err, "missing DEM config, using (0, 0) origin");
                Self::default()
            }
        }
    }

    fn from_reader<R: Read>(reader: R, projection: &UtmProjection) -> serde_json::Result<Self> {
        let config: DemConfig = serde_json::from_reader(reader)?;
        let origin = config.origin_wgs84;
        let (easting, northing) = projection.project(origin.latitude, origin.longitude);
        Ok(Self {
            longitude: origin.longitude,
            latitude: origin.latitude,
            altitude: origin.altitude,
            easting,
            northing,
        })
    }
}
