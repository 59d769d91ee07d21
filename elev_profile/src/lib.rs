//! Elevation profile digitizer for route chart images.
//!
//! Turns a raster elevation chart into calibrated `(distance_km, elevation_m)`
//! samples, and maps those samples back onto GPS tracks by cumulative
//! haversine distance.

use std::path::Path;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod calibration;
pub mod classify;
pub mod profile;
pub mod scan;
pub mod track;
pub mod trim;

pub use calibration::{Calibration, CalibrationTable};
pub use classify::{classify_pixel, is_profile_pixel, PixelClass};
pub use profile::{KeyElevation, Profile, ProfileDocument, ProfilePoint, ProfileSummary};
pub use scan::{scan_columns, PixelSample};
pub use track::{cumulative_distances_km, haversine_km, ApplyReport, Track, TrackFormat, TrackPoint};
pub use trim::{find_bounds, trim, TrimBounds, TrimParams};

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("failed to decode image: {0}")]
    ImageDecode(String),
    #[error("no calibration record for route {0}")]
    CalibrationMissing(u32),
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),
    #[error("profile has no points")]
    EmptyProfile,
    #[error("track has no points")]
    EmptyTrack,
    #[error("failed to parse track: {0}")]
    TrackParse(String),
    #[error("failed to write track: {0}")]
    TrackWrite(String),
    #[error("invalid profile JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub const DEFAULT_TARGET_POINTS: usize = 200;
pub const DEFAULT_SCALE_TOLERANCE_KM: f64 = 0.1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DigitizerParams {
    pub trim: TrimParams,
    pub resample: bool,
    pub target_points: usize,
    pub scale_tolerance_km: f64,
}

impl Default for DigitizerParams {
    fn default() -> Self {
        Self {
            trim: TrimParams::default(),
            resample: true,
            target_points: DEFAULT_TARGET_POINTS,
            scale_tolerance_km: DEFAULT_SCALE_TOLERANCE_KM,
        }
    }
}

/// Result of running the digitizer over one chart image.
#[derive(Clone, Debug)]
pub struct Digitized {
    pub width: u32,
    pub height: u32,
    pub raw_samples: usize,
    pub bounds: TrimBounds,
    /// Full-resolution profile, one point per trimmed column.
    pub profile: Profile,
}

impl Digitized {
    /// The profile reduced to `params.target_points` when resampling is enabled.
    pub fn output_profile(&self, params: &DigitizerParams) -> Profile {
        if params.resample {
            self.profile.resample(params.target_points)
        } else {
            self.profile.clone()
        }
    }
}

/// Decode PNG/JPEG/GIF bytes into an RGBA raster.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, ProfileError> {
    let img = image::load_from_memory(bytes).map_err(|e| ProfileError::ImageDecode(e.to_string()))?;
    ensure_dimensions(img.to_rgba8())
}

pub fn open_image(path: &Path) -> Result<RgbaImage, ProfileError> {
    let img = image::open(path)
        .map_err(|e| ProfileError::ImageDecode(format!("{}: {}", path.display(), e)))?;
    ensure_dimensions(img.to_rgba8())
}

fn ensure_dimensions(img: RgbaImage) -> Result<RgbaImage, ProfileError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(ProfileError::ImageDecode(format!(
            "image has zero dimensions ({}x{})",
            img.width(),
            img.height()
        )));
    }
    Ok(img)
}

/// Scan, trim and calibrate a chart image into a full-resolution profile.
pub fn digitize(
    img: &RgbaImage,
    calibration: &Calibration,
    params: &DigitizerParams,
) -> Result<Digitized, ProfileError> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(ProfileError::ImageDecode("image has zero dimensions".into()));
    }

    calibration.validate()?;

    let raw = scan_columns(img);
    if raw.is_empty() {
        return Err(ProfileError::EmptyProfile);
    }

    let (bounds, trimmed) = trim(&raw, &params.trim);
    debug!(
        route = calibration.route,
        raw = raw.len(),
        start = bounds.start,
        end = bounds.end,
        "trimmed column samples"
    );

    let profile = calibration.map_samples(trimmed);
    Ok(Digitized {
        width,
        height,
        raw_samples: raw.len(),
        bounds,
        profile,
    })
}

/// Write `profile` onto `track`, rescaling by `params.scale_tolerance_km`.
pub fn apply_to_track(
    track: &mut Track,
    profile: &Profile,
    params: &DigitizerParams,
) -> Result<ApplyReport, ProfileError> {
    track.apply_profile(profile, params.scale_tolerance_km)
}

/// Decode `bytes`, then digitize with the calibration record for `route`.
pub fn digitize_route(
    bytes: &[u8],
    route: u32,
    table: &CalibrationTable,
    params: &DigitizerParams,
) -> Result<Digitized, ProfileError> {
    let calibration = table.get(route)?;
    let img = decode_image(bytes)?;
    digitize(&img, calibration, params)
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}


#[cfg(test)]
mod tests {
    use super::test_support::{blank, diagonal};
    use super::*;
    use std::io::Cursor;

    fn calibration() -> Calibration {
        Calibration::new(99, "Synthetic", 10.0, 0.0, 100.0)
    }

    #[test]
    fn diagonal_line_climbs_monotonically() {
        let img = diagonal(100, 50);
        let out = digitize(&img, &calibration(), &DigitizerParams::default()).unwrap();
        let points = &out.profile.points;
        assert!(points.len() > 50);
        assert_eq!(points[0].distance_km, 0.0);
        assert!((points.last().unwrap().distance_km - 10.0).abs() < 1e-9);
        for pair in points.windows(2) {
            assert!(pair[1].distance_km >= pair[0].distance_km);
            assert!(pair[1].elevation_m >= pair[0].elevation_m);
        }
        assert!(points[0].elevation_m < points.last().unwrap().elevation_m);
    }

    #[test]
    fn rerun_is_bit_identical() {
        let img = diagonal(100, 50);
        let params = DigitizerParams::default();
        let a = digitize(&img, &calibration(), &params).unwrap();
        let b = digitize(&img, &calibration(), &params).unwrap();
        let a_bits: Vec<(u64, u64)> = a
            .profile
            .points
            .iter()
            .map(|p| (p.distance_km.to_bits(), p.elevation_m.to_bits()))
            .collect();
        let b_bits: Vec<(u64, u64)> = b
            .profile
            .points
            .iter()
            .map(|p| (p.distance_km.to_bits(), p.elevation_m.to_bits()))
            .collect();
        assert_eq!(a_bits, b_bits);
    }

    #[test]
    fn blank_image_is_empty_profile() {
        let img = blank(20, 10);
        let err = digitize(&img, &calibration(), &DigitizerParams::default()).unwrap_err();
        assert!(matches!(err, ProfileError::EmptyProfile));
    }

    #[test]
    fn undecodable_bytes_fail() {
        let err = decode_image(b"not an image").unwrap_err();
        assert!(matches!(err, ProfileError::ImageDecode(_)));
    }

    #[test]
    fn digitize_route_from_png_bytes() {
        let img = diagonal(60, 30);
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let mut table = CalibrationTable::default();
        table.insert(calibration());
        let out = digitize_route(&bytes, 99, &table, &DigitizerParams::default()).unwrap();
        assert_eq!((out.width, out.height), (60, 30));
        assert_eq!(out.raw_samples, 60);

        let missing = digitize_route(&bytes, 7, &table, &DigitizerParams::default()).unwrap_err();
        assert!(matches!(missing, ProfileError::CalibrationMissing(7)));
    }

    #[test]
    fn output_profile_respects_resample_flag() {
        let img = diagonal(400, 50);
        let mut params = DigitizerParams::default();
        let out = digitize(&img, &calibration(), &params).unwrap();
        assert!(out.output_profile(&params).len() <= params.target_points + 1);
        params.resample = false;
        assert_eq!(out.output_profile(&params).len(), out.profile.len());
    }

    #[test]
    fn inverted_calibration_is_rejected() {
        let img = diagonal(40, 20);
        let bad = Calibration::new(1, "Inverted", 5.0, 50.0, 10.0);
        let err = digitize(&img, &bad, &DigitizerParams::default()).unwrap_err();
        assert!(matches!(err, ProfileError::InvalidCalibration(_)));

        let nan = Calibration::new(1, "NaN", 5.0, f64::NAN, 10.0);
        let err = digitize(&img, &nan, &DigitizerParams::default()).unwrap_err();
        assert!(matches!(err, ProfileError::InvalidCalibration(_)));
    }

    #[test]
    fn scale_tolerance_controls_rescaling() {
        let gpx = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk><trkseg>
    <trkpt lat="0.0" lon="0.0"></trkpt>
    <trkpt lat="0.0" lon="0.02"></trkpt>
  </trkseg></trk>
</gpx>"#;
        let profile = Profile::new(vec![
            ProfilePoint::new(0.0, 0.0),
            ProfilePoint::new(3.0, 100.0),
        ]);

        let mut track = Track::from_gpx_bytes(gpx.as_bytes()).unwrap();
        let report = apply_to_track(&mut track, &profile, &DigitizerParams::default()).unwrap();
        assert!(report.scaled);
        assert_eq!(track.points[1].elevation, Some(100.0));

        let loose = DigitizerParams {
            scale_tolerance_km: 1.0,
            ..DigitizerParams::default()
        };
        let mut track = Track::from_gpx_bytes(gpx.as_bytes()).unwrap();
        let report = apply_to_track(&mut track, &profile, &loose).unwrap();
        assert!(!report.scaled);
        assert!(track.points[1].elevation.unwrap() < 100.0);
    }

    #[test]
    fn round_half_away_from_zero() {
        assert_eq!(round_to(1.25, 1), 1.3);
        assert_eq!(round_to(2.0004, 3), 2.0);
    }
}
