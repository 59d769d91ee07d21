//! GPS tracks that receive elevations from a digitized profile.
//!
//! GPX files are read with the `gpx` crate (tracks, then routes, then
//! waypoints). GeoJSON input is a `LineString` geometry, or a `Feature`
//! wrapping one, with `[lon, lat]` or `[lon, lat, ele]` positions.

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use gpx::{Gpx, GpxVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::profile::Profile;
use crate::{round_to, ProfileError};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub lat: f64,
    pub lon: f64,
    pub elevation: Option<f64>,
}

/// Running distance from the first point, starting at 0.
pub fn cumulative_distances_km(points: &[TrackPoint]) -> Vec<f64> {
    let mut out = Vec::with_capacity(points.len());
    let mut total = 0.0;
    let mut prev: Option<&TrackPoint> = None;
    for point in points {
        if let Some(p) = prev {
            total += haversine_km(p.lat, p.lon, point.lat, point.lon);
        }
        out.push(total);
        prev = Some(point);
    }
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackFormat {
    Gpx,
    GeoJson,
}

impl TrackFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "gpx" => Some(TrackFormat::Gpx),
            "json" | "geojson" => Some(TrackFormat::GeoJson),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GpxSection {
    Tracks,
    Routes,
    Waypoints,
}

#[derive(Clone, Debug)]
enum TrackDocument {
    Gpx(Box<Gpx>, GpxSection),
    GeoJson(JsonValue),
}

/// Outcome of [`Track::apply_profile`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub points: usize,
    pub track_km: f64,
    pub profile_km: f64,
    pub scaled: bool,
    pub min_elevation_m: f64,
    pub max_elevation_m: f64,
}

#[derive(Clone, Debug)]
pub struct Track {
    pub points: Vec<TrackPoint>,
    document: TrackDocument,
}

impl Track {
    pub fn format(&self) -> TrackFormat {
        match self.document {
            TrackDocument::Gpx(..) => TrackFormat::Gpx,
            TrackDocument::GeoJson(_) => TrackFormat::GeoJson,
        }
    }

    pub fn from_gpx_bytes(input: &[u8]) -> Result<Self, ProfileError> {
        let gpx = gpx::read(Cursor::new(input)).map_err(|e| ProfileError::TrackParse(e.to_string()))?;

        let mut section = GpxSection::Tracks;
        let mut points = to_track_points(
            gpx.tracks
                .iter()
                .flat_map(|t| t.segments.iter())
                .flat_map(|s| s.points.iter()),
        );
        if points.is_empty() {
            section = GpxSection::Routes;
            points = to_track_points(gpx.routes.iter().flat_map(|r| r.points.iter()));
        }
        if points.is_empty() {
            section = GpxSection::Waypoints;
            points = to_track_points(gpx.waypoints.iter());
        }
        if points.is_empty() {
            return Err(ProfileError::EmptyTrack);
        }
        debug!(points = points.len(), ?section, "parsed GPX track");

        Ok(Self {
            points,
            document: TrackDocument::Gpx(Box::new(gpx), section),
        })
    }

    pub fn from_geojson_str(text: &str) -> Result<Self, ProfileError> {
        let json: JsonValue =
            serde_json::from_str(text).map_err(|e| ProfileError::TrackParse(e.to_string()))?;
        let coords = line_string_coordinates(&json)?;

        let mut points = Vec::with_capacity(coords.len());
        for (idx, coord) in coords.iter().enumerate() {
            let position = coord.as_array().ok_or_else(|| {
                ProfileError::TrackParse(format!("coordinate {} is not an array", idx))
            })?;
            let value = |i: usize| position.get(i).and_then(JsonValue::as_f64);
            let (Some(lon), Some(lat)) = (value(0), value(1)) else {
                return Err(ProfileError::TrackParse(format!(
                    "coordinate {} needs numeric lon and lat",
                    idx
                )));
            };
            points.push(TrackPoint {
                lat,
                lon,
                elevation: value(2),
            });
        }
        if points.is_empty() {
            return Err(ProfileError::EmptyTrack);
        }

        Ok(Self {
            points,
            document: TrackDocument::GeoJson(json),
        })
    }

    pub fn read(path: &Path) -> Result<Self, ProfileError> {
        match TrackFormat::from_path(path) {
            Some(TrackFormat::Gpx) => Self::from_gpx_bytes(&fs::read(path)?),
            Some(TrackFormat::GeoJson) => Self::from_geojson_str(&fs::read_to_string(path)?),
            None => Err(ProfileError::TrackParse(format!(
                "unsupported track format: {}",
                path.display()
            ))),
        }
    }

    pub fn total_distance_km(&self) -> f64 {
        cumulative_distances_km(&self.points)
            .last()
            .copied()
            .unwrap_or(0.0)
    }

    /// Replace every point's elevation with the profile value at its
    /// cumulative distance, rounded to 0.1 m.
    ///
    /// The profile's distance axis is stretched onto the track length when
    /// the two differ by more than `scale_tolerance_km`.
    pub fn apply_profile(
        &mut self,
        profile: &Profile,
        scale_tolerance_km: f64,
    ) -> Result<ApplyReport, ProfileError> {
        if self.points.is_empty() {
            return Err(ProfileError::EmptyTrack);
        }
        let profile_km = profile.total_distance_km().ok_or(ProfileError::EmptyProfile)?;

        let distances = cumulative_distances_km(&self.points);
        let track_km = distances.last().copied().unwrap_or(0.0);

        let scaled = (track_km - profile_km).abs() > scale_tolerance_km && profile_km > 0.0;
        let scaled_profile;
        let profile = if scaled {
            debug!(profile_km, track_km, "rescaling profile onto track");
            scaled_profile = profile.rescaled(track_km);
            &scaled_profile
        } else {
            profile
        };

        let mut min_elev = f64::INFINITY;
        let mut max_elev = f64::NEG_INFINITY;
        for (point, km) in self.points.iter_mut().zip(distances) {
            let elev = profile.interpolate(km).ok_or(ProfileError::EmptyProfile)?;
            let elev = round_to(elev, 1);
            min_elev = min_elev.min(elev);
            max_elev = max_elev.max(elev);
            point.elevation = Some(elev);
        }
        self.sync_document();

        Ok(ApplyReport {
            points: self.points.len(),
            track_km,
            profile_km,
            scaled,
            min_elevation_m: min_elev,
            max_elevation_m: max_elev,
        })
    }

    fn sync_document(&mut self) {
        let points = &self.points;
        match &mut self.document {
            TrackDocument::Gpx(gpx, section) => {
                let targets: Box<dyn Iterator<Item = &mut gpx::Waypoint> + '_> = match section {
                    GpxSection::Tracks => Box::new(
                        gpx.tracks
                            .iter_mut()
                            .flat_map(|t| t.segments.iter_mut())
                            .flat_map(|s| s.points.iter_mut()),
                    ),
                    GpxSection::Routes => {
                        Box::new(gpx.routes.iter_mut().flat_map(|r| r.points.iter_mut()))
                    }
                    GpxSection::Waypoints => Box::new(gpx.waypoints.iter_mut()),
                };
                for (wp, point) in targets.zip(points) {
                    wp.elevation = point.elevation;
                }
            }
            TrackDocument::GeoJson(json) => {
                if let Some(coords) = line_string_coordinates_mut(json) {
                    for (coord, point) in coords.iter_mut().zip(points) {
                        let mut position = vec![JsonValue::from(point.lon), JsonValue::from(point.lat)];
                        if let Some(ele) = point.elevation {
                            position.push(JsonValue::from(ele));
                        }
                        *coord = JsonValue::Array(position);
                    }
                }
            }
        }
    }

    pub fn write_gpx<W: Write>(&self, writer: W) -> Result<(), ProfileError> {
        let TrackDocument::Gpx(gpx, _) = &self.document else {
            return Err(ProfileError::TrackWrite("track was not read from GPX".into()));
        };
        let mut out = (**gpx).clone();
        out.version = GpxVersion::Gpx11;
        gpx::write(&out, writer).map_err(|e| ProfileError::TrackWrite(e.to_string()))
    }

    /// Compact GeoJSON, as embedded in generated route data.
    pub fn to_geojson_string(&self) -> Result<String, ProfileError> {
        let TrackDocument::GeoJson(json) = &self.document else {
            return Err(ProfileError::TrackWrite("track was not read from GeoJSON".into()));
        };
        serde_json::to_string(json).map_err(|e| ProfileError::TrackWrite(e.to_string()))
    }

    /// Write in the format the track was read from.
    pub fn write(&self, path: &Path) -> Result<(), ProfileError> {
        match self.format() {
            TrackFormat::Gpx => {
                let file = fs::File::create(path)?;
                self.write_gpx(std::io::BufWriter::new(file))
            }
            TrackFormat::GeoJson => {
                fs::write(path, self.to_geojson_string()?)?;
                Ok(())
            }
        }
    }
}

fn to_track_points<'a>(waypoints: impl Iterator<Item = &'a gpx::Waypoint>) -> Vec<TrackPoint> {
    waypoints
        .map(|wp| {
            let p = wp.point();
            TrackPoint {
                lat: p.y(),
                lon: p.x(),
                elevation: wp.elevation,
            }
        })
        .collect()
}

fn line_string_coordinates(json: &JsonValue) -> Result<&Vec<JsonValue>, ProfileError> {
    let geometry = match json.get("type").and_then(JsonValue::as_str) {
        Some("Feature") => json
            .get("geometry")
            .ok_or_else(|| ProfileError::TrackParse("feature has no geometry".into()))?,
        _ => json,
    };
    match geometry.get("type").and_then(JsonValue::as_str) {
        Some("LineString") => geometry
            .get("coordinates")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| ProfileError::TrackParse("LineString has no coordinates".into())),
        other => Err(ProfileError::TrackParse(format!(
            "expected a LineString geometry, found {}",
            other.unwrap_or("no type")
        ))),
    }
}

fn line_string_coordinates_mut(json: &mut JsonValue) -> Option<&mut Vec<JsonValue>> {
    let is_feature = json.get("type").and_then(JsonValue::as_str) == Some("Feature");
    let geometry = if is_feature {
        json.get_mut("geometry")?
    } else {
        json
    };
    geometry.get_mut("coordinates")?.as_array_mut()
}
