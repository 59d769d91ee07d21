use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::profile::{Profile, ProfilePoint};
use crate::scan::PixelSample;
use crate::{round_to, ProfileError};

/// Per-route constants that turn chart pixels into kilometres and metres.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Calibration {
    pub route: u32,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "distance", alias = "distance_km")]
    pub distance_km: f64,
    pub min_elev: f64,
    pub max_elev: f64,
}

impl Calibration {
    pub fn new(route: u32, name: &str, distance_km: f64, min_elev: f64, max_elev: f64) -> Self {
        Self {
            route,
            name: name.to_string(),
            distance_km,
            min_elev,
            max_elev,
        }
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        let values = [self.distance_km, self.min_elev, self.max_elev];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ProfileError::InvalidCalibration(format!(
                "route {} has non-finite values",
                self.route
            )));
        }
        if self.distance_km < 0.0 {
            return Err(ProfileError::InvalidCalibration(format!(
                "route {} has negative distance {}",
                self.route, self.distance_km
            )));
        }
        if self.max_elev < self.min_elev {
            return Err(ProfileError::InvalidCalibration(format!(
                "route {} has max_elev {} below min_elev {}",
                self.route, self.max_elev, self.min_elev
            )));
        }
        Ok(())
    }

    /// Map trimmed column samples to kilometres and metres.
    ///
    /// Column rank maps linearly onto `[0, distance_km]`; the topmost row maps
    /// to `max_elev` and the lowest to `min_elev`. Elevations are clamped to
    /// the calibrated range.
    pub fn map_samples(&self, samples: &[PixelSample]) -> Profile {
        let Some(y_min) = samples.iter().map(|s| s.y).min() else {
            return Profile::default();
        };
        let y_max = samples.iter().map(|s| s.y).max().unwrap_or(y_min);

        let x_range = (samples.len() - 1) as f64;
        let y_range = (y_max - y_min) as f64;
        let elev_range = self.max_elev - self.min_elev;

        let points = samples
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                let km = if x_range > 0.0 {
                    (i as f64 / x_range) * self.distance_km
                } else {
                    0.0
                };
                let elev = if y_range > 0.0 {
                    self.max_elev - ((sample.y - y_min) as f64 / y_range) * elev_range
                } else {
                    self.max_elev
                };
                let elev = elev.clamp(self.min_elev, self.max_elev);
                ProfilePoint::new(round_to(km, 3), round_to(elev, 1))
            })
            .collect();
        Profile::new(points)
    }
}

/// Calibration records keyed by route id.
#[derive(Clone, Debug, Default)]
pub struct CalibrationTable {
    records: BTreeMap<u32, Calibration>,
}

impl CalibrationTable {
    /// The twenty stages of the Camí de Cavalls.
    pub fn builtin() -> Self {
        const ROUTES: [(&str, f64, f64, f64); 20] = [
            ("Maó - Es Grau", 10.1, 5.0, 89.0),
            ("Es Grau - Favàritx", 8.63, 5.0, 47.0),
            ("Favàritx - Arenal d'en Castell", 13.60, 0.0, 78.0),
            ("Arenal d'en Castell - Cala Tirant", 10.77, 3.0, 38.0),
            ("Son Parc - Fornells", 9.59, 1.0, 47.0),
            ("Fornells - Cala Tirant", 8.61, 2.0, 118.0),
            ("Cala Tirant - Binimel·là", 11.2, 0.0, 95.0),
            ("Binimel·là - Els Alocs", 7.3, 0.0, 68.0),
            ("Els Alocs - Algaiarens", 7.0, 0.0, 80.0),
            ("Algaiarens - Cala Morell", 8.5, 0.0, 70.0),
            ("Cala Morell - Ciutadella", 10.5, 0.0, 35.0),
            ("Ciutadella - Cap d'Artrutx", 13.0, 0.0, 25.0),
            ("Cap d'Artrutx - Cala en Turqueta", 13.5, 0.0, 45.0),
            ("Cala en Turqueta - Cala Galdana", 8.0, 0.0, 60.0),
            ("Cala Galdana - Sant Tomàs", 11.5, 0.0, 70.0),
            ("Sant Tomàs - Son Bou", 6.5, 0.0, 55.0),
            ("Son Bou - Cala en Porter", 8.0, 0.0, 75.0),
            ("Cala en Porter - Binissafúller", 8.5, 0.0, 60.0),
            ("Binissafúller - Punta Prima", 7.0, 0.0, 40.0),
            ("Punta Prima - Maó", 12.5, 0.0, 50.0),
        ];
        let mut table = Self::default();
        for (idx, (name, distance, min_elev, max_elev)) in ROUTES.iter().enumerate() {
            table.insert(Calibration::new(
                idx as u32 + 1,
                name,
                *distance,
                *min_elev,
                *max_elev,
            ));
        }
        table
    }

    pub fn insert(&mut self, record: Calibration) -> Option<Calibration> {
        self.records.insert(record.route, record)
    }

    pub fn get(&self, route: u32) -> Result<&Calibration, ProfileError> {
        self.records
            .get(&route)
            .ok_or(ProfileError::CalibrationMissing(route))
    }

    pub fn routes(&self) -> impl Iterator<Item = u32> + '_ {
        self.records.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Overlay every record of `other`, replacing routes already present.
    pub fn merge(&mut self, other: CalibrationTable) {
        self.records.extend(other.records);
    }

    /// Parse either an array of records or an object keyed by route id.
    ///
    /// In the keyed form the `route` field may be omitted.
    pub fn from_json_str(text: &str) -> Result<Self, ProfileError> {
        let json: JsonValue = serde_json::from_str(text)
            .map_err(|e| ProfileError::InvalidCalibration(e.to_string()))?;

        let mut table = Self::default();
        match json {
            JsonValue::Array(items) => {
                for item in items {
                    let record: Calibration = serde_json::from_value(item)
                        .map_err(|e| ProfileError::InvalidCalibration(e.to_string()))?;
                    record.validate()?;
                    table.insert(record);
                }
            }
            JsonValue::Object(map) => {
                for (key, mut value) in map {
                    let route: u32 = key.trim().parse().map_err(|_| {
                        ProfileError::InvalidCalibration(format!("invalid route id '{}'", key))
                    })?;
                    if let Some(obj) = value.as_object_mut() {
                        obj.entry("route").or_insert(JsonValue::from(route));
                    }
                    let record: Calibration = serde_json::from_value(value)
                        .map_err(|e| ProfileError::InvalidCalibration(e.to_string()))?;
                    if record.route != route {
                        return Err(ProfileError::InvalidCalibration(format!(
                            "key '{}' does not match route {}",
                            key, record.route
                        )));
                    }
                    record.validate()?;
                    table.insert(record);
                }
            }
            _ => {
                return Err(ProfileError::InvalidCalibration(
                    "expected a JSON array or object".into(),
                ))
            }
        }
        Ok(table)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ProfileError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(ys: &[u32]) -> Vec<PixelSample> {
        ys.iter()
            .enumerate()
            .map(|(x, &y)| PixelSample { x: x as u32, y })
            .collect()
    }

    #[test]
    fn maps_rank_and_row() {
        let cal = Calibration::new(1, "t", 10.0, 0.0, 100.0);
        let profile = cal.map_samples(&samples(&[40, 20, 0, 40, 30]));
        let pairs: Vec<(f64, f64)> = profile
            .points
            .iter()
            .map(|p| (p.distance_km, p.elevation_m))
            .collect();
        assert_eq!(
            pairs,
            vec![(0.0, 0.0), (2.5, 50.0), (5.0, 100.0), (7.5, 0.0), (10.0, 25.0)]
        );
    }

    #[test]
    fn endpoints_and_bounds_hold() {
        let cal = Calibration::new(3, "t", 13.6, 0.0, 78.0);
        let ys: Vec<u32> = (0..317).map(|i| (i * 37 % 101) as u32).collect();
        let profile = cal.map_samples(&samples(&ys));
        assert_eq!(profile.points[0].distance_km, 0.0);
        assert!((profile.points.last().unwrap().distance_km - 13.6).abs() < 1e-9);
        for p in &profile.points {
            assert!(p.elevation_m >= 0.0 && p.elevation_m <= 78.0);
        }
    }

    #[test]
    fn rounding_precision() {
        let cal = Calibration::new(1, "t", 1.0, 0.0, 10.0);
        let profile = cal.map_samples(&samples(&[0, 1, 2]));
        assert_eq!(profile.points[1].distance_km, 0.5);
        assert_eq!(profile.points[1].elevation_m, 5.0);

        let cal = Calibration::new(1, "t", 1.0, 0.0, 10.0);
        let profile = cal.map_samples(&samples(&[0, 0, 1, 2]));
        assert_eq!(profile.points[1].distance_km, 0.333);
    }

    #[test]
    fn single_column_sits_at_zero_and_max() {
        let cal = Calibration::new(1, "t", 8.0, 2.0, 40.0);
        let profile = cal.map_samples(&samples(&[17]));
        assert_eq!(profile.points.len(), 1);
        assert_eq!(profile.points[0].distance_km, 0.0);
        assert_eq!(profile.points[0].elevation_m, 40.0);
    }

    #[test]
    fn flat_rows_map_to_max_elevation() {
        let cal = Calibration::new(1, "t", 8.0, 2.0, 40.0);
        let profile = cal.map_samples(&samples(&[9, 9, 9, 9]));
        assert!(profile.points.iter().all(|p| p.elevation_m == 40.0));
        assert_eq!(profile.points[3].distance_km, 8.0);
    }

    #[test]
    fn empty_samples_give_empty_profile() {
        let cal = Calibration::new(1, "t", 8.0, 2.0, 40.0);
        assert!(cal.map_samples(&[]).is_empty());
    }

    #[test]
    fn builtin_table_has_every_stage() {
        let table = CalibrationTable::builtin();
        assert_eq!(table.len(), 20);
        let first = table.get(1).unwrap();
        assert_eq!(first.name, "Maó - Es Grau");
        assert_eq!(first.max_elev, 89.0);
        assert_eq!(table.get(20).unwrap().distance_km, 12.5);
        assert!(matches!(table.get(21), Err(ProfileError::CalibrationMissing(21))));
        assert!(table.routes().all(|r| table.get(r).unwrap().validate().is_ok()));
    }

    #[test]
    fn json_array_and_object_forms() {
        let array = r#"[{"route": 4, "name": "x", "distance": 5.5, "min_elev": 1, "max_elev": 9}]"#;
        let table = CalibrationTable::from_json_str(array).unwrap();
        assert_eq!(table.get(4).unwrap().distance_km, 5.5);

        let object = r#"{"7": {"distance_km": 3.0, "min_elev": 0, "max_elev": 12}}"#;
        let table = CalibrationTable::from_json_str(object).unwrap();
        let rec = table.get(7).unwrap();
        assert_eq!(rec.route, 7);
        assert_eq!(rec.name, "");
        assert_eq!(rec.max_elev, 12.0);
    }

    #[test]
    fn json_rejects_bad_records() {
        let inverted = r#"[{"route": 1, "distance": 5, "min_elev": 50, "max_elev": 9}]"#;
        assert!(matches!(
            CalibrationTable::from_json_str(inverted),
            Err(ProfileError::InvalidCalibration(_))
        ));
        let bad_key = r#"{"one": {"distance": 5, "min_elev": 0, "max_elev": 9}}"#;
        assert!(CalibrationTable::from_json_str(bad_key).is_err());
        assert!(CalibrationTable::from_json_str("42").is_err());
    }

    #[test]
    fn merge_overrides_builtin() {
        let mut table = CalibrationTable::builtin();
        let mut extra = CalibrationTable::default();
        extra.insert(Calibration::new(1, "Maó - Es Grau", 10.4, 0.0, 90.0));
        table.merge(extra);
        assert_eq!(table.len(), 20);
        assert_eq!(table.get(1).unwrap().distance_km, 10.4);
    }
}
