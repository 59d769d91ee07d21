use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::ProfileError;

/// One `(distance_km, elevation_m)` sample, serialized as a two-element array.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct ProfilePoint {
    pub distance_km: f64,
    pub elevation_m: f64,
}

impl ProfilePoint {
    pub fn new(distance_km: f64, elevation_m: f64) -> Self {
        Self {
            distance_km,
            elevation_m,
        }
    }
}

impl From<(f64, f64)> for ProfilePoint {
    fn from((distance_km, elevation_m): (f64, f64)) -> Self {
        Self::new(distance_km, elevation_m)
    }
}

impl From<ProfilePoint> for (f64, f64) {
    fn from(p: ProfilePoint) -> Self {
        (p.distance_km, p.elevation_m)
    }
}

/// Distance-ordered elevation samples along a route.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile {
    pub points: Vec<ProfilePoint>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyElevation {
    pub target_km: f64,
    pub point: ProfilePoint,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub points: usize,
    pub min_elevation_m: f64,
    pub max_elevation_m: f64,
    pub peak: ProfilePoint,
    pub key_elevations: Vec<KeyElevation>,
}

impl Profile {
    pub fn new(points: Vec<ProfilePoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn total_distance_km(&self) -> Option<f64> {
        self.points.last().map(|p| p.distance_km)
    }

    /// Thin to at most `target` stride picks plus the original final point.
    ///
    /// Picks are `floor(i * step)` with a floating-point `step = len / target`,
    /// never interpolated. A `target` of 0 is treated as 1.
    pub fn resample(&self, target: usize) -> Profile {
        let len = self.points.len();
        let target = target.max(1);
        if len <= target {
            return self.clone();
        }
        let step = len as f64 / target as f64;
        let mut sampled = Vec::with_capacity(target + 1);
        let mut last_idx = 0;
        for i in 0..target {
            last_idx = ((i as f64 * step) as usize).min(len - 1);
            sampled.push(self.points[last_idx]);
        }
        if last_idx != len - 1 {
            sampled.push(self.points[len - 1]);
        }
        Profile::new(sampled)
    }

    /// Elevation at `km`, held flat beyond either end.
    pub fn interpolate(&self, km: f64) -> Option<f64> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if km <= first.distance_km {
            return Some(first.elevation_m);
        }
        if km >= last.distance_km {
            return Some(last.elevation_m);
        }
        for pair in self.points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a.distance_km <= km && km <= b.distance_km {
                if b.distance_km == a.distance_km {
                    return Some(a.elevation_m);
                }
                let t = (km - a.distance_km) / (b.distance_km - a.distance_km);
                return Some(a.elevation_m + t * (b.elevation_m - a.elevation_m));
            }
        }
        Some(last.elevation_m)
    }

    /// Stretch the distance axis so the last point lands on `total_km`.
    pub fn rescaled(&self, total_km: f64) -> Profile {
        let current = match self.total_distance_km() {
            Some(d) if d > 0.0 => d,
            _ => return self.clone(),
        };
        let scale = total_km / current;
        Profile::new(
            self.points
                .iter()
                .map(|p| ProfilePoint::new(p.distance_km * scale, p.elevation_m))
                .collect(),
        )
    }

    /// Elevation range, peak, and the closest sample to each whole kilometre
    /// up to `distance_km` plus `distance_km` itself.
    pub fn summary(&self, distance_km: f64) -> Option<ProfileSummary> {
        let first = *self.points.first()?;
        let mut peak = first;
        let mut min_elev = first.elevation_m;
        for p in &self.points {
            if p.elevation_m > peak.elevation_m {
                peak = *p;
            }
            min_elev = min_elev.min(p.elevation_m);
        }

        let mut targets: Vec<f64> = (0..)
            .map(|k| k as f64)
            .take_while(|&k| k <= distance_km)
            .collect();
        if targets.last().map_or(true, |&k| k < distance_km) {
            targets.push(distance_km);
        }

        let key_elevations = targets
            .into_iter()
            .map(|target_km| {
                let mut closest = first;
                for p in &self.points {
                    if (p.distance_km - target_km).abs() < (closest.distance_km - target_km).abs() {
                        closest = *p;
                    }
                }
                KeyElevation {
                    target_km,
                    point: closest,
                }
            })
            .collect();

        Some(ProfileSummary {
            points: self.points.len(),
            min_elevation_m: min_elev,
            max_elevation_m: peak.elevation_m,
            peak,
            key_elevations,
        })
    }
}

/// Persisted profile with the calibration it was produced under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileDocument {
    pub route: u32,
    #[serde(default)]
    pub name: String,
    pub distance_km: f64,
    pub min_elev: f64,
    pub max_elev: f64,
    pub points: Profile,
}

impl ProfileDocument {
    pub fn new(calibration: &Calibration, points: Profile) -> Self {
        Self {
            route: calibration.route,
            name: calibration.name.clone(),
            distance_km: calibration.distance_km,
            min_elev: calibration.min_elev,
            max_elev: calibration.max_elev,
            points,
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ProfileError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ProfileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), ProfileError> {
        fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(pairs: &[(f64, f64)]) -> Profile {
        Profile::new(pairs.iter().map(|&p| p.into()).collect())
    }

    fn ramp(n: usize) -> Profile {
        Profile::new(
            (0..n)
                .map(|i| ProfilePoint::new(i as f64 * 0.01, (i % 97) as f64))
                .collect(),
        )
    }

    #[test]
    fn interpolate_midpoint() {
        let p = profile(&[(0.0, 10.0), (10.0, 50.0)]);
        assert_eq!(p.interpolate(5.0), Some(30.0));
    }

    #[test]
    fn interpolate_clamps_to_ends() {
        let p = profile(&[(1.0, 12.0), (2.0, 20.0), (4.0, 8.0)]);
        assert_eq!(p.interpolate(-3.0), Some(12.0));
        assert_eq!(p.interpolate(1.0), Some(12.0));
        assert_eq!(p.interpolate(4.0), Some(8.0));
        assert_eq!(p.interpolate(9.0), Some(8.0));
    }

    #[test]
    fn interpolate_is_linear_between_neighbours() {
        let p = profile(&[(0.0, 0.0), (2.0, 20.0), (4.0, 8.0)]);
        let km = 3.5;
        let expected = 20.0 + (km - 2.0) / (4.0 - 2.0) * (8.0 - 20.0);
        assert!((p.interpolate(km).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn interpolate_duplicate_distance_takes_first() {
        let p = profile(&[(0.0, 0.0), (1.0, 5.0), (1.0, 9.0), (2.0, 9.0)]);
        assert_eq!(p.interpolate(1.0), Some(5.0));
    }

    #[test]
    fn interpolate_empty_is_none() {
        assert_eq!(Profile::default().interpolate(1.0), None);
    }

    #[test]
    fn resample_short_profile_unchanged() {
        let p = ramp(150);
        assert_eq!(p.resample(200), p);
    }

    #[test]
    fn resample_bounds_length_and_keeps_last() {
        for n in [201, 317, 640, 1000] {
            let p = ramp(n);
            let r = p.resample(200);
            assert!(r.len() <= 201, "n={} len={}", n, r.len());
            assert_eq!(r.points.last(), p.points.last());
            assert_eq!(r.points[0], p.points[0]);
        }
    }

    #[test]
    fn resample_stride_is_nearest_index() {
        let p = ramp(10);
        let r = p.resample(4);
        let idx: Vec<f64> = r.points.iter().map(|q| (q.distance_km * 100.0).round()).collect();
        assert_eq!(idx, vec![0.0, 2.0, 5.0, 7.0, 9.0]);
    }

    #[test]
    fn resample_stride_is_floating_point() {
        // 50 * (228 / 200) lands just below 57
        let p = ramp(228);
        let r = p.resample(200);
        assert_eq!(r.points[50], p.points[56]);
        assert_eq!(r.len(), 201);
    }

    #[test]
    fn resample_zero_target_keeps_ends_only() {
        let p = ramp(10);
        let r = p.resample(0);
        assert_eq!(r.points, vec![p.points[0], p.points[9]]);
    }

    #[test]
    fn rescale_stretches_distance_only() {
        let p = profile(&[(0.0, 3.0), (5.0, 7.0), (10.0, 1.0)]);
        let s = p.rescaled(12.0);
        assert_eq!(s.total_distance_km(), Some(12.0));
        assert_eq!(s.points[1], ProfilePoint::new(6.0, 7.0));
        let zero = profile(&[(0.0, 3.0)]);
        assert_eq!(zero.rescaled(5.0), zero);
    }

    #[test]
    fn summary_reports_peak_and_key_points() {
        let p = profile(&[(0.0, 5.0), (0.9, 30.0), (1.6, 60.0), (2.1, 60.0), (2.5, 10.0)]);
        let s = p.summary(2.5).unwrap();
        assert_eq!(s.points, 5);
        assert_eq!(s.min_elevation_m, 5.0);
        assert_eq!(s.peak, ProfilePoint::new(1.6, 60.0));
        let targets: Vec<f64> = s.key_elevations.iter().map(|k| k.target_km).collect();
        assert_eq!(targets, vec![0.0, 1.0, 2.0, 2.5]);
        assert_eq!(s.key_elevations[1].point.distance_km, 0.9);
        assert_eq!(s.key_elevations[2].point.distance_km, 2.1);
        assert!(Profile::default().summary(1.0).is_none());
    }

    #[test]
    fn document_json_uses_pairs() {
        let cal = Calibration::new(2, "Es Grau - Favàritx", 8.63, 5.0, 47.0);
        let doc = ProfileDocument::new(&cal, profile(&[(0.0, 5.0), (8.63, 47.0)]));
        let text = doc.to_json_pretty().unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["route"], 2);
        assert_eq!(json["points"][1][0], 8.63);
        assert_eq!(json["points"][1][1], 47.0);
        assert_eq!(ProfileDocument::from_json_str(&text).unwrap(), doc);
    }

    #[test]
    fn document_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("route1_profile.json");
        let cal = Calibration::new(1, "Maó - Es Grau", 10.1, 5.0, 89.0);
        let doc = ProfileDocument::new(&cal, profile(&[(0.0, 5.0), (10.1, 89.0)]));
        doc.save(&path).unwrap();
        assert_eq!(ProfileDocument::load(&path).unwrap(), doc);
    }
}
