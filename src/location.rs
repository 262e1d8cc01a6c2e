//! Location Store: where current positions come from.
//!
//! The engine only ever reads the latest point of each tracked subject. The
//! adapter is chosen once when the driver is built; the driver never inspects
//! which one it has.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::EngineConfig;
use crate::error::LocationFetchError;
use crate::zones::Point;

pub trait LocationStore: Send + Sync {
    /// Latest position of every tracked subject.
    fn current_positions(
        &self,
    ) -> impl Future<Output = Result<Vec<Point>, LocationFetchError>> + Send;
}

impl<S: LocationStore> LocationStore for Arc<S> {
    fn current_positions(
        &self,
    ) -> impl Future<Output = Result<Vec<Point>, LocationFetchError>> + Send {
        (**self).current_positions()
    }
}

/// One recorded position. `t` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub lng: f64,
    pub lat: f64,
    #[serde(default)]
    pub t: u64,
}

impl TrackPoint {
    pub fn point(&self) -> Point {
        Point::new(self.lng, self.lat)
    }
}

/// Per-subject paths kept in memory, oldest points dropped past the cap.
#[derive(Debug)]
pub struct MemoryLocationStore {
    paths: Mutex<HashMap<String, Vec<TrackPoint>>>,
    max_points: usize,
}

impl Default for MemoryLocationStore {
    fn default() -> Self {
        MemoryLocationStore::from_config(&EngineConfig::default())
    }
}

impl MemoryLocationStore {
    pub fn new(max_points: usize) -> Self {
        MemoryLocationStore {
            paths: Mutex::new(HashMap::new()),
            max_points: max_points.max(1),
        }
    }

    /// A store capped at the configured `maxPointsPerSubject`.
    pub fn from_config(config: &EngineConfig) -> Self {
        MemoryLocationStore::new(config.max_points_per_subject)
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<TrackPoint>>> {
        self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a point to `name`'s path. Returns the path length, or `None`
    /// when the name is blank or a coordinate is not finite.
    pub fn add_point(&self, name: &str, lng: f64, lat: f64, t: u64) -> Option<usize> {
        let key = name.trim();
        if key.is_empty() || !lng.is_finite() || !lat.is_finite() {
            return None;
        }
        let mut paths = self.lock();
        let path = paths.entry(key.to_string()).or_default();
        path.push(TrackPoint { lng, lat, t });
        if path.len() > self.max_points {
            let excess = path.len() - self.max_points;
            path.drain(..excess);
        }
        Some(path.len())
    }

    /// Names of every tracked subject, sorted.
    pub fn people(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn path(&self, name: &str) -> Option<Vec<TrackPoint>> {
        self.lock().get(name.trim()).cloned()
    }

    /// Forget one subject. Returns whether it was tracked.
    pub fn remove(&self, name: &str) -> bool {
        self.lock().remove(name.trim()).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Latest point per subject, ordered by subject name.
    pub fn latest(&self) -> Vec<Point> {
        let paths = self.lock();
        let mut named: Vec<(&String, Point)> = paths
            .iter()
            .filter_map(|(name, path)| path.last().map(|p| (name, p.point())))
            .collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        named.into_iter().map(|(_, p)| p).collect()
    }

    /// Every path as a GeoJSON FeatureCollection of LineStrings with a
    /// parallel `timestamps` property.
    pub fn to_feature_collection(&self) -> Value {
        let paths = self.lock();
        let mut names: Vec<&String> = paths.keys().collect();
        names.sort();
        let features: Vec<Value> = names
            .into_iter()
            .map(|name| {
                let path = &paths[name];
                json!({
                    "type": "Feature",
                    "properties": {
                        "name": name,
                        "timestamps": path.iter().map(|p| p.t).collect::<Vec<_>>(),
                    },
                    "geometry": {
                        "type": "LineString",
                        "coordinates": path.iter().map(|p| [p.lng, p.lat]).collect::<Vec<_>>(),
                    },
                })
            })
            .collect();
        json!({ "type": "FeatureCollection", "features": features })
    }
}

impl LocationStore for MemoryLocationStore {
    fn current_positions(
        &self,
    ) -> impl Future<Output = Result<Vec<Point>, LocationFetchError>> + Send {
        std::future::ready(Ok(self.latest()))
    }
}

/// Extract the current position of every feature in a path collection.
///
/// LineStrings contribute their last coordinate, Points their only one.
/// Features with no usable coordinate are skipped.
pub fn points_from_feature_collection(json: &str) -> Result<Vec<Point>, LocationFetchError> {
    let root: Value =
        serde_json::from_str(json).map_err(|e| LocationFetchError::Payload(e.to_string()))?;
    let features = root
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| LocationFetchError::Payload("missing 'features' array".to_string()))?;

    let mut points = Vec::with_capacity(features.len());
    for feature in features {
        let Some(geometry) = feature.get("geometry") else {
            continue;
        };
        let coordinate = match geometry.get("type").and_then(Value::as_str) {
            Some("LineString") => geometry
                .get("coordinates")
                .and_then(Value::as_array)
                .and_then(|coords| coords.last()),
            Some("Point") => geometry.get("coordinates"),
            _ => None,
        };
        if let Some(point) = coordinate.and_then(parse_position) {
            points.push(point);
        }
    }
    Ok(points)
}

fn parse_position(value: &Value) -> Option<Point> {
    let pair = value.as_array()?;
    let lng = pair.first()?.as_f64()?;
    let lat = pair.get(1)?.as_f64()?;
    (lng.is_finite() && lat.is_finite()).then(|| Point::new(lng, lat))
}

/// Polls a `GET` endpoint serving a FeatureCollection of paths.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpLocationStore {
    client: reqwest::Client,
    url: String,
}

#[cfg(feature = "http")]
impl HttpLocationStore {
    pub fn new(url: impl Into<String>) -> Result<Self, LocationFetchError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| LocationFetchError::Transport(format!("http client init failed: {e}")))?;
        Ok(HttpLocationStore {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(feature = "http")]
impl LocationStore for HttpLocationStore {
    fn current_positions(
        &self,
    ) -> impl Future<Output = Result<Vec<Point>, LocationFetchError>> + Send {
        async move {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| LocationFetchError::Transport(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(LocationFetchError::Status(status.as_u16()));
            }
            let body = response
                .text()
                .await
                .map_err(|e| LocationFetchError::Transport(e.to_string()))?;
            points_from_feature_collection(&body)
        }
    }
}

/// Replays recorded frames, one per poll. The last frame repeats once the
/// recording runs out.
#[derive(Debug)]
pub struct ReplayLocationStore {
    frames: Vec<Vec<Point>>,
    cursor: AtomicUsize,
}

impl ReplayLocationStore {
    pub fn from_frames(frames: Vec<Vec<Point>>) -> Self {
        ReplayLocationStore {
            frames,
            cursor: AtomicUsize::new(0),
        }
    }

    /// One walker: points are sorted by timestamp and played one per frame.
    pub fn from_track(mut track: Vec<TrackPoint>) -> Self {
        track.sort_by_key(|p| p.t);
        Self::from_frames(track.iter().map(|p| vec![p.point()]).collect())
    }

    /// Parse a JSON array of `{ "lng", "lat", "t" }` records.
    pub fn from_json_str(json: &str) -> Result<Self, LocationFetchError> {
        let track: Vec<TrackPoint> =
            serde_json::from_str(json).map_err(|e| LocationFetchError::Payload(e.to_string()))?;
        Ok(Self::from_track(track))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn next_frame(&self) -> Vec<Point> {
        if self.frames.is_empty() {
            return Vec::new();
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        let idx = idx.min(self.frames.len() - 1);
        self.frames[idx].clone()
    }
}

impl LocationStore for ReplayLocationStore {
    fn current_positions(
        &self,
    ) -> impl Future<Output = Result<Vec<Point>, LocationFetchError>> + Send {
        std::future::ready(Ok(self.next_frame()))
    }
}
