#[cfg(feature = "runtime")]
pub mod assets;
pub mod config;
#[cfg(feature = "runtime")]
pub mod driver;
pub mod dsp;
#[cfg(feature = "runtime")]
pub mod engine;
pub mod error;
pub mod location;
pub mod mapper;
pub mod output;
pub mod pool;
pub mod reconciler;
pub mod zones;

use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

use crate::config::EngineConfig;
use crate::error::ZoneSoundError;
use crate::mapper::{map_intensity, select_sample};
use crate::zones::{BoundingBox, Point, ZoneIndex};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Audio parameters a zone would get in each sound mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneParameters {
    pub zone: usize,
    pub intensity: f64,
    /// Click rate in Hz.
    pub rate: f64,
    /// 1-based loop sample id.
    pub sample: u32,
    pub sample_name: String,
    pub bbox: BoundingBox,
}

/// Load zones and derive every zone's click rate and loop sample.
pub fn zone_parameters_for(
    geojson: &str,
    config: &EngineConfig,
) -> Result<Vec<ZoneParameters>, ZoneSoundError> {
    config.validate()?;
    let zones = ZoneIndex::load(geojson, &config.intensity_property, config.fallback_range())?;
    let range = zones.intensity_range();
    Ok(zones
        .iter()
        .map(|zone| {
            let sample = select_sample(zone.intensity, range, config.sample_count, config.gamma);
            ZoneParameters {
                zone: zone.id,
                intensity: zone.intensity,
                rate: map_intensity(zone.intensity, range, config.rate_range, config.gamma),
                sample,
                sample_name: config.sample_name(sample),
                bbox: zone.bbox,
            }
        })
        .collect())
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{e}"))
}

/// WASM-exposed: return the zonesound-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: per-zone parameters for a GeoJSON zone collection.
/// `config_json` may be empty to use the defaults.
#[wasm_bindgen]
pub fn zone_parameters(geojson: &str, config_json: &str) -> Result<JsValue, JsValue> {
    let config = if config_json.trim().is_empty() {
        EngineConfig::default()
    } else {
        EngineConfig::from_json_str(config_json).map_err(js_error)?
    };
    let params = zone_parameters_for(geojson, &config).map_err(js_error)?;
    serde_wasm_bindgen::to_value(&params).map_err(js_error)
}

/// WASM-exposed: ids of the zones occupied by a JSON array of
/// `{ "lng", "lat" }` points.
#[wasm_bindgen]
pub fn occupied_zones(geojson: &str, points_json: &str) -> Result<Vec<u32>, JsValue> {
    let config = EngineConfig::default();
    let zones = ZoneIndex::load(geojson, &config.intensity_property, config.fallback_range())
        .map_err(js_error)?;
    let points: Vec<Point> = serde_json::from_str(points_json).map_err(js_error)?;
    Ok(reconciler::occupied_zones(&zones, &points)
        .into_iter()
        .map(|id| id as u32)
        .collect())
}
