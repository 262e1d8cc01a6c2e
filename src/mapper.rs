//! Intensity → audio parameter mapping.
//!
//! The normalization is inverted on purpose: the lowest intensity of the
//! range maps to `t = 1` (fastest clicks, last sample), the highest to `t = 0`.
//! Nothing in here is random; jitter belongs to the voices.

use serde::{Deserialize, Serialize};

/// Closed intensity interval `[min, max]` derived from the zone dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntensityRange {
    pub min: f64,
    pub max: f64,
}

impl IntensityRange {
    pub fn new(a: f64, b: f64) -> Self {
        IntensityRange {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Min/max over the finite values, `None` if there are none.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some(IntensityRange { min: v, max: v }),
                Some(r) => Some(IntensityRange {
                    min: r.min.min(v),
                    max: r.max.max(v),
                }),
            })
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// Normalize `intensity` to `t ∈ [0, 1]`, inverted and gamma-shaped.
///
/// A degenerate range (`min == max`) or a non-finite intensity yields `t = 0`.
pub fn normalize(intensity: f64, range: IntensityRange, gamma: f64) -> f64 {
    let span = range.min - range.max;
    if span == 0.0 || !intensity.is_finite() {
        return 0.0;
    }
    let t = ((intensity - range.max) / span).clamp(0.0, 1.0);
    t.powf(gamma)
}

/// Map an intensity into `target = [start, end]`.
///
/// With `gamma = 1` this is a straight line from `target[0]` at `range.max`
/// to `target[1]` at `range.min`.
pub fn map_intensity(intensity: f64, range: IntensityRange, target: [f64; 2], gamma: f64) -> f64 {
    let t = normalize(intensity, range, gamma);
    target[0] + (target[1] - target[0]) * t
}

/// Pick one of `count` evenly spaced 1-based sample indices.
pub fn select_sample(intensity: f64, range: IntensityRange, count: u32, gamma: f64) -> u32 {
    if count <= 1 {
        return 1;
    }
    let t = normalize(intensity, range, gamma);
    (t * (count - 1) as f64).round() as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> IntensityRange {
        IntensityRange::new(-11.0, -1.0)
    }

    #[test]
    fn max_intensity_maps_to_slowest_rate() {
        let rate = map_intensity(-1.0, range(), [1.0, 18.0], 1.0);
        assert!((rate - 1.0).abs() < 1e-9, "expected 1 Hz, got {rate}");
    }

    #[test]
    fn min_intensity_maps_to_fastest_rate() {
        let rate = map_intensity(-11.0, range(), [1.0, 18.0], 1.0);
        assert!((rate - 18.0).abs() < 1e-9, "expected 18 Hz, got {rate}");
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        assert!((map_intensity(5.0, range(), [1.0, 18.0], 1.0) - 1.0).abs() < 1e-9);
        assert!((map_intensity(-50.0, range(), [1.0, 18.0], 1.0) - 18.0).abs() < 1e-9);
    }

    #[test]
    fn rate_is_monotone_as_intensity_decreases() {
        for gamma in [0.5, 1.0, 2.2] {
            let mut last = f64::MIN;
            let mut x = -1.0;
            while x >= -11.0 {
                let rate = map_intensity(x, range(), [1.0, 18.0], gamma);
                assert!(rate >= last, "rate dropped at {x} (gamma {gamma}): {rate} < {last}");
                last = rate;
                x -= 0.25;
            }
        }
    }

    #[test]
    fn gamma_bends_the_curve() {
        let linear = map_intensity(-6.0, range(), [0.0, 1.0], 1.0);
        let squared = map_intensity(-6.0, range(), [0.0, 1.0], 2.0);
        assert!((linear - 0.5).abs() < 1e-9);
        assert!((squared - 0.25).abs() < 1e-9);
    }

    #[test]
    fn degenerate_range_maps_to_target_start() {
        let r = IntensityRange::new(3.0, 3.0);
        assert_eq!(map_intensity(3.0, r, [1.0, 18.0], 1.0), 1.0);
        assert_eq!(select_sample(3.0, r, 3, 1.0), 1);
    }

    #[test]
    fn non_finite_intensity_is_neutral() {
        assert_eq!(map_intensity(f64::NAN, range(), [1.0, 18.0], 1.0), 1.0);
    }

    #[test]
    fn sample_selection_is_one_based_and_even() {
        assert_eq!(select_sample(-1.0, range(), 3, 1.0), 1);
        assert_eq!(select_sample(-6.0, range(), 3, 1.0), 2);
        assert_eq!(select_sample(-11.0, range(), 3, 1.0), 3);
        assert_eq!(select_sample(-3.0, range(), 3, 1.0), 1);
        assert_eq!(select_sample(-9.0, range(), 3, 1.0), 3);
    }

    #[test]
    fn single_sample_always_selected() {
        assert_eq!(select_sample(-11.0, range(), 1, 1.0), 1);
    }

    #[test]
    fn range_from_values_skips_non_finite() {
        let r = IntensityRange::from_values([2.0, f64::NAN, -4.0, 7.5]).unwrap();
        assert_eq!(r, IntensityRange { min: -4.0, max: 7.5 });
        assert!(IntensityRange::from_values([f64::INFINITY]).is_none());
    }
}
