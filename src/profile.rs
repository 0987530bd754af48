//! Per-profile summary values.

use crate::bounds::{min_max, valid_values};
use crate::format::Dataset;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProfileSummary {
    /// Midpoint of the valid time range.
    pub time: Option<f64>,
    /// Mean of the valid latitudes.
    pub lat: Option<f64>,
    /// Mean of the valid longitudes.
    pub lon: Option<f64>,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Summarize the named time, latitude and longitude variables. Absent
/// variables and all-missing series yield `None`.
pub fn summarize(ds: &Dataset, time: &str, lat: &str, lon: &str) -> ProfileSummary {
    let series = |name: &str| ds.variable(name).map(valid_values).unwrap_or_default();
    ProfileSummary {
        time: min_max(&series(time)).map(|(start, end)| start + (end - start) / 2.0),
        lat: mean(&series(lat)),
        lon: mean(&series(lon)),
    }
}
