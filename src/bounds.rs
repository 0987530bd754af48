//! File-level bound attributes recomputed from container contents.

use std::collections::BTreeMap;

use crate::clock::iso8601_from_epoch;
use crate::format::{AttrValue, Dataset, Scalar, Variable};
use crate::schema::VariableDescriptor;

/// Descriptor attributes copied verbatim into `<prefix>_<name>`.
pub const COPIED_ATTRS: [&str; 4] = ["units", "resolution", "accuracy", "precision"];

/// Values of `var` that are neither its fill value nor non-finite.
pub fn valid_values(var: &Variable) -> Vec<f64> {
    let fill = var.fill();
    (0..var.data.len())
        .filter_map(|i| var.data.get(i))
        .filter(|value| *value != fill)
        .map(|value| value.to_f64())
        .filter(|value| value.is_finite())
        .collect()
}

/// Smallest and largest valid value.
pub fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    values.iter().fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Rewrite `<prefix>_min` / `<prefix>_max` and the copied attributes for
/// every bound group, then the time coverage. Groups whose containers hold
/// no valid value keep whatever min/max they had.
pub fn finalize_bounds<'a>(
    ds: &mut Dataset,
    descriptors: impl IntoIterator<Item = &'a VariableDescriptor>,
    time_variable: &str,
) {
    let mut groups: BTreeMap<&str, Vec<&VariableDescriptor>> = BTreeMap::new();
    for desc in descriptors {
        if let Some(prefix) = desc.global_bound.as_deref() {
            groups.entry(prefix).or_default().push(desc);
        }
    }

    for (prefix, members) in groups {
        let mut values = Vec::new();
        let mut dtype = None;
        for desc in &members {
            if let Some(var) = ds.variable(&desc.name) {
                values.extend(valid_values(var));
                dtype.get_or_insert(var.dtype);
            }
        }

        match (min_max(&values), dtype) {
            (Some((lo, hi)), Some(dtype)) => {
                ds.attrs.set(format!("{prefix}_min"), Scalar::from_f64(dtype, lo));
                ds.attrs.set(format!("{prefix}_max"), Scalar::from_f64(dtype, hi));
            }
            _ => log::debug!("{prefix}: no valid values, min/max left unchanged"),
        }

        for name in COPIED_ATTRS {
            let copied = members.iter().find_map(|desc| {
                desc.attrs.get(name).and_then(AttrValue::from_json)
            });
            if let Some(value) = copied {
                ds.attrs.set(format!("{prefix}_{name}"), value);
            }
        }
    }

    let coverage = ds
        .variable(time_variable)
        .map(|time| min_max(&valid_values(time)));
    if let Some(Some((start, end))) = coverage {
        if let (Some(start), Some(end)) = (iso8601_from_epoch(start), iso8601_from_epoch(end)) {
            ds.attrs.set("time_coverage_start", start);
            ds.attrs.set("time_coverage_end", end);
        }
    }
}
