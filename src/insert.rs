//! Streaming insertion of timestamped records.
//!
//! Each record fills one row of every time-indexed variable it mentions.
//! Variables on any other dimension hold the most recent value seen and are
//! overwritten in place.

use std::collections::BTreeMap;

use crate::config::{CompanionRule, CompanionSource};
use crate::error::{Error, Result};
use crate::format::{Dataset, Scalar, Variable};
use crate::qc::QcEngine;
use crate::schema::{Registry, VariableDescriptor};

/// One measured value.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Number(f64),
    Text(String),
}

impl Sample {
    /// Numeric value; text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Sample::Number(v) => Some(*v),
            Sample::Text(text) => text.trim().parse().ok(),
        }
    }

    /// Whether this value stands for "no data" in a variable whose fill is `fill`.
    pub fn is_missing(&self, fill: Scalar) -> bool {
        if let Sample::Text(text) = self {
            if text.trim_end_matches('\0').is_empty() {
                return true;
            }
            if fill.dtype().is_text() {
                return false;
            }
        }
        match self.as_f64() {
            Some(v) if v.is_nan() => true,
            Some(v) => !fill.dtype().is_text() && Scalar::from_f64(fill.dtype(), v) == fill,
            None => false,
        }
    }
}

impl From<f64> for Sample {
    fn from(value: f64) -> Self {
        Sample::Number(value)
    }
}

impl From<f32> for Sample {
    fn from(value: f32) -> Self {
        Sample::Number(value as f64)
    }
}

impl From<i32> for Sample {
    fn from(value: i32) -> Self {
        Sample::Number(value as f64)
    }
}

impl From<i64> for Sample {
    fn from(value: i64) -> Self {
        Sample::Number(value as f64)
    }
}

impl From<&str> for Sample {
    fn from(value: &str) -> Self {
        Sample::Text(value.to_string())
    }
}

impl From<String> for Sample {
    fn from(value: String) -> Self {
        Sample::Text(value)
    }
}

/// One decoded telemetry line: key to value. Absent keys were not measured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: BTreeMap<String, Sample>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Sample>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Sample>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Sample> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Sample)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Sample>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (key, value) in iter {
            record.insert(key, value);
        }
        record
    }
}

/// Write `sample` into `row` of `var`, converting to the element type.
/// NaN is stored as the fill value.
fn store(var: &mut Variable, row: usize, sample: &Sample) -> Result<()> {
    if var.dtype.is_text() {
        return match sample {
            Sample::Text(text) => var.write_text(row, text),
            Sample::Number(v) => var.write_text(row, &v.to_string()),
        };
    }
    let value = sample.as_f64().ok_or_else(|| Error::TypeMismatch {
        name: var.name.clone(),
        expected: var.dtype.name(),
        found: "text",
    })?;
    let scalar = if value.is_nan() {
        var.fill()
    } else {
        Scalar::from_f64(var.dtype, value)
    };
    var.write_row(row, scalar)
}

/// Store one value and its flag at `row`.
pub fn write_sample(
    ds: &mut Dataset,
    desc: &VariableDescriptor,
    key: &str,
    qc: &QcEngine,
    row: usize,
    sample: &Sample,
) -> Result<()> {
    let var = ds
        .variable_mut(&desc.name)
        .ok_or_else(|| Error::UnknownDatatype(key.to_string()))?;
    store(var, row, sample)?;
    let Some(qc_name) = desc.qc_name() else {
        return Ok(());
    };
    let series = qc.wants_series(key).then_some(&var.data);
    let flag = qc.evaluate(key, sample, var.fill(), series);
    match ds.variable_mut(&qc_name) {
        Some(qc_var) => qc_var.write_row(row, Scalar::Byte(flag)),
        None => {
            log::warn!("{key}: flag variable `{qc_name}` is missing");
            Ok(())
        }
    }
}

/// Overwrite a non-time variable through the same store-and-flag path.
pub fn set_scalar(
    ds: &mut Dataset,
    registry: &mut Registry,
    qc: &QcEngine,
    key: &str,
    sample: &Sample,
) -> Result<()> {
    registry.resolve(ds, key)?;
    let desc = registry
        .get(key)
        .ok_or_else(|| Error::UnknownDatatype(key.to_string()))?;
    if desc.is_series(registry.time_dimension()) {
        return Err(Error::invalid_descriptor(key, "time series are written per record"));
    }
    write_sample(ds, desc, key, qc, 0, sample)
}

/// Current value of a non-time variable, `None` while it holds its fill.
pub fn get_scalar(ds: &mut Dataset, registry: &mut Registry, key: &str) -> Result<Option<f64>> {
    let desc = registry.resolve(ds, key)?;
    let Some(var) = ds.variable(&desc.name) else {
        return Ok(None);
    };
    let fill = var.fill();
    Ok(var
        .read_row(0)
        .filter(|value| *value != fill)
        .map(|value| value.to_f64()))
}

/// Logs and swallows a value that does not fit its variable.
fn tolerate_mismatch(key: &str, result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(Error::TypeMismatch { name, expected, found }) => {
            log::warn!("{key}: cannot store {found} in `{name}` ({expected}), skipped");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Row cursor and companion rules of one open file.
#[derive(Debug, Clone)]
pub struct Inserter {
    cursor: usize,
    time_key: String,
    rules: Vec<CompanionRule>,
}

impl Inserter {
    /// Resume at the current length of the time variable.
    pub fn resume(ds: &Dataset, time_key: &str, time_variable: &str, rules: Vec<CompanionRule>) -> Self {
        let cursor = ds.variable(time_variable).map(|v| v.rows()).unwrap_or(0);
        Self {
            cursor,
            time_key: time_key.to_string(),
            rules,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn time_key(&self) -> &str {
        &self.time_key
    }

    /// Write one record at the cursor and advance it by one. Keys without a
    /// descriptor are logged and skipped; a record without a time fails.
    pub fn insert_record(
        &mut self,
        ds: &mut Dataset,
        registry: &mut Registry,
        qc: &QcEngine,
        record: &Record,
    ) -> Result<()> {
        let timestamp = record
            .get(&self.time_key)
            .and_then(Sample::as_f64)
            .filter(|t| t.is_finite())
            .ok_or_else(|| Error::MissingTimestamp(self.time_key.clone()))?;

        registry.resolve(ds, &self.time_key)?;
        let mut keys = Vec::with_capacity(record.len());
        for (key, sample) in record.iter() {
            if key == self.time_key {
                continue;
            }
            match registry.resolve(ds, key) {
                Ok(_) => keys.push((key, sample)),
                Err(Error::UnknownDatatype(_)) => log::warn!("{key} has no descriptor, skipped"),
                Err(Error::InvalidDescriptor { key, reason }) => {
                    log::warn!("{key}: cannot create variable ({reason}), skipped");
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(time) = registry.get(&self.time_key) {
            write_sample(ds, time, &self.time_key, qc, self.cursor, &Sample::Number(timestamp))?;
        }
        for (key, sample) in keys {
            let Some(desc) = registry.get(key) else {
                continue;
            };
            let series = desc.is_series(registry.time_dimension());
            let row = if series { self.cursor } else { 0 };
            let written = tolerate_mismatch(key, write_sample(ds, desc, key, qc, row, sample))?;
            if written && !series {
                self.propagate(ds, registry, qc, key, timestamp, record)?;
            }
        }

        self.cursor += 1;
        Ok(())
    }

    fn propagate(
        &self,
        ds: &mut Dataset,
        registry: &mut Registry,
        qc: &QcEngine,
        trigger: &str,
        timestamp: f64,
        record: &Record,
    ) -> Result<()> {
        for rule in self.rules.iter().filter(|r| r.trigger == trigger) {
            for companion in &rule.companions {
                let value = match &companion.source {
                    CompanionSource::Timestamp => Some(Sample::Number(timestamp)),
                    CompanionSource::Key(source) => record.get(source).cloned(),
                };
                let Some(value) = value else {
                    log::debug!("{trigger}: no value for companion `{}`", companion.target);
                    continue;
                };
                match set_scalar(ds, registry, qc, &companion.target, &value) {
                    Err(Error::UnknownDatatype(target)) => {
                        log::warn!("{trigger}: companion `{target}` has no descriptor, skipped");
                    }
                    result => {
                        tolerate_mismatch(&companion.target, result)?;
                    }
                }
            }
        }
        Ok(())
    }
}
