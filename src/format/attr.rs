//! Attribute values and ordered attribute tables.

use std::fmt;

use crate::format::dtype::{ArrayData, DataType, Scalar};

/// Value of a variable or global attribute: text, or a typed numeric vector.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Values(ArrayData),
}

impl AttrValue {
    pub fn dtype(&self) -> DataType {
        match self {
            AttrValue::Text(_) => DataType::Char,
            AttrValue::Values(data) => data.dtype(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(text) => Some(text),
            AttrValue::Values(_) => None,
        }
    }

    /// First element, when numeric.
    pub fn first(&self) -> Option<Scalar> {
        match self {
            AttrValue::Text(_) => None,
            AttrValue::Values(data) => data.get(0),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.first().map(|s| s.to_f64())
    }

    /// Re-type a numeric attribute; text is returned unchanged.
    pub fn cast(&self, dtype: DataType) -> AttrValue {
        match self {
            AttrValue::Text(_) => self.clone(),
            AttrValue::Values(data) if data.dtype() == dtype => self.clone(),
            AttrValue::Values(data) => {
                let mut out = ArrayData::empty(dtype);
                out.resize(data.len(), dtype.default_fill());
                for i in 0..data.len() {
                    if let Some(value) = data.get(i) {
                        out.set(i, value);
                    }
                }
                AttrValue::Values(out)
            }
        }
    }

    /// Convert a JSON configuration value. `null`, objects and mixed arrays have
    /// no attribute representation and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<AttrValue> {
        use serde_json::Value;

        match value {
            Value::String(text) => Some(AttrValue::Text(text.clone())),
            Value::Bool(flag) => Some(AttrValue::Values(ArrayData::Int(vec![*flag as i32]))),
            Value::Number(_) => json_numbers(std::slice::from_ref(value)),
            Value::Array(items) if items.iter().all(|v| v.is_string()) && !items.is_empty() => {
                let joined = items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                Some(AttrValue::Text(joined))
            }
            Value::Array(items) if items.iter().all(|v| v.is_number()) && !items.is_empty() => {
                json_numbers(items)
            }
            _ => None,
        }
    }
}

fn json_numbers(items: &[serde_json::Value]) -> Option<AttrValue> {
    let all_int = items.iter().all(|v| {
        v.as_i64()
            .map(|i| i32::try_from(i).is_ok())
            .unwrap_or(false)
    });
    if all_int {
        let ints = items
            .iter()
            .filter_map(|v| v.as_i64())
            .map(|i| i as i32)
            .collect();
        return Some(AttrValue::Values(ArrayData::Int(ints)));
    }
    let doubles = items.iter().filter_map(|v| v.as_f64()).collect::<Vec<_>>();
    (doubles.len() == items.len()).then(|| AttrValue::Values(ArrayData::Double(doubles)))
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<Scalar> for AttrValue {
    fn from(value: Scalar) -> Self {
        AttrValue::Values(ArrayData::filled(value, 1))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Values(ArrayData::Double(vec![value]))
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Values(ArrayData::Int(vec![value]))
    }
}

impl From<i16> for AttrValue {
    fn from(value: i16) -> Self {
        AttrValue::Values(ArrayData::Short(vec![value]))
    }
}

impl From<Vec<i8>> for AttrValue {
    fn from(value: Vec<i8>) -> Self {
        AttrValue::Values(ArrayData::Byte(value))
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(text) => write!(f, "{text:?}"),
            AttrValue::Values(data) => {
                for i in 0..data.len() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if let Some(value) = data.get(i) {
                        write!(f, "{value}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Attribute table that keeps insertion order. Setting an existing name
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    entries: Vec<(String, AttrValue)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// `self ⊕ overrides`: every entry of `overrides` wins, everything else in
    /// `self` passes through unchanged.
    pub fn merged_with(&self, overrides: &Attributes) -> Attributes {
        let mut merged = self.clone();
        for (name, value) in overrides.iter() {
            merged.set(name, value.clone());
        }
        merged
    }

    /// Same entries sorted by name.
    pub fn sorted(&self) -> Attributes {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Attributes { entries }
    }
}

impl FromIterator<(String, AttrValue)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, AttrValue)>>(iter: I) -> Self {
        let mut attrs = Attributes::new();
        for (name, value) in iter {
            attrs.set(name, value);
        }
        attrs
    }
}
