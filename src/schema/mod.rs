//! Declarative variable descriptors and the registry that tracks them.

pub mod registry;

pub use registry::{RegistrationState, Registry};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::JsonMap;
use crate::error::{Error, Result};
use crate::format::{AttrValue, Attributes, DataType};

/// Request for a paired quality-flag variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusFlag {
    /// Physical name of the flag variable. Defaults to `<name>_qc`.
    pub name: Option<String>,
    pub attrs: JsonMap,
}

/// One entry of a datatypes document.
///
/// ```json
/// "m_depth-m": {
///     "name": "depth", "type": "f8", "dimension": "time",
///     "global_bound": "geospatial_vertical",
///     "attrs": { "units": "m", "standard_name": "depth" },
///     "status_flag": { "attrs": { "long_name": "depth Quality Flag" } }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableDescriptor {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DataType>,
    /// Dimension name; absent or empty for scalars.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    pub attrs: JsonMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_flag: Option<StatusFlag>,
    /// Prefix of the file-level bound attributes this variable feeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_bound: Option<String>,
    /// Declares a fixed dimension named `name` instead of a variable.
    pub is_dimension: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension_length: Option<usize>,
    /// Marks the descriptor of the time coordinate.
    pub is_time: bool,
    /// Characters per value for text variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_length: Option<usize>,
}

/// Shape of a variable relative to the time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionKind<'a> {
    /// Indexed by the insertion cursor.
    Time,
    /// Fixed named dimension; written at row 0 like a scalar.
    Named(&'a str),
    Scalar,
}

impl VariableDescriptor {
    /// Descriptor of the time coordinate and its flag variable.
    pub fn time(name: &str) -> Self {
        let attrs: JsonMap = [
            ("axis", "T"),
            ("calendar", "gregorian"),
            ("units", "seconds since 1970-01-01 00:00:00 UTC"),
            ("standard_name", "time"),
            ("long_name", "Time"),
            ("observation_type", "measured"),
            ("sensor_name", " "),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::from(v)))
        .collect();

        let mut flag_attrs = JsonMap::new();
        flag_attrs.insert(
            "long_name".to_string(),
            format!("{name} Quality Flag").into(),
        );
        Self {
            name: name.to_string(),
            dtype: Some(DataType::Double),
            dimension: Some(name.to_string()),
            attrs,
            status_flag: Some(StatusFlag {
                name: None,
                attrs: flag_attrs,
            }),
            is_time: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn kind(&self, time_dimension: &str) -> DimensionKind<'_> {
        match self.dimension.as_deref() {
            None | Some("") => DimensionKind::Scalar,
            Some(dim) if dim == time_dimension => DimensionKind::Time,
            Some(dim) => DimensionKind::Named(dim),
        }
    }

    pub fn is_series(&self, time_dimension: &str) -> bool {
        self.kind(time_dimension) == DimensionKind::Time
    }

    /// Physical name of the paired flag variable, when one is requested.
    pub fn qc_name(&self) -> Option<String> {
        self.status_flag.as_ref().map(|flag| {
            flag.name
                .clone()
                .unwrap_or_else(|| format!("{}_qc", self.name))
        })
    }

    /// Element type, required for every variable descriptor.
    pub fn element_type(&self, key: &str) -> Result<DataType> {
        self.dtype
            .ok_or_else(|| Error::invalid_descriptor(key, "missing `type`"))
    }

    /// Check the fields a non-empty descriptor must carry.
    pub fn validate(&self, key: &str) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid_descriptor(key, "missing `name`"));
        }
        if self.is_dimension {
            return match self.dimension_length {
                Some(len) if len > 0 => Ok(()),
                _ => Err(Error::invalid_descriptor(
                    key,
                    "dimension needs a positive `dimension_length`",
                )),
            };
        }
        self.element_type(key)?;
        Ok(())
    }

    /// Descriptor attributes converted and sorted by name. Values with no
    /// attribute representation are dropped with a warning.
    pub fn attributes(&self) -> Attributes {
        json_attributes(&self.name, &self.attrs)
    }

    pub fn attr_text(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(|v| v.as_str())
    }
}

/// Convert a JSON attribute map in key order.
pub fn json_attributes(owner: &str, map: &BTreeMap<String, serde_json::Value>) -> Attributes {
    let mut attrs = Attributes::new();
    for (name, value) in map {
        match AttrValue::from_json(value) {
            Some(converted) => attrs.set(name.clone(), converted),
            None => log::warn!("{owner}: attribute `{name}` has no file representation, skipped"),
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_descriptor_document() {
        let desc: VariableDescriptor = serde_json::from_value(json!({
            "name": "depth",
            "type": "f8",
            "dimension": "time",
            "global_bound": "geospatial_vertical",
            "attrs": { "units": "m", "standard_name": "depth" },
            "status_flag": { "attrs": { "long_name": "depth Quality Flag" } }
        }))
        .unwrap();
        assert_eq!(desc.dtype, Some(DataType::Double));
        assert_eq!(desc.kind("time"), DimensionKind::Time);
        assert_eq!(desc.qc_name().as_deref(), Some("depth_qc"));
        assert!(desc.validate("m_depth-m").is_ok());
    }

    #[test]
    fn dimension_kinds() {
        let mut desc = VariableDescriptor {
            name: "time_uv".into(),
            dtype: Some(DataType::Double),
            dimension: Some("time_uv".into()),
            ..Default::default()
        };
        assert_eq!(desc.kind("time"), DimensionKind::Named("time_uv"));
        desc.dimension = Some(String::new());
        assert_eq!(desc.kind("time"), DimensionKind::Scalar);
        desc.dimension = None;
        assert_eq!(desc.kind("time"), DimensionKind::Scalar);
    }

    #[test]
    fn validation_rules() {
        assert!(VariableDescriptor::default().is_empty());

        let no_type = VariableDescriptor {
            name: "depth".into(),
            ..Default::default()
        };
        assert!(matches!(
            no_type.validate("m_depth-m"),
            Err(Error::InvalidDescriptor { .. })
        ));

        let dimension = VariableDescriptor {
            name: "time_uv".into(),
            is_dimension: true,
            dimension_length: Some(1),
            ..Default::default()
        };
        assert!(dimension.validate("time_uv").is_ok());
    }

    #[test]
    fn explicit_flag_name_wins() {
        let desc = VariableDescriptor {
            name: "depth".into(),
            status_flag: Some(StatusFlag {
                name: Some("depth_status_flag".into()),
                attrs: JsonMap::new(),
            }),
            ..Default::default()
        };
        assert_eq!(desc.qc_name().as_deref(), Some("depth_status_flag"));
    }

    #[test]
    fn time_descriptor_shape() {
        let desc = VariableDescriptor::time("time");
        assert!(desc.is_time);
        assert!(desc.is_series("time"));
        assert_eq!(desc.qc_name().as_deref(), Some("time_qc"));
        assert_eq!(desc.attr_text("units"), Some("seconds since 1970-01-01 00:00:00 UTC"));
    }
}
