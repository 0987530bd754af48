//! Creates the containers described by a [`VariableDescriptor`].

use crate::error::{Error, Result};
use crate::format::{AttrValue, Attributes, DataType, Dataset, Scalar, FILL_VALUE_ATTR};
use crate::qc::FlagVocabulary;
use crate::schema::{json_attributes, DimensionKind, VariableDescriptor};

/// What [`Materializer::materialize`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    Created,
    /// The physical name already existed; nothing was touched.
    Existing,
}

#[derive(Debug, Clone)]
pub struct Materializer {
    vocabulary: FlagVocabulary,
    time_dimension: String,
}

impl Materializer {
    pub fn new(vocabulary: FlagVocabulary, time_dimension: impl Into<String>) -> Self {
        Self {
            vocabulary,
            time_dimension: time_dimension.into(),
        }
    }

    pub fn time_dimension(&self) -> &str {
        &self.time_dimension
    }

    /// Create the fixed dimension a dimension descriptor declares.
    pub fn declare_dimension(&self, ds: &mut Dataset, key: &str, desc: &VariableDescriptor) -> Result<()> {
        desc.validate(key)?;
        ds.add_dimension(&desc.name, desc.dimension_length)
    }

    /// Create the container for `desc`, plus its flag variable when requested.
    /// An existing physical name is left exactly as it is.
    pub fn materialize(&self, ds: &mut Dataset, key: &str, desc: &VariableDescriptor) -> Result<Materialized> {
        if ds.contains(&desc.name) {
            return Ok(Materialized::Existing);
        }
        desc.validate(key)?;
        let dtype = desc.element_type(key)?;

        let mut dims: Vec<String> = match desc.kind(&self.time_dimension) {
            DimensionKind::Time => {
                ds.add_dimension(&self.time_dimension, None)?;
                vec![self.time_dimension.clone()]
            }
            DimensionKind::Named(dim) => {
                if ds.dimension(dim).is_none() {
                    return Err(Error::invalid_descriptor(
                        key,
                        format!("dimension `{dim}` is not declared"),
                    ));
                }
                vec![dim.to_string()]
            }
            DimensionKind::Scalar => Vec::new(),
        };
        if dtype.is_text() {
            if let Some(len) = desc.string_length {
                let strlen = format!("{}_strlen", desc.name);
                ds.add_dimension(&strlen, Some(len))?;
                dims.push(strlen);
            }
        }
        let dim_refs: Vec<&str> = dims.iter().map(String::as_str).collect();

        let mut attrs = Attributes::new();
        let fill = desc
            .attrs
            .get(FILL_VALUE_ATTR)
            .and_then(AttrValue::from_json)
            .and_then(|v| v.first())
            .map(|s| s.cast(dtype))
            .unwrap_or_else(|| dtype.default_fill());
        attrs.set(FILL_VALUE_ATTR, fill);
        for (name, value) in desc.attributes().iter() {
            if name != FILL_VALUE_ATTR {
                attrs.set(name, value.clone());
            }
        }

        let qc_name = desc.qc_name();
        if let Some(qc_name) = &qc_name {
            attrs.set("ancillary_variables", qc_name.as_str());
        }
        ds.add_variable(&desc.name, dtype, &dim_refs, attrs)?;

        if let (Some(qc_name), Some(flag)) = (qc_name, &desc.status_flag) {
            let caller = json_attributes(&qc_name, &flag.attrs);
            let merged = caller.merged_with(&self.qc_defaults(desc)).sorted();
            let mut qc_attrs = Attributes::new();
            qc_attrs.set(FILL_VALUE_ATTR, DataType::Byte.default_fill());
            for (name, value) in merged.iter() {
                if name != FILL_VALUE_ATTR {
                    qc_attrs.set(name, value.clone());
                }
            }
            if ds.contains(&qc_name) {
                log::warn!("{key}: flag variable `{qc_name}` already exists, reusing it");
            } else {
                ds.add_variable(&qc_name, DataType::Byte, &dim_refs, qc_attrs)?;
            }
        }

        log::debug!("materialized `{}` ({dtype}) for {key}", desc.name);
        Ok(Materialized::Created)
    }

    /// Attributes every flag variable carries, overriding the caller's.
    fn qc_defaults(&self, desc: &VariableDescriptor) -> Attributes {
        let standard_name = desc.attr_text("standard_name").unwrap_or(&desc.name);
        let mut defaults = Attributes::new();
        defaults.set("standard_name", format!("{standard_name} status_flag"));
        defaults.set("flag_meanings", self.vocabulary.meanings());
        defaults.set("valid_min", Scalar::Byte(self.vocabulary.min()));
        defaults.set("valid_max", Scalar::Byte(self.vocabulary.max()));
        defaults.set("flag_values", self.vocabulary.values());
        defaults
    }
}
