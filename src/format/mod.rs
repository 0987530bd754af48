//! In-memory model of a netCDF classic dataset and its on-disk codec.
//!
//! A [`Dataset`] holds dimensions, global attributes and variables exactly as
//! they will be laid out in the file. Variables are addressed by *rows*: one
//! row is one step along the first dimension (one record for record
//! variables) and spans the product of the remaining dimensions. Scalar
//! variables have exactly one row of one element.

pub mod attr;
pub mod codec;
pub mod dtype;
pub mod file;

pub use attr::{AttrValue, Attributes};
pub use dtype::{ArrayData, DataType, Scalar};
pub use file::{NcFile, OpenMode};

use crate::error::{Error, Result};

pub const FILL_VALUE_ATTR: &str = "_FillValue";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    /// `None` marks the unlimited (record) dimension.
    pub len: Option<usize>,
}

impl Dimension {
    pub fn is_unlimited(&self) -> bool {
        self.len.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub dtype: DataType,
    pub dims: Vec<String>,
    pub attrs: Attributes,
    pub data: ArrayData,
    record: bool,
    row_len: usize,
}

impl Variable {
    pub fn is_record(&self) -> bool {
        self.record
    }

    /// Elements per row.
    pub fn row_len(&self) -> usize {
        self.row_len
    }

    pub fn rows(&self) -> usize {
        if self.row_len == 0 {
            0
        } else {
            self.data.len() / self.row_len
        }
    }

    /// The no-data sentinel: `_FillValue` when present, otherwise the type default.
    pub fn fill(&self) -> Scalar {
        self.attrs
            .get(FILL_VALUE_ATTR)
            .and_then(|v| v.first())
            .map(|s| s.cast(self.dtype))
            .unwrap_or_else(|| self.dtype.default_fill())
    }

    fn ensure_rows(&mut self, rows: usize) {
        let needed = rows * self.row_len;
        if self.data.len() < needed {
            let fill = self.fill();
            self.data.resize(needed, fill);
        }
    }

    /// Write `value` to every element of `row`, growing record variables.
    pub fn write_row(&mut self, row: usize, value: Scalar) -> Result<()> {
        self.check_row(row)?;
        self.ensure_rows(row + 1);
        let start = row * self.row_len;
        for i in start..start + self.row_len {
            self.data.set(i, value);
        }
        Ok(())
    }

    /// Write `text` into `row` of a char variable, NUL padded and truncated to
    /// the row length.
    pub fn write_text(&mut self, row: usize, text: &str) -> Result<()> {
        if self.dtype != DataType::Char {
            return Err(Error::TypeMismatch {
                name: self.name.clone(),
                expected: self.dtype.name(),
                found: "text",
            });
        }
        self.check_row(row)?;
        self.ensure_rows(row + 1);
        let start = row * self.row_len;
        let bytes = text.as_bytes();
        for i in 0..self.row_len {
            let byte = bytes.get(i).copied().unwrap_or(0);
            self.data.set(start + i, Scalar::Char(byte));
        }
        Ok(())
    }

    /// First element of `row`.
    pub fn read_row(&self, row: usize) -> Option<Scalar> {
        if row >= self.rows() {
            return None;
        }
        self.data.get(row * self.row_len)
    }

    pub fn read_text(&self, row: usize) -> Option<String> {
        if row >= self.rows() {
            return None;
        }
        self.data.text(row * self.row_len, self.row_len)
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if !self.record {
            let fixed_rows = self.data.len() / self.row_len.max(1);
            if row >= fixed_rows {
                return Err(Error::corrupt(format!(
                    "row {row} out of bounds for `{}` ({fixed_rows} rows)",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Pad a record variable to `rows` with its fill value.
    pub(crate) fn pad_rows(&mut self, rows: usize) {
        if self.record {
            self.ensure_rows(rows);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub dims: Vec<Dimension>,
    pub attrs: Attributes,
    pub vars: Vec<Variable>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.name == name)
    }

    pub fn record_dimension(&self) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.is_unlimited())
    }

    /// Declare a dimension. Re-declaring an existing name is a no-op.
    pub fn add_dimension(&mut self, name: &str, len: Option<usize>) -> Result<()> {
        if let Some(existing) = self.dimension(name) {
            if existing.len != len {
                log::warn!(
                    "dimension `{name}` already declared with length {:?}, ignoring {:?}",
                    existing.len,
                    len
                );
            }
            return Ok(());
        }
        if len.is_none() {
            if let Some(record) = self.record_dimension() {
                return Err(Error::invalid_descriptor(
                    name,
                    format!("record dimension `{}` already exists", record.name),
                ));
            }
        }
        self.dims.push(Dimension {
            name: name.to_string(),
            len,
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variable(name).is_some()
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.vars.iter_mut().find(|v| v.name == name)
    }

    /// Create a variable over already-declared dimensions, pre-filled with
    /// its fill value. Only the first dimension may be the record dimension.
    pub fn add_variable(
        &mut self,
        name: &str,
        dtype: DataType,
        dims: &[&str],
        attrs: Attributes,
    ) -> Result<&mut Variable> {
        if self.contains(name) {
            return Err(Error::invalid_descriptor(name, "variable already exists"));
        }
        let mut record = false;
        let mut fixed = Vec::with_capacity(dims.len());
        for (i, dim_name) in dims.iter().enumerate() {
            let dim = self.dimension(dim_name).ok_or_else(|| {
                Error::invalid_descriptor(name, format!("unknown dimension `{dim_name}`"))
            })?;
            match dim.len {
                None if i == 0 => record = true,
                None => {
                    return Err(Error::invalid_descriptor(
                        name,
                        "record dimension must come first",
                    ))
                }
                Some(len) => fixed.push(len),
            }
        }
        let (row_len, fixed_rows) = row_layout(dtype, record, &fixed);
        let initial_rows = if record { self.numrecs() } else { fixed_rows };

        let mut variable = Variable {
            name: name.to_string(),
            dtype,
            dims: dims.iter().map(|d| d.to_string()).collect(),
            attrs,
            data: ArrayData::empty(dtype),
            record,
            row_len,
        };
        variable.ensure_rows(initial_rows);
        let index = self.vars.len();
        self.vars.push(variable);
        Ok(&mut self.vars[index])
    }

    /// Number of records: the longest record variable.
    pub fn numrecs(&self) -> usize {
        self.vars
            .iter()
            .filter(|v| v.is_record())
            .map(|v| v.rows())
            .max()
            .unwrap_or(0)
    }

    /// Smallest classic format version able to hold this dataset.
    pub fn format_version(&self) -> u8 {
        let needs_int64 = self.vars.iter().any(|v| {
            v.dtype == DataType::Int64 || v.attrs.iter().any(|(_, a)| a.dtype() == DataType::Int64)
        }) || self.attrs.iter().any(|(_, a)| a.dtype() == DataType::Int64);
        if needs_int64 {
            5
        } else {
            2
        }
    }

    pub(crate) fn from_parts(
        dims: Vec<Dimension>,
        attrs: Attributes,
        vars: Vec<Variable>,
    ) -> Self {
        Self { dims, attrs, vars }
    }
}

/// Elements per row and, for fixed variables, the number of rows. A char
/// variable's last dimension is its string length, so a char variable over a
/// single fixed dimension holds one string.
pub(crate) fn row_layout(dtype: DataType, record: bool, fixed: &[usize]) -> (usize, usize) {
    if !record && fixed.is_empty() {
        return (1, 1);
    }
    if dtype.is_text() && !record && fixed.len() == 1 {
        return (fixed[0], 1);
    }
    if record {
        (fixed.iter().product(), 0)
    } else {
        (fixed[1..].iter().product(), fixed[0])
    }
}

impl Variable {
    /// Assemble a variable read back from disk.
    pub(crate) fn from_parts(
        name: String,
        dtype: DataType,
        dims: Vec<String>,
        attrs: Attributes,
        data: ArrayData,
        record: bool,
        row_len: usize,
    ) -> Self {
        Self {
            name,
            dtype,
            dims,
            attrs,
            data,
            record,
            row_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.add_dimension("time", None).unwrap();
        ds.add_dimension("traj_strlen", Some(8)).unwrap();
        ds
    }

    #[test]
    fn record_variable_grows_with_fill() {
        let mut ds = dataset();
        let var = ds
            .add_variable("depth", DataType::Double, &["time"], Attributes::new())
            .unwrap();
        var.write_row(2, Scalar::Double(4.5)).unwrap();
        assert_eq!(var.rows(), 3);
        assert_eq!(var.read_row(0), Some(DataType::Double.default_fill()));
        assert_eq!(var.read_row(2), Some(Scalar::Double(4.5)));
        assert_eq!(ds.numrecs(), 3);
    }

    #[test]
    fn fixed_variable_rejects_out_of_range_rows() {
        let mut ds = dataset();
        let var = ds
            .add_variable("segment_id", DataType::Short, &[], Attributes::new())
            .unwrap();
        assert!(var.write_row(0, Scalar::Short(3)).is_ok());
        assert!(var.write_row(1, Scalar::Short(3)).is_err());
    }

    #[test]
    fn char_rows_hold_text() {
        let mut ds = dataset();
        let var = ds
            .add_variable("trajectory", DataType::Char, &["traj_strlen"], Attributes::new())
            .unwrap();
        assert_eq!(var.row_len(), 8);
        assert_eq!(var.rows(), 1);
        var.write_text(0, "usf-bass-2014").unwrap();
        assert_eq!(var.read_text(0).as_deref(), Some("usf-bass"));
    }

    #[test]
    fn text_variable_with_row_dimension() {
        let mut ds = dataset();
        ds.add_dimension("trajectory", Some(1)).unwrap();
        let var = ds
            .add_variable(
                "trajectory_name",
                DataType::Char,
                &["trajectory", "traj_strlen"],
                Attributes::new(),
            )
            .unwrap();
        var.write_text(0, "usf-bass").unwrap();
        assert_eq!(var.read_text(0).as_deref(), Some("usf-bass"));
    }

    #[test]
    fn fill_value_attribute_overrides_default() {
        let mut ds = dataset();
        let mut attrs = Attributes::new();
        attrs.set(FILL_VALUE_ATTR, 9999.0);
        let var = ds
            .add_variable("depth", DataType::Double, &["time"], attrs)
            .unwrap();
        assert_eq!(var.fill(), Scalar::Double(9999.0));
    }

    #[test]
    fn second_record_dimension_is_rejected() {
        let mut ds = dataset();
        assert!(ds.add_dimension("time", None).is_ok());
        assert!(ds.add_dimension("other", None).is_err());
    }
}
