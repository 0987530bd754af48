//! Element types, typed scalars and typed column storage.
//!
//! Every variable stores its samples in an [`ArrayData`] whose variant is fixed
//! by the variable's [`DataType`]. Values travel between the schema layer and
//! storage as [`Scalar`]s, which always carry their own type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const NC_FILL_BYTE: i8 = -127;
pub const NC_FILL_CHAR: u8 = 0;
pub const NC_FILL_SHORT: i16 = -32767;
pub const NC_FILL_INT: i32 = -2_147_483_647;
pub const NC_FILL_INT64: i64 = -9_223_372_036_854_775_806;
pub const NC_FILL_FLOAT: f32 = 9.969_209_968_386_869e36_f32;
pub const NC_FILL_DOUBLE: f64 = 9.969_209_968_386_869e36;

/// Element type of a variable or attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    Byte,
    Char,
    Short,
    Int,
    Int64,
    Float,
    Double,
}

impl DataType {
    /// Parse a short type code as used in descriptor files (`f8`, `i2`, `S1`, ...).
    pub fn from_code(code: &str) -> Option<Self> {
        let dtype = match code {
            "i1" | "b" | "B" | "byte" => DataType::Byte,
            "S1" | "c" | "char" => DataType::Char,
            "i2" | "h" | "short" => DataType::Short,
            "i4" | "i" | "int" => DataType::Int,
            "i8" | "int64" => DataType::Int64,
            "f4" | "f" | "float" => DataType::Float,
            "f8" | "d" | "double" => DataType::Double,
            _ => return None,
        };
        Some(dtype)
    }

    pub const fn code(&self) -> &'static str {
        match self {
            DataType::Byte => "i1",
            DataType::Char => "S1",
            DataType::Short => "i2",
            DataType::Int => "i4",
            DataType::Int64 => "i8",
            DataType::Float => "f4",
            DataType::Double => "f8",
        }
    }

    /// CDL type name.
    pub const fn name(&self) -> &'static str {
        match self {
            DataType::Byte => "byte",
            DataType::Char => "char",
            DataType::Short => "short",
            DataType::Int => "int",
            DataType::Int64 => "int64",
            DataType::Float => "float",
            DataType::Double => "double",
        }
    }

    pub const fn nc_type(&self) -> u32 {
        match self {
            DataType::Byte => 1,
            DataType::Char => 2,
            DataType::Short => 3,
            DataType::Int => 4,
            DataType::Float => 5,
            DataType::Double => 6,
            DataType::Int64 => 10,
        }
    }

    pub fn from_nc_type(nc_type: u32) -> Result<Self> {
        match nc_type {
            1 => Ok(DataType::Byte),
            2 => Ok(DataType::Char),
            3 => Ok(DataType::Short),
            4 => Ok(DataType::Int),
            5 => Ok(DataType::Float),
            6 => Ok(DataType::Double),
            10 => Ok(DataType::Int64),
            other => Err(Error::corrupt(format!("unsupported nc_type {other}"))),
        }
    }

    /// Size of one element in bytes.
    pub const fn size(&self) -> usize {
        match self {
            DataType::Byte | DataType::Char => 1,
            DataType::Short => 2,
            DataType::Int | DataType::Float => 4,
            DataType::Int64 | DataType::Double => 8,
        }
    }

    pub const fn is_text(&self) -> bool {
        matches!(self, DataType::Char)
    }

    pub const fn default_fill(&self) -> Scalar {
        match self {
            DataType::Byte => Scalar::Byte(NC_FILL_BYTE),
            DataType::Char => Scalar::Char(NC_FILL_CHAR),
            DataType::Short => Scalar::Short(NC_FILL_SHORT),
            DataType::Int => Scalar::Int(NC_FILL_INT),
            DataType::Int64 => Scalar::Int64(NC_FILL_INT64),
            DataType::Float => Scalar::Float(NC_FILL_FLOAT),
            DataType::Double => Scalar::Double(NC_FILL_DOUBLE),
        }
    }
}

impl TryFrom<String> for DataType {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        DataType::from_code(&value).ok_or_else(|| format!("unknown element type `{value}`"))
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.code().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Byte(i8),
    Char(u8),
    Short(i16),
    Int(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
}

impl Scalar {
    pub const fn dtype(&self) -> DataType {
        match self {
            Scalar::Byte(_) => DataType::Byte,
            Scalar::Char(_) => DataType::Char,
            Scalar::Short(_) => DataType::Short,
            Scalar::Int(_) => DataType::Int,
            Scalar::Int64(_) => DataType::Int64,
            Scalar::Float(_) => DataType::Float,
            Scalar::Double(_) => DataType::Double,
        }
    }

    /// Convert a float sample into `dtype`. Integer targets truncate toward zero
    /// and saturate at the type bounds.
    pub fn from_f64(dtype: DataType, value: f64) -> Self {
        match dtype {
            DataType::Byte => Scalar::Byte(value as i8),
            DataType::Char => Scalar::Char(value as u8),
            DataType::Short => Scalar::Short(value as i16),
            DataType::Int => Scalar::Int(value as i32),
            DataType::Int64 => Scalar::Int64(value as i64),
            DataType::Float => Scalar::Float(value as f32),
            DataType::Double => Scalar::Double(value),
        }
    }

    pub fn to_f64(&self) -> f64 {
        match *self {
            Scalar::Byte(v) => v as f64,
            Scalar::Char(v) => v as f64,
            Scalar::Short(v) => v as f64,
            Scalar::Int(v) => v as f64,
            Scalar::Int64(v) => v as f64,
            Scalar::Float(v) => v as f64,
            Scalar::Double(v) => v,
        }
    }

    /// Re-type this scalar, going through `f64` except for same-type casts.
    pub fn cast(&self, dtype: DataType) -> Self {
        if self.dtype() == dtype {
            *self
        } else {
            Scalar::from_f64(dtype, self.to_f64())
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Byte(v) => write!(f, "{v}b"),
            Scalar::Char(v) => write!(f, "'{}'", *v as char),
            Scalar::Short(v) => write!(f, "{v}s"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Int64(v) => write!(f, "{v}L"),
            Scalar::Float(v) => write!(f, "{v}f"),
            Scalar::Double(v) => write!(f, "{v}"),
        }
    }
}

/// Typed, flat, row-major storage for one variable.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Byte(Vec<i8>),
    Char(Vec<u8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Int64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

macro_rules! with_vec {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::Byte($v) => $body,
            ArrayData::Char($v) => $body,
            ArrayData::Short($v) => $body,
            ArrayData::Int($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::Float($v) => $body,
            ArrayData::Double($v) => $body,
        }
    };
}

impl ArrayData {
    pub fn empty(dtype: DataType) -> Self {
        match dtype {
            DataType::Byte => ArrayData::Byte(Vec::new()),
            DataType::Char => ArrayData::Char(Vec::new()),
            DataType::Short => ArrayData::Short(Vec::new()),
            DataType::Int => ArrayData::Int(Vec::new()),
            DataType::Int64 => ArrayData::Int64(Vec::new()),
            DataType::Float => ArrayData::Float(Vec::new()),
            DataType::Double => ArrayData::Double(Vec::new()),
        }
    }

    pub fn filled(fill: Scalar, len: usize) -> Self {
        let mut data = ArrayData::empty(fill.dtype());
        data.resize(len, fill);
        data
    }

    pub fn dtype(&self) -> DataType {
        match self {
            ArrayData::Byte(_) => DataType::Byte,
            ArrayData::Char(_) => DataType::Char,
            ArrayData::Short(_) => DataType::Short,
            ArrayData::Int(_) => DataType::Int,
            ArrayData::Int64(_) => DataType::Int64,
            ArrayData::Float(_) => DataType::Float,
            ArrayData::Double(_) => DataType::Double,
        }
    }

    pub fn len(&self) -> usize {
        with_vec!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow or shrink to `len` elements, padding with `fill`.
    pub fn resize(&mut self, len: usize, fill: Scalar) {
        let fill = fill.cast(self.dtype());
        match (self, fill) {
            (ArrayData::Byte(v), Scalar::Byte(f)) => v.resize(len, f),
            (ArrayData::Char(v), Scalar::Char(f)) => v.resize(len, f),
            (ArrayData::Short(v), Scalar::Short(f)) => v.resize(len, f),
            (ArrayData::Int(v), Scalar::Int(f)) => v.resize(len, f),
            (ArrayData::Int64(v), Scalar::Int64(f)) => v.resize(len, f),
            (ArrayData::Float(v), Scalar::Float(f)) => v.resize(len, f),
            (ArrayData::Double(v), Scalar::Double(f)) => v.resize(len, f),
            _ => unreachable!("fill was cast to the array type"),
        }
    }

    pub fn get(&self, index: usize) -> Option<Scalar> {
        match self {
            ArrayData::Byte(v) => v.get(index).copied().map(Scalar::Byte),
            ArrayData::Char(v) => v.get(index).copied().map(Scalar::Char),
            ArrayData::Short(v) => v.get(index).copied().map(Scalar::Short),
            ArrayData::Int(v) => v.get(index).copied().map(Scalar::Int),
            ArrayData::Int64(v) => v.get(index).copied().map(Scalar::Int64),
            ArrayData::Float(v) => v.get(index).copied().map(Scalar::Float),
            ArrayData::Double(v) => v.get(index).copied().map(Scalar::Double),
        }
    }

    /// Store `value` at `index`; the array must already be long enough.
    pub fn set(&mut self, index: usize, value: Scalar) {
        let value = value.cast(self.dtype());
        match (self, value) {
            (ArrayData::Byte(v), Scalar::Byte(x)) => v[index] = x,
            (ArrayData::Char(v), Scalar::Char(x)) => v[index] = x,
            (ArrayData::Short(v), Scalar::Short(x)) => v[index] = x,
            (ArrayData::Int(v), Scalar::Int(x)) => v[index] = x,
            (ArrayData::Int64(v), Scalar::Int64(x)) => v[index] = x,
            (ArrayData::Float(v), Scalar::Float(x)) => v[index] = x,
            (ArrayData::Double(v), Scalar::Double(x)) => v[index] = x,
            _ => unreachable!("scalar was cast to the array type"),
        }
    }

    /// Every element widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        (0..self.len())
            .filter_map(|i| self.get(i))
            .map(|s| s.to_f64())
            .collect()
    }

    /// Elements `[start, start + count)` as text, trailing NULs trimmed.
    pub fn text(&self, start: usize, count: usize) -> Option<String> {
        match self {
            ArrayData::Char(v) => {
                let end = (start + count).min(v.len());
                let bytes = v.get(start..end)?;
                let trimmed = match bytes.iter().rposition(|b| *b != 0) {
                    Some(last) => &bytes[..=last],
                    None => &[],
                };
                Some(String::from_utf8_lossy(trimmed).into_owned())
            }
            _ => None,
        }
    }

    /// Append elements `[start, start + count)` to `out` in big-endian order.
    pub fn write_be(&self, start: usize, count: usize, out: &mut Vec<u8>) {
        let end = start + count;
        match self {
            ArrayData::Byte(v) => out.extend(v[start..end].iter().map(|x| *x as u8)),
            ArrayData::Char(v) => out.extend_from_slice(&v[start..end]),
            ArrayData::Short(v) => v[start..end]
                .iter()
                .for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
            ArrayData::Int(v) => v[start..end]
                .iter()
                .for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
            ArrayData::Int64(v) => v[start..end]
                .iter()
                .for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
            ArrayData::Float(v) => v[start..end]
                .iter()
                .for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
            ArrayData::Double(v) => v[start..end]
                .iter()
                .for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
        }
    }

    /// Append `bytes.len() / dtype.size()` big-endian elements.
    pub fn extend_from_be(&mut self, bytes: &[u8]) {
        match self {
            ArrayData::Byte(v) => v.extend(bytes.iter().map(|b| *b as i8)),
            ArrayData::Char(v) => v.extend_from_slice(bytes),
            ArrayData::Short(v) => v.extend(
                bytes
                    .chunks_exact(2)
                    .map(|c| i16::from_be_bytes([c[0], c[1]])),
            ),
            ArrayData::Int(v) => v.extend(
                bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]])),
            ),
            ArrayData::Int64(v) => {
                v.extend(bytes.chunks_exact(8).map(|c| i64::from_be_bytes(word(c))))
            }
            ArrayData::Float(v) => v.extend(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]])),
            ),
            ArrayData::Double(v) => {
                v.extend(bytes.chunks_exact(8).map(|c| f64::from_be_bytes(word(c))))
            }
        }
    }
}

fn word(chunk: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(chunk);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_parse() {
        assert_eq!(DataType::from_code("f8"), Some(DataType::Double));
        assert_eq!(DataType::from_code("i1"), Some(DataType::Byte));
        assert_eq!(DataType::from_code("S1"), Some(DataType::Char));
        assert_eq!(DataType::from_code("u2"), None);
    }

    #[test]
    fn descriptor_type_deserializes_from_code() {
        let dtype: DataType = serde_json::from_str("\"i2\"").unwrap();
        assert_eq!(dtype, DataType::Short);
        assert!(serde_json::from_str::<DataType>("\"x9\"").is_err());
    }

    #[test]
    fn resize_pads_with_fill() {
        let mut data = ArrayData::empty(DataType::Short);
        data.resize(3, DataType::Short.default_fill());
        assert_eq!(data, ArrayData::Short(vec![NC_FILL_SHORT; 3]));
    }

    #[test]
    fn set_casts_to_array_type() {
        let mut data = ArrayData::filled(Scalar::Int(0), 2);
        data.set(1, Scalar::Double(41.9));
        assert_eq!(data.get(1), Some(Scalar::Int(41)));
    }

    #[test]
    fn big_endian_layout_is_exact() {
        let data = ArrayData::Short(vec![1, -2]);
        let mut out = Vec::new();
        data.write_be(0, 2, &mut out);
        assert_eq!(out, vec![0x00, 0x01, 0xFF, 0xFE]);

        let mut back = ArrayData::empty(DataType::Short);
        back.extend_from_be(&out);
        assert_eq!(back, data);
    }

    #[test]
    fn text_trims_trailing_nul() {
        let data = ArrayData::Char(b"usf-bass\0\0".to_vec());
        assert_eq!(data.text(0, 10).as_deref(), Some("usf-bass"));
    }
}
