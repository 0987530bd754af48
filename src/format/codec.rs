//! netCDF classic binary codec.
//!
//! # Layout
//!
//! ```text
//! header  = magic numrecs dim_list gatt_list var_list
//! magic   = 'C' 'D' 'F' version          (1, 2 or 5)
//! list    = ABSENT | tag nelems [item ...]
//! var     = name ndims [dimid ...] vatt_list nc_type vsize begin
//! data    = non-record variables in order, then numrecs records, each
//!           holding one slab of every record variable in order
//! ```
//!
//! All integers are big-endian. Names, attribute values and slabs are padded
//! to 4 bytes, except the record slab when there is exactly one record
//! variable. `NON_NEG` counts are 32-bit in versions 1 and 2 and 64-bit in
//! version 5; `begin` offsets are 32-bit only in version 1.

use crate::error::{Error, Result};
use crate::format::attr::{AttrValue, Attributes};
use crate::format::dtype::{ArrayData, DataType};
use crate::format::{row_layout, Dataset, Dimension, Variable};

pub const MAGIC: &[u8; 3] = b"CDF";
pub const NC_DIMENSION: u32 = 0x0A;
pub const NC_VARIABLE: u32 = 0x0B;
pub const NC_ATTRIBUTE: u32 = 0x0C;
const STREAMING: u32 = 0xFFFF_FFFF;

#[inline]
fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

fn check_version(version: u8) -> Result<()> {
    match version {
        1 | 2 | 5 => Ok(()),
        other => Err(Error::UnsupportedVersion(other)),
    }
}

struct HeaderWriter {
    out: Vec<u8>,
    version: u8,
}

impl HeaderWriter {
    fn u32(&mut self, value: u32) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    fn non_neg(&mut self, value: usize) {
        if self.version == 5 {
            self.out.extend_from_slice(&(value as u64).to_be_bytes());
        } else {
            self.u32(value as u32);
        }
    }

    fn offset(&mut self, value: u64) {
        if self.version == 1 {
            self.u32(value as u32);
        } else {
            self.out.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn pad(&mut self) {
        let padded = pad4(self.out.len());
        self.out.resize(padded, 0);
    }

    fn name(&mut self, name: &str) {
        self.non_neg(name.len());
        self.out.extend_from_slice(name.as_bytes());
        self.pad();
    }

    fn list_header(&mut self, tag: u32, len: usize) {
        if len == 0 {
            self.u32(0);
            self.non_neg(0);
        } else {
            self.u32(tag);
            self.non_neg(len);
        }
    }

    fn attributes(&mut self, attrs: &Attributes) {
        self.list_header(NC_ATTRIBUTE, attrs.len());
        for (name, value) in attrs.iter() {
            self.name(name);
            self.u32(value.dtype().nc_type());
            match value {
                AttrValue::Text(text) => {
                    self.non_neg(text.len());
                    self.out.extend_from_slice(text.as_bytes());
                }
                AttrValue::Values(data) => {
                    self.non_neg(data.len());
                    data.write_be(0, data.len(), &mut self.out);
                }
            }
            self.pad();
        }
    }
}

/// Per-variable placement computed before the header is written.
struct Placement {
    vsize: u64,
    begin: u64,
}

fn slab_bytes(var: &Variable) -> usize {
    var.row_len() * var.dtype.size()
}

fn record_slab_len(var: &Variable, record_vars: usize) -> usize {
    if record_vars == 1 {
        slab_bytes(var)
    } else {
        pad4(slab_bytes(var))
    }
}

/// Encode with the smallest version able to hold the dataset.
pub fn encode(ds: &Dataset) -> Result<Vec<u8>> {
    encode_version(ds, ds.format_version())
}

pub fn encode_version(ds: &Dataset, version: u8) -> Result<Vec<u8>> {
    check_version(version)?;
    if version != 5 && ds.format_version() == 5 {
        return Err(Error::UnsupportedVersion(version));
    }
    let numrecs = ds.numrecs();
    let record_vars = ds.vars.iter().filter(|v| v.is_record()).count();

    let dim_ids = |var: &Variable| -> Result<Vec<usize>> {
        var.dims
            .iter()
            .map(|name| {
                ds.dims
                    .iter()
                    .position(|d| &d.name == name)
                    .ok_or_else(|| Error::corrupt(format!("`{}` uses unknown dimension `{name}`", var.name)))
            })
            .collect()
    };

    let write_header = |placements: &[Placement]| -> Result<Vec<u8>> {
        let mut w = HeaderWriter {
            out: Vec::with_capacity(1024),
            version,
        };
        w.out.extend_from_slice(MAGIC);
        w.out.push(version);
        w.non_neg(numrecs);

        w.list_header(NC_DIMENSION, ds.dims.len());
        for dim in &ds.dims {
            w.name(&dim.name);
            w.non_neg(dim.len.unwrap_or(0));
        }
        w.attributes(&ds.attrs);

        w.list_header(NC_VARIABLE, ds.vars.len());
        for (var, placement) in ds.vars.iter().zip(placements) {
            w.name(&var.name);
            let ids = dim_ids(var)?;
            w.non_neg(ids.len());
            for id in ids {
                w.non_neg(id);
            }
            w.attributes(&var.attrs);
            w.u32(var.dtype.nc_type());
            let vsize = if version != 5 && placement.vsize > u32::MAX as u64 - 3 {
                u32::MAX as u64
            } else {
                placement.vsize
            };
            w.non_neg(vsize as usize);
            w.offset(placement.begin);
        }
        Ok(w.out)
    };

    let sizing: Vec<Placement> = ds
        .vars
        .iter()
        .map(|_| Placement { vsize: 0, begin: 0 })
        .collect();
    let header_len = write_header(&sizing)?.len() as u64;

    let mut placements = Vec::with_capacity(ds.vars.len());
    let mut offset = header_len;
    for var in &ds.vars {
        if var.is_record() {
            placements.push(Placement { vsize: 0, begin: 0 });
            continue;
        }
        let size = pad4(var.data.len() * var.dtype.size()) as u64;
        placements.push(Placement {
            vsize: size,
            begin: offset,
        });
        offset += size;
    }
    let mut record_offset = offset;
    for (var, placement) in ds.vars.iter().zip(placements.iter_mut()) {
        if var.is_record() {
            placement.vsize = pad4(slab_bytes(var)) as u64;
            placement.begin = record_offset;
            record_offset += record_slab_len(var, record_vars) as u64;
        }
    }

    let mut out = write_header(&placements)?;
    debug_assert_eq!(out.len() as u64, header_len);

    for var in ds.vars.iter().filter(|v| !v.is_record()) {
        var.data.write_be(0, var.data.len(), &mut out);
        let padded = pad4(out.len());
        out.resize(padded, 0);
    }

    let fill_slabs: Vec<Option<ArrayData>> = ds
        .vars
        .iter()
        .map(|v| v.is_record().then(|| ArrayData::filled(v.fill(), v.row_len())))
        .collect();
    for record in 0..numrecs {
        for (var, fill) in ds.vars.iter().zip(&fill_slabs) {
            let Some(fill) = fill else { continue };
            let start_len = out.len();
            if record < var.rows() {
                var.data
                    .write_be(record * var.row_len(), var.row_len(), &mut out);
            } else {
                fill.write_be(0, fill.len(), &mut out);
            }
            let slab_end = start_len + record_slab_len(var, record_vars);
            out.resize(slab_end, 0);
        }
    }

    Ok(out)
}

struct HeaderReader<'a> {
    buf: &'a [u8],
    pos: usize,
    version: u8,
}

impl<'a> HeaderReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| Error::corrupt("length overflow"))?;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| Error::corrupt("unexpected end of header"))?;
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    fn non_neg(&mut self) -> Result<usize> {
        let value = if self.version == 5 {
            self.u64()?
        } else {
            self.u32()? as u64
        };
        usize::try_from(value).map_err(|_| Error::corrupt("count exceeds address space"))
    }

    fn offset(&mut self) -> Result<u64> {
        if self.version == 1 {
            Ok(self.u32()? as u64)
        } else {
            self.u64()
        }
    }

    fn skip_pad(&mut self) -> Result<()> {
        let padded = pad4(self.pos);
        self.take(padded - self.pos)?;
        Ok(())
    }

    fn name(&mut self) -> Result<String> {
        let len = self.non_neg()?;
        let bytes = self.take(len)?;
        let name = std::str::from_utf8(bytes)
            .map_err(|_| Error::corrupt("name is not UTF-8"))?
            .to_string();
        self.skip_pad()?;
        Ok(name)
    }

    /// Returns the element count of a list, or 0 when ABSENT.
    fn list_header(&mut self, tag: u32) -> Result<usize> {
        let found = self.u32()?;
        let len = self.non_neg()?;
        match (found, len) {
            (0, 0) => Ok(0),
            (t, n) if t == tag => Ok(n),
            _ => Err(Error::corrupt(format!("expected list tag {tag:#x}, found {found:#x}"))),
        }
    }

    fn attributes(&mut self) -> Result<Attributes> {
        let count = self.list_header(NC_ATTRIBUTE)?;
        let mut attrs = Attributes::new();
        for _ in 0..count {
            let name = self.name()?;
            let dtype = DataType::from_nc_type(self.u32()?)?;
            let nelems = self.non_neg()?;
            let len = nelems
                .checked_mul(dtype.size())
                .ok_or_else(|| Error::corrupt("attribute too large"))?;
            let bytes = self.take(len)?;
            let value = if dtype.is_text() {
                AttrValue::Text(String::from_utf8_lossy(bytes).into_owned())
            } else {
                let mut data = ArrayData::empty(dtype);
                data.extend_from_be(bytes);
                AttrValue::Values(data)
            };
            self.skip_pad()?;
            attrs.set(name, value);
        }
        Ok(attrs)
    }
}

struct VarHeader {
    name: String,
    dim_ids: Vec<usize>,
    attrs: Attributes,
    dtype: DataType,
    begin: u64,
}

pub fn decode(buf: &[u8]) -> Result<Dataset> {
    if buf.len() < 4 || &buf[..3] != MAGIC {
        return Err(Error::corrupt("missing CDF magic"));
    }
    let version = buf[3];
    check_version(version)?;
    let mut r = HeaderReader {
        buf,
        pos: 4,
        version,
    };

    let numrecs = if version == 5 {
        r.non_neg()?
    } else {
        let raw = r.u32()?;
        if raw == STREAMING {
            return Err(Error::corrupt("streaming record count is not supported"));
        }
        raw as usize
    };

    let dim_count = r.list_header(NC_DIMENSION)?;
    let mut dims = Vec::with_capacity(dim_count);
    for _ in 0..dim_count {
        let name = r.name()?;
        let len = r.non_neg()?;
        dims.push(Dimension {
            name,
            len: (len != 0).then_some(len),
        });
    }

    let attrs = r.attributes()?;

    let var_count = r.list_header(NC_VARIABLE)?;
    let mut headers = Vec::with_capacity(var_count);
    for _ in 0..var_count {
        let name = r.name()?;
        let ndims = r.non_neg()?;
        let mut dim_ids = Vec::with_capacity(ndims.min(64));
        for _ in 0..ndims {
            let id = r.non_neg()?;
            if id >= dims.len() {
                return Err(Error::corrupt(format!("`{name}` references dimension {id}")));
            }
            dim_ids.push(id);
        }
        let attrs = r.attributes()?;
        let dtype = DataType::from_nc_type(r.u32()?)?;
        let _vsize = r.non_neg()?;
        let begin = r.offset()?;
        headers.push(VarHeader {
            name,
            dim_ids,
            attrs,
            dtype,
            begin,
        });
    }

    let is_record = |h: &VarHeader| {
        h.dim_ids
            .first()
            .map(|id| dims[*id].is_unlimited())
            .unwrap_or(false)
    };
    let layout = |h: &VarHeader| -> (bool, usize, usize) {
        let record = is_record(h);
        let fixed: Vec<usize> = h
            .dim_ids
            .iter()
            .skip(usize::from(record))
            .map(|id| dims[*id].len.unwrap_or(0))
            .collect();
        let (row_len, rows) = row_layout(h.dtype, record, &fixed);
        (record, row_len, rows)
    };

    let record_vars = headers.iter().filter(|h| is_record(h)).count();
    let recsize: usize = headers
        .iter()
        .filter(|h| is_record(h))
        .map(|h| {
            let (_, row_len, _) = layout(h);
            let slab = row_len * h.dtype.size();
            if record_vars == 1 {
                slab
            } else {
                pad4(slab)
            }
        })
        .sum();

    let mut vars = Vec::with_capacity(headers.len());
    for h in headers {
        let (record, row_len, rows) = layout(&h);
        let slab = row_len * h.dtype.size();
        let mut data = ArrayData::empty(h.dtype);
        if record {
            for rec in 0..numrecs {
                let offset = h.begin + (rec * recsize) as u64;
                data.extend_from_be(read_at(buf, offset, slab)?);
            }
        } else {
            data.extend_from_be(read_at(buf, h.begin, slab * rows)?);
        }
        let dim_names = h.dim_ids.iter().map(|id| dims[*id].name.clone()).collect();
        vars.push(Variable::from_parts(
            h.name, h.dtype, dim_names, h.attrs, data, record, row_len,
        ));
    }

    Ok(Dataset::from_parts(dims, attrs, vars))
}

fn read_at(buf: &[u8], offset: u64, len: usize) -> Result<&[u8]> {
    let start = usize::try_from(offset).map_err(|_| Error::corrupt("offset overflow"))?;
    start
        .checked_add(len)
        .and_then(|end| buf.get(start..end))
        .ok_or_else(|| Error::corrupt(format!("data at {start}+{len} beyond end of file")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::dtype::Scalar;

    fn sample() -> Dataset {
        let mut ds = Dataset::new();
        ds.add_dimension("time", None).unwrap();
        ds.add_dimension("traj_strlen", Some(8)).unwrap();
        ds.attrs.set("title", "glider");
        ds.attrs.set("wmo_id", 4801516);

        let mut attrs = Attributes::new();
        attrs.set("units", "seconds since 1970-01-01 00:00:00 UTC");
        let time = ds
            .add_variable("time", DataType::Double, &["time"], attrs)
            .unwrap();
        for (i, t) in [100.0, 101.0, 102.0].into_iter().enumerate() {
            time.write_row(i, Scalar::Double(t)).unwrap();
        }
        let qc = ds
            .add_variable("time_qc", DataType::Byte, &["time"], Attributes::new())
            .unwrap();
        qc.write_row(1, Scalar::Byte(0)).unwrap();

        let traj = ds
            .add_variable("trajectory", DataType::Char, &["traj_strlen"], Attributes::new())
            .unwrap();
        traj.write_text(0, "usf-bass").unwrap();
        ds.add_variable("segment_id", DataType::Short, &[], Attributes::new())
            .unwrap()
            .write_row(0, Scalar::Short(3))
            .unwrap();
        ds
    }

    #[test]
    fn header_starts_with_magic_and_numrecs() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(&bytes[..4], b"CDF\x02");
        assert_eq!(u32::from_be_bytes(bytes[4..8].try_into().unwrap()), 3);
    }

    #[test]
    fn decode_restores_dataset_and_pads_short_record_vars() {
        let ds = sample();
        let decoded = decode(&encode(&ds).unwrap()).unwrap();

        assert_eq!(decoded.dims, ds.dims);
        assert_eq!(decoded.attrs, ds.attrs);
        let time = decoded.variable("time").unwrap();
        assert_eq!(time.data, ArrayData::Double(vec![100.0, 101.0, 102.0]));
        let qc = decoded.variable("time_qc").unwrap();
        assert_eq!(qc.data, ArrayData::Byte(vec![-127, 0, -127]));
        assert_eq!(
            decoded.variable("trajectory").unwrap().read_text(0).as_deref(),
            Some("usf-bass")
        );
        assert_eq!(
            decoded.variable("segment_id").unwrap().read_row(0),
            Some(Scalar::Short(3))
        );
    }

    #[test]
    fn single_record_variable_is_not_padded() {
        let mut ds = Dataset::new();
        ds.add_dimension("time", None).unwrap();
        let qc = ds
            .add_variable("flag", DataType::Byte, &["time"], Attributes::new())
            .unwrap();
        for i in 0..5 {
            qc.write_row(i, Scalar::Byte(i as i8)).unwrap();
        }
        let bytes = encode(&ds).unwrap();
        assert_eq!(&bytes[bytes.len() - 5..], &[0, 1, 2, 3, 4]);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.variable("flag").unwrap().data, ArrayData::Byte(vec![0, 1, 2, 3, 4]));
    }

    #[test]
    fn int64_variables_select_version_five() {
        let mut ds = Dataset::new();
        ds.add_dimension("time", None).unwrap();
        ds.add_variable("count", DataType::Int64, &["time"], Attributes::new())
            .unwrap()
            .write_row(0, Scalar::Int64(1 << 40))
            .unwrap();
        let bytes = encode(&ds).unwrap();
        assert_eq!(bytes[3], 5);
        assert!(encode_version(&ds, 2).is_err());
        let decoded = decode(&bytes).unwrap();
        assert_eq!(
            decoded.variable("count").unwrap().read_row(0),
            Some(Scalar::Int64(1 << 40))
        );
    }

    #[test]
    fn version_one_round_trips() {
        let ds = sample();
        let decoded = decode(&encode_version(&ds, 1).unwrap()).unwrap();
        assert_eq!(decoded.variable("time").unwrap().data, ds.variable("time").unwrap().data);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        assert!(matches!(decode(b"HDF\x01"), Err(Error::Corrupt(_))));
        assert!(matches!(decode(b"CDF\x03\0\0\0\0"), Err(Error::UnsupportedVersion(3))));
        let bytes = encode(&sample()).unwrap();
        assert!(decode(&bytes[..bytes.len() - 4]).is_err());
    }

    #[test]
    fn empty_dataset_uses_absent_lists() {
        let bytes = encode(&Dataset::new()).unwrap();
        assert_eq!(bytes.len(), 4 + 4 + 3 * 8);
        assert_eq!(decode(&bytes).unwrap(), Dataset::new());
    }
}
