// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The marshalling engine (component B, §4.2): converts host-layout
//! application records to/from a packed, big-endian wire layout driven by
//! a recursive [`DatasetSchema`].
//!
//! Host-side records are represented as a [`Value`] tree rather than raw
//! host bytes: the schema's job is to describe the *wire* layout precisely
//! (§4.2's alignment table is a compatibility contract with other TRDP
//! nodes), while the host-side representation is this crate's own affair.
//! A [`Value`] tree sidesteps the cross-platform ambiguity of "native C
//! struct padding" while still exercising every rule the wire format
//! imposes.

use crate::error::{Error, MarshallingError, Result};
use byteorder::{BigEndian, ByteOrder};
use std::collections::HashMap;
use std::sync::Arc;

/// Recursion guard matching §3.1's "depth is bounded (16 suffices)".
const MAX_DATASET_DEPTH: u32 = 16;

pub type DatasetId = u32;

/// Primitive wire types (§3.1, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Bool8,
    Char8,
    Utf16,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Real32,
    Real64,
    TimeDate32,
    TimeDate48,
    TimeDate64,
}

impl Primitive {
    /// Wire size in bytes (§4.2 table).
    pub fn wire_size(self) -> usize {
        match self {
            Primitive::Bool8 | Primitive::Char8 | Primitive::Int8 | Primitive::Uint8 => 1,
            Primitive::Utf16 | Primitive::Int16 | Primitive::Uint16 => 2,
            Primitive::Int32 | Primitive::Uint32 | Primitive::Real32 | Primitive::TimeDate32 => 4,
            Primitive::TimeDate48 => 6,
            Primitive::Int64 | Primitive::Uint64 | Primitive::Real64 | Primitive::TimeDate64 => 8,
        }
    }

    /// Wire alignment in bytes (§4.2 table). `TIMEDATE48` aligns as its
    /// leading 4-byte seconds word; `*64` types align to 4 (a pair of
    /// 32-bit words), not 8.
    pub fn wire_align(self) -> usize {
        match self {
            Primitive::Bool8 | Primitive::Char8 | Primitive::Int8 | Primitive::Uint8 => 1,
            Primitive::Utf16 | Primitive::Int16 | Primitive::Uint16 => 2,
            Primitive::Int32
            | Primitive::Uint32
            | Primitive::Real32
            | Primitive::TimeDate32
            | Primitive::TimeDate48 => 4,
            Primitive::Int64 | Primitive::Uint64 | Primitive::Real64 | Primitive::TimeDate64 => 4,
        }
    }

    /// Whether this primitive may drive a preceding variable-length
    /// element's repeat count (§4.2's variable-length element rule: "must
    /// be unsigned integer").
    pub fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            Primitive::Uint8 | Primitive::Uint16 | Primitive::Uint32 | Primitive::Uint64
        )
    }

    /// Resolves a configuration-file type name (§6.1's `DatasetElementConfig::type_name`)
    /// to its primitive, case-insensitively, matching the acronyms of §4.2's table.
    pub fn from_name(name: &str) -> Option<Primitive> {
        match name.to_ascii_uppercase().as_str() {
            "BOOL8" => Some(Primitive::Bool8),
            "CHAR8" => Some(Primitive::Char8),
            "UTF16" => Some(Primitive::Utf16),
            "INT8" => Some(Primitive::Int8),
            "INT16" => Some(Primitive::Int16),
            "INT32" => Some(Primitive::Int32),
            "INT64" => Some(Primitive::Int64),
            "UINT8" => Some(Primitive::Uint8),
            "UINT16" => Some(Primitive::Uint16),
            "UINT32" => Some(Primitive::Uint32),
            "UINT64" => Some(Primitive::Uint64),
            "REAL32" => Some(Primitive::Real32),
            "REAL64" => Some(Primitive::Real64),
            "TIMEDATE32" => Some(Primitive::TimeDate32),
            "TIMEDATE48" => Some(Primitive::TimeDate48),
            "TIMEDATE64" => Some(Primitive::TimeDate64),
            _ => None,
        }
    }
}

/// An element's type: either a primitive or a reference to another
/// dataset by id (§3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    Primitive(Primitive),
    Dataset(DatasetId),
}

/// One `(type, count)` pair of a [`DatasetSchema`]. `count == 0` means
/// "variable length, driven by the immediately preceding element's value".
#[derive(Debug, Clone)]
pub struct DatasetElement {
    pub ty: ElementType,
    pub count: u32,
}

/// Recursive description of a payload (§3.1). Immutable once built and
/// cheaply `Clone`-able (the element list is behind an `Arc`), so that
/// telegrams can share a schema by reference rather than by copy.
#[derive(Debug, Clone)]
pub struct DatasetSchema {
    pub dataset_id: DatasetId,
    pub elements: Arc<[DatasetElement]>,
}

impl DatasetSchema {
    pub fn new(dataset_id: DatasetId, elements: Vec<DatasetElement>) -> DatasetSchema {
        DatasetSchema {
            dataset_id,
            elements: elements.into(),
        }
    }
}

/// Immutable mapping from `datasetId` to [`DatasetSchema`] (§3.1's
/// `ComIdDatasetMap` resolves `comId -> datasetId`; this resolves
/// `datasetId -> DatasetSchema`).
pub type DatasetMap = HashMap<DatasetId, DatasetSchema>;

/// A host-side record value. The top-level value passed to [`marshall`]
/// must be a `Value::Dataset` with one entry per element of the schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Char(u8),
    Utf16(u16),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    TimeDate32(u32),
    TimeDate48 { seconds: u32, ticks: u16 },
    TimeDate64 { seconds: u32, micros: u32 },
    /// A fixed- or variable-length repetition of one element.
    Array(Vec<Value>),
    /// An embedded dataset instance, one value per element of its schema.
    Dataset(Vec<Value>),
}

/// Memoized dataset sizes/alignments, keyed by `datasetId`. Built and
/// owned by the caller (e.g. once per telegram, or once per scheduler
/// iteration) so that the schema itself stays immutable — see the Design
/// Note on variable-length marshalling caching.
#[derive(Debug, Default)]
pub struct SizeCache {
    sizes: HashMap<DatasetId, Option<usize>>,
    aligns: HashMap<DatasetId, usize>,
}

fn align_up(cursor: usize, align: usize) -> usize {
    if align <= 1 {
        return cursor;
    }
    (cursor + align - 1) / align * align
}

fn element_alignment(
    ty: &ElementType,
    map: &DatasetMap,
    cache: &mut SizeCache,
    depth: u32,
) -> Result<usize> {
    match ty {
        ElementType::Primitive(p) => Ok(p.wire_align()),
        ElementType::Dataset(id) => dataset_alignment(*id, map, cache, depth),
    }
}

fn dataset_alignment(
    id: DatasetId,
    map: &DatasetMap,
    cache: &mut SizeCache,
    depth: u32,
) -> Result<usize> {
    if let Some(a) = cache.aligns.get(&id) {
        return Ok(*a);
    }
    if depth >= MAX_DATASET_DEPTH {
        return Err(MarshallingError::MalformedFrame("dataset nesting too deep".into()).into());
    }
    let schema = map
        .get(&id)
        .ok_or(MarshallingError::UnknownDataset(id))?;
    let mut max_align = 1usize;
    for elem in schema.elements.iter() {
        let a = element_alignment(&elem.ty, map, cache, depth + 1)?;
        max_align = max_align.max(a);
    }
    cache.aligns.insert(id, max_align);
    Ok(max_align)
}

/// Static wire size of `dataset_id`, assuming it contains no
/// variable-length (`count == 0`) element anywhere in its tree. Returns
/// `Ok(None)` when the dataset is variable-length (P2: wire size then
/// depends on the record's runtime values, not on `s` alone).
pub fn fixed_wire_size(
    dataset_id: DatasetId,
    map: &DatasetMap,
    cache: &mut SizeCache,
) -> Result<Option<usize>> {
    fixed_wire_size_inner(dataset_id, map, cache, 0)
}

fn fixed_wire_size_inner(
    dataset_id: DatasetId,
    map: &DatasetMap,
    cache: &mut SizeCache,
    depth: u32,
) -> Result<Option<usize>> {
    if let Some(v) = cache.sizes.get(&dataset_id) {
        return Ok(*v);
    }
    if depth >= MAX_DATASET_DEPTH {
        return Err(MarshallingError::MalformedFrame("dataset nesting too deep".into()).into());
    }
    let schema = map
        .get(&dataset_id)
        .ok_or(MarshallingError::UnknownDataset(dataset_id))?;
    let mut cursor = 0usize;
    for elem in schema.elements.iter() {
        if elem.count == 0 {
            cache.sizes.insert(dataset_id, None);
            return Ok(None);
        }
        let (align, size) = match &elem.ty {
            ElementType::Primitive(p) => (p.wire_align(), p.wire_size()),
            ElementType::Dataset(id) => {
                match fixed_wire_size_inner(*id, map, cache, depth + 1)? {
                    Some(sz) => (dataset_alignment(*id, map, cache, depth + 1)?, sz),
                    None => {
                        cache.sizes.insert(dataset_id, None);
                        return Ok(None);
                    }
                }
            }
        };
        cursor = align_up(cursor, align);
        cursor += size * elem.count as usize;
    }
    cache.sizes.insert(dataset_id, Some(cursor));
    Ok(Some(cursor))
}

fn scalar_uint_value(v: &Value) -> Option<u64> {
    match v {
        Value::U8(x) => Some(*x as u64),
        Value::U16(x) => Some(*x as u64),
        Value::U32(x) => Some(*x as u64),
        Value::U64(x) => Some(*x),
        _ => None,
    }
}

fn write_primitive(p: Primitive, val: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let start = buf.len();
    buf.resize(start + p.wire_size(), 0);
    let out = &mut buf[start..];
    match (p, val) {
        (Primitive::Bool8, Value::Bool(b)) => out[0] = if *b { 1 } else { 0 },
        (Primitive::Char8, Value::Char(c)) => out[0] = *c,
        (Primitive::Utf16, Value::Utf16(v)) => BigEndian::write_u16(out, *v),
        (Primitive::Int8, Value::I8(v)) => out[0] = *v as u8,
        (Primitive::Uint8, Value::U8(v)) => out[0] = *v,
        (Primitive::Int16, Value::I16(v)) => BigEndian::write_i16(out, *v),
        (Primitive::Uint16, Value::U16(v)) => BigEndian::write_u16(out, *v),
        (Primitive::Int32, Value::I32(v)) => BigEndian::write_i32(out, *v),
        (Primitive::Uint32, Value::U32(v)) => BigEndian::write_u32(out, *v),
        (Primitive::Real32, Value::F32(v)) => BigEndian::write_f32(out, *v),
        (Primitive::TimeDate32, Value::TimeDate32(v)) => BigEndian::write_u32(out, *v),
        (Primitive::TimeDate48, Value::TimeDate48 { seconds, ticks }) => {
            BigEndian::write_u32(&mut out[0..4], *seconds);
            BigEndian::write_u16(&mut out[4..6], *ticks);
        }
        (Primitive::Int64, Value::I64(v)) => BigEndian::write_i64(out, *v),
        (Primitive::Uint64, Value::U64(v)) => BigEndian::write_u64(out, *v),
        (Primitive::Real64, Value::F64(v)) => BigEndian::write_f64(out, *v),
        (Primitive::TimeDate64, Value::TimeDate64 { seconds, micros }) => {
            BigEndian::write_u32(&mut out[0..4], *seconds);
            BigEndian::write_u32(&mut out[4..8], *micros);
        }
        _ => {
            return Err(
                MarshallingError::MalformedFrame(format!("value does not match {:?}", p)).into(),
            )
        }
    }
    Ok(())
}

fn write_single(
    ty: &ElementType,
    map: &DatasetMap,
    val: &Value,
    buf: &mut Vec<u8>,
    cache: &mut SizeCache,
    depth: u32,
) -> Result<()> {
    match ty {
        ElementType::Primitive(p) => write_primitive(*p, val, buf),
        ElementType::Dataset(id) => {
            if depth >= MAX_DATASET_DEPTH {
                return Err(
                    MarshallingError::MalformedFrame("dataset nesting too deep".into()).into(),
                );
            }
            let schema = map
                .get(id)
                .ok_or(MarshallingError::UnknownDataset(*id))?
                .clone();
            marshall_dataset(&schema, map, val, buf, cache, depth + 1)
        }
    }
}

fn marshall_dataset(
    schema: &DatasetSchema,
    map: &DatasetMap,
    value: &Value,
    buf: &mut Vec<u8>,
    cache: &mut SizeCache,
    depth: u32,
) -> Result<()> {
    let items = match value {
        Value::Dataset(items) => items,
        _ => {
            return Err(MarshallingError::MalformedFrame(
                "expected a dataset value".into(),
            )
            .into())
        }
    };
    if items.len() != schema.elements.len() {
        return Err(MarshallingError::MalformedFrame(format!(
            "dataset {} expects {} elements, got {}",
            schema.dataset_id,
            schema.elements.len(),
            items.len()
        ))
        .into());
    }

    let mut last_uint: Option<u64> = None;
    for (elem, val) in schema.elements.iter().zip(items.iter()) {
        let align = element_alignment(&elem.ty, map, cache, depth)?;
        let start = align_up(buf.len(), align);
        buf.resize(start, 0);

        match elem.count {
            1 => {
                write_single(&elem.ty, map, val, buf, cache, depth)?;
            }
            count => {
                let array = match val {
                    Value::Array(items) => items,
                    _ => {
                        return Err(MarshallingError::MalformedFrame(
                            "expected an array value".into(),
                        )
                        .into())
                    }
                };
                if count != 0 && array.len() as u32 != count {
                    return Err(MarshallingError::MalformedFrame(format!(
                        "expected {} elements, got {}",
                        count,
                        array.len()
                    ))
                    .into());
                }
                if count == 0 {
                    let expected = last_uint.ok_or_else(|| {
                        MarshallingError::MalformedFrame(
                            "variable-length element has no preceding count".into(),
                        )
                    })?;
                    if array.len() as u64 != expected {
                        return Err(MarshallingError::MalformedFrame(format!(
                            "preceding count {} does not match {} array items",
                            expected,
                            array.len()
                        ))
                        .into());
                    }
                }
                for item in array {
                    write_single(&elem.ty, map, item, buf, cache, depth)?;
                }
            }
        }
        last_uint = if elem.count == 1 {
            scalar_uint_value(val)
        } else {
            None
        };
    }
    Ok(())
}

/// Marshall `value` (a `Value::Dataset`) according to `schema`, producing
/// a freshly allocated wire buffer.
pub fn marshall(schema: &DatasetSchema, map: &DatasetMap, value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut cache = SizeCache::default();
    marshall_dataset(schema, map, value, &mut buf, &mut cache, 0)?;
    Ok(buf)
}

/// Marshall into a caller-provided buffer, per §4.2's `BufferTooSmall`
/// contract.
pub fn marshall_into(
    schema: &DatasetSchema,
    map: &DatasetMap,
    value: &Value,
    out: &mut [u8],
) -> Result<usize> {
    let bytes = marshall(schema, map, value)?;
    if bytes.len() > out.len() {
        return Err(MarshallingError::BufferTooSmall {
            needed: bytes.len(),
            got: out.len(),
        }
        .into());
    }
    out[..bytes.len()].copy_from_slice(&bytes);
    Ok(bytes.len())
}

struct Reader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    fn align(&mut self, align: usize) -> Result<()> {
        self.cursor = align_up(self.cursor, align);
        if self.cursor > self.bytes.len() {
            return Err(MarshallingError::MalformedFrame("frame too short".into()).into());
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.cursor + n;
        if end > self.bytes.len() {
            return Err(MarshallingError::MalformedFrame("frame too short".into()).into());
        }
        let slice = &self.bytes[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }
}

fn read_primitive(p: Primitive, r: &mut Reader) -> Result<Value> {
    let n = p.wire_size();
    let bytes = r.take(n)?;
    Ok(match p {
        Primitive::Bool8 => Value::Bool(bytes[0] != 0),
        Primitive::Char8 => Value::Char(bytes[0]),
        Primitive::Utf16 => Value::Utf16(BigEndian::read_u16(bytes)),
        Primitive::Int8 => Value::I8(bytes[0] as i8),
        Primitive::Uint8 => Value::U8(bytes[0]),
        Primitive::Int16 => Value::I16(BigEndian::read_i16(bytes)),
        Primitive::Uint16 => Value::U16(BigEndian::read_u16(bytes)),
        Primitive::Int32 => Value::I32(BigEndian::read_i32(bytes)),
        Primitive::Uint32 => Value::U32(BigEndian::read_u32(bytes)),
        Primitive::Real32 => Value::F32(BigEndian::read_f32(bytes)),
        Primitive::TimeDate32 => Value::TimeDate32(BigEndian::read_u32(bytes)),
        Primitive::TimeDate48 => Value::TimeDate48 {
            seconds: BigEndian::read_u32(&bytes[0..4]),
            ticks: BigEndian::read_u16(&bytes[4..6]),
        },
        Primitive::Int64 => Value::I64(BigEndian::read_i64(bytes)),
        Primitive::Uint64 => Value::U64(BigEndian::read_u64(bytes)),
        Primitive::Real64 => Value::F64(BigEndian::read_f64(bytes)),
        Primitive::TimeDate64 => Value::TimeDate64 {
            seconds: BigEndian::read_u32(&bytes[0..4]),
            micros: BigEndian::read_u32(&bytes[4..8]),
        },
    })
}

fn read_single(
    ty: &ElementType,
    map: &DatasetMap,
    r: &mut Reader,
    cache: &mut SizeCache,
    depth: u32,
) -> Result<Value> {
    match ty {
        ElementType::Primitive(p) => read_primitive(*p, r),
        ElementType::Dataset(id) => {
            if depth >= MAX_DATASET_DEPTH {
                return Err(
                    MarshallingError::MalformedFrame("dataset nesting too deep".into()).into(),
                );
            }
            let schema = map
                .get(id)
                .ok_or(MarshallingError::UnknownDataset(*id))?
                .clone();
            unmarshall_dataset(&schema, map, r, cache, depth + 1)
        }
    }
}

fn unmarshall_dataset(
    schema: &DatasetSchema,
    map: &DatasetMap,
    r: &mut Reader,
    cache: &mut SizeCache,
    depth: u32,
) -> Result<Value> {
    let mut items = Vec::with_capacity(schema.elements.len());
    let mut last_uint: Option<u64> = None;

    for elem in schema.elements.iter() {
        let align = element_alignment(&elem.ty, map, cache, depth)?;
        r.align(align)?;

        let value = match elem.count {
            1 => read_single(&elem.ty, map, r, cache, depth)?,
            count => {
                let n = if count == 0 {
                    last_uint.ok_or_else(|| {
                        MarshallingError::MalformedFrame(
                            "variable-length element has no preceding count".into(),
                        )
                    })? as u32
                } else {
                    count
                };
                let mut array = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    array.push(read_single(&elem.ty, map, r, cache, depth)?);
                }
                Value::Array(array)
            }
        };

        last_uint = if elem.count == 1 {
            scalar_uint_value(&value)
        } else {
            None
        };
        items.push(value);
    }
    Ok(Value::Dataset(items))
}

/// Unmarshall `wire` according to `schema`. Errors with `MalformedFrame`
/// if the byte count is inconsistent with what the schema demands,
/// including trailing bytes left over after a full, well-formed parse.
pub fn unmarshall(schema: &DatasetSchema, map: &DatasetMap, wire: &[u8]) -> Result<Value> {
    let mut cache = SizeCache::default();
    let mut r = Reader {
        bytes: wire,
        cursor: 0,
    };
    let value = unmarshall_dataset(schema, map, &mut r, &mut cache, 0)?;
    if r.cursor != wire.len() {
        return Err(MarshallingError::MalformedFrame(format!(
            "{} trailing bytes after dataset {}",
            wire.len() - r.cursor,
            schema.dataset_id
        ))
        .into());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(ty: ElementType, count: u32) -> DatasetElement {
        DatasetElement { ty, count }
    }

    fn prim(p: Primitive, count: u32) -> DatasetElement {
        elem(ElementType::Primitive(p), count)
    }

    #[test]
    fn primitive_from_name_is_case_insensitive() {
        assert_eq!(Primitive::from_name("uint32"), Some(Primitive::Uint32));
        assert_eq!(Primitive::from_name("TIMEDATE48"), Some(Primitive::TimeDate48));
        assert_eq!(Primitive::from_name("nonsense"), None);
    }

    // S5: alignment across INT8 / INT16 / INT32 / TIMEDATE48.
    #[test]
    fn s5_marshall_alignment() {
        let schema = DatasetSchema::new(
            5,
            vec![
                prim(Primitive::Int8, 1),
                prim(Primitive::Int16, 1),
                prim(Primitive::Int32, 1),
                prim(Primitive::TimeDate48, 1),
            ],
        );
        let map = DatasetMap::new();
        let value = Value::Dataset(vec![
            Value::I8(0x7F),
            Value::I16(0x1234),
            Value::I32(0xDEADBEEFu32 as i32),
            Value::TimeDate48 {
                seconds: 0x1122_3344,
                ticks: 0x5566,
            },
        ]);
        let wire = marshall(&schema, &map, &value).unwrap();
        assert_eq!(
            wire,
            vec![0x7F, 0x00, 0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]
        );
        assert_eq!(wire.len(), 14);
    }

    fn dataset_1001() -> DatasetSchema {
        DatasetSchema::new(
            1001,
            vec![
                prim(Primitive::Int32, 1),
                prim(Primitive::Uint32, 2),
                prim(Primitive::Uint16, 3),
            ],
        )
    }

    // S6: dataset nested in an array, packed without per-element
    // re-alignment.
    #[test]
    fn s6_nested_dataset_array_size() {
        let mut map = DatasetMap::new();
        map.insert(1001, dataset_1001());
        let schema = DatasetSchema::new(
            10002,
            vec![
                elem(ElementType::Dataset(1001), 2),
                prim(Primitive::Int16, 64),
            ],
        );
        let mut cache = SizeCache::default();
        let inner_size = fixed_wire_size(1001, &map, &mut cache).unwrap().unwrap();
        assert_eq!(inner_size, 18);

        let instance = Value::Dataset(vec![Value::I32(0), Value::U32(0), Value::U16(0)]);
        let value = Value::Dataset(vec![
            Value::Array(vec![instance.clone(), instance]),
            Value::Array(vec![Value::I16(0); 64]),
        ]);
        let wire = marshall(&schema, &map, &value).unwrap();
        assert_eq!(wire.len(), 2 * inner_size + 128);
    }

    // P1: round trip for every schema/record pair.
    #[test]
    fn p1_round_trip() {
        let mut map = DatasetMap::new();
        map.insert(1001, dataset_1001());
        let schema = DatasetSchema::new(
            10002,
            vec![
                elem(ElementType::Dataset(1001), 2),
                prim(Primitive::Int16, 64),
            ],
        );
        let instance = Value::Dataset(vec![Value::I32(7), Value::U32(8), Value::U16(9)]);
        let value = Value::Dataset(vec![
            Value::Array(vec![instance.clone(), instance]),
            Value::Array(vec![Value::I16(42); 64]),
        ]);
        let wire = marshall(&schema, &map, &value).unwrap();
        let back = unmarshall(&schema, &map, &wire).unwrap();
        assert_eq!(back, value);
    }

    // P2: wire size depends only on the schema and variable-length
    // values, verified by marshalling the same logical record twice from
    // independently constructed `Value` trees.
    #[test]
    fn p2_wire_size_stability() {
        let map = DatasetMap::new();
        let schema = DatasetSchema::new(
            7,
            vec![prim(Primitive::Uint8, 1), prim(Primitive::Uint8, 0)],
        );
        let a = Value::Dataset(vec![Value::U8(3), Value::Array(vec![Value::U8(1); 3])]);
        let b = Value::Dataset(vec![Value::U8(3), Value::Array(vec![Value::U8(9); 3])]);
        let wire_a = marshall(&schema, &map, &a).unwrap();
        let wire_b = marshall(&schema, &map, &b).unwrap();
        assert_eq!(wire_a.len(), wire_b.len());
    }

    #[test]
    fn variable_length_driven_by_preceding_count() {
        let map = DatasetMap::new();
        let schema = DatasetSchema::new(
            8,
            vec![prim(Primitive::Uint16, 1), prim(Primitive::Char8, 0)],
        );
        let value = Value::Dataset(vec![
            Value::U16(3),
            Value::Array(vec![Value::Char(b'a'), Value::Char(b'b'), Value::Char(b'c')]),
        ]);
        let wire = marshall(&schema, &map, &value).unwrap();
        assert_eq!(wire, vec![0x00, 0x03, b'a', b'b', b'c']);
        let back = unmarshall(&schema, &map, &wire).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn unknown_dataset_reference_errors() {
        let map = DatasetMap::new();
        let schema = DatasetSchema::new(1, vec![elem(ElementType::Dataset(999), 1)]);
        let value = Value::Dataset(vec![Value::Dataset(vec![])]);
        let err = marshall(&schema, &map, &value).unwrap_err();
        assert_eq!(
            err,
            Error::MarshallingErr(MarshallingError::UnknownDataset(999))
        );
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let map = DatasetMap::new();
        let schema = DatasetSchema::new(1, vec![prim(Primitive::Uint8, 1)]);
        let err = unmarshall(&schema, &map, &[1, 2]).unwrap_err();
        match err {
            Error::MarshallingErr(MarshallingError::MalformedFrame(_)) => {}
            other => panic!("expected MalformedFrame, got {:?}", other),
        }
    }

    #[test]
    fn short_buffer_is_malformed() {
        let map = DatasetMap::new();
        let schema = DatasetSchema::new(1, vec![prim(Primitive::Uint32, 1)]);
        let err = unmarshall(&schema, &map, &[1, 2]).unwrap_err();
        match err {
            Error::MarshallingErr(MarshallingError::MalformedFrame(_)) => {}
            other => panic!("expected MalformedFrame, got {:?}", other),
        }
    }

    #[test]
    fn marshall_into_reports_buffer_too_small() {
        let map = DatasetMap::new();
        let schema = DatasetSchema::new(1, vec![prim(Primitive::Uint32, 1)]);
        let value = Value::Dataset(vec![Value::U32(1)]);
        let mut out = [0u8; 2];
        let err = marshall_into(&schema, &map, &value, &mut out).unwrap_err();
        match err {
            Error::MarshallingErr(MarshallingError::BufferTooSmall { needed, got }) => {
                assert_eq!(needed, 4);
                assert_eq!(got, 2);
            }
            other => panic!("expected BufferTooSmall, got {:?}", other),
        }
    }
}
