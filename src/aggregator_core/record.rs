//! Flow record model
//!
//! A `RecordLayout` describes the fields carried by every record on the
//! input stream. Fixed-width fields are packed little-endian into a single
//! byte buffer; variable-length fields (string, bytes) live in a side list.
//! Records share their layout through an `Arc` so that a format change can
//! be detected by comparing layouts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;

/// Width of an IP address slot (IPv4 is stored IPv4-mapped)
pub const IP_WIDTH: usize = 16;
pub const MAC_WIDTH: usize = 6;

/// Data types a field may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Char,
    Float,
    Double,
    #[serde(rename = "ipaddr", alias = "ip")]
    Ip,
    #[serde(rename = "macaddr", alias = "mac")]
    Mac,
    Time,
    String,
    Bytes,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Int8 => "int8",
            FieldType::Int16 => "int16",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Uint8 => "uint8",
            FieldType::Uint16 => "uint16",
            FieldType::Uint32 => "uint32",
            FieldType::Uint64 => "uint64",
            FieldType::Char => "char",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Ip => "ipaddr",
            FieldType::Mac => "macaddr",
            FieldType::Time => "time",
            FieldType::String => "string",
            FieldType::Bytes => "bytes",
        }
    }

    /// Byte width of a fixed-size type, `None` for variable-length types
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            FieldType::Int8 | FieldType::Uint8 | FieldType::Char => Some(1),
            FieldType::Int16 | FieldType::Uint16 => Some(2),
            FieldType::Int32 | FieldType::Uint32 | FieldType::Float => Some(4),
            FieldType::Int64 | FieldType::Uint64 | FieldType::Double | FieldType::Time => Some(8),
            FieldType::Ip => Some(IP_WIDTH),
            FieldType::Mac => Some(MAC_WIDTH),
            FieldType::String | FieldType::Bytes => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        self.fixed_size().is_none()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed field value, used at the edges (decoding input, encoding output)
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Char(u8),
    Float(f32),
    Double(f64),
    Ip(IpAddr),
    Mac([u8; MAC_WIDTH]),
    /// Milliseconds since the Unix epoch
    Time(u64),
    String(String),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Int8(_) => FieldType::Int8,
            FieldValue::Int16(_) => FieldType::Int16,
            FieldValue::Int32(_) => FieldType::Int32,
            FieldValue::Int64(_) => FieldType::Int64,
            FieldValue::Uint8(_) => FieldType::Uint8,
            FieldValue::Uint16(_) => FieldType::Uint16,
            FieldValue::Uint32(_) => FieldType::Uint32,
            FieldValue::Uint64(_) => FieldType::Uint64,
            FieldValue::Char(_) => FieldType::Char,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::Ip(_) => FieldType::Ip,
            FieldValue::Mac(_) => FieldType::Mac,
            FieldValue::Time(_) => FieldType::Time,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Bytes(_) => FieldType::Bytes,
        }
    }

    /// Zero value for a type (what an unset field reads as)
    pub fn zero(field_type: FieldType) -> Self {
        match field_type {
            FieldType::String => FieldValue::String(String::new()),
            FieldType::Bytes => FieldValue::Bytes(Vec::new()),
            fixed => {
                let width = fixed.fixed_size().unwrap_or(0);
                FieldValue::decode_fixed(fixed, &vec![0u8; width])
            }
        }
    }

    /// Encode a fixed-width value into `dst` (must be exactly the type's width)
    fn encode_fixed(&self, dst: &mut [u8]) {
        match self {
            FieldValue::Int8(v) => dst.copy_from_slice(&v.to_le_bytes()),
            FieldValue::Int16(v) => dst.copy_from_slice(&v.to_le_bytes()),
            FieldValue::Int32(v) => dst.copy_from_slice(&v.to_le_bytes()),
            FieldValue::Int64(v) => dst.copy_from_slice(&v.to_le_bytes()),
            FieldValue::Uint8(v) | FieldValue::Char(v) => dst[0] = *v,
            FieldValue::Uint16(v) => dst.copy_from_slice(&v.to_le_bytes()),
            FieldValue::Uint32(v) => dst.copy_from_slice(&v.to_le_bytes()),
            FieldValue::Uint64(v) | FieldValue::Time(v) => dst.copy_from_slice(&v.to_le_bytes()),
            FieldValue::Float(v) => dst.copy_from_slice(&v.to_le_bytes()),
            FieldValue::Double(v) => dst.copy_from_slice(&v.to_le_bytes()),
            FieldValue::Ip(ip) => dst.copy_from_slice(&ip_to_bytes(ip)),
            FieldValue::Mac(mac) => dst.copy_from_slice(mac),
            FieldValue::String(_) | FieldValue::Bytes(_) => {}
        }
    }

    /// Decode a fixed-width value from exactly `width` bytes
    pub fn decode_fixed(field_type: FieldType, src: &[u8]) -> Self {
        fn arr<const N: usize>(src: &[u8]) -> [u8; N] {
            let mut buf = [0u8; N];
            buf.copy_from_slice(&src[..N]);
            buf
        }
        match field_type {
            FieldType::Int8 => FieldValue::Int8(i8::from_le_bytes(arr(src))),
            FieldType::Int16 => FieldValue::Int16(i16::from_le_bytes(arr(src))),
            FieldType::Int32 => FieldValue::Int32(i32::from_le_bytes(arr(src))),
            FieldType::Int64 => FieldValue::Int64(i64::from_le_bytes(arr(src))),
            FieldType::Uint8 => FieldValue::Uint8(src[0]),
            FieldType::Uint16 => FieldValue::Uint16(u16::from_le_bytes(arr(src))),
            FieldType::Uint32 => FieldValue::Uint32(u32::from_le_bytes(arr(src))),
            FieldType::Uint64 => FieldValue::Uint64(u64::from_le_bytes(arr(src))),
            FieldType::Char => FieldValue::Char(src[0]),
            FieldType::Float => FieldValue::Float(f32::from_le_bytes(arr(src))),
            FieldType::Double => FieldValue::Double(f64::from_le_bytes(arr(src))),
            FieldType::Time => FieldValue::Time(u64::from_le_bytes(arr(src))),
            FieldType::Ip => FieldValue::Ip(ip_from_bytes(arr(src))),
            FieldType::Mac => FieldValue::Mac(arr(src)),
            FieldType::String => FieldValue::String(String::from_utf8_lossy(src).into_owned()),
            FieldType::Bytes => FieldValue::Bytes(src.to_vec()),
        }
    }

    /// Decode a variable-length value
    pub fn decode_variable(field_type: FieldType, src: &[u8]) -> Self {
        match field_type {
            FieldType::String => FieldValue::String(String::from_utf8_lossy(src).into_owned()),
            _ => FieldValue::Bytes(src.to_vec()),
        }
    }
}

/// IPv4 addresses are stored IPv4-mapped so every address is 16 big-endian bytes
pub fn ip_to_bytes(ip: &IpAddr) -> [u8; IP_WIDTH] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

pub fn ip_from_bytes(bytes: [u8; IP_WIDTH]) -> IpAddr {
    let v6 = Ipv6Addr::from(bytes);
    match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    }
}

/// Record field error
#[derive(Debug, Clone, PartialEq)]
pub enum RecordError {
    UnknownField(String),
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: FieldType,
    },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::UnknownField(name) => write!(f, "Unknown field: {}", name),
            RecordError::TypeMismatch { field, expected, found } => write!(
                f,
                "Type mismatch for field {}: expected {}, found {}",
                field, expected, found
            ),
        }
    }
}

impl std::error::Error for RecordError {}

/// Name and type of one field in the input format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldSpec {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
        }
    }
}

/// Where a field's bytes live inside a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Fixed { offset: usize, width: usize },
    Variable { index: usize },
}

/// Ordered set of fields carried by every record of the stream
#[derive(Debug, Clone)]
pub struct RecordLayout {
    fields: Vec<FieldSpec>,
    slots: Vec<Slot>,
    by_name: HashMap<String, usize>,
    fixed_len: usize,
    var_count: usize,
}

impl RecordLayout {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        let mut slots = Vec::with_capacity(fields.len());
        let mut by_name = HashMap::with_capacity(fields.len());
        let mut fixed_len = 0;
        let mut var_count = 0;

        for (i, field) in fields.iter().enumerate() {
            match field.field_type.fixed_size() {
                Some(width) => {
                    slots.push(Slot::Fixed { offset: fixed_len, width });
                    fixed_len += width;
                }
                None => {
                    slots.push(Slot::Variable { index: var_count });
                    var_count += 1;
                }
            }
            // First declaration wins on duplicate names
            by_name.entry(field.name.clone()).or_insert(i);
        }

        Self {
            fields,
            slots,
            by_name,
            fixed_len,
            var_count,
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn field(&self, index: usize) -> &FieldSpec {
        &self.fields[index]
    }

    pub fn slot(&self, index: usize) -> Slot {
        self.slots[index]
    }

    pub fn fixed_len(&self) -> usize {
        self.fixed_len
    }

    pub fn var_count(&self) -> usize {
        self.var_count
    }
}

impl PartialEq for RecordLayout {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for RecordLayout {}

/// One flow record: packed fixed-width values plus variable-length values
#[derive(Debug, Clone)]
pub struct FlowRecord {
    layout: Arc<RecordLayout>,
    fixed: Vec<u8>,
    var: Vec<Vec<u8>>,
}

impl FlowRecord {
    /// Create a zeroed record for `layout`
    pub fn new(layout: Arc<RecordLayout>) -> Self {
        let fixed = vec![0u8; layout.fixed_len()];
        let var = vec![Vec::new(); layout.var_count()];
        Self { layout, fixed, var }
    }

    pub fn layout(&self) -> &Arc<RecordLayout> {
        &self.layout
    }

    /// Set a field by name, checking the value's type against the layout
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<(), RecordError> {
        let index = self
            .layout
            .index_of(name)
            .ok_or_else(|| RecordError::UnknownField(name.to_string()))?;
        self.set_at(index, value)
    }

    pub fn set_at(&mut self, index: usize, value: FieldValue) -> Result<(), RecordError> {
        let spec = self.layout.field(index);
        if spec.field_type != value.field_type() {
            return Err(RecordError::TypeMismatch {
                field: spec.name.clone(),
                expected: spec.field_type,
                found: value.field_type(),
            });
        }

        match (self.layout.slot(index), value) {
            (Slot::Variable { index }, FieldValue::String(s)) => self.var[index] = s.into_bytes(),
            (Slot::Variable { index }, FieldValue::Bytes(b)) => self.var[index] = b,
            (Slot::Fixed { offset, width }, value) => {
                value.encode_fixed(&mut self.fixed[offset..offset + width])
            }
            // Types are checked above, a variable slot always holds string/bytes
            (Slot::Variable { .. }, _) => {}
        }
        Ok(())
    }

    /// Builder-style setter
    pub fn with(mut self, name: &str, value: FieldValue) -> Result<Self, RecordError> {
        self.set(name, value)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<FieldValue> {
        let index = self.layout.index_of(name)?;
        let field_type = self.layout.field(index).field_type;
        Some(match self.layout.slot(index) {
            Slot::Fixed { .. } => FieldValue::decode_fixed(field_type, self.raw(self.layout.slot(index))),
            Slot::Variable { index } => FieldValue::decode_variable(field_type, &self.var[index]),
        })
    }

    /// Raw bytes of a slot
    pub fn raw(&self, slot: Slot) -> &[u8] {
        match slot {
            Slot::Fixed { offset, width } => &self.fixed[offset..offset + width],
            Slot::Variable { index } => &self.var[index],
        }
    }

    /// Read a time slot as milliseconds since epoch
    pub fn read_time(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.fixed[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }
}

/// Event delivered by the input boundary to the ingestion loop
#[derive(Debug, Clone)]
pub enum InputEvent {
    /// Upstream record format changed; carries the new layout
    FormatChanged(Arc<RecordLayout>),
    Record(FlowRecord),
    EndOfStream,
}
