//! JSON encoding of layouts, records and field values
//!
//! Input lines are one of:
//! - `{"format":[{"name":"SRC_IP","type":"ipaddr"}, ...]}` announces a layout
//! - `{"eos":true}` ends the stream
//! - any other object is a record under the current layout

use crate::aggregator_core::record::{
    FieldSpec, FieldType, FieldValue, FlowRecord, InputEvent, RecordError, RecordLayout, MAC_WIDTH,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug)]
pub enum CodecError {
    Json(serde_json::Error),
    NotAnObject,
    /// Record seen before any format line
    NoFormat,
    InvalidValue { field: String, reason: String },
    Record(RecordError),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Json(err)
    }
}

impl From<RecordError> for CodecError {
    fn from(err: RecordError) -> Self {
        CodecError::Record(err)
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Json(e) => write!(f, "JSON error: {}", e),
            CodecError::NotAnObject => write!(f, "Line is not a JSON object"),
            CodecError::NoFormat => write!(f, "Record received before any format line"),
            CodecError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for {}: {}", field, reason)
            }
            CodecError::Record(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CodecError {}

/// Decode one input line into an event
pub fn decode_line(line: &str, layout: Option<&Arc<RecordLayout>>) -> Result<InputEvent, CodecError> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(mut object) = value else {
        return Err(CodecError::NotAnObject);
    };

    if let Some(format) = object.remove("format") {
        let fields: Vec<FieldSpec> = serde_json::from_value(format)?;
        return Ok(InputEvent::FormatChanged(Arc::new(RecordLayout::new(fields))));
    }

    if object.get("eos").and_then(Value::as_bool) == Some(true) {
        return Ok(InputEvent::EndOfStream);
    }

    let layout = layout.ok_or(CodecError::NoFormat)?;
    Ok(InputEvent::Record(record_from_json(layout, &object)?))
}

/// Build a record from a JSON object; absent fields stay zero
pub fn record_from_json(
    layout: &Arc<RecordLayout>,
    object: &Map<String, Value>,
) -> Result<FlowRecord, CodecError> {
    let mut record = FlowRecord::new(layout.clone());

    for (index, spec) in layout.fields().iter().enumerate() {
        let Some(raw) = object.get(&spec.name) else {
            continue;
        };
        let value = value_from_json(spec.field_type, raw).map_err(|reason| CodecError::InvalidValue {
            field: spec.name.clone(),
            reason,
        })?;
        record.set_at(index, value)?;
    }

    Ok(record)
}

fn expect_int(raw: &Value) -> Result<i128, String> {
    raw.as_i64()
        .map(i128::from)
        .or_else(|| raw.as_u64().map(i128::from))
        .ok_or_else(|| format!("expected integer, got {}", raw))
}

fn narrow<T: TryFrom<i128>>(raw: &Value) -> Result<T, String> {
    let wide = expect_int(raw)?;
    T::try_from(wide).map_err(|_| format!("{} out of range", wide))
}

fn expect_str(raw: &Value) -> Result<&str, String> {
    raw.as_str().ok_or_else(|| format!("expected string, got {}", raw))
}

/// Decode a JSON value as the given field type
pub fn value_from_json(field_type: FieldType, raw: &Value) -> Result<FieldValue, String> {
    Ok(match field_type {
        FieldType::Int8 => FieldValue::Int8(narrow(raw)?),
        FieldType::Int16 => FieldValue::Int16(narrow(raw)?),
        FieldType::Int32 => FieldValue::Int32(narrow(raw)?),
        FieldType::Int64 => FieldValue::Int64(narrow(raw)?),
        FieldType::Uint8 => FieldValue::Uint8(narrow(raw)?),
        FieldType::Uint16 => FieldValue::Uint16(narrow(raw)?),
        FieldType::Uint32 => FieldValue::Uint32(narrow(raw)?),
        FieldType::Uint64 => FieldValue::Uint64(narrow(raw)?),
        FieldType::Char => match raw {
            Value::String(s) if s.len() == 1 => FieldValue::Char(s.as_bytes()[0]),
            _ => FieldValue::Char(narrow(raw)?),
        },
        FieldType::Float => {
            FieldValue::Float(raw.as_f64().ok_or_else(|| format!("expected number, got {}", raw))? as f32)
        }
        FieldType::Double => {
            FieldValue::Double(raw.as_f64().ok_or_else(|| format!("expected number, got {}", raw))?)
        }
        FieldType::Ip => {
            let text = expect_str(raw)?;
            let ip: IpAddr = text.parse().map_err(|e| format!("{}: {}", text, e))?;
            FieldValue::Ip(ip)
        }
        FieldType::Mac => FieldValue::Mac(parse_mac(expect_str(raw)?)?),
        FieldType::Time => FieldValue::Time(parse_time(raw)?),
        FieldType::String => FieldValue::String(expect_str(raw)?.to_string()),
        FieldType::Bytes => {
            let text = expect_str(raw)?;
            FieldValue::Bytes(hex::decode(text).map_err(|e| format!("{}: {}", text, e))?)
        }
    })
}

/// RFC 3339 text, or a number of (possibly fractional) seconds since epoch
fn parse_time(raw: &Value) -> Result<u64, String> {
    match raw {
        Value::String(text) => {
            let parsed = DateTime::parse_from_rfc3339(text).map_err(|e| format!("{}: {}", text, e))?;
            u64::try_from(parsed.timestamp_millis()).map_err(|_| format!("{} is before the epoch", text))
        }
        Value::Number(n) => {
            let secs = n.as_f64().ok_or_else(|| format!("invalid time {}", n))?;
            if secs < 0.0 {
                return Err(format!("{} is before the epoch", n));
            }
            Ok((secs * 1000.0).round() as u64)
        }
        other => Err(format!("expected time, got {}", other)),
    }
}

fn parse_mac(text: &str) -> Result<[u8; MAC_WIDTH], String> {
    let mut mac = [0u8; MAC_WIDTH];
    let parts: Vec<&str> = text.split(|c: char| c == ':' || c == '-').collect();
    if parts.len() != MAC_WIDTH {
        return Err(format!("{}: expected 6 octets", text));
    }
    for (octet, part) in mac.iter_mut().zip(parts) {
        *octet = u8::from_str_radix(part, 16).map_err(|e| format!("{}: {}", text, e))?;
    }
    Ok(mac)
}

pub fn time_to_json(ms: u64) -> Value {
    match i64::try_from(ms).ok().and_then(DateTime::<Utc>::from_timestamp_millis) {
        Some(time) => Value::String(time.to_rfc3339_opts(SecondsFormat::Millis, true)),
        None => Value::from(ms),
    }
}

/// Encode a field value for output
pub fn value_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Int8(v) => Value::from(*v),
        FieldValue::Int16(v) => Value::from(*v),
        FieldValue::Int32(v) => Value::from(*v),
        FieldValue::Int64(v) => Value::from(*v),
        FieldValue::Uint8(v) | FieldValue::Char(v) => Value::from(*v),
        FieldValue::Uint16(v) => Value::from(*v),
        FieldValue::Uint32(v) => Value::from(*v),
        FieldValue::Uint64(v) => Value::from(*v),
        FieldValue::Float(v) => Value::from(*v as f64),
        FieldValue::Double(v) => Value::from(*v),
        FieldValue::Ip(ip) => Value::String(ip.to_string()),
        FieldValue::Mac(mac) => Value::String(
            mac.iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(":"),
        ),
        FieldValue::Time(ms) => time_to_json(*ms),
        FieldValue::String(s) => Value::String(s.clone()),
        FieldValue::Bytes(b) => Value::String(hex::encode(b)),
    }
}
