//! Finalized aggregate records handed to the emitter

use super::record::FieldValue;
use super::rules::{COUNT, TIME_FIRST, TIME_LAST};
use crate::source::codec::{time_to_json, value_to_json};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// One aggregate, copied out of the table with post-processing applied
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub schema_version: u64,
    /// Key and value fields in rule order
    pub fields: Vec<(String, FieldValue)>,
    pub count: u32,
    /// Milliseconds since epoch
    pub time_first: u64,
    pub time_last: u64,
    /// Set when the aggregate continues a flow split by the active timeout
    pub continued: bool,
}

impl OutputRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

impl Serialize for OutputRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 3))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, &value_to_json(value))?;
        }
        map.serialize_entry(COUNT, &self.count)?;
        map.serialize_entry(TIME_FIRST, &time_to_json(self.time_first))?;
        map.serialize_entry(TIME_LAST, &time_to_json(self.time_last))?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_keeps_field_order() {
        let record = OutputRecord {
            schema_version: 1,
            fields: vec![
                ("SRC_PORT".to_string(), FieldValue::Uint16(53)),
                ("BYTES".to_string(), FieldValue::Uint64(150)),
            ],
            count: 2,
            time_first: 0,
            time_last: 5_500,
            continued: false,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"SRC_PORT":53,"BYTES":150,"COUNT":2,"TIME_FIRST":"1970-01-01T00:00:00.000Z","TIME_LAST":"1970-01-01T00:00:05.500Z"}"#
        );
        assert_eq!(record.get("BYTES"), Some(&FieldValue::Uint64(150)));
        assert_eq!(record.get("PACKETS"), None);
    }
}
