//! Composite flow key
//!
//! The key is the concatenation of a record's raw key-field bytes in rule
//! order. The hash is computed once at construction so table lookups only
//! feed a `u64` to the map's hasher.

use rustc_hash::FxHasher;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Clone)]
pub struct FlowKey {
    bytes: Box<[u8]>,
    hash: u64,
}

impl FlowKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let mut hasher = FxHasher::default();
        hasher.write(&bytes);
        Self {
            bytes: bytes.into_boxed_slice(),
            hash: hasher.finish(),
        }
    }

    /// Key shared by every record when no key field is configured
    pub fn empty() -> Self {
        Self::from_bytes(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for FlowKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.bytes == other.bytes
    }
}

impl Eq for FlowKey {}

impl Hash for FlowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialOrd for FlowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FlowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes.is_empty() {
            f.write_str("<empty>")
        } else {
            f.write_str(&hex::encode(&self.bytes))
        }
    }
}

impl fmt::Debug for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlowKey({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    #[test]
    fn test_equal_bytes_equal_keys() {
        let a = FlowKey::from_bytes(vec![10, 0, 0, 1, 0, 80]);
        let b = FlowKey::from_bytes(vec![10, 0, 0, 1, 0, 80]);
        let c = FlowKey::from_bytes(vec![10, 0, 0, 2, 0, 80]);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut map = FxHashMap::default();
        map.insert(a, 1u32);
        assert_eq!(map.get(&b), Some(&1));
        assert_eq!(map.get(&c), None);
    }

    #[test]
    fn test_display_is_hex() {
        let key = FlowKey::from_bytes(vec![0xde, 0xad, 0x01]);
        assert_eq!(key.to_string(), "dead01");
        assert_eq!(FlowKey::empty().to_string(), "<empty>");
        assert!(FlowKey::empty().is_empty());
    }
}
