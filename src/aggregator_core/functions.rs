//! Per-field aggregation functions
//!
//! Each value field gets a `FieldAggregator` resolved once per schema from
//! `(FuncKind, FieldType)`. Merge functions operate on raw little-endian
//! slots: `src` is the incoming record's bytes, `dst` the stored bytes.

use super::record::FieldType;
use super::rules::FuncKind;
use std::ops::{BitAnd, BitOr};

/// Merge a fixed-width incoming value into stored bytes
pub type FixedMergeFn = fn(src: &[u8], dst: &mut [u8]);

/// Post-processing applied to a copy of the stored bytes before emission
pub type FinalizeFn = fn(dst: &mut [u8], count: u32);

#[derive(Debug, Clone, Copy)]
pub enum FieldMerge {
    /// Value stays as seeded
    Noop,
    Fixed(FixedMergeFn),
    /// Replace a variable-length value
    LastVariable,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldAggregator {
    pub merge: FieldMerge,
    pub finalize: Option<FinalizeFn>,
}

impl FieldAggregator {
    pub const NOOP: FieldAggregator = FieldAggregator {
        merge: FieldMerge::Noop,
        finalize: None,
    };

    /// Resolve the aggregator for a function applied to a field type.
    /// Unsupported pairs resolve to a no-op with a warning.
    pub fn resolve(func: FuncKind, field_type: FieldType, field_name: &str) -> Self {
        let merge = match func {
            FuncKind::Sum | FuncKind::Avg => numeric_merge(field_type, MergeOp::Sum),
            FuncKind::Min => ordered_merge(field_type, MergeOp::Min),
            FuncKind::Max => ordered_merge(field_type, MergeOp::Max),
            FuncKind::First => return Self::NOOP,
            FuncKind::Last => last_merge(field_type),
            FuncKind::BitOr => integer_merge(field_type, MergeOp::Or),
            FuncKind::BitAnd => integer_merge(field_type, MergeOp::And),
        };

        let Some(merge) = merge else {
            log::warn!(
                "⚠️  Function {} is not supported for {} field {}, value kept from first record",
                func,
                field_type,
                field_name
            );
            return Self::NOOP;
        };

        let finalize = match func {
            FuncKind::Avg => avg_finalizer(field_type),
            _ => None,
        };

        Self { merge, finalize }
    }
}

/// Fixed-width value readable from and writable to little-endian bytes
trait Scalar: Copy + PartialOrd {
    const WIDTH: usize;
    fn read(src: &[u8]) -> Self;
    fn write(self, dst: &mut [u8]);
}

trait Accumulate: Scalar {
    fn zero() -> Self;
    fn accumulate(self, other: Self) -> Self;
    fn divide(self, count: u32) -> Self;
}

trait Bitwise: Scalar + BitOr<Output = Self> + BitAnd<Output = Self> {}

macro_rules! impl_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                fn read(src: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(&src[..Self::WIDTH]);
                    <$t>::from_le_bytes(buf)
                }

                fn write(self, dst: &mut [u8]) {
                    dst[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

macro_rules! impl_integer {
    ($($t:ty),*) => {
        $(
            impl Accumulate for $t {
                fn zero() -> Self {
                    0
                }

                // Saturates instead of wrapping
                fn accumulate(self, other: Self) -> Self {
                    self.saturating_add(other)
                }

                fn divide(self, count: u32) -> Self {
                    (self as i128 / count as i128) as $t
                }
            }

            impl Bitwise for $t {}
        )*
    };
}

macro_rules! impl_float {
    ($($t:ty),*) => {
        $(
            impl Accumulate for $t {
                fn zero() -> Self {
                    0.0
                }

                fn accumulate(self, other: Self) -> Self {
                    self + other
                }

                fn divide(self, count: u32) -> Self {
                    self / count as $t
                }
            }
        )*
    };
}

impl_scalar!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);
impl_integer!(i8, i16, i32, i64, u8, u16, u32, u64);
impl_float!(f32, f64);

fn sum<T: Accumulate>(src: &[u8], dst: &mut [u8]) {
    T::read(dst).accumulate(T::read(src)).write(dst);
}

fn min<T: Scalar>(src: &[u8], dst: &mut [u8]) {
    let incoming = T::read(src);
    if incoming < T::read(dst) {
        incoming.write(dst);
    }
}

fn max<T: Scalar>(src: &[u8], dst: &mut [u8]) {
    let incoming = T::read(src);
    if incoming > T::read(dst) {
        incoming.write(dst);
    }
}

fn bit_or<T: Bitwise>(src: &[u8], dst: &mut [u8]) {
    (T::read(dst) | T::read(src)).write(dst);
}

fn bit_and<T: Bitwise>(src: &[u8], dst: &mut [u8]) {
    (T::read(dst) & T::read(src)).write(dst);
}

// Addresses are stored big-endian, so byte order is address order
fn min_bytes(src: &[u8], dst: &mut [u8]) {
    if src < &*dst {
        dst.copy_from_slice(src);
    }
}

fn max_bytes(src: &[u8], dst: &mut [u8]) {
    if src > &*dst {
        dst.copy_from_slice(src);
    }
}

fn last_fixed(src: &[u8], dst: &mut [u8]) {
    dst.copy_from_slice(src);
}

fn make_avg<T: Accumulate>(dst: &mut [u8], count: u32) {
    let value = if count == 0 { T::zero() } else { T::read(dst).divide(count) };
    value.write(dst);
}

#[derive(Clone, Copy)]
enum MergeOp {
    Sum,
    Min,
    Max,
    Or,
    And,
}

/// Instantiate a generic merge function for every primitive type of the field
macro_rules! dispatch {
    ($field_type:expr, $func:ident, [$($variant:ident => $t:ty),*]) => {
        match $field_type {
            $(FieldType::$variant => Some($func::<$t> as FixedMergeFn),)*
            _ => None,
        }
    };
}

fn numeric_merge(field_type: FieldType, op: MergeOp) -> Option<FieldMerge> {
    let f = match op {
        MergeOp::Sum => dispatch!(field_type, sum, [
            Int8 => i8, Int16 => i16, Int32 => i32, Int64 => i64,
            Uint8 => u8, Uint16 => u16, Uint32 => u32, Uint64 => u64,
            Float => f32, Double => f64
        ]),
        _ => None,
    };
    f.map(FieldMerge::Fixed)
}

fn ordered_merge(field_type: FieldType, op: MergeOp) -> Option<FieldMerge> {
    let f = match (op, field_type) {
        (MergeOp::Min, FieldType::Ip) => Some(min_bytes as FixedMergeFn),
        (MergeOp::Max, FieldType::Ip) => Some(max_bytes as FixedMergeFn),
        (MergeOp::Min, _) => dispatch!(field_type, min, [
            Int8 => i8, Int16 => i16, Int32 => i32, Int64 => i64,
            Uint8 => u8, Uint16 => u16, Uint32 => u32, Uint64 => u64,
            Float => f32, Double => f64, Char => u8, Time => u64
        ]),
        (MergeOp::Max, _) => dispatch!(field_type, max, [
            Int8 => i8, Int16 => i16, Int32 => i32, Int64 => i64,
            Uint8 => u8, Uint16 => u16, Uint32 => u32, Uint64 => u64,
            Float => f32, Double => f64, Char => u8, Time => u64
        ]),
        _ => None,
    };
    f.map(FieldMerge::Fixed)
}

fn integer_merge(field_type: FieldType, op: MergeOp) -> Option<FieldMerge> {
    let f = match op {
        MergeOp::Or => dispatch!(field_type, bit_or, [
            Int8 => i8, Int16 => i16, Int32 => i32, Int64 => i64,
            Uint8 => u8, Uint16 => u16, Uint32 => u32, Uint64 => u64, Char => u8
        ]),
        MergeOp::And => dispatch!(field_type, bit_and, [
            Int8 => i8, Int16 => i16, Int32 => i32, Int64 => i64,
            Uint8 => u8, Uint16 => u16, Uint32 => u32, Uint64 => u64, Char => u8
        ]),
        _ => None,
    };
    f.map(FieldMerge::Fixed)
}

fn last_merge(field_type: FieldType) -> Option<FieldMerge> {
    match field_type {
        FieldType::String | FieldType::Bytes => Some(FieldMerge::LastVariable),
        FieldType::Mac => None,
        _ => Some(FieldMerge::Fixed(last_fixed)),
    }
}

fn avg_finalizer(field_type: FieldType) -> Option<FinalizeFn> {
    let f: FinalizeFn = match field_type {
        FieldType::Int8 => make_avg::<i8>,
        FieldType::Int16 => make_avg::<i16>,
        FieldType::Int32 => make_avg::<i32>,
        FieldType::Int64 => make_avg::<i64>,
        FieldType::Uint8 => make_avg::<u8>,
        FieldType::Uint16 => make_avg::<u16>,
        FieldType::Uint32 => make_avg::<u32>,
        FieldType::Uint64 => make_avg::<u64>,
        FieldType::Float => make_avg::<f32>,
        FieldType::Double => make_avg::<f64>,
        _ => return None,
    };
    Some(f)
}
