use std::cmp::Ordering;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::error::{self, Result};

/// The binary key cap mirrors the well-known 128-byte limit used by the
/// shard-key wire format this crate's encoding is compatible with.
const MAX_BINARY_KEY_LEN: usize = 128;

fn utc_fixed_offset() -> FixedOffset {
    FixedOffset::east_opt(0).expect("zero offset is always valid")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum KeyType {
    Int32,
    Int64,
    Guid,
    Binary,
    DateTime,
    DateTimeOffset,
    TimeSpan,
}

/// The concrete payload carried by a non-sentinel [`Key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValue {
    Int32(i32),
    Int64(i64),
    Guid(Uuid),
    Binary(Vec<u8>),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    TimeSpan(Duration),
}

/// A typed, totally ordered key.
///
/// `Max` is the type's maximum sentinel: a value strictly greater than every
/// representable value of the type, used to express an unbounded high bound
/// on a [`crate::ShardRange`] and, per spec.md §4.A, to mark a range "empty"
/// when used as the low bound. It has no raw byte form: [`Key::to_raw_bytes`]
/// only round-trips concrete values, since mapping bounds persist the low
/// bound directly and the high bound's "is max" flag as a separate column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Value(KeyType, KeyValue),
    Max(KeyType),
}

impl Key {
    pub fn key_type(&self) -> KeyType {
        match self {
            Key::Value(kt, _) => *kt,
            Key::Max(kt) => *kt,
        }
    }

    pub fn is_max(&self) -> bool {
        matches!(self, Key::Max(_))
    }

    pub fn min_value(key_type: KeyType) -> Key {
        let value = match key_type {
            KeyType::Int32 => KeyValue::Int32(i32::MIN),
            KeyType::Int64 => KeyValue::Int64(i64::MIN),
            KeyType::Guid => KeyValue::Guid(Uuid::nil()),
            KeyType::Binary => KeyValue::Binary(Vec::new()),
            KeyType::DateTime => KeyValue::DateTime(NaiveDateTime::MIN),
            KeyType::DateTimeOffset => {
                KeyValue::DateTimeOffset(DateTime::<Utc>::MIN_UTC.with_timezone(&utc_fixed_offset()))
            }
            KeyType::TimeSpan => KeyValue::TimeSpan(Duration::min_value()),
        };
        Key::Value(key_type, value)
    }

    pub fn max_value(key_type: KeyType) -> Key {
        Key::Max(key_type)
    }

    /// Returns the immediate successor of `self`.
    ///
    /// Fails with [`error::Error::UnsupportedNextKey`] only when `self` is
    /// already the max sentinel. A concrete value that sits at the edge of
    /// its type's representable range rolls over to the max sentinel rather
    /// than erroring, since "one past the largest representable value" is
    /// exactly what the sentinel denotes.
    pub fn next(&self) -> Result<Key> {
        match self {
            Key::Max(key_type) => error::UnsupportedNextKeySnafu { key_type: *key_type }.fail(),
            Key::Value(key_type, value) => Ok(next_value(*key_type, value)),
        }
    }

    pub fn to_raw_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Key::Max(key_type) => error::MaxSentinelHasNoRawFormSnafu { key_type: *key_type }.fail(),
            Key::Value(key_type, value) => Ok(encode_value(*key_type, value)),
        }
    }

    pub fn from_raw_bytes(key_type: KeyType, bytes: &[u8]) -> Result<Key> {
        decode_value(key_type, bytes).map(|v| Key::Value(key_type, v))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Max(a), Key::Max(b)) => key_type_order(*a).cmp(&key_type_order(*b)),
            (Key::Max(_), Key::Value(..)) => Ordering::Greater,
            (Key::Value(..), Key::Max(_)) => Ordering::Less,
            (Key::Value(a, _), Key::Value(b, _)) if a != b => {
                key_type_order(*a).cmp(&key_type_order(*b))
            }
            (Key::Value(_, _), Key::Value(_, _)) => {
                let lhs = self.to_raw_bytes().expect("Value keys always encode");
                let rhs = other.to_raw_bytes().expect("Value keys always encode");
                lhs.cmp(&rhs)
            }
        }
    }
}

fn key_type_order(kt: KeyType) -> u8 {
    match kt {
        KeyType::Int32 => 0,
        KeyType::Int64 => 1,
        KeyType::Guid => 2,
        KeyType::Binary => 3,
        KeyType::DateTime => 4,
        KeyType::DateTimeOffset => 5,
        KeyType::TimeSpan => 6,
    }
}

fn next_value(key_type: KeyType, value: &KeyValue) -> Key {
    match (key_type, value) {
        (KeyType::Int32, KeyValue::Int32(v)) => match v.checked_add(1) {
            Some(next) => Key::Value(key_type, KeyValue::Int32(next)),
            None => Key::Max(key_type),
        },
        (KeyType::Int64, KeyValue::Int64(v)) => match v.checked_add(1) {
            Some(next) => Key::Value(key_type, KeyValue::Int64(next)),
            None => Key::Max(key_type),
        },
        (KeyType::Guid, KeyValue::Guid(v)) => {
            let mut bytes = *v.as_bytes();
            if increment_be_bytes(&mut bytes) {
                Key::Value(key_type, KeyValue::Guid(Uuid::from_bytes(bytes)))
            } else {
                Key::Max(key_type)
            }
        }
        (KeyType::Binary, KeyValue::Binary(v)) => {
            if v.len() >= MAX_BINARY_KEY_LEN {
                Key::Max(key_type)
            } else {
                let mut next = v.clone();
                next.push(0);
                Key::Value(key_type, KeyValue::Binary(next))
            }
        }
        (KeyType::DateTime, KeyValue::DateTime(v)) => {
            match v.checked_add_signed(Duration::nanoseconds(1)) {
                Some(next) => Key::Value(key_type, KeyValue::DateTime(next)),
                None => Key::Max(key_type),
            }
        }
        (KeyType::DateTimeOffset, KeyValue::DateTimeOffset(v)) => {
            match v.checked_add_signed(Duration::nanoseconds(1)) {
                Some(next) => Key::Value(key_type, KeyValue::DateTimeOffset(next)),
                None => Key::Max(key_type),
            }
        }
        (KeyType::TimeSpan, KeyValue::TimeSpan(v)) => {
            let one_ns = Duration::nanoseconds(1);
            if *v > Duration::max_value() - one_ns {
                Key::Max(key_type)
            } else {
                Key::Value(key_type, KeyValue::TimeSpan(*v + one_ns))
            }
        }
        _ => unreachable!("KeyValue variant always matches its KeyType tag"),
    }
}

/// Increments a big-endian byte buffer as if it were one large unsigned
/// integer. Returns `false` on overflow (all bytes were already `0xFF`).
fn increment_be_bytes(bytes: &mut [u8]) -> bool {
    for byte in bytes.iter_mut().rev() {
        if *byte == 0xFF {
            *byte = 0;
        } else {
            *byte += 1;
            return true;
        }
    }
    false
}

/// Flips the sign bit so two's-complement signed integers sort the same way
/// as their big-endian unsigned byte encoding.
fn encode_i64(v: i64) -> [u8; 8] {
    let unsigned = (v as u64) ^ 0x8000_0000_0000_0000;
    unsigned.to_be_bytes()
}

fn decode_i64(key_type: KeyType, bytes: &[u8]) -> Result<i64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| {
        error::InvalidRawBytesSnafu {
            key_type,
            len: bytes.len(),
        }
        .build()
    })?;
    let unsigned = u64::from_be_bytes(arr);
    Ok((unsigned ^ 0x8000_0000_0000_0000) as i64)
}

fn encode_value(_key_type: KeyType, value: &KeyValue) -> Vec<u8> {
    match value {
        KeyValue::Int32(v) => {
            let unsigned = (*v as u32) ^ 0x8000_0000;
            unsigned.to_be_bytes().to_vec()
        }
        KeyValue::Int64(v) => encode_i64(*v).to_vec(),
        KeyValue::Guid(v) => v.as_bytes().to_vec(),
        KeyValue::Binary(v) => v.clone(),
        KeyValue::DateTime(v) => {
            encode_i64(v.and_utc().timestamp_nanos_opt().unwrap_or(i64::MIN)).to_vec()
        }
        KeyValue::DateTimeOffset(v) => {
            encode_i64(v.timestamp_nanos_opt().unwrap_or(i64::MIN)).to_vec()
        }
        KeyValue::TimeSpan(v) => encode_i64(v.num_nanoseconds().unwrap_or(i64::MIN)).to_vec(),
    }
}

fn decode_value(key_type: KeyType, bytes: &[u8]) -> Result<KeyValue> {
    match key_type {
        KeyType::Int32 => {
            let arr: [u8; 4] = bytes.try_into().map_err(|_| {
                error::InvalidRawBytesSnafu {
                    key_type,
                    len: bytes.len(),
                }
                .build()
            })?;
            let unsigned = u32::from_be_bytes(arr);
            Ok(KeyValue::Int32((unsigned ^ 0x8000_0000) as i32))
        }
        KeyType::Int64 => Ok(KeyValue::Int64(decode_i64(key_type, bytes)?)),
        KeyType::Guid => {
            let arr: [u8; 16] = bytes.try_into().map_err(|_| {
                error::InvalidRawBytesSnafu {
                    key_type,
                    len: bytes.len(),
                }
                .build()
            })?;
            Ok(KeyValue::Guid(Uuid::from_bytes(arr)))
        }
        KeyType::Binary => Ok(KeyValue::Binary(bytes.to_vec())),
        KeyType::DateTime => {
            let nanos = decode_i64(key_type, bytes)?;
            let secs = nanos.div_euclid(1_000_000_000);
            let nsec = nanos.rem_euclid(1_000_000_000) as u32;
            let dt = NaiveDateTime::from_timestamp_opt(secs, nsec).ok_or_else(|| {
                error::InvalidRawBytesSnafu {
                    key_type,
                    len: bytes.len(),
                }
                .build()
            })?;
            Ok(KeyValue::DateTime(dt))
        }
        KeyType::DateTimeOffset => {
            let nanos = decode_i64(key_type, bytes)?;
            let secs = nanos.div_euclid(1_000_000_000);
            let nsec = nanos.rem_euclid(1_000_000_000) as u32;
            let dt = DateTime::<Utc>::from_timestamp(secs, nsec)
                .ok_or_else(|| {
                    error::InvalidRawBytesSnafu {
                        key_type,
                        len: bytes.len(),
                    }
                    .build()
                })?
                .with_timezone(&utc_fixed_offset());
            Ok(KeyValue::DateTimeOffset(dt))
        }
        KeyType::TimeSpan => {
            let nanos = decode_i64(key_type, bytes)?;
            Ok(KeyValue::TimeSpan(Duration::nanoseconds(nanos)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(kt: KeyType, v: KeyValue) {
        let k = Key::Value(kt, v);
        let bytes = k.to_raw_bytes().unwrap();
        let back = Key::from_raw_bytes(kt, &bytes).unwrap();
        assert_eq!(k, back);
    }

    #[test]
    fn int32_roundtrip_and_order() {
        roundtrip(KeyType::Int32, KeyValue::Int32(-5));
        roundtrip(KeyType::Int32, KeyValue::Int32(5));
        let a = Key::Value(KeyType::Int32, KeyValue::Int32(-1));
        let b = Key::Value(KeyType::Int32, KeyValue::Int32(1));
        assert!(a < b);
    }

    #[test]
    fn int64_next_overflows_to_max() {
        let k = Key::Value(KeyType::Int64, KeyValue::Int64(i64::MAX));
        let next = k.next().unwrap();
        assert!(next.is_max());
        assert!(Key::max_value(KeyType::Int64).next().is_err());
    }

    #[test]
    fn guid_roundtrip() {
        roundtrip(KeyType::Guid, KeyValue::Guid(Uuid::new_v4()));
    }

    #[test]
    fn binary_next_appends_zero() {
        let k = Key::Value(KeyType::Binary, KeyValue::Binary(vec![1, 2]));
        let next = k.next().unwrap();
        assert_eq!(
            next,
            Key::Value(KeyType::Binary, KeyValue::Binary(vec![1, 2, 0]))
        );
    }

    #[test]
    fn datetime_roundtrip() {
        roundtrip(
            KeyType::DateTime,
            KeyValue::DateTime(NaiveDateTime::from_timestamp_opt(1_700_000_000, 123).unwrap()),
        );
    }

    #[test]
    fn max_sentinel_greater_than_any_value() {
        let v = Key::Value(KeyType::Int32, KeyValue::Int32(i32::MAX));
        let max = Key::max_value(KeyType::Int32);
        assert!(v < max);
    }
}
