use std::cmp::Ordering;

use crate::{
    error::{self, Result},
    Key, KeyType,
};

/// A half-open key interval `[low, high)`.
///
/// `high` may be the type's max sentinel, denoting an unbounded-high range.
/// A range whose `low` is itself the max sentinel is the spec's "empty"
/// range (see [`ShardRange::is_empty`]); it is never produced by [`ShardRange::new`]
/// or [`ShardRange::single`], only by [`ShardRange::empty`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRange {
    low: Key,
    high: Key,
}

impl ShardRange {
    /// Builds `[low, high)`, requiring `low < high` and a matching key type.
    pub fn new(low: Key, high: Key) -> Result<Self> {
        if low.key_type() != high.key_type() {
            return error::TypeMismatchSnafu {
                expected: low.key_type(),
                found: high.key_type(),
            }
            .fail();
        }
        if low >= high {
            return error::InvalidRangeSnafu {
                low: format!("{low:?}"),
                high: format!("{high:?}"),
            }
            .fail();
        }
        Ok(ShardRange { low, high })
    }

    /// Builds the normalized single-point range `[point, next(point))` used
    /// by List shard maps.
    pub fn single(point: Key) -> Result<Self> {
        let high = point.next()?;
        Ok(ShardRange { low: point, high })
    }

    /// The sentinel "empty" range: `low == high == Key::max_value(key_type)`.
    pub fn empty(key_type: KeyType) -> Self {
        ShardRange {
            low: Key::max_value(key_type),
            high: Key::max_value(key_type),
        }
    }

    pub fn low(&self) -> &Key {
        &self.low
    }

    pub fn high(&self) -> &Key {
        &self.high
    }

    pub fn key_type(&self) -> KeyType {
        self.low.key_type()
    }

    pub fn is_empty(&self) -> bool {
        self.low == Key::max_value(self.key_type())
    }

    pub fn contains(&self, key: &Key) -> bool {
        !self.is_empty() && *key >= self.low && *key < self.high
    }

    pub fn intersects(&self, other: &ShardRange) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.low < other.high && other.low < self.high
    }

    /// True if `other` starts exactly where `self` ends, so the two ranges
    /// could be [`Self::merge`]d.
    pub fn is_adjacent_to(&self, other: &ShardRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.high == other.low
    }

    /// Merges two adjacent ranges (`self` immediately followed by `other`)
    /// into one spanning range.
    pub fn merge(&self, other: &ShardRange) -> Result<ShardRange> {
        if !self.is_adjacent_to(other) {
            return error::InvalidRangeSnafu {
                low: format!("{:?}", self.low),
                high: format!("{:?}", other.high),
            }
            .fail();
        }
        Ok(ShardRange {
            low: self.low.clone(),
            high: other.high.clone(),
        })
    }

    /// Splits `self` at `at` into `([low, at), [at, high))`.
    pub fn split(&self, at: Key) -> Result<(ShardRange, ShardRange)> {
        if !self.contains(&at) || at == self.low {
            return error::InvalidRangeSnafu {
                low: format!("{:?}", self.low),
                high: format!("{at:?}"),
            }
            .fail();
        }
        Ok((
            ShardRange::new(self.low.clone(), at.clone())?,
            ShardRange {
                low: at,
                high: self.high.clone(),
            },
        ))
    }
}

impl PartialOrd for ShardRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ShardRange {
    fn cmp(&self, other: &Self) -> Ordering {
        self.low.cmp(&other.low).then_with(|| self.high.cmp(&other.high))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyValue;

    fn k(v: i32) -> Key {
        Key::Value(KeyType::Int32, KeyValue::Int32(v))
    }

    #[test]
    fn single_point_normalizes_to_half_open_range() {
        let r = ShardRange::single(k(5)).unwrap();
        assert!(r.contains(&k(5)));
        assert!(!r.contains(&k(6)));
    }

    #[test]
    fn intersects_detects_overlap() {
        let a = ShardRange::new(k(0), k(100)).unwrap();
        let b = ShardRange::new(k(50), k(150)).unwrap();
        let c = ShardRange::new(k(100), k(150)).unwrap();
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn split_then_merge_reconstructs_range() {
        let r = ShardRange::new(k(0), k(10)).unwrap();
        let (left, right) = r.split(k(5)).unwrap();
        let merged = left.merge(&right).unwrap();
        assert_eq!(merged, r);
    }

    #[test]
    fn empty_range_has_max_low() {
        let e = ShardRange::empty(KeyType::Int32);
        assert!(e.is_empty());
        assert!(!e.contains(&k(i32::MAX)));
    }
}
