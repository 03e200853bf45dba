//! Feed range addressing types.
//!
//! A change log is sliced into feed ranges. Two addressing schemes exist:
//!
//! - **Partition-identity** ranges are bound to a physical partition id and
//!   become invalid forever once that partition splits or merges away.
//! - **EPK** ranges are `[min, max)` intervals over the effective partition key
//!   space and stay valid across topology changes.
//!
//! The scheme is fixed when a [`FeedRange`] is constructed; handlers switch on
//! the variant.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_EPK, MIN_EPK};
use crate::error::{FeedError, FeedResult};

/// Half-open interval `[min, max)` over the effective partition key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawEpkRange")]
pub struct EpkRange {
    min: String,
    max: String,
}

/// Unchecked wire form of [`EpkRange`]; decoding goes through [`EpkRange::new`].
#[derive(Deserialize)]
struct RawEpkRange {
    min: String,
    max: String,
}

impl TryFrom<RawEpkRange> for EpkRange {
    type Error = FeedError;

    fn try_from(raw: RawEpkRange) -> FeedResult<Self> {
        EpkRange::new(raw.min, raw.max)
    }
}

impl EpkRange {
    /// Create a new range, rejecting empty or inverted intervals.
    pub fn new(min: impl Into<String>, max: impl Into<String>) -> FeedResult<Self> {
        let min = min.into();
        let max = max.into();
        if min >= max {
            return Err(FeedError::PartitionTopology(format!(
                "empty effective key range [{min},{max})"
            )));
        }
        Ok(Self { min, max })
    }

    /// The whole key space.
    pub fn full() -> Self {
        Self {
            min: MIN_EPK.to_string(),
            max: MAX_EPK.to_string(),
        }
    }

    /// Inclusive lower bound.
    pub fn min(&self) -> &str {
        &self.min
    }

    /// Exclusive upper bound.
    pub fn max(&self) -> &str {
        &self.max
    }

    /// Returns true if `key` falls inside the range.
    pub fn contains_key(&self, key: &str) -> bool {
        key >= self.min.as_str() && key < self.max.as_str()
    }

    /// Returns true if `other` lies entirely inside this range.
    pub fn contains_range(&self, other: &EpkRange) -> bool {
        self.min <= other.min && other.max <= self.max
    }

    /// Returns true if the two ranges share at least one key.
    pub fn overlaps(&self, other: &EpkRange) -> bool {
        self.min < other.max && other.min < self.max
    }
}

impl fmt::Display for EpkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.min, self.max)
    }
}

/// A logical slice of the change log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedRange {
    /// Bound 1:1 to a physical partition. The EPK interval the partition owned
    /// is carried along so the lease can migrate to EPK addressing.
    Partition { partition_id: String, range: EpkRange },

    /// Bound to an effective partition key interval.
    Epk { range: EpkRange },
}

impl FeedRange {
    /// Partition-identity feed range.
    pub fn partition(partition_id: impl Into<String>, range: EpkRange) -> Self {
        FeedRange::Partition {
            partition_id: partition_id.into(),
            range,
        }
    }

    /// EPK-range feed range.
    pub fn epk(range: EpkRange) -> Self {
        FeedRange::Epk { range }
    }

    /// The EPK interval covered by this feed range.
    pub fn epk_range(&self) -> &EpkRange {
        match self {
            FeedRange::Partition { range, .. } => range,
            FeedRange::Epk { range } => range,
        }
    }

    /// Physical partition id, for partition-identity ranges.
    pub fn partition_id(&self) -> Option<&str> {
        match self {
            FeedRange::Partition { partition_id, .. } => Some(partition_id),
            FeedRange::Epk { .. } => None,
        }
    }

    /// Returns true if this range is addressed by physical partition id.
    pub fn is_partition_addressed(&self) -> bool {
        matches!(self, FeedRange::Partition { .. })
    }

    /// Stable key used to match leases to feed ranges.
    ///
    /// Partition ranges use the partition id; EPK ranges use `"{min}-{max}"`.
    pub fn lease_key(&self) -> String {
        match self {
            FeedRange::Partition { partition_id, .. } => partition_id.clone(),
            FeedRange::Epk { range } => format!("{}-{}", range.min(), range.max()),
        }
    }
}

impl fmt::Display for FeedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedRange::Partition {
                partition_id,
                range,
            } => write!(f, "partition {partition_id} {range}"),
            FeedRange::Epk { range } => write!(f, "epk {range}"),
        }
    }
}

/// Physical partition metadata supplied by the topology provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    /// Partition id assigned by the storage service.
    pub id: String,
    /// Key range owned by the partition.
    pub range: EpkRange,
    /// Ids of the partitions this one was split or merged from.
    #[serde(default)]
    pub parents: Vec<String>,
}

impl PartitionDescriptor {
    /// Create a descriptor with no parent linkage.
    pub fn new(id: impl Into<String>, range: EpkRange) -> Self {
        Self {
            id: id.into(),
            range,
            parents: Vec::new(),
        }
    }

    /// Attach parent partition ids.
    pub fn with_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parents = parents.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: &str, max: &str) -> EpkRange {
        EpkRange::new(min, max).unwrap()
    }

    #[test]
    fn test_empty_range_rejected() {
        assert!(EpkRange::new("AA", "AA").is_err());
        assert!(EpkRange::new("BB", "AA").is_err());
    }

    #[test]
    fn test_full_range_contains_everything() {
        let full = EpkRange::full();
        assert!(full.contains_key(""));
        assert!(full.contains_key("3F"));
        assert!(!full.contains_key("FF"));
        assert!(full.contains_range(&range("10", "20")));
    }

    #[test]
    fn test_overlap_is_half_open() {
        assert!(!range("00", "40").overlaps(&range("40", "80")));
        assert!(range("00", "41").overlaps(&range("40", "80")));
    }

    #[test]
    fn test_lease_key_depends_on_addressing() {
        let r = range("00", "80");
        assert_eq!(FeedRange::partition("3", r.clone()).lease_key(), "3");
        assert_eq!(FeedRange::epk(r).lease_key(), "00-80");
    }

    #[test]
    fn test_feed_range_serde_tag() {
        let fr = FeedRange::epk(range("", "FF"));
        let json = serde_json::to_string(&fr).unwrap();
        assert!(json.contains("\"kind\":\"epk\""));
        let back: FeedRange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fr);
    }

    #[test]
    fn test_bounds_accessors() {
        let r = range("20", "80");
        assert_eq!(r.min(), "20");
        assert_eq!(r.max(), "80");
        assert_eq!(EpkRange::full().min(), "");
        assert_eq!(EpkRange::full().max(), "FF");
    }

    #[test]
    fn test_decoding_rejects_empty_or_inverted_range() {
        assert!(serde_json::from_str::<EpkRange>(r#"{"min":"80","max":"40"}"#).is_err());
        assert!(serde_json::from_str::<EpkRange>(r#"{"min":"40","max":"40"}"#).is_err());
        assert!(
            serde_json::from_str::<FeedRange>(r#"{"kind":"epk","range":{"min":"C0","max":"10"}}"#)
                .is_err()
        );
        assert_eq!(
            serde_json::from_str::<EpkRange>(r#"{"min":"40","max":"80"}"#).unwrap(),
            range("40", "80")
        );
    }
}
