//! Partition topology metadata.
//!
//! The storage service assigns each physical partition an EPK interval. When a
//! partition splits or merges away, the change log source signals "gone";
//! successors either travel with that signal or are looked up here.

use async_trait::async_trait;

use crate::error::{FeedError, FeedResult};
use crate::types::{EpkRange, PartitionDescriptor};

/// Supplies physical partition metadata on demand.
#[async_trait]
pub trait PartitionTopologyProvider: Send + Sync {
    /// Current partitions overlapping `range`, ordered by ascending `min`.
    async fn overlapping_partitions(&self, range: &EpkRange)
    -> FeedResult<Vec<PartitionDescriptor>>;

    /// Look up a single partition by id.
    async fn partition(&self, id: &str) -> FeedResult<Option<PartitionDescriptor>>;
}

/// Verify that `successors` tile `parent` with no gap and no overlap.
///
/// Successors must be ordered by ascending `min`, each must overlap the parent,
/// consecutive successors must share a boundary, and together they must cover
/// the parent from `min` to `max`. Outer successors may extend past the
/// parent's edges.
pub fn validate_successors(
    parent: &EpkRange,
    successors: &[PartitionDescriptor],
) -> FeedResult<()> {
    let (Some(first), Some(last)) = (successors.first(), successors.last()) else {
        return Err(FeedError::PartitionTopology(format!(
            "no successor partitions for {parent}"
        )));
    };

    if let Some(stray) = successors.iter().find(|p| !p.range.overlaps(parent)) {
        return Err(FeedError::PartitionTopology(format!(
            "successor {} {} does not overlap {parent}",
            stray.id, stray.range
        )));
    }

    for pair in successors.windows(2) {
        let (left, right) = (&pair[0], &pair[1]);
        if left.range.max() != right.range.min() {
            let kind = if left.range.max() < right.range.min() {
                "gap"
            } else {
                "overlap"
            };
            return Err(FeedError::PartitionTopology(format!(
                "{kind} between successors {} {} and {} {}",
                left.id, left.range, right.id, right.range
            )));
        }
    }

    if first.range.min() > parent.min() || last.range.max() < parent.max() {
        return Err(FeedError::PartitionTopology(format!(
            "successors [{},{}) do not cover {parent}",
            first.range.min(),
            last.range.max()
        )));
    }

    Ok(())
}

#[cfg(any(test, feature = "test-utilities"))]
pub use memory::InMemoryTopology;

#[cfg(any(test, feature = "test-utilities"))]
mod memory {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::RwLock;
    use tracing::info;

    use super::{PartitionTopologyProvider, validate_successors};
    use crate::error::{FeedError, FeedResult};
    use crate::types::{EpkRange, PartitionDescriptor};

    /// In-memory topology for tests and simulations.
    #[derive(Debug, Clone, Default)]
    pub struct InMemoryTopology {
        pub partitions: Arc<RwLock<BTreeMap<String, PartitionDescriptor>>>,
    }

    impl InMemoryTopology {
        /// Topology with the given live partitions.
        pub async fn with_partitions<I>(partitions: I) -> Self
        where
            I: IntoIterator<Item = PartitionDescriptor>,
        {
            let topology = Self::default();
            {
                let mut map = topology.partitions.write().await;
                for p in partitions {
                    map.insert(p.id.clone(), p);
                }
            }
            topology
        }

        /// Replace partition `parent_id` with `children`.
        pub async fn split(
            &self,
            parent_id: &str,
            children: Vec<PartitionDescriptor>,
        ) -> FeedResult<()> {
            let mut map = self.partitions.write().await;
            let parent = map.get(parent_id).ok_or_else(|| {
                FeedError::PartitionTopology(format!("unknown partition {parent_id}"))
            })?;
            validate_successors(&parent.range, &children)?;

            map.remove(parent_id);
            info!(parent = %parent_id, children = children.len(), "Partition split");
            for child in children {
                map.insert(child.id.clone(), child.with_parents([parent_id]));
            }
            Ok(())
        }

        /// Replace partitions `ids` with a single partition covering all of them.
        pub async fn merge(
            &self,
            ids: &[&str],
            merged_id: &str,
        ) -> FeedResult<PartitionDescriptor> {
            let mut map = self.partitions.write().await;
            let mut sources = Vec::with_capacity(ids.len());
            for id in ids {
                let p = map.get(*id).ok_or_else(|| {
                    FeedError::PartitionTopology(format!("unknown partition {id}"))
                })?;
                sources.push(p.clone());
            }
            sources.sort_by(|a, b| a.range.min().cmp(b.range.min()));

            let (Some(first), Some(last)) = (sources.first(), sources.last()) else {
                return Err(FeedError::PartitionTopology(
                    "merge needs at least one partition".to_string(),
                ));
            };
            let range = EpkRange::new(first.range.min(), last.range.max())?;
            validate_successors(&range, &sources)?;
            let merged =
                PartitionDescriptor::new(merged_id, range).with_parents(ids.iter().copied());

            for id in ids {
                map.remove(*id);
            }
            info!(merged = %merged_id, sources = ids.len(), "Partitions merged");
            map.insert(merged.id.clone(), merged.clone());
            Ok(merged)
        }
    }

    #[async_trait]
    impl PartitionTopologyProvider for InMemoryTopology {
        async fn overlapping_partitions(
            &self,
            range: &EpkRange,
        ) -> FeedResult<Vec<PartitionDescriptor>> {
            let map = self.partitions.read().await;
            let mut found: Vec<PartitionDescriptor> = map
                .values()
                .filter(|p| p.range.overlaps(range))
                .cloned()
                .collect();
            found.sort_by(|a, b| a.range.min().cmp(b.range.min()));
            Ok(found)
        }

        async fn partition(&self, id: &str) -> FeedResult<Option<PartitionDescriptor>> {
            Ok(self.partitions.read().await.get(id).cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(id: &str, min: &str, max: &str) -> PartitionDescriptor {
        PartitionDescriptor::new(id, EpkRange::new(min, max).unwrap())
    }

    fn range(min: &str, max: &str) -> EpkRange {
        EpkRange::new(min, max).unwrap()
    }

    #[test]
    fn test_valid_successors_pass() {
        let successors = vec![desc("1", "", "40"), desc("2", "40", "C0"), desc("3", "C0", "FF")];
        validate_successors(&range("20", "E0"), &successors).unwrap();
    }

    #[test]
    fn test_gap_rejected() {
        let successors = vec![desc("1", "00", "40"), desc("2", "50", "80")];
        let err = validate_successors(&range("00", "80"), &successors).unwrap_err();
        assert!(err.to_string().contains("gap"));
    }

    #[test]
    fn test_overlap_rejected() {
        let successors = vec![desc("1", "00", "50"), desc("2", "40", "80")];
        let err = validate_successors(&range("00", "80"), &successors).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_short_cover_rejected() {
        let successors = vec![desc("1", "00", "40"), desc("2", "40", "70")];
        assert!(validate_successors(&range("00", "80"), &successors).is_err());
        assert!(validate_successors(&range("00", "80"), &[]).is_err());
    }

    #[tokio::test]
    async fn test_split_and_merge_topology() {
        let topology = InMemoryTopology::with_partitions([desc("0", "", "FF")]).await;
        topology
            .split("0", vec![desc("1", "", "80"), desc("2", "80", "FF")])
            .await
            .unwrap();

        let found = topology.overlapping_partitions(&range("70", "90")).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].parents, vec!["0".to_string()]);

        let merged = topology.merge(&["2", "1"], "3").await.unwrap();
        assert_eq!(merged.range, EpkRange::full());
        assert!(topology.partition("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_split_keeps_parent() {
        let topology = InMemoryTopology::with_partitions([desc("0", "", "FF")]).await;
        let err = topology
            .split("0", vec![desc("1", "", "40"), desc("2", "80", "FF")])
            .await;
        assert!(err.is_err());
        assert!(topology.partition("0").await.unwrap().is_some());
    }
}
