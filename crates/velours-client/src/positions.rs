//! Incremental, range-aware cache of a conversation's read-position history.
//!
//! The cache tracks which contiguous span of history it has already loaded
//! (`first`/`last` watermarks) so repeated range requests only fetch the
//! uncovered prefix or suffix.  The planning step is pure; the owning
//! conversation executes the plan against storage and applies the results,
//! so no lock is ever held across the fetch.

use std::collections::BTreeMap;

use velours_shared::{DeviceId, ReadPosition, ServerTimestamp};
use velours_store::PositionRange;

/// Storage fetches required to satisfy one `load_range` request.
#[derive(Debug, Clone, PartialEq)]
pub struct RangePlan {
    /// Uncovered segments to fetch, in ascending order.  Empty when the
    /// request lies fully inside the cached span.
    pub segments: Vec<PositionRange>,
    /// Whether the plan reaches the request's upper end, and therefore may
    /// need the single supplemental fetch past it.
    pub covers_upper_end: bool,
}

impl RangePlan {
    pub fn is_noop(&self) -> bool {
        self.segments.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ReadPositionCache {
    positions: BTreeMap<(ServerTimestamp, DeviceId), ReadPosition>,
    /// Lower bound of the contiguously loaded span.
    first: Option<ServerTimestamp>,
    /// Upper bound of the contiguously loaded span.
    last: Option<ServerTimestamp>,
}

impl ReadPositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn loaded_span(&self) -> Option<(ServerTimestamp, ServerTimestamp)> {
        self.first.zip(self.last)
    }

    /// Plan the storage fetches for a requested `[start, end]` range.
    ///
    /// Four cases: fully covered (no-op), extension below, extension above
    /// (possibly both), and no-span-yet / disjoint (full fetch).
    pub fn plan_range(&self, start: ServerTimestamp, end: ServerTimestamp) -> RangePlan {
        let full = RangePlan {
            segments: vec![PositionRange {
                begin: Some(start),
                end: Some(end),
                include_begin: true,
                include_end: true,
                limit: None,
            }],
            covers_upper_end: true,
        };

        match (self.first, self.last) {
            (Some(first), Some(last)) => {
                if start >= first && end <= last {
                    return RangePlan { segments: Vec::new(), covers_upper_end: false };
                }
                if end < first || start > last {
                    // Disjoint from the cached span.
                    return full;
                }

                let mut segments = Vec::new();
                if start < first {
                    segments.push(PositionRange {
                        begin: Some(start),
                        end: Some(first),
                        include_begin: true,
                        include_end: false,
                        limit: None,
                    });
                }
                let covers_upper_end = end > last;
                if covers_upper_end {
                    segments.push(PositionRange {
                        begin: Some(last),
                        end: Some(end),
                        include_begin: false,
                        include_end: true,
                        limit: None,
                    });
                }
                RangePlan { segments, covers_upper_end }
            }
            _ => full,
        }
    }

    /// True when the fetched upper segment did not land exactly on the
    /// requested end, so the single next position past `end` must be
    /// fetched to represent the boundary.
    pub fn needs_boundary_supplement(
        plan: &RangePlan,
        fetched: &[ReadPosition],
        end: ServerTimestamp,
    ) -> bool {
        plan.covers_upper_end
            && fetched
                .last()
                .map_or(true, |p| p.max_server_timestamp != end)
    }

    /// The supplemental query: the single next position strictly past `end`.
    pub fn boundary_supplement_range(end: ServerTimestamp) -> PositionRange {
        PositionRange {
            begin: Some(end),
            end: None,
            include_begin: false,
            include_end: false,
            limit: Some(1),
        }
    }

    /// Apply a successfully fetched plan: insert everything and extend the
    /// loaded span to the union of the old span and the requested range.
    ///
    /// Must not be called when any fetch failed: leaving the span untouched
    /// is what makes the next request retry.
    pub fn apply_range(
        &mut self,
        start: ServerTimestamp,
        end: ServerTimestamp,
        fetched: Vec<ReadPosition>,
    ) -> Vec<ReadPosition> {
        let added = self.add_positions(fetched);
        self.first = Some(self.first.map_or(start, |f| f.min(start)));
        self.last = Some(self.last.map_or(end, |l| l.max(end)));
        added
    }

    /// Insert positions, deduplicating on the identity key.  Returns the
    /// ones actually added, for batched "added" notifications.
    pub fn add_positions(&mut self, batch: Vec<ReadPosition>) -> Vec<ReadPosition> {
        let mut added = Vec::new();
        for position in batch {
            let key = (position.max_server_timestamp, position.source_device);
            if !self.positions.contains_key(&key) {
                self.positions.insert(key, position.clone());
                added.push(position);
            }
        }
        added
    }

    /// All cached positions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &ReadPosition> {
        self.positions.values()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.first = None;
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use velours_shared::{ConversationId, MessageKind};

    fn position(ts: ServerTimestamp) -> ReadPosition {
        ReadPosition {
            source_device: DeviceId(1),
            conversation_id: ConversationId::new(),
            sender: None,
            sent_at: ts,
            read_at: Utc::now(),
            max_server_timestamp: ts,
            message_kind: MessageKind::Incoming,
            max_notify_sequence_id: None,
        }
    }

    #[test]
    fn first_request_fetches_the_full_range() {
        let cache = ReadPositionCache::new();
        let plan = cache.plan_range(10, 50);
        assert_eq!(plan.segments.len(), 1);
        assert!(plan.covers_upper_end);
        let seg = plan.segments[0];
        assert_eq!((seg.begin, seg.end), (Some(10), Some(50)));
        assert!(seg.include_begin && seg.include_end);
    }

    #[test]
    fn covered_request_is_a_noop() {
        let mut cache = ReadPositionCache::new();
        cache.apply_range(10, 50, vec![position(20)]);

        let plan = cache.plan_range(15, 40);
        assert!(plan.is_noop());
    }

    #[test]
    fn extension_below_fetches_only_the_prefix() {
        let mut cache = ReadPositionCache::new();
        cache.apply_range(30, 50, vec![position(40)]);

        let plan = cache.plan_range(10, 45);
        assert_eq!(plan.segments.len(), 1);
        assert!(!plan.covers_upper_end);
        let seg = plan.segments[0];
        assert_eq!((seg.begin, seg.end), (Some(10), Some(30)));
        assert!(seg.include_begin && !seg.include_end);
    }

    #[test]
    fn extension_above_fetches_only_the_suffix() {
        let mut cache = ReadPositionCache::new();
        cache.apply_range(10, 30, vec![position(20)]);

        let plan = cache.plan_range(15, 60);
        assert_eq!(plan.segments.len(), 1);
        assert!(plan.covers_upper_end);
        let seg = plan.segments[0];
        assert_eq!((seg.begin, seg.end), (Some(30), Some(60)));
        assert!(!seg.include_begin && seg.include_end);
    }

    #[test]
    fn superset_request_fetches_both_sides() {
        let mut cache = ReadPositionCache::new();
        cache.apply_range(20, 40, vec![]);

        let plan = cache.plan_range(10, 60);
        assert_eq!(plan.segments.len(), 2);
        assert_eq!(plan.segments[0].begin, Some(10));
        assert_eq!(plan.segments[0].end, Some(20));
        assert_eq!(plan.segments[1].begin, Some(40));
        assert_eq!(plan.segments[1].end, Some(60));
    }

    #[test]
    fn span_grows_to_the_union() {
        let mut cache = ReadPositionCache::new();
        cache.apply_range(20, 40, vec![]);
        cache.apply_range(10, 30, vec![]);
        assert_eq!(cache.loaded_span(), Some((10, 40)));
    }

    #[test]
    fn boundary_supplement_only_when_end_is_unrepresented() {
        let cache = ReadPositionCache::new();
        let plan = cache.plan_range(10, 50);

        assert!(ReadPositionCache::needs_boundary_supplement(&plan, &[position(40)], 50));
        assert!(ReadPositionCache::needs_boundary_supplement(&plan, &[], 50));
        assert!(!ReadPositionCache::needs_boundary_supplement(&plan, &[position(50)], 50));

        let covered = RangePlan { segments: Vec::new(), covers_upper_end: false };
        assert!(!ReadPositionCache::needs_boundary_supplement(&covered, &[], 50));
    }

    #[test]
    fn duplicate_positions_are_dropped_on_add() {
        let mut cache = ReadPositionCache::new();
        let added = cache.add_positions(vec![position(10), position(10), position(20)]);
        assert_eq!(added.len(), 2);
        assert_eq!(cache.len(), 2);

        let added = cache.add_positions(vec![position(20)]);
        assert!(added.is_empty());
    }
}
