//! Incremental ingestion of an externally owned tick sequence.
//!
//! The producer owns a growing (and occasionally replaced) `Vec<Tick>`. The
//! [`IngestionSynchronizer`] remembers how many of those ticks it has already
//! pushed into the [`TickStore`] and, on every [`sync`](IngestionSynchronizer::sync):
//!
//! 1. **Tree identity changed** (a different `Arc`, or appearing/disappearing):
//!    reset the store, re-index the new tree, re-ingest everything.
//! 2. **Sequence shorter than ingested**: the producer replaced or truncated
//!    its buffer. Without the dropped ticks there is no way to know which
//!    part of the stored history is still valid, so this is a full rebuild
//!    as well.
//! 3. **Sequence longer**: ingest only the new suffix, in order.
//! 4. **Same length**: nothing to do.
//!
//! Every reset and every appended tick bumps [`generation`](IngestionSynchronizer::generation),
//! the only signal downstream views use to know they must recompute.

use std::sync::Arc;

use canopy_trace::store::TickStore;
use canopy_trace::tick::Tick;
use canopy_trace::tree::BehaviorTree;
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// SyncOutcome
// ---------------------------------------------------------------------------

/// What a [`IngestionSynchronizer::sync`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Nothing changed since the previous call.
    Unchanged,
    /// New ticks were appended to the existing history.
    Appended,
    /// The store was reset and the whole sequence re-ingested.
    Rebuilt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub action: SyncAction,
    /// Ticks pushed into the store by this call.
    pub ticks_ingested: usize,
    /// Generation after the call.
    pub generation: u64,
    /// The rebuild was caused by a new tree identity. Views of the previous
    /// trace (paused position, highlights) no longer apply.
    pub tree_changed: bool,
}

// ---------------------------------------------------------------------------
// IngestionSynchronizer
// ---------------------------------------------------------------------------

/// Keeps a [`TickStore`] in lockstep with an external tick sequence.
///
/// One synchronizer belongs to one store; feeding the same store from two
/// synchronizers breaks the ingested-count bookkeeping.
#[derive(Debug, Default)]
pub struct IngestionSynchronizer {
    /// Tree the store is currently indexed with (pointer identity).
    tree: Option<Arc<BehaviorTree>>,
    /// Number of source ticks already ingested.
    ingested_count: usize,
    generation: u64,
}

impl IngestionSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ticks of the external sequence already ingested.
    pub fn ingested_count(&self) -> usize {
        self.ingested_count
    }

    /// Monotonic counter bumped by every reset and every appended tick.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bring `store` in line with `tree` and `ticks`.
    ///
    /// After the call, `ingested_count() == ticks.len()` and the store holds
    /// exactly the ticks of `ticks` (minus whatever its own retention policy
    /// evicted).
    pub fn sync<S: TickStore>(
        &mut self,
        store: &mut S,
        tree: Option<&Arc<BehaviorTree>>,
        ticks: &[Tick],
    ) -> SyncOutcome {
        let same_tree = match (&self.tree, tree) {
            (Some(current), Some(next)) => Arc::ptr_eq(current, next),
            (None, None) => true,
            _ => false,
        };

        if !same_tree {
            debug!(
                had_tree = self.tree.is_some(),
                has_tree = tree.is_some(),
                ticks = ticks.len(),
                "tree identity changed, rebuilding tick index"
            );
            self.tree = tree.cloned();
            return SyncOutcome {
                tree_changed: true,
                ..self.rebuild(store, ticks)
            };
        }

        if ticks.len() < self.ingested_count {
            debug!(
                previous = self.ingested_count,
                current = ticks.len(),
                "tick sequence shrank, rebuilding tick index"
            );
            return self.rebuild(store, ticks);
        }

        if ticks.len() == self.ingested_count {
            return SyncOutcome {
                action: SyncAction::Unchanged,
                ticks_ingested: 0,
                generation: self.generation,
                tree_changed: false,
            };
        }

        let appended = self.ingest_from(store, ticks, self.ingested_count);
        trace!(appended, generation = self.generation, "appended ticks");
        SyncOutcome {
            action: SyncAction::Appended,
            ticks_ingested: appended,
            generation: self.generation,
            tree_changed: false,
        }
    }

    /// Forget everything and re-ingest `ticks` against the current tree.
    ///
    /// Safe to call repeatedly: each call leaves the store in the same state.
    pub fn rebuild<S: TickStore>(&mut self, store: &mut S, ticks: &[Tick]) -> SyncOutcome {
        store.reset();
        if let Some(tree) = &self.tree {
            store.index_tree(tree);
        }
        self.ingested_count = 0;
        self.generation += 1;

        let ingested = self.ingest_from(store, ticks, 0);
        SyncOutcome {
            action: SyncAction::Rebuilt,
            ticks_ingested: ingested,
            generation: self.generation,
            tree_changed: false,
        }
    }

    fn ingest_from<S: TickStore>(&mut self, store: &mut S, ticks: &[Tick], start: usize) -> usize {
        let suffix = &ticks[start..];
        for tick in suffix {
            // Rejected or malformed ticks still count as consumed: the store
            // has already logged them and retrying would not help.
            store.ingest_tick(tick);
            self.ingested_count += 1;
            self.generation += 1;
        }
        suffix.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_trace::prelude::*;

    fn tree() -> Arc<BehaviorTree> {
        Arc::new(
            TreeBuilder::new()
                .node(1, "Root", NodeFlags::COMPOSITE | NodeFlags::SEQUENCE, None)
                .node(2, "Act", NodeFlags::LEAF | NodeFlags::ACTION, Some(1))
                .build()
                .unwrap(),
        )
    }

    fn tick(id: TickId) -> Tick {
        Tick::new(id, Some(id as f64)).with_event(NodeEvent::new(2, NodeResult::Success))
    }

    #[test]
    fn first_sync_rebuilds_and_ingests() {
        let tree = tree();
        let mut store = MemoryTickStore::default();
        let mut sync = IngestionSynchronizer::new();

        let outcome = sync.sync(&mut store, Some(&tree), &[tick(1), tick(2)]);
        assert_eq!(outcome.action, SyncAction::Rebuilt);
        assert_eq!(outcome.ticks_ingested, 2);
        // One reset + two ticks.
        assert_eq!(outcome.generation, 3);
        assert_eq!(store.stored_tick_ids(), vec![1, 2]);
        assert!(store.tree().is_some());
    }

    #[test]
    fn same_length_is_unchanged() {
        let tree = tree();
        let ticks = vec![tick(1)];
        let mut store = MemoryTickStore::default();
        let mut sync = IngestionSynchronizer::new();
        sync.sync(&mut store, Some(&tree), &ticks);
        let generation = sync.generation();

        let outcome = sync.sync(&mut store, Some(&tree), &ticks);
        assert_eq!(outcome.action, SyncAction::Unchanged);
        assert_eq!(outcome.generation, generation);
    }

    #[test]
    fn equal_content_new_arc_is_a_new_tree() {
        let first = tree();
        let second = tree();
        let mut store = MemoryTickStore::default();
        let mut sync = IngestionSynchronizer::new();
        sync.sync(&mut store, Some(&first), &[tick(1)]);

        let outcome = sync.sync(&mut store, Some(&second), &[tick(1)]);
        assert_eq!(outcome.action, SyncAction::Rebuilt);
        assert!(outcome.tree_changed);
        assert_eq!(store.stored_tick_ids(), vec![1]);
    }

    #[test]
    fn dropping_the_tree_unindexes_the_store() {
        let tree = tree();
        let mut store = MemoryTickStore::default();
        let mut sync = IngestionSynchronizer::new();
        sync.sync(&mut store, Some(&tree), &[tick(1)]);

        let outcome = sync.sync(&mut store, None, &[tick(1)]);
        assert_eq!(outcome.action, SyncAction::Rebuilt);
        assert!(store.tree().is_none());
        assert_eq!(store.stored_tick_ids(), vec![1]);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let tree = tree();
        let ticks = vec![tick(1), tick(2)];
        let mut store = MemoryTickStore::default();
        let mut sync = IngestionSynchronizer::new();
        sync.sync(&mut store, Some(&tree), &ticks);

        sync.rebuild(&mut store, &ticks);
        let once = (store.stored_tick_ids(), store.stats());
        sync.rebuild(&mut store, &ticks);
        let twice = (store.stored_tick_ids(), store.stats());
        assert_eq!(once, twice);
        assert_eq!(sync.ingested_count(), 2);
    }
}
