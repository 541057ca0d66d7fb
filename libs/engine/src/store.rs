//! Per-namespace allocation state.
//!
//! Each namespace owns a versioned [`Allocation`] behind an `ArcSwap`, so
//! readers always get a consistent committed snapshot without blocking.
//! Writers to the same namespace are serialized by a per-namespace lock and
//! replace the whole record in a single pointer swap; different namespaces
//! never contend.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::types::{ActiveStream, Namespace};

/// Committed allocation state of one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    /// Incremented on every commit that changes the record.
    pub version: u64,

    /// Next admission sequence number to hand out.
    pub next_seq: u64,

    /// Admitted streams keyed by id.
    pub streams: BTreeMap<String, ActiveStream>,
}

impl Allocation {
    pub fn get(&self, stream_id: &str) -> Option<&ActiveStream> {
        self.streams.get(stream_id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Sum of all committed weights.
    pub fn total_weight(&self) -> u64 {
        self.streams.values().map(|s| s.current_weight).sum()
    }
}

/// A new stream set waiting to replace the committed one.
#[derive(Debug, Clone, Default)]
pub struct StagedAllocation {
    pub streams: BTreeMap<String, ActiveStream>,
    pub next_seq: u64,
}

struct NamespaceSlot {
    write_lock: Mutex<()>,
    committed: ArcSwap<Allocation>,
}

impl NamespaceSlot {
    fn new() -> Self {
        Self {
            write_lock: Mutex::new(()),
            committed: ArcSwap::from_pointee(Allocation::default()),
        }
    }
}

/// Store of committed allocations for every namespace.
#[derive(Default)]
pub struct AllocationStore {
    namespaces: DashMap<Namespace, Arc<NamespaceSlot>>,
}

impl AllocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, namespace: &Namespace) -> Arc<NamespaceSlot> {
        if let Some(slot) = self.namespaces.get(namespace) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.namespaces
                .entry(namespace.clone())
                .or_insert_with(|| Arc::new(NamespaceSlot::new()))
                .value(),
        )
    }

    /// Returns the last committed allocation of a namespace.
    ///
    /// Unknown namespaces read as empty.
    pub fn snapshot(&self, namespace: &Namespace) -> Arc<Allocation> {
        match self.namespaces.get(namespace) {
            Some(slot) => slot.committed.load_full(),
            None => Arc::new(Allocation::default()),
        }
    }

    /// Namespaces that have been written at least once.
    pub fn namespaces(&self) -> Vec<Namespace> {
        let mut namespaces: Vec<_> = self.namespaces.iter().map(|e| e.key().clone()).collect();
        namespaces.sort();
        namespaces
    }

    /// Replaces a namespace's allocation if it is still at `expected_version`.
    pub fn commit(
        &self,
        namespace: &Namespace,
        expected_version: u64,
        staged: StagedAllocation,
    ) -> EngineResult<Arc<Allocation>> {
        let slot = self.slot(namespace);
        let _guard = slot.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        Self::commit_locked(namespace, &slot, expected_version, staged)
    }

    /// Runs `f` against the committed allocation with the namespace's write
    /// lock held and commits what it stages.
    ///
    /// If `f` fails, nothing is committed.
    pub fn transact<R, F>(&self, namespace: &Namespace, f: F) -> EngineResult<(Arc<Allocation>, R)>
    where
        F: FnOnce(&Allocation) -> EngineResult<(StagedAllocation, R)>,
    {
        let slot = self.slot(namespace);
        let _guard = slot.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = slot.committed.load_full();
        let (staged, output) = f(&current)?;
        let committed = Self::commit_locked(namespace, &slot, current.version, staged)?;
        Ok((committed, output))
    }

    fn commit_locked(
        namespace: &Namespace,
        slot: &NamespaceSlot,
        expected_version: u64,
        staged: StagedAllocation,
    ) -> EngineResult<Arc<Allocation>> {
        let current = slot.committed.load_full();
        if current.version != expected_version {
            return Err(EngineError::Conflict {
                expected: expected_version,
                actual: current.version,
            });
        }

        if current.streams == staged.streams && current.next_seq == staged.next_seq {
            debug!(namespace = %namespace, version = current.version, "Allocation unchanged");
            return Ok(current);
        }

        let next = Arc::new(Allocation {
            version: current.version + 1,
            next_seq: staged.next_seq,
            streams: staged.streams,
        });
        slot.committed.store(Arc::clone(&next));
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: &str, weight: u64) -> ActiveStream {
        ActiveStream {
            stream_id: id.to_string(),
            current_weight: weight,
            min_weight: 1,
            max_weight: 20,
            priority: 0,
            tags: Vec::new(),
            admitted_seq: 0,
        }
    }

    fn staged(streams: &[ActiveStream]) -> StagedAllocation {
        StagedAllocation {
            streams: streams
                .iter()
                .map(|s| (s.stream_id.clone(), s.clone()))
                .collect(),
            next_seq: streams.len() as u64,
        }
    }

    #[test]
    fn test_unknown_namespace_reads_empty() {
        let store = AllocationStore::new();
        let snap = store.snapshot(&Namespace::new("g", "e"));

        assert_eq!(snap.version, 0);
        assert!(snap.is_empty());
        assert!(store.namespaces().is_empty());
    }

    #[test]
    fn test_commit_bumps_version() {
        let store = AllocationStore::new();
        let ns = Namespace::new("g", "e");

        let committed = store
            .commit(&ns, 0, staged(&[stream("s1", 15)]))
            .expect("commit");

        assert_eq!(committed.version, 1);
        assert_eq!(store.snapshot(&ns).total_weight(), 15);
        assert_eq!(store.namespaces(), vec![ns]);
    }

    #[test]
    fn test_stale_commit_is_a_conflict() {
        let store = AllocationStore::new();
        let ns = Namespace::new("g", "e");
        store.commit(&ns, 0, staged(&[stream("s1", 15)])).expect("commit");

        let err = store
            .commit(&ns, 0, staged(&[stream("s2", 5)]))
            .unwrap_err();

        assert_eq!(err, EngineError::Conflict { expected: 0, actual: 1 });
        assert!(store.snapshot(&ns).get("s1").is_some());
    }

    #[test]
    fn test_unchanged_commit_keeps_version() {
        let store = AllocationStore::new();
        let ns = Namespace::new("g", "e");
        let streams = [stream("s1", 15)];
        store.commit(&ns, 0, staged(&streams)).expect("commit");

        let again = store.commit(&ns, 1, staged(&streams)).expect("commit");
        assert_eq!(again.version, 1);
    }

    #[test]
    fn test_failed_transaction_commits_nothing() {
        let store = AllocationStore::new();
        let ns = Namespace::new("g", "e");
        store.commit(&ns, 0, staged(&[stream("s1", 15)])).expect("commit");

        let result: EngineResult<(Arc<Allocation>, ())> = store.transact(&ns, |_| {
            Err(EngineError::Internal("boom".to_string()))
        });

        assert!(result.is_err());
        let snap = store.snapshot(&ns);
        assert_eq!(snap.version, 1);
        assert_eq!(snap.total_weight(), 15);
    }

    #[test]
    fn test_namespaces_are_independent() {
        let store = AllocationStore::new();
        let a = Namespace::new("g", "a");
        let b = Namespace::new("g", "b");

        store.commit(&a, 0, staged(&[stream("s1", 10)])).expect("commit");

        assert_eq!(store.snapshot(&a).len(), 1);
        assert!(store.snapshot(&b).is_empty());
    }
}
