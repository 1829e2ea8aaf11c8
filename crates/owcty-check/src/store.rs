//! Partitioned state store
//!
//! The state space is split between workers by hash: state `s` belongs to
//! worker `hash(s) mod peers` for the whole run. Each worker keeps its
//! partition in a [`Table`], an insertion-ordered hash set whose insertion
//! index doubles as an arena slot. A [`StateRef`] (worker, slot) names a
//! stored state anywhere in the system, so parent pointers and cycle
//! witnesses can cross partitions as plain copies.
//!
//! States are never removed during a run.

use crate::error::CheckError;
use crate::extension::Extension;
use indexmap::map::Entry;
use indexmap::IndexMap;
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::{BuildHasherDefault, Hash};

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Worker owning a state with the given hash.
#[inline]
pub fn owner(hash: u64, peers: usize) -> usize {
    (hash % peers as u64) as usize
}

/// Handle of a stored state: owning worker and arena slot
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateRef {
    worker: u32,
    slot: u32,
}

impl StateRef {
    #[inline]
    pub const fn new(worker: u32, slot: u32) -> Self {
        Self { worker, slot }
    }

    /// Worker whose table holds the state.
    #[inline]
    pub fn worker(self) -> usize {
        self.worker as usize
    }

    /// Arena slot within that table.
    #[inline]
    pub fn slot(self) -> usize {
        self.slot as usize
    }
}

impl fmt::Debug for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}:{}", self.worker, self.slot)
    }
}

/// One worker's partition of the state space
pub struct Table<N> {
    worker: usize,
    peers: usize,
    slots: IndexMap<N, Extension, FxBuildHasher>,
}

impl<N: Eq + Hash> Table<N> {
    pub fn new(worker: usize, peers: usize) -> Self {
        debug_assert!(worker < peers);
        Self {
            worker,
            peers,
            slots: IndexMap::with_hasher(FxBuildHasher::default()),
        }
    }

    /// Worker id of this partition.
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Number of partitions in the run.
    pub fn peers(&self) -> usize {
        self.peers
    }

    /// Whether this partition owns a state with hash `hash`.
    #[inline]
    pub fn owns(&self, hash: u64) -> bool {
        owner(hash, self.peers) == self.worker
    }

    fn check_owner(&self, hash: u64) -> Result<(), CheckError> {
        let owner = owner(hash, self.peers);
        if owner != self.worker {
            return Err(CheckError::NotOwner {
                worker: self.worker,
                owner,
            });
        }
        Ok(())
    }

    fn handle(&self, slot: usize) -> StateRef {
        StateRef::new(self.worker as u32, slot as u32)
    }

    /// Insert `node` with a zeroed extension, or find its existing slot.
    ///
    /// Returns the handle and whether the state is new.
    pub fn store(&mut self, node: N, hash: u64) -> Result<(StateRef, bool), CheckError> {
        self.check_owner(hash)?;
        let (slot, fresh) = match self.slots.entry(node) {
            Entry::Occupied(entry) => (entry.index(), false),
            Entry::Vacant(entry) => {
                let slot = entry.index();
                entry.insert(Extension::default());
                (slot, true)
            }
        };
        Ok((self.handle(slot), fresh))
    }

    /// Look up a stored state without inserting it.
    pub fn fetch(&self, node: &N, hash: u64) -> Result<Option<StateRef>, CheckError> {
        self.check_owner(hash)?;
        Ok(self.slots.get_index_of(node).map(|slot| self.handle(slot)))
    }

    /// The state behind a handle of this partition.
    #[inline]
    pub fn state(&self, r: StateRef) -> &N {
        debug_assert_eq!(r.worker(), self.worker);
        match self.slots.get_index(r.slot()) {
            Some((node, _)) => node,
            None => panic!("dangling state handle {}", r),
        }
    }

    #[inline]
    pub fn extension(&self, r: StateRef) -> &Extension {
        debug_assert_eq!(r.worker(), self.worker);
        &self.slots[r.slot()]
    }

    #[inline]
    pub fn extension_mut(&mut self, r: StateRef) -> &mut Extension {
        debug_assert_eq!(r.worker(), self.worker);
        &mut self.slots[r.slot()]
    }

    /// Handles of all stored states, in insertion order.
    pub fn refs(&self) -> impl Iterator<Item = StateRef> + '_ {
        (0..self.slots.len()).map(move |slot| self.handle(slot))
    }

    /// Stored states with their extensions, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (StateRef, &N, &Extension)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(move |(slot, (node, ext))| (self.handle(slot), node, ext))
    }

    /// Mutable extensions of all stored states, in insertion order.
    pub fn extensions_mut(&mut self) -> impl Iterator<Item = (StateRef, &mut Extension)> + '_ {
        let worker = self.worker as u32;
        self.slots
            .values_mut()
            .enumerate()
            .map(move |(slot, ext)| (StateRef::new(worker, slot as u32), ext))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<N> fmt::Debug for Table<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("worker", &self.worker)
            .field("peers", &self.peers)
            .field("states", &self.slots.len())
            .finish()
    }
}
