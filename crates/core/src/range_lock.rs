//! In-process mutual exclusion over ranges of an ordered key space.
//!
//! Independent operations proceed concurrently on disjoint ranges,
//! operations whose ranges overlap are fully serialized, and there is
//! no single global lock. Multi-step operations (e.g. synchronizing a
//! stored sub-range) hold a range for their whole read/modify sequence
//! so concurrent access to the same data cannot race.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Opaque identity of the logical caller holding range locks.
///
/// Conflict detection excludes entries held by the same token, which is
/// what makes same-owner reentrancy safe. It also means two logically
/// distinct operations sharing a token will never block each other, so
/// callers must mint a distinct token per independent logical
/// operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OwnerToken(u64);

impl OwnerToken {
    /// Mint a token distinct from every other token minted in this
    /// process.
    pub fn mint() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

type EntryId = u64;
type Bounds<K> = BTreeMap<K, Vec<(EntryId, OwnerToken)>>;

/// A lock over ranges of an ordered key space.
///
/// Both boundary keys of every held range are stored as entries in one
/// ordered map, so conflict checks are sub-range scans rather than
/// walks of all held ranges.
#[derive(Debug, Default)]
pub struct RangeLock<K: Ord + Clone> {
    bounds: Mutex<Bounds<K>>,
    notify: tokio::sync::Notify,
    next_entry: AtomicU64,
}

impl<K: Ord + Clone> RangeLock<K> {
    /// Construct an empty range lock.
    pub fn new() -> Self {
        Self {
            bounds: Mutex::new(BTreeMap::new()),
            notify: tokio::sync::Notify::new(),
            next_entry: AtomicU64::new(0),
        }
    }

    /// Try to acquire `[from, to]` for the given owner without
    /// blocking. Returns `None` if any overlapping range is held by a
    /// different owner; this is an expected outcome, not an error.
    /// Overlap with ranges held by the same owner never conflicts.
    ///
    /// Panics if `from > to`.
    pub fn try_lock(
        &self,
        owner: OwnerToken,
        from: K,
        to: K,
    ) -> Option<RangeGuard<'_, K>> {
        let mut bounds = self.bounds.lock().unwrap();

        if conflicts(&bounds, owner, &from, &to) {
            return None;
        }

        let entry = self.next_entry.fetch_add(1, Ordering::Relaxed);
        bounds.entry(from.clone()).or_default().push((entry, owner));
        bounds.entry(to.clone()).or_default().push((entry, owner));

        Some(RangeGuard {
            lock: self,
            entry,
            from,
            to,
        })
    }

    /// Acquire `[from, to]` for the given owner, waiting for conflicting
    /// ranges to be released first. Holds no other locks while waiting,
    /// and re-tests the conflict predicate after every wakeup.
    ///
    /// Panics if `from > to`.
    pub async fn lock(
        &self,
        owner: OwnerToken,
        from: K,
        to: K,
    ) -> RangeGuard<'_, K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register for wakeups before testing, so an unlock between
            // the failed attempt and the await cannot be missed
            notified.as_mut().enable();

            match self.try_lock(owner, from.clone(), to.clone()) {
                Some(guard) => return guard,
                None => notified.await,
            }
        }
    }
}

/// Conflict iff another owner holds a boundary inside `[from, to]`, or
/// another owner's range fully straddles it from outside.
fn conflicts<K: Ord + Clone>(
    bounds: &Bounds<K>,
    owner: OwnerToken,
    from: &K,
    to: &K,
) -> bool {
    for (_, entries) in bounds.range(from..=to) {
        if entries.iter().any(|(_, o)| *o != owner) {
            return true;
        }
    }

    // a straddling range has one boundary strictly below `from` and its
    // partner strictly above `to`, so it appears as the same entry id
    // on both sides
    let below: HashSet<EntryId> = bounds
        .range(..from)
        .flat_map(|(_, entries)| {
            entries
                .iter()
                .filter(|(_, o)| *o != owner)
                .map(|(entry, _)| *entry)
        })
        .collect();
    if below.is_empty() {
        return false;
    }

    bounds
        .range((Bound::Excluded(to), Bound::Unbounded))
        .flat_map(|(_, entries)| entries.iter())
        .any(|(entry, o)| *o != owner && below.contains(entry))
}

fn remove_bound<K: Ord>(bounds: &mut Bounds<K>, key: &K, entry: EntryId) {
    if let Some(entries) = bounds.get_mut(key) {
        if let Some(pos) =
            entries.iter().position(|(candidate, _)| *candidate == entry)
        {
            entries.remove(pos);
        }
        if entries.is_empty() {
            bounds.remove(key);
        }
    }
}

/// A held range. Dropping the guard releases the range on every exit
/// path, so a lost handle cannot leak the range for the life of the
/// process.
#[must_use = "dropping the guard releases the range"]
#[derive(Debug)]
pub struct RangeGuard<'l, K: Ord + Clone> {
    lock: &'l RangeLock<K>,
    entry: EntryId,
    from: K,
    to: K,
}

impl<K: Ord + Clone> RangeGuard<'_, K> {
    /// Release the range eagerly. Equivalent to dropping the guard.
    pub fn unlock(self) {}
}

impl<K: Ord + Clone> Drop for RangeGuard<'_, K> {
    fn drop(&mut self) {
        {
            let mut bounds = self.lock.bounds.lock().unwrap();
            remove_bound(&mut bounds, &self.from, self.entry);
            remove_bound(&mut bounds, &self.to, self.entry);
        }
        self.lock.notify.notify_waiters();
    }
}
