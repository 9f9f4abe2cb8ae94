//! A reusable fork-join combinator over parallel asynchronous
//! operations.
//!
//! Given an array of up to P independent operations, the combinator
//! completes successfully as soon as a caller-specified number of them
//! succeed, or fails once all P have concluded with fewer successes
//! than that. It is the per-round completion primitive of the quorum
//! request loop, but has no dht-specific knowledge of its own.

use futures::stream::{FuturesUnordered, StreamExt};
use tanuki_api::*;

/// How a fork-join concluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The success threshold was reached.
    Succeeded,

    /// Every slot settled with fewer successes than the threshold.
    Failed,
}

/// The terminal outcome of a fork-join.
///
/// Completion is terminal and produced exactly once. Operations still
/// in flight when the verdict was reached keep running on whatever
/// spawned them; their later completions are advisory only and can be
/// observed through the slots' shared futures.
#[derive(Debug)]
pub struct ForkJoinOutcome<T, E> {
    /// How the fork-join concluded.
    pub verdict: Verdict,

    /// Results observed before conclusion, in arrival order (not slot
    /// order), each tagged with its slot index.
    pub completed: Vec<(usize, Result<T, E>)>,

    /// How many observed operations succeeded.
    pub successes: usize,

    /// How many slots failed, counting unfilled slots.
    pub failures: usize,
}

/// Observes an array of independent asynchronous operations and
/// completes once enough of them succeed, or once too many have
/// failed.
///
/// Slots are shared futures so a caller can keep observing an
/// operation that was still in flight when the fork-join concluded.
/// An unfilled (`None`) slot counts as an immediate failure for
/// threshold purposes. The threshold may exceed the number of filled
/// slots, in which case the fork-join can only fail.
pub struct ForkJoin<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    slots: Vec<Option<ShareFut<Result<T, E>>>>,
    success_threshold: usize,
}

impl<T, E> ForkJoin<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Construct a fork-join over the given slot array.
    ///
    /// Zero slots is a misuse and fails immediately, it would otherwise
    /// produce a combinator that can neither succeed nor fail.
    pub fn new(
        slots: Vec<Option<ShareFut<Result<T, E>>>>,
        success_threshold: usize,
    ) -> TnkResult<Self> {
        if slots.is_empty() {
            return Err(TnkError::other(
                "cannot fork-join over zero slots",
            ));
        }
        Ok(Self {
            slots,
            success_threshold,
        })
    }

    /// A notification future that resolves once every filled slot has
    /// settled, regardless of the fork-join verdict.
    ///
    /// Callers gate shared resource release (e.g. connection
    /// reservations) on this, not on [ForkJoin::join], so operations
    /// cancelled after the verdict do not leak reservations.
    pub fn all_settled(&self) -> impl std::future::Future<Output = ()> {
        let futs: Vec<_> = self.slots.iter().flatten().cloned().collect();
        async move {
            for fut in futs {
                let _ = fut.await;
            }
        }
    }

    /// Drive every slot concurrently until the threshold-th success
    /// lands, or until all slots have settled short of the threshold.
    pub async fn join(self) -> ForkJoinOutcome<T, E> {
        let Self {
            slots,
            success_threshold,
        } = self;

        let slot_count = slots.len();
        let mut successes = 0;
        let mut failures = 0;
        let mut completed = Vec::new();

        let mut pending = FuturesUnordered::new();
        for (slot, fut) in slots.into_iter().enumerate() {
            match fut {
                Some(fut) => pending.push(async move { (slot, fut.await) }),
                // an unfilled slot can never succeed, count it against
                // the threshold right away
                None => failures += 1,
            }
        }

        while successes < success_threshold
            && successes + failures < slot_count
        {
            let Some((slot, result)) = pending.next().await else {
                break;
            };
            match &result {
                Ok(_) => successes += 1,
                Err(_) => failures += 1,
            }
            completed.push((slot, result));
        }

        let verdict = if successes >= success_threshold {
            Verdict::Succeeded
        } else {
            Verdict::Failed
        };

        ForkJoinOutcome {
            verdict,
            completed,
            successes,
            failures,
        }
    }
}
