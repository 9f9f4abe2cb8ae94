//! Tanuki quorum types.
//!
//! A quorum module fans a single logical dht operation out to multiple
//! remote peers in parallel with bounded concurrency, and decides when
//! enough peers have responded (or failed) to complete the operation.

use crate::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Configuration of one quorum operation.
///
/// The slot-array width of the request loop is
/// `minimum_results + parallel_diff`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuorumSpec {
    /// How many distinct peer responses are required to consider the
    /// operation successful.
    pub minimum_results: u32,

    /// How many per-peer failures are tolerated before the operation
    /// aborts.
    pub max_failures: u32,

    /// Extra simultaneous requests beyond the quorum size.
    pub parallel_diff: u32,

    /// Prefer the datagram transport for every rpc of this operation.
    pub force_udp: bool,

    /// Prefer the connection-oriented transport for every rpc of this
    /// operation.
    pub force_tcp: bool,
}

impl QuorumSpec {
    /// Construct a spec with no transport preference.
    pub fn new(
        minimum_results: u32,
        max_failures: u32,
        parallel_diff: u32,
    ) -> Self {
        Self {
            minimum_results,
            max_failures,
            parallel_diff,
            force_udp: false,
            force_tcp: false,
        }
    }

    /// The slot-array width this spec asks for.
    pub fn parallel(&self) -> u32 {
        self.minimum_results + self.parallel_diff
    }
}

/// Terminal status of one contacted peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerStatus {
    /// The peer answered and processed the request. Only this status
    /// counts toward the quorum.
    Ok,

    /// The peer answered with a refusal.
    Rejected,

    /// The peer could not be reached.
    Unreachable,

    /// The peer did not answer before the rpc deadline.
    Timeout,
}

/// Per-key detail inside one peer's response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyStatus {
    /// The peer stored or confirmed holding the key.
    Stored,

    /// The peer does not hold the key.
    NotFound,

    /// The peer failed to process the key.
    Failed,

    /// The peer refused to process the key.
    Rejected,
}

/// One peer's contribution to a quorum operation.
///
/// Reports are recorded for unsuccessful peers too, so the final
/// aggregate can compute per-key success counts. This type is `Clone`
/// because slot results travel through shared futures.
#[derive(Clone, Debug)]
pub struct PeerReport {
    /// The responding (or failing) peer.
    pub peer: PeerId,

    /// Terminal status of this peer.
    pub status: PeerStatus,

    /// Per-key statuses reported by this peer.
    pub keys: BTreeMap<RecordKey, KeyStatus>,

    /// Data returned by this peer, for read operations.
    pub data: BTreeMap<RecordKey, bytes::Bytes>,

    /// The failure reason, if this peer did not answer ok.
    pub error: Option<TnkError>,
}

impl PeerReport {
    /// An ok report with no key detail yet.
    pub fn ok(peer: PeerId) -> Self {
        Self {
            peer,
            status: PeerStatus::Ok,
            keys: BTreeMap::new(),
            data: BTreeMap::new(),
            error: None,
        }
    }

    /// A failure report carrying the reason.
    pub fn failed(peer: PeerId, status: PeerStatus, error: TnkError) -> Self {
        Self {
            peer,
            status,
            keys: BTreeMap::new(),
            data: BTreeMap::new(),
            error: Some(error),
        }
    }

    /// Add a per-key status to this report.
    pub fn with_key(mut self, key: RecordKey, status: KeyStatus) -> Self {
        self.keys.insert(key, status);
        self
    }

    /// Add returned data for a key to this report.
    pub fn with_data(mut self, key: RecordKey, data: bytes::Bytes) -> Self {
        self.data.insert(key, data);
        self
    }
}

/// How a quorum operation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuorumVerdict {
    /// The effective minimum number of peers answered ok.
    Reached,

    /// Candidates ran out or too many peers failed before the
    /// effective minimum was met.
    Exhausted {
        /// How many per-peer failures were recorded.
        failures: u32,
    },
}

/// Final aggregate of one quorum operation.
pub struct QuorumResult {
    /// How the operation ended.
    pub verdict: QuorumVerdict,

    /// Every completed peer report, in arrival order.
    pub reports: Vec<PeerReport>,

    /// How many peers answered ok.
    pub successes: u32,

    /// How many peers failed.
    pub failures: u32,

    /// The quorum size actually applied. Lowered from the requested
    /// `minimum_results` when fewer candidates existed, never raised.
    pub effective_minimum: u32,

    /// True if `effective_minimum` is lower than the requested
    /// `minimum_results`. Lets callers distinguish "quorum met" from
    /// "quorum auto-lowered because too few peers existed".
    pub auto_lowered: bool,

    /// The most recent individual failure reasons, oldest first.
    pub last_errors: Vec<TnkError>,

    /// Resolves once every rpc issued by the operation has settled,
    /// including stragglers still in flight when the verdict was
    /// reached. Gate resource release (e.g. connection reservations) on
    /// this, not on the verdict.
    pub settled: ShareFut<()>,
}

impl std::fmt::Debug for QuorumResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuorumResult")
            .field("verdict", &self.verdict)
            .field("reports", &self.reports)
            .field("successes", &self.successes)
            .field("failures", &self.failures)
            .field("effective_minimum", &self.effective_minimum)
            .field("auto_lowered", &self.auto_lowered)
            .field("last_errors", &self.last_errors)
            .finish()
    }
}

impl QuorumResult {
    /// A finished result recording no peer contact at all.
    pub fn empty(verdict: QuorumVerdict) -> Self {
        let settled: BoxFut<'static, ()> =
            Box::pin(std::future::ready(()));
        Self {
            verdict,
            reports: Vec::new(),
            successes: 0,
            failures: 0,
            effective_minimum: 0,
            auto_lowered: false,
            last_errors: Vec::new(),
            settled: futures::FutureExt::shared(settled),
        }
    }

    /// True if the operation reached its effective quorum.
    pub fn is_reached(&self) -> bool {
        matches!(self.verdict, QuorumVerdict::Reached)
    }

    /// Per-key count of peers that reported the key stored.
    pub fn success_count_per_key(&self) -> BTreeMap<RecordKey, u32> {
        let mut out = BTreeMap::new();
        for report in self.reports.iter() {
            for (key, status) in report.keys.iter() {
                if matches!(status, KeyStatus::Stored) {
                    *out.entry(key.clone()).or_default() += 1;
                }
            }
        }
        out
    }
}

/// Produces the individual per-peer rpc of a specific dht operation
/// (put/get/remove/add/digest/send).
///
/// An `Ok` report describes whatever the peer answered, including
/// refusals. An `Err` from the returned future is a communication
/// failure; the request loop folds it into a synthesized failure
/// report rather than propagating it.
pub trait RpcFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Create the rpc for one candidate peer. The spec carries the
    /// operation's transport preference flags.
    fn create(
        &self,
        candidate: &PeerAddress,
        spec: &QuorumSpec,
    ) -> BoxFut<'static, TnkResult<PeerReport>>;
}

/// Trait-object [RpcFactory].
pub type DynRpcFactory = Arc<dyn RpcFactory>;

/// Trait for implementing a quorum module, turning a spec plus two
/// ordered candidate queues into a finished operation aggregate.
pub trait Quorum: 'static + Send + Sync + std::fmt::Debug {
    /// The configured fallback spec for callers that do not supply
    /// their own.
    fn default_spec(&self) -> QuorumSpec;

    /// Run one quorum operation.
    ///
    /// `direct_hits` are peers already confirmed to hold the requested
    /// data, `potential_hits` are peers merely believed to be close;
    /// both arrive pre-sorted by proximity and are consumed in order,
    /// direct hits first. A peer present in both queues is contacted
    /// as a direct hit only. With `cancel_on_finish`, rpcs still in
    /// flight when the verdict is reached are cancelled; write
    /// operations should leave it unset so in-flight work can land.
    fn execute(
        &self,
        spec: QuorumSpec,
        direct_hits: Vec<PeerAddress>,
        potential_hits: Vec<PeerAddress>,
        rpc: DynRpcFactory,
        cancel_on_finish: bool,
    ) -> BoxFut<'static, TnkResult<QuorumResult>>;
}

/// Trait-object [Quorum].
pub type DynQuorum = Arc<dyn Quorum>;

/// A factory for constructing Quorum instances.
pub trait QuorumFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> TnkResult<()>;

    /// Construct a quorum instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, TnkResult<DynQuorum>>;
}

/// Trait-object [QuorumFactory].
pub type DynQuorumFactory = Arc<dyn QuorumFactory>;

#[cfg(test)]
mod test {
    use super::*;

    fn id(fill: u8) -> Id {
        Id::from([fill; ID_BYTES])
    }

    fn key(fill: u8) -> RecordKey {
        RecordKey::at_location(id(fill))
    }

    #[test]
    fn parallel_width() {
        assert_eq!(5, QuorumSpec::new(3, 0, 2).parallel());
        assert_eq!(0, QuorumSpec::default().parallel());
    }

    #[test]
    fn per_key_success_counts() {
        let p1 = PeerId::from([1; ID_BYTES]);
        let p2 = PeerId::from([2; ID_BYTES]);
        let p3 = PeerId::from([3; ID_BYTES]);

        let mut result = QuorumResult::empty(QuorumVerdict::Reached);
        result.reports = vec![
            PeerReport::ok(p1)
                .with_key(key(1), KeyStatus::Stored)
                .with_key(key(2), KeyStatus::Stored),
            PeerReport::ok(p2).with_key(key(1), KeyStatus::Stored),
            // key statuses of unsuccessful peers never count as stored
            PeerReport::failed(
                p3,
                PeerStatus::Rejected,
                TnkError::other("rejected"),
            )
            .with_key(key(1), KeyStatus::Rejected),
        ];

        let counts = result.success_count_per_key();
        assert_eq!(Some(&2), counts.get(&key(1)));
        assert_eq!(Some(&1), counts.get(&key(2)));
    }

    #[test]
    fn empty_result_is_settled() {
        let result = QuorumResult::empty(QuorumVerdict::Reached);
        assert!(result.is_reached());
        futures::executor::block_on(result.settled.clone());
    }
}
