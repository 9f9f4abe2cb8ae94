//! The core quorum implementation provided by Tanuki.
//!
//! Turns a quorum spec plus two ordered candidate queues into a
//! finished dht-operation aggregate, retrying with fresh candidates
//! until quorum, exhaustion, or too many failures. Candidates are
//! consumed direct-hit-queue-first in their pre-sorted proximity
//! order, each at most once, with at most
//! `minimum_results + parallel_diff` rpcs in flight at a time.

use crate::fork_join::{ForkJoin, Verdict};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tanuki_api::*;

/// CoreQuorum configuration types.
pub mod config {
    use tanuki_api::QuorumSpec;

    /// Configuration parameters for
    /// [CoreQuorumFactory](super::CoreQuorumFactory).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CoreQuorumConfig {
        /// Fallback quorum size for callers without their own spec.
        /// Default: 3.
        pub default_minimum_results: u32,

        /// Fallback failure tolerance. Default: 3.
        pub default_max_failures: u32,

        /// Fallback extra parallelism beyond the quorum size.
        /// Default: 0.
        pub default_parallel_diff: u32,

        /// Deadline for each individual per-peer rpc. Default: 10 s.
        pub rpc_timeout_s: u32,
    }

    impl Default for CoreQuorumConfig {
        fn default() -> Self {
            Self {
                default_minimum_results: 3,
                default_max_failures: 3,
                default_parallel_diff: 0,
                rpc_timeout_s: 10,
            }
        }
    }

    impl CoreQuorumConfig {
        /// Get the per-rpc deadline as a duration.
        pub fn rpc_timeout(&self) -> std::time::Duration {
            std::time::Duration::from_secs(self.rpc_timeout_s as u64)
        }

        /// The fallback spec described by this config.
        pub fn default_spec(&self) -> QuorumSpec {
            QuorumSpec::new(
                self.default_minimum_results,
                self.default_max_failures,
                self.default_parallel_diff,
            )
        }
    }

    /// Module-level configuration for CoreQuorum.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CoreQuorumModConfig {
        /// CoreQuorum configuration.
        pub core_quorum: CoreQuorumConfig,
    }
}

use config::*;

/// The core quorum implementation provided by Tanuki.
#[derive(Debug)]
pub struct CoreQuorumFactory {}

impl CoreQuorumFactory {
    /// Construct a new CoreQuorumFactory.
    pub fn create() -> DynQuorumFactory {
        let out: DynQuorumFactory = Arc::new(CoreQuorumFactory {});
        out
    }
}

impl QuorumFactory for CoreQuorumFactory {
    fn default_config(&self, config: &mut Config) -> TnkResult<()> {
        config.set_module_config(&CoreQuorumModConfig::default())
    }

    fn create(
        &self,
        builder: Arc<Builder>,
    ) -> BoxFut<'static, TnkResult<DynQuorum>> {
        Box::pin(async move {
            let config: CoreQuorumModConfig =
                builder.config.get_module_config()?;
            let out: DynQuorum =
                Arc::new(CoreQuorum::new(config.core_quorum));
            Ok(out)
        })
    }
}

/// A slot result carries the peer report on both sides: `Ok` for
/// responses counting toward the quorum, `Err` for everything else.
type SlotResult = Result<PeerReport, PeerReport>;

#[derive(Debug)]
struct SlotHandle {
    fut: ShareFut<SlotResult>,
    abort: tokio::task::AbortHandle,
}

/// Spawn the rpc for one candidate, normalizing deadline misses and
/// transport errors into failure reports so per-peer failures never
/// cross the async boundary as errors.
fn launch(
    rpc: &DynRpcFactory,
    spec: &QuorumSpec,
    candidate: PeerAddress,
    rpc_timeout: Duration,
) -> SlotHandle {
    let peer = candidate.peer_id.clone();
    let rpc_fut = rpc.create(&candidate, spec);

    let task_peer = peer.clone();
    let task = tokio::task::spawn(async move {
        match tokio::time::timeout(rpc_timeout, rpc_fut).await {
            Ok(Ok(report)) => match report.status {
                PeerStatus::Ok => Ok(report),
                _ => Err(report),
            },
            Ok(Err(err)) => Err(PeerReport::failed(
                task_peer,
                PeerStatus::Unreachable,
                err,
            )),
            Err(_) => Err(PeerReport::failed(
                task_peer.clone(),
                PeerStatus::Timeout,
                TnkError::timeout(format!(
                    "no answer from {task_peer} within {} s",
                    rpc_timeout.as_secs()
                )),
            )),
        }
    });

    let abort = task.abort_handle();
    let fut: BoxFut<'static, SlotResult> = Box::pin(async move {
        match task.await {
            Ok(result) => result,
            // the rpc task was cancelled before settling
            Err(err) => Err(PeerReport::failed(
                peer,
                PeerStatus::Unreachable,
                TnkError::other_src("rpc cancelled", err),
            )),
        }
    });

    SlotHandle {
        fut: futures::FutureExt::shared(fut),
        abort,
    }
}

#[derive(Debug)]
struct CoreQuorum {
    config: CoreQuorumConfig,
}

impl CoreQuorum {
    fn new(config: CoreQuorumConfig) -> Self {
        Self { config }
    }
}

impl Quorum for CoreQuorum {
    fn default_spec(&self) -> QuorumSpec {
        self.config.default_spec()
    }

    fn execute(
        &self,
        spec: QuorumSpec,
        direct_hits: Vec<PeerAddress>,
        potential_hits: Vec<PeerAddress>,
        rpc: DynRpcFactory,
        cancel_on_finish: bool,
    ) -> BoxFut<'static, TnkResult<QuorumResult>> {
        let rpc_timeout = self.config.rpc_timeout();
        Box::pin(async move {
            if spec.force_udp && spec.force_tcp {
                return Err(TnkError::other(
                    "quorum spec cannot force both udp and tcp",
                ));
            }

            // a peer present in both queues is a direct hit only, so no
            // peer is contacted twice for the same logical operation
            let direct_ids: HashSet<PeerId> = direct_hits
                .iter()
                .map(|candidate| candidate.peer_id.clone())
                .collect();
            let mut direct: VecDeque<PeerAddress> = direct_hits.into();
            let mut potential: VecDeque<PeerAddress> = potential_hits
                .into_iter()
                .filter(|candidate| !direct_ids.contains(&candidate.peer_id))
                .collect();

            // fire-into-the-void fast path, no rpcs are issued
            if spec.minimum_results == 0 {
                return Ok(QuorumResult::empty(QuorumVerdict::Reached));
            }

            // a caller cannot demand more confirmations than there are
            // reachable peers; lower the effective minimum, never raise
            let available = (direct.len() + potential.len()) as u32;
            let effective_minimum = spec.minimum_results.min(available);
            let auto_lowered = effective_minimum < spec.minimum_results;

            let parallel = (effective_minimum + spec.parallel_diff) as usize;
            let mut slots: Vec<Option<SlotHandle>> =
                std::iter::repeat_with(|| None).take(parallel).collect();
            let mut launched: Vec<ShareFut<SlotResult>> = Vec::new();

            let mut reports: Vec<PeerReport> = Vec::new();
            let mut successes: u32 = 0;
            let mut failures: u32 = 0;
            let mut last_errors: Vec<TnkError> = Vec::new();
            let mut remaining = effective_minimum;

            let verdict = loop {
                for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
                    match direct
                        .pop_front()
                        .or_else(|| potential.pop_front())
                    {
                        Some(candidate) => {
                            let handle = launch(
                                &rpc,
                                &spec,
                                candidate,
                                rpc_timeout,
                            );
                            launched.push(handle.fut.clone());
                            *slot = Some(handle);
                        }
                        None => break,
                    }
                }

                let active: Vec<usize> = slots
                    .iter()
                    .enumerate()
                    .filter_map(|(index, slot)| {
                        slot.as_ref().map(|_| index)
                    })
                    .collect();

                // queues exhausted and nothing in flight: a normal
                // terminal state when fewer peers existed than asked
                if active.is_empty() {
                    break if successes >= effective_minimum {
                        QuorumVerdict::Reached
                    } else {
                        QuorumVerdict::Exhausted { failures }
                    };
                }

                let threshold = (remaining as usize).min(active.len());
                let join_slots = active
                    .iter()
                    .map(|index| {
                        slots[*index]
                            .as_ref()
                            .map(|handle| handle.fut.clone())
                    })
                    .collect();
                let outcome =
                    ForkJoin::new(join_slots, threshold)?.join().await;

                let round_successes = outcome.successes as u32;
                for (join_index, result) in outcome.completed {
                    // free the slot for the next candidate
                    slots[active[join_index]] = None;
                    let report = match result {
                        Ok(report) => report,
                        Err(report) => report,
                    };
                    tracing::trace!(
                        peer = %report.peer,
                        status = ?report.status,
                        "rpc slot completed"
                    );
                    match report.status {
                        PeerStatus::Ok => successes += 1,
                        _ => {
                            failures += 1;
                            if let Some(err) = &report.error {
                                last_errors.push(err.clone());
                            }
                        }
                    }
                    reports.push(report);
                }

                tracing::debug!(
                    round_verdict = ?outcome.verdict,
                    successes,
                    failures,
                    "quorum round finished"
                );

                if matches!(outcome.verdict, Verdict::Succeeded) {
                    break if successes >= effective_minimum {
                        QuorumVerdict::Reached
                    } else {
                        QuorumVerdict::Exhausted { failures }
                    };
                }
                if failures > spec.max_failures {
                    break QuorumVerdict::Exhausted { failures };
                }

                remaining = remaining.saturating_sub(round_successes);
            };

            // read-style operations cancel stragglers; writes leave
            // them so in-flight work can still land on the remote side
            if cancel_on_finish {
                for slot in slots.iter_mut() {
                    if let Some(handle) = slot.take() {
                        handle.abort.abort();
                    }
                }
            }

            let settled: BoxFut<'static, ()> = Box::pin(async move {
                for fut in launched {
                    let _ = fut.await;
                }
            });

            Ok(QuorumResult {
                verdict,
                reports,
                successes,
                failures,
                effective_minimum,
                auto_lowered,
                last_errors,
                settled: futures::FutureExt::shared(settled),
            })
        })
    }
}
