//! A scriptable rpc factory for quorum tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tanuki_api::*;

/// How a scripted peer behaves when contacted.
#[derive(Clone, Copy, Debug)]
pub enum Script {
    /// Answer with an ok report.
    Ok,

    /// Answer with an ok report after the given delay.
    OkAfter(std::time::Duration),

    /// Answer with a rejection report.
    Reject,

    /// Fail with a transport error.
    Unreachable,

    /// Never answer. The slot only resolves through the rpc deadline
    /// or cancellation.
    Hang,
}

/// An [RpcFactory] answering from a per-peer script, recording every
/// contact. Peers without a script answer ok.
#[derive(Debug, Default)]
pub struct ScriptedRpc {
    scripts: Mutex<HashMap<PeerId, Script>>,
    contacts: Mutex<Vec<PeerId>>,
}

impl ScriptedRpc {
    /// Construct a scripted rpc factory with every peer answering ok.
    pub fn create() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the behavior of one peer.
    pub fn script(&self, peer: PeerId, script: Script) {
        self.scripts.lock().unwrap().insert(peer, script);
    }

    /// Every contacted peer, in contact order, with repeats.
    pub fn contacts(&self) -> Vec<PeerId> {
        self.contacts.lock().unwrap().clone()
    }
}

impl RpcFactory for ScriptedRpc {
    fn create(
        &self,
        candidate: &PeerAddress,
        _spec: &QuorumSpec,
    ) -> BoxFut<'static, TnkResult<PeerReport>> {
        let peer = candidate.peer_id.clone();
        self.contacts.lock().unwrap().push(peer.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&peer)
            .copied()
            .unwrap_or(Script::Ok);

        Box::pin(async move {
            match script {
                Script::Ok => Ok(PeerReport::ok(peer)),
                Script::OkAfter(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(PeerReport::ok(peer))
                }
                Script::Reject => Ok(PeerReport::failed(
                    peer.clone(),
                    PeerStatus::Rejected,
                    TnkError::other(format!("rejected by {peer}")),
                )),
                Script::Unreachable => Err(TnkError::other(format!(
                    "no route to {peer}"
                ))),
                Script::Hang => futures::future::pending().await,
            }
        })
    }
}

/// A candidate address for the given peer on a throwaway socket
/// address.
pub fn candidate(peer: PeerId) -> PeerAddress {
    PeerAddress::direct(
        peer,
        std::net::SocketAddr::from(([127, 0, 0, 1], 10_000)),
    )
}
