//! The core dispatch implementation provided by Tanuki.
//!
//! Routes every inbound request message to exactly one local handler
//! resolved by (owner, on-behalf-of, command), or answers with the
//! standard rejection, and guarantees a reply is sent on every
//! delivered request unless the handler explicitly opts out. Late
//! responses from capacity-limited slow peers resolve through the
//! pending-response registry instead of a handler.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tanuki_api::*;

/// CoreDispatch configuration types.
pub mod config {
    /// Configuration parameters for
    /// [CoreDispatchFactory](super::CoreDispatchFactory).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CoreDispatchConfig {
        /// How long to wait for a slow peer's out-of-band response
        /// before failing the pending entry. Default: 30 s.
        pub pending_response_timeout_s: u32,
    }

    impl Default for CoreDispatchConfig {
        fn default() -> Self {
            Self {
                pending_response_timeout_s: 30,
            }
        }
    }

    impl CoreDispatchConfig {
        /// Get the pending response timeout as a duration.
        pub fn pending_response_timeout(&self) -> std::time::Duration {
            std::time::Duration::from_secs(
                self.pending_response_timeout_s as u64,
            )
        }
    }

    /// Module-level configuration for CoreDispatch.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CoreDispatchModConfig {
        /// CoreDispatch configuration.
        pub core_dispatch: CoreDispatchConfig,
    }
}

use config::*;

/// The core dispatch implementation provided by Tanuki.
#[derive(Debug)]
pub struct CoreDispatchFactory {}

impl CoreDispatchFactory {
    /// Construct a new CoreDispatchFactory.
    pub fn create() -> DynDispatchFactory {
        let out: DynDispatchFactory = Arc::new(CoreDispatchFactory {});
        out
    }
}

impl DispatchFactory for CoreDispatchFactory {
    fn default_config(&self, config: &mut Config) -> TnkResult<()> {
        config.set_module_config(&CoreDispatchModConfig::default())
    }

    fn create(
        &self,
        builder: Arc<Builder>,
        local_peer: PeerId,
    ) -> BoxFut<'static, TnkResult<DynDispatch>> {
        Box::pin(async move {
            let config: CoreDispatchModConfig =
                builder.config.get_module_config()?;
            let out: DynDispatch = Arc::new(CoreDispatch::new(
                config.core_dispatch,
                local_peer,
            ));
            Ok(out)
        })
    }
}

type HandlerKey = (PeerId, PeerId);
type HandlerMap = BTreeMap<HandlerKey, HashMap<Command, DynCommandHandler>>;

#[derive(Debug)]
struct PendingEntry {
    responder: PendingResponder,
    expire: tokio::task::JoinHandle<()>,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingEntry>>>;

#[derive(Debug)]
struct CoreDispatch {
    local_peer: PeerId,
    default_pending_timeout: Duration,
    handlers: RwLock<HandlerMap>,
    pending: PendingMap,
    listeners: Mutex<Vec<DynPeerStatusListener>>,
    sink: Mutex<Option<DynUnsolicitedSink>>,
}

impl Drop for CoreDispatch {
    fn drop(&mut self) {
        for (_, entry) in self.pending.lock().unwrap().drain() {
            entry.expire.abort();
        }
    }
}

impl CoreDispatch {
    fn new(config: CoreDispatchConfig, local_peer: PeerId) -> Self {
        Self {
            local_peer,
            default_pending_timeout: config.pending_response_timeout(),
            handlers: RwLock::new(BTreeMap::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            listeners: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
        }
    }

    /// Resolve the handler for a request. The (own, own) entry is
    /// preferred, falling back to (own, recipient) for requests served
    /// on behalf of another peer. A ping addressed to the zero id
    /// resolves against our own identity on both components.
    fn resolve_handler(&self, message: &Message) -> Option<DynCommandHandler> {
        let own = self.local_peer.clone();
        let on_behalf = if message.recipient.peer_id.is_zero()
            && message.command == Command::Ping
        {
            own.clone()
        } else {
            message.recipient.peer_id.clone()
        };

        let handlers = self.handlers.read().unwrap();
        if let Some(handler) = handlers
            .get(&(own.clone(), own.clone()))
            .and_then(|commands| commands.get(&message.command))
        {
            return Some(handler.clone());
        }
        handlers
            .get(&(own, on_behalf))
            .and_then(|commands| commands.get(&message.command))
            .cloned()
    }

    /// Every command at least one handler is registered for.
    fn known_commands(&self) -> Vec<Command> {
        let handlers = self.handlers.read().unwrap();
        let mut out = BTreeSet::new();
        for commands in handlers.values() {
            out.extend(commands.keys().copied());
        }
        out.into_iter().collect()
    }

    /// Atomically take the pending entry for a message id, if any.
    fn take_pending(&self, msg_id: u64) -> Option<PendingEntry> {
        self.pending.lock().unwrap().remove(&msg_id)
    }

    async fn send_reply(&self, reply: Message, connection: &DynConnection) {
        if !connection.is_open() {
            tracing::warn!(
                msg_id = reply.msg_id,
                command = ?reply.command,
                "connection closed before the reply could be sent"
            );
            return;
        }
        if let Err(err) = connection.send(reply).await {
            tracing::warn!(?err, "could not send reply");
        }
    }
}

impl Dispatch for CoreDispatch {
    fn handle_inbound(
        &self,
        message: Message,
        connection: DynConnection,
    ) -> BoxFut<'_, ()> {
        Box::pin(async move {
            if message.protocol_version != PROTOCOL_VERSION {
                tracing::warn!(
                    peer = %message.sender.peer_id,
                    version = message.protocol_version,
                    "protocol version mismatch, closing connection"
                );
                connection.close();
                let listeners = self.listeners.lock().unwrap().clone();
                for listener in listeners {
                    listener.peer_failed(
                        message.sender.peer_id.clone(),
                        PeerFailure::ProtocolMismatch,
                    );
                }
                return;
            }

            if message.slow && message.keep_alive {
                connection.reset_idle_timeout();
            }

            if let Some(entry) = self.take_pending(message.msg_id) {
                entry.expire.abort();
                tracing::debug!(
                    msg_id = message.msg_id,
                    peer = %message.sender.peer_id,
                    "resolving late response from slow peer"
                );
                let ack = message.ack();
                let _ = entry.responder.send(Ok(message));
                self.send_reply(ack, &connection).await;
                return;
            }

            if !message.is_request() {
                let sink = self.sink.lock().unwrap().clone();
                match sink {
                    Some(sink) => sink.accept(message, connection),
                    None => tracing::debug!(
                        msg_id = message.msg_id,
                        "dropping unsolicited message, no sink set"
                    ),
                }
                return;
            }

            let Some(handler) = self.resolve_handler(&message) else {
                tracing::warn!(
                    command = ?message.command,
                    recipient = %message.recipient.peer_id,
                    known = ?self.known_commands(),
                    "no handler for inbound request"
                );
                let rejection = message.rejection("unknown handler");
                self.send_reply(rejection, &connection).await;
                return;
            };

            tracing::debug!(
                command = ?message.command,
                msg_id = message.msg_id,
                "dispatching inbound request"
            );

            match handler.handle(message.clone()).await {
                Ok(HandlerResponse::Reply(reply)) => {
                    self.send_reply(reply, &connection).await;
                }
                Ok(HandlerResponse::FireAndForget) => {
                    if !connection.is_datagram() {
                        tracing::warn!(
                            command = ?message.command,
                            "handler requested fire-and-forget over a \
                             connection-oriented transport"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        ?err,
                        command = ?message.command,
                        "handler failed"
                    );
                    let rejection =
                        message.rejection(&format!("handler failed: {err}"));
                    self.send_reply(rejection, &connection).await;
                }
            }
        })
    }

    fn register(
        &self,
        owner: PeerId,
        on_behalf: PeerId,
        handler: DynCommandHandler,
        commands: &[Command],
    ) {
        let mut handlers = self.handlers.write().unwrap();
        let entry = handlers.entry((owner, on_behalf)).or_default();
        for command in commands {
            entry.insert(*command, handler.clone());
        }
    }

    fn unregister(&self, owner: PeerId, on_behalf: PeerId) {
        self.handlers.write().unwrap().remove(&(owner, on_behalf));
    }

    fn unregister_all(&self, owner: PeerId) {
        self.handlers
            .write()
            .unwrap()
            .retain(|(registered, _), _| *registered != owner);
    }

    fn register_pending(
        &self,
        msg_id: u64,
        responder: PendingResponder,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(self.default_pending_timeout);

        let pending = self.pending.clone();
        let expire = tokio::task::spawn(async move {
            tokio::time::sleep(timeout).await;
            let entry = pending.lock().unwrap().remove(&msg_id);
            if let Some(entry) = entry {
                let _ = entry.responder.send(Err(TnkError::timeout(format!(
                    "slow peer did not answer within {} s",
                    timeout.as_secs()
                ))));
            }
        });

        let prev = self
            .pending
            .lock()
            .unwrap()
            .insert(msg_id, PendingEntry { responder, expire });
        if let Some(prev) = prev {
            prev.expire.abort();
            tracing::warn!(
                msg_id,
                "replacing pending response entry with duplicate id"
            );
            let _ = prev
                .responder
                .send(Err(TnkError::other("pending response entry replaced")));
        }
    }

    fn set_unsolicited_sink(&self, sink: DynUnsolicitedSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn add_peer_status_listener(&self, listener: DynPeerStatusListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn handlers_for(&self, command: Command) -> Vec<(PeerId, PeerId)> {
        self.handlers
            .read()
            .unwrap()
            .iter()
            .filter(|(_, commands)| commands.contains_key(&command))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[cfg(test)]
mod test;
