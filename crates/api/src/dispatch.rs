//! Tanuki dispatch types.
//!
//! The dispatch module routes every inbound request message to exactly
//! one local command handler, or answers with the standard rejection,
//! and resolves late responses from slow peers against the
//! pending-response registry.

use crate::*;
use std::sync::Arc;
use std::time::Duration;

/// An open connection back to the peer a message arrived on.
///
/// Transport setup and teardown happen outside this core. The
/// dispatcher only needs enough of the connection to write a reply,
/// close it on protocol violations, and keep it alive for slow peers.
pub trait Connection: 'static + Send + Sync + std::fmt::Debug {
    /// True while the connection can still carry a reply.
    fn is_open(&self) -> bool;

    /// True if this connection is datagram-based (udp-like).
    /// Fire-and-forget is only legal on a datagram connection.
    fn is_datagram(&self) -> bool;

    /// Write a message onto this connection.
    fn send(&self, message: Message) -> BoxFut<'_, TnkResult<()>>;

    /// Close this connection.
    fn close(&self);

    /// Reset the idle timer on this connection, keeping it open.
    fn reset_idle_timeout(&self);
}

/// Trait-object [Connection].
pub type DynConnection = Arc<dyn Connection>;

/// What a command handler wants sent back to the requesting peer.
#[derive(Debug)]
pub enum HandlerResponse {
    /// Send this reply message back on the originating connection.
    Reply(Message),

    /// Send nothing back. Only legal on a datagram connection;
    /// requesting this over a connection-oriented transport is a
    /// protocol error surfaced by the dispatcher.
    FireAndForget,
}

/// A local handler for one or more command codes.
pub trait CommandHandler: 'static + Send + Sync + std::fmt::Debug {
    /// Handle one inbound request message. The payload is opaque to the
    /// dispatcher; parsing it is this handler's responsibility.
    fn handle(
        &self,
        message: Message,
    ) -> BoxFut<'_, TnkResult<HandlerResponse>>;
}

/// Trait-object [CommandHandler].
pub type DynCommandHandler = Arc<dyn CommandHandler>;

/// Why a peer was reported as failed to status listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerFailure {
    /// The peer spoke a protocol version other than ours.
    ProtocolMismatch,
}

/// Observer notified when the dispatcher learns a peer has failed.
pub trait PeerStatusListener: 'static + Send + Sync + std::fmt::Debug {
    /// The given peer failed for the given reason.
    fn peer_failed(&self, peer: PeerId, reason: PeerFailure);
}

/// Trait-object [PeerStatusListener].
pub type DynPeerStatusListener = Arc<dyn PeerStatusListener>;

/// Sink for unsolicited non-request messages the dispatcher cannot
/// route to a handler. These are forwarded further down the local
/// pipeline without producing a network reply.
pub trait UnsolicitedSink: 'static + Send + Sync + std::fmt::Debug {
    /// Accept an unsolicited message together with its connection.
    fn accept(&self, message: Message, connection: DynConnection);
}

/// Trait-object [UnsolicitedSink].
pub type DynUnsolicitedSink = Arc<dyn UnsolicitedSink>;

/// The channel end a pending slow response resolves into. Exactly one
/// of {late response delivered, timeout elapsed} resolves it.
pub type PendingResponder =
    futures::channel::oneshot::Sender<TnkResult<Message>>;

/// Trait for implementing a dispatch module, routing inbound request
/// messages to local handlers.
pub trait Dispatch: 'static + Send + Sync + std::fmt::Debug {
    /// Dispatch one inbound message.
    ///
    /// In order:
    /// - a protocol version mismatch closes the connection and notifies
    ///   peer-status listeners, no reply is sent.
    /// - a keep-alive from a slow peer resets the connection idle timer
    ///   and processing continues.
    /// - a message whose id has a pending-response entry resolves that
    ///   entry and is acknowledged, never forwarded to a handler.
    /// - a non-request message goes to the unsolicited sink, no reply.
    /// - otherwise a handler is resolved by (owner, on-behalf-of,
    ///   command) and its response written back, or the standard
    ///   "unknown handler" rejection is sent.
    fn handle_inbound(
        &self,
        message: Message,
        connection: DynConnection,
    ) -> BoxFut<'_, ()>;

    /// Register a handler for the given commands under
    /// (owner, on-behalf-of). Registering a command that is already
    /// present under the same key silently replaces the previous
    /// handler, last write wins.
    fn register(
        &self,
        owner: PeerId,
        on_behalf: PeerId,
        handler: DynCommandHandler,
        commands: &[Command],
    );

    /// Remove the one entry registered under exactly
    /// (owner, on-behalf-of).
    fn unregister(&self, owner: PeerId, on_behalf: PeerId);

    /// Remove every entry whose owner matches, regardless of the
    /// on-behalf-of component.
    fn unregister_all(&self, owner: PeerId);

    /// Register a responder for a reply that may arrive out of band
    /// from a capacity-limited slow peer. If no response arrives within
    /// the timeout (`None` means the module's configured default), the
    /// responder resolves with a timeout error. Whichever of
    /// {late response, timeout} happens first removes the entry and is
    /// the only one permitted to resolve the responder.
    fn register_pending(
        &self,
        msg_id: u64,
        responder: PendingResponder,
        timeout: Option<Duration>,
    );

    /// Set the sink receiving unsolicited non-request messages.
    fn set_unsolicited_sink(&self, sink: DynUnsolicitedSink);

    /// Add a listener notified of peer failures observed while
    /// dispatching.
    fn add_peer_status_listener(&self, listener: DynPeerStatusListener);

    /// Debug scan: every (owner, on-behalf-of) key with a handler
    /// registered for the given command.
    fn handlers_for(&self, command: Command) -> Vec<(PeerId, PeerId)>;
}

/// Trait-object [Dispatch].
pub type DynDispatch = Arc<dyn Dispatch>;

/// A factory for constructing Dispatch instances.
pub trait DispatchFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> TnkResult<()>;

    /// Construct a dispatch instance serving the given local peer
    /// identity.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
        local_peer: PeerId,
    ) -> BoxFut<'static, TnkResult<DynDispatch>>;
}

/// Trait-object [DispatchFactory].
pub type DynDispatchFactory = Arc<dyn DispatchFactory>;
