//! Message types at the dispatch boundary.
//!
//! Wire encoding and decoding happen outside this core. Messages cross
//! the boundary as plain structs carrying an opaque payload.

use crate::*;

/// The protocol version spoken by this node. Messages carrying any
/// other version are refused and their connection is closed.
pub const PROTOCOL_VERSION: u32 = 1;

/// The closed set of commands a message can belong to.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(u8)]
pub enum Command {
    /// Reachability probe.
    Ping = 0,
    /// Store a value under a key.
    Put = 1,
    /// Retrieve values for a key.
    Get = 2,
    /// Add a value to a multi-valued key.
    Add = 3,
    /// Remove values for a key.
    Remove = 4,
    /// Query routing neighbors close to a key.
    Neighbor = 5,
    /// Orderly shutdown notification.
    Quit = 6,
    /// Raw data sent directly to one peer.
    DirectData = 7,
    /// Request a digest of the keys a peer stores.
    Digest = 8,
}

impl Command {
    /// All commands, in code order.
    pub const ALL: [Command; 9] = [
        Command::Ping,
        Command::Put,
        Command::Get,
        Command::Add,
        Command::Remove,
        Command::Neighbor,
        Command::Quit,
        Command::DirectData,
        Command::Digest,
    ];
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        command as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = TnkError;

    fn try_from(code: u8) -> TnkResult<Self> {
        Command::ALL
            .into_iter()
            .find(|c| *c as u8 == code)
            .ok_or_else(|| {
                TnkError::other(format!("unknown command code {code}"))
            })
    }
}

/// Whether a message asks for work or carries the answer to earlier
/// work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// The sender expects a response.
    Request,
    /// An answer to an earlier request.
    Response,
    /// The standard refusal of a request, e.g. "unknown handler".
    Rejection,
    /// A bare acknowledgment without payload.
    Ack,
}

/// A message at the dispatch boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Protocol version of the sending node.
    pub protocol_version: u32,
    /// The command this message belongs to.
    pub command: Command,
    /// Request / response discriminator.
    pub kind: MessageKind,
    /// Identifier shared by a request/response pair.
    pub msg_id: u64,
    /// Address of the sending peer.
    pub sender: PeerAddress,
    /// Address of the peer this message is for.
    pub recipient: PeerAddress,
    /// The sender is a slow peer and may answer out of band.
    pub slow: bool,
    /// Keep-alive marker, resets connection idle timers.
    pub keep_alive: bool,
    /// Opaque payload. Parsing it is the handler's responsibility.
    pub payload: bytes::Bytes,
}

impl Message {
    /// Construct a request message from this node.
    pub fn request(
        command: Command,
        msg_id: u64,
        sender: PeerAddress,
        recipient: PeerAddress,
        payload: bytes::Bytes,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            command,
            kind: MessageKind::Request,
            msg_id,
            sender,
            recipient,
            slow: false,
            keep_alive: false,
            payload,
        }
    }

    /// True if this message expects a reply.
    pub fn is_request(&self) -> bool {
        matches!(self.kind, MessageKind::Request)
    }

    fn reply_kind(&self, kind: MessageKind, payload: bytes::Bytes) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            command: self.command,
            kind,
            msg_id: self.msg_id,
            sender: self.recipient.clone(),
            recipient: self.sender.clone(),
            slow: false,
            keep_alive: false,
            payload,
        }
    }

    /// Construct the response to this request, swapping sender and
    /// recipient and keeping the message id.
    pub fn respond_with(&self, payload: bytes::Bytes) -> Self {
        self.reply_kind(MessageKind::Response, payload)
    }

    /// Construct the standard rejection response for this request. The
    /// payload carries the reason as utf8 text.
    pub fn rejection(&self, reason: &str) -> Self {
        self.reply_kind(
            MessageKind::Rejection,
            bytes::Bytes::copy_from_slice(reason.as_bytes()),
        )
    }

    /// Construct the bare acknowledgment for this message.
    pub fn ack(&self) -> Self {
        self.reply_kind(MessageKind::Ack, bytes::Bytes::new())
    }
}
