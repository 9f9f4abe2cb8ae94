use super::*;
use tanuki_test_utils::connection::StubConnection;
use tanuki_test_utils::enable_tracing;
use tanuki_test_utils::id::random_peer_id;

async fn make_dispatch(local_peer: PeerId) -> DynDispatch {
    let mut builder = crate::default_builder();
    builder.set_default_config().unwrap();
    let builder = builder.build();
    builder
        .dispatch
        .create(builder.clone(), local_peer)
        .await
        .unwrap()
}

fn addr(peer: PeerId) -> PeerAddress {
    PeerAddress::direct(
        peer,
        std::net::SocketAddr::from(([127, 0, 0, 1], 20_000)),
    )
}

fn request(command: Command, msg_id: u64, recipient: PeerId) -> Message {
    Message::request(
        command,
        msg_id,
        addr(random_peer_id()),
        addr(recipient),
        bytes::Bytes::new(),
    )
}

/// A handler answering every request with its programmed response.
#[derive(Debug)]
struct EchoHandler {
    invoked: Mutex<Vec<Message>>,
    fire_and_forget: bool,
    fail: bool,
}

impl EchoHandler {
    fn create() -> Arc<Self> {
        Arc::new(Self {
            invoked: Mutex::new(Vec::new()),
            fire_and_forget: false,
            fail: false,
        })
    }

    fn create_fire_and_forget() -> Arc<Self> {
        Arc::new(Self {
            invoked: Mutex::new(Vec::new()),
            fire_and_forget: true,
            fail: false,
        })
    }

    fn create_failing() -> Arc<Self> {
        Arc::new(Self {
            invoked: Mutex::new(Vec::new()),
            fire_and_forget: false,
            fail: true,
        })
    }

    fn invoked_count(&self) -> usize {
        self.invoked.lock().unwrap().len()
    }
}

impl CommandHandler for EchoHandler {
    fn handle(
        &self,
        message: Message,
    ) -> BoxFut<'_, TnkResult<HandlerResponse>> {
        Box::pin(async move {
            let response =
                message.respond_with(bytes::Bytes::from_static(b"echo"));
            self.invoked.lock().unwrap().push(message);
            if self.fail {
                return Err(TnkError::other("handler exploded"));
            }
            if self.fire_and_forget {
                return Ok(HandlerResponse::FireAndForget);
            }
            Ok(HandlerResponse::Reply(response))
        })
    }
}

#[derive(Debug, Default)]
struct RecordingListener {
    failed: Mutex<Vec<(PeerId, PeerFailure)>>,
}

impl PeerStatusListener for RecordingListener {
    fn peer_failed(&self, peer: PeerId, reason: PeerFailure) {
        self.failed.lock().unwrap().push((peer, reason));
    }
}

#[derive(Debug, Default)]
struct RecordingSink {
    accepted: Mutex<Vec<Message>>,
}

impl UnsolicitedSink for RecordingSink {
    fn accept(&self, message: Message, _connection: DynConnection) {
        self.accepted.lock().unwrap().push(message);
    }
}

#[tokio::test]
async fn version_mismatch_closes_and_notifies_without_reply() {
    enable_tracing();
    let local = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let listener = Arc::new(RecordingListener::default());
    dispatch.add_peer_status_listener(listener.clone());

    let connection = StubConnection::create();
    let mut message = request(Command::Ping, 1, local);
    message.protocol_version = PROTOCOL_VERSION + 1;
    let sender = message.sender.peer_id.clone();

    dispatch.handle_inbound(message, connection.clone()).await;

    assert!(connection.was_closed());
    assert!(connection.sent().is_empty());
    assert_eq!(
        vec![(sender, PeerFailure::ProtocolMismatch)],
        listener.failed.lock().unwrap().clone(),
    );
}

#[tokio::test]
async fn slow_keep_alive_resets_idle_timer_and_continues() {
    enable_tracing();
    let local = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let handler = EchoHandler::create();
    dispatch.register(
        local.clone(),
        local.clone(),
        handler.clone(),
        &[Command::Ping],
    );

    let connection = StubConnection::create();
    let mut message = request(Command::Ping, 2, local);
    message.slow = true;
    message.keep_alive = true;

    dispatch.handle_inbound(message, connection.clone()).await;

    // the idle reset is a side effect only, the request still reaches
    // its handler
    assert_eq!(1, connection.idle_reset_count());
    assert_eq!(1, handler.invoked_count());
    assert_eq!(1, connection.sent().len());
}

#[tokio::test]
async fn handler_reply_is_written_back() {
    enable_tracing();
    let local = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let handler = EchoHandler::create();
    dispatch.register(
        local.clone(),
        local.clone(),
        handler.clone(),
        &[Command::Get, Command::Put],
    );

    let connection = StubConnection::create();
    dispatch
        .handle_inbound(request(Command::Get, 3, local), connection.clone())
        .await;

    let sent = connection.sent();
    assert_eq!(1, sent.len());
    assert_eq!(MessageKind::Response, sent[0].kind);
    assert_eq!(3, sent[0].msg_id);
    assert_eq!(b"echo", &sent[0].payload[..]);
}

#[tokio::test]
async fn unknown_command_gets_the_standard_rejection() {
    enable_tracing();
    let local = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let handler = EchoHandler::create();
    dispatch.register(
        local.clone(),
        local.clone(),
        handler.clone(),
        &[Command::Put],
    );

    let connection = StubConnection::create();
    dispatch
        .handle_inbound(request(Command::Get, 4, local), connection.clone())
        .await;

    let sent = connection.sent();
    assert_eq!(1, sent.len());
    assert_eq!(MessageKind::Rejection, sent[0].kind);
    assert_eq!(b"unknown handler", &sent[0].payload[..]);
    assert_eq!(0, handler.invoked_count());
}

#[tokio::test]
async fn zero_id_ping_resolves_against_own_identity() {
    enable_tracing();
    let local = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let handler = EchoHandler::create();
    dispatch.register(
        local.clone(),
        local.clone(),
        handler.clone(),
        &[Command::Ping],
    );

    let connection = StubConnection::create();
    dispatch
        .handle_inbound(
            request(Command::Ping, 5, PeerId::zero()),
            connection.clone(),
        )
        .await;

    assert_eq!(1, handler.invoked_count());
    assert_eq!(MessageKind::Response, connection.sent()[0].kind);

    // the shortcut is ping-only, a zero-id get is still unroutable
    dispatch
        .handle_inbound(
            request(Command::Get, 6, PeerId::zero()),
            connection.clone(),
        )
        .await;
    assert_eq!(MessageKind::Rejection, connection.sent()[1].kind);
}

#[tokio::test]
async fn requests_on_behalf_of_another_peer_fall_back() {
    enable_tracing();
    let local = random_peer_id();
    let other = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let handler = EchoHandler::create();
    dispatch.register(
        local.clone(),
        other.clone(),
        handler.clone(),
        &[Command::Get],
    );

    let connection = StubConnection::create();
    dispatch
        .handle_inbound(request(Command::Get, 7, other), connection.clone())
        .await;

    assert_eq!(1, handler.invoked_count());
}

#[tokio::test]
async fn unregister_all_removes_every_on_behalf_entry() {
    enable_tracing();
    let local = random_peer_id();
    let other = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let handler = EchoHandler::create();
    dispatch.register(
        local.clone(),
        local.clone(),
        handler.clone(),
        &[Command::Get],
    );
    dispatch.register(
        local.clone(),
        other.clone(),
        handler.clone(),
        &[Command::Get],
    );
    assert_eq!(2, dispatch.handlers_for(Command::Get).len());

    dispatch.unregister_all(local.clone());
    assert!(dispatch.handlers_for(Command::Get).is_empty());

    let connection = StubConnection::create();
    dispatch
        .handle_inbound(request(Command::Get, 8, local), connection.clone())
        .await;
    assert_eq!(MessageKind::Rejection, connection.sent()[0].kind);
    assert_eq!(0, handler.invoked_count());
}

#[tokio::test]
async fn unregister_removes_only_the_exact_pair() {
    enable_tracing();
    let local = random_peer_id();
    let other = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let handler = EchoHandler::create();
    dispatch.register(
        local.clone(),
        local.clone(),
        handler.clone(),
        &[Command::Get],
    );
    dispatch.register(
        local.clone(),
        other.clone(),
        handler.clone(),
        &[Command::Get],
    );

    dispatch.unregister(local.clone(), local.clone());

    // the on-behalf-of entry survives
    assert_eq!(
        vec![(local.clone(), other.clone())],
        dispatch.handlers_for(Command::Get),
    );
}

#[tokio::test]
async fn registration_is_last_write_wins() {
    enable_tracing();
    let local = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let first = EchoHandler::create();
    let second = EchoHandler::create();
    dispatch.register(
        local.clone(),
        local.clone(),
        first.clone(),
        &[Command::Get],
    );
    dispatch.register(
        local.clone(),
        local.clone(),
        second.clone(),
        &[Command::Get],
    );

    let connection = StubConnection::create();
    dispatch
        .handle_inbound(request(Command::Get, 9, local), connection.clone())
        .await;

    assert_eq!(0, first.invoked_count());
    assert_eq!(1, second.invoked_count());
}

#[tokio::test]
async fn non_request_messages_go_to_the_sink_without_reply() {
    enable_tracing();
    let local = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let sink = Arc::new(RecordingSink::default());
    dispatch.set_unsolicited_sink(sink.clone());

    let connection = StubConnection::create();
    let mut message = request(Command::DirectData, 10, local);
    message.kind = MessageKind::Response;

    dispatch.handle_inbound(message, connection.clone()).await;

    assert_eq!(1, sink.accepted.lock().unwrap().len());
    assert!(connection.sent().is_empty());
}

#[tokio::test]
async fn fire_and_forget_sends_nothing_on_datagram() {
    enable_tracing();
    let local = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let handler = EchoHandler::create_fire_and_forget();
    dispatch.register(
        local.clone(),
        local.clone(),
        handler.clone(),
        &[Command::Add],
    );

    let connection = StubConnection::create_datagram();
    dispatch
        .handle_inbound(request(Command::Add, 11, local), connection.clone())
        .await;

    assert_eq!(1, handler.invoked_count());
    assert!(connection.sent().is_empty());
}

#[tokio::test]
async fn handler_failure_is_reported_as_rejection() {
    enable_tracing();
    let local = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let handler = EchoHandler::create_failing();
    dispatch.register(
        local.clone(),
        local.clone(),
        handler.clone(),
        &[Command::Remove],
    );

    let connection = StubConnection::create();
    dispatch
        .handle_inbound(
            request(Command::Remove, 12, local),
            connection.clone(),
        )
        .await;

    let sent = connection.sent();
    assert_eq!(MessageKind::Rejection, sent[0].kind);
}

#[tokio::test]
async fn dead_connection_reply_is_dropped_locally() {
    enable_tracing();
    let local = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let handler = EchoHandler::create();
    dispatch.register(
        local.clone(),
        local.clone(),
        handler.clone(),
        &[Command::Get],
    );

    let connection = StubConnection::create();
    connection.set_open(false);
    dispatch
        .handle_inbound(request(Command::Get, 13, local), connection.clone())
        .await;

    // the handler ran, the undeliverable reply was dropped
    assert_eq!(1, handler.invoked_count());
    assert!(connection.sent().is_empty());
}

#[tokio::test]
async fn pending_response_resolves_before_any_handler() {
    enable_tracing();
    let local = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;
    let handler = EchoHandler::create();
    dispatch.register(
        local.clone(),
        local.clone(),
        handler.clone(),
        &[Command::Get],
    );

    let (responder, receiver) = futures::channel::oneshot::channel();
    dispatch.register_pending(14, responder, None);

    let connection = StubConnection::create();
    dispatch
        .handle_inbound(request(Command::Get, 14, local), connection.clone())
        .await;

    let delivered = receiver.await.unwrap().unwrap();
    assert_eq!(14, delivered.msg_id);
    // the late response is acknowledged, never forwarded to a handler
    assert_eq!(0, handler.invoked_count());
    let sent = connection.sent();
    assert_eq!(1, sent.len());
    assert_eq!(MessageKind::Ack, sent[0].kind);
}

#[tokio::test(start_paused = true)]
async fn pending_response_times_out_as_failure() {
    enable_tracing();
    let local = random_peer_id();
    let dispatch = make_dispatch(local).await;

    let (responder, receiver) = futures::channel::oneshot::channel();
    dispatch.register_pending(
        15,
        responder,
        Some(Duration::from_secs(3)),
    );

    tokio::time::sleep(Duration::from_secs(4)).await;

    let err = receiver.await.unwrap().unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(
        "timeout: slow peer did not answer within 3 s",
        err.to_string().as_str(),
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_response_resolves_exactly_once_under_race() {
    enable_tracing();
    let local = random_peer_id();
    let dispatch = make_dispatch(local.clone()).await;

    // race the scheduled expiry against the late delivery many times;
    // whichever wins, the responder fires exactly once, which the
    // oneshot receiver observing a single value proves
    for msg_id in 100_u64..120 {
        let (responder, receiver) = futures::channel::oneshot::channel();
        dispatch.register_pending(
            msg_id,
            responder,
            Some(Duration::from_millis(1)),
        );

        let connection = StubConnection::create();
        let message = request(Command::Get, msg_id, local.clone());
        tokio::time::sleep(Duration::from_millis(1)).await;
        dispatch.handle_inbound(message, connection.clone()).await;

        match receiver.await.unwrap() {
            Ok(delivered) => {
                assert_eq!(msg_id, delivered.msg_id);
                assert_eq!(1, connection.sent().len());
            }
            Err(err) => {
                assert!(err.is_timeout());
                // the expiry won, so the message was treated as a
                // normal request instead
                assert_eq!(
                    MessageKind::Rejection,
                    connection.sent()[0].kind,
                );
            }
        }
    }
}
