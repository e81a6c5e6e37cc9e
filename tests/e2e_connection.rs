//! End-to-end connection manager tests.
//!
//! A scripted in-memory connector stands in for the network, and the test
//! body plays the server: it holds the RSA private key, answers the
//! handshake and inspects every frame the client writes.

use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chatlink::codec::crypto::{SessionKeys, IV_SIZE, KEY_SIZE};
use chatlink::transport::{Link, MemoryPeer, TransportEvent};
use chatlink::{
    ChatClient, ChatLinkError, Config, ConnectionEvent, ConnectionManager, ConnectionState,
    Envelope, HandshakePhase, KeyPolicy, MemoryConnector, MessageDispatcher, OpCode, SendDecision,
    SendOutcome, SessionCodec,
};
use futures::channel::mpsc::UnboundedSender;
use futures::Sink;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn server_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap())
}

fn public_pem() -> String {
    RsaPublicKey::from(server_key())
        .to_public_key_pem(LineEnding::LF)
        .unwrap()
}

fn test_config(reconnect_delay_ms: u64) -> Config {
    let mut config = Config::default();
    config.client.endpoint = "ws://memory.test".to_string();
    config.client.reconnect_delay_ms = reconnect_delay_ms;
    config
}

fn manager_with(
    config: &Config,
    connector: &Arc<MemoryConnector>,
    dispatcher: MessageDispatcher,
) -> ConnectionManager {
    ConnectionManager::new(config, connector.clone(), dispatcher).unwrap()
}

async fn wait_for_event<F>(events: &mut broadcast::Receiver<ConnectionEvent>, pred: F) -> ConnectionEvent
where
    F: Fn(&ConnectionEvent) -> bool,
{
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Play the server side of the key exchange; returns the client's keys.
async fn server_handshake(peer: &mut MemoryPeer) -> SessionKeys {
    let offer = json!({"code": 0, "publicKey": public_pem()});
    assert!(peer.send_frame(offer.to_string()));

    let frame = timeout(WAIT, peer.recv())
        .await
        .expect("timed out waiting for SendAes")
        .expect("client hung up");
    let plain = server_key()
        .decrypt(Oaep::new::<Sha256>(), &frame)
        .expect("first frame after ReceiveRSA must be RSA-encrypted");

    let value: Value = serde_json::from_slice(&plain).unwrap();
    assert_eq!(value["code"], OpCode::SendAes.value());

    let key: [u8; KEY_SIZE] = BASE64
        .decode(value["aesKeyData"]["key"].as_str().unwrap())
        .unwrap()
        .try_into()
        .unwrap();
    let iv: [u8; IV_SIZE] = BASE64
        .decode(value["aesKeyData"]["iv"].as_str().unwrap())
        .unwrap()
        .try_into()
        .unwrap();
    SessionKeys::from_parts(key, iv)
}

fn send_ready(peer: &MemoryPeer, codec: &SessionCodec) {
    let frame = codec.encode_symmetric(br#"{"code":2}"#).unwrap();
    assert!(peer.send_frame(frame.to_vec()));
}

/// Decode one client frame with the session codec and parse it as JSON.
async fn recv_envelope(peer: &mut MemoryPeer, codec: &SessionCodec) -> Value {
    let frame = timeout(WAIT, peer.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("client hung up");
    let decoded = codec.decode(&frame);
    assert!(decoded.is_decrypted());
    serde_json::from_slice(decoded.as_bytes()).expect("frame must hold one whole envelope")
}

async fn wait_for_phase(manager: &ConnectionManager, phase: HandshakePhase) {
    timeout(WAIT, async {
        while manager.handshake_phase().await != phase {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for handshake phase");
}

/// Sink that accepts `limit` frames and then never becomes ready again.
struct StallingSink {
    accepted: Arc<StdMutex<Vec<Vec<u8>>>>,
    limit: usize,
    stalled: Arc<Notify>,
}

impl Sink<Vec<u8>> for StallingSink {
    type Error = ChatLinkError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.accepted.lock().unwrap().len() < self.limit {
            Poll::Ready(Ok(()))
        } else {
            self.stalled.notify_one();
            Poll::Pending
        }
    }

    fn start_send(self: Pin<&mut Self>, item: Vec<u8>) -> Result<(), Self::Error> {
        self.accepted.lock().unwrap().push(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Script a link whose outbound side stalls after the session key frame.
/// Returns the inbound feed and a signal raised once a send is stuck.
fn script_stalling_link(
    connector: &MemoryConnector,
) -> (UnboundedSender<chatlink::Result<TransportEvent>>, Arc<Notify>) {
    let stalled = Arc::new(Notify::new());
    let sink = StallingSink {
        accepted: Arc::new(StdMutex::new(Vec::new())),
        limit: 1,
        stalled: stalled.clone(),
    };
    let (inbound, stream) = futures::channel::mpsc::unbounded();
    connector.accept_link(Link::new(sink, stream));
    (inbound, stalled)
}

fn offer_public_key(inbound: &UnboundedSender<chatlink::Result<TransportEvent>>) {
    let offer = json!({"code": 0, "publicKey": public_pem()});
    inbound
        .unbounded_send(Ok(TransportEvent::Chunk {
            data: offer.to_string().into_bytes(),
            end_of_message: true,
        }))
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_then_success_passes_through_connecting() {
    let connector = Arc::new(MemoryConnector::new());
    connector.fail("connection refused");
    let _peer = connector.accept();

    let manager = manager_with(&test_config(1000), &connector, MessageDispatcher::new());
    let mut states = manager.subscribe_state();
    let mut events = manager.subscribe_events();
    assert_eq!(*states.borrow(), ConnectionState::Disconnected);

    let started = tokio::time::Instant::now();
    let _supervisor = manager.start().unwrap();

    let mut seen = vec![ConnectionState::Disconnected];
    while *seen.last().unwrap() != ConnectionState::Connected {
        timeout(WAIT, states.changed()).await.unwrap().unwrap();
        let state = *states.borrow_and_update();
        if state != *seen.last().unwrap() {
            seen.push(state);
        }
    }

    assert_eq!(
        seen,
        vec![
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected
        ]
    );
    assert!(seen.windows(2).all(|w| w[0].can_transition_to(w[1])));
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(connector.attempts(), 2);

    let failed = wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::ConnectFailed { .. })).await;
    assert!(matches!(
        failed,
        ConnectionEvent::ConnectFailed { attempt: 1, ref error } if error.contains("connection refused")
    ));
}

#[tokio::test]
async fn test_unexpected_close_returns_to_connecting() {
    let connector = Arc::new(MemoryConnector::new());
    let first = connector.accept();
    let _second = connector.accept();

    let manager = manager_with(&test_config(20), &connector, MessageDispatcher::new());
    let mut events = manager.subscribe_events();
    manager.connect().await.unwrap();

    first.close("server restart");
    let lost = wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    assert!(matches!(
        lost,
        ConnectionEvent::Disconnected { ref reason } if reason.contains("server restart")
    ));

    wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Connected { .. })).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_dropped_peer_triggers_reconnect() {
    let connector = Arc::new(MemoryConnector::new());
    let first = connector.accept();
    let _second = connector.accept();

    let manager = manager_with(&test_config(20), &connector, MessageDispatcher::new());
    let mut events = manager.subscribe_events();
    manager.connect().await.unwrap();

    drop(first);
    wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Connected { .. })).await;
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test]
async fn test_send_aes_is_first_frame_after_receive_rsa() {
    let connector = Arc::new(MemoryConnector::new());
    let mut peer = connector.accept();
    let manager = manager_with(&test_config(20), &connector, MessageDispatcher::new());
    let mut events = manager.subscribe_events();

    // An eager sender hammers the link from before the connection exists
    let sender = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let login = Envelope::new(OpCode::RequestLogin).with_field("user", json!({"name": "alice"}));
            let mut refused = Vec::new();
            loop {
                match manager.send(&login).await.unwrap() {
                    SendOutcome::Sent => return refused,
                    outcome => {
                        refused.push(outcome);
                        tokio::task::yield_now().await;
                    },
                }
            }
        })
    };

    manager.connect().await.unwrap();
    assert_eq!(manager.handshake_phase().await, HandshakePhase::AwaitingKey);

    let keys = server_handshake(&mut peer).await;
    let codec = SessionCodec::new(keys);

    let refused = timeout(WAIT, sender).await.unwrap().unwrap();
    assert!(refused
        .iter()
        .all(|o| matches!(o, SendOutcome::NotConnected | SendOutcome::HandshakePending)));

    let app_frame = timeout(WAIT, peer.recv()).await.unwrap().unwrap();
    let decoded = codec.decode(&app_frame);
    assert!(decoded.is_decrypted());
    let value: Value = serde_json::from_slice(decoded.as_bytes()).unwrap();
    assert_eq!(value["code"], OpCode::RequestLogin.value());
    assert_eq!(value["user"]["name"], "alice");

    send_ready(&peer, &codec);
    wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::HandshakeComplete { .. })).await;
    assert_eq!(manager.handshake_phase().await, HandshakePhase::Ready);
}

#[tokio::test]
async fn test_three_fragments_assemble_one_frame() {
    let connector = Arc::new(MemoryConnector::new());
    let mut peer = connector.accept();

    let (tx, mut answers) = mpsc::unbounded_channel();
    let dispatcher = MessageDispatcher::new().forward(OpCode::AnswerLogin, tx);
    let manager = manager_with(&test_config(20), &connector, dispatcher);
    manager.connect().await.unwrap();

    let codec = SessionCodec::new(server_handshake(&mut peer).await);
    send_ready(&peer, &codec);

    let first = codec
        .encode_symmetric(br#"{"code":6,"user":{"id":1,"name":"alice"}}"#)
        .unwrap();
    let bytes = first.as_bytes();
    let (a, rest) = bytes.split_at(bytes.len() / 3);
    let (b, c) = rest.split_at(rest.len() / 2);
    assert!(peer.send_chunk(a.to_vec(), false));
    assert!(peer.send_chunk(b.to_vec(), false));
    assert!(peer.send_chunk(c.to_vec(), true));

    let second = codec.encode_symmetric(br#"{"code":6,"user":{"id":2}}"#).unwrap();
    assert!(peer.send_frame(second.to_vec()));

    let envelope = timeout(WAIT, answers.recv()).await.unwrap().unwrap();
    assert_eq!(envelope.field("user").unwrap()["name"], "alice");
    let envelope = timeout(WAIT, answers.recv()).await.unwrap().unwrap();
    assert_eq!(envelope.field("user").unwrap()["id"], 2);

    assert_eq!(connector.attempts(), 1);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_unknown_opcode_is_dropped_without_disconnect() {
    let connector = Arc::new(MemoryConnector::new());
    let peer = connector.accept();

    let (tx, mut answers) = mpsc::unbounded_channel();
    let dispatcher = MessageDispatcher::new().forward(OpCode::AnswerCreateAccount, tx);
    let manager = manager_with(&test_config(20), &connector, dispatcher);
    manager.connect().await.unwrap();

    assert!(peer.send_frame(br#"{"code":99,"surprise":true}"#.to_vec()));
    assert!(peer.send_frame(br#"{"opCode":"AnswerCreateAccount","ok":true}"#.to_vec()));

    let envelope = timeout(WAIT, answers.recv()).await.unwrap().unwrap();
    assert_eq!(envelope.op_code(), OpCode::AnswerCreateAccount);
    assert_eq!(connector.attempts(), 1);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_undecodable_frame_recycles_connection() {
    let connector = Arc::new(MemoryConnector::new());
    let peer = connector.accept();
    let _second = connector.accept();

    let manager = manager_with(&test_config(20), &connector, MessageDispatcher::new());
    let mut events = manager.subscribe_events();
    manager.connect().await.unwrap();

    assert!(peer.send_frame(vec![0xde, 0xad, 0xbe, 0xef, 0x00]));

    let lost = wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    assert!(matches!(
        lost,
        ConnectionEvent::Disconnected { ref reason } if reason.contains("Decode")
    ));
    wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Connected { .. })).await;
}

#[tokio::test]
async fn test_close_suppresses_reconnect() {
    let connector = Arc::new(MemoryConnector::new());
    let mut peer = connector.accept();
    let _unused = connector.accept();

    let manager = manager_with(&test_config(20), &connector, MessageDispatcher::new());
    let mut events = manager.subscribe_events();
    let supervisor = manager.start().unwrap();
    manager.connect().await.unwrap();

    manager.close("user logout");
    timeout(WAIT, supervisor).await.unwrap().unwrap();

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(connector.attempts(), 1);
    assert!(manager.is_closed());

    let closed = wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Closed { .. })).await;
    assert_eq!(
        closed,
        ConnectionEvent::Closed {
            reason: "user logout".to_string()
        }
    );

    // The link was released
    assert!(timeout(WAIT, peer.recv()).await.unwrap().is_none());
    assert_eq!(
        manager.send_frame(b"late").await.unwrap(),
        SendOutcome::NotConnected
    );
    assert!(manager.connect().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_close_while_connecting() {
    let connector = Arc::new(MemoryConnector::new());
    let manager = manager_with(&test_config(1000), &connector, MessageDispatcher::new());
    let mut events = manager.subscribe_events();
    let supervisor = manager.start().unwrap();

    wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::ConnectFailed { .. })).await;
    manager.close("giving up");
    timeout(WAIT, supervisor).await.unwrap().unwrap();

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.start().is_err());
}

#[tokio::test]
async fn test_send_before_start_is_not_connected() {
    let connector = Arc::new(MemoryConnector::new());
    let manager = manager_with(&test_config(20), &connector, MessageDispatcher::new());
    let envelope = Envelope::new(OpCode::UpdateRelationship);
    assert_eq!(manager.send(&envelope).await.unwrap(), SendOutcome::NotConnected);
}

async fn keys_across_reconnect(policy: KeyPolicy) -> (SessionKeys, SessionKeys) {
    let connector = Arc::new(MemoryConnector::new());
    let mut first = connector.accept();
    let mut second = connector.accept();

    let mut config = test_config(20);
    config.client.key_policy = policy;
    let manager = manager_with(&config, &connector, MessageDispatcher::new());
    let mut events = manager.subscribe_events();
    manager.connect().await.unwrap();

    let first_keys = server_handshake(&mut first).await;
    first.close("rotate");
    wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Connected { .. })).await;
    let second_keys = server_handshake(&mut second).await;

    manager.close("done");
    (first_keys, second_keys)
}

#[tokio::test]
async fn test_per_connection_policy_rotates_keys() {
    let (first, second) = keys_across_reconnect(KeyPolicy::PerConnection).await;
    assert_ne!(first.key(), second.key());
    assert_ne!(first.iv(), second.iv());
}

#[tokio::test]
async fn test_per_process_policy_reuses_keys() {
    let (first, second) = keys_across_reconnect(KeyPolicy::PerProcess).await;
    assert_eq!(first.key(), second.key());
    assert_eq!(first.iv(), second.iv());
}

#[tokio::test]
async fn test_close_interrupts_stalled_send() {
    server_key();
    let connector = Arc::new(MemoryConnector::new());
    let (inbound, stalled) = script_stalling_link(&connector);

    let manager = manager_with(&test_config(20), &connector, MessageDispatcher::new());
    let supervisor = manager.start().unwrap();
    manager.connect().await.unwrap();

    offer_public_key(&inbound);
    wait_for_phase(&manager, HandshakePhase::KeySent).await;

    let pending_send = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let login = Envelope::new(OpCode::RequestLogin);
            manager.send(&login).await
        })
    };
    timeout(WAIT, stalled.notified()).await.unwrap();

    manager.close("user logout");
    timeout(WAIT, supervisor).await.unwrap().unwrap();
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    let result = timeout(WAIT, pending_send).await.unwrap().unwrap();
    assert!(result.is_err());
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_send_times_out_and_reconnects() {
    server_key();
    let connector = Arc::new(MemoryConnector::new());
    let (inbound, stalled) = script_stalling_link(&connector);
    let _second = connector.accept();

    let mut config = test_config(20);
    config.client.connect_timeout_secs = 1;
    let manager = manager_with(&config, &connector, MessageDispatcher::new());
    let mut events = manager.subscribe_events();
    manager.connect().await.unwrap();

    offer_public_key(&inbound);
    wait_for_phase(&manager, HandshakePhase::KeySent).await;

    let pending_send = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let login = Envelope::new(OpCode::RequestLogin);
            manager.send(&login).await
        })
    };
    timeout(WAIT, stalled.notified()).await.unwrap();

    let result = timeout(WAIT, pending_send).await.unwrap().unwrap();
    assert!(matches!(result, Err(ChatLinkError::Transport(ref e)) if e.contains("timed out")));

    let lost = wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    assert!(matches!(
        lost,
        ConnectionEvent::Disconnected { ref reason } if reason.contains("send")
    ));
    wait_for_event(&mut events, |e| matches!(e, ConnectionEvent::Connected { .. })).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(manager.handshake_phase().await, HandshakePhase::AwaitingKey);
}

#[tokio::test]
async fn test_concurrent_sends_arrive_as_whole_frames() {
    let connector = Arc::new(MemoryConnector::new());
    let mut peer = connector.accept();
    let manager = manager_with(&test_config(20), &connector, MessageDispatcher::new());
    manager.connect().await.unwrap();

    let codec = SessionCodec::new(server_handshake(&mut peer).await);
    send_ready(&peer, &codec);

    const SENDERS: u64 = 20;
    let senders: Vec<_> = (0..SENDERS)
        .map(|seq| {
            let manager = manager.clone();
            tokio::spawn(async move {
                let update = Envelope::new(OpCode::UpdateRelationship)
                    .with_field("seq", json!(seq))
                    .with_field("friend", json!("bob".repeat(50)));
                manager.send(&update).await.unwrap()
            })
        })
        .collect();
    for sender in senders {
        assert_eq!(timeout(WAIT, sender).await.unwrap().unwrap(), SendOutcome::Sent);
    }

    let mut seen = BTreeSet::new();
    for _ in 0..SENDERS {
        let value = recv_envelope(&mut peer, &codec).await;
        assert_eq!(value["code"], OpCode::UpdateRelationship.value());
        assert_eq!(value["friend"], "bob".repeat(50));
        assert!(seen.insert(value["seq"].as_u64().unwrap()));
    }
    assert_eq!(seen, (0..SENDERS).collect::<BTreeSet<_>>());

    // One task sending in sequence keeps its order
    for seq in 100..110u64 {
        let update = Envelope::new(OpCode::UpdateRelationship).with_field("seq", json!(seq));
        assert_eq!(manager.send(&update).await.unwrap(), SendOutcome::Sent);
    }
    for seq in 100..110u64 {
        let value = recv_envelope(&mut peer, &codec).await;
        assert_eq!(value["seq"], seq);
    }
}

#[tokio::test]
async fn test_cooldown_starts_only_after_a_send_goes_out() {
    let connector = Arc::new(MemoryConnector::new());
    let mut peer = connector.accept();
    let client = ChatClient::new(&test_config(20), connector.clone(), MessageDispatcher::new()).unwrap();
    client.connect().await.unwrap();

    let login = Envelope::new(OpCode::RequestLogin).with_field("user", json!({"name": "alice"}));
    assert_eq!(client.send(&login).await.unwrap(), SendDecision::HandshakePending);
    assert_eq!(client.send(&login).await.unwrap(), SendDecision::HandshakePending);

    let codec = SessionCodec::new(server_handshake(&mut peer).await);
    assert_eq!(client.send(&login).await.unwrap(), SendDecision::Sent);
    assert!(matches!(
        client.send(&login).await.unwrap(),
        SendDecision::Throttled { remaining } if remaining > Duration::ZERO
    ));

    let value = recv_envelope(&mut peer, &codec).await;
    assert_eq!(value["code"], OpCode::RequestLogin.value());
    assert!(timeout(Duration::from_millis(50), peer.recv()).await.is_err());

    client.close("test done");
}
