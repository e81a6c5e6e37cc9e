//! Connection manager: reconnect loop, receive loop and serialized sends.
//!
//! One supervisor task owns the connection lifecycle. It connects (retrying
//! with a fixed delay), runs the receive loop until the link fails, tears the
//! link down and starts over, until [`ConnectionManager::close`] is called.
//!
//! Sends may come from any task. They queue on the link mutex so exactly one
//! transport write is in flight at a time, in submission order.
//!
//! Every installed link carries an epoch. Teardown bumps the epoch before it
//! takes the link, and so does a send that fails or times out; a write in
//! progress on a retired link is abandoned, and the receive loop recycles a
//! link whose epoch moved on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use futures::SinkExt;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;
use zeroize::Zeroizing;

use super::assembler::FrameAssembler;
use super::state::{ConnectionEvent, ConnectionState};
use super::{Connector, EventStream, FrameSink, Link, TransportEvent};
use crate::codec::{Frame, SessionCodec};
use crate::config::Config;
use crate::dispatch::MessageDispatcher;
use crate::error::{ChatLinkError, Result};
use crate::protocol::{
    Envelope, HandshakePhase, HandshakeProtocol, Inbound, OpCode, Session, SessionStats,
};

/// Result of a send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the transport as one message
    Sent,
    /// No link; nothing was sent
    NotConnected,
    /// Connected, but the session key has not been delivered yet
    HandshakePending,
}

/// How a served connection ended
#[derive(Debug)]
enum Ending {
    /// `close` was called
    Local(String),
    /// Link failed or the server closed it
    Remote(String),
}

/// The installed sink and the epoch it was installed under
struct LinkSink {
    epoch: u64,
    sink: FrameSink,
}

struct Inner {
    connector: Arc<dyn Connector>,
    dispatcher: MessageDispatcher,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    max_frame_bytes: usize,
    session: Mutex<Session>,
    sink: Mutex<Option<LinkSink>>,
    epoch: watch::Sender<u64>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    close: watch::Sender<Option<String>>,
    started: AtomicBool,
}

/// Owns the link, the session and the reconnect/receive loops
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager. Nothing connects until [`start`](Self::start) or
    /// [`connect`](Self::connect).
    pub fn new(
        config: &Config,
        connector: Arc<dyn Connector>,
        dispatcher: MessageDispatcher,
    ) -> Result<Self> {
        let session = Session::new(config.client.key_policy, config.codec.gzip())?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(config.client.event_capacity.max(1));
        let (close, _) = watch::channel(None);
        let (epoch, _) = watch::channel(0);

        Ok(Self {
            inner: Arc::new(Inner {
                connector,
                dispatcher,
                reconnect_delay: config.client.reconnect_delay(),
                connect_timeout: config.client.connect_timeout(),
                max_frame_bytes: config.codec.max_frame_bytes,
                session: Mutex::new(session),
                sink: Mutex::new(None),
                epoch,
                state,
                events,
                close,
                started: AtomicBool::new(false),
            }),
        })
    }

    /// Spawn the supervisor task.
    ///
    /// The task runs until [`close`](Self::close); a manager can only be
    /// started once.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        self.spawn_supervisor().ok_or_else(|| {
            ChatLinkError::Protocol("connection manager already started".to_string())
        })
    }

    fn spawn_supervisor(&self) -> Option<JoinHandle<()>> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return None;
        }
        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(inner.run()))
    }

    /// Start if needed and wait until a link is established.
    ///
    /// Connect failures are retried internally and reported as
    /// [`ConnectionEvent::ConnectFailed`]; this only fails once the manager
    /// is closed.
    pub async fn connect(&self) -> Result<()> {
        let mut state_rx = self.inner.state.subscribe();
        let mut close_rx = self.inner.close.subscribe();
        // Detached; the supervisor runs until `close`.
        drop(self.spawn_supervisor());

        loop {
            if close_rx.borrow_and_update().is_some() {
                return Err(ChatLinkError::ConnectionClosed);
            }
            if *state_rx.borrow_and_update() == ConnectionState::Connected {
                return Ok(());
            }
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Err(ChatLinkError::ConnectionClosed);
                    }
                },
                changed = close_rx.changed() => {
                    if changed.is_err() {
                        return Err(ChatLinkError::ConnectionClosed);
                    }
                },
            }
        }
    }

    /// Send raw bytes as one transport message.
    ///
    /// No-op with [`SendOutcome::NotConnected`] when there is no link.
    pub async fn send_frame(&self, bytes: &[u8]) -> Result<SendOutcome> {
        self.transmit(|_| Ok(bytes.to_vec())).await
    }

    /// Serialize, compress and encrypt an envelope, then send it.
    pub async fn send(&self, envelope: &Envelope) -> Result<SendOutcome> {
        let payload = Zeroizing::new(envelope.to_bytes()?);
        let outcome = self
            .transmit(|codec| Ok(codec.encode_symmetric(&payload)?.to_vec()))
            .await?;
        tracing::trace!(op_code = %envelope.op_code(), ?outcome, "Send");
        Ok(outcome)
    }

    async fn transmit<F>(&self, encode: F) -> Result<SendOutcome>
    where
        F: FnOnce(&SessionCodec) -> Result<Vec<u8>>,
    {
        let mut epoch_rx = self.inner.epoch.subscribe();
        let mut slot = self.inner.sink.lock().await;
        let Some(link) = slot.as_mut() else {
            return Ok(SendOutcome::NotConnected);
        };
        if *epoch_rx.borrow_and_update() != link.epoch {
            // Being torn down
            return Ok(SendOutcome::NotConnected);
        }

        let bytes = {
            let session = self.inner.session.lock().await;
            if !session.can_send() {
                return Ok(SendOutcome::HandshakePending);
            }
            encode(&session.codec())?
        };

        let sent = tokio::select! {
            biased;
            _ = epoch_rx.changed() => {
                Err(ChatLinkError::Transport("link retired during send".to_string()))
            },
            result = send_within(&mut link.sink, bytes, self.inner.connect_timeout) => result,
        };
        if let Err(e) = sent {
            tracing::warn!(error = %e, "Send failed");
            self.inner.retire(link.epoch);
            return Err(e);
        }
        self.inner.session.lock().await.record_sent();
        Ok(SendOutcome::Sent)
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Any receive in progress is abandoned immediately. Later calls keep
    /// the first reason.
    pub fn close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::info!(%reason, "Close requested");
        self.inner.close.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Check if `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.close.borrow().is_some()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Check if a link is established
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Receive connection events emitted from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Handshake phase of the current connection
    pub async fn handshake_phase(&self) -> HandshakePhase {
        self.inner.session.lock().await.phase()
    }

    /// Session statistics
    pub async fn stats(&self) -> SessionStats {
        self.inner.session.lock().await.stats()
    }

    /// Endpoint of the underlying connector
    pub fn endpoint(&self) -> String {
        self.inner.connector.endpoint()
    }

    /// Assemble transport events into complete frames.
    ///
    /// The stream is lazy and single-use. It yields one frame per
    /// `end_of_message`, yields a final error when the peer closes or the
    /// transport fails, and then ends.
    pub fn frames(
        stream: EventStream,
        max_frame_bytes: usize,
    ) -> impl Stream<Item = Result<Frame>> + Send {
        let state = Some((stream, FrameAssembler::new(max_frame_bytes)));
        stream::unfold(state, |state| async move {
            let (mut events, mut assembler) = state?;
            loop {
                match events.next().await {
                    Some(Ok(TransportEvent::Chunk {
                        data,
                        end_of_message,
                    })) => match assembler.push(&data, end_of_message) {
                        Ok(Some(frame)) => return Some((Ok(frame), Some((events, assembler)))),
                        Ok(None) => {},
                        Err(e) => return Some((Err(e), None)),
                    },
                    Some(Ok(TransportEvent::Closed { reason })) => {
                        return Some((Err(ChatLinkError::PeerClosed(reason)), None));
                    },
                    Some(Err(e)) => return Some((Err(e), None)),
                    None => return None,
                }
            }
        })
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.inner.connector.name())
            .field("endpoint", &self.inner.connector.endpoint())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let mut close_rx = self.close.subscribe();
        tracing::info!(
            transport = self.connector.name(),
            endpoint = %self.connector.endpoint(),
            "Connection supervisor started"
        );

        let reason = loop {
            let Some(link) = self.connect_with_retry(&mut close_rx).await else {
                break self.close_reason();
            };
            match self.serve(link, &mut close_rx).await {
                Ending::Local(reason) => break reason,
                Ending::Remote(reason) => {
                    tracing::warn!(%reason, "Connection lost, reconnecting");
                    self.emit(ConnectionEvent::Disconnected { reason });
                },
            }
        };

        self.set_state(ConnectionState::Disconnected);
        tracing::info!(%reason, "Connection closed");
        self.emit(ConnectionEvent::Closed { reason });
    }

    /// Returns `None` when closed before a link was established.
    async fn connect_with_retry(
        &self,
        close_rx: &mut watch::Receiver<Option<String>>,
    ) -> Option<Link> {
        if close_rx.borrow().is_some() {
            return None;
        }
        self.set_state(ConnectionState::Connecting);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                () = wait_closed(close_rx) => {
                    self.set_state(ConnectionState::Disconnected);
                    return None;
                },
                result = tokio::time::timeout(self.connect_timeout, self.connector.connect()) => result,
            };

            let error = match result {
                Ok(Ok(link)) => {
                    tracing::debug!(attempt, "Connect succeeded");
                    return Some(link);
                },
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", self.connect_timeout),
            };
            tracing::warn!(attempt, %error, retry_in = ?self.reconnect_delay, "Connect failed");
            self.emit(ConnectionEvent::ConnectFailed { attempt, error });

            tokio::select! {
                biased;
                () = wait_closed(close_rx) => {
                    self.set_state(ConnectionState::Disconnected);
                    return None;
                },
                () = tokio::time::sleep(self.reconnect_delay) => {},
            }
        }
    }

    async fn serve(&self, link: Link, close_rx: &mut watch::Receiver<Option<String>>) -> Ending {
        let Link { sink, stream } = link;

        let (connection_id, mut epoch_rx) = {
            let mut slot = self.sink.lock().await;
            let mut session = self.session.lock().await;
            if let Err(e) = session.begin_connection() {
                return Ending::Remote(e.to_string());
            }
            let epoch_rx = self.epoch.subscribe();
            *slot = Some(LinkSink {
                epoch: *epoch_rx.borrow(),
                sink,
            });
            (session.id().to_string(), epoch_rx)
        };

        self.set_state(ConnectionState::Connected);
        self.emit(ConnectionEvent::Connected {
            connection_id: connection_id.clone(),
        });

        let span = tracing::info_span!("connection", connection_id = %connection_id);
        let ending = self
            .receive(stream, close_rx, &mut epoch_rx)
            .instrument(span)
            .await;

        self.set_state(ConnectionState::Closing);
        // Abandon any write still holding the link
        self.epoch.send_modify(|epoch| *epoch += 1);
        if let Some(LinkSink { mut sink, .. }) = self.sink.lock().await.take() {
            match tokio::time::timeout(self.connect_timeout, sink.close()).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => tracing::debug!(error = %e, "Error closing link"),
                Err(_) => tracing::debug!("Timed out closing link"),
            }
        }
        self.set_state(ConnectionState::Disconnected);
        ending
    }

    async fn receive(
        &self,
        stream: EventStream,
        close_rx: &mut watch::Receiver<Option<String>>,
        epoch_rx: &mut watch::Receiver<u64>,
    ) -> Ending {
        let frames = ConnectionManager::frames(stream, self.max_frame_bytes);
        tokio::pin!(frames);

        loop {
            let step = async {
                match frames.next().await {
                    Some(Ok(frame)) => self.process_frame(frame).await.err().map(|e| {
                        tracing::warn!(error = %e, "Dropping unreadable frame");
                        Ending::Remote(e.to_string())
                    }),
                    Some(Err(ChatLinkError::PeerClosed(reason))) => {
                        tracing::info!(%reason, "Server closed the connection");
                        Some(Ending::Remote(format!("closed by server: {reason}")))
                    },
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Receive failed");
                        Some(Ending::Remote(e.to_string()))
                    },
                    None => Some(Ending::Remote("stream ended".to_string())),
                }
            };

            tokio::select! {
                biased;
                () = wait_closed(close_rx) => return Ending::Local(self.close_reason()),
                _ = epoch_rx.changed() => {
                    return Ending::Remote("outbound send failed".to_string());
                },
                ending = step => {
                    if let Some(ending) = ending {
                        return ending;
                    }
                },
            }
        }
    }

    async fn process_frame(&self, frame: Frame) -> Result<()> {
        let codec = {
            let mut session = self.session.lock().await;
            session.record_received();
            session.codec()
        };

        let envelope = match read_frame(&codec, frame.as_bytes())? {
            Inbound::Envelope(envelope) => envelope,
            unrecognized @ Inbound::Unrecognized(_) => {
                self.dispatcher.dispatch_inbound(unrecognized).await;
                return Ok(());
            },
        };
        drop(frame);

        match envelope.op_code() {
            OpCode::ReceiveRsa => self.answer_public_key(&envelope).await?,
            OpCode::ServerReadyToReceive => self.confirm_ready().await,
            _ => {},
        }

        let outcome = self.dispatcher.dispatch_envelope(envelope).await;
        tracing::trace!(?outcome, "Dispatched frame");
        Ok(())
    }

    /// Send `SendAes` while holding the link, so no other frame can precede it.
    async fn answer_public_key(&self, envelope: &Envelope) -> Result<()> {
        let mut slot = self.sink.lock().await;
        let mut session = self.session.lock().await;

        let exchange = HandshakeProtocol::answer_public_key(&session, envelope)?;
        let link = slot.as_mut().ok_or(ChatLinkError::ConnectionClosed)?;
        send_within(&mut link.sink, exchange.frame.to_vec(), self.connect_timeout).await?;

        session.key_delivered(exchange.server_key);
        session.record_sent();
        tracing::info!("Session key delivered");
        Ok(())
    }

    async fn confirm_ready(&self) {
        let mut session = self.session.lock().await;
        let was_ready = session.is_ready();
        match session.confirm_ready() {
            Ok(()) if !was_ready => {
                tracing::info!("Handshake complete");
                self.emit(ConnectionEvent::HandshakeComplete {
                    connection_id: session.id().to_string(),
                });
            },
            Ok(()) => {},
            Err(e) => tracing::warn!(error = %e, "Ignoring ready signal"),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Connection state changed");
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Mark the link installed under `epoch` as dead. No-op once retired.
    fn retire(&self, epoch: u64) {
        self.epoch.send_if_modified(|current| {
            if *current == epoch {
                *current += 1;
                true
            } else {
                false
            }
        });
    }

    fn close_reason(&self) -> String {
        self.close.borrow().clone().unwrap_or_default()
    }
}

/// Decode a frame and parse it, retrying as plaintext when the decrypted
/// candidate does not parse.
fn read_frame(codec: &SessionCodec, bytes: &[u8]) -> Result<Inbound> {
    let decoded = codec.decode(bytes);
    match Envelope::parse(decoded.as_bytes()) {
        Ok(inbound) => Ok(inbound),
        Err(e) if decoded.is_decrypted() => {
            tracing::trace!(error = %e, "Decrypted candidate unreadable, retrying as plaintext");
            Envelope::parse(codec.decode_plaintext(bytes).as_bytes())
        },
        Err(e) => Err(e),
    }
}

async fn send_within(sink: &mut FrameSink, bytes: Vec<u8>, limit: Duration) -> Result<()> {
    match tokio::time::timeout(limit, sink.send(bytes)).await {
        Ok(result) => result,
        Err(_) => Err(ChatLinkError::Transport(format!("send timed out after {limit:?}"))),
    }
}

async fn wait_closed(close_rx: &mut watch::Receiver<Option<String>>) {
    loop {
        if close_rx.borrow_and_update().is_some() {
            return;
        }
        if close_rx.changed().await.is_err() {
            return;
        }
    }
}
