use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ipclink_transport::MessagePassingProtocol;
use ipclink_wire::{decode_message, encode_request, Message, Request, Response, Value};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::error::{IpcError, Result};
use crate::events::{Event, EventBinding};

/// Lifecycle of a channel client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No `Initialize` frame has arrived yet; requests buffer.
    Uninitialized,
    /// The peer advertised readiness; requests flow.
    Idle,
    /// The client was disposed or the peer went away.
    Disposed,
}

enum ResponseHandler {
    Call(oneshot::Sender<Response>),
    Event(broadcast::Sender<Value>),
}

pub(crate) struct ClientInner {
    protocol: Arc<dyn MessagePassingProtocol>,
    next_request_id: AtomicU32,
    handlers: Mutex<HashMap<u32, ResponseHandler>>,
    state: watch::Sender<ClientState>,
}

/// The requesting half of a connection.
///
/// Allocates correlation ids, sends requests, and matches responses back to
/// their pending futures or event fan-outs. Obtain typed access through
/// [`get_channel`](ChannelClient::get_channel); the proxy is stateless and
/// performs no validation that the peer actually hosts the channel.
pub struct ChannelClient {
    inner: Arc<ClientInner>,
    pump: JoinHandle<()>,
}

impl ChannelClient {
    /// Create a client that owns the protocol's inbound stream.
    ///
    /// Frames for the opposite direction (requests from the peer) are
    /// ignored; use an [`IpcClient`](crate::endpoint::IpcClient) when both
    /// halves share one pipe.
    pub fn new(protocol: Arc<dyn MessagePassingProtocol>) -> Result<Self> {
        let mut incoming = protocol
            .take_incoming()
            .ok_or(IpcError::TransportConsumed)?;
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(raw) = incoming.recv().await {
                match decode_message(raw) {
                    Ok(Message::Response(response)) => {
                        let _ = response_tx.send(response);
                    }
                    Ok(Message::Request(_)) => {} // other direction; not ours
                    Err(err) => warn!(error = %err, "dropping undecodable frame"),
                }
            }
        });
        Ok(Self::from_parts(protocol, response_rx))
    }

    /// Assemble a client from an already-demultiplexed response stream.
    pub(crate) fn from_parts(
        protocol: Arc<dyn MessagePassingProtocol>,
        responses: mpsc::UnboundedReceiver<Response>,
    ) -> Self {
        let (state, _) = watch::channel(ClientState::Uninitialized);
        let inner = Arc::new(ClientInner {
            protocol,
            next_request_id: AtomicU32::new(0),
            handlers: Mutex::new(HashMap::new()),
            state,
        });
        let pump = tokio::spawn(pump_responses(Arc::clone(&inner), responses));
        Self { inner, pump }
    }

    /// A stateless proxy for the named channel on the peer.
    pub fn get_channel(&self, name: impl Into<String>) -> ChannelProxy {
        ChannelProxy {
            inner: Arc::clone(&self.inner),
            name: name.into(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    /// Resolves once the peer's `Initialize` frame has been seen.
    pub async fn when_initialized(&self) -> Result<()> {
        self.inner.when_initialized().await
    }

    /// Detach from the transport and fail all in-flight operations.
    pub fn dispose(&self) {
        self.pump.abort();
        self.inner.teardown();
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn pump_responses(inner: Arc<ClientInner>, mut responses: mpsc::UnboundedReceiver<Response>) {
    while let Some(response) = responses.recv().await {
        inner.handle_response(response);
    }
    // Response stream gone: the peer disconnected.
    inner.teardown();
}

impl ClientInner {
    fn handle_response(&self, response: Response) {
        match response {
            Response::Initialize => {
                // Gated: a duplicate Initialize from a misbehaving peer is
                // ignored after the first transition.
                let changed = self.state.send_if_modified(|state| {
                    if *state == ClientState::Uninitialized {
                        *state = ClientState::Idle;
                        true
                    } else {
                        false
                    }
                });
                if changed {
                    debug!("channel client initialized");
                }
            }
            Response::EventFire { id, data } => {
                let handlers = self.handlers.lock();
                match handlers.get(&id) {
                    Some(ResponseHandler::Event(fan)) => {
                        // No live subscribers is fine; the fan-out buffers.
                        let _ = fan.send(data);
                    }
                    _ => debug!(id, "dropping event for unknown subscription"),
                }
            }
            terminal => {
                let id = terminal.id().unwrap_or_default();
                let mut handlers = self.handlers.lock();
                match handlers.get(&id) {
                    Some(ResponseHandler::Call(_)) => {
                        if let Some(ResponseHandler::Call(tx)) = handlers.remove(&id) {
                            drop(handlers);
                            let _ = tx.send(terminal);
                        }
                    }
                    Some(ResponseHandler::Event(_)) => {
                        warn!(id, "dropping terminal response addressed to a subscription");
                    }
                    // Late arrival after cancellation or a duplicate
                    // terminal: at most one response is acted upon.
                    None => debug!(id, "dropping response for unknown request id"),
                }
            }
        }
    }

    pub(crate) async fn when_initialized(&self) -> Result<()> {
        let mut state = self.state.subscribe();
        let seen = state
            .wait_for(|state| *state != ClientState::Uninitialized)
            .await
            .map_err(|_| IpcError::Disconnected)?;
        match *seen {
            ClientState::Disposed => Err(IpcError::Disconnected),
            _ => Ok(()),
        }
    }

    fn teardown(&self) {
        self.state.send_replace(ClientState::Disposed);
        // Dropping call handlers settles their futures with Disconnected.
        self.handlers.lock().clear();
    }

    async fn call(
        self: &Arc<Self>,
        channel: &str,
        command: &str,
        arg: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value> {
        if let Some(token) = &cancel {
            if token.is_cancelled() {
                return Err(IpcError::Canceled);
            }
        }

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);

        // Requests buffer until the peer advertises readiness. Cancelling
        // here drops the request without any traffic.
        tokio::select! {
            initialized = self.when_initialized() => initialized?,
            _ = cancelled(cancel.as_ref()) => return Err(IpcError::Canceled),
        }

        let (tx, rx) = oneshot::channel();
        self.handlers.lock().insert(id, ResponseHandler::Call(tx));

        let frame = encode_request(&Request::Promise {
            id,
            channel: channel.to_string(),
            name: command.to_string(),
            arg,
        })?;
        self.protocol.send(frame);

        let response = tokio::select! {
            response = rx => response,
            _ = cancelled(cancel.as_ref()) => {
                self.handlers.lock().remove(&id);
                if let Ok(frame) = encode_request(&Request::PromiseCancel { id }) {
                    self.protocol.send(frame);
                }
                return Err(IpcError::Canceled);
            }
        };

        match response {
            Ok(Response::PromiseSuccess { data, .. }) => Ok(data),
            Ok(Response::PromiseError { data, .. }) => Err(IpcError::Remote(data)),
            Ok(Response::PromiseErrorObj { data, .. }) => Err(IpcError::RemoteObject(data)),
            Ok(_) | Err(_) => Err(IpcError::Disconnected),
        }
    }

    fn listen(self: &Arc<Self>, channel: &str, event: &str, arg: Value) -> Event {
        let inner = Arc::clone(self);
        let channel = channel.to_string();
        let event = event.to_string();
        Event::new(move |fan| {
            Box::new(WireBinding::activate(
                Arc::clone(&inner),
                channel.clone(),
                event.clone(),
                arg.clone(),
                fan,
            ))
        })
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Wire resources behind one active remote event subscription.
struct WireBinding {
    inner: Arc<ClientInner>,
    id: u32,
    sent: Arc<AtomicBool>,
    setup: JoinHandle<()>,
}

impl WireBinding {
    fn activate(
        inner: Arc<ClientInner>,
        channel: String,
        event: String,
        arg: Value,
        fan: broadcast::Sender<Value>,
    ) -> Self {
        let id = inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        inner.handlers.lock().insert(id, ResponseHandler::Event(fan));

        let sent = Arc::new(AtomicBool::new(false));
        let setup = tokio::spawn({
            let inner = Arc::clone(&inner);
            let sent = Arc::clone(&sent);
            async move {
                if inner.when_initialized().await.is_err() {
                    return;
                }
                sent.store(true, Ordering::SeqCst);
                match encode_request(&Request::EventListen {
                    id,
                    channel,
                    name: event,
                    arg,
                }) {
                    Ok(frame) => inner.protocol.send(frame),
                    Err(err) => warn!(error = %err, "failed encoding event subscription"),
                }
            }
        });

        Self {
            inner,
            id,
            sent,
            setup,
        }
    }
}

impl EventBinding for WireBinding {
    fn deactivate(self: Box<Self>) {
        // Still waiting on initialization: cancel the wait, nothing was sent.
        self.setup.abort();
        self.inner.handlers.lock().remove(&self.id);
        if self.sent.load(Ordering::SeqCst) {
            if let Ok(frame) = encode_request(&Request::EventDispose { id: self.id }) {
                self.inner.protocol.send(frame);
            }
        }
    }
}

/// A stateless handle to one named channel on the peer.
#[derive(Clone)]
pub struct ChannelProxy {
    inner: Arc<ClientInner>,
    name: String,
}

impl ChannelProxy {
    /// The channel name this proxy addresses.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke a command on the remote channel.
    pub async fn call(
        &self,
        command: &str,
        arg: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value> {
        self.inner.call(&self.name, command, arg, cancel).await
    }

    /// Subscribe to an event on the remote channel.
    pub fn listen(&self, event: &str, arg: Value) -> Event {
        self.inner.listen(&self.name, event, arg)
    }
}

#[async_trait]
impl Channel for ChannelProxy {
    async fn call(
        &self,
        command: &str,
        arg: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value> {
        ChannelProxy::call(self, command, arg, cancel).await
    }

    fn listen(&self, event: &str, arg: Value) -> Event {
        ChannelProxy::listen(self, event, arg)
    }
}
