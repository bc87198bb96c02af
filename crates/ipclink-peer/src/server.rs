use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ipclink_transport::MessagePassingProtocol;
use ipclink_wire::{
    decode_message, encode_response, Message, RemoteError, Request, Response,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::ServerChannel;
use crate::error::{IpcError, Result};

/// How long a request for an unregistered channel waits before it is
/// rejected with an "Unknown channel" error.
pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_millis(1000);

enum ActiveRequest {
    /// An in-flight command; disposing cancels the service's token.
    Call { cancel: CancellationToken },
    /// A live event subscription; disposing stops the forwarder.
    Subscription { task: JoinHandle<()> },
}

impl ActiveRequest {
    fn dispose(self) {
        match self {
            ActiveRequest::Call { cancel } => cancel.cancel(),
            ActiveRequest::Subscription { task } => task.abort(),
        }
    }
}

struct PendingEntry {
    request: Request,
    timeout: Option<JoinHandle<()>>,
}

pub(crate) struct ServerInner<C> {
    protocol: Arc<dyn MessagePassingProtocol>,
    ctx: C,
    timeout: Duration,
    channels: Mutex<HashMap<String, Arc<dyn ServerChannel<C>>>>,
    active: Mutex<HashMap<u32, ActiveRequest>>,
    pending: Mutex<HashMap<String, Vec<PendingEntry>>>,
    drains: mpsc::UnboundedSender<String>,
}

/// The serving half of a connection.
///
/// Demultiplexes inbound requests to registered channels, tracks in-flight
/// calls and live subscriptions for cancellation, and queues requests for
/// channels that have not been registered yet. Immediately after
/// construction it advertises readiness to the peer with an `Initialize`
/// frame.
pub struct ChannelServer<C: Send + Sync + 'static> {
    inner: Arc<ServerInner<C>>,
    pump: JoinHandle<()>,
}

impl<C: Send + Sync + 'static> ChannelServer<C> {
    /// Create a server that owns the protocol's inbound stream.
    pub fn new(protocol: Arc<dyn MessagePassingProtocol>, ctx: C) -> Result<Self> {
        Self::with_timeout(protocol, ctx, DEFAULT_PENDING_TIMEOUT)
    }

    /// Create a server with an explicit pending-request timeout.
    pub fn with_timeout(
        protocol: Arc<dyn MessagePassingProtocol>,
        ctx: C,
        timeout: Duration,
    ) -> Result<Self> {
        let mut incoming = protocol
            .take_incoming()
            .ok_or(IpcError::TransportConsumed)?;
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(raw) = incoming.recv().await {
                match decode_message(raw) {
                    Ok(Message::Request(request)) => {
                        if request_tx.send(request).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Response(_)) => {} // other direction; not ours
                    Err(err) => warn!(error = %err, "dropping undecodable frame"),
                }
            }
        });
        Ok(Self::from_parts(protocol, request_rx, ctx, timeout))
    }

    /// Assemble a server from an already-demultiplexed request stream.
    pub(crate) fn from_parts(
        protocol: Arc<dyn MessagePassingProtocol>,
        requests: mpsc::UnboundedReceiver<Request>,
        ctx: C,
        timeout: Duration,
    ) -> Self {
        let (drains, drain_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ServerInner {
            protocol,
            ctx,
            timeout,
            channels: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            drains,
        });
        // Advertise readiness before any request can be handled.
        inner.send_response(&Response::Initialize);
        let pump = tokio::spawn(pump_requests(Arc::clone(&inner), requests, drain_rx));
        Self { inner, pump }
    }

    /// Register a channel implementation under `name`.
    ///
    /// Requests queued for the name are drained on the dispatch task, never
    /// synchronously inside this call.
    pub fn register_channel(&self, name: impl Into<String>, channel: Arc<dyn ServerChannel<C>>) {
        let name = name.into();
        self.inner.channels.lock().insert(name.clone(), channel);
        let _ = self.inner.drains.send(name);
    }

    /// Look up a registered channel by name.
    pub fn get_server_channel(&self, name: &str) -> Option<Arc<dyn ServerChannel<C>>> {
        self.inner.channels.lock().get(name).cloned()
    }

    /// Detach from the transport and release every in-flight operation.
    pub fn dispose(&self) {
        self.pump.abort();
        for (_, active) in self.inner.active.lock().drain() {
            active.dispose();
        }
        for (_, queue) in self.inner.pending.lock().drain() {
            for entry in queue {
                if let Some(timeout) = entry.timeout {
                    timeout.abort();
                }
            }
        }
        self.inner.channels.lock().clear();
    }
}

impl<C: Send + Sync + 'static> Drop for ChannelServer<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn pump_requests<C: Send + Sync + 'static>(
    inner: Arc<ServerInner<C>>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut drains: mpsc::UnboundedReceiver<String>,
) {
    loop {
        tokio::select! {
            biased;
            Some(name) = drains.recv() => inner.drain_pending(&name),
            request = requests.recv() => match request {
                Some(request) => inner.handle_request(request),
                None => break,
            },
        }
    }
}

impl<C: Send + Sync + 'static> ServerInner<C> {
    fn send_response(&self, response: &Response) {
        match encode_response(response) {
            Ok(frame) => self.protocol.send(frame),
            Err(err) => warn!(error = %err, "failed encoding response"),
        }
    }

    fn handle_request(self: &Arc<Self>, request: Request) {
        match request {
            Request::Promise { .. } | Request::EventListen { .. } => self.dispatch(request),
            Request::PromiseCancel { id } | Request::EventDispose { id } => {
                // Unknown ids are silently ignored.
                if let Some(active) = self.active.lock().remove(&id) {
                    debug!(id, "disposing active request");
                    active.dispose();
                }
            }
        }
    }

    fn dispatch(self: &Arc<Self>, request: Request) {
        let channel_name = match &request {
            Request::Promise { channel, .. } | Request::EventListen { channel, .. } => {
                channel.clone()
            }
            _ => return,
        };

        let channel = self.channels.lock().get(&channel_name).cloned();
        // A non-empty queue means an undrained backlog; joining it keeps
        // arrival order across the registration boundary.
        let queue_busy = self
            .pending
            .lock()
            .get(&channel_name)
            .is_some_and(|queue| !queue.is_empty());

        match channel {
            Some(channel) if !queue_busy => self.invoke(channel, request),
            _ => self.queue_pending(channel_name, request),
        }
    }

    fn invoke(self: &Arc<Self>, channel: Arc<dyn ServerChannel<C>>, request: Request) {
        match request {
            Request::Promise { id, name, arg, .. } => {
                let cancel = CancellationToken::new();
                self.active.lock().insert(
                    id,
                    ActiveRequest::Call {
                        cancel: cancel.clone(),
                    },
                );
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    let result = channel.call(&inner.ctx, &name, arg, cancel).await;
                    let response = match result {
                        Ok(data) => Response::PromiseSuccess { id, data },
                        Err(IpcError::RemoteObject(data)) => Response::PromiseErrorObj { id, data },
                        Err(err) => Response::PromiseError {
                            id,
                            data: err.into_remote(),
                        },
                    };
                    inner.send_response(&response);
                    inner.active.lock().remove(&id);
                });
            }
            Request::EventListen { id, name, arg, channel: channel_name } => {
                match channel.listen(&self.ctx, &name, arg) {
                    Ok(mut emissions) => {
                        let inner = Arc::clone(self);
                        let task = tokio::spawn(async move {
                            loop {
                                match emissions.recv().await {
                                    Ok(data) => {
                                        inner.send_response(&Response::EventFire { id, data })
                                    }
                                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                        warn!(id, skipped, "event subscription lagged");
                                    }
                                    Err(broadcast::error::RecvError::Closed) => break,
                                }
                            }
                        });
                        self.active
                            .lock()
                            .insert(id, ActiveRequest::Subscription { task });
                    }
                    // No response shape exists for a failed subscription;
                    // log and install nothing.
                    Err(err) => warn!(
                        channel = %channel_name,
                        event = %name,
                        error = %err,
                        "listen rejected; dropping subscription"
                    ),
                }
            }
            _ => {}
        }
    }

    fn queue_pending(self: &Arc<Self>, channel_name: String, request: Request) {
        let timeout = match &request {
            Request::Promise { id, .. } => {
                let id = *id;
                let inner = Arc::clone(self);
                let name = channel_name.clone();
                let delay = self.timeout;
                Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.expire_pending(&name, id, delay);
                }))
            }
            // Subscriptions wait for registration indefinitely: there is no
            // response shape an event listener accepts an error through.
            _ => None,
        };

        debug!(
            channel = %channel_name,
            id = request.id(),
            "queueing request for unregistered channel"
        );
        self.pending
            .lock()
            .entry(channel_name)
            .or_default()
            .push(PendingEntry { request, timeout });
    }

    fn expire_pending(&self, channel_name: &str, id: u32, delay: Duration) {
        {
            let mut pending = self.pending.lock();
            let Some(queue) = pending.get_mut(channel_name) else {
                return;
            };
            let Some(at) = queue.iter().position(|entry| entry.request.id() == id) else {
                return;
            };
            queue.remove(at);
            if queue.is_empty() {
                pending.remove(channel_name);
            }
        }

        warn!(channel = %channel_name, id, "pending request timed out");
        self.send_response(&Response::PromiseError {
            id,
            data: RemoteError::new(
                "Unknown channel",
                format!(
                    "Channel name '{channel_name}' timed out after {}ms",
                    delay.as_millis()
                ),
            ),
        });
    }

    fn drain_pending(self: &Arc<Self>, name: &str) {
        let Some(queue) = self.pending.lock().remove(name) else {
            return;
        };
        let Some(channel) = self.channels.lock().get(name).cloned() else {
            warn!(channel = name, "drain requested for unregistered channel");
            return;
        };

        debug!(channel = name, drained = queue.len(), "draining pending requests");
        for entry in queue {
            if let Some(timeout) = entry.timeout {
                timeout.abort();
            }
            self.invoke(Arc::clone(&channel), entry.request);
        }
    }
}
