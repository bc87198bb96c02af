use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ipclink_transport::MessagePassingProtocol;
use ipclink_wire::Value;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapters::DelayedChannel;
use crate::channel::{Channel, ChannelRef, Context, ServerChannel};
use crate::client::ChannelClient;
use crate::endpoint::{decode_context, spawn_demux};
use crate::error::{IpcError, Result};
use crate::events::Event;
use crate::router::ClientRouter;
use crate::server::{ChannelServer, DEFAULT_PENDING_TIMEOUT};

/// A freshly accepted transport, before the context handshake.
pub struct ClientConnectionEvent {
    pub protocol: Arc<dyn MessagePassingProtocol>,
    /// Cancelled when the peer goes away.
    pub disconnected: CancellationToken,
}

/// One attached peer: its context and both IPC halves.
pub struct Connection<C: Context> {
    pub ctx: C,
    pub server: ChannelServer<C>,
    pub client: ChannelClient,
}

struct HubInner<C: Context> {
    connections: Mutex<Vec<Arc<Connection<C>>>>,
    channels: Mutex<HashMap<String, Arc<dyn ServerChannel<C>>>>,
    changed: broadcast::Sender<()>,
}

/// A view over the hub's live connections, handed to routers.
pub struct ConnectionHub<C: Context> {
    inner: Arc<HubInner<C>>,
}

impl<C: Context> Clone for ConnectionHub<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Context> ConnectionHub<C> {
    /// Snapshot of the current connections.
    pub fn connections(&self) -> Vec<Arc<Connection<C>>> {
        self.inner.connections.lock().clone()
    }

    /// Notified on every connect and disconnect.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<()> {
        self.inner.changed.subscribe()
    }
}

/// The connection hub: manages many connected peers and routes logical
/// channel operations to one of them.
///
/// Each accepted connection contributes a full symmetric endpoint: the hub
/// serves its registered channels to the peer and can call channels the
/// peer hosts.
pub struct IpcServer<C: Context> {
    hub: ConnectionHub<C>,
    intake: JoinHandle<()>,
}

impl<C: Context> IpcServer<C> {
    /// Start a hub consuming connection events from `incoming`.
    pub fn new(mut incoming: mpsc::UnboundedReceiver<ClientConnectionEvent>) -> Self {
        let (changed, _) = broadcast::channel(16);
        let hub = ConnectionHub {
            inner: Arc::new(HubInner {
                connections: Mutex::new(Vec::new()),
                channels: Mutex::new(HashMap::new()),
                changed,
            }),
        };

        let intake = tokio::spawn({
            let hub = hub.clone();
            async move {
                while let Some(event) = incoming.recv().await {
                    tokio::spawn(accept_connection(hub.clone(), event));
                }
            }
        });

        Self { hub, intake }
    }

    /// Register a channel on the hub and on every attached peer.
    pub fn register_channel(&self, name: impl Into<String>, channel: Arc<dyn ServerChannel<C>>) {
        let name = name.into();
        self.hub
            .inner
            .channels
            .lock()
            .insert(name.clone(), Arc::clone(&channel));
        for connection in self.hub.connections() {
            connection
                .server
                .register_channel(name.clone(), Arc::clone(&channel));
        }
    }

    /// A channel whose every operation is routed to one connected peer.
    pub fn get_channel(
        &self,
        name: impl Into<String>,
        router: Arc<dyn ClientRouter<C>>,
    ) -> RoutedChannel<C> {
        RoutedChannel {
            hub: self.hub.clone(),
            name: name.into(),
            router,
        }
    }

    /// The router-facing view of this hub.
    pub fn hub(&self) -> &ConnectionHub<C> {
        &self.hub
    }

    /// Snapshot of the current connections.
    pub fn connections(&self) -> Vec<Arc<Connection<C>>> {
        self.hub.connections()
    }

    /// Stop accepting and tear down every connection.
    pub fn dispose(&self) {
        self.intake.abort();
        let connections: Vec<_> = self.hub.inner.connections.lock().drain(..).collect();
        for connection in connections {
            connection.server.dispose();
            connection.client.dispose();
        }
        let _ = self.hub.inner.changed.send(());
    }
}

impl<C: Context> Drop for IpcServer<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn accept_connection<C: Context>(hub: ConnectionHub<C>, event: ClientConnectionEvent) {
    let Some(mut raw) = event.protocol.take_incoming() else {
        warn!("connection transport already consumed");
        return;
    };

    // The first message on a new transport is the peer context.
    let Some(first) = raw.recv().await else {
        debug!("connection closed before context handshake");
        return;
    };
    let ctx: C = match decode_context(first) {
        Ok(ctx) => ctx,
        Err(err) => {
            warn!(error = %err, "dropping connection with invalid context handshake");
            return;
        }
    };

    let (demux, requests, responses) = spawn_demux(raw);
    let server = ChannelServer::from_parts(
        Arc::clone(&event.protocol),
        requests,
        ctx.clone(),
        DEFAULT_PENDING_TIMEOUT,
    );
    let client = ChannelClient::from_parts(Arc::clone(&event.protocol), responses);

    // A late joiner gets every channel already registered on the hub.
    for (name, channel) in hub.inner.channels.lock().iter() {
        server.register_channel(name.clone(), Arc::clone(channel));
    }

    let connection = Arc::new(Connection {
        ctx,
        server,
        client,
    });
    hub.inner.connections.lock().push(Arc::clone(&connection));
    let _ = hub.inner.changed.send(());
    debug!("peer connection added to hub");

    event.disconnected.cancelled().await;

    demux.abort();
    {
        let mut connections = hub.inner.connections.lock();
        if let Some(at) = connections
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, &connection))
        {
            connections.remove(at);
        }
    }
    connection.server.dispose();
    connection.client.dispose();
    let _ = hub.inner.changed.send(());
    debug!("peer connection removed from hub");
}

/// A channel facade that picks a peer per operation via a router.
pub struct RoutedChannel<C: Context> {
    hub: ConnectionHub<C>,
    name: String,
    router: Arc<dyn ClientRouter<C>>,
}

enum RouteKind {
    Call,
    Event,
}

impl<C: Context> RoutedChannel<C> {
    fn route(&self, kind: RouteKind, name: &str, arg: &Value) -> DelayedChannel {
        let hub = self.hub.clone();
        let router = Arc::clone(&self.router);
        let channel_name = self.name.clone();
        let name = name.to_string();
        let arg = arg.clone();
        DelayedChannel::new(async move {
            let routed = match kind {
                RouteKind::Call => router.route_call(&hub, &name, &arg).await,
                RouteKind::Event => router.route_event(&hub, &name, &arg).await,
            };
            match routed {
                Ok(connection) => {
                    Arc::new(connection.client.get_channel(channel_name)) as ChannelRef
                }
                Err(err) => {
                    warn!(error = %err, "routing failed");
                    Arc::new(DeadChannel) as ChannelRef
                }
            }
        })
    }
}

#[async_trait]
impl<C: Context> Channel for RoutedChannel<C> {
    async fn call(
        &self,
        command: &str,
        arg: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value> {
        let delayed = self.route(RouteKind::Call, command, &arg);
        delayed.call(command, arg, cancel).await
    }

    fn listen(&self, event: &str, arg: Value) -> Event {
        let delayed = self.route(RouteKind::Event, event, &arg);
        delayed.listen(event, arg)
    }
}

/// Stands in for a connection the router could not produce.
struct DeadChannel;

#[async_trait]
impl Channel for DeadChannel {
    async fn call(
        &self,
        _command: &str,
        _arg: Value,
        _cancel: Option<CancellationToken>,
    ) -> Result<Value> {
        Err(IpcError::Disconnected)
    }

    fn listen(&self, _event: &str, _arg: Value) -> Event {
        Event::new(|_fan| {
            struct Nothing;
            impl crate::events::EventBinding for Nothing {
                fn deactivate(self: Box<Self>) {}
            }
            Box::new(Nothing)
        })
    }
}
