use std::sync::Arc;

use async_trait::async_trait;
use ipclink_wire::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::Event;

/// A per-connection peer identifier.
///
/// Exchanged once during the connection handshake and handed to every
/// service invocation; routers use it to pick a peer. A `String` is the
/// common case, but any JSON-representable type works.
pub trait Context: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static> Context for T {}

/// A shareable client-side channel handle.
pub type ChannelRef = Arc<dyn Channel>;

/// The client-side face of a channel: invoke commands, subscribe to events.
///
/// Commands and events are dispatched by name; the wire protocol knows only
/// `(channel, name)`. Type-safe facades belong a layer above this trait.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Invoke `command` with `arg`, resolving with its single result value.
    ///
    /// Cancelling the token before the request is sent drops it without
    /// traffic; cancelling after the send emits a cancel frame and rejects
    /// locally without waiting for the peer.
    async fn call(
        &self,
        command: &str,
        arg: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value>;

    /// Subscribe to `event`. The returned handle is lazily activated: the
    /// first subscriber triggers the wire subscription, the last one tears
    /// it down.
    fn listen(&self, event: &str, arg: Value) -> Event;
}

/// What a registered service implements.
///
/// The server invokes `call` for commands and `listen` for event
/// subscriptions, passing the connection context each time. Both must
/// tolerate arbitrary argument shapes; unknown names should surface as
/// errors, not panics.
#[async_trait]
pub trait ServerChannel<C: Send + Sync>: Send + Sync {
    /// Handle one command invocation. The token is cancelled if the caller
    /// cancels the request; the implementation may ignore it and complete
    /// anyway, in which case the late response is dropped client-side.
    async fn call(
        &self,
        ctx: &C,
        command: &str,
        arg: Value,
        cancel: CancellationToken,
    ) -> Result<Value>;

    /// Open one event stream. Every value received on the returned stream
    /// is forwarded to the subscriber until it disposes.
    fn listen(&self, ctx: &C, event: &str, arg: Value) -> Result<broadcast::Receiver<Value>>;
}
