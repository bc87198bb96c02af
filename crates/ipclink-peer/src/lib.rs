//! Channel-based IPC between two peers sharing a whole-message pipe.
//!
//! A channel is a small named service: request/response commands plus push
//! events. The [`ChannelServer`] half demultiplexes inbound requests to
//! registered [`ServerChannel`] implementations; the [`ChannelClient`] half
//! correlates requests with responses and hands out typed proxies. An
//! [`IpcServer`] manages many connected peers and routes logical channel
//! operations via a pluggable [`ClientRouter`]; an [`IpcClient`] is the
//! symmetric endpoint on the other side.
//!
//! Requests for channels that have not been registered yet are queued and
//! drained on registration; calls are cancellable before and after the
//! request crosses the wire; event subscriptions activate lazily on the
//! first subscriber and tear down on the last.

pub mod adapters;
pub mod channel;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod hub;
pub mod router;
pub mod server;

pub use adapters::{DelayedChannel, NextTickChannel};
pub use channel::{Channel, ChannelRef, Context, ServerChannel};
pub use client::{ChannelClient, ChannelProxy, ClientState};
pub use endpoint::IpcClient;
pub use error::{IpcError, Result};
pub use events::{Event, Subscription};
pub use hub::{ClientConnectionEvent, Connection, ConnectionHub, IpcServer, RoutedChannel};
pub use router::{ClientRouter, StaticRouter};
pub use server::{ChannelServer, DEFAULT_PENDING_TIMEOUT};
