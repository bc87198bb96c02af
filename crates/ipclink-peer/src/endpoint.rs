use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use ipclink_transport::MessagePassingProtocol;
use ipclink_wire::{
    decode_message, read_value, write_value, Message, Request, Response, Value, WireError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::channel::{Context, ServerChannel};
use crate::client::{ChannelClient, ChannelProxy};
use crate::error::{IpcError, Result};
use crate::server::{ChannelServer, DEFAULT_PENDING_TIMEOUT};

/// Serialize a connection context as the single-value handshake frame.
pub(crate) fn encode_context<C: Context>(ctx: &C) -> Result<Bytes> {
    let json = serde_json::to_value(ctx).map_err(WireError::from)?;
    // A string context travels through the string tag, anything else
    // through the JSON object case.
    let value = match json {
        serde_json::Value::String(s) => Value::String(s),
        other => Value::Object(other),
    };
    let mut buf = BytesMut::new();
    write_value(&value, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode the single-value handshake frame back into a context.
pub(crate) fn decode_context<C: Context>(raw: Bytes) -> Result<C> {
    let mut bytes = raw;
    let json = match read_value(&mut bytes)? {
        Value::String(s) => serde_json::Value::String(s),
        Value::Object(json) => json,
        other => {
            return Err(IpcError::Wire(WireError::MalformedHeader(format!(
                "context must be a string or object, got {other:?}"
            ))))
        }
    };
    Ok(serde_json::from_value(json).map_err(WireError::from)?)
}

/// Split one raw inbound stream into its request and response directions.
///
/// Both halves of a symmetric endpoint share a single pipe; this is the one
/// task that reads it. Undecodable frames are logged and dropped.
pub(crate) fn spawn_demux(
    mut raw: mpsc::UnboundedReceiver<Bytes>,
) -> (
    JoinHandle<()>,
    mpsc::UnboundedReceiver<Request>,
    mpsc::UnboundedReceiver<Response>,
) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        while let Some(frame) = raw.recv().await {
            match decode_message(frame) {
                Ok(Message::Request(request)) => {
                    let _ = request_tx.send(request);
                }
                Ok(Message::Response(response)) => {
                    let _ = response_tx.send(response);
                }
                Err(err) => warn!(error = %err, "dropping undecodable frame"),
            }
        }
    });
    (task, request_rx, response_rx)
}

/// A symmetric endpoint: one channel client and one channel server sharing
/// a single transport.
///
/// Construction sends the context handshake as the first frame on the wire;
/// the accepting hub consumes it before wiring up its own halves.
pub struct IpcClient<C: Context> {
    server: ChannelServer<C>,
    client: ChannelClient,
    demux: JoinHandle<()>,
}

impl<C: Context> IpcClient<C> {
    /// Connect both halves over `protocol`, introducing ourselves as `ctx`.
    pub fn new(protocol: Arc<dyn MessagePassingProtocol>, ctx: C) -> Result<Self> {
        let raw = protocol
            .take_incoming()
            .ok_or(IpcError::TransportConsumed)?;
        // The context handshake precedes everything, including the server
        // half's Initialize frame.
        protocol.send(encode_context(&ctx)?);

        let (demux, requests, responses) = spawn_demux(raw);
        let client = ChannelClient::from_parts(Arc::clone(&protocol), responses);
        let server = ChannelServer::from_parts(protocol, requests, ctx, DEFAULT_PENDING_TIMEOUT);

        Ok(Self {
            server,
            client,
            demux,
        })
    }

    /// A proxy for a channel hosted by the peer.
    pub fn get_channel(&self, name: impl Into<String>) -> ChannelProxy {
        self.client.get_channel(name)
    }

    /// Host a channel for the peer to call.
    pub fn register_channel(&self, name: impl Into<String>, channel: Arc<dyn ServerChannel<C>>) {
        self.server.register_channel(name, channel);
    }

    /// The requesting half.
    pub fn client(&self) -> &ChannelClient {
        &self.client
    }

    /// The serving half.
    pub fn server(&self) -> &ChannelServer<C> {
        &self.server
    }

    /// Tear down both halves and the shared demultiplexer.
    pub fn dispose(&self) {
        self.demux.abort();
        self.client.dispose();
        self.server.dispose();
    }
}

impl<C: Context> Drop for IpcClient<C> {
    fn drop(&mut self) {
        self.demux.abort();
    }
}
