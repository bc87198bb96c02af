use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use ipclink_wire::Value;
use tokio::sync::broadcast;

use crate::channel::Context;
use crate::error::{IpcError, Result};
use crate::hub::{Connection, ConnectionHub};

/// Picks which connected peer should service a logical operation.
#[async_trait]
pub trait ClientRouter<C: Context>: Send + Sync {
    async fn route_call(
        &self,
        hub: &ConnectionHub<C>,
        command: &str,
        arg: &Value,
    ) -> Result<Arc<Connection<C>>>;

    async fn route_event(
        &self,
        hub: &ConnectionHub<C>,
        event: &str,
        arg: &Value,
    ) -> Result<Arc<Connection<C>>>;
}

/// Routes every operation to the first connection whose context satisfies a
/// predicate, waiting for new connections when none match.
///
/// There is no timeout: a route parks until a matching peer joins.
pub struct StaticRouter<C, F> {
    predicate: F,
    _context: PhantomData<fn(&C)>,
}

impl<C, F> StaticRouter<C, F>
where
    C: Context,
    F: Fn(&C) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _context: PhantomData,
        }
    }

    async fn route(&self, hub: &ConnectionHub<C>) -> Result<Arc<Connection<C>>> {
        // Subscribe before scanning so a join between the scan and the wait
        // is not missed.
        let mut changes = hub.subscribe_changes();
        loop {
            for connection in hub.connections() {
                if (self.predicate)(&connection.ctx) {
                    return Ok(connection);
                }
            }
            match changes.recv().await {
                Ok(()) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Err(IpcError::Disconnected),
            }
        }
    }
}

#[async_trait]
impl<C, F> ClientRouter<C> for StaticRouter<C, F>
where
    C: Context,
    F: Fn(&C) -> bool + Send + Sync,
{
    async fn route_call(
        &self,
        hub: &ConnectionHub<C>,
        _command: &str,
        _arg: &Value,
    ) -> Result<Arc<Connection<C>>> {
        self.route(hub).await
    }

    async fn route_event(
        &self,
        hub: &ConnectionHub<C>,
        _event: &str,
        _arg: &Value,
    ) -> Result<Arc<Connection<C>>> {
        self.route(hub).await
    }
}
