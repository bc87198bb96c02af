use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use ipclink_wire::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelRef};
use crate::error::Result;
use crate::events::{Event, EventBinding};

/// A channel synthesized from a future channel.
///
/// Callers use it immediately; every operation chains on the future. Events
/// are relayed: the handle exists up front, and once the future resolves
/// the underlying subscription is bound to it.
pub struct DelayedChannel {
    channel: Shared<BoxFuture<'static, ChannelRef>>,
}

impl DelayedChannel {
    pub fn new(future: impl std::future::Future<Output = ChannelRef> + Send + 'static) -> Self {
        Self {
            channel: future.boxed().shared(),
        }
    }
}

#[async_trait]
impl Channel for DelayedChannel {
    async fn call(
        &self,
        command: &str,
        arg: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value> {
        let channel = self.channel.clone().await;
        channel.call(command, arg, cancel).await
    }

    fn listen(&self, event: &str, arg: Value) -> Event {
        let future = self.channel.clone();
        let event_name = event.to_string();
        Event::new(move |fan| {
            let future = future.clone();
            let event_name = event_name.clone();
            let arg = arg.clone();
            let task = tokio::spawn(async move {
                let channel = future.await;
                let inner = channel.listen(&event_name, arg);
                let mut subscription = inner.subscribe();
                while let Some(value) = subscription.recv().await {
                    let _ = fan.send(value);
                }
            });
            Box::new(RelayBinding { task })
        })
    }
}

/// Keeps the relay task (and through it the inner subscription) alive.
struct RelayBinding {
    task: JoinHandle<()>,
}

impl EventBinding for RelayBinding {
    fn deactivate(self: Box<Self>) {
        // Dropping the task drops the inner subscription, which releases
        // the underlying wire subscription in turn.
        self.task.abort();
    }
}

/// A channel that defers its first operation by one scheduler tick.
///
/// Lets a transport finish its same-tick setup before the first request
/// goes out; every later operation proxies straight through.
pub struct NextTickChannel {
    inner: ChannelRef,
    ticked: Arc<AtomicBool>,
}

impl NextTickChannel {
    pub fn new(inner: ChannelRef) -> Self {
        Self {
            inner,
            ticked: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Channel for NextTickChannel {
    async fn call(
        &self,
        command: &str,
        arg: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value> {
        if !self.ticked.swap(true, Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.inner.call(command, arg, cancel).await
    }

    fn listen(&self, event: &str, arg: Value) -> Event {
        let inner = Arc::clone(&self.inner);
        let ticked = Arc::clone(&self.ticked);
        DelayedChannel::new(async move {
            if !ticked.swap(true, Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
            inner
        })
        .listen(event, arg)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::broadcast;
    use tokio::sync::oneshot;

    use super::*;

    /// Records calls and exposes a manually fired event.
    struct ProbeChannel {
        calls: AtomicUsize,
        emissions: broadcast::Sender<Value>,
    }

    impl ProbeChannel {
        fn new() -> (Arc<Self>, broadcast::Sender<Value>) {
            let (emissions, _) = broadcast::channel(16);
            (
                Arc::new(Self {
                    calls: AtomicUsize::new(0),
                    emissions: emissions.clone(),
                }),
                emissions,
            )
        }
    }

    #[async_trait]
    impl Channel for ProbeChannel {
        async fn call(
            &self,
            _command: &str,
            arg: Value,
            _cancel: Option<CancellationToken>,
        ) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(arg)
        }

        fn listen(&self, _event: &str, _arg: Value) -> Event {
            let emissions = self.emissions.clone();
            Event::new(move |fan| {
                let mut rx = emissions.subscribe();
                let task = tokio::spawn(async move {
                    while let Ok(value) = rx.recv().await {
                        let _ = fan.send(value);
                    }
                });
                struct Forwarder {
                    task: JoinHandle<()>,
                }
                impl EventBinding for Forwarder {
                    fn deactivate(self: Box<Self>) {
                        self.task.abort();
                    }
                }
                Box::new(Forwarder { task })
            })
        }
    }

    #[tokio::test]
    async fn delayed_channel_buffers_calls_until_resolution() {
        let (probe, _) = ProbeChannel::new();
        let (resolve, resolved) = oneshot::channel::<()>();

        let delayed = {
            let probe = Arc::clone(&probe) as ChannelRef;
            DelayedChannel::new(async move {
                let _ = resolved.await;
                probe
            })
        };

        let call = tokio::spawn(async move {
            delayed
                .call("echo", Value::String("hi".to_string()), None)
                .await
        });

        // The call must not reach the target before the future resolves.
        tokio::task::yield_now().await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);

        resolve.send(()).unwrap();
        let result = call.await.unwrap().unwrap();
        assert_eq!(result.as_str(), Some("hi"));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delayed_channel_relays_events() {
        let (probe, emissions) = ProbeChannel::new();
        let delayed = {
            let probe = Arc::clone(&probe) as ChannelRef;
            DelayedChannel::new(async move { probe })
        };

        let event = delayed.listen("tick", Value::Undefined);
        let mut subscription = event.subscribe();

        // Let the relay bind before firing.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        emissions.send(Value::Object(serde_json::json!(1))).unwrap();

        let value = subscription.recv().await.unwrap();
        assert_eq!(value, Value::Object(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn next_tick_channel_defers_only_first_operation() {
        let (probe, _) = ProbeChannel::new();
        let channel = NextTickChannel::new(Arc::clone(&probe) as ChannelRef);

        channel.call("a", Value::Undefined, None).await.unwrap();
        channel.call("b", Value::Undefined, None).await.unwrap();

        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert!(channel.ticked.load(Ordering::SeqCst));
    }
}
