use std::sync::Arc;

use ipclink_wire::Value;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

/// Fan-out buffer depth for one event stream. A slow subscriber skips
/// emissions past this depth rather than stalling the connection.
pub(crate) const EVENT_BUFFER: usize = 64;

/// The resources held by an active subscription, released when the last
/// subscriber goes away.
pub(crate) trait EventBinding: Send {
    fn deactivate(self: Box<Self>);
}

type BindFn = dyn Fn(broadcast::Sender<Value>) -> Box<dyn EventBinding> + Send + Sync;

struct EventState {
    subscribers: usize,
    binding: Option<Box<dyn EventBinding>>,
}

struct EventInner {
    fan: broadcast::Sender<Value>,
    state: Mutex<EventState>,
    bind: Box<BindFn>,
}

/// A lazily-activated multicast event.
///
/// Nothing happens until the first [`subscribe`](Event::subscribe): that is
/// when the underlying source is bound (for a remote event, when the
/// subscription frame goes out). When the last subscription is dropped the
/// binding is released — for a remote event, either the dispose frame is
/// sent or the still-pending activation is cancelled.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub(crate) fn new(
        bind: impl Fn(broadcast::Sender<Value>) -> Box<dyn EventBinding> + Send + Sync + 'static,
    ) -> Self {
        let (fan, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(EventInner {
                fan,
                state: Mutex::new(EventState {
                    subscribers: 0,
                    binding: None,
                }),
                bind: Box::new(bind),
            }),
        }
    }

    /// Attach one subscriber. Activates the event source if this is the
    /// first one.
    pub fn subscribe(&self) -> Subscription {
        let mut state = self.inner.state.lock();
        let rx = self.inner.fan.subscribe();
        state.subscribers += 1;
        if state.subscribers == 1 {
            state.binding = Some((self.inner.bind)(self.inner.fan.clone()));
        }
        drop(state);

        Subscription {
            rx,
            _guard: SubscriptionGuard {
                inner: Arc::clone(&self.inner),
            },
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers
    }
}

/// One live event subscription. Dropping it detaches the subscriber.
pub struct Subscription {
    rx: broadcast::Receiver<Value>,
    _guard: SubscriptionGuard,
}

impl Subscription {
    /// Receive the next emission, or `None` once the event source is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct SubscriptionGuard {
    inner: Arc<EventInner>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.subscribers -= 1;
        if state.subscribers == 0 {
            if let Some(binding) = state.binding.take() {
                drop(state);
                binding.deactivate();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingBinding {
        deactivations: Arc<AtomicUsize>,
    }

    impl EventBinding for CountingBinding {
        fn deactivate(self: Box<Self>) {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_event() -> (Event, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let activations = Arc::new(AtomicUsize::new(0));
        let deactivations = Arc::new(AtomicUsize::new(0));
        let event = {
            let activations = Arc::clone(&activations);
            let deactivations = Arc::clone(&deactivations);
            Event::new(move |_fan| {
                activations.fetch_add(1, Ordering::SeqCst);
                Box::new(CountingBinding {
                    deactivations: Arc::clone(&deactivations),
                })
            })
        };
        (event, activations, deactivations)
    }

    #[tokio::test]
    async fn activates_on_first_subscriber_only() {
        let (event, activations, _) = counting_event();
        assert_eq!(activations.load(Ordering::SeqCst), 0);

        let first = event.subscribe();
        let second = event.subscribe();
        assert_eq!(activations.load(Ordering::SeqCst), 1);
        assert_eq!(event.subscriber_count(), 2);

        drop(first);
        drop(second);
    }

    #[tokio::test]
    async fn deactivates_on_last_unsubscribe_only() {
        let (event, _, deactivations) = counting_event();

        let first = event.subscribe();
        let second = event.subscribe();

        drop(first);
        assert_eq!(deactivations.load(Ordering::SeqCst), 0);

        drop(second);
        assert_eq!(deactivations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reactivates_after_full_teardown() {
        let (event, activations, deactivations) = counting_event();

        drop(event.subscribe());
        drop(event.subscribe());

        assert_eq!(activations.load(Ordering::SeqCst), 2);
        assert_eq!(deactivations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_subscribers_observe_emissions() {
        let fan_slot: Arc<Mutex<Option<broadcast::Sender<Value>>>> = Arc::new(Mutex::new(None));
        let event = {
            let fan_slot = Arc::clone(&fan_slot);
            Event::new(move |fan| {
                *fan_slot.lock() = Some(fan);
                struct Noop;
                impl EventBinding for Noop {
                    fn deactivate(self: Box<Self>) {}
                }
                Box::new(Noop)
            })
        };

        let mut first = event.subscribe();
        let mut second = event.subscribe();

        let fan = fan_slot.lock().clone().unwrap();
        fan.send(Value::String("tick".to_string())).unwrap();

        assert_eq!(first.recv().await.unwrap().as_str(), Some("tick"));
        assert_eq!(second.recv().await.unwrap().as_str(), Some("tick"));
    }
}
