use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A duplex whole-message pipe between two peers.
///
/// `send` queues one discrete message for delivery; failures are swallowed,
/// since a failing transport is either recovering or about to be torn down.
/// `take_incoming` hands out the single-consumer inbound stream — the first
/// caller owns it, later callers get `None`. Byte-level framing is the
/// implementation's responsibility; consumers always see whole messages.
pub trait MessagePassingProtocol: Send + Sync + 'static {
    /// Queue one whole message for delivery to the peer.
    fn send(&self, message: Bytes);

    /// Take the inbound message stream. Returns `None` if already taken.
    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<Bytes>>;
}

/// An in-process protocol pair: two crossed unbounded queues.
///
/// Used by tests and by same-process wiring where both endpoints live in
/// one runtime.
pub struct MemoryProtocol {
    peer: mpsc::UnboundedSender<Bytes>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

impl MemoryProtocol {
    /// Create a connected pair of protocols.
    pub fn pair() -> (MemoryProtocol, MemoryProtocol) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();

        let left = MemoryProtocol {
            peer: right_tx,
            incoming: Mutex::new(Some(left_rx)),
        };
        let right = MemoryProtocol {
            peer: left_tx,
            incoming: Mutex::new(Some(right_rx)),
        };
        (left, right)
    }
}

impl MessagePassingProtocol for MemoryProtocol {
    fn send(&self, message: Bytes) {
        // Peer gone: nothing to deliver to, and nothing to report.
        let _ = self.peer.send(message);
    }

    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.incoming.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_delivers_in_order() {
        let (left, right) = MemoryProtocol::pair();
        let mut inbox = right.take_incoming().unwrap();

        left.send(Bytes::from_static(b"one"));
        left.send(Bytes::from_static(b"two"));

        assert_eq!(inbox.recv().await.unwrap().as_ref(), b"one");
        assert_eq!(inbox.recv().await.unwrap().as_ref(), b"two");
    }

    #[tokio::test]
    async fn pair_is_bidirectional() {
        let (left, right) = MemoryProtocol::pair();
        let mut left_inbox = left.take_incoming().unwrap();
        let mut right_inbox = right.take_incoming().unwrap();

        left.send(Bytes::from_static(b"ping"));
        right.send(Bytes::from_static(b"pong"));

        assert_eq!(right_inbox.recv().await.unwrap().as_ref(), b"ping");
        assert_eq!(left_inbox.recv().await.unwrap().as_ref(), b"pong");
    }

    #[tokio::test]
    async fn incoming_can_be_taken_once() {
        let (left, _right) = MemoryProtocol::pair();
        assert!(left.take_incoming().is_some());
        assert!(left.take_incoming().is_none());
    }

    #[tokio::test]
    async fn send_to_dropped_peer_is_swallowed() {
        let (left, right) = MemoryProtocol::pair();
        drop(right);
        // Must not panic or error.
        left.send(Bytes::from_static(b"into the void"));
    }

    #[tokio::test]
    async fn messages_buffer_before_take() {
        let (left, right) = MemoryProtocol::pair();
        left.send(Bytes::from_static(b"early"));

        let mut inbox = right.take_incoming().unwrap();
        assert_eq!(inbox.recv().await.unwrap().as_ref(), b"early");
    }
}
