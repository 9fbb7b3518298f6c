//! Outstanding calls awaiting a reply, keyed by sequence id.

use bytes::Bytes;
use parking_lot::Mutex;
use skiff_protocol::MessageHeader;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::sync::oneshot;

/// A REPLY or EXCEPTION message routed to its caller.
#[derive(Debug, Clone)]
pub struct ReplyFrame {
    pub header: MessageHeader,
    /// Struct payload following the envelope.
    pub body: Bytes,
}

#[derive(Debug, Default)]
struct Inner {
    calls: HashMap<i32, oneshot::Sender<ReplyFrame>>,
    closed: bool,
}

/// Pending-call table for one connection.
///
/// A waiter whose sender is dropped without a reply observes the connection
/// as closed.
#[derive(Debug)]
pub struct PendingCalls {
    next_seq_id: AtomicI32,
    inner: Mutex<Inner>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            next_seq_id: AtomicI32::new(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Allocates the next sequence id. Ids start at 1 and wrap.
    pub fn next_seq_id(&self) -> i32 {
        self.next_seq_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a waiter for `seq_id`.
    ///
    /// After [`fail_all`](Self::fail_all) the returned receiver resolves
    /// immediately with a closed error.
    pub fn register(&self, seq_id: i32) -> oneshot::Receiver<ReplyFrame> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.closed {
            return rx;
        }
        if inner.calls.insert(seq_id, tx).is_some() {
            tracing::warn!("Sequence id {} reused while a call was pending", seq_id);
        }
        rx
    }

    /// Delivers a reply to its waiter.
    ///
    /// Returns `false` if no call with this id is pending; the reply is
    /// dropped in that case.
    pub fn complete(&self, seq_id: i32, reply: ReplyFrame) -> bool {
        let Some(tx) = self.inner.lock().calls.remove(&seq_id) else {
            return false;
        };
        // The receiver may have gone away between removal and send.
        tx.send(reply).is_ok()
    }

    /// Removes a waiter without notifying anyone.
    pub fn cancel(&self, seq_id: i32) -> bool {
        self.inner.lock().calls.remove(&seq_id).is_some()
    }

    /// Drops every waiter and refuses new registrations.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.calls.drain().collect()
        };
        drained.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_protocol::MessageType;

    fn reply(seq_id: i32) -> ReplyFrame {
        ReplyFrame {
            header: MessageHeader::new("m", MessageType::Reply, seq_id),
            body: Bytes::from_static(&[0]),
        }
    }

    #[test]
    fn test_seq_ids_increase_from_one() {
        let pending = PendingCalls::new();
        assert_eq!(pending.next_seq_id(), 1);
        assert_eq!(pending.next_seq_id(), 2);
        assert_eq!(pending.next_seq_id(), 3);
    }

    #[test]
    fn test_seq_id_wraps() {
        let pending = PendingCalls::new();
        pending.next_seq_id.store(i32::MAX, Ordering::Relaxed);
        assert_eq!(pending.next_seq_id(), i32::MAX);
        assert_eq!(pending.next_seq_id(), i32::MIN);
    }

    #[test]
    fn test_waiter_pending_until_completed() {
        let pending = PendingCalls::new();
        let mut rx = tokio_test::task::spawn(pending.register(5));
        tokio_test::assert_pending!(rx.poll());

        assert!(pending.complete(5, reply(5)));
        assert!(rx.is_woken());
        let frame = tokio_test::assert_ready_ok!(rx.poll());
        assert_eq!(frame.header.seq_id, 5);
    }

    #[tokio::test]
    async fn test_complete_routes_by_seq_id() {
        let pending = PendingCalls::new();
        let rx1 = pending.register(1);
        let rx2 = pending.register(2);

        assert!(pending.complete(2, reply(2)));
        assert!(pending.complete(1, reply(1)));

        assert_eq!(rx1.await.unwrap().header.seq_id, 1);
        assert_eq!(rx2.await.unwrap().header.seq_id, 2);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_late_reply_dropped() {
        let pending = PendingCalls::new();
        assert!(!pending.complete(7, reply(7)));

        let _rx = pending.register(8);
        assert!(pending.complete(8, reply(8)));
        // Duplicate reply for an id that already completed.
        assert!(!pending.complete(8, reply(8)));
    }

    #[tokio::test]
    async fn test_cancel() {
        let pending = PendingCalls::new();
        let rx = pending.register(3);
        assert!(pending.cancel(3));
        assert!(!pending.cancel(3));
        assert!(!pending.complete(3, reply(3)));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_fail_all() {
        let pending = PendingCalls::new();
        let rx1 = pending.register(1);
        let rx2 = pending.register(2);

        assert_eq!(pending.fail_all(), 2);
        assert!(pending.is_closed());
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());

        // Registration after teardown resolves immediately.
        let rx3 = pending.register(3);
        assert!(rx3.await.is_err());
        assert!(pending.is_empty());
    }
}
