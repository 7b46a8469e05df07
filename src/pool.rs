//! Bounded pools for frame buffers and reply slots.
//!
//! Both pools are sized to the connection's max in-flight request count,
//! which is the only meaningful upper bound on how many buffers and slots
//! can be owned simultaneously. Slot acquisition doubles as the engine's
//! backpressure signal: once max-in-flight requests are outstanding the
//! next dispatch suspends until a slot is released.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::Error;
use crate::protocol::packet::RawPacket;

/// What the connection reader delivers into a slot: one parsed frame, or
/// notice that the connection died before the reply arrived.
#[derive(Debug)]
pub(crate) enum Reply {
    Packet(RawPacket),
    Lost,
}

impl Reply {
    /// Drop the reply, handing any pooled frame buffer back.
    pub(crate) fn discard(self, bufs: &BufferPool) {
        if let Reply::Packet(pkt) = self {
            bufs.put(pkt.into_buf());
        }
    }
}

/// Pool of fixed-capacity byte buffers used as frame read destinations and
/// marshalling scratch.
#[derive(Debug, Clone)]
pub(crate) struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

#[derive(Debug)]
struct BufferPoolInner {
    buf_len: usize,
    max_pooled: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub(crate) fn new(buf_len: usize, max_pooled: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                buf_len,
                max_pooled,
                free: Mutex::new(Vec::with_capacity(max_pooled)),
            }),
        }
    }

    pub(crate) fn buf_len(&self) -> usize {
        self.inner.buf_len
    }

    /// A cleared buffer with capacity `buf_len`. Under starvation a fresh
    /// one is allocated rather than waiting.
    pub(crate) fn get(&self) -> Vec<u8> {
        self.inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.inner.buf_len))
    }

    /// Return a buffer. A buffer that grew past `buf_len` is dropped so
    /// every pooled element keeps the fixed size; buffers that alias caller
    /// memory must never be handed in here.
    pub(crate) fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() != self.inner.buf_len {
            return;
        }
        buf.clear();
        let mut free = self.inner.free.lock();
        if free.len() < self.inner.max_pooled {
            free.push(buf);
        }
    }
}

/// A reusable single-reply rendezvous: the reader holds a clone of `tx`
/// via the in-flight map, the dispatching caller holds the receiver.
#[derive(Debug)]
pub(crate) struct Slot {
    tx: mpsc::Sender<Reply>,
    rx: mpsc::Receiver<Reply>,
}

impl Slot {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx }
    }
}

/// Pool of reply slots, bounded by a semaphore with max-in-flight permits.
#[derive(Debug, Clone)]
pub(crate) struct SlotPool {
    inner: Arc<SlotPoolInner>,
}

#[derive(Debug)]
struct SlotPoolInner {
    sem: Arc<Semaphore>,
    free: Mutex<Vec<Slot>>,
    bufs: BufferPool,
}

impl SlotPool {
    pub(crate) fn new(max_inflight: usize, bufs: BufferPool) -> Self {
        Self {
            inner: Arc::new(SlotPoolInner {
                sem: Arc::new(Semaphore::new(max_inflight)),
                free: Mutex::new(Vec::with_capacity(max_inflight)),
                bufs,
            }),
        }
    }

    /// Acquire a slot, suspending while max-in-flight requests are
    /// outstanding. Fails with connection-lost once the pool is closed.
    pub(crate) async fn get(&self) -> Result<SlotGuard, Error> {
        let permit = Arc::clone(&self.inner.sem)
            .acquire_owned()
            .await
            .map_err(|_| Error::ConnectionLost)?;
        let slot = self.inner.free.lock().pop().unwrap_or_else(Slot::new);
        Ok(SlotGuard {
            slot: Some(slot),
            reusable: false,
            pool: self.clone(),
            _permit: permit,
        })
    }

    /// Close the pool: pending and future acquisitions fail. Called once by
    /// connection teardown, before the in-flight broadcast.
    pub(crate) fn close(&self) {
        self.inner.sem.close();
    }

    fn release(&self, slot: Slot) {
        self.inner.free.lock().push(slot);
    }
}

/// An acquired slot. Dropping the guard sanitizes the slot and returns it
/// to the pool: a reply that already arrived is drained (its buffer
/// reclaimed), and a slot whose reply may still be in flight is replaced by
/// a fresh channel pair so a late reply can never reach a future caller.
#[derive(Debug)]
pub(crate) struct SlotGuard {
    slot: Option<Slot>,
    reusable: bool,
    pool: SlotPool,
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    /// Sender for the in-flight map entry.
    pub(crate) fn sender(&self) -> mpsc::Sender<Reply> {
        self.slot.as_ref().expect("slot present until drop").tx.clone()
    }

    /// Await the reply. Cancel safe: if the future is dropped the reply is
    /// recovered (or the slot replaced) by the guard's `Drop`.
    pub(crate) async fn recv(&mut self) -> Reply {
        let slot = self.slot.as_mut().expect("slot present until drop");
        match slot.rx.recv().await {
            Some(reply) => {
                self.reusable = true;
                reply
            }
            // All senders gone without a send; only possible during
            // teardown races.
            None => {
                self.reusable = true;
                Reply::Lost
            }
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.take().expect("dropped once");
        let mut reusable = self.reusable;

        if !reusable {
            if let Ok(reply) = slot.rx.try_recv() {
                // The reply beat the cancellation; the rendezvous is empty
                // again and safe to reuse.
                reply.discard(&self.pool.inner.bufs);
                reusable = true;
            }
        }

        // A slot that may still have a live sender in the in-flight map is
        // retired; the stale sender's try_send will fail and the reader
        // reclaims the frame buffer.
        let slot = if reusable { slot } else { Slot::new() };
        self.pool.release(slot);
    }
}

/// Outcome of delivering a reply into a slot from the reader side.
pub(crate) fn deliver(tx: &mpsc::Sender<Reply>, reply: Reply, bufs: &BufferPool) {
    if let Err(err) = tx.try_send(reply) {
        // Receiver sanitized away or rendezvous already full: the caller
        // gave up on this request. Reclaim the buffer and move on.
        let reply = match err {
            TrySendError::Full(r) | TrySendError::Closed(r) => r,
        };
        reply.discard(bufs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_packet(bufs: &BufferPool, request_id: u32) -> RawPacket {
        let mut buf = bufs.get();
        buf.push(101); // STATUS
        buf.extend_from_slice(&request_id.to_be_bytes());
        let len = buf.len();
        RawPacket::parse(buf, len).unwrap()
    }

    #[test]
    fn buffer_pool_reuses_and_bounds() {
        let pool = BufferPool::new(64, 2);
        let a = pool.get();
        let b = pool.get();
        let c = pool.get(); // starvation: allocated, not blocked
        assert_eq!(a.capacity(), 64);

        pool.put(a);
        pool.put(b);
        pool.put(c); // free list already at bound, silently dropped
        assert_eq!(pool.inner.free.lock().len(), 2);
    }

    #[test]
    fn grown_buffer_is_not_pooled() {
        let pool = BufferPool::new(8, 4);
        let mut buf = pool.get();
        buf.extend_from_slice(&[0u8; 64]); // outgrows the fixed size
        pool.put(buf);
        assert!(pool.inner.free.lock().is_empty());
    }

    #[tokio::test]
    async fn slot_pool_bounds_inflight() {
        let bufs = BufferPool::new(32, 2);
        let pool = SlotPool::new(2, bufs);

        let a = pool.get().await.unwrap();
        let _b = pool.get().await.unwrap();

        // Third acquisition suspends until a slot is released.
        tokio::select! {
            biased;
            _ = pool.get() => panic!("pool should be exhausted"),
            _ = tokio::task::yield_now() => {}
        }

        drop(a);
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test]
    async fn closed_pool_reports_connection_lost() {
        let pool = SlotPool::new(1, BufferPool::new(32, 1));
        pool.close();
        assert!(matches!(pool.get().await, Err(Error::ConnectionLost)));
    }

    #[tokio::test]
    async fn late_reply_cannot_reach_next_caller() {
        let bufs = BufferPool::new(32, 4);
        let pool = SlotPool::new(1, bufs.clone());

        let guard = pool.get().await.unwrap();
        let stale_tx = guard.sender();
        drop(guard); // cancelled before any reply: slot pair is replaced

        let mut next = pool.get().await.unwrap();
        deliver(&stale_tx, Reply::Packet(dummy_packet(&bufs, 1)), &bufs);

        tokio::select! {
            biased;
            _ = next.recv() => panic!("stale reply leaked into fresh request"),
            _ = tokio::task::yield_now() => {}
        }
    }

    #[tokio::test]
    async fn drained_reply_reclaims_buffer() {
        let bufs = BufferPool::new(32, 4);
        let pool = SlotPool::new(1, bufs.clone());

        let guard = pool.get().await.unwrap();
        let tx = guard.sender();
        deliver(&tx, Reply::Packet(dummy_packet(&bufs, 9)), &bufs);
        let before = bufs.inner.free.lock().len();
        drop(guard); // reply drained on drop, buffer handed back

        assert_eq!(bufs.inner.free.lock().len(), before + 1);
    }
}
