//! Instrumented bounded channels between pipeline stages.
//!
//! A channel holds at most `capacity` items. `send` suspends while the buffer
//! is full and `recv` suspends while it is empty. The channel closes once
//! every sender has been dropped; receivers then drain what is buffered and
//! get `None`.
//!
//! Several receivers may compete on one channel (fan-out) and several
//! senders may feed one channel (fan-in). Delivery is FIFO per
//! producer/consumer pair only: when lanes merge, consumers see a multiset
//! of items, not a sequence.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use irss_models::ChannelReport;

use crate::metrics;

pub use async_channel::SendError;

/// Counters shared by every handle of one channel.
#[derive(Debug)]
pub struct ChannelStats {
    name: String,
    capacity: usize,
    high_water: AtomicUsize,
    sent: AtomicU64,
    send_wait_us: AtomicU64,
}

impl ChannelStats {
    fn new(name: String, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            high_water: AtomicUsize::new(0),
            sent: AtomicU64::new(0),
            send_wait_us: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest buffered count observed right after a send.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Cumulative time producers spent inside `send`, in microseconds.
    pub fn send_wait_us(&self) -> u64 {
        self.send_wait_us.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> ChannelReport {
        ChannelReport {
            name: self.name.clone(),
            capacity: self.capacity,
            high_water: self.high_water(),
            sent: self.sent(),
            send_wait_ms: self.send_wait_us() / 1_000,
        }
    }
}

/// Producer half of a bounded channel.
#[derive(Debug)]
pub struct ChannelSender<T> {
    inner: async_channel::Sender<T>,
    stats: Arc<ChannelStats>,
}

impl<T> Clone for ChannelSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> ChannelSender<T> {
    /// Send an item, suspending while the channel is at capacity.
    ///
    /// Fails only when every receiver is gone; the item is handed back.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        let started = Instant::now();
        self.inner.send(value).await?;
        let waited = started.elapsed();

        let occupancy = self.inner.len();
        self.stats.high_water.fetch_max(occupancy, Ordering::Relaxed);
        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        self.stats
            .send_wait_us
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);

        metrics::record_channel_occupancy(&self.stats.name, occupancy);
        metrics::record_send_wait(&self.stats.name, waited.as_secs_f64());
        Ok(())
    }

    pub fn stats(&self) -> Arc<ChannelStats> {
        Arc::clone(&self.stats)
    }
}

/// Consumer half of a bounded channel.
#[derive(Debug)]
pub struct ChannelReceiver<T> {
    inner: async_channel::Receiver<T>,
    stats: Arc<ChannelStats>,
}

impl<T> Clone for ChannelReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> ChannelReceiver<T> {
    /// Receive the next item, or `None` once the channel is closed and empty.
    pub async fn recv(&self) -> Option<T> {
        self.inner.recv().await.ok()
    }

    /// Take a buffered item without waiting.
    pub fn try_recv(&self) -> Option<T> {
        self.inner.try_recv().ok()
    }

    /// Close the channel from the consumer side.
    ///
    /// Pending and future sends fail; buffered items stay receivable.
    pub fn close(&self) -> bool {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> Arc<ChannelStats> {
        Arc::clone(&self.stats)
    }
}

/// Create a named bounded channel. A capacity of zero is raised to one.
pub fn bounded<T>(name: impl Into<String>, capacity: usize) -> (ChannelSender<T>, ChannelReceiver<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = async_channel::bounded(capacity);
    let stats = Arc::new(ChannelStats::new(name.into(), capacity));
    (
        ChannelSender {
            inner: tx,
            stats: Arc::clone(&stats),
        },
        ChannelReceiver { inner: rx, stats },
    )
}
