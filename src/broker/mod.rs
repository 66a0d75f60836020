//! Multi-subscriber, replay-capable byte log keyed by stream id.
//!
//! A publisher appends to the payload key and notifies subscribers; each
//! subscriber gets replay from its starting offset followed by the live
//! tail, delivered over a bounded channel by a dedicated worker task. The
//! producer-finished signal is a kill broadcast plus a done marker, so
//! late subscribers still see full replay then end-of-stream until the
//! keys expire.

mod keys;
mod registrar;
mod subscription;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::util;

pub use keys::ChannelKeys;
pub use registrar::Registrar;
pub use subscription::Subscription;

use subscription::{SubscriberSet, SubscriberWorker};

/// Bound on buffered chunks per subscriber.
const SUBSCRIBER_BUFFER: usize = 10;

static NEXT_SUBSCRIBER: AtomicU64 = AtomicU64::new(0);

pub struct Broker {
    store: Store,
    keys: ChannelKeys,
    key_expire: Duration,
    channel_expire: Duration,
    subscribers: SubscriberSet,
}

impl Broker {
    pub fn new(store: Store, id: &str, key_expire: Duration, channel_expire: Duration) -> Self {
        Self {
            store,
            keys: ChannelKeys::new(id),
            key_expire,
            channel_expire,
            subscribers: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Appends `msg` to the payload and notifies subscribers.
    ///
    /// Best-effort: store errors are counted and the caller's write goes on.
    pub fn publish(&self, msg: &[u8]) {
        if let Err(err) = self.try_publish(msg) {
            util::count_with_data("broker.publish.error", &format!("error={err}"));
        }
    }

    fn try_publish(&self, msg: &[u8]) -> Result<()> {
        let mut txn = self.store.multi()?;
        let len = txn.append(self.keys.payload(), msg);
        txn.expire(self.keys.payload(), self.key_expire);
        txn.del(&self.keys.done());
        // The notification payload is the appended length; subscribers
        // treat it as advisory and re-read from the store.
        txn.publish(self.keys.payload(), len.to_string().as_bytes());
        Ok(())
    }

    /// Attaches a subscriber at `offset`. Fails with [`Error::NotRegistered`]
    /// when the stream id does not exist or has expired.
    pub fn subscribe(&self, offset: u64) -> Result<Subscription> {
        if !self.store.exists(self.keys.payload())? {
            return Err(Error::NotRegistered);
        }
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let token = NEXT_SUBSCRIBER.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .map_err(|_| Error::Store("subscriber set lock poisoned"))?
            .insert(token);
        let worker = SubscriberWorker {
            store: self.store.clone(),
            keys: self.keys.clone(),
            members: Arc::clone(&self.subscribers),
            token,
            tx,
            position: offset,
        };
        tokio::spawn(worker.run());
        Ok(Subscription::new(token, rx, Arc::clone(&self.subscribers)))
    }

    /// Detaches a subscriber. Idempotent; dropping the subscription has the
    /// same effect.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// The producer-finished signal: broadcast kill so live subscribers
    /// drain and stop, and set the done marker for late subscribers. One
    /// transaction, so a subscriber arming in between cannot miss both.
    pub fn unsubscribe_all(&self) {
        let result = self.store.multi().map(|mut txn| {
            txn.publish(&self.keys.kill(), &[0x01]);
            txn.set_ex(&self.keys.done(), self.channel_expire, &[0x01]);
        });
        if let Err(err) = result {
            util::count_with_data("broker.unsubscribe_all.error", &format!("error={err}"));
        }
    }

    /// True when the producer has finished this stream.
    pub fn reader_done(&self) -> bool {
        self.store.exists(&self.keys.done()).unwrap_or(false)
    }

    /// True when the payload holds nothing at or past `offset`.
    pub fn no_content(&self, offset: u64) -> bool {
        self.store
            .get_range(self.keys.payload(), offset, -1)
            .map(|chunk| chunk.is_empty())
            .unwrap_or(false)
    }
}
