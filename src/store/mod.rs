//! Embedded byte store with TTL expiry and pattern pub/sub.
//!
//! The relay keeps its payload log, completion markers and fan-out
//! notifications in one process-wide store. The operation set is the small
//! string/pub-sub vocabulary the broker needs: set-with-ttl, exists, append,
//! ranged reads, delete, publish and pattern subscribe, plus a [`Multi`]
//! guard that runs several operations under a single lock acquisition.
//!
//! Expiry is lazy on access; [`Store::sweep`] additionally drops dead
//! entries in bulk and is driven by a background task in the server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

const LOCK_POISONED: &str = "store lock poisoned";

/// Bound on notifications queued per pattern subscription. A subscriber
/// that overflows it is dropped, the way Redis reaps pub/sub clients that
/// exceed their output buffer limit.
const PATTERN_SUBSCRIBER_BUFFER: usize = 32;

#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    subscribers: Vec<TopicSubscriber>,
    next_token: u64,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

struct TopicSubscriber {
    token: u64,
    pattern: String,
    tx: mpsc::Sender<Message>,
}

/// A pub/sub notification: the concrete topic it was published on plus the
/// published payload.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

/// A live pattern subscription. Dropping it unsubscribes.
pub struct PatternSubscription {
    store: Store,
    token: u64,
    rx: mpsc::Receiver<Message>,
}

impl PatternSubscription {
    /// Receives the next matching notification; `None` once unsubscribed
    /// or reaped, with no buffered messages left.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Drop for PatternSubscription {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.store.inner.lock() {
            inner.subscribers.retain(|sub| sub.token != self.token);
        }
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| Error::Store(LOCK_POISONED))
    }

    /// Sets `key` to `value` with a time-to-live, replacing any prior value.
    pub fn set_ex(&self, key: &str, ttl: Duration, value: &[u8]) -> Result<()> {
        let mut inner = self.lock()?;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        Ok(inner.entry(key).is_some())
    }

    /// Appends to `key`, creating it without a TTL when absent. Returns the
    /// new length.
    pub fn append(&self, key: &str, bytes: &[u8]) -> Result<u64> {
        let mut inner = self.lock()?;
        Ok(inner.append(key, bytes))
    }

    /// Reads the inclusive byte range `[start, end]`; a negative `end`
    /// counts from the tail, so `-1` means everything from `start` on.
    /// Absent keys and ranges past the end read as empty.
    pub fn get_range(&self, key: &str, start: u64, end: i64) -> Result<Bytes> {
        let mut inner = self.lock()?;
        Ok(inner.get_range(key, start, end))
    }

    /// Sets a fresh TTL. Returns false when the key does not exist.
    pub fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.lock()?;
        Ok(inner.expire(key, ttl))
    }

    pub fn del(&self, key: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.entries.remove(key);
        Ok(())
    }

    /// Publishes `payload` to every subscription whose pattern matches
    /// `topic`. Returns the number of subscribers notified.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize> {
        let mut inner = self.lock()?;
        Ok(inner.publish(topic, payload))
    }

    /// Subscribes to every topic matching `pattern` (`*` matches any run of
    /// bytes, so `id*` covers both a payload topic and its kill topic).
    pub fn psubscribe(&self, pattern: &str) -> Result<PatternSubscription> {
        let (tx, rx) = mpsc::channel(PATTERN_SUBSCRIBER_BUFFER);
        let mut inner = self.lock()?;
        let token = inner.next_token;
        inner.next_token += 1;
        inner.subscribers.push(TopicSubscriber {
            token,
            pattern: pattern.to_string(),
            tx,
        });
        Ok(PatternSubscription {
            store: self.clone(),
            token,
            rx,
        })
    }

    /// Runs several operations atomically under one lock acquisition.
    pub fn multi(&self) -> Result<Multi<'_>> {
        Ok(Multi {
            inner: self.lock()?,
        })
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn sweep(&self) -> Result<usize> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.live(now));
        Ok(before - inner.entries.len())
    }

    /// Spawns a background task sweeping expired entries on an interval.
    pub fn start_sweeper(&self, interval: Duration) {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(err) = store.sweep() {
                    log::warn!("store sweep failed: {err}");
                    return;
                }
            }
        });
    }
}

/// A handle holding the store lock, so a batch of operations observes and
/// produces one consistent state. Dropping it releases the lock.
pub struct Multi<'a> {
    inner: MutexGuard<'a, Inner>,
}

impl Multi<'_> {
    pub fn set_ex(&mut self, key: &str, ttl: Duration, value: &[u8]) {
        self.inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    pub fn append(&mut self, key: &str, bytes: &[u8]) -> u64 {
        self.inner.append(key, bytes)
    }

    pub fn expire(&mut self, key: &str, ttl: Duration) -> bool {
        self.inner.expire(key, ttl)
    }

    pub fn del(&mut self, key: &str) {
        self.inner.entries.remove(key);
    }

    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> usize {
        self.inner.publish(topic, payload)
    }
}

impl Inner {
    /// Looks up a key, dropping it first if its TTL has lapsed.
    fn entry(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.live(now) {
                self.entries.remove(key);
                return None;
            }
        } else {
            return None;
        }
        self.entries.get_mut(key)
    }

    fn append(&mut self, key: &str, bytes: &[u8]) -> u64 {
        match self.entry(key) {
            Some(entry) => {
                entry.value.extend_from_slice(bytes);
                entry.value.len() as u64
            }
            None => {
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        value: bytes.to_vec(),
                        expires_at: None,
                    },
                );
                bytes.len() as u64
            }
        }
    }

    fn get_range(&mut self, key: &str, start: u64, end: i64) -> Bytes {
        let Some(entry) = self.entry(key) else {
            return Bytes::new();
        };
        let len = entry.value.len() as i64;
        let start = start.min(i64::MAX as u64) as i64;
        let stop = if end < 0 { len + end } else { end.min(len - 1) };
        if start >= len || stop < start {
            return Bytes::new();
        }
        Bytes::copy_from_slice(&entry.value[start as usize..=stop as usize])
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> bool {
        match self.entry(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|sub| {
            if !pattern_matches(&sub.pattern, topic) {
                return true;
            }
            let message = Message {
                topic: topic.to_string(),
                payload: Bytes::copy_from_slice(payload),
            };
            match sub.tx.try_send(message) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                // Receiver gone, or its queue overflowed: reap the
                // subscription; it observes end-of-stream after draining.
                Err(_) => false,
            }
        });
        delivered
    }
}

/// Glob match where `*` stands for any run of bytes.
fn pattern_matches(pattern: &str, topic: &str) -> bool {
    fn matches(pattern: &[u8], topic: &[u8]) -> bool {
        match pattern.split_first() {
            None => topic.is_empty(),
            Some((b'*', rest)) => (0..=topic.len()).any(|skip| matches(rest, &topic[skip..])),
            Some((expected, rest)) => topic
                .split_first()
                .map_or(false, |(got, tail)| got == expected && matches(rest, tail)),
        }
    }
    matches(pattern.as_bytes(), topic.as_bytes())
}
