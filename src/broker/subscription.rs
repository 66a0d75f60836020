use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::util;

use super::keys::ChannelKeys;

pub(super) type SubscriberSet = Arc<Mutex<HashSet<u64>>>;

/// A live subscription: replayed bytes followed by the live tail, ending
/// when the producer finishes or the stream's keys lapse.
///
/// Chunks arrive whole; a consumer can never lose tail bytes to a small
/// read buffer. Dropping the subscription unsubscribes.
pub struct Subscription {
    token: u64,
    rx: mpsc::Receiver<Bytes>,
    members: SubscriberSet,
}

impl Subscription {
    pub(super) fn new(token: u64, rx: mpsc::Receiver<Bytes>, members: SubscriberSet) -> Self {
        Self { token, rx, members }
    }

    /// Receives the next chunk; `None` is end-of-stream.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut members) = self.members.lock() {
            members.remove(&self.token);
        }
    }
}

/// Per-subscriber worker: owns the store pattern subscription and feeds the
/// subscriber channel until completion or teardown.
pub(super) struct SubscriberWorker {
    pub(super) store: Store,
    pub(super) keys: ChannelKeys,
    pub(super) members: SubscriberSet,
    pub(super) token: u64,
    pub(super) tx: mpsc::Sender<Bytes>,
    pub(super) position: u64,
}

impl SubscriberWorker {
    pub(super) async fn run(mut self) {
        if let Err(err) = self.tail().await {
            util::count_with_data("broker.subscribe.error", &format!("error={err}"));
        }
        if let Ok(mut members) = self.members.lock() {
            members.remove(&self.token);
        }
        // Dropping self.tx here closes the subscriber channel; dropping the
        // pattern subscription inside tail() already unsubscribed.
    }

    async fn tail(&mut self) -> Result<()> {
        // Armed before the replay read, so an append racing the replay is
        // re-observed through its notification.
        let mut pubsub = self.store.psubscribe(&self.keys.wildcard())?;
        let payload_key = self.keys.payload().to_string();
        let kill_key = self.keys.kill();

        // Replay: everything already appended past the starting position,
        // in one shot.
        if !self.forward_from_position(&payload_key).await? {
            return Ok(());
        }
        if self.store.exists(&self.keys.done())? {
            return Ok(());
        }

        loop {
            let message = tokio::select! {
                message = pubsub.recv() => match message {
                    Some(message) => message,
                    None => return Ok(()),
                },
                _ = self.tx.closed() => return Ok(()),
            };
            if !self.is_member()? {
                // Already unsubscribed: exit without delivery.
                return Ok(());
            }
            if message.topic == payload_key {
                // The notification is advisory; the store read from the
                // current position is authoritative.
                if !self.forward_from_position(&payload_key).await? {
                    return Ok(());
                }
            } else if message.topic == kill_key {
                self.forward_from_position(&payload_key).await?;
                return Ok(());
            }
        }
    }

    /// Sends any bytes between the current position and the end of the
    /// payload. Returns false when the subscriber is gone.
    async fn forward_from_position(&mut self, payload_key: &str) -> Result<bool> {
        let chunk = self.store.get_range(payload_key, self.position, -1)?;
        if chunk.is_empty() {
            return Ok(true);
        }
        self.position += chunk.len() as u64;
        Ok(self.tx.send(chunk).await.is_ok())
    }

    fn is_member(&self) -> Result<bool> {
        let members = self
            .members
            .lock()
            .map_err(|_| Error::Store("subscriber set lock poisoned"))?;
        Ok(members.contains(&self.token))
    }
}
