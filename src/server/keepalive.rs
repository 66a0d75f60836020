//! Heartbeats for quiet subscriptions.
//!
//! Long build silences would otherwise get idle connections reaped by
//! intermediaries; a lone NUL between SSE frames is invisible to parsers.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::util;

/// Bound on chunks read ahead of the consumer.
const READ_AHEAD: usize = 100;

struct KeepAlive {
    rx: mpsc::Receiver<Bytes>,
    packet: Bytes,
    interval: Duration,
    disconnect: CancellationToken,
}

/// Wraps `source`, yielding `packet` whenever `interval` elapses with no
/// source bytes, and ending the stream when `disconnect` fires.
///
/// A background task reads the source eagerly so slow consumers do not
/// stall the producer side; the foreground races arrival against the
/// heartbeat timer and the disconnect signal.
pub fn wrap<S>(
    source: S,
    packet: Bytes,
    interval: Duration,
    disconnect: CancellationToken,
) -> impl Stream<Item = Bytes>
where
    S: Stream<Item = Bytes> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(READ_AHEAD);
    tokio::spawn(async move {
        futures_util::pin_mut!(source);
        while let Some(chunk) = source.next().await {
            if tx.send(chunk).await.is_err() {
                return;
            }
        }
    });

    let state = KeepAlive {
        rx,
        packet,
        interval,
        disconnect,
    };
    stream::unfold(state, |mut state| async move {
        tokio::select! {
            chunk = state.rx.recv() => chunk.map(|chunk| (chunk, state)),
            _ = tokio::time::sleep(state.interval) => {
                util::count("server.sub.keep_alive");
                Some((state.packet.clone(), state))
            }
            _ = state.disconnect.cancelled() => {
                util::count("server.sub.client_closed");
                None
            }
        }
    })
}
