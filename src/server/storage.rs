//! Cold-storage HTTP client: GET fallback for expired streams and
//! streaming PUT offload of finished artifacts.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::util;

const OFFLOAD_BUFFER: usize = 10;

fn artifact_url(base: &str, id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), id)
}

/// Fetches the finished artifact for `id`. `None` when the origin does not
/// answer 200.
pub async fn get(
    client: &reqwest::Client,
    base: &str,
    id: &str,
) -> Result<Option<reqwest::Response>> {
    let response = client.get(artifact_url(base, id)).send().await?;
    if response.status() == reqwest::StatusCode::OK {
        Ok(Some(response))
    } else {
        Ok(None)
    }
}

/// Adapts the offload feed channel into a request body stream.
struct BodyFeed {
    rx: mpsc::Receiver<Bytes>,
}

impl Stream for BodyFeed {
    type Item = std::result::Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|chunk| chunk.map(Ok))
    }
}

/// An in-flight streaming PUT of `<base>/<id>`. Chunks are fed with
/// [`Offload::send`] while the same bytes are being broadcast; closing the
/// feed finishes the upload.
pub struct Offload {
    tx: mpsc::Sender<Bytes>,
    task: JoinHandle<Result<()>>,
}

impl Offload {
    pub fn start(client: reqwest::Client, base: &str, id: &str) -> Self {
        let url = artifact_url(base, id);
        let (tx, rx) = mpsc::channel(OFFLOAD_BUFFER);
        let task = tokio::spawn(async move {
            let body = reqwest::Body::wrap_stream(BodyFeed { rx });
            let response = client.put(&url).body(body).send().await?;
            response.error_for_status()?;
            Ok(())
        });
        Self { tx, task }
    }

    pub async fn send(&self, chunk: Bytes) -> Result<()> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| Error::Store("storage offload stopped accepting bytes"))
    }

    /// Closes the feed and waits for the upload to complete.
    pub async fn finish(self) -> Result<()> {
        drop(self.tx);
        match self.task.await {
            Ok(result) => result,
            Err(err) => {
                util::count_with_data("storage.put.panic", &format!("error={err}"));
                Err(Error::Store("storage offload task failed"))
            }
        }
    }
}
