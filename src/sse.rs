//! Server-Sent Events framing over a raw byte stream.
//!
//! Each source chunk becomes one event block:
//!
//! ```text
//! id: <end-offset>\n
//! data: <line>\n
//! ...
//! \n
//! ```
//!
//! Lines are the chunk split on `\n`, so a trailing newline yields a
//! trailing empty `data:` line. The `id` is the absolute byte offset just
//! past the chunk, i.e. the value a client resumes from via
//! `Last-Event-Id`.

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{future, Stream, StreamExt};

/// Wraps `source` in SSE framing, resuming from byte offset `offset`.
///
/// The encoder tracks its own cumulative position: bytes before `offset`
/// are dropped, and a chunk straddling it is emitted from `offset` on,
/// with the `id` still the chunk's end offset.
pub fn encode<S>(source: S, offset: u64) -> impl Stream<Item = Bytes>
where
    S: Stream<Item = Bytes>,
{
    source
        .scan(0u64, move |position, chunk| {
            let start = *position;
            let end = start + chunk.len() as u64;
            *position = end;
            let framed = if start >= offset {
                Some(frame(end, &chunk))
            } else if offset < end {
                Some(frame(end, &chunk[(offset - start) as usize..]))
            } else {
                None
            };
            future::ready(Some(framed))
        })
        .filter_map(future::ready)
}

fn frame(id: u64, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(format!("id: {id}\n").as_bytes());
    for line in payload.split(|&byte| byte == b'\n') {
        buf.extend_from_slice(b"data: ");
        buf.extend_from_slice(line);
        buf.put_u8(b'\n');
    }
    buf.put_u8(b'\n');
    buf.freeze()
}
