//! End-to-end coverage of the HTTP surface: create, register, publish,
//! subscribe (raw and SSE) and health.

use bytes::Bytes;
use logrelay::config::Config;
use logrelay::server::{self, App};
use logrelay::store::Store;
use logrelay::util::new_stream_id;

async fn spawn_server(config: Config) -> (String, App) {
    let app = App::new(Store::new(), config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server::router(app.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), app)
}

/// Heartbeats long enough to stay out of data-exactness assertions.
fn quiet_config() -> Config {
    Config {
        subscribe_heartbeat_duration_ms: 5_000,
        ..Config::default()
    }
}

fn chunked_body(chunks: Vec<Bytes>) -> reqwest::Body {
    reqwest::Body::wrap_stream(futures_util::stream::iter(
        chunks.into_iter().map(Ok::<_, std::io::Error>),
    ))
}

#[tokio::test]
async fn health_answers_ok() {
    let (base, _app) = spawn_server(quiet_config()).await;
    let res = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn create_stream_returns_a_32_char_id() {
    let (base, app) = spawn_server(quiet_config()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/streams"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let id = res.text().await.unwrap();
    assert_eq!(id.len(), 32);
    assert!(app.registrar().is_registered(&id));
}

#[tokio::test]
async fn put_registers_a_multi_segment_id() {
    let (base, app) = spawn_server(quiet_config()).await;
    let client = reqwest::Client::new();

    let res = client
        .put(format!("{base}/streams/1/2/3"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);
    assert!(app.registrar().is_registered("1/2/3"));
}

#[tokio::test]
async fn publish_without_chunked_encoding_is_rejected() {
    let (base, _app) = spawn_server(quiet_config()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/streams/1234"))
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(
        res.text().await.unwrap().trim(),
        "A chunked Transfer-Encoding header is required."
    );
}

#[tokio::test]
async fn publish_to_an_unregistered_id_is_404() {
    let (base, _app) = spawn_server(quiet_config()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/streams/{}", new_stream_id()))
        .body(chunked_body(vec![Bytes::from_static(b"hello")]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(
        res.text().await.unwrap().trim(),
        "Channel is not registered."
    );
}

#[tokio::test]
async fn subscribe_to_an_unregistered_id_is_404() {
    let (base, _app) = spawn_server(quiet_config()).await;
    let res = reqwest::get(format!("{base}/streams/{}", new_stream_id()))
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(
        res.text().await.unwrap().trim(),
        "Channel is not registered."
    );
}

#[tokio::test]
async fn publish_reaches_live_and_replaying_subscribers() {
    let (base, _app) = spawn_server(quiet_config()).await;
    let client = reqwest::Client::new();

    let payloads: Vec<Vec<u8>> = vec![
        b"hello".to_vec(),
        vec![
            0x1f, 0x8b, 0x08, 0x00, 0x3f, 0x6b, 0xe1, 0x53, 0x00, 0x03, 0xed, 0xce, 0xb1, 0x0a,
            0xc2, 0x30,
        ],
        vec![b'0'; 32769],
    ];

    for payload in payloads {
        let id = new_stream_id();
        let url = format!("{base}/streams/{id}");

        let res = client.put(&url).send().await.unwrap();
        assert_eq!(res.status(), 201);

        let live = tokio::spawn({
            let url = url.clone();
            async move {
                let res = reqwest::get(&url).await.unwrap();
                assert_eq!(res.status(), 200);
                res.bytes().await.unwrap()
            }
        });

        let res = client
            .post(&url)
            .body(chunked_body(vec![Bytes::from(payload.clone())]))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);

        assert_eq!(live.await.unwrap().as_ref(), payload.as_slice());

        // A second read after the producer closed is served from replay.
        let res = client.get(&url).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.bytes().await.unwrap().as_ref(), payload.as_slice());
    }
}

#[tokio::test]
async fn raw_subscribers_can_resume_from_an_offset() {
    let (base, _app) = spawn_server(quiet_config()).await;
    let client = reqwest::Client::new();

    let id = new_stream_id();
    let url = format!("{base}/streams/{id}");
    client.put(&url).send().await.unwrap();
    client
        .post(&url)
        .body(chunked_body(vec![Bytes::from_static(b"busl hello world")]))
        .send()
        .await
        .unwrap();

    let res = client
        .get(&url)
        .header("Last-Event-Id", "10")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.bytes().await.unwrap().as_ref(), b" world");
}

#[tokio::test]
async fn sse_subscribers_get_framed_output_and_offsets() {
    let (base, _app) = spawn_server(quiet_config()).await;
    let client = reqwest::Client::new();

    let cases: Vec<(u64, &str, &str, u16)> = vec![
        (0, "hello", "id: 5\ndata: hello\n\n", 200),
        (0, "hello\n", "id: 6\ndata: hello\ndata: \n\n", 200),
        (0, "hello\nworld", "id: 11\ndata: hello\ndata: world\n\n", 200),
        (
            0,
            "hello\nworld\n",
            "id: 12\ndata: hello\ndata: world\ndata: \n\n",
            200,
        ),
        (
            1,
            "hello\nworld\n",
            "id: 12\ndata: ello\ndata: world\ndata: \n\n",
            200,
        ),
        (6, "hello\nworld\n", "id: 12\ndata: world\ndata: \n\n", 200),
        (11, "hello\nworld\n", "id: 12\ndata: \ndata: \n\n", 200),
        (12, "hello\nworld\n", "", 204),
    ];

    for (offset, input, expected, status) in cases {
        let id = new_stream_id();
        let url = format!("{base}/streams/{id}");

        client.put(&url).send().await.unwrap();
        client
            .post(&url)
            .body(chunked_body(vec![Bytes::copy_from_slice(input.as_bytes())]))
            .send()
            .await
            .unwrap();

        let res = client
            .get(&url)
            .header("Accept", "text/event-stream")
            .header("Last-Event-Id", offset.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), status, "input {input:?} offset {offset}");
        assert_eq!(res.text().await.unwrap(), expected);
    }
}

#[tokio::test]
async fn quiet_subscriptions_receive_heartbeats() {
    let config = Config {
        subscribe_heartbeat_duration_ms: 25,
        ..Config::default()
    };
    let (base, _app) = spawn_server(config).await;
    let client = reqwest::Client::new();

    let id = new_stream_id();
    let url = format!("{base}/streams/{id}");
    client.put(&url).send().await.unwrap();

    // No producer publishes; the first bytes on the wire are keep-alives.
    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let mut body = res.bytes_stream();
    use futures_util::StreamExt;
    let first = body.next().await.unwrap().unwrap();
    assert_eq!(first.as_ref(), b"\x00");
}
