//! Cold-storage integration: GET fallback for expired streams and PUT
//! offload of finished artifacts, against a stub origin.

use axum::extract::State;
use axum::routing::{get, put};
use axum::Router;
use bytes::Bytes;
use logrelay::config::Config;
use logrelay::server::{self, App};
use logrelay::store::Store;
use logrelay::util::new_stream_id;
use tokio::sync::mpsc;

async fn spawn_server(config: Config) -> String {
    let app = App::new(Store::new(), config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server::router(app);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_origin(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn unregistered_streams_fall_back_to_cold_storage() {
    let origin = spawn_origin(Router::new().route("/*id", get(|| async { "hello world" }))).await;
    let base = spawn_server(Config {
        storage_base_url: Some(origin),
        ..Config::default()
    })
    .await;

    let res = reqwest::get(format!("{base}/streams/{}", new_stream_id()))
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "hello world");
}

#[tokio::test]
async fn missing_artifacts_still_answer_404() {
    let origin = spawn_origin(
        Router::new().route("/*id", get(|| async { axum::http::StatusCode::NOT_FOUND })),
    )
    .await;
    let base = spawn_server(Config {
        storage_base_url: Some(origin),
        ..Config::default()
    })
    .await;

    let res = reqwest::get(format!("{base}/streams/{}", new_stream_id()))
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn finished_publishes_are_offloaded_to_cold_storage() {
    let (tx, mut rx) = mpsc::channel::<Bytes>(1);
    let origin = spawn_origin(
        Router::new()
            .route(
                "/*id",
                put(|State(tx): State<mpsc::Sender<Bytes>>, body: Bytes| async move {
                    tx.send(body).await.unwrap();
                }),
            )
            .with_state(tx),
    )
    .await;
    let base = spawn_server(Config {
        storage_base_url: Some(origin),
        subscribe_heartbeat_duration_ms: 5_000,
        ..Config::default()
    })
    .await;
    let client = reqwest::Client::new();

    let id = new_stream_id();
    let url = format!("{base}/streams/{id}");
    client.put(&url).send().await.unwrap();

    let body = reqwest::Body::wrap_stream(futures_util::stream::iter(vec![Ok::<
        _,
        std::io::Error,
    >(
        Bytes::from_static(b"hello world"),
    )]));
    let res = client.post(&url).body(body).send().await.unwrap();
    assert_eq!(res.status(), 200);

    assert_eq!(rx.recv().await.unwrap().as_ref(), b"hello world");

    // The same bytes stayed available for replay from the broker.
    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.bytes().await.unwrap().as_ref(), b"hello world");
}
