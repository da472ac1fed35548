use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use tkv_client::protocol::{IntegerWidth, ProtocolError, QueryResponse, Request, TtlType};
use tkv_client::{Client, ClientConfig, ClientError, ConnectionPool};
use tracing_subscriber::EnvFilter;

const INSERT_K: [u8; 8] = [0x01, 0x07, 0x00, 0x04, 0x3c, 0x00, 0x01, b'k'];
const QUERY_K: [u8; 3] = [0x02, 0x01, b'k'];
const QUERY_OK: [u8; 6] = [0x01, 0x07, 0x00, 0x04, 0x3c, 0x00];
const SUBSCRIBE_CH: [u8; 4] = [0x11, 0x02, b'c', b'h'];
const UNSUBSCRIBE_CH: [u8; 4] = [0x12, 0x02, b'c', b'h'];
const EVENT_CH_ABC: [u8; 9] = [0x19, 0x02, 0x03, 0x00, b'c', b'h', b'a', b'b', b'c'];

/// Routes client logs to the test harness; `RUST_LOG` picks the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Accepts connections forever, handing each one with its accept index to
/// `handler` on its own task.
async fn spawn_server<F, Fut>(handler: F) -> (u16, JoinHandle<()>)
where
    F: Fn(usize, TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let handle = tokio::spawn(async move {
        let mut idx = 0;
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handler(idx, stream));
            idx += 1;
        }
    });
    (port, handle)
}

/// Accepts `links` connections, drops the one at index `dead` and hands the
/// rest to `handler`, then stops listening so the dropped link can never
/// reconnect. The returned task ends once the listener is closed.
async fn spawn_server_with_dead_link<F, Fut>(
    links: usize,
    dead: usize,
    handler: F,
) -> (u16, JoinHandle<()>)
where
    F: Fn(usize, TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let handle = tokio::spawn(async move {
        for idx in 0..links {
            let (stream, _) = listener.accept().await.expect("accept");
            if idx == dead {
                drop(stream);
            } else {
                tokio::spawn(handler(idx, stream));
            }
        }
    });
    (port, handle)
}

async fn expect_bytes(stream: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    stream.read_exact(&mut buf).await.expect("read request");
    assert_eq!(buf, expected);
}

/// Keeps the connection open until the client goes away.
async fn hold(mut stream: TcpStream) {
    let mut buf = [0u8; 64];
    while let Ok(n) = stream.read(&mut buf).await {
        if n == 0 {
            break;
        }
    }
}

/// Answers WHOAMI with an id whose bytes are all `idx`.
async fn serve_whoami(idx: usize, mut stream: TcpStream) {
    let mut tag = [0u8; 1];
    while stream.read_exact(&mut tag).await.is_ok() {
        assert_eq!(tag[0], 0x18);
        let mut frame = vec![0x01];
        frame.extend_from_slice(&[idx as u8; 16]);
        if stream.write_all(&frame).await.is_err() {
            break;
        }
    }
}

fn config(port: u16, links: usize) -> ClientConfig {
    ClientConfig {
        port,
        max_connections: links,
        connect_timeout_ms: Some(2_000),
        ..ClientConfig::default()
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_insert_and_query_wire_format() {
    let (port, _server) = spawn_server(|_, mut stream| async move {
        expect_bytes(&mut stream, &INSERT_K).await;
        stream.write_all(&[0x01]).await.unwrap();
        expect_bytes(&mut stream, &QUERY_K).await;
        stream.write_all(&QUERY_OK).await.unwrap();
        hold(stream).await;
    })
    .await;

    let client = Client::connect("127.0.0.1", port).await.unwrap();
    assert!(client.insert("k", 7, TtlType::Seconds, 60).await.unwrap());
    assert_eq!(
        client.query("k").await.unwrap(),
        QueryResponse {
            success: true,
            quota: 7,
            ttl_type: TtlType::Seconds,
            ttl: 60,
        }
    );
    let metrics = client.metrics();
    assert_eq!(metrics.requests_total, 2);
    assert_eq!(metrics.errors_total, 0);
    assert_eq!(metrics.inflight, 0);
}

#[tokio::test]
async fn test_uint8_width_shrinks_query_frame() {
    let (port, _server) = spawn_server(|_, mut stream| async move {
        expect_bytes(&mut stream, &QUERY_K).await;
        stream.write_all(&[0x01, 0x07, 0x04, 0x3c]).await.unwrap();
        hold(stream).await;
    })
    .await;

    let client = Client::with_config(ClientConfig {
        width: IntegerWidth::U8,
        ..config(port, 1)
    })
    .await
    .unwrap();
    let query = client.query("k").await.unwrap();
    assert_eq!((query.quota, query.ttl), (7, 60));
}

#[tokio::test]
async fn test_chunked_responses_with_interleaved_event() {
    let (port, _server) = spawn_server(|_, mut stream| async move {
        expect_bytes(&mut stream, &SUBSCRIBE_CH).await;
        stream.write_all(&[0x01]).await.unwrap();

        let mut batch = INSERT_K.to_vec();
        batch.extend_from_slice(&QUERY_K);
        expect_bytes(&mut stream, &batch).await;

        let mut reply = vec![0x01];
        reply.extend_from_slice(&EVENT_CH_ABC);
        reply.extend_from_slice(&QUERY_OK);
        for byte in reply {
            stream.write_all(&[byte]).await.unwrap();
            stream.flush().await.unwrap();
            sleep(Duration::from_millis(1)).await;
        }
        hold(stream).await;
    })
    .await;

    let client = Client::connect("127.0.0.1", port).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscribed = client
        .subscribe("ch", move |event| {
            let _ = tx.send(event.clone());
        })
        .await
        .unwrap();
    assert!(subscribed);

    let responses = client
        .send_batch(&[
            Request::Insert {
                key: "k".into(),
                quota: 7,
                ttl_type: TtlType::Seconds,
                ttl: 60,
            },
            Request::Query { key: "k".into() },
        ])
        .await
        .unwrap();
    assert_eq!(responses.len(), 2);
    assert!(responses[0].success());
    assert!(responses[1].success());

    let event = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.channel, "ch");
    assert_eq!(&event.value[..], b"abc");
    wait_until(|| client.metrics().events_total == 1).await;
}

#[tokio::test]
async fn test_round_robin_across_links() {
    let (port, _server) = spawn_server(serve_whoami).await;
    let client = Client::with_config(config(port, 3)).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..6 {
        let whoami = client.whoami().await.unwrap();
        assert!(whoami.success);
        seen.push(whoami.id.as_bytes()[0]);
    }
    assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
}

#[tokio::test]
async fn test_dead_link_is_revived() {
    let (port, _server) = spawn_server(|idx, stream| async move {
        if idx == 0 {
            drop(stream);
        } else {
            serve_whoami(idx, stream).await;
        }
    })
    .await;

    let client = Client::with_config(config(port, 1)).await.unwrap();
    let session = client.pool().sessions()[0].clone();
    wait_until(|| !session.is_alive()).await;

    let whoami = client.whoami().await.unwrap();
    assert_eq!(whoami.id.as_bytes()[0], 1);
    assert!(session.is_alive());
    assert_eq!(client.metrics().reconnects_total, 1);
}

#[tokio::test]
async fn test_exhausted_when_no_link_can_be_revived() {
    let (port, server) = spawn_server(|_, stream| async move {
        drop(stream);
    })
    .await;

    let client = Client::with_config(config(port, 2)).await.unwrap();
    server.abort();
    let _ = server.await;
    for session in client.pool().sessions() {
        let session = session.clone();
        wait_until(move || !session.is_alive()).await;
    }

    let err = client.whoami().await.unwrap_err();
    assert!(matches!(err, ClientError::PoolExhausted), "{err:?}");
    let metrics = client.metrics();
    assert_eq!(metrics.reconnects_total, 2);
    assert_eq!(metrics.errors_total, 1);
}

#[tokio::test]
async fn test_dead_link_is_skipped_while_others_serve() {
    let (port, server) = spawn_server_with_dead_link(3, 1, serve_whoami).await;
    let client = Client::with_config(config(port, 3)).await.unwrap();
    server.await.unwrap();
    let dead = client.pool().sessions()[1].clone();
    wait_until(move || !dead.is_alive()).await;

    let mut seen = Vec::new();
    for _ in 0..6 {
        let whoami = client.whoami().await.unwrap();
        assert!(whoami.success);
        seen.push(whoami.id.as_bytes()[0]);
    }
    assert_eq!(seen, vec![0, 2, 0, 2, 0, 2]);
    assert!(!client.pool().sessions()[1].is_alive());
    let metrics = client.metrics();
    assert_eq!(metrics.errors_total, 0);
    assert_eq!(metrics.reconnects_total, 3);
}

#[tokio::test]
async fn test_failed_fan_out_leaves_unwritten_links_untouched() {
    let (port, server) = spawn_server_with_dead_link(2, 1, |_, mut stream| async move {
        expect_bytes(&mut stream, &SUBSCRIBE_CH).await;
        stream.write_all(&[0x01]).await.unwrap();
        hold(stream).await;
    })
    .await;
    let client = Client::with_config(config(port, 2)).await.unwrap();
    server.await.unwrap();
    let sessions = client.pool().sessions().to_vec();
    let dead = sessions[1].clone();
    wait_until(move || !dead.is_alive()).await;

    let err = client.subscribe("ch", |_| {}).await.unwrap_err();
    assert!(err.is_transport(), "{err:?}");
    assert!(sessions[0].subscriptions().contains("ch"));
    assert!(!sessions[1].subscriptions().contains("ch"));
}

#[tokio::test]
async fn test_cancelled_batch_still_reaches_the_wire() {
    const VALUE_LEN: usize = 60_000;
    const BATCH: usize = 400;
    // tag, ttl type, ttl (2), key length, value length (2), key
    const SET_FRAME_LEN: usize = 8 + VALUE_LEN;

    let (port, _server) = spawn_server(|_, mut stream| async move {
        sleep(Duration::from_millis(500)).await;
        let mut batch = vec![0u8; SET_FRAME_LEN * BATCH];
        stream.read_exact(&mut batch).await.unwrap();
        assert!(batch
            .chunks(SET_FRAME_LEN)
            .all(|frame| frame[0] == 0x05 && frame[7] == b'k'));
        stream.write_all(&[0x01; BATCH]).await.unwrap();
        expect_bytes(&mut stream, &QUERY_K).await;
        stream.write_all(&QUERY_OK).await.unwrap();
        hold(stream).await;
    })
    .await;

    let client = Client::connect("127.0.0.1", port).await.unwrap();
    let set = Request::Set {
        key: "k".into(),
        value: Bytes::from(vec![0xaa; VALUE_LEN]),
        ttl_type: TtlType::Seconds,
        ttl: 60,
    };
    let batch = vec![set; BATCH];
    let cancelled = timeout(Duration::from_millis(100), client.send_batch(&batch)).await;
    assert!(cancelled.is_err());

    let query = timeout(Duration::from_secs(10), client.query("k"))
        .await
        .expect("query answered")
        .unwrap();
    assert_eq!(
        query,
        QueryResponse {
            success: true,
            quota: 7,
            ttl_type: TtlType::Seconds,
            ttl: 60,
        }
    );
    let session = &client.pool().sessions()[0];
    assert!(session.is_alive());
    assert_eq!(session.pending_len(), 0);
    let metrics = client.metrics();
    assert_eq!(metrics.requests_total, 2);
    assert_eq!(metrics.inflight, 0);
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = Client::with_config(config(port, 2)).await.err().unwrap();
    assert!(matches!(err, ClientError::Io(_)), "{err:?}");
}

#[tokio::test]
async fn test_subscribe_fans_out_to_every_link() {
    let (port, _server) = spawn_server(|idx, mut stream| async move {
        expect_bytes(&mut stream, &SUBSCRIBE_CH).await;
        stream.write_all(&[0x01]).await.unwrap();
        if idx == 1 {
            stream.write_all(&EVENT_CH_ABC).await.unwrap();
        }
        expect_bytes(&mut stream, &UNSUBSCRIBE_CH).await;
        stream.write_all(&[0x01]).await.unwrap();
        hold(stream).await;
    })
    .await;

    let client = Client::with_config(config(port, 2)).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let ok = client
        .subscribe("ch", move |event| {
            let _ = tx.send(event.value.clone());
        })
        .await
        .unwrap();
    assert!(ok);
    for session in client.pool().sessions() {
        assert!(session.subscriptions().contains("ch"));
    }

    let value = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&value[..], b"abc");

    assert!(client.unsubscribe("ch").await.unwrap());
    for session in client.pool().sessions() {
        assert!(session.subscriptions().is_empty());
    }
}

#[tokio::test]
async fn test_invalid_batches_are_refused() {
    let pool = ConnectionPool::new(ClientConfig::default()).unwrap();
    assert!(matches!(
        pool.send(&[]).await,
        Err(ClientError::InvalidBatch(_))
    ));

    let mixed = [
        Request::Unsubscribe {
            channel: "ch".into(),
        },
        Request::Query { key: "k".into() },
    ];
    assert!(matches!(
        pool.send(&mixed).await,
        Err(ClientError::InvalidBatch(_))
    ));
}

#[tokio::test]
async fn test_encode_error_sends_nothing() {
    let (port, _server) = spawn_server(|_, mut stream| async move {
        expect_bytes(&mut stream, &QUERY_K).await;
        stream.write_all(&QUERY_OK).await.unwrap();
        hold(stream).await;
    })
    .await;

    let client = Client::connect("127.0.0.1", port).await.unwrap();
    let err = client.query("x".repeat(300)).await.unwrap_err();
    assert!(
        matches!(
            err,
            ClientError::Encode(ProtocolError::NameTooLong { len: 300, .. })
        ),
        "{err:?}"
    );
    assert!(client.query("k").await.unwrap().success);
}

#[tokio::test]
async fn test_malformed_frame_keeps_stream_in_sync() {
    let (port, _server) = spawn_server(|_, mut stream| async move {
        let mut batch = QUERY_K.to_vec();
        batch.extend_from_slice(&INSERT_K);
        expect_bytes(&mut stream, &batch).await;
        // Unknown ttl type 0x09 inside a correctly sized QUERY frame.
        stream
            .write_all(&[0x01, 0x07, 0x00, 0x09, 0x3c, 0x00, 0x01])
            .await
            .unwrap();
        expect_bytes(&mut stream, &INSERT_K).await;
        stream.write_all(&[0x01]).await.unwrap();
        hold(stream).await;
    })
    .await;

    let client = Client::connect("127.0.0.1", port).await.unwrap();
    let batch = [
        Request::Query { key: "k".into() },
        Request::Insert {
            key: "k".into(),
            quota: 7,
            ttl_type: TtlType::Seconds,
            ttl: 60,
        },
    ];
    let err = client.send_batch(&batch).await.unwrap_err();
    assert!(matches!(err, ClientError::Malformed(_)), "{err:?}");
    assert!(client.insert("k", 7, TtlType::Seconds, 60).await.unwrap());
}

#[tokio::test]
async fn test_impossible_length_desyncs_link() {
    let (port, _server) = spawn_server(|_, mut stream| async move {
        expect_bytes(&mut stream, &[0x17, 0x01, b'c']).await;
        let mut frame = vec![0x01];
        frame.extend_from_slice(&u64::MAX.to_le_bytes());
        stream.write_all(&frame).await.unwrap();
        hold(stream).await;
    })
    .await;

    let client = Client::connect("127.0.0.1", port).await.unwrap();
    let err = client.channel("c").await.unwrap_err();
    assert!(matches!(err, ClientError::ProtocolDesync(_)), "{err:?}");
    let session = client.pool().sessions()[0].clone();
    wait_until(move || !session.is_alive()).await;
}

#[tokio::test]
async fn test_disconnect_rejects_pending() {
    let (port, _server) = spawn_server(|_, mut stream| async move {
        expect_bytes(&mut stream, &QUERY_K).await;
        hold(stream).await;
    })
    .await;

    let client = Arc::new(Client::connect("127.0.0.1", port).await.unwrap());
    let caller = client.clone();
    let waiting = tokio::spawn(async move { caller.query("k").await });

    let session = client.pool().sessions()[0].clone();
    wait_until(move || session.pending_len() == 1).await;
    client.disconnect().await;

    let result = timeout(Duration::from_secs(2), waiting)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ClientError::Closed)), "{result:?}");
}
