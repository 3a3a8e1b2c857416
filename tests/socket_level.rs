/// Socket-level behaviour against real TCP dummy servers
///
/// Each server reads one request head per connection and then follows a
/// scripted action, so the client sees genuine FIN/RST and timing behaviour.
use connpool::pool::{PoolConfig, RequestOptions};
use connpool::{proxy_from_url, ConnectionPool, PoolError};
use http::Method;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
enum Action {
    /// Close right after reading the request, without sending anything
    Close,
    /// Send this raw response, then close
    Respond(&'static str),
    /// Read the request and never answer
    Hang,
}

async fn read_request_head(stream: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    head
}

/// Serve one scripted action per accepted connection, reporting each request head.
async fn scripted_server(
    actions: Vec<Action>,
) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for action in actions {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let head = read_request_head(&mut stream).await;
            let _ = tx.send(head);
            match action {
                Action::Close => drop(stream),
                Action::Respond(response) => {
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
                Action::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
            }
        }
    });

    (addr, rx)
}

fn pool_for(addr: SocketAddr, config: PoolConfig) -> ConnectionPool {
    ConnectionPool::from_url(&format!("http://{}/", addr), config).unwrap()
}

#[tokio::test]
async fn repeated_headers_are_merged() {
    let (addr, _requests) = scripted_server(vec![Action::Respond(
        "HTTP/1.1 200 OK\r\n\
         Set-Cookie: foo=1\r\n\
         Set-Cookie: bar=1\r\n\r\n",
    )])
    .await;
    let pool = pool_for(addr, PoolConfig::default());

    let response = pool
        .request(Method::GET, "/", RequestOptions::new().retries(0))
        .await
        .unwrap();

    let merged = response.headers_merged();
    assert_eq!(merged.get("set-cookie").map(String::as_str), Some("foo=1, bar=1"));
    assert_eq!(response.headers.get_all("Set-Cookie").len(), 2);
    assert!(response.data.is_empty());
    // Body delimited by close: nothing goes back to the pool.
    assert_eq!(pool.stats().idle, 0);
}

#[tokio::test]
async fn stale_pooled_connection_is_replaced_without_using_retries() {
    let (addr, mut requests) = scripted_server(vec![
        Action::Respond("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nResponse 1"),
        Action::Respond("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nResponse 2"),
    ])
    .await;
    let pool = pool_for(addr, PoolConfig::default());

    let first = pool
        .request(Method::GET, "/", RequestOptions::new().retries(0))
        .await
        .unwrap();
    assert_eq!(first.text(), "Response 1");
    assert_eq!(pool.stats().idle, 1);

    // Let the server's close reach the idle socket.
    requests.recv().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = pool
        .request(Method::GET, "/", RequestOptions::new().retries(0))
        .await
        .unwrap();
    assert_eq!(second.text(), "Response 2");

    let stats = pool.stats();
    assert_eq!(stats.stale_discarded, 1);
    assert_eq!(stats.connections_opened, 2);
}

#[tokio::test]
async fn refused_connection_with_zero_retries_is_max_retry() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let pool = pool_for(addr, PoolConfig::default());
    let err = pool
        .request(Method::GET, "/", RequestOptions::new().retries(0))
        .await
        .unwrap_err();

    match &err {
        PoolError::MaxRetry { attempts, source, .. } => {
            assert_eq!(*attempts, 1);
            assert!(matches!(**source, PoolError::Connect { .. }));
        }
        other => panic!("expected MaxRetry, got {:?}", other),
    }

    // A listener appearing afterwards sees nothing from the finished call.
    let Ok(late) = TcpListener::bind(addr).await else {
        return;
    };
    let accepted = tokio::time::timeout(Duration::from_millis(100), late.accept()).await;
    assert!(accepted.is_err());
}

#[tokio::test]
async fn unresponsive_server_times_out_without_retrying() {
    let (addr, _requests) = scripted_server(vec![Action::Hang, Action::Hang]).await;
    let pool = pool_for(
        addr,
        PoolConfig {
            read_timeout_ms: 100,
            ..Default::default()
        },
    );

    let err = pool
        .request(Method::GET, "/", RequestOptions::new().retries(0))
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "expected a timeout, got {:?}", err);
    assert!(!matches!(err, PoolError::MaxRetry { .. }));
    assert_eq!(pool.stats().connections_opened, 1);
}

#[tokio::test]
async fn close_respond_close_sequence() {
    let (addr, mut requests) = scripted_server(vec![
        Action::Close,
        Action::Respond("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nResponse 1"),
        Action::Close,
    ])
    .await;
    let pool = pool_for(addr, PoolConfig::default());

    let response = pool
        .request(Method::GET, "/", RequestOptions::new().retries(1))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "Response 1");

    requests.recv().await.unwrap();
    requests.recv().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = pool
        .request(Method::GET, "/", RequestOptions::new().retries(0))
        .await
        .unwrap_err();
    match err {
        PoolError::MaxRetry { source, .. } => {
            assert!(matches!(*source, PoolError::Reset { .. }));
        }
        other => panic!("expected MaxRetry, got {:?}", other),
    }
}

#[tokio::test]
async fn proxy_receives_absolute_form_request() {
    let (addr, mut requests) = scripted_server(vec![Action::Respond(
        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
    )])
    .await;

    let proxy = proxy_from_url(&format!("http://{}", addr)).unwrap();
    let response = proxy
        .request(Method::GET, "http://google.com/", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(response.text(), "ok");

    let head = requests.recv().await.unwrap();
    assert_eq!(
        head,
        b"GET http://google.com/ HTTP/1.1\r\n\
          Host: google.com\r\n\
          Accept-Encoding: identity\r\n\
          Accept: */*\r\n\
          \r\n"
    );
}

#[tokio::test]
async fn absolute_target_on_pool_origin_is_sent_in_origin_form() {
    let (addr, mut requests) = scripted_server(vec![Action::Respond(
        "HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n",
    )])
    .await;
    let pool = pool_for(addr, PoolConfig::default());

    let response = pool
        .request(
            Method::POST,
            &format!("http://{}/items?x=1", addr),
            RequestOptions::new()
                .header("Content-Type", "text/plain")
                .body("hello"),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 201);

    let head = String::from_utf8(requests.recv().await.unwrap()).unwrap();
    assert!(head.starts_with("POST /items?x=1 HTTP/1.1\r\n"));
    assert!(head.contains(&format!("Host: {}\r\n", addr)));
    assert!(head.contains("Content-Type: text/plain\r\n"));
    assert!(head.contains("Content-Length: 5\r\n"));
}

#[tokio::test]
async fn concurrent_requests_share_a_bounded_pool() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                loop {
                    let head = read_request_head(&mut stream).await;
                    if head.is_empty() {
                        return;
                    }
                    let response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
                    if stream.write_all(response).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    let pool = pool_for(
        addr,
        PoolConfig {
            max_size: 2,
            ..Default::default()
        },
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.request(Method::GET, "/", RequestOptions::new()).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().text(), "ok");
    }

    let stats = pool.stats();
    assert_eq!(stats.requests, 8);
    assert!(stats.idle <= 2);
    assert_eq!(stats.idle + stats.checked_out + stats.free_slots, 2);
}
