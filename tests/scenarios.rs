use linger_testing::prelude::*;

#[tokio::test]
async fn deadline_then_payload() {
    let server = ServerBuilder::default()
        .with_config(|config| config.deadline(Duration::from_millis(100)).payload("done"))
        .run()
        .await;

    let start = std::time::Instant::now();
    let response = server
        .get("/")
        .timeout(Duration::from_millis(2000))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "done");
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn keep_alive_until_client_leaves() {
    let server = ServerBuilder::default()
        .with_config(|config| {
            config
                .early_header(true)
                .keep_alive(Duration::from_millis(50))
        })
        .run()
        .await;

    let mut stream = server.raw_get("/keep").await;
    let received = read_for(&mut stream, Duration::from_millis(175)).await;
    let (head, body) = split_response(&received);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head:?}");
    assert!(head.contains("connection: close\r\n"));
    // floor(175 / 50) = 3, ± 1
    assert!((2..=4).contains(&body.len()), "got {body:?}");
    assert!(body.iter().all(|byte| *byte == b' '));

    drop(stream);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!server.is_finished());
}

#[tokio::test]
async fn no_content_at_deadline() {
    let server = ServerBuilder::default()
        .with_config(|config| {
            config
                .deadline(Duration::from_millis(50))
                .status(StatusCode::NO_CONTENT)
        })
        .run()
        .await;

    let response = server
        .get("/")
        .timeout(Duration::from_millis(2000))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn early_header_before_payload() {
    let server = ServerBuilder::default()
        .with_config(|config| {
            config
                .early_header(true)
                .deadline(Duration::from_millis(300))
                .status(StatusCode::GATEWAY_TIMEOUT)
                .payload("timed out")
        })
        .run()
        .await;

    let mut stream = server.raw_get("/").await;
    let early = read_for(&mut stream, Duration::from_millis(100)).await;
    let (head, body) = split_response(&early);
    assert!(head.starts_with("HTTP/1.1 504 Gateway Timeout\r\n"), "{head:?}");
    assert!(body.is_empty());

    let (rest, closed) = read_until_closed(&mut stream, Duration::from_millis(2000)).await;
    assert!(closed);
    assert_eq!(rest, b"timed out");
}

#[tokio::test]
async fn silent_until_client_leaves() {
    let server = ServerBuilder::default().run().await;

    let mut stream = server.raw_get("/hang").await;
    let received = read_for(&mut stream, Duration::from_millis(150)).await;
    assert!(received.is_empty(), "got {received:?}");
    drop(stream);

    // Other connections are unaffected.
    let mut stream = server.raw_get("/hang").await;
    assert!(read_for(&mut stream, Duration::from_millis(50)).await.is_empty());
}

#[tokio::test]
async fn cancellation_only_closes_at_deadline() {
    let server = ServerBuilder::default()
        .with_config(|config| {
            config
                .mode(Mode::CancellationOnly)
                .deadline(Duration::from_millis(100))
        })
        .run()
        .await;

    let mut stream = server.raw_get("/").await;
    let early = read_for(&mut stream, Duration::from_millis(50)).await;
    assert!(early.is_empty());

    let (received, closed) = read_until_closed(&mut stream, Duration::from_millis(2000)).await;
    assert!(closed);
    let (head, body) = split_response(&received);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head:?}");
    assert!(body.is_empty());
}

#[tokio::test]
async fn invalid_request_is_dropped() {
    let server = ServerBuilder::default()
        .with_config(|config| config.deadline(Duration::from_millis(50)).payload("x"))
        .run()
        .await;

    let mut stream = networking::TcpStream::connect(server.addr()).await.unwrap();
    stream.write_all(b"NOT HTTP\r\n\r\n").await.unwrap();
    let (received, closed) = read_until_closed(&mut stream, Duration::from_millis(2000)).await;
    assert!(closed);
    assert!(received.is_empty());
}

#[tokio::test]
async fn concurrent_connections() {
    let server = ServerBuilder::default()
        .with_config(|config| config.deadline(Duration::from_millis(100)).payload("ok"))
        .run()
        .await;

    let mut requests = Vec::new();
    for _ in 0..16 {
        let request = server.get("/").timeout(Duration::from_millis(2000)).send();
        requests.push(tokio::spawn(request));
    }
    for request in requests {
        let response = request.await.unwrap().unwrap();
        assert_eq!(response.text().await.unwrap(), "ok");
    }
}
