//! End-to-end tests: client against the emulator and scripted peers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use ttp20::server::build_response;
use ttp20::{
    ChecksumMode, Client, ClientConfig, DeviceTime, Error, PollOutcome, Server, ServerConfig,
};
use ttp20_core::{Control, Frame, corrupt_checksum, extract_frame};

type AcceptLoop = JoinHandle<ttp20::Result<()>>;

async fn spawn_server(config: ServerConfig) -> (Arc<Server>, AcceptLoop, u16) {
    let server = Arc::new(Server::bind(config).await.unwrap());
    let port = server.local_addr().port();
    let runner = Arc::clone(&server);
    let accept = tokio::spawn(async move { runner.start().await });
    (server, accept, port)
}

fn server_config(mode: ChecksumMode) -> ServerConfig {
    ServerConfig::new("127.0.0.1", 0).with_checksum_mode(mode)
}

fn client_config(port: u16, mode: ChecksumMode) -> ClientConfig {
    ClientConfig::new("127.0.0.1", port)
        .with_checksum_mode(mode)
        .with_response_timeout(Duration::from_millis(500))
        .with_retry_backoff(Duration::from_millis(20))
}

fn assert_recent(time: DeviceTime) {
    let drift = (DeviceTime::now().as_naive() - time.as_naive()).num_seconds().abs();
    assert!(drift <= 2, "device time {} is {}s off", time, drift);
}

/// Read one frame from a raw stream
async fn read_frame(stream: &mut TcpStream) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);
    loop {
        if let Some(frame) = extract_frame(&mut buf) {
            return frame;
        }
        let n = timeout(Duration::from_secs(2), stream.read_buf(&mut buf))
            .await
            .expect("no response in time")
            .unwrap();
        assert!(n > 0, "peer closed before a full frame arrived");
    }
}

/// Read-time reply to `request`, signed with `mode`
fn time_reply(request: &Frame, mode: ChecksumMode) -> BytesMut {
    build_response(request, DeviceTime::now()).encode(mode).unwrap()
}

/// Scripted device: `respond(request, n)` produces the bytes for the n-th
/// response (0-based) on the first accepted connection
async fn scripted_device(respond: fn(&Frame, usize) -> BytesMut) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut sent = 0;
        loop {
            let mut buf = BytesMut::new();
            let raw = loop {
                if let Some(frame) = extract_frame(&mut buf) {
                    break frame;
                }
                if stream.read_buf(&mut buf).await.unwrap_or(0) == 0 {
                    return;
                }
            };
            let response = respond(&Frame::decode(&raw).unwrap(), sent);
            sent += 1;
            if stream.write_all(&response).await.is_err() {
                return;
            }
        }
    });

    port
}

/// Device that accepts connections and never answers
async fn silent_device() -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });

    (port, accepted)
}

/// Device that reads requests and never answers
///
/// Counts complete requests and fires `hung_up` once the client closes.
async fn mute_device() -> (u16, Arc<AtomicUsize>, oneshot::Receiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);
    let (hung_up_tx, hung_up) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = BytesMut::new();
        while stream.read_buf(&mut buf).await.unwrap_or(0) > 0 {
            while extract_frame(&mut buf).is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
        let _ = hung_up_tx.send(());
    });

    (port, requests, hung_up)
}

#[tokio::test]
async fn test_poll_round_trip_both_modes() {
    for mode in ChecksumMode::ALL {
        let (server, accept, port) = spawn_server(server_config(mode)).await;
        let client = Client::new(client_config(port, mode).with_retry_count(0));

        let report = client.poll_once().await;

        assert_eq!(report.attempts, 1, "{}", mode);
        assert_recent(report.time().expect("poll failed"));
        assert!(client.is_connected());

        client.stop().await;
        server.stop().await;
        accept.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_fragmented_responses_reassemble() {
    for mode in ChecksumMode::ALL {
        let config = server_config(mode).with_fragment_probability(1.0);
        let (server, accept, port) = spawn_server(config).await;
        let client = Client::new(client_config(port, mode).with_retry_count(0));

        for _ in 0..3 {
            let report = client.poll_once().await;
            assert!(report.is_success(), "{}: {:?}", mode, report);
            assert_eq!(report.attempts, 1);
        }

        client.stop().await;
        server.stop().await;
        accept.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_corrupt_responses_exhaust_retries() {
    let config = server_config(ChecksumMode::Crc16).with_bad_checksum_probability(1.0);
    let (server, accept, port) = spawn_server(config).await;
    let client = Client::new(client_config(port, ChecksumMode::Crc16).with_retry_count(2));

    let report = client.poll_once().await;

    assert_eq!(report.attempts, 3);
    assert!(matches!(
        report.outcome,
        PollOutcome::Failed(Error::Core(ttp20_core::Error::ChecksumMismatch))
    ));
    // Bad checksums are retried without redialing
    assert!(client.is_connected());

    client.stop().await;
    server.stop().await;
    accept.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_retry_recovers_from_one_bad_response() {
    let port = scripted_device(|request, n| {
        let mut response = time_reply(request, ChecksumMode::Sum);
        if n == 0 {
            corrupt_checksum(&mut response, ChecksumMode::Sum);
        }
        response
    })
    .await;
    let client = Client::new(client_config(port, ChecksumMode::Sum).with_retry_count(2));

    let report = client.poll_once().await;

    assert_eq!(report.attempts, 2);
    assert_recent(report.time().expect("retry did not recover"));

    client.stop().await;
}

#[tokio::test]
async fn test_response_in_other_mode_still_verifies() {
    // Device answers in crc16 while the client is configured for sum:
    // verification is mode-agnostic, so the response is still accepted
    let port = scripted_device(|request, _| time_reply(request, ChecksumMode::Crc16)).await;
    let client = Client::new(client_config(port, ChecksumMode::Sum).with_retry_count(0));

    let report = client.poll_once().await;

    assert!(report.is_success(), "{:?}", report);
    client.stop().await;
}

#[tokio::test]
async fn test_silent_device_times_out_and_redials() {
    let (port, accepted) = silent_device().await;
    let config = client_config(port, ChecksumMode::Sum)
        .with_response_timeout(Duration::from_millis(200))
        .with_retry_count(1);
    let client = Client::new(config);

    let report = client.poll_once().await;

    assert_eq!(report.attempts, 2);
    assert!(matches!(
        report.outcome,
        PollOutcome::Failed(Error::Transport(ttp20_transport::Error::ReadTimeout))
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(accepted.load(Ordering::SeqCst) >= 2);

    client.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_stop_interrupts_pending_poll() {
    let (port, _) = silent_device().await;
    let config = client_config(port, ChecksumMode::Sum)
        .with_response_timeout(Duration::from_secs(30))
        .with_retry_count(0);
    let client = Client::new(config);

    let poller = client.clone();
    let poll = tokio::spawn(async move { poller.poll_once().await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    timeout(Duration::from_secs(5), client.stop())
        .await
        .expect("stop did not return");

    let report = timeout(Duration::from_secs(1), poll).await.unwrap().unwrap();
    assert!(!report.is_success());
    assert!(report.attempts <= 1);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_client_start_connects() {
    let (server, accept, port) = spawn_server(server_config(ChecksumMode::Sum)).await;
    let client = Client::new(client_config(port, ChecksumMode::Sum));

    client.start().unwrap();

    let connected = timeout(Duration::from_secs(3), async {
        while !client.is_connected() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(connected.is_ok());

    client.stop().await;
    server.stop().await;
    accept.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_acks_and_survives_bad_frame() {
    let (server, accept, port) = spawn_server(server_config(ChecksumMode::Sum)).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    // Wrong checksum (0x09 instead of 0x08), then the same request intact
    stream
        .write_all(&[0x68, 0x03, 0x68, 0x00, 0x01, 0x07, 0x09, 0x16])
        .await
        .unwrap();
    stream
        .write_all(&[0x68, 0x03, 0x68, 0x00, 0x01, 0x07, 0x08, 0x16])
        .await
        .unwrap();

    let raw = read_frame(&mut stream).await;
    let expected = Frame::new(Control::REPLY, 0x01, &b"\x07OK"[..])
        .encode(ChecksumMode::Sum)
        .unwrap();
    assert_eq!(&raw[..], &expected[..]);

    drop(stream);
    server.stop().await;
    accept.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_answers_other_adapter_and_garbage_prefix() {
    let (server, accept, port) = spawn_server(server_config(ChecksumMode::Crc16)).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    let mut request = vec![0x00, 0xFF, 0x13];
    let frame = Frame::request(0x07, vec![0x01]).encode(ChecksumMode::Crc16).unwrap();
    request.extend_from_slice(&frame);
    stream.write_all(&request).await.unwrap();

    let response = Frame::decode(&read_frame(&mut stream).await).unwrap();
    assert!(response.is_reply());
    assert_eq!(response.address, 0x07);
    assert_eq!(response.data[0], 0x01);
    assert_recent(DeviceTime::parse(std::str::from_utf8(&response.data[1..]).unwrap()).unwrap());

    drop(stream);
    server.stop().await;
    accept.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_handles_concurrent_connections() {
    let (server, accept, port) = spawn_server(server_config(ChecksumMode::Sum)).await;

    let mut streams = Vec::new();
    for _ in 0..3 {
        streams.push(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
    }
    let request = Frame::request(0x01, vec![0x01]).encode(ChecksumMode::Sum).unwrap();
    for stream in &mut streams {
        stream.write_all(&request).await.unwrap();
    }
    for stream in &mut streams {
        let response = Frame::decode(&read_frame(stream).await).unwrap();
        assert_eq!(response.data[0], 0x01);
    }

    drop(streams);
    server.stop().await;
    accept.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_stop_drains_in_flight_response() {
    let config = server_config(ChecksumMode::Sum).with_response_delay(Duration::from_millis(300));
    let (server, accept, port) = spawn_server(config).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    let request = Frame::request(0x01, vec![0x01]).encode(ChecksumMode::Sum).unwrap();
    stream.write_all(&request).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    timeout(Duration::from_secs(5), server.stop())
        .await
        .expect("stop did not return");
    accept.await.unwrap().unwrap();

    // The handler finished its response before stop returned
    let response = Frame::decode(&read_frame(&mut stream).await).unwrap();
    assert!(response.is_reply());

    // No new connections after stop
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn test_unexpected_reply_is_not_retried() {
    let port = scripted_device(|request, _| {
        request.reply(&b"\x07OK"[..]).encode(ChecksumMode::Sum).unwrap()
    })
    .await;
    let client = Client::new(client_config(port, ChecksumMode::Sum).with_retry_count(2));

    let report = client.poll_once().await;

    assert_eq!(report.attempts, 1);
    assert!(matches!(
        report.outcome,
        PollOutcome::Rejected(Error::UnexpectedCommand(0x07))
    ));

    client.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_polls_and_stop_waits_for_it() {
    let (port, requests, hung_up) = mute_device().await;
    let config = client_config(port, ChecksumMode::Sum)
        .with_poll_interval(Duration::from_millis(100))
        .with_response_timeout(Duration::from_secs(30))
        .with_retry_count(0);
    let client = Client::new(config);

    client.start().unwrap();

    // Fires on the next wall-clock second divisible by 5
    timeout(Duration::from_secs(7), async {
        while requests.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("scheduler never polled");

    // The scheduled poll is still waiting for its response here
    timeout(Duration::from_secs(5), client.stop())
        .await
        .expect("stop did not return");

    // The poll task ended and released the connection before stop returned
    timeout(Duration::from_secs(1), hung_up)
        .await
        .expect("connection still open after stop")
        .unwrap();
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_idle_timeout_slides() {
    let config =
        server_config(ChecksumMode::Sum).with_idle_read_timeout(Duration::from_millis(300));
    let (server, accept, port) = spawn_server(config).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let request = Frame::request(0x01, vec![0x01]).encode(ChecksumMode::Sum).unwrap();

    // Traffic every 150 ms keeps the connection open well past one window
    for _ in 0..4 {
        stream.write_all(&request).await.unwrap();
        let response = Frame::decode(&read_frame(&mut stream).await).unwrap();
        assert!(response.is_reply());
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    // Silent past the window: the server hangs up
    let mut byte = [0u8; 1];
    let n = timeout(Duration::from_secs(2), stream.read(&mut byte))
        .await
        .expect("idle connection was not closed")
        .unwrap();
    assert_eq!(n, 0);

    server.stop().await;
    accept.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_stop_with_peer_not_reading() {
    let (server, accept, port) = spawn_server(server_config(ChecksumMode::Sum)).await;

    let socket = TcpSocket::new_v4().unwrap();
    socket.set_recv_buffer_size(4096).unwrap();
    let stream = socket.connect(server.local_addr()).await.unwrap();
    // Keep the read half open but never read from it
    let (_unread, mut writer) = stream.into_split();

    let request = Frame::request(0x01, vec![0x01]).encode(ChecksumMode::Sum).unwrap();
    let batch = request.repeat(1000);
    let batches = Arc::new(AtomicUsize::new(0));
    let sent = Arc::clone(&batches);
    let flood = tokio::spawn(async move {
        while writer.write_all(&batch).await.is_ok() {
            sent.fetch_add(1, Ordering::SeqCst);
        }
    });

    // Wait until the flood stalls: the server is stuck writing responses
    // and has stopped reading requests
    let mut last = usize::MAX;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let now = batches.load(Ordering::SeqCst);
        if now == last {
            break;
        }
        last = now;
    }

    timeout(Duration::from_secs(5), server.stop())
        .await
        .expect("stop hung behind a blocked response write");
    accept.await.unwrap().unwrap();

    flood.abort();
}
