//! Integration tests for the event stream client, against wiremock and raw TCP servers.

use std::time::Duration;

use sse_chat::app::App;
use sse_chat::completions::CompletionsClient;
use sse_chat::sse::{EventSource, SseEvent, SseRequest};
use sse_chat::state::ChatMessage;
use sse_chat::SseError;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}

fn delta_frame(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"delta": {"content": text}}]})
    )
}

async fn collect(mut source: EventSource) -> Vec<SseEvent> {
    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), source.next())
        .await
        .expect("stream stalled")
    {
        events.push(event);
    }
    events
}

fn messages(events: &[SseEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            SseEvent::Message(data) => Some(data.as_str()),
            SseEvent::Error(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn post_sends_headers_and_strips_hint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("content-type", "application/json"))
        .and(header("x-csrf-token", "tok-123"))
        .and(body_json(serde_json::json!({"hello": "world"})))
        .respond_with(sse_response("data: one\n\n: ping\n\ndata: two\n\n"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let url = format!("{}/v1/chat/completions/sse?stream=true", mock_server.uri());
    let request = SseRequest::post_json(&url, &serde_json::json!({"hello": "world"}))
        .unwrap()
        .csrf_token(Some("tok-123".to_string()));

    let events = collect(EventSource::connect(&reqwest::Client::new(), request)).await;
    assert_eq!(messages(&events), vec!["one", "two"]);
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn post_without_token_omits_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(sse_response("data: x\n\n"))
        .mount(&mock_server)
        .await;

    let request = SseRequest::post_json(&mock_server.uri(), &serde_json::json!({})).unwrap();
    let events = collect(EventSource::connect(&reqwest::Client::new(), request)).await;
    assert_eq!(messages(&events), vec!["x"]);

    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("x-csrf-token").is_none());
}

#[tokio::test]
async fn trailing_partial_frame_is_dropped() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(sse_response("data: done\n\ndata: cut off"))
        .mount(&mock_server)
        .await;

    let request = SseRequest::post_json(&mock_server.uri(), &serde_json::json!({})).unwrap();
    let events = collect(EventSource::connect(&reqwest::Client::new(), request)).await;
    assert_eq!(messages(&events), vec!["done"]);
}

#[tokio::test]
async fn error_status_is_single_setup_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("data: nope\n\n"))
        .mount(&mock_server)
        .await;

    let request = SseRequest::post_json(&mock_server.uri(), &serde_json::json!({})).unwrap();
    let events = collect(EventSource::connect(&reqwest::Client::new(), request)).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        SseEvent::Error(err) => {
            assert!(matches!(err, SseError::Status(status) if status.as_u16() == 500));
            assert!(err.is_setup());
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn unreachable_host_is_connect_error() {
    let request = SseRequest::post_json("http://127.0.0.1:1/chat", &serde_json::json!({})).unwrap();
    let events = collect(EventSource::connect(&reqwest::Client::new(), request)).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], SseEvent::Error(SseError::Connect(_))));
}

#[tokio::test]
async fn close_stops_delivery() {
    let mock_server = MockServer::start().await;

    let body: String = (0..50).map(|i| format!("data: {}\n\n", i)).collect();
    Mock::given(method("POST"))
        .respond_with(sse_response(&body))
        .mount(&mock_server)
        .await;

    let request = SseRequest::post_json(&mock_server.uri(), &serde_json::json!({})).unwrap();
    let mut source = EventSource::connect(&reqwest::Client::new(), request);

    let first = source.next().await.unwrap();
    assert!(matches!(first, SseEvent::Message(ref d) if d == "0"));

    source.close();
    source.close();
    assert!(source.is_closed());
    assert!(source.next().await.is_none());
}

#[tokio::test]
async fn close_before_response_sends_nothing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(sse_response("data: late\n\n").set_delay(Duration::from_millis(500)))
        .mount(&mock_server)
        .await;

    let request = SseRequest::post_json(&mock_server.uri(), &serde_json::json!({})).unwrap();
    let mut source = EventSource::connect(&reqwest::Client::new(), request);
    source.close();

    assert!(source.next().await.is_none());
}

async fn drive(app: &mut App) {
    while app.is_streaming() {
        let update = tokio::time::timeout(Duration::from_secs(5), app.next_stream_update())
            .await
            .expect("stream stalled");
        app.apply_stream_update(update);
    }
}

#[tokio::test]
async fn chat_turn_streams_into_one_message() {
    let mock_server = MockServer::start().await;

    let body = [
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n".to_string(),
        delta_frame("Hel"),
        "data: {oops\n\n".to_string(),
        delta_frame("lo"),
        delta_frame(" world"),
        "data: [DONE]\n\n".to_string(),
        delta_frame(" ignored"),
    ]
    .concat();

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_json(serde_json::json!({
            "model": "gpt-3.5-turbo",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        })))
        .respond_with(sse_response(&body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let url = format!("{}/v1/chat/completions/sse?stream=true", mock_server.uri());
    let mut app = App::new(CompletionsClient::new(&url, "gpt-3.5-turbo", None));
    app.input = "hi".to_string();
    app.send();
    assert!(app.loading);

    drive(&mut app).await;

    assert!(!app.loading);
    assert!(app.error.is_none());
    assert_eq!(
        app.messages,
        vec![ChatMessage::user("hi"), ChatMessage::assistant("Hello world")]
    );
}

#[tokio::test]
async fn chat_turn_sends_history() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(sse_response(&format!("{}data: [DONE]\n\n", delta_frame("ok"))))
        .mount(&mock_server)
        .await;

    let mut app = App::new(CompletionsClient::new(&mock_server.uri(), "m", Some("t".to_string())));
    for text in ["first", "second"] {
        app.input = text.to_string();
        app.send();
        drive(&mut app).await;
    }

    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(received[1].headers.get("x-csrf-token").unwrap(), "t");

    let body: serde_json::Value = serde_json::from_slice(&received[1].body).unwrap();
    assert_eq!(
        body["messages"],
        serde_json::json!([
            {"role": "user", "content": "first"},
            {"role": "assistant", "content": "ok"},
            {"role": "user", "content": "second"}
        ])
    );
}

#[tokio::test]
async fn chat_turn_connect_failure_sets_error() {
    let mut app = App::new(CompletionsClient::new("http://127.0.0.1:1/chat", "m", None));
    app.input = "hi".to_string();
    app.send();
    drive(&mut app).await;

    assert!(!app.loading);
    assert_eq!(app.error.as_deref(), Some(sse_chat::app::CONNECT_ERROR));
    assert_eq!(app.messages, vec![ChatMessage::user("hi")]);
}

#[tokio::test]
async fn chat_turn_ends_without_sentinel() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(sse_response(&delta_frame("partial")))
        .mount(&mock_server)
        .await;

    let mut app = App::new(CompletionsClient::new(&mock_server.uri(), "m", None));
    app.input = "hi".to_string();
    app.send();
    drive(&mut app).await;

    assert!(!app.loading);
    assert!(app.error.is_none());
    assert_eq!(app.messages.last().unwrap().content, "partial");
}

/// Read one request off `socket` so closing it later is a clean FIN.
async fn read_request(socket: &mut tokio::net::TcpStream) {
    use tokio::io::AsyncReadExt;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
        let length: usize = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .map(|v| v.trim().parse().unwrap())
            .unwrap_or(0);
        if buf.len() >= end + 4 + length {
            return;
        }
    }
}

const CHUNKED_HEAD: &[u8] =
    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";

fn http_chunk(data: &str) -> Vec<u8> {
    format!("{:x}\r\n{}\r\n", data.len(), data).into_bytes()
}

#[tokio::test]
async fn connection_dropped_mid_stream_is_stream_error() {
    use tokio::io::AsyncWriteExt;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket.write_all(CHUNKED_HEAD).await.unwrap();
        socket.write_all(&http_chunk(&delta_frame("Hel"))).await.unwrap();
        socket.flush().await.unwrap();
        // No terminating chunk: the body ends early
    });

    let url = format!("http://{}/v1/chat/completions", addr);
    let mut app = App::new(CompletionsClient::new(&url, "m", None));
    app.input = "hi".to_string();
    app.send();
    drive(&mut app).await;

    assert_eq!(app.error.as_deref(), Some(sse_chat::app::STREAM_ERROR));
    assert!(!app.loading);
    assert!(!app.is_streaming());
    assert_eq!(
        app.messages,
        vec![ChatMessage::user("hi"), ChatMessage::assistant("Hel")]
    );
}

#[tokio::test]
async fn cancel_stops_live_read_loop() {
    use tokio::io::AsyncWriteExt;

    const FRAMES: usize = 50;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket.write_all(CHUNKED_HEAD).await.unwrap();

        let mut written = 0;
        for text in ["Hel", "x"].into_iter().chain(std::iter::repeat("y")).take(FRAMES) {
            if socket.write_all(&http_chunk(&delta_frame(text))).await.is_err() {
                break;
            }
            written += 1;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        written
    });

    let url = format!("http://{}/v1/chat/completions", addr);
    let mut app = App::new(CompletionsClient::new(&url, "m", None));
    app.input = "hi".to_string();
    app.send();

    for _ in 0..2 {
        let update = tokio::time::timeout(Duration::from_secs(5), app.next_stream_update())
            .await
            .expect("stream stalled");
        app.apply_stream_update(update);
    }
    assert_eq!(app.messages.last().unwrap().content, "Helx");

    app.cancel();
    let snapshot = app.messages.clone();

    let pending = tokio::time::timeout(Duration::from_millis(700), app.next_stream_update()).await;
    assert!(pending.is_err(), "no update expected after cancel");
    assert_eq!(app.messages, snapshot);
    assert!(!app.loading);
    assert!(app.error.is_none());

    // The client hung up, so the server stops long before its last frame
    let written = tokio::time::timeout(Duration::from_secs(3), server)
        .await
        .expect("server kept writing after cancel")
        .unwrap();
    assert!(written < FRAMES);
}
