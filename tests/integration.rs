//! Integration tests for ipc-bridge.
//!
//! Two endpoints talk over in-memory pipes or message channels, or one
//! endpoint is driven line by line from the test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ipc_bridge::protocol::{MessageCodec, State};
use ipc_bridge::transport::channel;
use ipc_bridge::{Endpoint, EndpointBuilder, IpcError, Message, Role, Value};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Deserialize)]
struct Ping {
    value: String,
}

fn echo_host() -> EndpointBuilder {
    Endpoint::builder()
        .role(Role::Host)
        .handle("ping", |ping: Ping, _ctx| async move {
            Ok(json!({ "echo": ping.value }))
        })
        .handle("echo", |value: serde_json::Value, _ctx| async move { Ok(value) })
}

/// Frontend and host joined by a duplex line pipe.
fn pipe_pair(frontend: EndpointBuilder, host: EndpointBuilder) -> (Endpoint, Endpoint) {
    let (a, b) = tokio::io::duplex(256 * 1024);
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);
    let (frontend, _) = frontend.spawn_pipe(a_read, a_write);
    let (host, _) = host.spawn_pipe(b_read, b_write);
    (frontend, host)
}

/// Frontend and host joined by message channels.
fn channel_pair(frontend: EndpointBuilder, host: EndpointBuilder) -> (Endpoint, Endpoint) {
    let (to_host, host_rx) = channel(256);
    let (to_frontend, frontend_rx) = channel(256);
    let (frontend, _) = frontend.spawn_channel(to_host, frontend_rx);
    let (host, _) = host.spawn_channel(to_frontend, host_rx);
    (frontend, host)
}

/// A registered command answers with the handler's value.
#[tokio::test]
async fn test_ping_echo_over_pipe() {
    let (frontend, _host) = pipe_pair(Endpoint::builder(), echo_host());

    let value = frontend
        .request("ping", &json!({ "value": "hi" }))
        .await
        .unwrap();
    assert_eq!(value.to_json(), json!({ "echo": "hi" }));
}

/// An unregistered command fails with a not-implemented error.
#[tokio::test]
async fn test_unknown_command_not_implemented() {
    let (frontend, _host) = pipe_pair(Endpoint::builder(), echo_host());

    let err = frontend.request("window.fly", &json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "NotImplementedError");
    assert!(err.to_string().to_lowercase().contains("not implemented"));
}

/// Handler errors travel back with their type and message.
#[tokio::test]
async fn test_handler_error_is_forwarded() {
    let host = Endpoint::builder().handle("fs.stat", |path: String, _ctx| async move {
        Err::<(), _>(IpcError::Remote {
            kind: "NotFoundError".into(),
            message: format!("{path} does not exist"),
        })
    });
    let (frontend, _host) = pipe_pair(Endpoint::builder(), host);

    match frontend.request("fs.stat", "/nope").await {
        Err(IpcError::Remote { kind, message }) => {
            assert_eq!(kind, "NotFoundError");
            assert_eq!(message, "/nope does not exist");
        }
        other => panic!("unexpected {other:?}"),
    }
}

/// A completion for a seq nobody waits on is dropped without effect.
#[tokio::test]
async fn test_unknown_completion_is_ignored() {
    let (to_host, mut host_rx) = channel(8);
    let endpoint = Endpoint::builder().build(to_host);

    endpoint.receive_line("ipc://resolve?seq=3&state=0&value=%22ok%22");

    assert_eq!(endpoint.pending_calls(), 0);
    assert!(!endpoint.is_closed());
    assert!(host_rx.try_recv().is_err());
}

/// Newlines inside values are escaped; a newline in the command is refused.
#[tokio::test]
async fn test_newline_in_value_and_command() {
    let (frontend, _host) = pipe_pair(Endpoint::builder(), echo_host());

    let value = frontend.request("echo", "line1\nline2").await.unwrap();
    assert_eq!(value.as_str(), Some("line1\nline2"));

    let err = frontend.request("bad\ncommand", &()).await.unwrap_err();
    assert!(matches!(err, IpcError::Encoding(_)));
    assert_eq!(frontend.pending_calls(), 0);
}

/// Text with `+`, `&` and `=` survives the query encoding.
#[tokio::test]
async fn test_reserved_characters_round_trip() {
    let (frontend, _host) = pipe_pair(Endpoint::builder(), echo_host());

    let text = "a+b = c & d%20e ünïcödé";
    let value = frontend.request("echo", text).await.unwrap();
    assert_eq!(value.as_str(), Some(text));
}

/// The second completion for one seq is a no-op.
#[tokio::test]
async fn test_double_completion() {
    let (to_host, mut host_rx) = channel(8);
    let endpoint = Endpoint::builder().build(to_host);
    let codec = MessageCodec::default();

    let caller = endpoint.clone();
    let call = tokio::spawn(async move { caller.request("fs.read", &json!({})).await });

    let line = host_rx.recv().await.unwrap();
    let seq = codec.decode(&line).unwrap().seq.unwrap();

    for value in ["first", "second"] {
        let completion = Message::completion(seq, 0, State::Ok, Value::from(value));
        endpoint.receive_line(&codec.encode(&completion).unwrap());
    }

    assert_eq!(call.await.unwrap().unwrap(), Value::from("first"));
    assert_eq!(endpoint.pending_calls(), 0);
}

/// Completions may arrive in any order.
#[tokio::test]
async fn test_out_of_order_completions() {
    let (to_host, mut host_rx) = channel(8);
    let endpoint = Endpoint::builder().build(to_host);
    let codec = MessageCodec::default();

    let mut calls = Vec::new();
    let mut seqs = Vec::new();
    for n in 0..3 {
        let caller = endpoint.clone();
        calls.push(tokio::spawn(async move { caller.request("n", &n).await }));
        let line = host_rx.recv().await.unwrap();
        seqs.push(codec.decode(&line).unwrap().seq.unwrap());
    }

    for (n, seq) in seqs.iter().enumerate().rev() {
        let completion = Message::completion(*seq, 0, State::Ok, Value::Json(json!(n * 10)));
        endpoint.receive_line(&codec.encode(&completion).unwrap());
    }

    for (n, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await.unwrap().unwrap().to_json(), json!(n * 10));
    }
}

/// Input split at arbitrary points is reassembled before dispatch.
#[tokio::test]
async fn test_fragmented_input() {
    let (a, b) = tokio::io::duplex(4096);
    let (b_read, b_write) = tokio::io::split(b);
    let (_host, _) = echo_host().spawn_pipe(b_read, b_write);
    let (a_read, mut a_write) = tokio::io::split(a);

    let line = b"ipc://ping?index=0&seq=R5&value=%7B%22value%22%3A%22split%22%7D\n";
    for chunk in line.chunks(3) {
        a_write.write_all(chunk).await.unwrap();
        a_write.flush().await.unwrap();
        tokio::task::yield_now().await;
    }

    let mut lines = BufReader::new(a_read).lines();
    let reply = lines.next_line().await.unwrap().unwrap();
    let msg = MessageCodec::default().decode(&reply).unwrap();

    assert!(msg.is_completion());
    assert_eq!(msg.seq, Some(5));
    assert_eq!(msg.state, Some(State::Ok));
    assert_eq!(msg.json(), json!({ "echo": "split" }));
}

/// Uploads deliver their bodies, at most 16 at a time.
#[tokio::test]
async fn test_concurrent_uploads() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, p) = (active.clone(), peak.clone());

    let host = Endpoint::builder()
        .role(Role::Host)
        .handle("fs.write", move |name: String, ctx| {
            let (active, peak) = (a.clone(), p.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(json!({ "name": name, "len": ctx.bytes().map_or(0, |b| b.len()) }))
            }
        });
    let (frontend, _host) = channel_pair(Endpoint::builder(), host);

    let mut uploads = Vec::new();
    for n in 0..100usize {
        let frontend = frontend.clone();
        uploads.push(tokio::spawn(async move {
            let body = vec![n as u8; n * 100];
            frontend.write("fs.write", &format!("file{n}"), body).await
        }));
    }

    for (n, upload) in uploads.into_iter().enumerate() {
        let value = upload.await.unwrap().unwrap();
        assert_eq!(
            value.to_json(),
            json!({ "name": format!("file{n}"), "len": n * 100 })
        );
    }
    assert!(peak.load(Ordering::SeqCst) <= 16);
    assert_eq!(frontend.dispatcher().active(), 0);
}

/// A frame survives a line pipe as long as its bytes contain no newline.
#[tokio::test]
async fn test_upload_over_pipe() {
    let host = Endpoint::builder().handle("blob", |_: (), ctx| async move {
        Ok(ctx.bytes().map(|b| b.to_vec()).unwrap_or_default())
    });
    let (frontend, _host) = pipe_pair(Endpoint::builder(), host);

    let body: Vec<u8> = (0..=255u8).filter(|b| *b != b'\n').collect();
    let value = frontend.write("blob", &(), body.clone()).await.unwrap();
    let echoed: Vec<u8> = value.deserialize().unwrap();
    assert_eq!(echoed, body);

    let err = frontend.write("blob", &(), &b"a\nb"[..]).await.unwrap_err();
    assert!(matches!(err, IpcError::Encoding(_)));
    assert_eq!(frontend.pending_calls(), 0);
}

/// A call with no answer times out and is evicted.
#[tokio::test(start_paused = true)]
async fn test_request_timeout() {
    let (to_host, _host_rx) = channel(8);
    let endpoint = Endpoint::builder()
        .request_timeout(Duration::from_secs(1))
        .build(to_host);

    let err = endpoint.request("never", &()).await.unwrap_err();
    assert_eq!(err.kind(), "TimeoutError");
    assert_eq!(endpoint.pending_calls(), 0);
}

/// Shutdown cancels pending calls and queued uploads.
#[tokio::test]
async fn test_shutdown_cancels_everything() {
    let (to_host, _host_rx) = channel(64);
    let endpoint = Endpoint::builder().upload_concurrency(1).build(to_host);

    let mut uploads = Vec::new();
    for _ in 0..2 {
        let endpoint = endpoint.clone();
        uploads.push(tokio::spawn(async move {
            endpoint.write("blob", &(), &b"body"[..]).await
        }));
    }
    while endpoint.dispatcher().active() < 1 || endpoint.dispatcher().waiting() < 1 {
        tokio::task::yield_now().await;
    }
    while endpoint.pending_calls() < 1 {
        tokio::task::yield_now().await;
    }

    endpoint.shutdown();
    for upload in uploads {
        assert!(matches!(upload.await.unwrap(), Err(IpcError::Cancelled)));
    }
    assert!(matches!(
        endpoint.request("late", &()).await,
        Err(IpcError::Cancelled)
    ));
    endpoint.wait_for_shutdown().await;
}

/// Handlers can emit events to the calling window before answering.
#[tokio::test]
async fn test_handler_events_arrive_before_completion() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let frontend = Endpoint::builder().on("progress", move |v| {
        counter.fetch_add(v.to_json().as_u64().unwrap_or(0) as usize, Ordering::SeqCst);
    });
    let host = Endpoint::builder().handle("work", |steps: u64, ctx| async move {
        for _ in 0..steps {
            ctx.emit("progress", &1).await?;
        }
        Ok::<_, IpcError>(steps)
    });
    let (frontend, _host) = pipe_pair(frontend, host);

    let done = frontend.request("work", &5).await.unwrap();
    assert_eq!(done.to_json(), json!(5));
    assert_eq!(seen.load(Ordering::SeqCst), 5);
}

/// Heartbeats are answered by default on both sides.
#[tokio::test]
async fn test_heartbeat_both_ways() {
    let (frontend, host) = pipe_pair(Endpoint::builder(), echo_host());
    frontend.heartbeat().await.unwrap();
    host.heartbeat().await.unwrap();
}

/// Host log lines and exit reach the frontend as events.
#[tokio::test]
async fn test_host_lifecycle() {
    let lines = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = lines.clone();
    let exited = Arc::new(AtomicUsize::new(0));
    let flag = exited.clone();

    let frontend = Endpoint::builder()
        .on("stdout", move |v| {
            sink.lock().unwrap().push(v.as_str().unwrap_or_default().to_string());
        })
        .on("exit", move |_| {
            flag.fetch_add(1, Ordering::SeqCst);
        });
    let (frontend, host) = channel_pair(frontend, echo_host());

    host.log("starting").await.unwrap();
    host.log("50% done").await.unwrap();
    host.exit(0).await.unwrap();

    while exited.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(*lines.lock().unwrap(), vec!["starting", "50% done"]);
    assert!(host.is_closed());
    assert!(!frontend.is_closed());
}
