//! Control-plane tests over a real Unix socket: framing, pipelining,
//! unknown actions, malformed frames, and the thin client.

mod common;

use common::Sandbox;
use procvisor::control::{serve, Client, Reply, Request};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

async fn start_server(sandbox: &Sandbox) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let token = CancellationToken::new();
    let sup = sandbox.supervisor();
    let socket = sandbox.cfg.socket_path.clone();
    let server_token = token.clone();
    let join = tokio::spawn(async move {
        serve(socket, sup, server_token).await.expect("serve");
    });
    // Wait for the socket to appear.
    let socket = sandbox.cfg.socket_path.clone();
    common::wait_until(std::time::Duration::from_secs(5), || {
        let socket = socket.clone();
        async move { tokio::fs::try_exists(&socket).await.unwrap_or(false).then_some(()) }
    })
    .await
    .expect("socket bound");
    (token, join)
}

#[tokio::test]
async fn ping_answers_pong() {
    let sandbox = Sandbox::new();
    let (token, join) = start_server(&sandbox).await;

    let client = Client::new(&sandbox.cfg);
    let reply = client.request(&Request::new("ping")).await.unwrap();
    assert!(reply.success);
    assert_eq!(reply.message, "pong");

    token.cancel();
    let _ = join.await;
}

#[tokio::test]
async fn unknown_actions_are_reported_verbatim() {
    let sandbox = Sandbox::new();
    let (token, join) = start_server(&sandbox).await;

    let client = Client::new(&sandbox.cfg);
    let reply = client.request(&Request::new("reload")).await.unwrap();
    assert!(!reply.success);
    assert_eq!(reply.message, "Unknown command: reload");

    token.cancel();
    let _ = join.await;
}

#[tokio::test]
async fn pipelined_requests_answer_in_order() {
    let sandbox = Sandbox::new();
    let (token, join) = start_server(&sandbox).await;

    let stream = UnixStream::connect(&sandbox.cfg.socket_path).await.unwrap();
    let (reader, mut writer) = stream.into_split();

    writer
        .write_all(b"{\"action\":\"ping\"}\n{\"action\":\"status\"}\n{\"action\":\"ping\"}\n")
        .await
        .unwrap();
    writer.flush().await.unwrap();

    let mut lines = BufReader::new(reader).lines();
    let mut replies = Vec::new();
    for _ in 0..3 {
        let line = lines.next_line().await.unwrap().unwrap();
        replies.push(serde_json::from_str::<Reply>(&line).unwrap());
    }

    assert_eq!(replies[0].message, "pong");
    assert_eq!(replies[1].message, "0 processes");
    assert_eq!(replies[2].message, "pong");

    token.cancel();
    let _ = join.await;
}

#[tokio::test]
async fn malformed_frames_keep_the_stream_usable() {
    let sandbox = Sandbox::new();
    let (token, join) = start_server(&sandbox).await;

    let stream = UnixStream::connect(&sandbox.cfg.socket_path).await.unwrap();
    let (reader, mut writer) = stream.into_split();

    writer.write_all(b"this is not json\n").await.unwrap();
    writer.write_all(b"{\"action\":\"ping\"}\n").await.unwrap();
    writer.flush().await.unwrap();

    let mut lines = BufReader::new(reader).lines();
    let first: Reply =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert!(!first.success);
    assert!(first.message.contains("protocol error"), "{}", first.message);

    let second: Reply =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert!(second.success);
    assert_eq!(second.message, "pong");

    token.cancel();
    let _ = join.await;
}

#[tokio::test]
async fn socket_file_is_removed_on_shutdown() {
    let sandbox = Sandbox::new();
    let (token, join) = start_server(&sandbox).await;
    assert!(tokio::fs::try_exists(&sandbox.cfg.socket_path).await.unwrap());

    token.cancel();
    let _ = join.await;
    assert!(!tokio::fs::try_exists(&sandbox.cfg.socket_path).await.unwrap());
}

#[tokio::test]
async fn transport_failures_map_to_exit_code_two() {
    let sandbox = Sandbox::new();
    // Nothing is listening.
    let client = Client::new(&sandbox.cfg);
    let outcome = client.request(&Request::new("ping")).await;
    assert!(outcome.is_err());
    assert_eq!(procvisor::control::exit_code(&outcome), 2);
}
