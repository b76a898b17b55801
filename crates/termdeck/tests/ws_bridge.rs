//! End-to-end tests driving the daemon over a real WebSocket.

#![cfg(unix)]

use std::time::Duration;
use std::time::Instant;

use termdeck_client::Tab;
use termdeck_client::TabEvent;
use termdeck_client::WorkbenchClient;
use termdeck_daemon::ServerConfig;
use termdeck_daemon::ServerHandle;
use termdeck_daemon::Workdir;
use termdeck_proto::encode_bytes;
use termdeck_proto::error_codes;
use termdeck_proto::ClientEvent;
use termdeck_proto::ServerEvent;
use termdeck_proto::SessionId;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn test_config() -> ServerConfig {
    ServerConfig::from_env()
        .with_listen("127.0.0.1:0")
        .with_shell("/bin/cat")
}

async fn start_server(config: ServerConfig, workdir: Workdir) -> ServerHandle {
    termdeck_daemon::start(config, workdir)
        .await
        .expect("start server")
}

async fn connect(handle: &ServerHandle) -> WorkbenchClient {
    WorkbenchClient::connect(&handle.ws_url())
        .await
        .expect("connect")
}

/// Collect decoded output from a tab until `pred` matches.
async fn read_output_until(tab: &mut Tab, pred: impl Fn(&str) -> bool) -> String {
    let mut collected = String::new();
    loop {
        let event = tokio::time::timeout(TEST_TIMEOUT, tab.next_event())
            .await
            .expect("timed out waiting for output")
            .expect("tab stream ended early");
        if let TabEvent::Output(bytes) = event {
            collected.push_str(&String::from_utf8_lossy(&bytes));
            if pred(&collected) {
                return collected;
            }
        }
    }
}

fn pid_is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

fn wait_for_death(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while pid_is_alive(pid) {
        assert!(Instant::now() < deadline, "pid {pid} still alive");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[tokio::test]
async fn test_echo_round_trip_preserves_byte_order() {
    let handle = start_server(test_config(), Workdir::new()).await;
    let client = connect(&handle).await;

    let mut tab = client.open_session(80, 24).await.expect("open");
    assert!(tab.pid().is_some());
    assert_eq!(tab.geometry(), (80, 24));

    tab.input(b"alpha ").await.expect("input");
    tab.input(b"bravo ").await.expect("input");
    tab.input(b"charlie\n").await.expect("input");

    let text = read_output_until(&mut tab, |t| t.contains("charlie")).await;
    let a = text.find("alpha").expect("first marker");
    let b = text.find("bravo").expect("second marker");
    let c = text.find("charlie").expect("third marker");
    assert!(a < b && b < c, "markers out of order: {text}");

    tab.close().await.expect("close");
    handle.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_opens_each_get_their_own_session() {
    let handle = start_server(test_config(), Workdir::new()).await;
    let client = connect(&handle).await;

    // Race several opens on the same connection; every caller must get
    // back a distinct session, never a sibling's ack.
    let (a, b, c) = tokio::join!(
        client.open_session(80, 24),
        client.open_session(100, 30),
        client.open_session(120, 40),
    );
    let mut a = a.expect("open");
    let b = b.expect("open");
    let c = c.expect("open");

    assert_ne!(a.id(), b.id());
    assert_ne!(a.id(), c.id());
    assert_ne!(b.id(), c.id());
    assert!(a.pid().is_some() && b.pid().is_some() && c.pid().is_some());
    assert_eq!(a.geometry(), (80, 24));
    assert_eq!(b.geometry(), (100, 30));
    assert_eq!(c.geometry(), (120, 40));

    // Input addressed to one tab comes back on that tab alone.
    a.input(b"only-a\n").await.expect("input");
    read_output_until(&mut a, |t| t.contains("only-a")).await;

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_closing_one_tab_leaves_the_others_running() {
    let handle = start_server(test_config(), Workdir::new()).await;
    let client = connect(&handle).await;

    let first = client.open_session(80, 24).await.expect("open");
    let second = client.open_session(80, 24).await.expect("open");
    let third = client.open_session(80, 24).await.expect("open");

    let first_pid = first.pid().expect("pid");
    let second_pid = second.pid().expect("pid");
    let third_pid = third.pid().expect("pid");
    assert_ne!(first.id(), second.id());
    assert_ne!(second.id(), third.id());

    second.close().await.expect("close");
    wait_for_death(second_pid);

    assert!(pid_is_alive(first_pid));
    assert!(pid_is_alive(third_pid));

    // The survivors still echo.
    let mut first = first;
    first.input(b"still-here\n").await.expect("input");
    read_output_until(&mut first, |t| t.contains("still-here")).await;

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_tears_down_every_session() {
    let handle = start_server(test_config(), Workdir::new()).await;
    let client = connect(&handle).await;

    let first = client.open_session(80, 24).await.expect("open");
    let second = client.open_session(80, 24).await.expect("open");
    let first_pid = first.pid().expect("pid");
    let second_pid = second.pid().expect("pid");
    let stale_id = first.id().clone();

    client.close().await.expect("close connection");
    wait_for_death(first_pid);
    wait_for_death(second_pid);

    // A fresh connection does not inherit the old connection's ids.
    let mut fresh = connect(&handle).await;
    fresh
        .send(&ClientEvent::Input {
            session_id: stale_id,
            data: encode_bytes(b"ghost\n"),
        })
        .await
        .expect("send");
    let error = tokio::time::timeout(TEST_TIMEOUT, fresh.next_error())
        .await
        .expect("timed out waiting for error")
        .expect("error stream ended");
    match error {
        ServerEvent::Error { code, .. } => assert_eq!(code, error_codes::UNKNOWN_SESSION),
        other => panic!("unexpected event: {other:?}"),
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn test_server_shutdown_tears_down_live_sessions() {
    let handle = start_server(test_config(), Workdir::new()).await;
    let client = connect(&handle).await;

    let first = client.open_session(80, 24).await.expect("open");
    let second = client.open_session(80, 24).await.expect("open");
    let first_pid = first.pid().expect("pid");
    let second_pid = second.pid().expect("pid");

    // Shut down with the connection still open and the tabs still live;
    // the shells must not outlive the daemon.
    handle.shutdown().await;
    wait_for_death(first_pid);
    wait_for_death(second_pid);
}

#[tokio::test]
async fn test_spawn_failure_is_reported_inside_the_tab() {
    let workdir = Workdir::new();
    let handle = start_server(test_config(), workdir.clone()).await;
    let client = connect(&handle).await;

    let healthy = client.open_session(80, 24).await.expect("open");
    let healthy_pid = healthy.pid().expect("pid");

    // Spawning in a directory that does not exist fails; the failure must
    // arrive as terminal output in the new tab, not as a dropped ack.
    workdir.set("/definitely/not/a/directory".into());
    let mut broken = client.open_session(80, 24).await.expect("open");
    assert!(broken.pid().is_none());

    let text = read_output_until(&mut broken, |t| t.contains("failed to start shell")).await;
    assert!(text.contains("/bin/cat"), "{text}");
    match tokio::time::timeout(TEST_TIMEOUT, broken.next_event())
        .await
        .expect("timed out waiting for exit")
    {
        Some(TabEvent::Exit(_)) => {}
        other => panic!("expected exit, got {other:?}"),
    }

    assert!(pid_is_alive(healthy_pid), "healthy session was affected");
    handle.shutdown().await;
}

#[tokio::test]
async fn test_session_limit_is_reported() {
    let config = test_config().with_max_sessions(1);
    let handle = start_server(config, Workdir::new()).await;
    let mut client = connect(&handle).await;

    let _tab = client.open_session(80, 24).await.expect("open");
    client
        .send(&ClientEvent::OpenSession { cols: 80, rows: 24 })
        .await
        .expect("send");

    let error = tokio::time::timeout(TEST_TIMEOUT, client.next_error())
        .await
        .expect("timed out waiting for error")
        .expect("error stream ended");
    match error {
        ServerEvent::Error { code, .. } => assert_eq!(code, error_codes::SESSION_LIMIT),
        other => panic!("unexpected event: {other:?}"),
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn test_connection_limit_refuses_the_handshake() {
    let config = test_config().with_max_connections(1);
    let handle = start_server(config, Workdir::new()).await;

    let _occupant = connect(&handle).await;
    let err = WorkbenchClient::connect(&handle.ws_url())
        .await
        .err()
        .expect("second connection must be refused");
    assert!(
        matches!(err, termdeck_client::ClientError::WebSocket(_)),
        "unexpected error: {err}"
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn test_repeated_parse_errors_close_the_connection() {
    let handle = start_server(test_config(), Workdir::new()).await;
    let mut client = connect(&handle).await;

    for _ in 0..3 {
        client.send_raw("{not json").await.expect("send");
        let error = tokio::time::timeout(TEST_TIMEOUT, client.next_error())
            .await
            .expect("timed out waiting for error")
            .expect("error stream ended");
        match error {
            ServerEvent::Error { code, .. } => assert_eq!(code, error_codes::PARSE_ERROR),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // The third strike closes the socket; the error stream ends with it.
    let closed = tokio::time::timeout(TEST_TIMEOUT, client.next_error())
        .await
        .expect("timed out waiting for close");
    assert!(closed.is_none(), "connection should be closed: {closed:?}");
}

#[tokio::test]
async fn test_resize_and_stale_close_are_handled() {
    let handle = start_server(test_config(), Workdir::new()).await;
    let mut client = connect(&handle).await;

    let tab = client.open_session(80, 24).await.expect("open");
    tab.resize(132, 50).await.expect("resize");
    // Transient zero-sized layouts are silently ignored.
    tab.resize(0, 50).await.expect("zero resize");

    // Closing an id the server never issued is reported, not fatal.
    client
        .send(&ClientEvent::CloseSession {
            session_id: SessionId::new("stale001"),
        })
        .await
        .expect("send");
    let error = tokio::time::timeout(TEST_TIMEOUT, client.next_error())
        .await
        .expect("timed out waiting for error")
        .expect("error stream ended");
    match error {
        ServerEvent::Error { code, .. } => assert_eq!(code, error_codes::UNKNOWN_SESSION),
        other => panic!("unexpected event: {other:?}"),
    }

    // The real tab survived all of it.
    let mut tab = tab;
    tab.input(b"ping\n").await.expect("input");
    read_output_until(&mut tab, |t| t.contains("ping")).await;

    handle.shutdown().await;
}
