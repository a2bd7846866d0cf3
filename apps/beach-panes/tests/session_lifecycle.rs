mod support;

use beach_panes::transport::ReadyState;
use beach_panes::{
    BackoffPolicy, ConnectionStatus, MemoryStore, OverlayKind, ReadinessPolicy, SessionStore,
    TerminalConfig,
};
use std::sync::Arc;
use std::time::Duration;
use support::{Harness, let_timers_run};
use tokio::time::sleep;

#[test_timeout::tokio_timeout_test(10, paused)]
async fn connecting_is_reported_first_and_connected_waits_for_prompt() {
    let harness = Harness::mount(TerminalConfig::default());
    assert_eq!(harness.callbacks.statuses(), vec![ConnectionStatus::Connecting]);

    let socket = harness.last_socket();
    socket.open();
    socket.message(r#"{"type":"status","payload":"connected"}"#);
    socket.message("Welcome to beach\r\n");
    harness.settle().await;
    assert_eq!(harness.callbacks.statuses(), vec![ConnectionStatus::Connecting]);

    socket.message("\u{1b}[32muser@host\u{1b}[0m:~$ ");
    harness.settle().await;
    assert_eq!(
        harness.callbacks.statuses(),
        vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
    );
    assert!(!harness.callbacks.statuses().contains(&ConnectionStatus::Initial));
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn server_status_can_mark_connected_when_configured() {
    let harness = Harness::mount(
        TerminalConfig::default().with_readiness(ReadinessPolicy::PromptOrServerStatus),
    );
    let socket = harness.last_socket();
    socket.open();
    socket.message(r#"{"type":"status","payload":"connected"}"#);
    harness.settle().await;
    assert_eq!(
        harness.orchestrator.primary().status(),
        ConnectionStatus::Connected
    );
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn split_metadata_never_reaches_the_surface() {
    let harness = Harness::mount(TerminalConfig::default());
    let socket = harness.last_socket();
    socket.open();
    socket.message(r#"{"stream":true,"std"#);
    socket.message(r#"in":true,"stdout":true,"stderr":true,"hijack":true}"#);
    harness.settle().await;
    assert!(harness.primary_surface().written.lock().is_empty());

    socket.message("user@host:~$ ");
    harness.settle().await;
    assert_eq!(harness.primary_surface().text(), "user@host:~$ ");
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn metadata_sharing_a_frame_with_output_is_stripped() {
    let harness = Harness::mount(TerminalConfig::default());
    let socket = harness.last_socket();
    socket.open();
    socket.message(r#"{"stream":true,"std"#);
    socket.message("in\":true,\"stdout\":true,\"stderr\":true,\"hijack\":true}\r\nuser@host:~$ ");
    harness.settle().await;
    assert_eq!(harness.primary_surface().text(), "\r\nuser@host:~$ ");
    assert_eq!(
        harness.orchestrator.primary().status(),
        ConnectionStatus::Connected
    );

    let harness = Harness::mount(TerminalConfig::default());
    let socket = harness.last_socket();
    socket.open();
    socket.message(
        r#"{"stream":true,"stdin":true,"stdout":true,"stderr":true,"hijack":true}user@host:~$ "#,
    );
    harness.settle().await;
    assert_eq!(harness.primary_surface().text(), "user@host:~$ ");
    assert!(!harness.primary_surface().text().contains("hijack"));
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn error_then_close_counts_as_one_failure() {
    let harness = Harness::mount(TerminalConfig::default());
    let pane = harness.primary_id();
    let socket = harness.last_socket();
    socket.open();
    // Both land in the queue before the pane handles either.
    socket.error("connection reset by peer");
    socket.close(1006, "");
    harness.settle().await;

    assert_eq!(harness.orchestrator.backoff().attempts(pane), 1);
    let reconnecting = harness
        .callbacks
        .statuses()
        .iter()
        .filter(|status| **status == ConnectionStatus::Reconnecting)
        .count();
    assert_eq!(reconnecting, 1);

    let_timers_run().await;
    harness.settle().await;
    assert_eq!(harness.connector.opened(), 2);
    assert_eq!(harness.orchestrator.backoff().attempts(pane), 1);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn close_after_error_on_detached_socket_is_dropped() {
    let harness = Harness::mount(TerminalConfig::default());
    let socket = harness.last_socket();
    socket.open();
    socket.error("boom");
    harness.settle().await;
    assert!(socket.is_detached());
    assert!(!socket.close(1006, ""));
    assert_eq!(
        harness
            .orchestrator
            .backoff()
            .attempts(harness.primary_id()),
        1
    );
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn reconnect_always_builds_a_new_socket() {
    let harness = Harness::mount(TerminalConfig::default());
    let first = harness.last_socket();
    first.set_ready_state(ReadyState::Connecting);
    assert_eq!(harness.connector.opened(), 1);

    for expected in 2..=4 {
        harness.orchestrator.primary().reconnect();
        harness.settle().await;
        assert_eq!(harness.connector.opened(), expected);
    }

    assert!(first.is_detached());
    assert!(first.closed_with().is_some());
    // A socket that finishes its handshake after being abandoned is ignored.
    assert!(!first.open());
    harness.settle().await;
    assert_eq!(
        harness.orchestrator.primary().status(),
        ConnectionStatus::Connecting
    );
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn timer_reconnect_does_not_wait_for_stuck_socket() {
    let harness = Harness::mount(TerminalConfig::default());
    let first = harness.last_socket();
    first.close(1006, "");
    let_timers_run().await;
    harness.settle().await;

    let second = harness.last_socket();
    assert_ne!(first.id(), second.id());
    // Second socket never finishes its handshake; the server reports the
    // failure through a close anyway.
    assert_eq!(second.ready_state(), ReadyState::Connecting);
    second.close(1006, "");
    sleep(Duration::from_secs(2)).await;
    harness.settle().await;
    assert_eq!(harness.connector.opened(), 3);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn enter_while_reconnecting_cancels_to_disconnected() {
    let harness = Harness::mount(TerminalConfig::default());
    harness.last_socket().close(1006, "");
    let_timers_run().await;
    harness.last_socket().close(1006, "");
    harness.settle().await;
    assert_eq!(
        harness.orchestrator.primary().status(),
        ConnectionStatus::Reconnecting
    );
    let pane = harness.primary_id();
    assert!(harness.orchestrator.backoff().is_pending(pane));

    harness.orchestrator.primary().send_input("\r");
    harness.settle().await;
    assert_eq!(
        harness.orchestrator.primary().status(),
        ConnectionStatus::Disconnected
    );
    assert!(harness.orchestrator.backoff().is_cancelled(pane));

    sleep(Duration::from_secs(120)).await;
    harness.settle().await;
    assert_eq!(harness.connector.opened(), 2);
    assert_eq!(
        harness.callbacks.statuses().last(),
        Some(&ConnectionStatus::Disconnected)
    );

    // Enter again now means retry.
    harness.orchestrator.primary().send_input("\r");
    harness.settle().await;
    assert_eq!(
        harness.orchestrator.primary().status(),
        ConnectionStatus::Connecting
    );
    assert_eq!(harness.connector.opened(), 3);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn auth_close_codes_are_terminal() {
    for code in [4001u16, 4008] {
        let harness = Harness::mount(TerminalConfig::default());
        let socket = harness.last_socket();
        socket.open();
        socket.close(code, "nope");
        harness.settle().await;
        sleep(Duration::from_secs(60)).await;
        harness.settle().await;

        assert_eq!(
            harness.orchestrator.primary().status(),
            ConnectionStatus::Disconnected,
            "code {code}"
        );
        assert_eq!(harness.connector.opened(), 1, "code {code}");
        let overlay = harness.orchestrator.primary().overlay().unwrap();
        assert_eq!(overlay.retry_hint, Some("press ⏎ to retry"));
    }
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn session_end_close_notifies_callbacks() {
    let harness = Harness::mount(TerminalConfig::default());
    let socket = harness.last_socket();
    harness.connect(&socket).await;
    socket.close(4000, "session ended");
    harness.settle().await;
    assert_eq!(*harness.callbacks.ended.lock(), 1);
    assert_eq!(
        harness.orchestrator.primary().status(),
        ConnectionStatus::Disconnected
    );
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn gives_up_after_max_attempts() {
    let policy = BackoffPolicy {
        max_attempts: 3,
        ..BackoffPolicy::default()
    };
    let harness = Harness::mount(TerminalConfig::default().with_backoff(policy));
    for _ in 0..4 {
        harness.last_socket().close(1006, "");
        sleep(Duration::from_secs(10)).await;
        harness.settle().await;
    }

    assert_eq!(harness.connector.opened(), 4);
    assert_eq!(
        harness.orchestrator.primary().status(),
        ConnectionStatus::Disconnected
    );
    let overlay = harness.primary_surface().current_overlay().unwrap();
    assert_eq!(overlay.kind, OverlayKind::MaxReconnects { max_attempts: 3 });
    assert_eq!(overlay.title, "MAX RECONNECTS");

    sleep(Duration::from_secs(120)).await;
    assert_eq!(harness.connector.opened(), 4);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn prompt_clears_overlay_and_resets_backoff() {
    let harness = Harness::mount(TerminalConfig::default());
    let pane = harness.primary_id();
    harness.last_socket().close(1006, "");
    let_timers_run().await;
    harness.settle().await;
    assert_eq!(harness.orchestrator.backoff().attempts(pane), 1);
    assert!(harness.primary_surface().current_overlay().is_some());

    let socket = harness.last_socket();
    harness.connect(&socket).await;
    assert_eq!(harness.orchestrator.backoff().attempts(pane), 0);
    assert!(harness.primary_surface().current_overlay().is_none());
    assert!(harness.orchestrator.primary().overlay().is_none());
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn countdown_ticks_reach_the_surface() {
    let harness = Harness::mount(TerminalConfig::default());
    harness.last_socket().close(1006, "");
    let_timers_run().await;
    harness.last_socket().close(1006, "");
    sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.connector.opened(), 3);
    // Third failure waits 2s.
    harness.last_socket().close(1006, "");
    sleep(Duration::from_secs(3)).await;
    harness.settle().await;
    let ticks = harness.primary_surface().countdown.lock().clone();
    assert!(ticks.contains(&Duration::from_secs(2)), "{ticks:?}");
    assert!(ticks.contains(&Duration::from_secs(1)), "{ticks:?}");
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn server_error_envelope_stops_retrying() {
    let harness = Harness::mount(TerminalConfig::default());
    let socket = harness.last_socket();
    harness.connect(&socket).await;
    socket.message(r#"{"type":"status","payload":"error","reason":"pty spawn failed"}"#);
    socket.close(1011, "");
    harness.settle().await;
    sleep(Duration::from_secs(60)).await;
    harness.settle().await;

    assert_eq!(harness.orchestrator.primary().status(), ConnectionStatus::Error);
    assert_eq!(harness.connector.opened(), 1);
    let overlay = harness.orchestrator.primary().overlay().unwrap();
    assert_eq!(
        overlay.kind,
        OverlayKind::Error {
            reason: "pty spawn failed".into()
        }
    );
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn resume_sends_persisted_session_id_first() {
    let store = Arc::new(MemoryStore::new());
    store.set("beach-panes.primary.session_id", "sess-abc");
    let harness = Harness::mount_with_store(
        TerminalConfig::default()
            .with_resume_on_reload(true)
            .with_api_key("key-1"),
        store,
    );
    let socket = harness.last_socket();
    socket.open();
    harness.settle().await;

    let sent = socket.sent();
    let auth: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(auth["sessionId"], "sess-abc");
    assert_eq!(auth["apiKey"], "key-1");
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn resume_disabled_omits_session_id() {
    let store = Arc::new(MemoryStore::new());
    store.set("beach-panes.primary.session_id", "sess-abc");
    let harness = Harness::mount_with_store(TerminalConfig::default(), store);
    let socket = harness.last_socket();
    socket.open();
    harness.settle().await;
    assert_eq!(socket.sent()[0], "{}");
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn hello_is_reported_and_persisted() {
    let harness = Harness::mount(TerminalConfig::default().with_resume_on_reload(true));
    let socket = harness.last_socket();
    socket.open();
    socket.message(r#"{"type":"hello","sessionId":"sess-1"}"#);
    harness.settle().await;

    assert_eq!(*harness.callbacks.session_ids.lock(), vec!["sess-1".to_string()]);
    assert_eq!(
        harness.store.get("beach-panes.primary.session_id").as_deref(),
        Some("sess-1")
    );

    // The next socket resumes it.
    harness.orchestrator.primary().reconnect();
    harness.settle().await;
    let next = harness.last_socket();
    next.open();
    harness.settle().await;
    assert!(next.sent()[0].contains(r#""sessionId":"sess-1""#));
}
