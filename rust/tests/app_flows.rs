use std::time::Duration;

use kindred_core::{
    AppAction, ConversationEntry, ConversationKey, MemoryBackend, MessageDeliveryState,
    MessageKind,
};

mod support;
use support::{wait_until, TestApp, PEER_ID, SELF_ID};

fn open(t: &TestApp, peer_id: &str) {
    t.app.dispatch(AppAction::OpenConversation {
        peer_id: peer_id.to_string(),
    });
    t.wait_for_history(peer_id);
}

fn send(t: &TestApp, body: &str) {
    t.app.dispatch(AppAction::SendMessage {
        body: body.to_string(),
        appointment_ref: None,
    });
}

fn key() -> ConversationKey {
    ConversationKey::new(SELF_ID, PEER_ID)
}

fn assert_never_duplicated(t: &TestApp, body: &str) {
    for state in t.updates.states() {
        if let Some(view) = state.conversation {
            assert!(view.messages().filter(|m| m.body == body).count() <= 1);
        }
    }
}

#[test]
fn send_shows_sending_then_exactly_one_delivered_entry() {
    let backend = MemoryBackend::new();
    backend.set_create_latency(Duration::from_millis(300));
    let t = TestApp::start(backend, serde_json::json!({}));
    open(&t, PEER_ID);

    send(&t, "Hello");
    wait_until("optimistic entry", Duration::from_secs(1), || {
        let msgs = t.messages();
        msgs.len() == 1 && msgs[0].body == "Hello"
    });
    let first = t.messages().remove(0);
    assert_eq!(first.delivery, MessageDeliveryState::Sending);
    assert!(first.is_mine);
    let temp_id = first.temp_id.clone().expect("optimistic entry has a temp id");
    assert_eq!(first.id, temp_id);

    wait_until("confirmed", Duration::from_secs(3), || {
        let msgs = t.messages();
        msgs.len() == 1 && msgs[0].delivery == MessageDeliveryState::Delivered
    });
    let confirmed = t.messages().remove(0);
    assert!(confirmed.temp_id.is_none());
    assert_eq!(confirmed.body, "Hello");
    let stored = t.backend.messages(&key());
    assert_eq!(stored.len(), 1);
    assert_eq!(confirmed.id, stored[0].id);
    assert_eq!(confirmed.created_at, stored[0].created_at);

    // Never two bubbles for the same message, including across the grace window.
    assert_never_duplicated(&t, "Hello");
}

#[test]
fn send_without_push_converges_via_create_response() {
    let backend = MemoryBackend::new();
    backend.set_push_enabled(false);
    let t = TestApp::start(backend, serde_json::json!({}));
    open(&t, PEER_ID);

    send(&t, "checking in");
    wait_until("confirmed", Duration::from_secs(3), || {
        let msgs = t.messages();
        msgs.len() == 1 && msgs[0].delivery == MessageDeliveryState::Delivered
    });
    // Poll picks up the same row again; still one entry.
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(t.messages().len(), 1);
}

#[test]
fn echoed_client_ref_matches_exactly() {
    let backend = MemoryBackend::new();
    backend.set_echo_client_ref(true);
    backend.set_create_latency(Duration::from_millis(20));
    // A zero window rules out the content heuristic.
    let t = TestApp::start(backend, serde_json::json!({ "reconcile_window_ms": 0 }));
    open(&t, PEER_ID);

    send(&t, "same time next week?");
    wait_until("optimistic entry", Duration::from_secs(1), || t.messages().len() == 1);
    let temp_id = t.messages()[0].temp_id.clone().expect("temp id");

    wait_until("confirmed", Duration::from_secs(3), || {
        let msgs = t.messages();
        msgs.len() == 1 && msgs[0].delivery == MessageDeliveryState::Delivered
    });
    let stored = t.backend.messages(&key());
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].client_ref.as_deref(), Some(temp_id.as_str()));
    assert_eq!(t.messages()[0].id, stored[0].id);
    assert_never_duplicated(&t, "same time next week?");
}

#[test]
fn create_response_matches_when_content_heuristic_cannot() {
    let backend = MemoryBackend::new();
    backend.set_push_enabled(false);
    backend.set_create_latency(Duration::from_millis(20));
    // No echo, no push, no poll within the test, zero window: only the create response
    // can correlate the row.
    let t = TestApp::start(
        backend,
        serde_json::json!({ "reconcile_window_ms": 0, "poll_interval_ms": 60000 }),
    );
    open(&t, PEER_ID);

    send(&t, "running late");
    wait_until("confirmed", Duration::from_secs(3), || {
        let msgs = t.messages();
        msgs.len() == 1 && msgs[0].delivery == MessageDeliveryState::Delivered
    });
    let stored = t.backend.messages(&key());
    assert_eq!(stored.len(), 1);
    assert!(stored[0].client_ref.is_none());
    assert_eq!(t.messages()[0].id, stored[0].id);
    assert_never_duplicated(&t, "running late");
}

#[test]
fn failed_send_stays_visible_and_retry_delivers() {
    let backend = MemoryBackend::new();
    backend.fail_next_creates(1);
    let t = TestApp::start(backend, serde_json::json!({}));
    open(&t, PEER_ID);

    send(&t, "Are you free Tuesday?");
    wait_until("failed", Duration::from_secs(2), || {
        t.messages()
            .first()
            .is_some_and(|m| matches!(m.delivery, MessageDeliveryState::Failed { .. }))
    });
    let failed = t.messages().remove(0);
    assert_eq!(
        failed.delivery,
        MessageDeliveryState::Failed {
            reason: "Network error".into()
        }
    );

    // Not dropped on its own.
    std::thread::sleep(Duration::from_millis(300));
    let msgs = t.messages();
    assert_eq!(msgs.len(), 1);
    assert!(matches!(msgs[0].delivery, MessageDeliveryState::Failed { .. }));

    let temp_id = failed.temp_id.unwrap();
    t.app.dispatch(AppAction::RetryMessage {
        temp_id: temp_id.clone(),
    });
    wait_until("delivered after retry", Duration::from_secs(3), || {
        let msgs = t.messages();
        msgs.len() == 1 && msgs[0].delivery == MessageDeliveryState::Delivered
    });
    assert_eq!(t.backend.create_calls(), 2);
    assert_eq!(t.backend.messages(&key()).len(), 1);

    // The entry is gone from the ledger; a second retry is a no-op.
    t.app.dispatch(AppAction::RetryMessage { temp_id });
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(t.backend.create_calls(), 2);
}

#[test]
fn dismiss_removes_only_the_failed_entry() {
    let backend = MemoryBackend::new();
    let t = TestApp::start(backend, serde_json::json!({}));
    open(&t, PEER_ID);

    t.backend.fail_next_creates(1);
    send(&t, "first");
    wait_until("first failed", Duration::from_secs(2), || {
        t.messages()
            .iter()
            .any(|m| matches!(m.delivery, MessageDeliveryState::Failed { .. }))
    });
    send(&t, "second");
    wait_until("second delivered", Duration::from_secs(3), || {
        t.messages()
            .iter()
            .any(|m| m.body == "second" && m.delivery == MessageDeliveryState::Delivered)
    });

    let temp_id = t
        .messages()
        .into_iter()
        .find(|m| m.body == "first")
        .and_then(|m| m.temp_id)
        .unwrap();
    t.app.dispatch(AppAction::DismissMessage { temp_id });
    wait_until("dismissed", Duration::from_secs(2), || {
        t.messages().iter().all(|m| m.body != "first")
    });
    let bodies: Vec<String> = t.messages().into_iter().map(|m| m.body).collect();
    assert_eq!(bodies, vec!["second".to_string()]);
}

#[test]
fn send_times_out_into_failed() {
    let backend = MemoryBackend::new();
    backend.set_create_latency(Duration::from_millis(1_500));
    let t = TestApp::start(backend, serde_json::json!({ "send_timeout_ms": 150 }));
    open(&t, PEER_ID);

    send(&t, "slow network");
    wait_until("timed out", Duration::from_secs(2), || {
        t.messages().first().is_some_and(|m| {
            m.delivery
                == MessageDeliveryState::Failed {
                    reason: "Request timed out".into(),
                }
        })
    });
}

#[test]
fn blank_sends_are_ignored() {
    let t = TestApp::start(MemoryBackend::new(), serde_json::json!({}));
    open(&t, PEER_ID);
    send(&t, "   \n ");
    std::thread::sleep(Duration::from_millis(150));
    assert!(t.messages().is_empty());
    assert_eq!(t.backend.create_calls(), 0);
}

#[test]
fn appointment_and_call_invite_kinds() {
    let t = TestApp::start(MemoryBackend::new(), serde_json::json!({}));
    open(&t, PEER_ID);

    t.app.dispatch(AppAction::SendMessage {
        body: String::new(),
        appointment_ref: Some("appt-31".into()),
    });
    wait_until("appointment delivered", Duration::from_secs(3), || {
        t.messages()
            .first()
            .is_some_and(|m| m.delivery == MessageDeliveryState::Delivered)
    });
    t.app.dispatch(AppAction::SendCallInvite {
        call_id: "call-9".into(),
        is_video: true,
    });
    wait_until("both delivered", Duration::from_secs(3), || {
        let msgs = t.messages();
        msgs.len() == 2
            && msgs
                .iter()
                .all(|m| m.delivery == MessageDeliveryState::Delivered)
    });
    let kinds: Vec<MessageKind> = t.messages().into_iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MessageKind::Appointment {
                appointment_ref: "appt-31".into()
            },
            MessageKind::CallInvite {
                call_id: "call-9".into(),
                is_video: true
            },
        ]
    );
}

#[test]
fn paging_loads_older_messages_until_exhausted() {
    let backend = MemoryBackend::new();
    for i in 0..70 {
        let (from, to) = if i % 2 == 0 {
            (PEER_ID, SELF_ID)
        } else {
            (SELF_ID, PEER_ID)
        };
        backend.insert_message(from, to, &format!("m{i}"), 1_700_000_000_000 + i * 60_000);
    }
    let t = TestApp::start(backend, serde_json::json!({ "page_size": 30 }));
    open(&t, PEER_ID);

    let view = t.conversation().unwrap();
    assert_eq!(view.messages().count(), 30);
    assert!(view.can_load_older);
    assert_eq!(view.messages().next().unwrap().body, "m40");
    assert!(matches!(view.entries[0], ConversationEntry::Header { .. }));

    t.app.dispatch(AppAction::LoadOlderMessages);
    wait_until("second page", Duration::from_secs(2), || {
        t.conversation()
            .is_some_and(|c| c.messages().count() == 60 && !c.loading_older)
    });
    t.app.dispatch(AppAction::LoadOlderMessages);
    wait_until("last page", Duration::from_secs(2), || {
        t.conversation()
            .is_some_and(|c| c.messages().count() == 70 && !c.loading_older)
    });

    let view = t.conversation().unwrap();
    assert!(!view.can_load_older);
    let times: Vec<i64> = view.messages().map(|m| m.created_at).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(view.messages().next().unwrap().body, "m0");
}

#[test]
fn history_fetch_failure_keeps_loaded_messages() {
    let backend = MemoryBackend::new();
    for i in 0..40 {
        backend.insert_message(PEER_ID, SELF_ID, &format!("m{i}"), 1_700_000_000_000 + i * 1_000);
    }
    let t = TestApp::start(backend, serde_json::json!({ "page_size": 30 }));
    open(&t, PEER_ID);
    assert_eq!(t.messages().len(), 30);

    t.backend.fail_next_fetches(1);
    t.app.dispatch(AppAction::LoadOlderMessages);
    wait_until("history error", Duration::from_secs(2), || {
        t.conversation().is_some_and(|c| c.history_error.is_some())
    });
    let view = t.conversation().unwrap();
    assert_eq!(view.messages().count(), 30);
    assert!(!view.loading_older);
    assert!(t.state().toast.is_some());
    assert!(t.updates.last_toast().is_some());

    t.app.dispatch(AppAction::ClearToast);
    t.app.dispatch(AppAction::LoadOlderMessages);
    wait_until("retry loads the rest", Duration::from_secs(2), || {
        t.conversation()
            .is_some_and(|c| c.messages().count() == 40 && c.history_error.is_none())
    });
    assert!(t.state().toast.is_none());
}

#[test]
fn closing_drops_optimistic_entries() {
    let backend = MemoryBackend::new();
    backend.fail_next_creates(1);
    let t = TestApp::start(backend, serde_json::json!({}));
    open(&t, PEER_ID);

    send(&t, "never landed");
    wait_until("failed", Duration::from_secs(2), || {
        t.messages()
            .first()
            .is_some_and(|m| matches!(m.delivery, MessageDeliveryState::Failed { .. }))
    });

    t.app.dispatch(AppAction::CloseConversation {
        peer_id: PEER_ID.to_string(),
    });
    wait_until("closed", Duration::from_secs(1), || t.conversation().is_none());

    open(&t, PEER_ID);
    assert!(t.messages().is_empty());
}

#[test]
fn dropping_the_app_releases_the_push_subscription() {
    let t = TestApp::start(MemoryBackend::new(), serde_json::json!({}));
    open(&t, PEER_ID);
    assert!(t.backend.is_subscribed(&key()));

    let backend = t.shutdown();
    wait_until("unsubscribed", Duration::from_secs(2), || {
        !backend.is_subscribed(&key())
    });
}

#[test]
fn switching_conversations_gives_a_fresh_session() {
    let backend = MemoryBackend::new();
    backend.insert_message("therapist-2", SELF_ID, "from the other one", 1_700_000_000_000);
    backend.set_create_latency(Duration::from_millis(400));
    let t = TestApp::start(backend, serde_json::json!({}));
    open(&t, PEER_ID);

    send(&t, "for the first therapist");
    open(&t, "therapist-2");

    let bodies: Vec<String> = t.messages().into_iter().map(|m| m.body).collect();
    assert_eq!(bodies, vec!["from the other one".to_string()]);

    // The stale close for the first conversation must not tear down the second.
    t.app.dispatch(AppAction::CloseConversation {
        peer_id: PEER_ID.to_string(),
    });
    std::thread::sleep(Duration::from_millis(600));
    let view = t.conversation().unwrap();
    assert_eq!(view.peer_id, "therapist-2");
    assert!(view
        .messages()
        .all(|m| m.body != "for the first therapist"));
}

#[test]
fn polling_delivers_incoming_when_push_is_unavailable() {
    let backend = MemoryBackend::new();
    backend.set_push_enabled(false);
    let t = TestApp::start(backend, serde_json::json!({ "poll_interval_ms": 100 }));
    open(&t, PEER_ID);

    t.backend.deliver_incoming(PEER_ID, SELF_ID, "are you there?");
    wait_until("polled", Duration::from_secs(2), || {
        t.messages().iter().any(|m| m.body == "are you there?")
    });
    let msg = t.messages().remove(0);
    assert!(!msg.is_mine);
    assert_eq!(msg.delivery, MessageDeliveryState::Delivered);
}

#[test]
fn pushed_duplicates_render_once() {
    let t = TestApp::start(MemoryBackend::new(), serde_json::json!({}));
    open(&t, PEER_ID);

    let msg = t.backend.deliver_incoming(PEER_ID, SELF_ID, "see you soon");
    t.app.push_message(msg.clone());
    t.app.push_message(msg);
    wait_until("received", Duration::from_secs(2), || !t.messages().is_empty());
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(t.messages().len(), 1);
}

#[test]
fn conversation_key_is_order_independent() {
    assert_eq!(
        kindred_core::conversation_key("b", "a"),
        kindred_core::conversation_key("a", "b")
    );
    assert_eq!(kindred_core::conversation_key("b", "a"), "a:b");
}
