//! End-to-end sync scenarios against the scripted server.
//!
//! Each test drives a `SimSession` the way an operator and the server would:
//! select, send, receive, lose the connection. Invariants are checked after
//! every step by the session itself; the tests add oracle checks on what the
//! operator would see.

use std::time::Duration;

use parley_client::{
    ClientConfig, ClientError, ConnectionState, ConversationId, DeliveryState, Notice, Role,
};
use parley_harness::{SimEnv, SimServer, SimSession};

fn server() -> SimServer {
    let mut server = SimServer::default();
    server.add_user("c1", "Ada", "Lovelace");
    server.add_user("c2", "Grace", "Hopper");
    server.set_online(["c1", "c2"]);
    server
}

fn connected(server: SimServer) -> SimSession {
    let mut session = SimSession::new(SimEnv::new(), server);
    session.connect("tok").unwrap();
    assert_eq!(session.client().connection_state(), ConnectionState::Connected);
    session.take_sent();
    session
}

fn bodies(session: &SimSession, id: &str) -> Vec<(String, DeliveryState)> {
    session
        .client()
        .store()
        .thread(&ConversationId::from(id))
        .map(|t| t.messages.iter().map(|m| (m.body.clone(), m.state)).collect())
        .unwrap_or_default()
}

fn unread(session: &SimSession, id: &str) -> u32 {
    session.client().store().summary(&ConversationId::from(id)).map_or(0, |s| s.unread_count)
}

#[test]
fn connect_loads_presence_and_list() {
    let session = connected(server());
    let client = session.client();

    let online: Vec<_> = client.presence().online().map(|id| id.as_str().to_string()).collect();
    assert_eq!(online, vec!["c1", "c2"]);

    let summary = client.store().summary(&ConversationId::from("c2")).unwrap();
    assert_eq!(summary.title(), "Grace Hopper");
    assert_eq!(summary.counterpart.email.as_deref(), Some("c2@example.com"));
}

#[test]
fn connect_transcript() {
    let mut session = SimSession::new(SimEnv::new(), server());
    session.connect("tok").unwrap();
    session.select("c1").unwrap();

    insta::assert_snapshot!(session.take_sent().join("\n"), @r#"
    40{"token":"Bearer tok"}
    42["get_online_users"]
    42["admin_get_chats",{}]
    42["get_chat_history",{"userId":"c1"}]
    "#);
}

#[test]
fn appends_after_hydration_stay_after_history() {
    let mut server = server();
    server.user_message("c1", "earlier", 1);
    let mut session = connected(server);

    session.select("c1").unwrap();
    session.deliver_all();
    session.user_writes("c1", "later");
    session.deliver_all();
    session.send("c1", "reply").unwrap();

    assert_eq!(bodies(&session, "c1"), vec![
        ("earlier".to_string(), DeliveryState::Sent),
        ("later".to_string(), DeliveryState::Sent),
        ("reply".to_string(), DeliveryState::Pending),
    ]);
}

#[test]
fn late_history_updates_its_own_conversation_only() {
    let mut server = server();
    server.user_message("c1", "from ada", 1);
    server.user_message("c2", "from grace", 2);
    server.config_mut().hold_history = true;
    let mut session = connected(server);

    session.select("c1").unwrap();
    session.select("c2").unwrap();
    session.release_held();

    // Only the response for c1 arrives
    assert!(session.deliver_one());
    assert_eq!(bodies(&session, "c1"), vec![("from ada".to_string(), DeliveryState::Sent)]);
    assert!(bodies(&session, "c2").is_empty());
    assert_eq!(session.client().store().selected(), Some(&ConversationId::from("c2")));

    session.deliver_all();
    assert_eq!(bodies(&session, "c2"), vec![("from grace".to_string(), DeliveryState::Sent)]);
}

#[test]
fn untagged_histories_are_attributed_in_request_order() {
    let mut server = server();
    server.user_message("c1", "from ada", 1);
    server.user_message("c2", "from grace", 2);
    server.config_mut().hold_history = true;
    server.config_mut().tag_history = false;
    let mut session = connected(server);

    session.select("c1").unwrap();
    session.select("c2").unwrap();
    session.release_held();
    session.deliver_all();

    assert_eq!(bodies(&session, "c1"), vec![("from ada".to_string(), DeliveryState::Sent)]);
    assert_eq!(bodies(&session, "c2"), vec![("from grace".to_string(), DeliveryState::Sent)]);
}

#[test]
fn tagged_histories_tolerate_reordering() {
    let mut server = server();
    server.user_message("c1", "from ada", 1);
    server.user_message("c2", "from grace", 2);
    server.config_mut().hold_history = true;
    let mut session = connected(server);

    session.select("c1").unwrap();
    session.select("c2").unwrap();
    session.release_held_reversed();
    session.deliver_all();

    assert_eq!(bodies(&session, "c1"), vec![("from ada".to_string(), DeliveryState::Sent)]);
    assert_eq!(bodies(&session, "c2"), vec![("from grace".to_string(), DeliveryState::Sent)]);
}

#[test]
fn failed_history_lookup_does_not_shift_later_histories() {
    let mut server = server();
    server.user_message("c1", "from ada", 1);
    server.user_message("c2", "from grace", 2);
    server.config_mut().tag_history = false;
    let mut session = connected(server);

    session.select("c1").unwrap();
    session.deliver_all();
    assert_eq!(bodies(&session, "c1"), vec![("from ada".to_string(), DeliveryState::Sent)]);

    session.server_mut().config_mut().failing_history.insert("c1".to_string());
    session.select("c2").unwrap();
    session.select("c1").unwrap();
    session.user_writes("c2", "still there?");
    session.select("c2").unwrap();
    session.deliver_all();

    assert_eq!(bodies(&session, "c1"), vec![("from ada".to_string(), DeliveryState::Sent)]);
    assert_eq!(bodies(&session, "c2"), vec![
        ("from grace".to_string(), DeliveryState::Sent),
        ("still there?".to_string(), DeliveryState::Sent),
    ]);
    // The failed lookup is the only request left unanswered
    assert_eq!(session.client().outstanding_history(), 1);
    assert!(session.take_notices().iter().any(|n| matches!(n, Notice::ServerError { .. })));
}

#[test]
fn unlabelled_messages_are_routed_by_operator_id() {
    let mut server = server();
    server.config_mut().label_roles = false;
    let config = ClientConfig { operator_id: Some("op".to_string()), ..ClientConfig::default() };
    let mut session = SimSession::with_config(SimEnv::new(), server, config);
    session.connect("tok").unwrap();

    session.user_writes("c1", "hello");
    session.deliver_all();
    assert_eq!(bodies(&session, "c1"), vec![("hello".to_string(), DeliveryState::Sent)]);
    assert_eq!(unread(&session, "c1"), 1);

    session.select("c1").unwrap();
    let local_id = session.send("c1", "hi, how can I help?").unwrap();
    session.deliver_all();

    assert_eq!(bodies(&session, "c1"), vec![
        ("hello".to_string(), DeliveryState::Sent),
        ("hi, how can I help?".to_string(), DeliveryState::Sent),
    ]);
    assert_eq!(session.client().store().message(local_id).unwrap().role, Role::Operator);
    assert!(session.client().store().thread(&ConversationId::from("op")).is_none());
}

#[test]
fn send_then_echo_yields_single_sent_entry() {
    let mut session = connected(server());
    session.select("c1").unwrap();
    session.deliver_all();

    let local_id = session.send("c1", "hi").unwrap();
    assert_eq!(bodies(&session, "c1"), vec![("hi".to_string(), DeliveryState::Pending)]);

    session.deliver_all();
    assert_eq!(bodies(&session, "c1"), vec![("hi".to_string(), DeliveryState::Sent)]);

    let message = session.client().store().message(local_id).unwrap();
    assert_eq!(message.role, Role::Operator);
    assert!(message.server_id.is_some());
}

#[test]
fn echo_without_correlation_matches_by_content() {
    let mut server = server();
    server.config_mut().echo_correlation = false;
    let mut session = connected(server);

    session.send("c1", "hi").unwrap();
    session.send("c1", "hi").unwrap();
    session.deliver_all();

    assert_eq!(bodies(&session, "c1"), vec![
        ("hi".to_string(), DeliveryState::Sent),
        ("hi".to_string(), DeliveryState::Sent),
    ]);
}

#[test]
fn send_without_echo_fails_once() {
    let mut server = server();
    server.config_mut().echo_sends = false;
    let mut session = connected(server);

    session.send("c1", "hello?").unwrap();
    session.deliver_all();
    session.advance(Duration::from_secs(16));

    assert_eq!(bodies(&session, "c1"), vec![("hello?".to_string(), DeliveryState::Failed)]);
    let failures: Vec<_> = session
        .take_notices()
        .into_iter()
        .filter(|n| matches!(n, Notice::SendFailed(ClientError::SendTimeout { .. })))
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(session.client().connection_state(), ConnectionState::Connected);

    // No retry, no second notice
    session.advance(Duration::from_secs(16));
    assert!(session.take_notices().is_empty());
    assert_eq!(session.take_sent().iter().filter(|f| f.contains("send_message")).count(), 1);
}

#[test]
fn late_echo_upgrades_failed_send() {
    let mut server = server();
    server.config_mut().hold_echoes = true;
    let mut session = connected(server);

    session.send("c1", "slow").unwrap();
    session.advance(Duration::from_secs(16));
    assert_eq!(bodies(&session, "c1"), vec![("slow".to_string(), DeliveryState::Failed)]);

    session.release_held();
    session.deliver_all();
    assert_eq!(bodies(&session, "c1"), vec![("slow".to_string(), DeliveryState::Sent)]);
}

#[test]
fn unread_counts_until_selected() {
    let mut session = connected(server());
    session.select("c1").unwrap();
    session.deliver_all();

    for body in ["one", "two", "three"] {
        session.user_writes("c2", body);
    }
    session.user_writes("c1", "seen");
    session.deliver_all();

    assert_eq!(unread(&session, "c2"), 3);
    assert_eq!(unread(&session, "c1"), 0);

    session.select("c2").unwrap();
    assert_eq!(unread(&session, "c2"), 0);
    session.deliver_all();
    assert_eq!(unread(&session, "c2"), 0);
}

#[test]
fn list_snapshot_never_shows_selected_as_unread() {
    let mut session = connected(server());
    session.select("c1").unwrap();
    session.deliver_all();

    // The server counts this as unread; the operator is looking at it
    session.server_mut().user_message("c1", "quiet", 5);
    let frame = session.server().list_update_frame();
    session.push(frame);
    session.deliver_all();

    assert_eq!(unread(&session, "c1"), 0);
}

#[test]
fn reconnect_resyncs_presence_and_selected_history_only() {
    let mut session = connected(server());
    session.select("c2").unwrap();
    session.deliver_all();
    session.select("c1").unwrap();
    session.deliver_all();
    session.take_sent();

    session.drop_transport();
    assert_eq!(session.client().connection_state(), ConnectionState::Degraded);
    assert!(
        session.take_notices().iter().any(|n| matches!(n, Notice::Reconnecting { attempt: 1, .. }))
    );

    session.advance(Duration::from_secs(2));
    session.deliver_all();
    assert_eq!(session.client().connection_state(), ConnectionState::Connected);

    let sent = session.take_sent();
    assert!(sent.contains(&r#"42["get_online_users"]"#.to_string()));
    let histories: Vec<_> = sent.iter().filter(|f| f.contains("get_chat_history")).collect();
    assert_eq!(histories, vec![r#"42["get_chat_history",{"userId":"c1"}]"#]);
}

#[test]
fn sends_while_degraded_go_out_after_reconnect() {
    let mut session = connected(server());
    session.drop_transport();

    let local_id = session.send("c1", "queued").unwrap();
    assert!(session.take_sent().is_empty());

    session.advance(Duration::from_secs(2));
    session.deliver_all();

    assert_eq!(session.client().store().message(local_id).unwrap().state, DeliveryState::Sent);
    assert_eq!(session.server().chat("c1").len(), 1);
}

#[test]
fn presence_snapshots_replace() {
    let mut session = connected(server());

    session.server_mut().set_online(["u1", "u2"]);
    let frame = session.server().presence_frame();
    session.push(frame);
    session.server_mut().set_online(["u3"]);
    let frame = session.server().presence_frame();
    session.push(frame);
    session.deliver_all();

    let online: Vec<_> =
        session.client().presence().online().map(|id| id.as_str().to_string()).collect();
    assert_eq!(online, vec!["u3"]);
}

#[test]
fn rejected_credential_is_fatal() {
    let mut server = server();
    server.config_mut().rejection = Some("jwt expired".into());
    let mut session = SimSession::new(SimEnv::new(), server);

    session.connect("stale").unwrap();
    assert_eq!(session.client().connection_state(), ConnectionState::Closed);

    let notices = session.take_notices();
    assert_eq!(notices.len(), 1);
    assert!(matches!(
        &notices[0],
        Notice::ConnectionFailed(ClientError::Authentication { message }) if message == "jwt expired"
    ));

    // No retry
    session.advance(Duration::from_secs(60));
    assert_eq!(session.server().sessions(), 1);
}

#[test]
fn unreachable_server_surfaces_network_error_once() {
    let mut session = SimSession::new(SimEnv::new(), server());
    session.set_reachable(false);
    session.connect("tok").unwrap();

    for _ in 0..20 {
        session.advance(Duration::from_secs(40));
    }

    assert_eq!(session.client().connection_state(), ConnectionState::Disconnected);
    let failures: Vec<_> = session
        .take_notices()
        .into_iter()
        .filter(|n| matches!(n, Notice::ConnectionFailed(_)))
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], Notice::ConnectionFailed(ClientError::Network { .. })));
}

#[test]
fn silent_server_is_detected_as_lost() {
    let mut session = connected(server());

    session.advance(Duration::from_secs(46));
    assert_eq!(session.client().connection_state(), ConnectionState::Degraded);
}

#[test]
fn server_ping_is_answered() {
    let mut session = connected(server());
    let frame = session.server().ping_frame();
    session.push(frame);
    session.deliver_all();

    assert_eq!(session.take_sent(), vec!["3".to_string()]);
}

#[test]
fn list_trigger_refetches_presence_and_list() {
    let mut session = connected(server());
    let frame = session.server().list_trigger_frame();
    session.push(frame);
    assert!(session.deliver_one());

    assert_eq!(session.take_sent(), vec![
        r#"42["get_online_users"]"#.to_string(),
        r#"42["admin_get_chats",{}]"#.to_string(),
    ]);
}

#[test]
fn server_error_is_a_notice_not_a_failure() {
    let mut session = connected(server());
    let frame = session.server().error_frame("chat not found");
    session.push(frame);
    session.deliver_all();

    assert!(matches!(
        session.take_notices().as_slice(),
        [Notice::ServerError { message }] if message == "chat not found"
    ));
    assert_eq!(session.client().connection_state(), ConnectionState::Connected);
}

#[test]
fn server_disconnect_triggers_reconnect() {
    let mut session = connected(server());
    let frame = session.server().disconnect_frame();
    session.push(frame);
    session.deliver_all();
    assert_eq!(session.client().connection_state(), ConnectionState::Degraded);

    session.advance(Duration::from_secs(2));
    session.deliver_all();
    assert_eq!(session.client().connection_state(), ConnectionState::Connected);
    assert_eq!(session.server().sessions(), 2);
}

#[test]
fn list_snapshot_json() {
    let mut server = server();
    server.user_message("c1", "hello", 1_000);

    insta::assert_json_snapshot!(server.list(), { "[].lastMessageAt" => "[time]" }, @r#"
    [
      {
        "_id": "chat-c1",
        "user": {
          "_id": "c1",
          "firstName": "Ada",
          "lastName": "Lovelace",
          "email": "c1@example.com"
        },
        "lastMessage": "hello",
        "lastMessageAt": "[time]",
        "unreadCount": 1
      },
      {
        "_id": "chat-c2",
        "user": {
          "_id": "c2",
          "firstName": "Grace",
          "lastName": "Hopper",
          "email": "c2@example.com"
        },
        "unreadCount": 0
      }
    ]
    "#);
}
