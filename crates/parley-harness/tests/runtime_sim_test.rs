//! The production runtime driven against the in-process server.
//!
//! Real tokio scheduling, simulated clock: the runtime ticks on tokio time,
//! but timeouts and backoff read `SimEnv`, which only moves when the test
//! advances it.

use std::time::Duration;

use parley_app::{Runtime, RuntimeConfig, SessionHandle};
use parley_client::{ConnectionState, DeliveryState, Notice};
use parley_harness::{SimDriver, SimEnv, SimRemote, SimServer};

fn server() -> SimServer {
    let mut server = SimServer::default();
    server.add_user("c1", "Ada", "Lovelace");
    server.add_user("c2", "Alan", "Turing");
    server.set_online(["c1"]);
    server
}

fn start(server: SimServer) -> (SessionHandle, SimRemote, SimEnv) {
    let env = SimEnv::new();
    let driver = SimDriver::new(server, env.clone());
    let remote = driver.remote();
    let (runtime, handle) = Runtime::new(driver, env.clone(), RuntimeConfig::new("sim://"));
    tokio::spawn(runtime.run());
    (handle, remote, env)
}

async fn connected(server: SimServer) -> (SessionHandle, SimRemote, SimEnv) {
    let (handle, remote, env) = start(server);
    handle.connect("secret").await.unwrap();
    let mut view = handle.subscribe();
    view.wait_for(|v| v.connection == ConnectionState::Connected).await.unwrap();
    (handle, remote, env)
}

#[tokio::test]
async fn connect_loads_presence_and_conversations() {
    let (handle, _remote, _env) = connected(server()).await;

    let mut view = handle.subscribe();
    let view = view
        .wait_for(|v| !v.online.is_empty() && v.summaries.len() == 2)
        .await
        .unwrap()
        .clone();
    assert!(view.is_online(&"c1".into()));
    assert!(!view.is_online(&"c2".into()));
}

#[tokio::test]
async fn send_is_confirmed_by_echo() {
    let (handle, remote, _env) = connected(server()).await;

    handle.select("c1").await.unwrap();
    let local_id = handle.send("c1", "hello").await.unwrap();

    let mut view = handle.subscribe();
    view.wait_for(|v| {
        v.thread.iter().any(|m| m.local_id == local_id && m.state == DeliveryState::Sent)
    })
    .await
    .unwrap();
    assert_eq!(remote.with_server(|server, _| server.chat("c1").len()), 1);
}

#[tokio::test]
async fn counterpart_messages_arrive_live() {
    let (handle, remote, _env) = connected(server()).await;
    let mut view = handle.subscribe();
    view.wait_for(|v| v.summaries.len() == 2).await.unwrap();

    remote.user_writes("c2", "are you there?");

    let view = view
        .wait_for(|v| v.summary(&"c2".into()).is_some_and(|s| s.unread_count == 1))
        .await
        .unwrap()
        .clone();
    assert_eq!(view.stats.unread, 1);
}

#[tokio::test]
async fn lost_connection_is_reestablished_after_backoff() {
    let (handle, remote, env) = connected(server()).await;
    let mut notices = handle.notices();

    remote.drop_connection();
    let notice = notices.recv().await.unwrap();
    assert!(matches!(notice, Notice::Reconnecting { attempt: 1, .. }));

    let mut view = handle.subscribe();
    view.wait_for(|v| v.connection == ConnectionState::Degraded).await.unwrap();

    // Backoff reads the simulated clock
    env.advance(Duration::from_secs(2));
    view.wait_for(|v| v.connection == ConnectionState::Connected).await.unwrap();
    assert_eq!(remote.connects(), 2);
}

#[tokio::test]
async fn unconfirmed_send_fails_after_timeout() {
    let (handle, remote, env) = connected(server()).await;
    remote.with_server(|server, _| server.config_mut().echo_sends = false);
    let mut notices = handle.notices();

    handle.select("c1").await.unwrap();
    let local_id = handle.send("c1", "into the void").await.unwrap();

    env.advance(Duration::from_secs(16));

    let notice = notices.recv().await.unwrap();
    assert!(matches!(notice, Notice::SendFailed(_)));

    let mut view = handle.subscribe();
    view.wait_for(|v| {
        v.thread.iter().any(|m| m.local_id == local_id && m.state == DeliveryState::Failed)
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn unreachable_server_keeps_retrying() {
    let (handle, remote, env) = start(server());
    remote.set_reachable(false);
    let mut notices = handle.notices();

    handle.connect("secret").await.unwrap();
    let notice = notices.recv().await.unwrap();
    assert!(matches!(notice, Notice::Reconnecting { attempt: 1, .. }));

    remote.set_reachable(true);
    env.advance(Duration::from_secs(2));

    let mut view = handle.subscribe();
    view.wait_for(|v| v.connection == ConnectionState::Connected).await.unwrap();
    assert_eq!(remote.connects(), 1);
}
