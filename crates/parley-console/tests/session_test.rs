//! Console loop against the scripted server.

use parley_app::{Runtime, RuntimeConfig, SessionHandle};
use parley_client::{ConnectionState, DeliveryState};
use parley_console::{Console, run_session};
use parley_harness::{SimDriver, SimEnv, SimRemote, SimServer};

async fn connected() -> (SessionHandle, SimRemote) {
    let mut server = SimServer::default();
    server.add_user("c1", "Ada", "Lovelace");
    server.set_online(["c1"]);

    let env = SimEnv::new();
    let driver = SimDriver::new(server, env.clone());
    let remote = driver.remote();
    let (runtime, handle) = Runtime::new(driver, env, RuntimeConfig::new("sim://"));
    tokio::spawn(runtime.run());

    handle.connect("tok").await.unwrap();
    let mut view = handle.subscribe();
    view.wait_for(|v| v.connection == ConnectionState::Connected && v.summaries.len() == 1)
        .await
        .unwrap();
    (handle, remote)
}

async fn run(handle: &SessionHandle, input: &str) -> String {
    let mut console = Console::new(Vec::new());
    run_session(handle, input.as_bytes(), &mut console).await.unwrap();
    String::from_utf8(console.into_inner()).unwrap()
}

#[tokio::test]
async fn selected_conversation_receives_typed_text() {
    let (handle, remote) = connected().await;

    let output = run(&handle, "/select c1\nhello Ada\n/list\n").await;
    assert!(output.contains("* c1           Ada Lovelace"), "{output}");

    let mut view = handle.subscribe();
    view.wait_for(|v| {
        v.thread.iter().any(|m| m.body == "hello Ada" && m.state == DeliveryState::Sent)
    })
    .await
    .unwrap();
    assert_eq!(remote.with_server(|server, _| server.chat("c1").len()), 1);
}

#[tokio::test]
async fn text_without_a_conversation_is_not_sent() {
    let (handle, remote) = connected().await;
    remote.take_sent();

    let output = run(&handle, "hello?\n").await;

    assert!(output.contains("open a conversation first"), "{output}");
    assert!(remote.take_sent().iter().all(|frame| !frame.contains("send_message")));
}

#[tokio::test]
async fn quit_stops_reading() {
    let (handle, remote) = connected().await;
    remote.take_sent();

    run(&handle, "/quit\n/select c1\n").await;

    assert!(remote.take_sent().iter().all(|frame| !frame.contains("get_chat_history")));
}

#[tokio::test]
async fn bad_commands_are_reported_and_skipped() {
    let (handle, _remote) = connected().await;

    let output = run(&handle, "/frobnicate\n/select\n/online\n").await;

    assert!(output.contains("unknown command /frobnicate"), "{output}");
    assert!(output.contains("usage: /select <conversation id>"), "{output}");
    assert!(output.contains("online: Ada Lovelace"), "{output}");
}
