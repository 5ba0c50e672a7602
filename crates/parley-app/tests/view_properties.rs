//! The incrementally maintained view must always equal a fresh capture.
//!
//! Drives a client through random server traffic and operator intents,
//! applying every `StoreChanged` to a long-lived view, and compares it with
//! `SessionView::capture` after each step.

use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parley_app::SessionView;
use parley_client::{Client, ClientAction, ClientConfig, ClientEvent, ConversationId, Environment};
use proptest::prelude::*;

const OPEN: &str = r#"0{"sid":"s","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;

#[derive(Clone, Default)]
struct ManualEnv {
    millis: Arc<AtomicU64>,
}

impl ManualEnv {
    fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Environment for ManualEnv {
    type Instant = Duration;

    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }

    fn sleep(&self, _duration: Duration) -> impl Future<Output = ()> + Send {
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(3);
    }

    fn wall_clock_millis(&self) -> u64 {
        1_000_000 + self.millis.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
enum Op {
    Inbound { conversation: u8 },
    Echo { conversation: u8 },
    Send { conversation: u8 },
    Select { conversation: u8 },
    History { conversation: u8, entries: u8 },
    List { mask: u8 },
    Presence { mask: u8 },
    Advance { secs: u8 },
    DropTransport,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..4).prop_map(|conversation| Op::Inbound { conversation }),
        1 => (0u8..4).prop_map(|conversation| Op::Echo { conversation }),
        2 => (0u8..4).prop_map(|conversation| Op::Send { conversation }),
        2 => (0u8..4).prop_map(|conversation| Op::Select { conversation }),
        1 => (0u8..4, 0u8..4)
            .prop_map(|(conversation, entries)| Op::History { conversation, entries }),
        1 => any::<u8>().prop_map(|mask| Op::List { mask }),
        1 => any::<u8>().prop_map(|mask| Op::Presence { mask }),
        1 => (0u8..20).prop_map(|secs| Op::Advance { secs }),
        1 => Just(Op::DropTransport),
    ]
}

struct Harness {
    env: ManualEnv,
    client: Client<ManualEnv>,
    view: SessionView,
    counter: u64,
}

impl Harness {
    fn connected() -> Self {
        let env = ManualEnv::default();
        let client = Client::new(env.clone(), ClientConfig::default());
        let view = SessionView::capture(&client);
        let mut harness = Self { env, client, view, counter: 0 };
        harness.feed(ClientEvent::Connect { credential: "tok".into() });
        harness
    }

    /// Process an event and everything it leads to. Opening the transport
    /// always succeeds and the server acks straight away.
    fn feed(&mut self, event: ClientEvent<Duration>) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let Ok(actions) = self.client.handle(event) else {
                continue;
            };
            for action in actions {
                match action {
                    ClientAction::StoreChanged(changes) => self.view.apply(&self.client, &changes),
                    ClientAction::OpenTransport => {
                        queue.push_back(ClientEvent::TransportOpened);
                        queue.push_back(ClientEvent::TextReceived(OPEN.into()));
                        queue.push_back(ClientEvent::TextReceived("40".into()));
                    },
                    _ => {},
                }
            }
        }
    }

    fn event(&mut self, name: &str, payload: String) {
        self.feed(ClientEvent::TextReceived(format!(r#"42["{name}",{payload}]"#)));
    }

    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn run(&mut self, op: Op) {
        match op {
            Op::Inbound { conversation } => {
                let n = self.next();
                self.event(
                    "receive_message",
                    format!(
                        r#"{{"_id":"s{n}","senderId":"c{conversation}","receiverId":"op","senderRole":"user","message":"m{n}","timestamp":{}}}"#,
                        1_000_000 + n
                    ),
                );
            },
            Op::Echo { conversation } => {
                let n = self.next();
                self.event(
                    "receive_message",
                    format!(
                        r#"{{"_id":"e{n}","senderId":"op","receiverId":"c{conversation}","senderRole":"admin","message":"hello"}}"#
                    ),
                );
            },
            Op::Send { conversation } => {
                self.feed(ClientEvent::SendMessage {
                    conversation_id: ConversationId::new(format!("c{conversation}")),
                    body: "hello".into(),
                });
            },
            Op::Select { conversation } => {
                self.feed(ClientEvent::SelectConversation(ConversationId::new(format!(
                    "c{conversation}"
                ))));
            },
            Op::History { conversation, entries } => {
                let messages: Vec<String> = (0..entries)
                    .map(|i| {
                        format!(
                            r#"{{"_id":"h{conversation}-{i}","senderId":"c{conversation}","receiverId":"op","senderRole":"user","message":"old {i}","timestamp":{i}}}"#
                        )
                    })
                    .collect();
                self.event(
                    "chat_history",
                    format!(r#"{{"userId":"c{conversation}","messages":[{}]}}"#, messages.join(",")),
                );
            },
            Op::List { mask } => {
                let n = self.next();
                let entries: Vec<String> = (0..4u8)
                    .filter(|i| mask & (1 << i) != 0)
                    .map(|i| {
                        format!(
                            r#"{{"_id":"chat{i}","user":{{"_id":"c{i}","firstName":"User","lastName":"{i}"}},"lastMessage":"list {n}","lastMessageAt":{},"unreadCount":{}}}"#,
                            1_000_000 + n,
                            mask >> 4
                        )
                    })
                    .collect();
                self.event("chat_list", format!("[{}]", entries.join(",")));
            },
            Op::Presence { mask } => {
                let ids: Vec<String> =
                    (0..8u8).filter(|i| mask & (1 << i) != 0).map(|i| format!(r#""c{i}""#)).collect();
                self.event("online_users", format!("[{}]", ids.join(",")));
            },
            Op::Advance { secs } => {
                self.env.advance(Duration::from_secs(u64::from(secs)));
                let now = self.env.now();
                self.feed(ClientEvent::Tick { now });
            },
            Op::DropTransport => {
                self.feed(ClientEvent::TransportClosed { reason: "reset".into() });
            },
        }
    }
}

#[test]
fn prop_incremental_view_matches_capture() {
    proptest!(|(ops in prop::collection::vec(op_strategy(), 1..50))| {
        let mut harness = Harness::connected();
        prop_assert_eq!(&harness.view, &SessionView::capture(&harness.client));

        for op in ops {
            harness.run(op.clone());
            let fresh = SessionView::capture(&harness.client);
            prop_assert_eq!(&harness.view, &fresh, "after {:?}", op);
        }
    });
}
