//! Session runtime.
//!
//! The Runtime owns the [`Client`] and the [`Driver`] and is the only place
//! either is touched. It multiplexes three inputs with `tokio::select!`:
//!
//! - requests from [`SessionHandle`]s
//! - text frames from the transport
//! - a periodic tick for timeouts and reconnects
//!
//! Each input becomes one client event; the resulting actions are executed
//! before the next input is taken, so store mutations never interleave.

use std::{collections::VecDeque, time::Duration};

use parley_client::{
    Client, ClientAction, ClientConfig, ClientError, ClientEvent, Environment, Notice,
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    driver::Driver,
    handle::{Request, SessionHandle},
    view::SessionView,
};

/// Default tick period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Transport URL handed to [`Driver::connect`].
    pub url: String,
    /// Client configuration.
    pub client: ClientConfig,
    /// Tick period for timeouts and reconnects.
    pub tick_interval: Duration,
    /// Handle request queue capacity.
    pub request_capacity: usize,
    /// Notice broadcast capacity. Slow subscribers lose the oldest notices.
    pub notice_capacity: usize,
}

impl RuntimeConfig {
    /// Defaults for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: ClientConfig::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            request_capacity: 64,
            notice_capacity: 64,
        }
    }
}

enum Step {
    Request(Request),
    Inbound(Option<String>),
    Tick,
    Shutdown,
}

/// Session runtime.
///
/// # Type Parameters
///
/// - `D`: Transport driver
/// - `E`: Environment for time and randomness
pub struct Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    driver: D,
    client: Client<E>,
    url: String,
    tick_interval: Duration,
    connect_timeout: Duration,
    requests: mpsc::Receiver<Request>,
    view: watch::Sender<SessionView>,
    notices: broadcast::Sender<Notice>,
}

impl<D, E> Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    /// Create a runtime and the first handle to it.
    pub fn new(driver: D, env: E, config: RuntimeConfig) -> (Self, SessionHandle) {
        let connect_timeout = config.client.connection.handshake_timeout;
        let client = Client::new(env, config.client);

        let (request_tx, requests) = mpsc::channel(config.request_capacity.max(1));
        let (view, view_rx) = watch::channel(SessionView::capture(&client));
        let (notices, _) = broadcast::channel(config.notice_capacity.max(1));

        let handle = SessionHandle::new(request_tx, view_rx, notices.clone());
        let runtime = Self {
            driver,
            client,
            url: config.url,
            tick_interval: config.tick_interval,
            connect_timeout,
            requests,
            view,
            notices,
        };
        (runtime, handle)
    }

    /// The client.
    pub fn client(&self) -> &Client<E> {
        &self.client
    }

    /// The driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Run until every [`SessionHandle`] is dropped.
    ///
    /// The session is closed on the way out.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                request = self.requests.recv() => request.map_or(Step::Shutdown, Step::Request),
                text = self.driver.recv_text(), if self.driver.is_connected() => Step::Inbound(text),
                _ = ticker.tick() => Step::Tick,
            };

            if !self.process(step).await {
                break;
            }
        }

        info!("all session handles dropped, shutting down");
        self.dispatch(ClientEvent::Close).await;
        self.driver.disconnect().await;
    }

    /// Returns false when the loop should stop.
    async fn process(&mut self, step: Step) -> bool {
        match step {
            Step::Request(request) => self.handle_request(request).await,
            Step::Inbound(Some(text)) => self.dispatch(ClientEvent::TextReceived(text)).await,
            Step::Inbound(None) => {
                self.driver.disconnect().await;
                let reason = "transport closed by peer".to_string();
                self.dispatch(ClientEvent::TransportClosed { reason }).await;
            },
            Step::Tick => {
                let now = self.client.env().now();
                self.dispatch(ClientEvent::Tick { now }).await;
            },
            Step::Shutdown => return false,
        }
        true
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect { credential, reply } => {
                let result = self.client.handle(ClientEvent::Connect { credential });
                self.reply_and_execute(result, reply).await;
            },
            Request::Select { conversation_id, reply } => {
                let result = self.client.handle(ClientEvent::SelectConversation(conversation_id));
                self.reply_and_execute(result, reply).await;
            },
            Request::Send { conversation_id, body, reply } => {
                match self.client.send(conversation_id, body) {
                    Ok((local_id, actions)) => {
                        let _ = reply.send(Ok(local_id));
                        self.execute(actions).await;
                    },
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    },
                }
            },
            Request::Refresh => self.dispatch(ClientEvent::RefreshConversations).await,
            Request::Close { reply } => {
                self.dispatch(ClientEvent::Close).await;
                let _ = reply.send(());
            },
        }
    }

    async fn reply_and_execute(
        &mut self,
        result: Result<Vec<ClientAction>, ClientError>,
        reply: oneshot::Sender<Result<(), ClientError>>,
    ) {
        match result {
            Ok(actions) => {
                let _ = reply.send(Ok(()));
                self.execute(actions).await;
            },
            Err(err) => {
                let _ = reply.send(Err(err));
            },
        }
    }

    async fn dispatch(&mut self, event: ClientEvent<E::Instant>) {
        let actions = self.follow_up(event);
        self.execute(actions).await;
    }

    fn follow_up(&mut self, event: ClientEvent<E::Instant>) -> Vec<ClientAction> {
        self.client.handle(event).unwrap_or_else(|err| {
            warn!(%err, "client rejected event");
            Vec::new()
        })
    }

    /// Execute client actions, including any the driver's results cause.
    async fn execute(&mut self, actions: Vec<ClientAction>) {
        let mut pending: VecDeque<ClientAction> = actions.into();

        while let Some(action) = pending.pop_front() {
            match action {
                ClientAction::OpenTransport => {
                    let event = match self.open_transport().await {
                        Ok(()) => ClientEvent::TransportOpened,
                        Err(reason) => {
                            warn!(%reason, url = %self.url, "transport failed to open");
                            ClientEvent::TransportClosed { reason }
                        },
                    };
                    pending.extend(self.follow_up(event));
                },
                ClientAction::CloseTransport => self.driver.disconnect().await,
                ClientAction::SendText(text) => {
                    if !self.driver.is_connected() {
                        debug!("dropping frame, transport is down");
                        continue;
                    }
                    if let Err(err) = self.driver.send_text(text).await {
                        warn!(%err, "transport send failed");
                        self.driver.disconnect().await;
                        let reason = err.to_string();
                        pending.extend(self.follow_up(ClientEvent::TransportClosed { reason }));
                    }
                },
                ClientAction::StoreChanged(changes) => {
                    let client = &self.client;
                    self.view.send_modify(|view| view.apply(client, &changes));
                },
                ClientAction::Notice(notice) => {
                    debug!(?notice, "notice");
                    // Nobody listening is fine
                    let _ = self.notices.send(notice);
                },
            }
        }
    }

    async fn open_transport(&mut self) -> Result<(), String> {
        match tokio::time::timeout(self.connect_timeout, self.driver.connect(&self.url)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("transport did not open within {:?}", self.connect_timeout)),
        }
    }
}
