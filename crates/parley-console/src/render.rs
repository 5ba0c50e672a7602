//! Line output.
//!
//! The console prints only what changed since the last view it saw: the
//! connection state, new messages in the open conversation, delivery state
//! changes, and new unread messages elsewhere.

use std::{
    collections::HashMap,
    io::{self, Write},
};

use parley_app::SessionView;
use parley_client::{
    ConnectionState, ConversationId, ConversationSummary, DeliveryState, LocalId, Message, Notice,
    Role,
};

/// Incremental printer over a [`SessionView`] stream.
#[derive(Debug)]
pub struct Console<W> {
    out: W,
    connection: Option<ConnectionState>,
    selected: Option<ConversationId>,
    /// Delivery state last printed for each message of the open conversation
    shown: HashMap<LocalId, DeliveryState>,
    unread: HashMap<ConversationId, u32>,
}

impl<W: Write> Console<W> {
    /// Printer writing to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            connection: None,
            selected: None,
            shown: HashMap::new(),
            unread: HashMap::new(),
        }
    }

    /// The writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Print what changed since the previous view.
    pub fn view_changed(&mut self, view: &SessionView) -> io::Result<()> {
        if self.connection != Some(view.connection) {
            self.connection = Some(view.connection);
            writeln!(self.out, "-- {}", connection_label(view.connection))?;
        }

        if view.selected != self.selected {
            self.selected.clone_from(&view.selected);
            self.shown.clear();
            if let Some(id) = &view.selected {
                let title = view.summary(id).map_or(id.as_str(), ConversationSummary::title);
                writeln!(self.out, "== {title} ({id})")?;
            }
        }

        for message in &view.thread {
            match self.shown.insert(message.local_id, message.state) {
                None => self.message(view, message)?,
                Some(previous) if previous != message.state => match message.state {
                    DeliveryState::Failed => {
                        writeln!(self.out, "!! not delivered: {}", message.body)?;
                    },
                    DeliveryState::Sent if previous == DeliveryState::Failed => {
                        writeln!(self.out, "-- delivered late: {}", message.body)?;
                    },
                    _ => {},
                },
                Some(_) => {},
            }
        }

        for summary in &view.summaries {
            let id = &summary.conversation_id;
            let before = self.unread.insert(id.clone(), summary.unread_count).unwrap_or(0);
            if summary.unread_count > before && self.selected.as_ref() != Some(id) {
                writeln!(
                    self.out,
                    "** {} ({} unread): {}",
                    summary.title(),
                    summary.unread_count,
                    summary.last_message_preview.as_deref().unwrap_or_default()
                )?;
            }
        }

        Ok(())
    }

    /// Print a notice.
    pub fn notice(&mut self, notice: &Notice) -> io::Result<()> {
        match notice {
            Notice::ConnectionFailed(err) => writeln!(self.out, "!! connection failed: {err}"),
            Notice::Reconnecting { attempt, delay, reason } => {
                writeln!(self.out, "-- connection lost ({reason}), retry {attempt} in {delay:.1?}")
            },
            Notice::SendFailed(err) => writeln!(self.out, "!! {err}"),
            Notice::ServerError { message } => writeln!(self.out, "!! server: {message}"),
        }
    }

    /// Print the conversations matching `query`; an empty query lists all.
    pub fn list(&mut self, view: &SessionView, query: &str) -> io::Result<()> {
        let summaries = view.search(query);
        if summaries.is_empty() {
            return writeln!(self.out, "no conversations");
        }

        for summary in summaries {
            let presence = if view.is_online(&summary.conversation_id) { '*' } else { ' ' };
            let unread = match summary.unread_count {
                0 => String::new(),
                n => format!(" [{n}]"),
            };
            writeln!(
                self.out,
                "{presence} {:<12} {}{unread}  {}",
                summary.conversation_id.as_str(),
                summary.title(),
                summary.last_message_preview.as_deref().unwrap_or_default()
            )?;
        }
        writeln!(
            self.out,
            "{} conversations, {} unread",
            view.stats.conversations, view.stats.unread
        )
    }

    /// Print who is online.
    pub fn online(&mut self, view: &SessionView) -> io::Result<()> {
        if view.online.is_empty() {
            return writeln!(self.out, "nobody online");
        }
        let names: Vec<&str> = view
            .online
            .iter()
            .map(|id| view.summary(id).map_or(id.as_str(), ConversationSummary::title))
            .collect();
        writeln!(self.out, "online: {}", names.join(", "))
    }

    /// Print a plain line.
    pub fn line(&mut self, text: impl std::fmt::Display) -> io::Result<()> {
        writeln!(self.out, "{text}")
    }

    fn message(&mut self, view: &SessionView, message: &Message) -> io::Result<()> {
        let author = match message.role {
            Role::Operator => "you",
            Role::Counterpart => view
                .summary(&message.conversation_id)
                .map_or(message.conversation_id.as_str(), ConversationSummary::title),
        };
        let state = match message.state {
            DeliveryState::Pending => " (sending)",
            DeliveryState::Sent => "",
            DeliveryState::Failed => " (not delivered)",
        };
        writeln!(self.out, "[{}] {author}: {}{state}", clock(message.created_at), message.body)
    }
}

fn connection_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Degraded => "connection lost, reconnecting",
        ConnectionState::Closed => "closed",
    }
}

/// `HH:MM` (UTC) for Unix milliseconds; unknown times print as dashes.
fn clock(millis: u64) -> String {
    if millis == 0 {
        return "--:--".to_string();
    }
    let minutes = millis / 60_000;
    format!("{:02}:{:02}", (minutes / 60) % 24, minutes % 60)
}
