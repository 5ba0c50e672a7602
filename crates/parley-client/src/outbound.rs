//! Optimistic sends and echo reconciliation.
//!
//! A send is shown immediately as `Pending`. The server confirms it only by
//! echoing the message back through `receive_message` (or by including it in
//! a later history). The coordinator matches echoes to outstanding sends:
//!
//! 1. By correlation id, when the server echoes `clientMessageId`
//! 2. Otherwise by conversation and exact body, oldest send first, with the
//!    echo timestamp within `echo_tolerance` of the local creation time. An
//!    echo without a timestamp must arrive within `echo_tolerance` of the send
//!
//! Sends not confirmed within `send_timeout` become `Failed`. A failed send
//! still matches a late echo for `late_echo_window`, after which it is
//! forgotten.

use std::{
    collections::{HashMap, VecDeque},
    ops::Sub,
    time::Duration,
};

use parley_proto::SendMessage;
use tracing::{debug, trace};

use crate::types::{ConversationId, LocalId, Message};

/// An echo matched to an outstanding send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    /// Local id of the matched send.
    pub local_id: LocalId,
    /// The send had already timed out.
    pub was_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase<I> {
    /// Waiting for a connection.
    Queued,
    /// On the wire, waiting for the echo.
    Pending,
    /// Timed out at `since`.
    Failed { since: I },
}

#[derive(Debug, Clone)]
struct Outstanding<I> {
    conversation_id: ConversationId,
    body: String,
    created_at: u64,
    correlation: String,
    accepted_at: I,
    phase: Phase<I>,
}

impl<I> Outstanding<I> {
    fn payload(&self) -> SendMessage {
        SendMessage {
            receiver_id: self.conversation_id.as_str().to_string(),
            message: self.body.clone(),
            client_message_id: Some(self.correlation.clone()),
        }
    }
}

/// Outstanding sends, indexed by local id, correlation id and content.
#[derive(Debug)]
pub struct OutboundCoordinator<I> {
    send_timeout: Duration,
    echo_tolerance: Duration,
    late_echo_window: Duration,
    entries: HashMap<LocalId, Outstanding<I>>,
    by_content: HashMap<(ConversationId, String), VecDeque<LocalId>>,
    by_correlation: HashMap<String, LocalId>,
    queue: VecDeque<LocalId>,
}

impl<I> OutboundCoordinator<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create a coordinator.
    pub fn new(send_timeout: Duration, echo_tolerance: Duration, late_echo_window: Duration) -> Self {
        Self {
            send_timeout,
            echo_tolerance,
            late_echo_window,
            entries: HashMap::new(),
            by_content: HashMap::new(),
            by_correlation: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    /// Track a new send.
    ///
    /// Returns the payload to put on the wire when `connected`; otherwise the
    /// send is queued until [`Self::take_queued`]. The send timeout runs from
    /// `now` either way.
    pub fn register(
        &mut self,
        message: &Message,
        correlation: String,
        now: I,
        connected: bool,
    ) -> Option<SendMessage> {
        let local_id = message.local_id;
        let phase = if connected { Phase::Pending } else { Phase::Queued };
        let entry = Outstanding {
            conversation_id: message.conversation_id.clone(),
            body: message.body.clone(),
            created_at: message.created_at,
            correlation: correlation.clone(),
            accepted_at: now,
            phase,
        };
        let payload = connected.then(|| entry.payload());

        self.by_content
            .entry((message.conversation_id.clone(), message.body.clone()))
            .or_default()
            .push_back(local_id);
        self.by_correlation.insert(correlation, local_id);
        self.entries.insert(local_id, entry);
        if !connected {
            debug!(%local_id, "queueing send until connected");
            self.queue.push_back(local_id);
        }

        payload
    }

    /// Move queued sends onto the wire, oldest first.
    pub fn take_queued(&mut self) -> Vec<SendMessage> {
        let mut payloads = Vec::with_capacity(self.queue.len());
        while let Some(local_id) = self.queue.pop_front() {
            if let Some(entry) = self.entries.get_mut(&local_id)
                && entry.phase == Phase::Queued
            {
                entry.phase = Phase::Pending;
                payloads.push(entry.payload());
            }
        }
        payloads
    }

    /// Match an operator echo to an outstanding send.
    ///
    /// A correlation id, when present, is authoritative: an unknown one never
    /// falls back to content matching. The matched send is forgotten.
    pub fn reconcile(
        &mut self,
        conversation_id: &ConversationId,
        body: &str,
        echoed_at: Option<u64>,
        correlation: Option<&str>,
        now: I,
    ) -> Option<Reconciled> {
        let local_id = match correlation {
            Some(correlation) => self
                .by_correlation
                .get(correlation)
                .copied()
                .filter(|id| self.is_matchable(*id, now)),
            None => self.match_content(conversation_id, body, echoed_at, now),
        }?;

        let entry = self.remove(local_id)?;
        let was_failed = matches!(entry.phase, Phase::Failed { .. });
        trace!(%local_id, was_failed, "echo reconciled");
        Some(Reconciled { local_id, was_failed })
    }

    /// Expire sends past their timeout and prune failed sends past the late
    /// echo window.
    ///
    /// Returns the sends that just became failed.
    pub fn expire(&mut self, now: I) -> Vec<(LocalId, ConversationId)> {
        let mut failed = Vec::new();
        let mut forgotten = Vec::new();

        for (local_id, entry) in &mut self.entries {
            match entry.phase {
                Phase::Queued | Phase::Pending => {
                    if now - entry.accepted_at >= self.send_timeout {
                        entry.phase = Phase::Failed { since: now };
                        failed.push((*local_id, entry.conversation_id.clone()));
                    }
                },
                Phase::Failed { since } => {
                    if now - since >= self.late_echo_window {
                        forgotten.push(*local_id);
                    }
                },
            }
        }

        if !failed.is_empty() {
            let expired: Vec<LocalId> = failed.iter().map(|(id, _)| *id).collect();
            self.queue.retain(|id| !expired.contains(id));
        }
        for local_id in forgotten {
            self.remove(local_id);
        }

        failed.sort_by_key(|(id, _)| *id);
        failed
    }

    /// Whether a send is still waiting for its echo (queued or on the wire).
    pub fn is_pending(&self, local_id: LocalId) -> bool {
        self.entries
            .get(&local_id)
            .is_some_and(|e| matches!(e.phase, Phase::Queued | Phase::Pending))
    }

    /// Number of sends waiting for a connection.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Number of tracked sends, failed ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Nothing tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_matchable(&self, local_id: LocalId, now: I) -> bool {
        self.entries.get(&local_id).is_some_and(|entry| match entry.phase {
            Phase::Queued => false,
            Phase::Pending => true,
            Phase::Failed { since } => now - since < self.late_echo_window,
        })
    }

    /// Oldest pending candidate first; failed sends only when no pending one
    /// matches.
    fn match_content(
        &self,
        conversation_id: &ConversationId,
        body: &str,
        echoed_at: Option<u64>,
        now: I,
    ) -> Option<LocalId> {
        let candidates = self.by_content.get(&(conversation_id.clone(), body.to_string()))?;
        let tolerance = u64::try_from(self.echo_tolerance.as_millis()).unwrap_or(u64::MAX);

        let within_tolerance = |entry: &Outstanding<I>| match echoed_at {
            Some(at) => at.abs_diff(entry.created_at) <= tolerance,
            None => now - entry.accepted_at <= self.echo_tolerance,
        };

        let mut failed_match = None;
        for local_id in candidates {
            let Some(entry) = self.entries.get(local_id) else {
                continue;
            };
            if !within_tolerance(entry) || !self.is_matchable(*local_id, now) {
                continue;
            }
            match entry.phase {
                Phase::Pending => return Some(*local_id),
                Phase::Failed { .. } if failed_match.is_none() => failed_match = Some(*local_id),
                Phase::Failed { .. } | Phase::Queued => {},
            }
        }
        failed_match
    }

    fn remove(&mut self, local_id: LocalId) -> Option<Outstanding<I>> {
        let entry = self.entries.remove(&local_id)?;
        let key = (entry.conversation_id.clone(), entry.body.clone());
        if let Some(candidates) = self.by_content.get_mut(&key) {
            candidates.retain(|id| *id != local_id);
            if candidates.is_empty() {
                self.by_content.remove(&key);
            }
        }
        self.by_correlation.remove(&entry.correlation);
        self.queue.retain(|id| *id != local_id);
        Some(entry)
    }
}
