//! History requests and response attribution.
//!
//! A response is attributed by conversation: the tag when the server sends
//! one, otherwise the conversation its entries belong to. Requests the server
//! never answers stay outstanding without shifting anyone else's response.
//! Only a response that names no conversation (an untagged empty array) falls
//! back to the oldest outstanding request, and it is merged so that it
//! removes nothing.

use std::collections::VecDeque;

use parley_proto::{Command, HistoryRequest};
use tracing::{debug, warn};

use crate::types::ConversationId;

/// One history request waiting for its response.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Outstanding {
    conversation_id: ConversationId,
    /// Store sequence when the request was issued.
    watermark: u64,
}

/// Tracks outstanding history requests.
#[derive(Debug, Clone, Default)]
pub struct HistoryHydrator {
    outstanding: VecDeque<Outstanding>,
    operator_id: Option<String>,
}

impl HistoryHydrator {
    /// Create a hydrator. `operator_id` is attached to requests when set.
    pub fn new(operator_id: Option<String>) -> Self {
        Self { outstanding: VecDeque::new(), operator_id }
    }

    /// Record a request for `conversation_id` and build the command.
    ///
    /// `watermark` is the store sequence at issue time; live messages appended
    /// after it survive the response.
    pub fn request(&mut self, conversation_id: &ConversationId, watermark: u64) -> Command {
        debug!(conversation = %conversation_id, watermark, "requesting history");
        self.outstanding
            .push_back(Outstanding { conversation_id: conversation_id.clone(), watermark });

        Command::RequestHistory(HistoryRequest {
            user_id: conversation_id.as_str().to_string(),
            admin_id: self.operator_id.clone(),
        })
    }

    /// Attribute a response to a conversation.
    ///
    /// `conversation` is the conversation the response names, by tag or by
    /// its entries. Returns the conversation and the watermark of the request
    /// it answers. A response for a conversation nobody asked about is still
    /// applied, without a watermark. An unnamed response answers the oldest
    /// request, also without a watermark, or is dropped when nothing is
    /// outstanding. Responses without a watermark only merge.
    pub fn attribute(
        &mut self,
        conversation: Option<&str>,
    ) -> Option<(ConversationId, Option<u64>)> {
        match conversation.filter(|c| !c.is_empty()) {
            Some(name) => {
                let id = ConversationId::new(name);
                match self.outstanding.iter().position(|o| o.conversation_id == id) {
                    Some(index) => {
                        let outstanding = self.outstanding.remove(index)?;
                        Some((outstanding.conversation_id, Some(outstanding.watermark)))
                    },
                    None => {
                        debug!(conversation = %id, "unsolicited history response");
                        Some((id, None))
                    },
                }
            },
            None => match self.outstanding.pop_front() {
                Some(outstanding) => Some((outstanding.conversation_id, None)),
                None => {
                    warn!("dropping unattributable history response");
                    None
                },
            },
        }
    }

    /// Whether a request for `conversation_id` is in flight.
    pub fn is_outstanding(&self, conversation_id: &ConversationId) -> bool {
        self.outstanding.iter().any(|o| &o.conversation_id == conversation_id)
    }

    /// Number of requests in flight.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Forget all outstanding requests. Responses cannot outlive the
    /// transport they were requested on.
    pub fn reset(&mut self) {
        self.outstanding.clear();
    }
}
