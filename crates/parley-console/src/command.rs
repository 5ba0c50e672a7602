//! Operator input.
//!
//! Lines starting with `/` are commands; anything else is a message for the
//! selected conversation.

use thiserror::Error;

/// One line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a conversation.
    Select(String),
    /// Show every conversation.
    List,
    /// Show conversations matching a query.
    Search(String),
    /// Show who is online.
    Online,
    /// Refetch presence and the conversation list.
    Refresh,
    /// Show the command summary.
    Help,
    /// Leave the console.
    Quit,
    /// Message for the selected conversation.
    Say(String),
    /// Blank line.
    Nothing,
}

/// Input that is not a valid command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Unrecognised `/word`.
    #[error("unknown command /{0}, try /help")]
    Unknown(String),

    /// Command given without its argument.
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl Command {
    /// Parse one input line.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Self::Nothing);
        }

        let Some(command) = line.strip_prefix('/') else {
            return Ok(Self::Say(line.to_string()));
        };

        let (name, rest) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
        let rest = rest.trim();

        match name {
            "select" | "s" => {
                if rest.is_empty() {
                    return Err(CommandError::Usage("/select <conversation id>"));
                }
                Ok(Self::Select(rest.to_string()))
            },
            "list" | "l" => Ok(Self::List),
            "search" | "f" => Ok(Self::Search(rest.to_string())),
            "online" => Ok(Self::Online),
            "refresh" => Ok(Self::Refresh),
            "help" | "h" => Ok(Self::Help),
            "quit" | "q" => Ok(Self::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Help text.
pub const HELP: &str = "\
/select <id>     open a conversation
/list            show conversations
/search <text>   filter conversations by name, email or last message
/online          show who is online
/refresh         refetch presence and conversations
/quit            leave
anything else is sent to the open conversation";
