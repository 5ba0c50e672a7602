//! The console loop: operator input in, view changes and notices out.

use std::io::{self, Write};

use parley_app::{RuntimeError, SessionHandle};
use parley_client::ConversationId;
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::broadcast::error::RecvError,
};
use tracing::{debug, warn};

use crate::{
    command::{Command, HELP},
    render::Console,
};

/// Errors that end the console.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Reading input or writing output failed.
    #[error("console i/o: {0}")]
    Io(#[from] io::Error),

    /// The session runtime is gone.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Run until the operator quits, input ends or the runtime stops.
pub async fn run_session<R, W>(
    handle: &SessionHandle,
    input: R,
    console: &mut Console<W>,
) -> Result<(), ConsoleError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut target = handle.view().selected;
    let mut view = handle.subscribe();
    let mut notices = handle.notices();

    let snapshot = view.borrow_and_update().clone();
    console.view_changed(&snapshot)?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("input closed");
                    break;
                };
                match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => execute(handle, console, &mut target, command).await?,
                    Err(err) => console.line(err)?,
                }
            },
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = view.borrow_and_update().clone();
                console.view_changed(&snapshot)?;
            },
            notice = notices.recv() => match notice {
                Ok(notice) => console.notice(&notice)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notices dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}

/// `target` is the conversation plain text goes to: the last one selected
/// here, which the view may not show yet.
async fn execute<W: Write>(
    handle: &SessionHandle,
    console: &mut Console<W>,
    target: &mut Option<ConversationId>,
    command: Command,
) -> Result<(), ConsoleError> {
    let result = match command {
        Command::Select(id) => {
            let id = ConversationId::from(id);
            let result = handle.select(id.clone()).await;
            if result.is_ok() {
                *target = Some(id);
            }
            result
        },
        Command::List => return Ok(console.list(&handle.view(), "")?),
        Command::Search(query) => return Ok(console.list(&handle.view(), &query)?),
        Command::Online => return Ok(console.online(&handle.view())?),
        Command::Refresh => handle.refresh().await,
        Command::Help => return Ok(console.line(HELP)?),
        Command::Say(body) => {
            let Some(id) = target.clone() else {
                return Ok(console.line("open a conversation first: /select <id>")?);
            };
            handle.send(id, body).await.map(|_| ())
        },
        Command::Quit | Command::Nothing => Ok(()),
    };

    match result {
        Err(RuntimeError::Stopped) => Err(RuntimeError::Stopped.into()),
        Err(err) => Ok(console.line(format_args!("!! {err}"))?),
        Ok(()) => Ok(()),
    }
}
