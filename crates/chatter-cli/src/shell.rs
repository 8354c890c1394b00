//! Interactive line shell.
//!
//! Reads stdin one line at a time and drives a [`ChannelSession`]. Session
//! errors are already written to the session's sink, so the shell only logs
//! them and keeps reading.

use anyhow::Result;
use chatter_core::session::ANONYMOUS;
use chatter_core::{ChannelSession, OutputSink};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const SWITCH_PREFIX: &str = "!switch ";
const EXIT: &str = "exit";

/// One line of user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// `!switch <channel>`
    Switch(&'a str),
    /// `exit`
    Exit,
    /// Any other text, sent verbatim.
    Send(&'a str),
    /// A blank line.
    Empty,
}

impl<'a> Command<'a> {
    /// Parse a line read from the terminal, with or without its line ending.
    #[must_use]
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            Command::Empty
        } else if let Some(channel) = line.strip_prefix(SWITCH_PREFIX) {
            Command::Switch(channel.trim())
        } else if line == EXIT {
            Command::Exit
        } else {
            Command::Send(line)
        }
    }
}

/// Print the command summary.
pub fn print_help(sink: &dyn OutputSink, username: &str) {
    sink.write_line(&format!("Chat client started as {username}. Commands:"));
    sink.write_line("!switch <channel> - Switch to a different channel");
    sink.write_line("Type your message and press Enter to send");
    sink.write_line("Type 'exit' to quit");
}

/// Ask for a username. A blank answer or end of input gives `Anonymous`.
///
/// # Errors
///
/// Returns an error if the terminal cannot be read or written.
pub async fn prompt_username<R, W>(input: &mut R, output: &mut W) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(b"Enter your username: ").await?;
    output.flush().await?;

    let mut line = String::new();
    input.read_line(&mut line).await?;
    let name = line.trim();

    Ok(if name.is_empty() {
        ANONYMOUS.to_string()
    } else {
        name.to_string()
    })
}

/// Run commands from `input` until `exit`, end of input or Ctrl-C, then
/// close the session.
///
/// # Errors
///
/// Returns an error if `input` cannot be read. The session is closed either
/// way.
pub async fn run<R>(session: &mut ChannelSession, input: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let result = read_commands(session, input).await;
    session.close().await;
    result
}

async fn read_commands<R>(session: &mut ChannelSession, input: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        tokio::select! {
            read = input.read_line(&mut line) => {
                if read? == 0 {
                    debug!("Input closed");
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                return Ok(());
            }
        }

        let outcome = match Command::parse(&line) {
            Command::Empty => continue,
            Command::Exit => return Ok(()),
            Command::Switch(channel) => session.switch_channel(channel).await,
            Command::Send(text) => session.send_message(text).await,
        };
        if let Err(e) = outcome {
            debug!(error = %e, "Command failed");
        }
    }
}
