//! Interactive session loop - reads lines and routes them to commands or sends

use colored::Colorize;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::commands::{self, COMMAND_MARKER};
use crate::auth::{IdentityAuthority, TokenProvider};
use crate::client::{AgentResponse, AgentService};
use crate::Result;
use crate::error::Error;
use crate::ui;

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// `/exit` or `/quit`
    Quit,
    /// `/logout`, whether or not sign-out succeeded
    Logout,
    /// Input stream closed
    EndOfInput,
    /// Cancellation token fired (Ctrl+C)
    Interrupted,
}

/// What the loop does after handling a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit(LoopExit),
}

/// Everything one interactive run owns: the service client, the token
/// provider and the current conversation thread.
pub struct SessionContext<S: AgentService, A: IdentityAuthority> {
    pub service: S,
    pub auth: TokenProvider<A>,
    thread_id: Option<String>,
}

impl<S: AgentService, A: IdentityAuthority> SessionContext<S, A> {
    pub fn new(service: S, auth: TokenProvider<A>) -> Self {
        Self {
            service,
            auth,
            thread_id: None,
        }
    }

    /// Continue an existing server thread instead of starting a new one
    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn start_new_thread(&mut self) {
        self.thread_id = None;
    }

    /// Send a message on the current thread and adopt the thread id the
    /// server returns. The thread is left untouched when the send fails.
    pub async fn send(&mut self, message: &str) -> Result<AgentResponse> {
        let response = self.service
            .send_message(message, self.thread_id.as_deref())
            .await?;

        if self.thread_id.as_deref() != Some(response.thread_id.as_str()) {
            debug!("Active thread is now {}", response.thread_id);
        }
        self.thread_id = Some(response.thread_id.clone());

        Ok(response)
    }
}

/// Run the read-act-respond loop until a command ends it, input closes, or
/// `cancel` fires.
///
/// A read error on `input` is returned as an error; everything that goes
/// wrong while handling a line is printed to `out` and the loop continues.
pub async fn run_session<S, A, R, W>(
    ctx: &mut SessionContext<S, A>,
    input: R,
    out: &mut W,
    cancel: &CancellationToken,
) -> Result<LoopExit>
where
    S: AgentService,
    A: IdentityAuthority,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();

    writeln!(out, "Chat with your agent (type '/help' for commands)\n")?;

    loop {
        write!(out, "{} ", "You:".blue().bold())?;
        out.flush()?;

        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                writeln!(out)?;
                return Ok(LoopExit::Interrupted);
            }
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            writeln!(out)?;
            info!("Input closed, ending session");
            return Ok(LoopExit::EndOfInput);
        };

        if let Flow::Exit(reason) = handle_line(ctx, &line, out).await? {
            info!("Session ended: {:?}", reason);
            return Ok(reason);
        }

        if cancel.is_cancelled() {
            return Ok(LoopExit::Interrupted);
        }
    }
}

/// Handle one input line.
pub async fn handle_line<S, A, W>(ctx: &mut SessionContext<S, A>, line: &str, out: &mut W) -> Result<Flow>
where
    S: AgentService,
    A: IdentityAuthority,
    W: Write,
{
    let input = line.trim();
    if input.is_empty() {
        return Ok(Flow::Continue);
    }

    if input.starts_with(COMMAND_MARKER) {
        // the command is the whole first token, so "/ help" names no command
        let (token, args) = commands::split_command(input);
        let name = &token[COMMAND_MARKER.len_utf8()..];

        let command = match commands::lookup(name) {
            Ok(command) => command,
            Err(e) => {
                writeln!(out, "{}\n", e)?;
                return Ok(Flow::Continue);
            }
        };

        debug!("Running command {:?}", command);
        return match commands::execute(command, args, ctx, out).await {
            Ok(flow) => Ok(flow),
            Err(e) => {
                print_failure(out, &e)?;
                Ok(Flow::Continue)
            }
        };
    }

    let spinner = ui::spinner("Waiting for the agent");
    let result = ctx.send(input).await;
    spinner.finish_and_clear();

    match result {
        Ok(response) => writeln!(out, "{} {}\n", "Agent:".green().bold(), response.message)?,
        Err(e) => print_failure(out, &e)?,
    }

    Ok(Flow::Continue)
}

fn print_failure<W: Write>(out: &mut W, error: &Error) -> Result<()> {
    tracing::warn!("{}", error);
    writeln!(out, "{} {}\n", "Error:".red().bold(), error)?;
    Ok(())
}
