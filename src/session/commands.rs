//! Slash command table and handlers.
//!
//! The table is the complete command set; anything not in it is reported
//! as unknown and never reaches the network.

use colored::Colorize;
use std::io::Write;

use super::loop_impl::{Flow, LoopExit, SessionContext};
use crate::auth::IdentityAuthority;
use crate::client::AgentService;
use crate::Result;
use crate::error::Error;

/// Prefix that marks a line as a command
pub const COMMAND_MARKER: char = '/';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Exit,
    Logout,
    New,
    History,
    Profile,
    Whoami,
}

/// One row of the command table
#[derive(Debug)]
pub struct CommandSpec {
    pub name: &'static str,
    pub command: Command,
    pub summary: &'static str,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "help", command: Command::Help, summary: "Show this help message" },
    CommandSpec { name: "exit", command: Command::Exit, summary: "Exit the application" },
    CommandSpec { name: "quit", command: Command::Exit, summary: "Exit the application" },
    CommandSpec { name: "logout", command: Command::Logout, summary: "Sign out and exit" },
    CommandSpec { name: "new", command: Command::New, summary: "Start a new conversation" },
    CommandSpec { name: "history", command: Command::History, summary: "List your past conversations" },
    CommandSpec { name: "profile", command: Command::Profile, summary: "View your profile settings" },
    CommandSpec { name: "whoami", command: Command::Whoami, summary: "Show current user" },
];

/// Exact, case-sensitive lookup in [`COMMANDS`].
pub fn lookup(name: &str) -> Result<Command> {
    COMMANDS
        .iter()
        .find(|spec| spec.name == name)
        .map(|spec| spec.command)
        .ok_or_else(|| Error::UnknownCommand(name.to_string()))
}

/// Split a line into its first whitespace-delimited token and the trimmed rest.
pub fn split_command(input: &str) -> (&str, &str) {
    let input = input.trim();
    match input.find(char::is_whitespace) {
        Some(i) => (&input[..i], input[i..].trim()),
        None => (input, ""),
    }
}

pub fn help_text() -> String {
    let mut text = String::from("\nAvailable commands:\n");
    for spec in COMMANDS {
        text.push_str(&format!("  /{:<10} - {}\n", spec.name, spec.summary));
    }
    text.push_str("  /profile set <text> - Update your preferred agent instructions\n");
    text.push_str("\nJust type your message to chat with the agent.\n");
    text
}

/// Run one command. Errors are returned to the loop, which reports them.
pub async fn execute<S, A, W>(
    command: Command,
    args: &str,
    ctx: &mut SessionContext<S, A>,
    out: &mut W,
) -> Result<Flow>
where
    S: AgentService,
    A: IdentityAuthority,
    W: Write,
{
    match command {
        Command::Help => {
            writeln!(out, "{}", help_text())?;
        }

        Command::Exit => {
            writeln!(out, "Goodbye!")?;
            return Ok(Flow::Exit(LoopExit::Quit));
        }

        Command::Logout => {
            // Always ends the session, even when sign-out fails
            match ctx.auth.sign_out().await {
                Ok(()) => writeln!(out, "{} Signed out successfully", "✓".green())?,
                Err(e) => writeln!(out, "{} {}", "Error:".red().bold(), e)?,
            }
            return Ok(Flow::Exit(LoopExit::Logout));
        }

        Command::New => {
            ctx.start_new_thread();
            writeln!(out, "{} Started new conversation\n", "✓".green())?;
        }

        Command::History => {
            let conversations = ctx.service.list_conversations().await?;
            writeln!(out, "\nYour conversations:")?;
            if conversations.is_empty() {
                writeln!(out, "  (no conversations yet)")?;
            }
            for conversation in &conversations {
                writeln!(
                    out,
                    "  - {} (Thread: {})",
                    conversation.title_or_default(),
                    conversation.short_thread_id()
                )?;
            }
            writeln!(out)?;
        }

        Command::Profile => {
            let (sub, rest) = split_command(args);
            match sub {
                "" => {
                    let profile = ctx.service.get_profile().await?;
                    writeln!(out, "\nYour Profile:")?;
                    writeln!(
                        out,
                        "  Instructions: {}\n",
                        profile.preferred_agent_instructions.as_deref().unwrap_or("(none)")
                    )?;
                }
                "set" if !rest.is_empty() => {
                    let mut profile = ctx.service.get_profile().await?;
                    profile.preferred_agent_instructions = Some(rest.to_string());
                    ctx.service.update_profile(&profile).await?;
                    writeln!(out, "{} Profile updated\n", "✓".green())?;
                }
                _ => {
                    writeln!(out, "Usage: /profile | /profile set <instructions>\n")?;
                }
            }
        }

        Command::Whoami => match ctx.auth.current_user().await {
            Some(user) => writeln!(out, "Logged in as: {}\n", user)?,
            None => writeln!(out, "Not authenticated\n")?,
        },
    }

    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_exact_and_case_sensitive() {
        assert_eq!(lookup("help").unwrap(), Command::Help);
        assert_eq!(lookup("quit").unwrap(), Command::Exit);
        assert_eq!(lookup("exit").unwrap(), Command::Exit);
        assert!(matches!(lookup("HELP"), Err(Error::UnknownCommand(ref n)) if n == "HELP"));
        assert!(lookup("hist").is_err());
        assert!(lookup("").is_err());
    }

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("history"), ("history", ""));
        assert_eq!(split_command("profile set  Be  brief "), ("profile", "set  Be  brief"));
        assert_eq!(split_command(""), ("", ""));
        assert_eq!(split_command("/ help"), ("/", "help"));
    }

    #[test]
    fn test_help_lists_every_command() {
        let help = help_text();
        for spec in COMMANDS {
            assert!(help.contains(&format!("/{}", spec.name)), "missing /{}", spec.name);
        }
    }

    #[test]
    fn test_unknown_command_message() {
        let err = lookup("bogus").unwrap_err();
        assert_eq!(err.to_string(), "Unknown command: /bogus (type /help for available commands)");
    }
}
