//! Session module — the interactive chat loop.
//!
//! This module contains:
//! - [`SessionContext`], the state one interactive run owns
//! - The slash command table and its handlers
//! - [`run_session`], the read-act-respond loop

pub mod commands;
mod loop_impl;

pub use commands::{Command, CommandSpec, COMMANDS, COMMAND_MARKER};
pub use loop_impl::{handle_line, run_session, Flow, LoopExit, SessionContext};
