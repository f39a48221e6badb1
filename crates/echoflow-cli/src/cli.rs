//! CLI argument definitions for EchoFlow.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// EchoFlow -- dual-path voice assistant engine.
#[derive(Parser)]
#[command(
    name = "echoflow",
    version,
    about = "EchoFlow -- dual-path conversational response engine",
    long_about = "Drive the EchoFlow engine from the terminal: every turn prints the \
                  immediate acknowledgement, any patience messages and the final reply."
)]
pub struct Cli {
    /// Engine configuration file (TOML).  Defaults to `echoflow.toml` when
    /// present.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive conversation.
    Chat,

    /// Run a single turn and exit.
    Ask {
        /// What to say to the assistant.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Print the function-calling schemas of every registered capability.
    Capabilities,

    /// Check that the configured language model answers.
    Ping,
}
