//! Line commands read from stdin by the daemon.

use docsync_core::CloseDecision;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List open tabs.
    Tabs,
    Open(PathBuf),
    New(String),
    /// Activate the tab at this position in `tabs` output (1-based).
    Switch(usize),
    /// Replace the active buffer.
    Set(String),
    /// Append a line to the active buffer.
    Append(String),
    Save,
    SaveAs(PathBuf),
    /// Answer a pending prompt with Reload.
    Reload,
    /// Answer a pending prompt with Keep Current.
    Keep,
    Close(Option<CloseDecision>),
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Missing argument for {0}")]
    MissingArgument(&'static str),

    #[error("Invalid argument for {command}: {value}")]
    InvalidArgument { command: &'static str, value: String },
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (name, rest) = match line.trim_start().split_once(' ') {
            Some((name, rest)) => (name, rest),
            None => (line.trim(), ""),
        };
        if name.is_empty() {
            return Ok(None);
        }

        let required = |command: &'static str| {
            let arg = rest.trim();
            if arg.is_empty() {
                Err(CommandError::MissingArgument(command))
            } else {
                Ok(arg.to_string())
            }
        };

        let command = match name {
            "tabs" => Command::Tabs,
            "open" => Command::Open(required("open")?.into()),
            "new" => Command::New(required("new")?),
            "switch" => {
                let arg = required("switch")?;
                let index = arg
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or(CommandError::InvalidArgument {
                        command: "switch",
                        value: arg,
                    })?;
                Command::Switch(index)
            }
            // Text arguments keep their spacing.
            "set" => Command::Set(rest.to_string()),
            "append" => Command::Append(rest.to_string()),
            "save" => Command::Save,
            "saveas" => Command::SaveAs(required("saveas")?.into()),
            "reload" => Command::Reload,
            "keep" => Command::Keep,
            "close" => match rest.trim() {
                "" => Command::Close(None),
                "save" => Command::Close(Some(CloseDecision::Save)),
                "discard" => Command::Close(Some(CloseDecision::Discard)),
                "cancel" => Command::Close(Some(CloseDecision::Cancel)),
                other => {
                    return Err(CommandError::InvalidArgument {
                        command: "close",
                        value: other.to_string(),
                    });
                }
            },
            "quit" | "exit" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}
