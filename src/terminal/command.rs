//! Reserved control words recognised at any command prompt.
//!
//! `X` asks to leave the system, `P` steps back one menu level. Both are matched
//! case-insensitively on the trimmed line; everything else is `Unrecognized` and
//! belongs to the menu that asked.

use std::io::{Read, Write};

use super::console::Console;
use super::TerminalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlWord {
    Exit,
    Back,
    Unrecognized,
}

impl ControlWord {
    pub fn parse(line: &str) -> Self {
        match line.trim().to_ascii_lowercase().as_str() {
            "x" => ControlWord::Exit,
            "p" => ControlWord::Back,
            _ => ControlWord::Unrecognized,
        }
    }
}

pub fn is_reserved(line: &str) -> bool {
    ControlWord::parse(line) != ControlWord::Unrecognized
}

/// Control flow handed back up the menu stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Handled in place; prompt again.
    Continue,
    /// Leave the current menu for its parent.
    PopMenu,
    /// The user confirmed leaving the system.
    Exit,
}

/// Result of a command prompt: either a line for the menu or a flow signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Line(String),
    Flow(Flow),
}

#[derive(Debug, Clone)]
pub struct CommandInterceptor {
    pub confirm_prompt: String,
    pub farewell: String,
}

impl Default for CommandInterceptor {
    fn default() -> Self {
        Self {
            confirm_prompt: "\nReally quit? (y/n): ".to_string(),
            farewell: "Goodbye.\n".to_string(),
        }
    }
}

impl CommandInterceptor {
    /// Act on a completed line. `None` means the line is not a control word.
    pub fn dispatch<R: Read, W: Write>(
        &self,
        line: &str,
        console: &mut Console<R, W>,
    ) -> Result<Option<Flow>, TerminalError> {
        match ControlWord::parse(line) {
            ControlWord::Exit => {
                let answer = console.read_line(&self.confirm_prompt)?;
                if matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
                    console.print(&self.farewell)?;
                    Ok(Some(Flow::Exit))
                } else {
                    Ok(Some(Flow::Continue))
                }
            }
            ControlWord::Back => Ok(Some(Flow::PopMenu)),
            ControlWord::Unrecognized => Ok(None),
        }
    }
}
