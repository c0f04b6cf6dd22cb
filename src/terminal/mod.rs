//! # Raw Terminal I/O Engine
//!
//! Everything a session shell needs to talk to a remote terminal through a pty:
//!
//! - [`codec`] - byte/text conversion under the deployment's encoding
//! - [`editor`] - width-aware line, masked and multi-line buffers
//! - [`command`] - reserved control words (`X` exit, `P` back) and menu flow
//! - [`console`] - the byte-at-a-time reader that ties the pieces together
//!
//! ```rust,no_run
//! use retrobbs::terminal::codec::{Encoding, EncodingContext};
//! use retrobbs::terminal::console::Console;
//!
//! let ctx = EncodingContext::new(Encoding::Utf8);
//! let mut console = Console::new(std::io::stdin(), std::io::stdout(), ctx).with_crlf(true);
//! let name = console.read_line("Name: ")?;
//! let secret = console.read_masked("Password: ")?;
//! # Ok::<(), retrobbs::terminal::TerminalError>(())
//! ```

pub mod codec;
pub mod command;
pub mod console;
pub mod editor;

use thiserror::Error;

pub use codec::{Encoding, EncodingContext};
pub use command::{Command, CommandInterceptor, Flow};
pub use console::Console;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("terminal io error: {0}")]
    Io(#[from] std::io::Error),

    /// The input stream ended (remote hung up or subprocess stdin closed).
    #[error("terminal input closed")]
    Closed,
}
