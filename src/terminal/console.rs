//! Interactive console over a raw byte stream.
//!
//! [`Console`] reads one byte at a time from the terminal, decodes it under the
//! session's [`EncodingContext`], and runs the editing rules of [`super::editor`]:
//! visible characters are echoed, erase keys restore the screen exactly, escape
//! sequences and tabs are swallowed, and Enter completes the line.

use std::io::{ErrorKind, Read, Write};

use super::codec::{Decoder, EncodingContext};
use super::command::{Command, CommandInterceptor, Flow};
use super::editor::{Key, LineBuffer, MultilineBuffer, RowOutcome, MASK_GLYPH};
use super::TerminalError;

pub struct Console<R, W> {
    input: R,
    output: W,
    ctx: EncodingContext,
    decoder: Decoder,
    crlf: bool,
    swallow_lf: bool,
}

impl<R: Read, W: Write> Console<R, W> {
    pub fn new(input: R, output: W, ctx: EncodingContext) -> Self {
        Self {
            input,
            output,
            ctx,
            decoder: ctx.decoder(),
            crlf: false,
            swallow_lf: false,
        }
    }

    /// Translate `\n` to `\r\n` on output, as a terminal in raw mode needs.
    pub fn with_crlf(mut self, crlf: bool) -> Self {
        self.crlf = crlf;
        self
    }

    pub fn context(&self) -> EncodingContext {
        self.ctx
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_parts(self) -> (R, W) {
        (self.input, self.output)
    }

    /// Encode and write text, flushing immediately.
    pub fn print(&mut self, text: &str) -> Result<(), TerminalError> {
        let bytes = if self.crlf {
            self.ctx.encode(&text.replace("\r\n", "\n").replace('\n', "\r\n"))
        } else {
            self.ctx.encode(text)
        };
        self.output.write_all(&bytes)?;
        self.output.flush()?;
        Ok(())
    }

    /// Next decoded character; `None` once the input is exhausted.
    pub fn read_char(&mut self) -> Result<Option<char>, TerminalError> {
        loop {
            if let Some(ch) = self.decoder.next_char() {
                return Ok(Some(ch));
            }
            let mut byte = [0u8; 1];
            match self.input.read(&mut byte) {
                Ok(0) => {
                    self.decoder.flush();
                    return Ok(self.decoder.next_char());
                }
                Ok(_) => {
                    self.decoder.push(byte[0]);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn next_char(&mut self) -> Result<char, TerminalError> {
        self.read_char()?.ok_or(TerminalError::Closed)
    }

    /// Next editing key. A `\n` directly after a `\r` Enter is the tail of a CRLF pair
    /// and is skipped.
    fn next_key(&mut self) -> Result<Key, TerminalError> {
        loop {
            let ch = self.next_char()?;
            let swallow = std::mem::replace(&mut self.swallow_lf, false);
            if swallow && ch == '\n' {
                continue;
            }
            if ch == '\r' {
                self.swallow_lf = true;
            }
            return Ok(Key::classify(ch));
        }
    }

    /// Consume the rest of an escape sequence after ESC without echo.
    ///
    /// `ESC [` runs to its final letter (or `~` for editing keys), `ESC O` takes one
    /// more byte (F1-F4), and any other byte after ESC is dropped with it.
    fn discard_escape(&mut self) -> Result<(), TerminalError> {
        match self.next_char()? {
            '[' => loop {
                let c = self.next_char()?;
                // `~` closes the editing keys (ESC [ 3 ~ is Delete), which carry no
                // letter; stopping only at letters would eat the next keystroke.
                if c.is_ascii_alphabetic() || c == '~' {
                    break;
                }
            },
            'O' => {
                self.next_char()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn edit(&mut self, prompt: &str, mut buf: LineBuffer) -> Result<String, TerminalError> {
        self.print(prompt)?;
        loop {
            let mut echo = String::new();
            match self.next_key()? {
                Key::Enter => {
                    let line = buf.finish(&mut echo);
                    self.print(&echo)?;
                    return Ok(line);
                }
                Key::Erase => {
                    buf.erase_last(&mut echo);
                }
                Key::Escape => self.discard_escape()?,
                Key::Tab => {}
                Key::Char(c) => {
                    buf.append_visible(c, &mut echo);
                }
            }
            if !echo.is_empty() {
                self.print(&echo)?;
            }
        }
    }

    /// Read one edited line.
    pub fn read_line(&mut self, prompt: &str) -> Result<String, TerminalError> {
        self.edit(prompt, LineBuffer::new())
    }

    /// Read one line echoing `*` per character.
    pub fn read_masked(&mut self, prompt: &str) -> Result<String, TerminalError> {
        self.edit(prompt, LineBuffer::masked(MASK_GLYPH))
    }

    /// Read rows until a row equal to `terminator`; returns the prior rows joined by `\n`.
    pub fn read_multiline(&mut self, prompt: &str, terminator: &str) -> Result<String, TerminalError> {
        self.print(prompt)?;
        let mut rows = MultilineBuffer::new(terminator);
        loop {
            let mut echo = String::new();
            match self.next_key()? {
                Key::Enter => {
                    if let RowOutcome::Done(text) = rows.enter(&mut echo) {
                        self.print(&echo)?;
                        return Ok(text);
                    }
                }
                Key::Erase => rows.erase(&mut echo),
                Key::Escape => self.discard_escape()?,
                Key::Tab => {}
                Key::Char(c) => {
                    rows.append_visible(c, &mut echo);
                }
            }
            if !echo.is_empty() {
                self.print(&echo)?;
            }
        }
    }

    /// Read a menu command, handling reserved control words in place.
    ///
    /// A cancelled exit re-prompts; `P` and a confirmed exit come back as
    /// [`Command::Flow`] for the enclosing menu loop.
    pub fn read_command(
        &mut self,
        prompt: &str,
        interceptor: &CommandInterceptor,
    ) -> Result<Command, TerminalError> {
        loop {
            let line = self.read_line(prompt)?.trim().to_string();
            match interceptor.dispatch(&line, self)? {
                None => return Ok(Command::Line(line)),
                Some(Flow::Continue) => continue,
                Some(flow) => return Ok(Command::Flow(flow)),
            }
        }
    }
}
