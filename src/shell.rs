//! # Session Shell
//!
//! The interactive program each connection runs (`retrobbs shell`). It talks to its
//! pty through a [`Console`], so every prompt gets the same editing behaviour no
//! matter which transport the caller arrived on.
//!
//! Menus are plain loops over [`Console::read_command`]: `P` pops one level, a
//! confirmed `X` unwinds every level and ends the process. Posts live for the
//! duration of the session only.

use std::io::{Read, Write};

use log::warn;

use crate::config::ENCODING_ENV;
use crate::terminal::codec::{Encoding, EncodingContext};
use crate::terminal::{Command, CommandInterceptor, Console, Flow, TerminalError};

const BANNER: &str = "\n*** Welcome to RetroBBS! ***\n\n";
const MAIN_PROMPT: &str = "\n[B]oard  [I]nfo  [X] Exit\nMain> ";
const BOARD_PROMPT: &str = "\n[L]ist  [R]ead  [W]rite  [P] Back  [X] Exit\nBoard> ";
const TERMINATOR: &str = ".";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub title: String,
    pub author: String,
    pub body: String,
}

/// Raw mode on the controlling terminal for as long as the guard lives.
pub struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    pub fn enable() -> Self {
        match crossterm::terminal::enable_raw_mode() {
            Ok(()) => Self { enabled: true },
            Err(e) => {
                warn!("raw mode unavailable: {}", e);
                Self { enabled: false }
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

pub struct Shell<R, W> {
    console: Console<R, W>,
    interceptor: CommandInterceptor,
    user: String,
    posts: Vec<Post>,
}

impl<R: Read, W: Write> Shell<R, W> {
    pub fn new(console: Console<R, W>) -> Self {
        Self {
            console,
            interceptor: CommandInterceptor::default(),
            user: String::new(),
            posts: Vec::new(),
        }
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn into_console(self) -> Console<R, W> {
        self.console
    }

    /// Run until the user confirms exit. Always returns [`Flow::Exit`] on success.
    pub fn run(&mut self) -> Result<Flow, TerminalError> {
        self.console.print(BANNER)?;
        self.login()?;
        self.main_menu()
    }

    fn login(&mut self) -> Result<(), TerminalError> {
        loop {
            let name = self.console.read_line("Name: ")?.trim().to_string();
            if !name.is_empty() {
                self.user = name;
                break;
            }
        }
        // Accounts live outside the gateway; the password is collected for the
        // look of it and discarded.
        let _ = self.console.read_masked("Password: ")?;
        self.console.print(&format!("\nHello, {}!\n", self.user))?;
        Ok(())
    }

    fn main_menu(&mut self) -> Result<Flow, TerminalError> {
        loop {
            match self.console.read_command(MAIN_PROMPT, &self.interceptor)? {
                Command::Flow(Flow::Exit) => return Ok(Flow::Exit),
                Command::Flow(_) => self.console.print("Already at the main menu.\n")?,
                Command::Line(line) => match line.to_ascii_lowercase().as_str() {
                    "b" => {
                        if self.board_menu()? == Flow::Exit {
                            return Ok(Flow::Exit);
                        }
                    }
                    "i" => self.info()?,
                    "" => {}
                    _ => self.console.print("Unknown command.\n")?,
                },
            }
        }
    }

    fn board_menu(&mut self) -> Result<Flow, TerminalError> {
        loop {
            match self.console.read_command(BOARD_PROMPT, &self.interceptor)? {
                Command::Flow(flow) => return Ok(flow),
                Command::Line(line) => match line.to_ascii_lowercase().as_str() {
                    "l" => self.list_posts()?,
                    "r" => self.read_post()?,
                    "w" => self.write_post()?,
                    "" => {}
                    _ => self.console.print("Unknown command.\n")?,
                },
            }
        }
    }

    fn info(&mut self) -> Result<(), TerminalError> {
        let text = format!(
            "\nUser: {}\nEncoding: {}\nPosts this session: {}\n",
            self.user,
            self.console.context().encoding().label(),
            self.posts.len()
        );
        self.console.print(&text)
    }

    fn list_posts(&mut self) -> Result<(), TerminalError> {
        if self.posts.is_empty() {
            return self.console.print("\nNo posts yet.\n");
        }
        let mut text = String::from("\n");
        for (i, post) in self.posts.iter().enumerate() {
            text.push_str(&format!("{:>2}. {} ({})\n", i + 1, post.title, post.author));
        }
        self.console.print(&text)
    }

    fn read_post(&mut self) -> Result<(), TerminalError> {
        let answer = self.console.read_line("Post number: ")?;
        let post = answer
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.posts.get(i))
            .cloned();
        match post {
            Some(post) => {
                let rule = "-".repeat(40);
                self.console.print(&format!(
                    "\nTitle: {}\nAuthor: {}\n{rule}\n{}\n{rule}\n",
                    post.title, post.author, post.body
                ))?;
                self.console.read_line("Press Enter to continue.")?;
                Ok(())
            }
            None => self.console.print("No such post.\n"),
        }
    }

    fn write_post(&mut self) -> Result<(), TerminalError> {
        let title = self.console.read_line("Title: ")?.trim().to_string();
        if title.is_empty() {
            return self.console.print("Cancelled.\n");
        }
        let body = self.console.read_multiline(
            "Enter text; a line with only '.' ends it.\n",
            TERMINATOR,
        )?;
        self.posts.push(Post {
            title,
            author: self.user.clone(),
            body,
        });
        self.console.print("Saved.\n")
    }
}

/// Encoding handed down by the gateway, else the configured one.
pub fn session_encoding(configured: Encoding) -> EncodingContext {
    let encoding = std::env::var(ENCODING_ENV)
        .ok()
        .and_then(|label| Encoding::from_label(&label))
        .unwrap_or(configured);
    EncodingContext::new(encoding)
}

/// Run the shell on this process's own terminal.
pub fn run_stdio(ctx: EncodingContext) -> Result<Flow, TerminalError> {
    let _raw = RawModeGuard::enable();
    let console =
        Console::new(std::io::stdin().lock(), std::io::stdout().lock(), ctx).with_crlf(true);
    match Shell::new(console).run() {
        Err(TerminalError::Closed) => Ok(Flow::Exit),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_script(script: &str) -> (Result<Flow, TerminalError>, Vec<Post>, String) {
        let console = Console::new(script.as_bytes(), Vec::new(), EncodingContext::default());
        let mut shell = Shell::new(console);
        let result = shell.run();
        let posts = shell.posts().to_vec();
        let (_, out) = shell.into_console().into_parts();
        (result, posts, String::from_utf8_lossy(&out).into_owned())
    }

    #[test]
    fn write_and_list_a_post() {
        let (result, posts, out) =
            run_script("kim\rsecret\rb\rw\rHello\rline one\rline two\r.\rl\rx\ry\r");
        assert_eq!(result.unwrap(), Flow::Exit);
        assert_eq!(
            posts,
            vec![Post {
                title: "Hello".into(),
                author: "kim".into(),
                body: "line one\nline two".into(),
            }]
        );
        assert!(out.contains(" 1. Hello (kim)"));
        assert!(!out.contains("secret"));
    }

    #[test]
    fn back_from_board_returns_to_main() {
        let (result, _, out) = run_script("kim\r\rb\rp\ri\rx\ryes\r");
        assert_eq!(result.unwrap(), Flow::Exit);
        assert!(out.contains("Encoding: utf-8"));
        assert!(out.contains("Goodbye."));
    }

    #[test]
    fn declined_exit_keeps_the_session() {
        let (result, _, out) = run_script("kim\r\rx\rn\ri\r");
        assert!(matches!(result, Err(TerminalError::Closed)));
        assert!(out.contains("Really quit?"));
        assert!(out.contains("User: kim"));
    }
}
