//! Line buffers with terminal-correct visual editing.
//!
//! A [`LineBuffer`] never touches I/O. Every operation appends the bytes a terminal
//! needs to see to an echo string, so the same buffer drives the interactive console
//! and the tests. Erase is width-aware: removing a double-width glyph moves the
//! cursor back two columns, blanks both, and moves back again.

use unicode_width::UnicodeWidthChar;

pub const BACKSPACE: char = '\u{8}';
pub const DELETE: char = '\u{7f}';
pub const ESCAPE: char = '\u{1b}';
pub const TAB: char = '\t';

/// Default glyph echoed by masked input.
pub const MASK_GLYPH: char = '*';

/// Columns a character occupies. Control and combining characters report 0.
pub fn display_width(ch: char) -> usize {
    UnicodeWidthChar::width(ch).unwrap_or(0)
}

/// CSI cursor-back sequence for `n` columns.
pub fn cursor_back(n: usize) -> String {
    format!("\x1b[{}D", n)
}

/// Cursor-back(W), W spaces, cursor-back(W).
pub fn erase_columns(echo: &mut String, width: usize) {
    if width == 0 {
        return;
    }
    echo.push_str(&cursor_back(width));
    echo.extend(std::iter::repeat(' ').take(width));
    echo.push_str(&cursor_back(width));
}

/// How the editor classifies one decoded character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Erase,
    Escape,
    Tab,
    Char(char),
}

impl Key {
    pub fn classify(ch: char) -> Self {
        match ch {
            '\n' | '\r' => Key::Enter,
            BACKSPACE | DELETE => Key::Erase,
            ESCAPE => Key::Escape,
            TAB => Key::Tab,
            c => Key::Char(c),
        }
    }
}

/// Characters of one line being edited.
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    chars: Vec<char>,
    finished: bool,
    mask: Option<char>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that echoes `mask` instead of the typed characters.
    pub fn masked(mask: char) -> Self {
        Self {
            mask: Some(mask),
            ..Self::default()
        }
    }

    /// Buffer and echo a character with positive display width.
    /// Zero-width characters are dropped without echo; returns whether `ch` was kept.
    pub fn append_visible(&mut self, ch: char, echo: &mut String) -> bool {
        if self.finished || display_width(ch) == 0 {
            return false;
        }
        self.chars.push(ch);
        echo.push(self.mask.unwrap_or(ch));
        true
    }

    /// Remove the last character and visually erase it.
    ///
    /// Masked buffers always erase exactly one column, whatever the hidden character's
    /// real width was: only the one-column mask glyph is on screen.
    pub fn erase_last(&mut self, echo: &mut String) -> Option<char> {
        let last = self.chars.pop()?;
        let width = match self.mask {
            Some(_) => 1,
            None => display_width(last),
        };
        erase_columns(echo, width);
        Some(last)
    }

    /// End the line: echo a newline and hand back the text.
    pub fn finish(&mut self, echo: &mut String) -> String {
        self.finished = true;
        echo.push('\n');
        self.text()
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Total columns the buffered text occupies on screen.
    pub fn width(&self) -> usize {
        match self.mask {
            Some(_) => self.chars.len(),
            None => self.chars.iter().map(|&c| display_width(c)).sum(),
        }
    }
}

/// What a multi-line buffer decided after an Enter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// A new empty row was opened.
    NextRow,
    /// The terminator row was entered; carries the newline-joined text of prior rows.
    Done(String),
}

/// Rows of a multi-line entry plus the row the cursor is on.
#[derive(Debug, Clone)]
pub struct MultilineBuffer {
    rows: Vec<LineBuffer>,
    terminator: String,
}

impl MultilineBuffer {
    pub fn new(terminator: impl Into<String>) -> Self {
        Self {
            rows: vec![LineBuffer::new()],
            terminator: terminator.into(),
        }
    }

    pub fn cursor_row(&self) -> usize {
        self.rows.len() - 1
    }

    fn current(&mut self) -> &mut LineBuffer {
        let idx = self.rows.len() - 1;
        &mut self.rows[idx]
    }

    pub fn append_visible(&mut self, ch: char, echo: &mut String) -> bool {
        self.current().append_visible(ch, echo)
    }

    /// Erase within the row, or at the start of an empty row step up to the previous
    /// row and redraw it so editing continues at its end.
    pub fn erase(&mut self, echo: &mut String) {
        if !self.current().is_empty() {
            self.current().erase_last(echo);
            return;
        }
        if self.rows.len() == 1 {
            return;
        }
        self.rows.pop();
        echo.push_str("\x1b[1A\r\x1b[2K");
        echo.push_str(&self.current().text());
    }

    pub fn enter(&mut self, echo: &mut String) -> RowOutcome {
        echo.push('\n');
        if self.current().text() == self.terminator {
            let body: Vec<String> = self.rows[..self.rows.len() - 1]
                .iter()
                .map(LineBuffer::text)
                .collect();
            return RowOutcome::Done(body.join("\n"));
        }
        self.rows.push(LineBuffer::new());
        RowOutcome::NextRow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erase_emits_width_aware_sequence() {
        let mut buf = LineBuffer::new();
        let mut echo = String::new();
        buf.append_visible('a', &mut echo);
        buf.append_visible('한', &mut echo);
        assert_eq!(echo, "a한");

        echo.clear();
        assert_eq!(buf.erase_last(&mut echo), Some('한'));
        assert_eq!(echo, "\x1b[2D  \x1b[2D");

        echo.clear();
        assert_eq!(buf.erase_last(&mut echo), Some('a'));
        assert_eq!(echo, "\x1b[1D \x1b[1D");

        echo.clear();
        assert_eq!(buf.erase_last(&mut echo), None);
        assert!(echo.is_empty());
    }

    #[test]
    fn zero_width_characters_are_dropped_silently() {
        let mut buf = LineBuffer::new();
        let mut echo = String::new();
        for ch in ['\u{200B}', '\u{0301}', '\u{7}', '\u{0}'] {
            assert!(!buf.append_visible(ch, &mut echo));
        }
        assert!(buf.is_empty());
        assert!(echo.is_empty());
    }

    #[test]
    fn length_tracks_appends_minus_erases() {
        let mut buf = LineBuffer::new();
        let mut echo = String::new();
        let script = "ab한c\u{8}\u{8}de\u{8}漢字\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}x";
        let mut expected: Vec<char> = Vec::new();
        for ch in script.chars() {
            if ch == BACKSPACE {
                buf.erase_last(&mut echo);
                expected.pop();
            } else {
                buf.append_visible(ch, &mut echo);
                expected.push(ch);
            }
            assert_eq!(buf.len(), expected.len());
        }
        assert_eq!(buf.text(), "x");
    }

    #[test]
    fn masked_erase_is_always_one_column() {
        let mut buf = LineBuffer::masked(MASK_GLYPH);
        let mut echo = String::new();
        buf.append_visible('한', &mut echo);
        assert_eq!(echo, "*");
        echo.clear();
        buf.erase_last(&mut echo);
        assert_eq!(echo, "\x1b[1D \x1b[1D");
        assert_eq!(buf.width(), 0);
    }

    #[test]
    fn multiline_joins_rows_before_terminator() {
        let mut ml = MultilineBuffer::new(".");
        let mut echo = String::new();
        let mut outcome = None;
        for row in ["hello", "world", "."] {
            for ch in row.chars() {
                ml.append_visible(ch, &mut echo);
            }
            outcome = Some(ml.enter(&mut echo));
        }
        assert_eq!(outcome, Some(RowOutcome::Done("hello\nworld".to_string())));
    }

    #[test]
    fn multiline_backspace_on_empty_row_returns_to_previous() {
        let mut ml = MultilineBuffer::new(".");
        let mut echo = String::new();
        for ch in "abc".chars() {
            ml.append_visible(ch, &mut echo);
        }
        assert_eq!(ml.enter(&mut echo), RowOutcome::NextRow);
        assert_eq!(ml.cursor_row(), 1);

        echo.clear();
        ml.erase(&mut echo);
        assert_eq!(ml.cursor_row(), 0);
        assert_eq!(echo, "\x1b[1A\r\x1b[2Kabc");

        echo.clear();
        ml.erase(&mut echo);
        assert_eq!(echo, "\x1b[1D \x1b[1D");

        // Top row, empty: nothing happens.
        ml.erase(&mut echo);
        ml.erase(&mut echo);
        echo.clear();
        ml.erase(&mut echo);
        assert!(echo.is_empty());
        assert_eq!(ml.cursor_row(), 0);
    }

    #[test]
    fn keys_classify_like_a_terminal() {
        assert_eq!(Key::classify('\r'), Key::Enter);
        assert_eq!(Key::classify('\n'), Key::Enter);
        assert_eq!(Key::classify('\u{7f}'), Key::Erase);
        assert_eq!(Key::classify('\u{8}'), Key::Erase);
        assert_eq!(Key::classify('\u{1b}'), Key::Escape);
        assert_eq!(Key::classify('\t'), Key::Tab);
        assert_eq!(Key::classify('가'), Key::Char('가'));
    }
}
