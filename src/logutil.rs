//! Logging utilities for raw transport traffic.
//!
//! Modem result codes, telnet chunks and pty output arrive as arbitrary bytes that may
//! contain carriage returns, escape sequences or half of a multi-byte character. These
//! helpers render them on a single log line.

use std::fmt::Write;

/// Longest preview rendered before truncating with an ellipsis.
const MAX_PREVIEW: usize = 120;

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
/// - other control characters (ESC included) => `\\xNN`
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape a raw byte chunk. Invalid UTF-8 is shown with replacement glyphs.
pub fn escape_bytes(data: &[u8]) -> String {
    escape_log(&String::from_utf8_lossy(data))
}
