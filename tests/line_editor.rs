use retrobbs::terminal::codec::EncodingContext;
use retrobbs::terminal::editor::{erase_columns, LineBuffer, MultilineBuffer, RowOutcome};
use retrobbs::terminal::Console;

fn read_line(input: &[u8]) -> (String, String) {
    let mut console = Console::new(input, Vec::new(), EncodingContext::default());
    let line = console.read_line("").unwrap();
    let (_, echo) = console.into_parts();
    (line, String::from_utf8(echo).unwrap())
}

// Length after any mix of appends and erases is appended minus erased, and every
// erase of a width-W glyph emits exactly cursor-back(W), W spaces, cursor-back(W).
#[test]
fn buffer_length_tracks_appends_minus_erases() {
    let script = ['a', '한', 'b', '\u{301}', '字', '😀', 'c'];
    let mut buf = LineBuffer::new();
    let mut appended = 0usize;
    let mut erased = 0usize;
    for (i, &ch) in script.iter().enumerate() {
        let mut echo = String::new();
        if buf.append_visible(ch, &mut echo) {
            appended += 1;
        }
        if i % 3 == 2 {
            let mut echo = String::new();
            if let Some(gone) = buf.erase_last(&mut echo) {
                erased += 1;
                let width = unicode_width::UnicodeWidthChar::width(gone).unwrap_or(0);
                let mut expected = String::new();
                erase_columns(&mut expected, width);
                assert_eq!(echo, expected, "erasing {gone:?}");
            }
        }
        assert_eq!(buf.len(), appended - erased);
    }
}

#[test]
fn zero_width_characters_change_nothing() {
    let mut buf = LineBuffer::new();
    let mut echo = String::new();
    buf.append_visible('e', &mut echo);
    for zw in ['\u{200b}', '\u{301}', '\u{fe0f}', '\u{7}'] {
        assert!(!buf.append_visible(zw, &mut echo));
    }
    assert_eq!(buf.len(), 1);
    assert_eq!(echo, "e");
}

#[test]
fn double_width_erase_restores_two_columns() {
    let (line, echo) = read_line("가나\x7f\r".as_bytes());
    assert_eq!(line, "가");
    assert_eq!(echo, "가나\x1b[2D  \x1b[2D\n");
}

#[test]
fn escape_sequences_of_any_length_are_swallowed() {
    for params in [0usize, 1, 8, 512] {
        let mut input = b"go".to_vec();
        input.extend_from_slice(b"\x1b[");
        input.extend(std::iter::repeat(b'1').take(params));
        input.push(b'H');
        input.extend_from_slice(b"!\r");
        let (line, echo) = read_line(&input);
        assert_eq!(line, "go!");
        assert_eq!(echo, "go!\n");
    }
}

#[test]
fn multiline_collects_until_terminator() {
    let mut console = Console::new(
        &b"hello\rworld\r.\r"[..],
        Vec::new(),
        EncodingContext::default(),
    );
    assert_eq!(console.read_multiline("", ".").unwrap(), "hello\nworld");
}

#[test]
fn multiline_backspace_at_empty_row_returns_to_previous() {
    let mut rows = MultilineBuffer::new(".");
    let mut echo = String::new();
    for ch in "abc".chars() {
        rows.append_visible(ch, &mut echo);
    }
    assert_eq!(rows.enter(&mut echo), RowOutcome::NextRow);
    assert_eq!(rows.cursor_row(), 1);

    echo.clear();
    rows.erase(&mut echo);
    assert_eq!(rows.cursor_row(), 0);
    assert_eq!(echo, "\x1b[1A\r\x1b[2Kabc");

    // Editing continues at the end of the restored row.
    echo.clear();
    rows.erase(&mut echo);
    rows.append_visible('d', &mut echo);
    assert_eq!(rows.enter(&mut echo), RowOutcome::NextRow);
    rows.append_visible('.', &mut echo);
    assert_eq!(rows.enter(&mut echo), RowOutcome::Done("abd".to_string()));
}

#[test]
fn masked_input_echoes_exactly() {
    let mut console = Console::new(&b"abc\x08d\r"[..], Vec::new(), EncodingContext::default());
    assert_eq!(console.read_masked("").unwrap(), "abd");
    let (_, echo) = console.into_parts();
    assert_eq!(echo, b"***\x1b[1D \x1b[1D*\n".to_vec());
}

#[test]
fn masked_erase_of_wide_glyph_is_one_column() {
    let mut console = Console::new("한\x7f\r".as_bytes(), Vec::new(), EncodingContext::default());
    assert_eq!(console.read_masked("").unwrap(), "");
    let (_, echo) = console.into_parts();
    assert_eq!(echo, b"*\x1b[1D \x1b[1D\n".to_vec());
}
