use retrobbs::terminal::codec::EncodingContext;
use retrobbs::terminal::{Command, CommandInterceptor, Console, Flow};

fn console(input: &str) -> Console<&[u8], Vec<u8>> {
    Console::new(input.as_bytes(), Vec::new(), EncodingContext::default())
}

#[test]
fn exit_declined_returns_control() {
    let interceptor = CommandInterceptor::default();
    let mut c = console("x\rn\rb\r");
    // The declined exit re-prompts, so the next real command comes back.
    let command = c.read_command("> ", &interceptor).unwrap();
    assert_eq!(command, Command::Line("b".to_string()));
    let (_, out) = c.into_parts();
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("Really quit? (y/n): "));
    assert!(!out.contains("Goodbye."));
}

#[test]
fn exit_confirmed_signals_exit() {
    let interceptor = CommandInterceptor::default();
    let mut c = console("X\ry\r");
    assert_eq!(
        c.read_command("> ", &interceptor).unwrap(),
        Command::Flow(Flow::Exit)
    );
    let (_, out) = c.into_parts();
    assert!(String::from_utf8(out).unwrap().ends_with("Goodbye.\n"));
}

#[test]
fn back_pops_one_menu() {
    let interceptor = CommandInterceptor::default();
    let mut c = console(" p \r");
    assert_eq!(
        c.read_command("> ", &interceptor).unwrap(),
        Command::Flow(Flow::PopMenu)
    );
}

#[test]
fn ordinary_lines_pass_through_trimmed() {
    let interceptor = CommandInterceptor::default();
    let mut c = console("  read 3 \r");
    assert_eq!(
        c.read_command("> ", &interceptor).unwrap(),
        Command::Line("read 3".to_string())
    );
}
