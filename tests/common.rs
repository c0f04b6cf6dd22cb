//! Test utilities & fixtures.
//! Simulated terminals, a recording serial writer and quick modem timings.

#![allow(dead_code)] // each test binary uses a different subset

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use retrobbs::config::{Config, ModemConfig};
use retrobbs::gateway::session::{PtyPort, SpawnSpec, Terminal};
use tokio::sync::mpsc;

/// A terminal backed by channels instead of a real pty. Counts `close` calls.
pub struct FakeTerminal {
    port: Option<PtyPort>,
    pub closes: Arc<AtomicUsize>,
}

/// The far side of a [`FakeTerminal`]: feed `output` to act as the subprocess
/// writing, read `input` to see what the relay forwarded.
pub struct FakeProcess {
    pub output: mpsc::Sender<Vec<u8>>,
    pub input: mpsc::Receiver<Vec<u8>>,
    pub closes: Arc<AtomicUsize>,
}

impl FakeProcess {
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Everything forwarded to the subprocess so far.
    pub fn drain_input(&mut self) -> Vec<u8> {
        let mut seen = Vec::new();
        while let Ok(chunk) = self.input.try_recv() {
            seen.extend(chunk);
        }
        seen
    }
}

pub fn fake_terminal() -> (FakeTerminal, FakeProcess) {
    let (port, output, input) = PtyPort::channel();
    let closes = Arc::new(AtomicUsize::new(0));
    (
        FakeTerminal {
            port: Some(port),
            closes: closes.clone(),
        },
        FakeProcess {
            output,
            input,
            closes,
        },
    )
}

impl Terminal for FakeTerminal {
    fn take_port(&mut self) -> Option<PtyPort> {
        self.port.take()
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Serial writer that records everything written to it.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<u8>>>);

impl Recorder {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.text().matches(needle).count()
    }
}

impl Write for Recorder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Modem settings with every guard delay removed.
pub fn quick_modem_config() -> ModemConfig {
    ModemConfig {
        init_commands: vec!["ATE0".into()],
        guard_before_ms: 0,
        guard_after_ms: 0,
        hangup_settle_ms: 0,
        ..ModemConfig::default()
    }
}

/// `/bin/sh -c <script>` on an 80x24 pty.
pub fn sh(script: &str) -> SpawnSpec {
    SpawnSpec::new("/bin/sh").arg("-c").arg(script)
}

/// Config with only loopback listeners on ephemeral ports and no modem.
pub fn loopback_config() -> Config {
    let mut config = Config::default();
    config.modem.enabled = false;
    config.telnet.bind = "127.0.0.1:0".to_string();
    config.websocket.bind = "127.0.0.1:0".to_string();
    config.logging.file = None;
    config
}
