//! # Configuration Management Module
//!
//! Centralized, type-safe configuration for the RetroBBS gateway. The file is TOML and
//! every section has defaults, so a config only needs the values that differ.
//!
//! ## Configuration Structure
//!
//! - [`TerminalConfig`] - text encoding shared by the gateway and every session shell
//! - [`SessionConfig`] - the interactive command spawned for each connection
//! - [`ModemConfig`] - serial device, AT command set and handshake timing
//! - [`TelnetConfig`] - raw TCP listener
//! - [`WebSocketConfig`] - browser listener and its session slots
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use retrobbs::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Modem device: {}", config.modem.port);
//!     println!("Encoding: {}", config.terminal.encoding().label());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [terminal]
//! encoding = "euc-kr"
//!
//! [modem]
//! enabled = true
//! port = "/dev/ttyS1"
//! baud_rate = 115200
//! connect_timeout_secs = 40
//!
//! [telnet]
//! bind = "0.0.0.0:2323"
//!
//! [websocket]
//! bind = "0.0.0.0:8080"
//! max_sessions = 1
//! ```

use anyhow::{anyhow, bail, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::terminal::codec::{Encoding, EncodingContext};

/// Environment variable carrying the selected encoding into each session shell.
pub const ENCODING_ENV: &str = "RETROBBS_ENCODING";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// One of "utf-8", "euc-kr", "latin1". Invalid labels fall back to UTF-8.
    pub encoding: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            encoding: "utf-8".to_string(),
        }
    }
}

impl TerminalConfig {
    /// The configured encoding, UTF-8 when the label is unknown.
    pub fn encoding(&self) -> Encoding {
        Encoding::from_label(&self.encoding).unwrap_or_default()
    }

    /// Replace the label with its canonical form, warning once when it is unknown.
    pub fn resolve(&mut self) -> Encoding {
        let encoding = match Encoding::from_label(&self.encoding) {
            Some(enc) => enc,
            None => {
                warn!(
                    "Invalid terminal encoding '{}', defaulting to {}",
                    self.encoding,
                    Encoding::default().label()
                );
                Encoding::default()
            }
        };
        self.encoding = encoding.label().to_string();
        encoding
    }

    pub fn context(&self) -> EncodingContext {
        EncodingContext::new(self.encoding())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Program spawned per connection. When unset the gateway spawns itself with `shell`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// TERM exported to the subprocess.
    pub term: String,
    pub cols: u16,
    pub rows: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            cwd: None,
            term: "vt100".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

impl SessionConfig {
    /// Resolve program and arguments, falling back to `<current exe> shell`.
    pub fn command_line(&self) -> Result<(PathBuf, Vec<String>)> {
        match &self.command {
            Some(cmd) => Ok((PathBuf::from(cmd), self.args.clone())),
            None => {
                let exe = std::env::current_exe()
                    .map_err(|e| anyhow!("Failed to locate current executable: {}", e))?;
                let mut args = vec!["shell".to_string()];
                args.extend(self.args.iter().cloned());
                Ok((exe, args))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    pub enabled: bool,
    pub port: String,
    pub baud_rate: u32,
    /// Seconds to wait for CONNECT after answering.
    pub connect_timeout_secs: u64,
    /// Sent once when the device is opened, each terminated by CR.
    pub init_commands: Vec<String>,
    pub answer_command: String,
    pub hangup_command: String,
    /// Escape-to-command-mode sequence, sent without CR.
    pub guard: String,
    /// Silence before the guard sequence (ms).
    pub guard_before_ms: u64,
    /// Silence after the guard sequence before hanging up (ms).
    pub guard_after_ms: u64,
    /// Settle time after the hang-up command (ms).
    pub hangup_settle_ms: u64,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyS1".to_string(),
            baud_rate: 115200,
            connect_timeout_secs: 40,
            init_commands: vec!["ATE0".into(), "ATQ0".into(), "ATS0=0".into()],
            answer_command: "ATA".to_string(),
            hangup_command: "ATH".to_string(),
            guard: "+++".to_string(),
            guard_before_ms: 1000,
            guard_after_ms: 2000,
            hangup_settle_ms: 1000,
        }
    }
}

impl ModemConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelnetConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:2323".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub bind: String,
    /// Concurrent browser sessions.
    pub max_sessions: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8080".to_string(),
            max_sessions: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("retrobbs.log".to_string()),
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub terminal: TerminalConfig,
    pub session: SessionConfig,
    pub modem: ModemConfig,
    pub telnet: TelnetConfig,
    pub websocket: WebSocketConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        config.validate()?;
        config.terminal.resolve();

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(cmd) = &self.session.command {
            if cmd.trim().is_empty() {
                bail!("session.command must not be empty");
            }
        }
        if self.session.cols == 0 || self.session.rows == 0 {
            bail!("session.cols and session.rows must be non-zero");
        }
        if self.modem.enabled {
            if self.modem.baud_rate == 0 {
                bail!("modem.baud_rate must be non-zero");
            }
            if self.modem.connect_timeout_secs == 0 {
                bail!("modem.connect_timeout_secs must be non-zero");
            }
        }
        if self.websocket.enabled && self.websocket.max_sessions == 0 {
            bail!("websocket.max_sessions must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_modem_setup() {
        let config = Config::default();
        assert_eq!(config.modem.port, "/dev/ttyS1");
        assert_eq!(config.modem.baud_rate, 115200);
        assert_eq!(config.modem.connect_timeout(), Duration::from_secs(40));
        assert_eq!(config.modem.init_commands, vec!["ATE0", "ATQ0", "ATS0=0"]);
        assert_eq!(config.telnet.bind, "0.0.0.0:2323");
        assert_eq!(config.websocket.max_sessions, 1);
        assert_eq!(config.terminal.encoding(), Encoding::Utf8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_encoding_falls_back_to_utf8() {
        for label in ["klingon", "", "utf-16"] {
            let terminal = TerminalConfig {
                encoding: label.to_string(),
            };
            assert_eq!(terminal.encoding(), Encoding::Utf8, "label {label:?}");
        }
        let terminal = TerminalConfig {
            encoding: "EUC-KR".to_string(),
        };
        assert_eq!(terminal.encoding(), Encoding::EucKr);
    }

    #[test]
    fn resolve_canonicalizes_the_label_once() {
        let mut terminal = TerminalConfig {
            encoding: "klingon".to_string(),
        };
        assert_eq!(terminal.resolve(), Encoding::Utf8);
        assert_eq!(terminal.encoding, "utf-8");
        // Already canonical: a second pass finds a known label.
        assert!(Encoding::from_label(&terminal.encoding).is_some());
        assert_eq!(terminal.resolve(), Encoding::Utf8);

        let mut terminal = TerminalConfig {
            encoding: " CP949 ".to_string(),
        };
        assert_eq!(terminal.resolve(), Encoding::EucKr);
        assert_eq!(terminal.encoding, "euc-kr");
    }

    #[test]
    fn partial_toml_keeps_section_defaults() {
        let config: Config = toml::from_str(
            r#"
            [modem]
            port = "/dev/ttyUSB3"
            connect_timeout_secs = 5

            [websocket]
            max_sessions = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.modem.port, "/dev/ttyUSB3");
        assert_eq!(config.modem.baud_rate, 115200);
        assert_eq!(config.modem.answer_command, "ATA");
        assert_eq!(config.websocket.max_sessions, 4);
        assert_eq!(config.telnet.bind, "0.0.0.0:2323");
    }

    #[test]
    fn validate_rejects_zero_slots_and_empty_command() {
        let mut config = Config::default();
        config.websocket.max_sessions = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.command = Some("  ".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.modem.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
        config.modem.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn explicit_command_is_used_verbatim() {
        let session = SessionConfig {
            command: Some("/bin/cat".to_string()),
            args: vec!["-u".to_string()],
            ..SessionConfig::default()
        };
        let (program, args) = session.command_line().unwrap();
        assert_eq!(program, PathBuf::from("/bin/cat"));
        assert_eq!(args, vec!["-u"]);
    }

    #[test]
    fn default_command_runs_own_shell() {
        let (_, args) = SessionConfig::default().command_line().unwrap();
        assert_eq!(args, vec!["shell"]);
    }
}
