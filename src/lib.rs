//! # RetroBBS - Dial-up, Telnet and WebSocket Gateway for a Text-Menu BBS
//!
//! RetroBBS puts an interactive text-menu program in front of callers arriving over an
//! analog modem, raw telnet, or a browser WebSocket. Every connection gets its own
//! pseudo-terminal and subprocess; the gateway only moves bytes.
//!
//! ## Features
//!
//! - **Modem Handshake**: RING / ATA / CONNECT state machine with a bounded connect
//!   wait, in-band `NO CARRIER` detection and a guarded `+++` / `ATH` hang-up.
//! - **Telnet**: raw TCP, one subprocess per connection.
//! - **WebSocket**: JSON events, per-connection session ids and a capped slot registry.
//! - **Terminal I/O Engine**: streaming decode (UTF-8, EUC-KR, Latin-1), width-aware
//!   erase for double-width glyphs, escape sequence suppression, masked and multi-line
//!   input, and reserved menu commands.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use retrobbs::config::Config;
//! use retrobbs::gateway::Gateway;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     Gateway::new(config)?.run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Configuration management and validation
//! - [`gateway`] - Transports, pty sessions and the relay
//! - [`terminal`] - Raw terminal I/O engine used by the session shell
//! - [`shell`] - The menu program spawned for each connection
//! - [`logutil`] - Single-line rendering of raw traffic for logs
//! - [`metrics`] - Process-wide counters
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐ ┌───────────┐ ┌───────────┐
//! │   Modem   │ │  Telnet   │ │ WebSocket │ ← Transport handshakes
//! └───────────┘ └───────────┘ └───────────┘
//!        └─────────────┼─────────────┘
//!              ┌───────────────┐
//!              │     Relay     │ ← Two loops, one stop signal
//!              └───────────────┘
//!              ┌───────────────┐
//!              │ Session (pty) │ ← One subprocess per connection
//!              └───────────────┘
//!              ┌───────────────┐
//!              │ retrobbs shell│ ← Line editor + menus
//!              └───────────────┘
//! ```

pub mod config;
pub mod gateway;
pub mod logutil;
pub mod metrics;
pub mod shell;
pub mod terminal;
