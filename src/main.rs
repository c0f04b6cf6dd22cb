//! Binary entrypoint for the RetroBBS CLI.
//!
//! Commands:
//! - `start [--port <path>] [--no-modem] [--no-telnet] [--no-websocket]` - run the gateway
//! - `init` - create a starter `config.toml`
//! - `shell` - run the menu shell on the current terminal (spawned per connection)
//!
//! See the library crate docs for module-level details: `retrobbs::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use retrobbs::config::Config;
use retrobbs::gateway::{Gateway, TransportKind};
use retrobbs::shell;
use retrobbs::terminal::Flow;

#[derive(Parser)]
#[command(name = "retrobbs")]
#[command(about = "Dial-up, telnet and WebSocket gateway for a retro text-menu BBS")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Start {
        /// Modem serial device (e.g., /dev/ttyUSB0), overrides the config
        #[arg(short, long)]
        port: Option<String>,

        /// Do not answer the modem
        #[arg(long)]
        no_modem: bool,

        /// Do not listen for telnet
        #[arg(long)]
        no_telnet: bool,

        /// Do not listen for WebSocket clients
        #[arg(long)]
        no_websocket: bool,
    },
    /// Write a default configuration file
    Init,
    /// Run the interactive menu shell on this terminal
    Shell,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            port,
            no_modem,
            no_telnet,
            no_websocket,
        } => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting RetroBBS v{}", env!("CARGO_PKG_VERSION"));

            let mut gateway = Gateway::new(config)?;
            if let Some(port) = port {
                gateway.set_modem_port(port);
            }
            for (off, kind) in [
                (no_modem, TransportKind::Modem),
                (no_telnet, TransportKind::Telnet),
                (no_websocket, TransportKind::WebSocket),
            ] {
                if off {
                    gateway.disable(kind);
                }
            }
            gateway.run().await?;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Shell => {
            // The shell owns the terminal; its logs only go to the configured file.
            let config = Config::load(&cli.config).await.unwrap_or_default();
            init_shell_logging(&config, cli.verbose);
            let ctx = shell::session_encoding(config.terminal.encoding());
            let flow = tokio::task::spawn_blocking(move || shell::run_stdio(ctx)).await??;
            if flow == Flow::Exit {
                std::process::exit(0);
            }
        }
    }

    Ok(())
}

fn base_level(config: &Option<Config>, verbosity: u8) -> log::LevelFilter {
    match verbosity {
        0 => config
            .as_ref()
            .map(|cfg| cfg.logging.level_filter())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    builder.filter_level(base_level(config, verbosity));
    let log_file = config.as_ref().and_then(|cfg| cfg.logging.file.clone());
    if let Some(file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
        {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

            // Foreground runs mirror the file to the console.
            let is_tty = atty::is(atty::Stream::Stdout);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
            let _ = builder.try_init();
            return;
        }
    }
    builder.format(|fmt, record| {
        writeln!(
            fmt,
            "{} [{}] {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            record.level(),
            record.args()
        )
    });
    let _ = builder.try_init();
}

/// Like [`init_logging`] but never writes to the terminal, which belongs to the caller.
fn init_shell_logging(config: &Config, verbosity: u8) {
    use std::io::Write;
    let Some(file) = config.logging.file.clone() else {
        return;
    };
    let Ok(f) = std::fs::OpenOptions::new().create(true).append(true).open(&file) else {
        return;
    };
    let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
    let pid = std::process::id();
    let mut builder = env_logger::Builder::new();
    builder.filter_level(base_level(&Some(config.clone()), verbosity));
    builder.format(move |_fmt, record| {
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        if let Ok(mut guard) = write_mutex.lock() {
            let _ = writeln!(guard, "{} [{}] shell[{}] {}", ts, record.level(), pid, record.args());
        }
        Ok(())
    });
    let _ = builder.try_init();
}
