//! USSD tunnel command line.
//!
//! Offline tooling around the tunnel: packetize a document the way the server does,
//! pull tokens out of captured replies, reassemble a transfer, or replay a recorded
//! session through the session driver.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use tracing_subscriber::EnvFilter;
use ussd_session::{ScriptedTransport, SessionEvent, SessionRunner, SessionSlot};
use ussd_wire::{
    extract_token, wrap_envelope, Packetizer, ReassemblyOptions, Reassembler, TextEncoding,
    DEFAULT_FRAGMENT_SIZE,
};

mod config;
mod logging;
mod script;

use config::{ConfigSource, TunnelConfig};
use logging::TunnelLogFormatter;

/// USSD tunnel tooling
#[derive(Parser, Debug)]
#[command(name = "ussd-tunnel", version, about = "Packetize, reassemble and replay USSD tunnel transfers")]
struct Args {
    /// Configuration file path
    #[arg(long, global = true, default_value = "ussd-tunnel.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides RUST_LOG and the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compress a document and print one token per line
    Packetize {
        /// Document to packetize
        #[arg(long)]
        input: PathBuf,

        /// Compressed bytes per packet
        #[arg(long, default_value_t = DEFAULT_FRAGMENT_SIZE)]
        fragment_size: usize,

        /// Print each token wrapped as a USSD reply
        #[arg(long)]
        envelope: bool,
    },

    /// Print the token of each raw reply line, or `-` when there is none
    Extract {
        /// File of raw replies, one per line
        #[arg(long)]
        input: PathBuf,
    },

    /// Reassemble a transfer from captured tokens
    Reassemble {
        /// File of tokens, one per line
        #[arg(long)]
        input: PathBuf,

        /// Lines are raw replies; extract the token from each
        #[arg(long)]
        raw: bool,

        /// Skip per-fragment checksum verification
        #[arg(long)]
        no_verify: bool,

        /// Document text encoding (utf-8, latin1, ascii)
        #[arg(long)]
        encoding: Option<TextEncoding>,

        /// Write the document bytes here instead of printing the text
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Replay a scripted session through the session driver
    Replay {
        /// YAML script of replies
        #[arg(long)]
        script: PathBuf,

        /// Target address sent at the domain prompt
        #[arg(long)]
        target: Option<String>,

        /// Dial code
        #[arg(long)]
        dial: Option<String>,

        /// Per-turn reply timeout, e.g. 30s
        #[arg(long)]
        turn_timeout: Option<humantime::Duration>,

        /// Write the document bytes here instead of printing the text
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let tunnel_config = TunnelConfig::load_from_file(&args.config);

    init_logging(args.log_level.as_deref(), tunnel_config.log_level.as_deref())?;
    info!("ussd-tunnel v{}", env!("CARGO_PKG_VERSION"));

    match &tunnel_config.source {
        ConfigSource::File(path) => info!("Loaded configuration from {}", path.display()),
        ConfigSource::Defaults { reason } => {
            component_debug!("config", "Using default configuration ({})", reason)
        }
    }
    for name in &tunnel_config.overrides {
        component_info!("config", "{} overrides the config file", name);
    }
    tunnel_config.validate()?;

    match args.command {
        Command::Packetize {
            input,
            fragment_size,
            envelope,
        } => packetize(&input, fragment_size, envelope),
        Command::Extract { input } => extract(&input),
        Command::Reassemble {
            input,
            raw,
            no_verify,
            encoding,
            output,
        } => {
            let options = ReassemblyOptions {
                verify_checksum: tunnel_config.session.verify_checksum && !no_verify,
                encoding: encoding.unwrap_or(tunnel_config.session.encoding),
            };
            reassemble(&input, raw, options, output.as_deref())
        }
        Command::Replay {
            script,
            target,
            dial,
            turn_timeout,
            output,
        } => {
            let mut session = tunnel_config.session;
            if let Some(target) = target {
                session.target_address = target;
            }
            if let Some(dial) = dial {
                session.dial_code = dial;
            }
            if let Some(timeout) = turn_timeout {
                session.turn_timeout_secs = Duration::from(timeout).as_secs().max(1);
            }
            replay(&script, session, output.as_deref()).await
        }
    }
}

/// Install the subscriber. Precedence: `--log-level`, then `RUST_LOG`, then the config file.
fn init_logging(cli_level: Option<&str>, file_level: Option<&str>) -> Result<()> {
    let env_filter = match (cli_level, std::env::var("RUST_LOG").ok(), file_level) {
        (Some(level), _, _) => crate_filter(level)?,
        (None, Some(directives), _) => EnvFilter::try_new(directives)?,
        (None, None, Some(level)) => crate_filter(level)?,
        (None, None, None) => crate_filter("info")?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(TunnelLogFormatter::new("ussd-tunnel"))
        .init();
    Ok(())
}

fn crate_filter(level: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::new("warn")
        .add_directive(format!("ussd_tunnel={}", level).parse()?)
        .add_directive(format!("ussd_session={}", level).parse()?)
        .add_directive(format!("ussd_wire={}", level).parse()?))
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

fn packetize(input: &Path, fragment_size: usize, envelope: bool) -> Result<()> {
    let document =
        std::fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let tokens = Packetizer::new(fragment_size)
        .packetize(&document)
        .context("failed to compress document")?;

    component_info!(
        "wire",
        "{} bytes -> {} packets",
        document.len(),
        tokens.len()
    );

    let mut out = std::io::stdout().lock();
    for (i, token) in tokens.iter().enumerate() {
        if envelope {
            writeln!(out, "{}", wrap_envelope(token, i + 1))?;
        } else {
            writeln!(out, "{}", token)?;
        }
    }
    Ok(())
}

fn extract(input: &Path) -> Result<()> {
    let mut out = std::io::stdout().lock();
    for line in read_lines(input)? {
        writeln!(out, "{}", extract_token(&line).unwrap_or("-"))?;
    }
    Ok(())
}

fn reassemble(
    input: &Path,
    raw: bool,
    options: ReassemblyOptions,
    output: Option<&Path>,
) -> Result<()> {
    let lines = read_lines(input)?;
    let tokens: Vec<&str> = if raw {
        lines
            .iter()
            .filter_map(|line| {
                let token = extract_token(line);
                if token.is_none() {
                    component_warn!("wire", "Skipping reply with no token: {:?}", line);
                }
                token
            })
            .collect()
    } else {
        lines.iter().map(String::as_str).collect()
    };

    let reassembler = Reassembler::new(options);
    match output {
        Some(path) => {
            let bytes = reassembler
                .reassemble_bytes(&tokens)
                .context("reassembly failed")?;
            component_info!(
                "wire",
                "Reassembled {} tokens into {} bytes",
                tokens.len(),
                bytes.len()
            );
            write_bytes(&bytes, path)
        }
        None => {
            let document = reassembler
                .reassemble(&tokens)
                .context("reassembly failed")?;
            component_info!(
                "wire",
                "Reassembled {} packets into {} bytes",
                document.packet_count,
                document.bytes.len()
            );
            print_text(&document.text)
        }
    }
}

async fn replay(
    script: &Path,
    mut session: ussd_session::SessionConfig,
    output: Option<&Path>,
) -> Result<()> {
    let steps = script::load_script(script)?;
    if output.is_some() {
        // The file gets raw bytes; Latin-1 decoding accepts any byte.
        session.encoding = TextEncoding::Latin1;
    }
    component_info!("session", "Replaying {} scripted steps", steps.len());

    let (event_tx, mut event_rx) = mpsc::channel(64);
    let progress = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SessionEvent::StateChanged { from, to } => {
                    component_debug!("session", "{} -> {}", from, to)
                }
                SessionEvent::TokenCaptured { count } => {
                    component_debug!("session", "Captured token #{}", count)
                }
                SessionEvent::ReplyAbsorbed => {
                    component_warn!("session", "Chunk reply carried no token")
                }
                SessionEvent::Completed { bytes } => {
                    component_info!("session", "Transfer complete, {} bytes", bytes)
                }
                SessionEvent::Failed { reason } => {
                    component_error!("session", "Session failed: {}", reason)
                }
            }
        }
    });

    let (cancel_tx, cancel_rx) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(());
        }
    });

    let mut runner = SessionRunner::new(session, SessionSlot::new(), ScriptedTransport::new(steps))
        .with_events(event_tx);
    let result = runner.run_with_cancel(cancel_rx).await;

    let transport = runner.into_transport();
    component_debug!(
        "session",
        "Sent {} inputs, {} script steps unused",
        transport.sent().len(),
        transport.remaining()
    );
    progress.await.context("progress task failed")?;

    let document = result.context("session failed")?;
    match output {
        Some(path) => write_bytes(&document.bytes, path),
        None => print_text(&document.text),
    }
}

fn write_bytes(bytes: &[u8], path: &Path) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    info!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

fn print_text(text: &str) -> Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}
