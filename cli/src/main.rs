//! wsbridge CLI — open a websocket session and watch its events.
//!
//! Usage:
//! ```bash
//! # Print everything the server sends until Ctrl-C
//! wsbridge connect --url wss://echo.websocket.org
//!
//! # Send two messages, stop after three events
//! wsbridge connect --url ws://127.0.0.1:9000 --send hello --send world --count 3
//!
//! # Extra handshake headers and limits from a file
//! wsbridge connect --url ws://127.0.0.1:9000 --header "Authorization: Bearer t" --config ws.json
//! ```

mod logging;

use std::env;
use std::fs;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use wsbridge_core::{ConnectionConfig, ConnectionRegistry, Headers, Listener, SendError, Session};
use wsbridge_ws::WsTransport;

/// How long to wait for the server to confirm a close we asked for.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "connect" => cmd_connect(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("wsbridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("wsbridge {}", env!("CARGO_PKG_VERSION"));
    println!("Open a websocket session and print its events\n");
    println!("USAGE:");
    println!("    wsbridge <COMMAND>\n");
    println!("COMMANDS:");
    println!("    connect    Connect, send, and print every event as a JSON line");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("CONNECT FLAGS:");
    println!("    --url <URL>              ws:// or wss:// endpoint  [required]");
    println!("    --header \"Name: value\"   Handshake header (repeatable)");
    println!("    --config <FILE>          JSON connection config (camelCase keys)");
    println!("    --send <TEXT>            Send a text message after connecting (repeatable)");
    println!("    --send-json <JSON>       Send a typed message, e.g. '{{\"type\":\"Ping\",\"data\":[]}}'");
    println!("    --count <N>              Disconnect after N events");
    println!("    --json-logs              Emit logs as JSON on stderr\n");
    println!("Log filtering follows RUST_LOG (default: info).");
}

async fn cmd_connect(args: &[String]) -> anyhow::Result<()> {
    check_flags(args)?;
    logging::init(has_flag(args, "--json-logs"));

    let url = parse_flag(args, "--url").context("--url is required")?;
    let config = load_config(args)?;
    let count = match parse_flag(args, "--count") {
        Some(raw) => Some(
            raw.parse::<usize>()
                .with_context(|| format!("--count expects a number, got {raw:?}"))?,
        ),
        None => None,
    };

    let (tx, mut events) = mpsc::unbounded_channel();
    let printer = Listener::new(move |event| {
        let _ = tx.send(event.clone());
    });

    let registry = ConnectionRegistry::new(Arc::new(WsTransport::default()));
    let session = registry
        .connect_with_listeners(&url, Some(config), &[printer])
        .await
        .with_context(|| format!("connecting to {url}"))?;
    tracing::info!(connection = %session.id(), url = %url, "connected");

    for text in parse_flags(args, "--send") {
        session.send(text).await.context("sending --send message")?;
    }
    for raw in parse_flags(args, "--send-json") {
        let value: serde_json::Value =
            serde_json::from_str(&raw).with_context(|| format!("--send-json is not JSON: {raw}"))?;
        session.send(value).await.context("sending --send-json message")?;
    }

    let grace = time::sleep(CLOSE_GRACE);
    tokio::pin!(grace);
    let mut closing = false;
    let mut seen = 0usize;

    if count == Some(0) {
        closing = true;
        hang_up(&session).await?;
        grace.as_mut().reset(Instant::now() + CLOSE_GRACE);
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);
                if event.is_terminal() {
                    break;
                }
                seen += 1;
                if !closing && count.is_some_and(|n| seen >= n) {
                    closing = true;
                    hang_up(&session).await?;
                    grace.as_mut().reset(Instant::now() + CLOSE_GRACE);
                }
            }
            _ = tokio::signal::ctrl_c(), if !closing => {
                tracing::info!("interrupted, closing");
                closing = true;
                hang_up(&session).await?;
                grace.as_mut().reset(Instant::now() + CLOSE_GRACE);
            }
            _ = &mut grace, if closing => {
                tracing::warn!(connection = %session.id(), "server did not confirm close");
                break;
            }
        }
    }

    Ok(())
}

/// Request a normal closure; a session that is already gone is fine.
async fn hang_up(session: &Session) -> Result<(), SendError> {
    match session.disconnect().await {
        Err(e) if e.is_closed() => Ok(()),
        other => other,
    }
}

/// `--config` file first, then `--header` flags appended in order.
fn load_config(args: &[String]) -> anyhow::Result<ConnectionConfig> {
    let mut config = match parse_flag(args, "--config") {
        Some(path) => {
            let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?
        }
        None => ConnectionConfig::default(),
    };

    for line in parse_flags(args, "--header") {
        let (name, value) = Headers::parse_line(&line)?;
        config = config.with_header(name, value);
    }

    Ok(config)
}

const VALUE_FLAGS: &[&str] = &["--url", "--header", "--config", "--send", "--send-json", "--count"];

/// Reject anything that is neither a known flag nor a flag's value.
fn check_flags(args: &[String]) -> anyhow::Result<()> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--json-logs" => {}
            flag if VALUE_FLAGS.contains(&flag) => {
                if iter.next().is_none() {
                    bail!("{flag} expects a value");
                }
            }
            other => bail!("unexpected argument {other}"),
        }
    }
    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    parse_flags(args, flag).into_iter().next()
}

/// Every value given for `flag`, in order. Values of other flags are
/// skipped even when they look like `flag`.
fn parse_flags(args: &[String], flag: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            match iter.next() {
                Some(value) if arg == flag => values.push(value.clone()),
                _ => {}
            }
        }
    }
    values
}

fn has_flag(args: &[String], flag: &str) -> bool {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            iter.next();
        } else if arg == flag {
            return true;
        }
    }
    false
}
