//! atchannel CLI
//!
//! Talks to a modem exposed through a serial-to-TCP bridge.

use std::process;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use crossbeam::channel::RecvTimeoutError;
use tracing_subscriber::{fmt, EnvFilter};

use atchannel::{AtChannel, ChannelConfig, Classification, Command, Response, UnsolicitedEvent};

/// atchannel CLI
#[derive(Parser, Debug)]
#[command(name = "atchannel-cli")]
#[command(about = "Send AT commands to a modem behind a serial-to-TCP bridge")]
#[command(version)]
struct Args {
    /// Bridge address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:2000")]
    addr: String,

    /// Command timeout in milliseconds
    #[arg(short, long, default_value = "5000")]
    timeout_ms: u64,

    /// Log every line sent and received
    #[arg(long)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a command and print its response
    Send {
        /// Command text, e.g. AT+CSQ
        text: String,

        /// How intermediate lines are collected
        #[arg(short, long, value_enum, default_value = "none")]
        mode: Mode,

        /// Expected prefix of intermediate lines, e.g. +CSQ:
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Send a command and upload a payload at the prompt
    Payload {
        /// Command text, e.g. AT+CMGS=25
        text: String,

        /// Payload written after the "> " prompt
        #[arg(long)]
        payload: String,

        /// Expected prefix of the result line, e.g. +CMGS:
        #[arg(short, long)]
        prefix: String,
    },

    /// Print unsolicited notifications
    Monitor {
        /// Stop after this many seconds (runs until the link closes if omitted)
        #[arg(short, long)]
        seconds: Option<u64>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    None,
    Numeric,
    Single,
    Multi,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atchannel=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("atchannel CLI v{}", atchannel::VERSION);

    let config = ChannelConfig::builder()
        .default_timeout_ms(args.timeout_ms)
        .trace(args.trace)
        .build();

    let channel = match AtChannel::connect_tcp(&args.addr, config) {
        Ok(channel) => channel,
        Err(e) => {
            tracing::error!("Failed to connect to {}: {}", args.addr, e);
            process::exit(1);
        }
    };

    if let Err(e) = channel.start() {
        tracing::error!("Failed to start channel: {}", e);
        process::exit(1);
    }

    let timeout = Duration::from_millis(args.timeout_ms);
    let outcome = match args.command {
        Commands::Send { text, mode, prefix } => {
            let classification = match (mode, prefix.is_some()) {
                (Mode::None, _) => Classification::NoResult,
                (Mode::Numeric, _) => Classification::Numeric,
                (Mode::Single, _) => Classification::SingleLine,
                (Mode::Multi, true) => Classification::MultiLine,
                (Mode::Multi, false) => Classification::MultiLineNoPrefix,
            };
            let mut command = Command::new(text, classification, timeout);
            if let Some(prefix) = prefix {
                command = command.with_prefix(prefix);
            }
            channel.send(command).map(|r| print_response(&r))
        }
        Commands::Payload {
            text,
            payload,
            prefix,
        } => channel
            .send_with_payload(&text, payload.into_bytes(), &prefix)
            .map(|r| print_response(&r)),
        Commands::Monitor { seconds } => {
            monitor(&channel, seconds.map(Duration::from_secs));
            Ok(true)
        }
    };

    channel.close();

    match outcome {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            tracing::error!("Command failed: {}", e);
            process::exit(1);
        }
    }
}

/// Print a response; returns whether it succeeded
fn print_response(response: &Response) -> bool {
    for line in response.lines() {
        println!("{}", line);
    }
    println!("{}", response.final_line());

    if let Some(code) = response.error_code() {
        tracing::warn!("Device reported {}", code);
    }
    response.is_success()
}

fn monitor(channel: &AtChannel, duration: Option<Duration>) {
    let events = channel.subscribe();
    let deadline = duration.and_then(|d| Instant::now().checked_add(d));

    loop {
        if deadline.map_or(false, |d| Instant::now() >= d) || channel.is_closed() {
            break;
        }

        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(UnsolicitedEvent::Line(line)) => println!("{}", line),
            Ok(UnsolicitedEvent::Pair { header, payload }) => {
                println!("{}", header);
                println!("{}", payload);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
