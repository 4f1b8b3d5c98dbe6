#![forbid(unsafe_code)]

//! `process-relay-ctl`: local CLI companion for `process-relay`.
//!
//! Connects to the IPC socket as an ordinary observer: it can start and
//! terminate processes, list the active table, or watch the live event
//! stream.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(
    name = "process-relay-ctl",
    about = "Local CLI for the process-relay server",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match server's `ipc_name` config).
    #[arg(long, default_value = "process-relay")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new process and print its pid.
    Start,

    /// Terminate a process and wait for its exit report.
    Terminate {
        /// Process identifier.
        pid: u32,
    },

    /// List active processes.
    List,

    /// Print every lifecycle event until interrupted.
    Watch,
}

type CtlResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn main() {
    let args = Cli::parse();

    let request = match args.command {
        Command::Start => Some(serde_json::json!({ "event": "start-process" })),
        Command::Terminate { pid } => {
            Some(serde_json::json!({ "event": "terminate-process", "pid": pid }))
        }
        Command::List => Some(serde_json::json!({ "event": "list-processes" })),
        Command::Watch => None,
    };

    if let Err(err) = run(&args, request.as_ref()) {
        eprintln!("Failed to talk to server: {err}");
        eprintln!("Is process-relay running with ipc_name '{}'?", args.ipc_name);
        std::process::exit(1);
    }
}

fn run(args: &Cli, request: Option<&Value>) -> CtlResult<()> {
    let name = args.ipc_name.as_str().to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    if let Some(request) = request {
        let mut request_line = serde_json::to_string(request)?;
        request_line.push('\n');
        stream.write_all(request_line.as_bytes())?;
        stream.flush()?;
    }

    let mut reader = BufReader::new(&stream);

    match args.command {
        Command::Start => {
            let message = wait_for(&mut reader, |m| event_of(m) == "start-accepted")?;
            println!("{}", message.get("pid").unwrap_or(&Value::Null));
        }
        Command::Terminate { pid } => {
            let message = wait_for(&mut reader, |m| {
                event_of(m) == "process-terminated"
                    && m.get("pid").and_then(Value::as_u64) == Some(u64::from(pid))
            })?;
            println!(
                "{}",
                message.get("message").and_then(Value::as_str).unwrap_or_default()
            );
        }
        Command::List => {
            let message = wait_for(&mut reader, |m| event_of(m) == "process-list")?;
            let processes = message.get("processes").cloned().unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&processes)?);
        }
        Command::Watch => loop {
            let message = read_message(&mut reader)?;
            println!("{message}");
        },
    }

    Ok(())
}

fn event_of(message: &Value) -> &str {
    message.get("event").and_then(Value::as_str).unwrap_or_default()
}

/// Read one JSON message; EOF is an error.
fn read_message(reader: &mut impl BufRead) -> CtlResult<Value> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err("server closed the connection".into());
    }
    Ok(serde_json::from_str(line.trim())?)
}

/// Skip broadcast traffic until `matches` accepts a message. A notice aborts
/// the command with its text.
fn wait_for(reader: &mut impl BufRead, matches: impl Fn(&Value) -> bool) -> CtlResult<Value> {
    loop {
        let message = read_message(reader)?;
        if matches(&message) {
            return Ok(message);
        }
        if event_of(&message) == "notice" {
            let text = message
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            eprintln!("Error: {text}");
            std::process::exit(1);
        }
    }
}
