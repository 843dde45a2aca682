use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;

pub mod call;
pub mod listen;
pub mod serve;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the work-unit registry and the TCP bridge.
    Serve(ServeArgs),
    /// Call an RPC action on a unit and print the reply.
    Call(CallArgs),
    /// Subscribe to a publish endpoint and print received lines.
    Listen(ListenArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Call(args) => call::run(args),
        Command::Listen(args) => listen::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Configuration file (flat JSON object).
    #[arg(long, value_name = "FILE", default_value = "unitmesh.json")]
    pub config: PathBuf,
    /// Disable the TCP bridge regardless of configuration.
    #[arg(long)]
    pub no_bridge: bool,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Unit name (or full endpoint URL) hosting the action.
    pub unit: String,
    /// Action name, e.g. list_action.
    pub action: String,
    /// Parameter payload.
    #[arg(long, default_value = "")]
    pub data: String,
    /// Call timeout (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Publish endpoint to subscribe to, e.g. ipc:///tmp/fab/out.sock.
    pub url: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

/// Parse a human duration like `3s`, `500ms` or a bare millisecond count.
pub fn parse_duration(text: &str) -> Option<std::time::Duration> {
    let text = text.trim();
    if let Some(ms) = text.strip_suffix("ms") {
        return ms.trim().parse().ok().map(std::time::Duration::from_millis);
    }
    if let Some(secs) = text.strip_suffix('s') {
        return secs.trim().parse().ok().map(std::time::Duration::from_secs);
    }
    text.parse().ok().map(std::time::Duration::from_millis)
}
