use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod call;
pub mod listen;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host a diagnostics channel for connecting peers.
    Serve(ServeArgs),
    /// Invoke a command on a peer-hosted channel.
    Call(CallArgs),
    /// Subscribe to a channel event and print emissions.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args).await,
        Command::Call(args) => call::run(args, format).await,
        Command::Listen(args) => listen::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Name the diagnostics channel is registered under.
    #[arg(long, default_value = "diagnostics")]
    pub channel: String,
    /// Interval between tick events (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s")]
    pub tick_interval: String,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Command name to invoke.
    pub command: String,
    /// Channel hosting the command.
    #[arg(long, short = 'c', default_value = "diagnostics")]
    pub channel: String,
    /// JSON argument for the command.
    #[arg(long, conflicts_with = "data")]
    pub json: Option<String>,
    /// Raw string argument for the command.
    #[arg(long, conflicts_with = "json")]
    pub data: Option<String>,
    /// Maximum time to wait for the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Event name to subscribe to.
    pub event: String,
    /// Channel hosting the event.
    #[arg(long, short = 'c', default_value = "diagnostics")]
    pub channel: String,
    /// JSON argument for the subscription.
    #[arg(long)]
    pub json: Option<String>,
    /// Exit after receiving N emissions.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<std::time::Duration> {
    use crate::exit::{CliError, USAGE};

    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(std::time::Duration::from_millis(value)),
        "s" => Ok(std::time::Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

pub(crate) fn parse_arg(
    json: Option<&str>,
    data: Option<&str>,
) -> CliResult<ipclink_wire::Value> {
    use crate::exit::{CliError, USAGE};

    if let Some(json) = json {
        let parsed: serde_json::Value = serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(ipclink_wire::Value::Object(parsed));
    }
    if let Some(data) = data {
        return Ok(ipclink_wire::Value::String(data.to_string()));
    }
    Ok(ipclink_wire::Value::Undefined)
}
