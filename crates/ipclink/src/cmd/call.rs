use std::sync::Arc;

use ipclink_peer::IpcClient;
use ipclink_transport::UdsProtocol;

use crate::cmd::{parse_arg, parse_duration, CallArgs};
use crate::exit::{ipc_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_value, OutputFormat};

fn cli_context() -> String {
    format!("cli-{}", std::process::id())
}

pub async fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let arg = parse_arg(args.json.as_deref(), args.data.as_deref())?;

    let protocol = UdsProtocol::connect(&args.path)
        .await
        .map_err(|err| transport_error("connect failed", err))?;
    let endpoint = IpcClient::new(Arc::new(protocol), cli_context())
        .map_err(|err| ipc_error("connect failed", err))?;

    let proxy = endpoint.get_channel(args.channel.clone());
    let result = tokio::time::timeout(timeout, proxy.call(&args.command, arg, None))
        .await
        .map_err(|_| {
            CliError::new(
                TIMEOUT,
                format!("call timed out after {}", args.timeout),
            )
        })?
        .map_err(|err| ipc_error("call failed", err))?;

    print_value(&args.channel, &args.command, &result, format);
    Ok(SUCCESS)
}
