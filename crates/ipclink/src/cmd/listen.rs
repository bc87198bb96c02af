use std::sync::Arc;

use ipclink_peer::IpcClient;
use ipclink_transport::UdsProtocol;

use crate::cmd::{parse_arg, ListenArgs};
use crate::exit::{ipc_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_value, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let arg = parse_arg(args.json.as_deref(), None)?;

    let protocol = UdsProtocol::connect(&args.path)
        .await
        .map_err(|err| transport_error("connect failed", err))?;
    let endpoint = IpcClient::new(
        Arc::new(protocol),
        format!("cli-{}", std::process::id()),
    )
    .map_err(|err| ipc_error("connect failed", err))?;

    let event = endpoint
        .get_channel(args.channel.clone())
        .listen(&args.event, arg);
    let mut subscription = event.subscribe();

    let mut printed = 0usize;
    loop {
        let emission = tokio::select! {
            emission = subscription.recv() => emission,
            _ = tokio::signal::ctrl_c() => break,
        };

        let Some(value) = emission else {
            // Event source gone: the peer disconnected.
            break;
        };

        print_value(&args.channel, &args.event, &value, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    Ok(SUCCESS)
}
