use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ipclink_peer::{ClientConnectionEvent, IpcError, IpcServer, ServerChannel};
use ipclink_transport::UdsListener;
use ipclink_wire::{RemoteError, Value};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};

/// The channel a serving process hosts for connecting peers: echo and
/// liveness commands plus a periodic tick event.
struct DiagnosticsChannel {
    started: Instant,
    ticks: broadcast::Sender<Value>,
}

impl DiagnosticsChannel {
    fn new(ticks: broadcast::Sender<Value>) -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            ticks,
        })
    }
}

#[async_trait]
impl ServerChannel<String> for DiagnosticsChannel {
    async fn call(
        &self,
        ctx: &String,
        command: &str,
        arg: Value,
        _cancel: CancellationToken,
    ) -> Result<Value, IpcError> {
        match command {
            "echo" => Ok(arg),
            "ping" => Ok(Value::String("pong".to_string())),
            "whoami" => Ok(Value::String(ctx.clone())),
            "uptime" => Ok(Value::Object(serde_json::json!({
                "seconds": self.started.elapsed().as_secs(),
            }))),
            other => Err(IpcError::Remote(RemoteError::new(
                "UnknownCommand",
                format!("unknown command '{other}'"),
            ))),
        }
    }

    fn listen(
        &self,
        _ctx: &String,
        event: &str,
        _arg: Value,
    ) -> Result<broadcast::Receiver<Value>, IpcError> {
        match event {
            "tick" => Ok(self.ticks.subscribe()),
            other => Err(IpcError::Remote(RemoteError::new(
                "UnknownEvent",
                format!("unknown event '{other}'"),
            ))),
        }
    }
}

pub async fn run(args: ServeArgs) -> CliResult<i32> {
    let tick_interval = parse_duration(&args.tick_interval)?;
    let listener = UdsListener::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;

    let (connections, incoming) = mpsc::unbounded_channel();
    let hub: IpcServer<String> = IpcServer::new(incoming);

    let (ticks, _) = broadcast::channel(16);
    hub.register_channel(args.channel.clone(), DiagnosticsChannel::new(ticks.clone()));

    // Periodic tick; emissions with no subscribers simply evaporate.
    tokio::spawn(async move {
        let mut counter = 0u64;
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            interval.tick().await;
            let _ = ticks.send(Value::Object(serde_json::json!(counter)));
            counter += 1;
        }
    });

    let accept = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok(protocol) => {
                    let disconnected = protocol.disconnected();
                    if connections
                        .send(ClientConnectionEvent {
                            protocol: Arc::new(protocol),
                            disconnected,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    break;
                }
            }
        }
    });

    info!(path = ?args.path, channel = %args.channel, "serving");
    tokio::signal::ctrl_c()
        .await
        .map_err(|err| crate::exit::io_error("signal handler failed", err))?;

    accept.abort();
    hub.dispose();
    Ok(SUCCESS)
}
