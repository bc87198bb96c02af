use ipclink_wire::{RemoteError, Value, WireError};

/// Errors surfaced by channel calls and peer construction.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// The operation was cancelled before a result arrived.
    #[error("canceled")]
    Canceled,

    /// The remote service failed with a structured error.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// The remote service failed with an arbitrary payload.
    #[error("remote error payload: {0:?}")]
    RemoteObject(Value),

    /// The peer went away before the operation settled.
    #[error("peer disconnected")]
    Disconnected,

    /// The transport's inbound stream was already claimed by another endpoint.
    #[error("transport inbound stream already consumed")]
    TransportConsumed,

    /// Wire-level encode/decode error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

impl IpcError {
    /// Collapse into the structured shape a `PromiseError` response carries.
    ///
    /// `RemoteObject` must be handled separately; it travels as a
    /// `PromiseErrorObj`.
    pub fn into_remote(self) -> RemoteError {
        match self {
            IpcError::Remote(err) => err,
            IpcError::Canceled => RemoteError::new("Canceled", "Canceled"),
            other => RemoteError::new("Error", other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, IpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canceled_maps_to_canceled_remote() {
        let remote = IpcError::Canceled.into_remote();
        assert_eq!(remote.name, "Canceled");
    }

    #[test]
    fn remote_passes_through() {
        let remote = IpcError::Remote(RemoteError::new("CustomError", "nope")).into_remote();
        assert_eq!(remote.name, "CustomError");
        assert_eq!(remote.message, "nope");
    }

    #[test]
    fn local_errors_become_generic() {
        let remote = IpcError::Disconnected.into_remote();
        assert_eq!(remote.name, "Error");
    }
}
