/// Errors that can occur while encoding or decoding wire values.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The buffer ended before a complete value was read.
    #[error("unexpected end of message ({needed} more bytes needed)")]
    UnexpectedEof { needed: usize },

    /// The value carries a type tag outside the known table.
    #[error("unknown value tag {0}")]
    UnknownTag(u8),

    /// A string value was not valid UTF-8.
    #[error("invalid UTF-8 in string value: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// JSON encoding or decoding of an object value failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame header does not match any known message shape.
    #[error("malformed message header: {0}")]
    MalformedHeader(String),

    /// The message type code is outside the request/response tables.
    #[error("unknown message type {0}")]
    UnknownMessageType(u32),
}

pub type Result<T> = std::result::Result<T, WireError>;
