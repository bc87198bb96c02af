//! Wire codec for ipclink.
//!
//! Every transport message is two self-describing values concatenated: a
//! header and a body. A value is a one-byte type tag followed by content;
//! numbers and records travel through the JSON object case, byte payloads
//! through the buffer cases. The header keeps routing-relevant fields
//! (type, request id, channel, command) decodable without touching the
//! body.

pub mod error;
pub mod message;
pub mod value;

pub use error::{Result, WireError};
pub use message::{
    decode_message, encode_request, encode_response, Message, RemoteError, Request, Response,
    REQUEST_EVENT_DISPOSE, REQUEST_EVENT_LISTEN, REQUEST_PROMISE, REQUEST_PROMISE_CANCEL,
    RESPONSE_EVENT_FIRE, RESPONSE_INITIALIZE, RESPONSE_PROMISE_ERROR, RESPONSE_PROMISE_ERROR_OBJ,
    RESPONSE_PROMISE_SUCCESS,
};
pub use value::{read_value, write_value, Value};
