use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WireError};
use crate::value::{read_value, write_value, Value};

/// Request type: invoke a command, expects one terminal response.
pub const REQUEST_PROMISE: u32 = 100;
/// Request type: cancel a prior `Promise`.
pub const REQUEST_PROMISE_CANCEL: u32 = 101;
/// Request type: subscribe to an event.
pub const REQUEST_EVENT_LISTEN: u32 = 102;
/// Request type: terminate a prior `EventListen` subscription.
pub const REQUEST_EVENT_DISPOSE: u32 = 103;

/// Response type: sent once per channel server immediately after construction.
pub const RESPONSE_INITIALIZE: u32 = 200;
/// Response type: terminal success for a `Promise`.
pub const RESPONSE_PROMISE_SUCCESS: u32 = 201;
/// Response type: terminal structured error for a `Promise`.
pub const RESPONSE_PROMISE_ERROR: u32 = 202;
/// Response type: terminal error carrying an arbitrary payload.
pub const RESPONSE_PROMISE_ERROR_OBJ: u32 = 203;
/// Response type: one event emission; non-terminal.
pub const RESPONSE_EVENT_FIRE: u32 = 204;

/// A structured error crossing the wire in a `PromiseError` response.
///
/// The stack is split on newlines by the sender; receivers that want the
/// raw text can rejoin it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,
}

impl RemoteError {
    /// Build a structured error without a stack.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            name: name.into(),
            stack: None,
        }
    }

    /// Attach a stack, split on newlines.
    pub fn with_stack(mut self, stack: &str) -> Self {
        self.stack = Some(stack.split('\n').map(str::to_string).collect());
        self
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// A frame sent from a channel client to a channel server.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Promise {
        id: u32,
        channel: String,
        name: String,
        arg: Value,
    },
    PromiseCancel {
        id: u32,
    },
    EventListen {
        id: u32,
        channel: String,
        name: String,
        arg: Value,
    },
    EventDispose {
        id: u32,
    },
}

impl Request {
    /// The correlation id this request carries.
    pub fn id(&self) -> u32 {
        match self {
            Request::Promise { id, .. }
            | Request::PromiseCancel { id }
            | Request::EventListen { id, .. }
            | Request::EventDispose { id } => *id,
        }
    }
}

/// A frame sent from a channel server to a channel client.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Initialize,
    PromiseSuccess { id: u32, data: Value },
    PromiseError { id: u32, data: RemoteError },
    PromiseErrorObj { id: u32, data: Value },
    EventFire { id: u32, data: Value },
}

impl Response {
    /// The correlation id this response carries, if any.
    pub fn id(&self) -> Option<u32> {
        match self {
            Response::Initialize => None,
            Response::PromiseSuccess { id, .. }
            | Response::PromiseError { id, .. }
            | Response::PromiseErrorObj { id, .. }
            | Response::EventFire { id, .. } => Some(*id),
        }
    }
}

/// Either direction of traffic, as classified by the type code.
///
/// A symmetric endpoint shares one pipe between its server and client
/// halves; this is the demultiplexing point.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

fn num(n: u32) -> Value {
    Value::Object(serde_json::Value::from(n))
}

fn encode_frame(header: Value, body: &Value) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    write_value(&header, &mut buf)?;
    write_value(body, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a request as one transport message (header value + body value).
pub fn encode_request(request: &Request) -> Result<Bytes> {
    match request {
        Request::Promise {
            id,
            channel,
            name,
            arg,
        } => encode_frame(
            Value::Array(vec![
                num(REQUEST_PROMISE),
                num(*id),
                Value::String(channel.clone()),
                Value::String(name.clone()),
            ]),
            arg,
        ),
        Request::PromiseCancel { id } => encode_frame(
            Value::Array(vec![num(REQUEST_PROMISE_CANCEL), num(*id)]),
            &Value::Undefined,
        ),
        Request::EventListen {
            id,
            channel,
            name,
            arg,
        } => encode_frame(
            Value::Array(vec![
                num(REQUEST_EVENT_LISTEN),
                num(*id),
                Value::String(channel.clone()),
                Value::String(name.clone()),
            ]),
            arg,
        ),
        Request::EventDispose { id } => encode_frame(
            Value::Array(vec![num(REQUEST_EVENT_DISPOSE), num(*id)]),
            &Value::Undefined,
        ),
    }
}

/// Encode a response as one transport message (header value + body value).
pub fn encode_response(response: &Response) -> Result<Bytes> {
    match response {
        Response::Initialize => encode_frame(
            Value::Array(vec![num(RESPONSE_INITIALIZE)]),
            &Value::Undefined,
        ),
        Response::PromiseSuccess { id, data } => encode_frame(
            Value::Array(vec![num(RESPONSE_PROMISE_SUCCESS), num(*id)]),
            data,
        ),
        Response::PromiseError { id, data } => encode_frame(
            Value::Array(vec![num(RESPONSE_PROMISE_ERROR), num(*id)]),
            &Value::object(data)?,
        ),
        Response::PromiseErrorObj { id, data } => encode_frame(
            Value::Array(vec![num(RESPONSE_PROMISE_ERROR_OBJ), num(*id)]),
            data,
        ),
        Response::EventFire { id, data } => {
            encode_frame(Value::Array(vec![num(RESPONSE_EVENT_FIRE), num(*id)]), data)
        }
    }
}

struct Header {
    kind: u32,
    fields: Vec<Value>,
}

impl Header {
    fn id(&self) -> Result<u32> {
        self.fields
            .get(1)
            .and_then(Value::as_u32)
            .ok_or_else(|| WireError::MalformedHeader("missing request id".to_string()))
    }

    fn channel(&self) -> Result<String> {
        self.fields
            .get(2)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| WireError::MalformedHeader("missing channel name".to_string()))
    }

    fn name(&self) -> Result<String> {
        self.fields
            .get(3)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| WireError::MalformedHeader("missing command name".to_string()))
    }
}

fn read_header(src: &mut Bytes) -> Result<Header> {
    let fields = match read_value(src)? {
        Value::Array(fields) => fields,
        other => {
            return Err(WireError::MalformedHeader(format!(
                "header must be an array, got {other:?}"
            )))
        }
    };
    let kind = fields
        .first()
        .and_then(Value::as_u32)
        .ok_or_else(|| WireError::MalformedHeader("missing message type".to_string()))?;
    Ok(Header { kind, fields })
}

/// Decode one transport message and classify it by direction.
pub fn decode_message(mut src: Bytes) -> Result<Message> {
    let header = read_header(&mut src)?;

    let message = match header.kind {
        REQUEST_PROMISE => Message::Request(Request::Promise {
            id: header.id()?,
            channel: header.channel()?,
            name: header.name()?,
            arg: read_value(&mut src)?,
        }),
        REQUEST_PROMISE_CANCEL => Message::Request(Request::PromiseCancel { id: header.id()? }),
        REQUEST_EVENT_LISTEN => Message::Request(Request::EventListen {
            id: header.id()?,
            channel: header.channel()?,
            name: header.name()?,
            arg: read_value(&mut src)?,
        }),
        REQUEST_EVENT_DISPOSE => Message::Request(Request::EventDispose { id: header.id()? }),
        RESPONSE_INITIALIZE => Message::Response(Response::Initialize),
        RESPONSE_PROMISE_SUCCESS => Message::Response(Response::PromiseSuccess {
            id: header.id()?,
            data: read_value(&mut src)?,
        }),
        RESPONSE_PROMISE_ERROR => {
            let id = header.id()?;
            let data = match read_value(&mut src)? {
                Value::Object(payload) => serde_json::from_value(payload)?,
                other => {
                    return Err(WireError::MalformedHeader(format!(
                        "error body must be an object, got {other:?}"
                    )))
                }
            };
            Message::Response(Response::PromiseError { id, data })
        }
        RESPONSE_PROMISE_ERROR_OBJ => Message::Response(Response::PromiseErrorObj {
            id: header.id()?,
            data: read_value(&mut src)?,
        }),
        RESPONSE_EVENT_FIRE => Message::Response(Response::EventFire {
            id: header.id()?,
            data: read_value(&mut src)?,
        }),
        other => return Err(WireError::UnknownMessageType(other)),
    };

    Ok(message)
}
