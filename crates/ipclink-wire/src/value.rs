use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};

/// Type tag: absent value.
pub const TAG_UNDEFINED: u8 = 0;
/// Type tag: UTF-8 string.
pub const TAG_STRING: u8 = 1;
/// Type tag: byte buffer produced by a foreign runtime.
pub const TAG_BUFFER: u8 = 2;
/// Type tag: native byte buffer.
pub const TAG_BYTES: u8 = 3;
/// Type tag: array of values.
pub const TAG_ARRAY: u8 = 4;
/// Type tag: JSON-encoded object.
pub const TAG_OBJECT: u8 = 5;

/// A self-describing wire value.
///
/// Every transport message is built from these. Scalars, records, and any
/// other JSON-representable data travel through the `Object` case; byte
/// payloads travel uncopied through the buffer cases.
///
/// Tags 2 and 3 both carry raw bytes: 2 marks buffers that originated in a
/// foreign runtime, 3 is the native encoding. They are kept distinct so
/// re-encoding a decoded value preserves the tag the peer sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    String(String),
    Buffer(Bytes),
    Bytes(Bytes),
    Array(Vec<Value>),
    Object(serde_json::Value),
}

impl Value {
    /// Wrap any serializable payload in the JSON object case.
    pub fn object<T: serde::Serialize>(payload: &T) -> Result<Self> {
        Ok(Value::Object(serde_json::to_value(payload)?))
    }

    /// Extract a non-negative integer from the JSON object case.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Object(serde_json::Value::Number(n)) => {
                n.as_u64().and_then(|n| u32::try_from(n).ok())
            }
            _ => None,
        }
    }

    /// Borrow the string case.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// True for the `Undefined` case.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Object(v)
    }
}

/// Serialize one value: a one-byte tag followed by its content.
///
/// All lengths are 4-byte big-endian. Array lengths count elements;
/// every other length counts bytes.
pub fn write_value(value: &Value, dst: &mut BytesMut) -> Result<()> {
    match value {
        Value::Undefined => {
            dst.put_u8(TAG_UNDEFINED);
        }
        Value::String(s) => {
            dst.put_u8(TAG_STRING);
            dst.put_u32(s.len() as u32);
            dst.put_slice(s.as_bytes());
        }
        Value::Buffer(b) => {
            dst.put_u8(TAG_BUFFER);
            dst.put_u32(b.len() as u32);
            dst.put_slice(b);
        }
        Value::Bytes(b) => {
            dst.put_u8(TAG_BYTES);
            dst.put_u32(b.len() as u32);
            dst.put_slice(b);
        }
        Value::Array(items) => {
            dst.put_u8(TAG_ARRAY);
            dst.put_u32(items.len() as u32);
            for item in items {
                write_value(item, dst)?;
            }
        }
        Value::Object(v) => {
            let json = serde_json::to_vec(v)?;
            dst.put_u8(TAG_OBJECT);
            dst.put_u32(json.len() as u32);
            dst.put_slice(&json);
        }
    }
    Ok(())
}

/// Deserialize one value from the front of `src`, consuming its bytes.
pub fn read_value(src: &mut Bytes) -> Result<Value> {
    if src.is_empty() {
        return Err(WireError::UnexpectedEof { needed: 1 });
    }
    let tag = src.get_u8();

    match tag {
        TAG_UNDEFINED => Ok(Value::Undefined),
        TAG_STRING => {
            let content = read_sized(src)?;
            Ok(Value::String(String::from_utf8(content.to_vec())?))
        }
        TAG_BUFFER => Ok(Value::Buffer(read_sized(src)?)),
        TAG_BYTES => Ok(Value::Bytes(read_sized(src)?)),
        TAG_ARRAY => {
            let count = read_len(src)?;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(read_value(src)?);
            }
            Ok(Value::Array(items))
        }
        TAG_OBJECT => {
            let content = read_sized(src)?;
            Ok(Value::Object(serde_json::from_slice(&content)?))
        }
        other => Err(WireError::UnknownTag(other)),
    }
}

fn read_len(src: &mut Bytes) -> Result<usize> {
    if src.len() < 4 {
        return Err(WireError::UnexpectedEof {
            needed: 4 - src.len(),
        });
    }
    Ok(src.get_u32() as usize)
}

fn read_sized(src: &mut Bytes) -> Result<Bytes> {
    let len = read_len(src)?;
    if src.len() < len {
        return Err(WireError::UnexpectedEof {
            needed: len - src.len(),
        });
    }
    Ok(src.split_to(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) -> Value {
        let mut buf = BytesMut::new();
        write_value(&value, &mut buf).unwrap();
        let mut bytes = buf.freeze();
        let decoded = read_value(&mut bytes).unwrap();
        assert!(bytes.is_empty(), "decoder must consume the whole value");
        decoded
    }

    #[test]
    fn roundtrip_undefined() {
        assert_eq!(roundtrip(Value::Undefined), Value::Undefined);
    }

    #[test]
    fn roundtrip_string() {
        let value = Value::String("héllo".to_string());
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn roundtrip_buffers_preserve_tag() {
        let foreign = Value::Buffer(Bytes::from_static(b"\x00\x01\x02"));
        let native = Value::Bytes(Bytes::from_static(b"\x00\x01\x02"));
        assert_eq!(roundtrip(foreign.clone()), foreign);
        assert_eq!(roundtrip(native.clone()), native);
    }

    #[test]
    fn roundtrip_nested_array() {
        let value = Value::Array(vec![
            Value::Undefined,
            Value::String("x".to_string()),
            Value::Array(vec![Value::Bytes(Bytes::from_static(b"y"))]),
        ]);
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn roundtrip_object() {
        let value = Value::Object(serde_json::json!({
            "id": 7,
            "flag": true,
            "nested": { "list": [1, 2, 3] },
        }));
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn string_length_is_big_endian() {
        let mut buf = BytesMut::new();
        write_value(&Value::String("abcd".to_string()), &mut buf).unwrap();
        assert_eq!(&buf[..], &[TAG_STRING, 0, 0, 0, 4, b'a', b'b', b'c', b'd']);
    }

    #[test]
    fn undefined_is_a_single_byte() {
        let mut buf = BytesMut::new();
        write_value(&Value::Undefined, &mut buf).unwrap();
        assert_eq!(&buf[..], &[TAG_UNDEFINED]);
    }

    #[test]
    fn truncated_string_is_rejected() {
        let mut bytes = Bytes::from_static(&[TAG_STRING, 0, 0, 0, 10, b'a']);
        let err = read_value(&mut bytes).unwrap_err();
        assert!(matches!(err, WireError::UnexpectedEof { .. }));
    }

    #[test]
    fn truncated_length_is_rejected() {
        let mut bytes = Bytes::from_static(&[TAG_ARRAY, 0, 0]);
        let err = read_value(&mut bytes).unwrap_err();
        assert!(matches!(err, WireError::UnexpectedEof { .. }));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = Bytes::from_static(&[42]);
        let err = read_value(&mut bytes).unwrap_err();
        assert!(matches!(err, WireError::UnknownTag(42)));
    }

    #[test]
    fn invalid_json_is_rejected() {
        let mut bytes = Bytes::from_static(&[TAG_OBJECT, 0, 0, 0, 2, b'{', b'x']);
        let err = read_value(&mut bytes).unwrap_err();
        assert!(matches!(err, WireError::Json(_)));
    }

    #[test]
    fn as_u32_reads_json_numbers() {
        assert_eq!(Value::Object(serde_json::json!(7)).as_u32(), Some(7));
        assert_eq!(Value::Object(serde_json::json!(-1)).as_u32(), None);
        assert_eq!(Value::String("7".to_string()).as_u32(), None);
    }

    #[test]
    fn two_values_decode_in_sequence() {
        let mut buf = BytesMut::new();
        write_value(&Value::String("header".to_string()), &mut buf).unwrap();
        write_value(&Value::Bytes(Bytes::from_static(b"body")), &mut buf).unwrap();

        let mut bytes = buf.freeze();
        let first = read_value(&mut bytes).unwrap();
        let second = read_value(&mut bytes).unwrap();

        assert_eq!(first.as_str(), Some("header"));
        assert_eq!(second, Value::Bytes(Bytes::from_static(b"body")));
        assert!(bytes.is_empty());
    }
}
