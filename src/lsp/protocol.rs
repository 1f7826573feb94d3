/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! JSON-RPC message shapes and `Content-Length` framing.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use super::error::FramingError;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC `MethodNotFound` error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

fn default_null() -> serde_json::Value {
    serde_json::Value::Null
}

/// An outgoing or incoming request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

/// A response to a request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the request this answers.
    pub id: Option<RequestId>,
    /// Successful result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// A notification (no response expected).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

/// Request identifier, numeric or string.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    /// Error code.
    pub code: i64,
    /// Human readable message.
    pub message: String,
    /// Optional extra data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl RequestMessage {
    /// Builds a request with the protocol version filled in.
    pub fn new(id: RequestId, method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

impl NotificationMessage {
    /// Builds a notification with the protocol version filled in.
    pub fn new(method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

impl ResponseMessage {
    /// Builds a successful reply.
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Builds a `MethodNotFound` reply to a server-initiated request.
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: None,
            error: Some(ResponseError {
                code: METHOD_NOT_FOUND,
                message: format!("Method '{method}' not supported by client"),
                data: None,
            }),
        }
    }
}

/// Prefixes a JSON body with its `Content-Length` header.
pub fn encode_message(body: &str) -> Vec<u8> {
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(body.as_bytes());
    frame
}

/// Extracts one complete message from the front of `buffer`.
///
/// Returns `Ok(None)` while the header block or the body is still incomplete;
/// the buffer is only consumed once a whole message is available.
///
/// # Errors
///
/// Returns an error if a complete header block is malformed or the body is
/// not UTF-8.
pub fn try_parse_message(buffer: &mut BytesMut) -> Result<Option<String>, FramingError> {
    let Some(header_end) = buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
    else {
        return Ok(None);
    };

    let headers = std::str::from_utf8(&buffer[..header_end])
        .map_err(|_| FramingError::InvalidHeader)?;

    let mut content_length = None;
    for line in headers.lines() {
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            let value = value.trim();
            content_length = Some(
                value
                    .parse::<usize>()
                    .map_err(|_| FramingError::InvalidLength(value.to_string()))?,
            );
        }
    }

    let content_length = content_length.ok_or(FramingError::MissingContentLength)?;
    let body_start = header_end + HEADER_TERMINATOR.len();
    let body_end = body_start
        .checked_add(content_length)
        .ok_or_else(|| FramingError::InvalidLength(content_length.to_string()))?;

    if buffer.len() < body_end {
        return Ok(None);
    }

    buffer.advance(body_start);
    let body = buffer.split_to(content_length);
    String::from_utf8(body.to_vec())
        .map(Some)
        .map_err(|_| FramingError::InvalidBody)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete_message() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let mut buffer = BytesMut::from(encode_message(body).as_slice());

        let result = try_parse_message(&mut buffer).unwrap();
        assert_eq!(result, Some(body.to_string()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_incomplete_header() {
        let mut buffer = BytesMut::from("Content-Length: 10\r\n");
        assert_eq!(try_parse_message(&mut buffer).unwrap(), None);
        assert_eq!(buffer.len(), 20);
    }

    #[test]
    fn test_parse_incomplete_body() {
        let mut buffer = BytesMut::from("Content-Length: 100\r\n\r\n{\"partial\":");
        assert_eq!(try_parse_message(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_parse_multiple_messages() {
        let body1 = r#"{"jsonrpc":"2.0","id":1}"#;
        let body2 = r#"{"jsonrpc":"2.0","id":2}"#;
        let mut raw = encode_message(body1);
        raw.extend(encode_message(body2));
        let mut buffer = BytesMut::from(raw.as_slice());

        assert_eq!(
            try_parse_message(&mut buffer).unwrap(),
            Some(body1.to_string())
        );
        assert_eq!(
            try_parse_message(&mut buffer).unwrap(),
            Some(body2.to_string())
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_case_insensitive_header_with_content_type() {
        let body = r#"{"test":true}"#;
        let raw = format!(
            "content-length: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n{}",
            body.len(),
            body
        );
        let mut buffer = BytesMut::from(raw.as_str());

        assert_eq!(
            try_parse_message(&mut buffer).unwrap(),
            Some(body.to_string())
        );
    }

    #[test]
    fn test_parse_missing_content_length() {
        let mut buffer = BytesMut::from("Content-Type: text\r\n\r\n{}");
        assert!(matches!(
            try_parse_message(&mut buffer),
            Err(FramingError::MissingContentLength)
        ));
    }

    #[test]
    fn test_parse_bad_content_length() {
        let mut buffer = BytesMut::from("Content-Length: ten\r\n\r\n{}");
        assert!(matches!(
            try_parse_message(&mut buffer),
            Err(FramingError::InvalidLength(v)) if v == "ten"
        ));
    }

    #[test]
    fn test_parse_oversized_content_length() {
        let raw = format!("Content-Length: {}\r\n\r\n{{}}", usize::MAX);
        let mut buffer = BytesMut::from(raw.as_str());
        assert!(matches!(
            try_parse_message(&mut buffer),
            Err(FramingError::InvalidLength(v)) if v == usize::MAX.to_string()
        ));
    }

    #[test]
    fn test_request_id_string() {
        let json = r#"{"jsonrpc":"2.0","id":"abc-123","method":"test"}"#;
        let msg: RequestMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, RequestId::String("abc-123".to_string()));
        assert!(msg.params.is_null());
    }

    #[test]
    fn test_response_with_error() {
        let json =
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid Request"}}"#;
        let msg: ResponseMessage = serde_json::from_str(json).unwrap();
        assert!(msg.result.is_none());
        assert_eq!(msg.error.unwrap().code, -32600);
    }

    #[test]
    fn test_method_not_found_reply() {
        let reply = ResponseMessage::method_not_found(RequestId::Number(7), "workspace/configuration");
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["error"]["code"], METHOD_NOT_FOUND);
        assert!(value.get("result").is_none());
    }
}
