//! Server-to-client messages.

use std::collections::HashMap;

use super::sig;
use crate::bolt::packstream::Value;

/// Code and text of a FAILURE message.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureDetail {
    /// Status code, e.g. `"Neo.ClientError.Statement.SyntaxError"`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl FailureDetail {
    /// Build a failure detail.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Extract code and message from a FAILURE metadata map. Missing
    /// entries fall back to an unknown-error code, as servers are not
    /// trusted to always populate both.
    pub fn from_metadata(metadata: &HashMap<String, Value>) -> Self {
        let code = metadata
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("Neo.DatabaseError.General.UnknownError");
        let message = metadata
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("An unknown error occurred");
        Self::new(code, message)
    }
}

/// All protocol version 1 response messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// SUCCESS with its metadata map
    Success(HashMap<String, Value>),
    /// RECORD with one row of field values
    Record(Vec<Value>),
    /// IGNORED - the request was skipped because of an earlier failure
    Ignored,
    /// FAILURE with code and message
    Failure(FailureDetail),
}

impl Response {
    /// The message signature byte.
    pub fn signature(&self) -> u8 {
        match self {
            Response::Success(_) => sig::SUCCESS,
            Response::Record(_) => sig::RECORD,
            Response::Ignored => sig::IGNORED,
            Response::Failure(_) => sig::FAILURE,
        }
    }

    /// The message name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Response::Success(_) => "SUCCESS",
            Response::Record(_) => "RECORD",
            Response::Ignored => "IGNORED",
            Response::Failure(_) => "FAILURE",
        }
    }

    /// True for SUCCESS.
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }
}

/// Typed accessors over SUCCESS metadata.
pub trait SuccessMetadata {
    /// The `fields` entry of a RUN success: result column names.
    fn result_fields(&self) -> Option<Vec<String>>;
    /// The `server` entry of an INIT success: the server agent string.
    fn server_agent(&self) -> Option<&str>;
}

impl SuccessMetadata for HashMap<String, Value> {
    fn result_fields(&self) -> Option<Vec<String>> {
        match self.get("fields")? {
            Value::List(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        }
    }

    fn server_agent(&self) -> Option<&str> {
        self.get("server").and_then(Value::as_str)
    }
}
