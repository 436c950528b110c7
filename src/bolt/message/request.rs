//! Client-to-server messages.

use std::collections::HashMap;

use super::sig;
use crate::bolt::packstream::Value;

/// All protocol version 1 request messages.
#[derive(Debug, Clone)]
pub enum Request {
    /// INIT - authenticate and initialize the connection
    Init {
        /// Client name and version, e.g. `"bolt-driver/0.1.0"`.
        client_name: String,
        /// Opaque authentication token, passed through unexamined.
        auth_token: HashMap<String, Value>,
    },
    /// RUN - submit a statement for execution
    Run {
        /// The statement text.
        statement: String,
        /// Statement parameters.
        parameters: HashMap<String, Value>,
    },
    /// PULL_ALL - stream every record of the current result
    PullAll,
    /// DISCARD_ALL - drop every record of the current result
    DiscardAll,
    /// RESET - return the connection to a clean state
    Reset,
    /// ACK_FAILURE - acknowledge a failure, clearing it server-side
    AckFailure,
}

impl Request {
    /// INIT with the given client name and auth token.
    pub fn init(client_name: impl Into<String>, auth_token: HashMap<String, Value>) -> Self {
        Request::Init {
            client_name: client_name.into(),
            auth_token,
        }
    }

    /// RUN with parameters.
    pub fn run(statement: impl Into<String>, parameters: HashMap<String, Value>) -> Self {
        Request::Run {
            statement: statement.into(),
            parameters,
        }
    }

    /// The message signature byte.
    pub fn signature(&self) -> u8 {
        match self {
            Request::Init { .. } => sig::INIT,
            Request::Run { .. } => sig::RUN,
            Request::PullAll => sig::PULL_ALL,
            Request::DiscardAll => sig::DISCARD_ALL,
            Request::Reset => sig::RESET,
            Request::AckFailure => sig::ACK_FAILURE,
        }
    }

    /// The message name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Init { .. } => "INIT",
            Request::Run { .. } => "RUN",
            Request::PullAll => "PULL_ALL",
            Request::DiscardAll => "DISCARD_ALL",
            Request::Reset => "RESET",
            Request::AckFailure => "ACK_FAILURE",
        }
    }

    /// The message fields in wire order.
    pub fn fields(&self) -> Vec<Value> {
        match self {
            Request::Init { client_name, auth_token } => vec![
                Value::String(client_name.clone()),
                Value::Map(auth_token.clone()),
            ],
            Request::Run { statement, parameters } => vec![
                Value::String(statement.clone()),
                Value::Map(parameters.clone()),
            ],
            Request::PullAll | Request::DiscardAll | Request::Reset | Request::AckFailure => {
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_carries_name_and_token() {
        let mut token = HashMap::new();
        token.insert("scheme".to_string(), Value::String("basic".into()));
        let msg = Request::init("bolt-driver/0.1.0", token);

        assert_eq!(msg.signature(), 0x01);
        assert_eq!(msg.name(), "INIT");
        let fields = msg.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].as_str(), Some("bolt-driver/0.1.0"));
        assert!(fields[1].as_map().is_some());
    }

    #[test]
    fn run_carries_statement_and_parameters() {
        let mut params = HashMap::new();
        params.insert("name".to_string(), Value::String("Alice".into()));
        let msg = Request::run("RETURN $name", params);

        assert_eq!(msg.signature(), 0x10);
        let fields = msg.fields();
        assert_eq!(fields[0].as_str(), Some("RETURN $name"));
        assert_eq!(
            fields[1].as_map().and_then(|m| m.get("name")).and_then(Value::as_str),
            Some("Alice")
        );
    }

    #[test]
    fn fieldless_messages() {
        for (msg, signature) in [
            (Request::PullAll, 0x3Fu8),
            (Request::DiscardAll, 0x2F),
            (Request::Reset, 0x0F),
            (Request::AckFailure, 0x0E),
        ] {
            assert_eq!(msg.signature(), signature);
            assert!(msg.fields().is_empty());
        }
    }
}
