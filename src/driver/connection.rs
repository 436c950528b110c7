//! One socket, one session.
//!
//! A [`Connection`] owns a TCP stream and its two chunked framings.
//! Requests are queued with a paired response handler and pushed to the
//! server on flush; responses are dispatched back to the handlers in
//! strict FIFO order. A FAILURE puts the connection into a failed state:
//! the server answers everything after it with IGNORED until the client
//! acknowledges with ACK_FAILURE.

use std::collections::{HashMap, VecDeque};

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::bolt::handshake::{self, HandshakeOutcome, ProtocolVersion, ServerVersion};
use crate::bolt::message::response::SuccessMetadata;
use crate::bolt::{
    BoltError, ChunkedInput, ChunkedOutput, Collector, MessageFormat, Request, Response,
    ResponseHandler, Value,
};

use super::address::BoltAddress;
use super::config::{ConnectionSettings, EncryptionLevel};
use super::error::{DriverError, DriverResult, ServerError};

/// An initialized Bolt connection.
///
/// Generic over the stream type so tests can drive it over in-memory
/// pipes; production code uses [`Connection::connect`] and a
/// [`TcpStream`].
pub struct Connection<S = TcpStream>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    address: BoltAddress,
    input: ChunkedInput<ReadHalf<S>>,
    output: ChunkedOutput<WriteHalf<S>>,
    format: MessageFormat,
    protocol_version: ProtocolVersion,
    server_version: Option<ServerVersion>,
    queue: VecDeque<Box<dyn ResponseHandler>>,
    failure: Option<ServerError>,
    initialized: bool,
    open: bool,
}

impl Connection<TcpStream> {
    /// Connect, handshake and initialize against a server address.
    pub async fn connect(
        address: &BoltAddress,
        settings: &ConnectionSettings,
    ) -> DriverResult<Self> {
        let connect = TcpStream::connect(address.to_socket_addr());
        let stream = timeout(settings.connect_timeout, connect)
            .await
            .map_err(|_| {
                DriverError::service_unavailable(format!(
                    "Timed out connecting to server at {}",
                    address
                ))
            })?
            .map_err(|e| {
                DriverError::service_unavailable(format!(
                    "Failed to connect to server at {}: {}",
                    address, e
                ))
            })?;
        stream.set_nodelay(true).ok();
        Self::establish(stream, address.clone(), settings).await
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Handshake and initialize over an already-connected stream.
    pub async fn establish(
        mut stream: S,
        address: BoltAddress,
        settings: &ConnectionSettings,
    ) -> DriverResult<Self> {
        let outcome = handshake::perform(&mut stream).await.map_err(|e| match e {
            BoltError::Io(io) => DriverError::service_unavailable(format!(
                "Connection to {} was lost during handshake: {}",
                address, io
            )),
            other => DriverError::from(other),
        })?;

        let protocol_version = match outcome {
            HandshakeOutcome::Agreed(version) => version,
            HandshakeOutcome::NoCommonVersion => {
                let msg = format!(
                    "Server at {} does not support any protocol version proposed by this driver",
                    address
                );
                return Err(match settings.encryption {
                    EncryptionLevel::Required => DriverError::security(msg),
                    _ => DriverError::client(msg),
                });
            }
        };

        let (read, write) = tokio::io::split(stream);
        let mut connection = Self {
            address,
            input: ChunkedInput::new(read),
            output: ChunkedOutput::new(write),
            format: MessageFormat::v1(),
            protocol_version,
            server_version: None,
            queue: VecDeque::new(),
            failure: None,
            initialized: false,
            open: true,
        };
        connection.init(settings).await?;
        Ok(connection)
    }

    /// Send INIT and await its single response.
    async fn init(&mut self, settings: &ConnectionSettings) -> DriverResult<()> {
        let init = Request::init(settings.user_agent.clone(), settings.auth_token.to_map());
        self.format
            .write_message(&mut self.output, &init)
            .map_err(DriverError::from)?;
        self.flush().await?;

        match self.receive_response().await? {
            Response::Success(metadata) => {
                if let Some(version) = metadata.server_agent().and_then(ServerVersion::from_agent) {
                    self.format.set_byte_support(version.supports_bytes());
                    self.server_version = Some(version);
                }
                self.initialized = true;
                debug!(address = %self.address, server = ?self.server_version, "connection initialized");
                Ok(())
            }
            Response::Failure(detail) => {
                self.open = false;
                let error = ServerError::from(detail);
                if error.is_authentication_error() {
                    Err(DriverError::Authentication(error.message))
                } else {
                    Err(DriverError::Client(error.to_string()))
                }
            }
            other => {
                self.open = false;
                Err(DriverError::protocol(format!(
                    "Unexpected {} in response to INIT",
                    other.name()
                )))
            }
        }
    }

    /// Queue a RUN with its response handler.
    pub fn run(
        &mut self,
        statement: impl Into<String>,
        parameters: HashMap<String, Value>,
        handler: Box<dyn ResponseHandler>,
    ) -> DriverResult<()> {
        self.enqueue(Request::run(statement, parameters), handler)
    }

    /// Queue a PULL_ALL with its response handler.
    pub fn pull_all(&mut self, handler: Box<dyn ResponseHandler>) -> DriverResult<()> {
        self.enqueue(Request::PullAll, handler)
    }

    /// Queue a DISCARD_ALL with its response handler.
    pub fn discard_all(&mut self, handler: Box<dyn ResponseHandler>) -> DriverResult<()> {
        self.enqueue(Request::DiscardAll, handler)
    }

    fn enqueue(&mut self, message: Request, handler: Box<dyn ResponseHandler>) -> DriverResult<()> {
        self.ensure_usable()?;
        self.format
            .write_message(&mut self.output, &message)
            .map_err(DriverError::from)?;
        self.queue.push_back(handler);
        Ok(())
    }

    /// Write buffered requests to the socket.
    pub async fn flush(&mut self) -> DriverResult<()> {
        let result = self.output.flush().await;
        self.check_stream(result)
    }

    /// Flush, then receive responses until every queued handler has been
    /// served. A failure reported by the server is acknowledged with
    /// ACK_FAILURE and returned; the connection stays usable.
    pub async fn sync(&mut self) -> DriverResult<()> {
        self.flush().await?;
        while !self.queue.is_empty() {
            self.receive_one().await?;
        }
        if let Some(failure) = self.failure.take() {
            self.ack_failure().await?;
            return Err(DriverError::Server(failure));
        }
        Ok(())
    }

    /// Receive exactly one response and dispatch it to the handler at the
    /// front of the queue.
    pub async fn receive_one(&mut self) -> DriverResult<()> {
        let mut handler = self.queue.pop_front().ok_or_else(|| {
            DriverError::protocol("Response received with no request outstanding")
        })?;
        let response = self.receive_response().await?;
        match response {
            Response::Success(metadata) => handler.on_success(metadata),
            Response::Record(fields) => handler.on_record(fields),
            Response::Ignored => handler.on_ignored(),
            Response::Failure(detail) => {
                self.failure = Some(ServerError::from(detail.clone()));
                handler.on_failure(detail);
            }
        }
        Ok(())
    }

    /// Pipeline a RESET: outstanding requests drain (as IGNORED when a
    /// failure preceded them), the failed state is cleared.
    pub async fn reset(&mut self) -> DriverResult<()> {
        self.ensure_open()?;
        self.format
            .write_message(&mut self.output, &Request::Reset)
            .map_err(DriverError::from)?;
        self.flush().await?;

        while !self.queue.is_empty() {
            self.receive_one().await?;
        }
        match self.receive_response().await? {
            Response::Success(_) => {
                self.failure = None;
                Ok(())
            }
            other => {
                self.open = false;
                Err(DriverError::protocol(format!(
                    "Unexpected {} in response to RESET",
                    other.name()
                )))
            }
        }
    }

    /// Close the connection. Protocol version 1 has no goodbye message;
    /// the socket is simply shut down.
    pub async fn close(&mut self) {
        self.open = false;
        let _ = self.output.shutdown().await;
    }

    async fn ack_failure(&mut self) -> DriverResult<()> {
        self.format
            .write_message(&mut self.output, &Request::AckFailure)
            .map_err(DriverError::from)?;
        self.flush().await?;
        match self.receive_response().await? {
            Response::Success(_) => Ok(()),
            other => {
                self.open = false;
                Err(DriverError::protocol(format!(
                    "Unexpected {} in response to ACK_FAILURE",
                    other.name()
                )))
            }
        }
    }

    async fn receive_response(&mut self) -> DriverResult<Response> {
        let mut probe = Collector::new();
        let result = self.format.read_message(&mut self.input, &mut probe).await;
        self.check_stream(result)?;
        probe
            .responses
            .pop()
            .ok_or_else(|| DriverError::protocol("Message produced no response"))
    }

    /// Convert a wire-layer result; stream faults invalidate the connection.
    fn check_stream<T>(&mut self, result: Result<T, BoltError>) -> DriverResult<T> {
        result.map_err(|e| {
            self.open = false;
            DriverError::from(e)
        })
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(DriverError::service_unavailable(format!(
                "Connection to {} is closed",
                self.address
            )))
        }
    }

    fn ensure_usable(&self) -> DriverResult<()> {
        self.ensure_open()?;
        if self.failure.is_some() {
            return Err(DriverError::client(
                "Connection carries an unacknowledged failure; sync or reset it first",
            ));
        }
        Ok(())
    }

    /// The remote address.
    pub fn address(&self) -> &BoltAddress {
        &self.address
    }

    /// The negotiated protocol version.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// The server version, when the server reported an agent string.
    pub fn server_version(&self) -> Option<ServerVersion> {
        self.server_version
    }

    /// Liveness flag.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Whether INIT has completed on this connection.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Fit to return to a pool: live, initialized, no unacknowledged failure.
    pub fn is_healthy(&self) -> bool {
        self.open && self.initialized && self.failure.is_none()
    }

    /// True while an exchange is incomplete: queued handlers waiting for
    /// responses, or request bytes not yet flushed. A connection abandoned
    /// in this state must be closed, not reused.
    pub fn has_outstanding(&self) -> bool {
        !self.queue.is_empty() || self.output.pending() > 0
    }

    /// The failure currently carried, if any.
    pub fn failure(&self) -> Option<&ServerError> {
        self.failure.as_ref()
    }
}

impl<S> std::fmt::Debug for Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("protocol_version", &self.protocol_version)
            .field("server_version", &self.server_version)
            .field("open", &self.open)
            .field("initialized", &self.initialized)
            .field("outstanding", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::message::sig;
    use crate::bolt::packstream::Packer;
    use crate::bolt::FailureDetail;
    use crate::driver::config::AuthToken;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Scripted in-memory peer standing in for a server.
    struct Peer {
        input: ChunkedInput<ReadHalf<DuplexStream>>,
        output: ChunkedOutput<WriteHalf<DuplexStream>>,
    }

    impl Peer {
        async fn accept(mut stream: DuplexStream) -> Self {
            let mut opening = [0u8; handshake::HANDSHAKE_SIZE];
            stream.read_exact(&mut opening).await.unwrap();
            assert_eq!(&opening[0..4], &handshake::PREAMBLE);
            stream.write_all(&[0, 0, 0, 1]).await.unwrap();
            let (read, write) = tokio::io::split(stream);
            Self {
                input: ChunkedInput::new(read),
                output: ChunkedOutput::new(write),
            }
        }

        /// Read one request, returning its signature.
        async fn read_request(&mut self) -> u8 {
            let payload = self.input.read_message().await.unwrap();
            let mut unpacker = crate::bolt::packstream::Unpacker::new(&payload);
            let (size, signature) = unpacker.unpack_struct_header().unwrap();
            for _ in 0..size {
                unpacker.unpack().unwrap();
            }
            signature
        }

        async fn send(&mut self, signature: u8, fields: Vec<Value>) {
            let mut packer = Packer::new();
            packer.pack_struct_header(fields.len(), signature).unwrap();
            for field in &fields {
                packer.pack(field).unwrap();
            }
            self.output.write(packer.as_bytes());
            self.output.write_message_tail();
            self.output.flush().await.unwrap();
        }

        async fn send_success(&mut self, entries: Vec<(&str, Value)>) {
            let map: HashMap<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
            self.send(sig::SUCCESS, vec![Value::Map(map)]).await;
        }

        async fn send_record(&mut self, fields: Vec<Value>) {
            self.send(sig::RECORD, vec![Value::List(fields)]).await;
        }

        async fn send_failure(&mut self, code: &str, message: &str) {
            let mut map = HashMap::new();
            map.insert("code".to_string(), Value::String(code.into()));
            map.insert("message".to_string(), Value::String(message.into()));
            self.send(sig::FAILURE, vec![Value::Map(map)]).await;
        }

        async fn send_ignored(&mut self) {
            self.send(sig::IGNORED, vec![]).await;
        }
    }

    /// Handler that records into shared storage.
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<Response>>>);

    impl Shared {
        fn take(&self) -> Vec<Response> {
            std::mem::take(&mut self.0.lock())
        }
    }

    impl ResponseHandler for Shared {
        fn on_success(&mut self, metadata: HashMap<String, Value>) {
            self.0.lock().push(Response::Success(metadata));
        }
        fn on_record(&mut self, fields: Vec<Value>) {
            self.0.lock().push(Response::Record(fields));
        }
        fn on_failure(&mut self, detail: FailureDetail) {
            self.0.lock().push(Response::Failure(detail));
        }
        fn on_ignored(&mut self) {
            self.0.lock().push(Response::Ignored);
        }
    }

    async fn establish(agent: &str) -> (Connection<DuplexStream>, Peer) {
        let (client, server) = tokio::io::duplex(1 << 20);
        let agent = agent.to_string();
        let peer = tokio::spawn(async move {
            let mut peer = Peer::accept(server).await;
            assert_eq!(peer.read_request().await, sig::INIT);
            peer.send_success(vec![("server", Value::String(agent))]).await;
            peer
        });
        let connection =
            Connection::establish(client, BoltAddress::new("core1", 7687), &ConnectionSettings::default())
                .await
                .unwrap();
        (connection, peer.await.unwrap())
    }

    #[tokio::test]
    async fn establish_initializes_and_reads_server_version() {
        let (connection, _peer) = establish("Neo4j/3.4.0").await;
        assert!(connection.is_initialized());
        assert!(connection.is_healthy());
        assert_eq!(connection.protocol_version(), ProtocolVersion::V1);
        assert_eq!(connection.server_version(), Some(ServerVersion::new(3, 4, 0)));
    }

    #[tokio::test]
    async fn old_server_disables_byte_support() {
        let (connection, _peer) = establish("Neo4j/3.1.4").await;
        assert_eq!(connection.server_version(), Some(ServerVersion::new(3, 1, 4)));
        assert!(!connection.format.byte_support());
    }

    #[tokio::test]
    async fn init_auth_failure_classified() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let peer = tokio::spawn(async move {
            let mut peer = Peer::accept(server).await;
            peer.read_request().await;
            peer.send_failure("Neo.ClientError.Security.Unauthorized", "bad credentials")
                .await;
        });
        let settings = ConnectionSettings {
            auth_token: AuthToken::basic("u", "wrong"),
            ..Default::default()
        };
        let err = Connection::establish(client, BoltAddress::default(), &settings)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Authentication(_)));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn version_zero_reply_classified_by_encryption() {
        for (encryption, want_security) in [
            (EncryptionLevel::Required, true),
            (EncryptionLevel::Disabled, false),
        ] {
            let (client, mut server) = tokio::io::duplex(1 << 16);
            tokio::spawn(async move {
                let mut opening = [0u8; handshake::HANDSHAKE_SIZE];
                server.read_exact(&mut opening).await.unwrap();
                server.write_all(&[0, 0, 0, 0]).await.unwrap();
            });
            let settings = ConnectionSettings {
                encryption,
                ..Default::default()
            };
            let err = Connection::establish(client, BoltAddress::default(), &settings)
                .await
                .unwrap_err();
            match (want_security, err) {
                (true, DriverError::Security(_)) | (false, DriverError::Client(_)) => {}
                (_, other) => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn run_pull_sync_delivers_in_fifo_order() {
        let (mut connection, mut peer) = establish("Neo4j/3.4.0").await;
        let run_handler = Shared::default();
        let pull_handler = Shared::default();

        connection
            .run("RETURN 1", HashMap::new(), Box::new(run_handler.clone()))
            .unwrap();
        connection.pull_all(Box::new(pull_handler.clone())).unwrap();

        let server = tokio::spawn(async move {
            assert_eq!(peer.read_request().await, sig::RUN);
            assert_eq!(peer.read_request().await, sig::PULL_ALL);
            peer.send_success(vec![(
                "fields",
                Value::List(vec![Value::String("1".into())]),
            )])
            .await;
            peer.send_record(vec![Value::Integer(1)]).await;
            peer.send_success(vec![]).await;
        });

        connection.sync().await.unwrap();
        server.await.unwrap();

        let run_responses = run_handler.take();
        assert_eq!(run_responses.len(), 1);
        assert!(run_responses[0].is_success());

        let pull_responses = pull_handler.take();
        assert_eq!(pull_responses.len(), 2);
        assert_eq!(pull_responses[0], Response::Record(vec![Value::Integer(1)]));
        assert!(pull_responses[1].is_success());
    }

    #[tokio::test]
    async fn failure_converts_trailing_requests_to_ignored() {
        let (mut connection, mut peer) = establish("Neo4j/3.4.0").await;
        let run_handler = Shared::default();
        let pull_handler = Shared::default();

        connection
            .run("INVALID", HashMap::new(), Box::new(run_handler.clone()))
            .unwrap();
        connection.pull_all(Box::new(pull_handler.clone())).unwrap();

        let server = tokio::spawn(async move {
            peer.read_request().await; // RUN
            peer.read_request().await; // PULL_ALL
            peer.send_failure("Neo.ClientError.Statement.SyntaxError", "bad query")
                .await;
            peer.send_ignored().await;
            // ACK_FAILURE follows the drain.
            assert_eq!(peer.read_request().await, sig::ACK_FAILURE);
            peer.send_success(vec![]).await;
        });

        let err = connection.sync().await.unwrap_err();
        match err {
            DriverError::Server(e) => {
                assert_eq!(e.code, "Neo.ClientError.Statement.SyntaxError")
            }
            other => panic!("unexpected {:?}", other),
        }
        server.await.unwrap();

        assert!(matches!(run_handler.take()[0], Response::Failure(_)));
        assert_eq!(pull_handler.take(), vec![Response::Ignored]);
        // The failure was acknowledged; the connection is reusable.
        assert!(connection.is_healthy());
    }

    #[tokio::test]
    async fn reset_drains_and_clears_failure() {
        let (mut connection, mut peer) = establish("Neo4j/3.4.0").await;
        let run_handler = Shared::default();

        connection
            .run("INVALID", HashMap::new(), Box::new(run_handler.clone()))
            .unwrap();

        let server = tokio::spawn(async move {
            peer.read_request().await; // RUN
            assert_eq!(peer.read_request().await, sig::RESET);
            peer.send_failure("Neo.ClientError.Statement.SyntaxError", "bad")
                .await;
            peer.send_success(vec![]).await; // RESET response
        });

        connection.reset().await.unwrap();
        server.await.unwrap();
        assert!(connection.is_healthy());
        assert!(connection.failure().is_none());
    }

    #[tokio::test]
    async fn peer_close_mid_exchange_invalidates_connection() {
        let (mut connection, peer) = establish("Neo4j/3.4.0").await;
        let handler = Shared::default();
        connection
            .run("RETURN 1", HashMap::new(), Box::new(handler))
            .unwrap();
        drop(peer);

        let err = connection.sync().await.unwrap_err();
        assert!(matches!(err, DriverError::Io(_) | DriverError::Protocol(_)));
        assert!(!connection.is_open());
        assert!(!connection.is_healthy());
    }

    #[tokio::test]
    async fn unusable_while_failure_unacknowledged() {
        let (mut connection, mut peer) = establish("Neo4j/3.4.0").await;
        let handler = Shared::default();
        connection
            .run("INVALID", HashMap::new(), Box::new(handler))
            .unwrap();

        tokio::spawn(async move {
            peer.read_request().await;
            peer.send_failure("Neo.ClientError.Statement.SyntaxError", "bad")
                .await;
        });
        connection.flush().await.unwrap();
        connection.receive_one().await.unwrap();

        let err = connection
            .run("RETURN 1", HashMap::new(), Box::new(Shared::default()))
            .unwrap_err();
        assert!(matches!(err, DriverError::Client(_)));
    }
}
