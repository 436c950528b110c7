//! Message format, protocol version 1.
//!
//! Bridges domain messages and the chunked byte stream: a message is one
//! PackStream structure (field count + signature + packed fields)
//! followed by the message terminator.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite};

use super::chunk::{ChunkedInput, ChunkedOutput};
use super::error::{BoltError, BoltResult};
use super::message::{sig, FailureDetail, Request, Response};
use super::packstream::{Packer, Unpacker, Value};

/// Receives one server response, dispatched by signature.
///
/// Handlers are paired with requests in FIFO order; the connection pops
/// one handler per incoming message.
pub trait ResponseHandler: Send {
    /// SUCCESS with its metadata.
    fn on_success(&mut self, metadata: HashMap<String, Value>);
    /// One RECORD row.
    fn on_record(&mut self, fields: Vec<Value>);
    /// FAILURE with its code and message.
    fn on_failure(&mut self, detail: FailureDetail);
    /// IGNORED.
    fn on_ignored(&mut self);
}

/// Handler that stores everything it receives. Used by the routing
/// procedure call and by tests.
#[derive(Debug, Default)]
pub struct Collector {
    /// Responses in arrival order.
    pub responses: Vec<Response>,
}

impl Collector {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponseHandler for Collector {
    fn on_success(&mut self, metadata: HashMap<String, Value>) {
        self.responses.push(Response::Success(metadata));
    }

    fn on_record(&mut self, fields: Vec<Value>) {
        self.responses.push(Response::Record(fields));
    }

    fn on_failure(&mut self, detail: FailureDetail) {
        self.responses.push(Response::Failure(detail));
    }

    fn on_ignored(&mut self) {
        self.responses.push(Response::Ignored);
    }
}

/// Protocol version 1 message reader/writer.
///
/// Carries the byte-support flag: against servers whose PackStream
/// dialect predates byte arrays, Bytes values are rejected in both
/// directions.
#[derive(Debug, Clone)]
pub struct MessageFormat {
    byte_support: bool,
}

impl MessageFormat {
    /// Format with byte arrays enabled.
    pub fn v1() -> Self {
        Self { byte_support: true }
    }

    /// Format with explicit byte-array support.
    pub fn with_byte_support(byte_support: bool) -> Self {
        Self { byte_support }
    }

    /// Whether byte arrays are currently accepted.
    pub fn byte_support(&self) -> bool {
        self.byte_support
    }

    /// Enable or disable byte arrays, typically after INIT reveals the
    /// server version.
    pub fn set_byte_support(&mut self, byte_support: bool) {
        self.byte_support = byte_support;
    }

    /// Write one message: struct header, packed fields, message tail.
    /// Bytes stay in the output buffer until it is flushed.
    pub fn write_message<W>(&self, out: &mut ChunkedOutput<W>, msg: &Request) -> BoltResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let fields = msg.fields();
        let mut packer = Packer::with_byte_support(self.byte_support);
        packer.pack_struct_header(fields.len(), msg.signature())?;
        for field in &fields {
            packer.pack(field)?;
        }
        out.write(packer.as_bytes());
        out.write_message_tail();
        Ok(())
    }

    /// Read one message and dispatch it to the handler.
    pub async fn read_message<R>(
        &self,
        input: &mut ChunkedInput<R>,
        handler: &mut dyn ResponseHandler,
    ) -> BoltResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let payload = input.read_message().await?;
        let mut unpacker = Unpacker::with_byte_support(&payload, self.byte_support);
        let (size, signature) = unpacker.unpack_struct_header()?;

        match signature {
            sig::SUCCESS => {
                Self::expect_arity(signature, size, 1)?;
                let metadata = unpacker.unpack_map()?;
                Self::expect_consumed(&unpacker)?;
                handler.on_success(metadata);
            }
            sig::RECORD => {
                Self::expect_arity(signature, size, 1)?;
                let fields = unpacker.unpack_list()?;
                Self::expect_consumed(&unpacker)?;
                handler.on_record(fields);
            }
            sig::FAILURE => {
                Self::expect_arity(signature, size, 1)?;
                let metadata = unpacker.unpack_map()?;
                Self::expect_consumed(&unpacker)?;
                handler.on_failure(FailureDetail::from_metadata(&metadata));
            }
            sig::IGNORED => {
                Self::expect_arity(signature, size, 0)?;
                Self::expect_consumed(&unpacker)?;
                handler.on_ignored();
            }
            other => {
                return Err(BoltError::Protocol(format!(
                    "unexpected message signature 0x{:02X}",
                    other
                )));
            }
        }
        Ok(())
    }

    fn expect_arity(signature: u8, actual: usize, expected: usize) -> BoltResult<()> {
        if actual == expected {
            Ok(())
        } else {
            Err(BoltError::Protocol(format!(
                "message 0x{:02X} requires {} fields, got {}",
                signature, expected, actual
            )))
        }
    }

    fn expect_consumed(unpacker: &Unpacker<'_>) -> BoltResult<()> {
        if unpacker.is_done() {
            Ok(())
        } else {
            Err(BoltError::Protocol(format!(
                "{} trailing bytes after message",
                unpacker.remaining()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use tokio::io::AsyncWriteExt;

    async fn write_raw(payload: &[u8]) -> ChunkedInput<tokio::io::DuplexStream> {
        let (mut tx, rx) = tokio::io::duplex(1 << 16);
        let mut framed = BytesMut::new();
        framed.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        framed.extend_from_slice(payload);
        framed.extend_from_slice(&[0, 0]);
        tx.write_all(&framed).await.unwrap();
        ChunkedInput::new(rx)
    }

    async fn roundtrip(msg: &Request) -> Response {
        let format = MessageFormat::v1();
        let (tx, rx) = tokio::io::duplex(1 << 20);
        let mut out = ChunkedOutput::new(tx);
        format.write_message(&mut out, msg).unwrap();
        out.flush().await.unwrap();

        // Decode what was written and echo it back as raw structure bytes.
        let mut input = ChunkedInput::new(rx);
        let payload = input.read_message().await.unwrap();
        let mut unpacker = Unpacker::new(&payload);
        let (size, signature) = unpacker.unpack_struct_header().unwrap();
        let mut fields = Vec::new();
        for _ in 0..size {
            fields.push(unpacker.unpack().unwrap());
        }
        match signature {
            sig::RUN => Response::Record(fields), // reuse as a bag of values
            _ => Response::Success(HashMap::new()),
        }
    }

    #[test]
    fn writes_struct_header_then_fields() {
        let format = MessageFormat::v1();
        let (tx, _rx) = tokio::io::duplex(1024);
        let mut out = ChunkedOutput::new(tx);
        format.write_message(&mut out, &Request::PullAll).unwrap();
        // Header (0xB0, 0x3F) + tail, all still buffered.
        assert_eq!(out.pending(), 2 + 2 + 2);
    }

    #[tokio::test]
    async fn run_fields_survive_write() {
        let mut params = HashMap::new();
        params.insert("n".to_string(), Value::Integer(1));
        let values = match roundtrip(&Request::run("RETURN $n", params)).await {
            Response::Record(values) => values,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(values[0].as_str(), Some("RETURN $n"));
        assert_eq!(
            values[1].as_map().and_then(|m| m.get("n")).and_then(Value::as_int),
            Some(1)
        );
    }

    #[tokio::test]
    async fn dispatches_success() {
        // SUCCESS({"fields": ["x"]})
        let payload = [
            0xB1, 0x70, 0xA1, 0x86, b'f', b'i', b'e', b'l', b'd', b's', 0x91, 0x81, b'x',
        ];
        let mut input = write_raw(&payload).await;
        let mut collector = Collector::new();
        MessageFormat::v1()
            .read_message(&mut input, &mut collector)
            .await
            .unwrap();
        match &collector.responses[0] {
            Response::Success(meta) => assert!(meta.contains_key("fields")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn dispatches_record_failure_ignored() {
        let format = MessageFormat::v1();

        // RECORD([42])
        let mut input = write_raw(&[0xB1, 0x71, 0x91, 0x2A]).await;
        let mut collector = Collector::new();
        format.read_message(&mut input, &mut collector).await.unwrap();
        assert_eq!(collector.responses[0], Response::Record(vec![Value::Integer(42)]));

        // FAILURE({"code": "x", "message": "y"})
        let mut payload = vec![0xB1, 0x7F, 0xA2];
        payload.extend_from_slice(&[0x84, b'c', b'o', b'd', b'e', 0x81, b'x']);
        payload.extend_from_slice(&[0x87, b'm', b'e', b's', b's', b'a', b'g', b'e', 0x81, b'y']);
        let mut input = write_raw(&payload).await;
        let mut collector = Collector::new();
        format.read_message(&mut input, &mut collector).await.unwrap();
        assert_eq!(
            collector.responses[0],
            Response::Failure(FailureDetail::new("x", "y"))
        );

        // IGNORED
        let mut input = write_raw(&[0xB0, 0x7E]).await;
        let mut collector = Collector::new();
        format.read_message(&mut input, &mut collector).await.unwrap();
        assert_eq!(collector.responses[0], Response::Ignored);
    }

    #[tokio::test]
    async fn rejects_unknown_signature() {
        let mut input = write_raw(&[0xB0, 0x60]).await;
        let mut collector = Collector::new();
        let err = MessageFormat::v1()
            .read_message(&mut input, &mut collector)
            .await
            .unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
    }

    #[tokio::test]
    async fn rejects_wrong_arity() {
        // SUCCESS with no fields
        let mut input = write_raw(&[0xB0, 0x70]).await;
        let mut collector = Collector::new();
        let err = MessageFormat::v1()
            .read_message(&mut input, &mut collector)
            .await
            .unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
    }

    #[tokio::test]
    async fn byte_support_gates_both_directions() {
        let format = MessageFormat::with_byte_support(false);

        // Writer side: RUN with a Bytes parameter is rejected.
        let mut params = HashMap::new();
        params.insert("blob".to_string(), Value::Bytes(vec![1, 2]));
        let (tx, _rx) = tokio::io::duplex(1024);
        let mut out = ChunkedOutput::new(tx);
        let err = format
            .write_message(&mut out, &Request::run("x", params))
            .unwrap_err();
        assert!(matches!(err, BoltError::PackStream(_)));

        // Reader side: a RECORD containing a Bytes marker is rejected.
        let mut input = write_raw(&[0xB1, 0x71, 0x91, 0xCC, 0x01, 0xAB]).await;
        let mut collector = Collector::new();
        let err = format.read_message(&mut input, &mut collector).await.unwrap_err();
        assert!(matches!(err, BoltError::PackStream(_)));
    }
}
