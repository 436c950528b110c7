//! Chunked message framing.
//!
//! On the wire a Bolt message is a sequence of chunks, each a two-byte
//! big-endian length header followed by that many payload bytes. A
//! zero-length chunk terminates the message. Chunk boundaries carry no
//! meaning: a reader must reassemble the payload regardless of where the
//! writer happened to split it.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use super::error::{BoltError, BoltResult};

/// Default chunk payload size.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Largest payload a single chunk can carry (the header is 16-bit).
pub const MAX_CHUNK_SIZE: usize = 65535;

/// One frame at the chunk layer.
#[derive(Debug, PartialEq)]
pub enum ChunkedFrame {
    /// Payload bytes of one chunk.
    Data(BytesMut),
    /// The zero-length terminator closing a message.
    MessageEnd,
}

/// Splits outgoing payloads into sized chunks and reassembles incoming
/// ones, via the `tokio_util` codec traits.
#[derive(Debug)]
pub struct ChunkCodec {
    max_chunk: usize,
}

impl ChunkCodec {
    /// Codec with the default chunk size.
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Codec with a specific chunk size, clamped to `1..=65535`.
    pub fn with_chunk_size(max_chunk: usize) -> Self {
        Self {
            max_chunk: max_chunk.clamp(1, MAX_CHUNK_SIZE),
        }
    }
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkCodec {
    type Item = ChunkedFrame;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }
        let size = u16::from_be_bytes([src[0], src[1]]) as usize;
        if size == 0 {
            src.advance(2);
            return Ok(Some(ChunkedFrame::MessageEnd));
        }
        if src.len() < 2 + size {
            src.reserve(2 + size - src.len());
            return Ok(None);
        }
        src.advance(2);
        Ok(Some(ChunkedFrame::Data(src.split_to(size))))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(BoltError::Protocol(
                "stream ended inside a chunk".to_string(),
            )),
        }
    }
}

impl Encoder<ChunkedFrame> for ChunkCodec {
    type Error = BoltError;

    fn encode(&mut self, frame: ChunkedFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match frame {
            ChunkedFrame::Data(payload) => {
                let mut offset = 0;
                while offset < payload.len() {
                    let take = (payload.len() - offset).min(self.max_chunk);
                    dst.put_u16(take as u16);
                    dst.put_slice(&payload[offset..offset + take]);
                    offset += take;
                }
                Ok(())
            }
            ChunkedFrame::MessageEnd => {
                dst.put_u16(0);
                Ok(())
            }
        }
    }
}

/// Buffering chunk writer over an async byte sink.
///
/// Payload bytes accumulate until they fill a chunk, at which point the
/// chunk is sealed into the wire buffer. [`write_message_tail`] seals the
/// open chunk and appends the terminator. Nothing reaches the sink until
/// [`flush`].
///
/// [`write_message_tail`]: ChunkedOutput::write_message_tail
/// [`flush`]: ChunkedOutput::flush
pub struct ChunkedOutput<W> {
    sink: W,
    codec: ChunkCodec,
    chunk_size: usize,
    /// Payload of the chunk currently being filled.
    open: BytesMut,
    /// Sealed wire bytes awaiting a flush.
    sealed: BytesMut,
}

impl<W: AsyncWrite + Unpin> ChunkedOutput<W> {
    /// Writer with the default chunk size.
    pub fn new(sink: W) -> Self {
        Self::with_chunk_size(sink, DEFAULT_CHUNK_SIZE)
    }

    /// Writer with a specific chunk size, clamped to `1..=65535`.
    pub fn with_chunk_size(sink: W, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        Self {
            sink,
            codec: ChunkCodec::with_chunk_size(chunk_size),
            chunk_size,
            open: BytesMut::with_capacity(chunk_size.min(DEFAULT_CHUNK_SIZE)),
            sealed: BytesMut::with_capacity(4096),
        }
    }

    /// Append payload bytes, sealing chunks as they fill.
    pub fn write(&mut self, bytes: &[u8]) {
        self.open.extend_from_slice(bytes);
        while self.open.len() >= self.chunk_size {
            let full = self.open.split_to(self.chunk_size);
            // A full chunk never needs re-splitting.
            let _ = self.codec.encode(ChunkedFrame::Data(full), &mut self.sealed);
        }
    }

    /// Close the current message: seal the open chunk and append the
    /// zero-length terminator. The next write starts a fresh chunk.
    pub fn write_message_tail(&mut self) {
        self.seal_open();
        let _ = self.codec.encode(ChunkedFrame::MessageEnd, &mut self.sealed);
    }

    /// Write all pending chunks to the sink and flush it. An open partial
    /// chunk is sealed first, so a later write continues the message in a
    /// new chunk.
    pub async fn flush(&mut self) -> BoltResult<()> {
        self.seal_open();
        if !self.sealed.is_empty() {
            let out = self.sealed.split();
            self.sink.write_all(&out).await?;
        }
        self.sink.flush().await?;
        Ok(())
    }

    /// Number of bytes buffered and not yet flushed.
    pub fn pending(&self) -> usize {
        self.open.len() + self.sealed.len()
    }

    /// Shut down the underlying sink. Buffered bytes are discarded; this
    /// is for abandoning a connection, not finishing one.
    pub async fn shutdown(&mut self) -> BoltResult<()> {
        self.open.clear();
        self.sealed.clear();
        self.sink.shutdown().await?;
        Ok(())
    }

    fn seal_open(&mut self) {
        if !self.open.is_empty() {
            let partial = self.open.split();
            let _ = self.codec.encode(ChunkedFrame::Data(partial), &mut self.sealed);
        }
    }
}

/// Chunk reader over an async byte source.
///
/// Reassembles message payloads across chunk boundaries. The zero-length
/// terminator is consumed exactly once per message, by
/// [`read_message`](ChunkedInput::read_message) or
/// [`read_message_tail`](ChunkedInput::read_message_tail), and bytes past
/// it are never touched.
pub struct ChunkedInput<R> {
    source: R,
    codec: ChunkCodec,
    /// Undecoded wire bytes.
    raw: BytesMut,
    /// Remainder of the current chunk's payload.
    chunk: BytesMut,
}

impl<R: AsyncRead + Unpin> ChunkedInput<R> {
    /// Reader over `source`.
    pub fn new(source: R) -> Self {
        Self {
            source,
            codec: ChunkCodec::new(),
            raw: BytesMut::with_capacity(8192),
            chunk: BytesMut::new(),
        }
    }

    /// Read exactly `dst.len()` payload bytes, spanning chunks as needed.
    /// Meeting the message terminator early is a protocol violation.
    pub async fn read_exact(&mut self, dst: &mut [u8]) -> BoltResult<()> {
        let mut filled = 0;
        while filled < dst.len() {
            if self.chunk.is_empty() {
                match self.next_frame(true).await? {
                    ChunkedFrame::Data(chunk) => self.chunk = chunk,
                    ChunkedFrame::MessageEnd => {
                        return Err(BoltError::Protocol(format!(
                            "message ended with {} of {} bytes unread",
                            dst.len() - filled,
                            dst.len()
                        )));
                    }
                }
            }
            let take = self.chunk.len().min(dst.len() - filled);
            dst[filled..filled + take].copy_from_slice(&self.chunk[..take]);
            self.chunk.advance(take);
            filled += take;
        }
        Ok(())
    }

    /// Consume chunks up to and including the message terminator,
    /// discarding any unread payload.
    pub async fn read_message_tail(&mut self) -> BoltResult<()> {
        self.chunk.clear();
        loop {
            match self.next_frame(true).await? {
                ChunkedFrame::Data(_) => continue,
                ChunkedFrame::MessageEnd => return Ok(()),
            }
        }
    }

    /// Read one complete message payload, consuming its terminator.
    pub async fn read_message(&mut self) -> BoltResult<BytesMut> {
        let mut payload = self.chunk.split();
        let mut started = !payload.is_empty();
        loop {
            match self.next_frame(started).await? {
                ChunkedFrame::Data(chunk) => {
                    payload.extend_from_slice(&chunk);
                    started = true;
                }
                ChunkedFrame::MessageEnd => return Ok(payload),
            }
        }
    }

    /// Decode the next frame, reading from the source as needed.
    ///
    /// `mid_message` distinguishes a clean connection close (an I/O error
    /// the caller may classify) from truncation inside a message (always
    /// a protocol violation).
    async fn next_frame(&mut self, mid_message: bool) -> BoltResult<ChunkedFrame> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.raw)? {
                return Ok(frame);
            }
            let n = self.source.read_buf(&mut self.raw).await?;
            if n == 0 {
                if mid_message || !self.raw.is_empty() {
                    return Err(BoltError::Protocol(
                        "stream ended inside a chunked message".to_string(),
                    ));
                }
                return Err(BoltError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by remote end",
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_splits_large_payload() {
        let mut codec = ChunkCodec::with_chunk_size(4);
        let mut wire = BytesMut::new();
        codec
            .encode(ChunkedFrame::Data(BytesMut::from(&b"abcdefghij"[..])), &mut wire)
            .unwrap();
        codec.encode(ChunkedFrame::MessageEnd, &mut wire).unwrap();

        // 4 + 4 + 2 payload bytes in three chunks, then the terminator.
        assert_eq!(
            &wire[..],
            &[0, 4, b'a', b'b', b'c', b'd', 0, 4, b'e', b'f', b'g', b'h', 0, 2, b'i', b'j', 0, 0]
        );
    }

    #[test]
    fn codec_decode_needs_full_chunk() {
        let mut codec = ChunkCodec::new();
        let mut src = BytesMut::from(&[0u8, 3, b'a'][..]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(b"bc");
        assert_eq!(
            codec.decode(&mut src).unwrap(),
            Some(ChunkedFrame::Data(BytesMut::from(&b"abc"[..])))
        );
    }

    #[test]
    fn codec_decode_eof_mid_chunk_is_protocol_error() {
        let mut codec = ChunkCodec::new();
        let mut src = BytesMut::from(&[0u8, 5, b'a'][..]);
        let err = codec.decode_eof(&mut src).unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
    }

    #[tokio::test]
    async fn roundtrip_across_chunk_sizes() {
        let payload_lens = [0usize, 1, 2, 3, 127, 128, 8191, 8192, 65535, 65536];
        for chunk_size in [1usize, 2, 8, 1024, 8192, 65535] {
            for len in payload_lens {
                let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
                let (client, server) = tokio::io::duplex(8 * 1024 * 1024);

                let mut out = ChunkedOutput::with_chunk_size(client, chunk_size);
                out.write(&payload);
                out.write_message_tail();
                out.flush().await.unwrap();
                drop(out);

                let mut input = ChunkedInput::new(server);
                let message = input.read_message().await.unwrap();
                assert_eq!(&message[..], &payload[..], "chunk={} len={}", chunk_size, len);

                // Terminator was consumed; the stream is cleanly closed.
                let err = input.read_message().await.unwrap_err();
                assert!(matches!(err, BoltError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
            }
        }
    }

    #[tokio::test]
    async fn read_exact_spans_chunks() {
        let (client, server) = tokio::io::duplex(1024);
        let mut out = ChunkedOutput::with_chunk_size(client, 2);
        out.write(b"abcdef");
        out.write_message_tail();
        out.flush().await.unwrap();

        let mut input = ChunkedInput::new(server);
        let mut first = [0u8; 4];
        input.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"abcd");
        let mut second = [0u8; 2];
        input.read_exact(&mut second).await.unwrap();
        assert_eq!(&second, b"ef");
        input.read_message_tail().await.unwrap();
    }

    #[tokio::test]
    async fn tail_consumes_exactly_one_terminator() {
        let (client, server) = tokio::io::duplex(1024);
        let mut out = ChunkedOutput::new(client);
        out.write(b"first");
        out.write_message_tail();
        out.write(b"second");
        out.write_message_tail();
        out.flush().await.unwrap();

        let mut input = ChunkedInput::new(server);
        let mut skip = [0u8; 2];
        input.read_exact(&mut skip).await.unwrap();
        // Discards the rest of "first" but nothing of "second".
        input.read_message_tail().await.unwrap();
        let second = input.read_message().await.unwrap();
        assert_eq!(&second[..], b"second");
    }

    #[tokio::test]
    async fn short_chunk_is_protocol_error() {
        let (mut client, server) = tokio::io::duplex(64);
        // Header promises 10 bytes, only 3 arrive before the close.
        tokio::io::AsyncWriteExt::write_all(&mut client, &[0, 10, 1, 2, 3])
            .await
            .unwrap();
        drop(client);

        let mut input = ChunkedInput::new(server);
        let err = input.read_message().await.unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
    }

    #[tokio::test]
    async fn eof_before_terminator_is_protocol_error() {
        let (mut client, server) = tokio::io::duplex(64);
        // A complete chunk but no terminator.
        tokio::io::AsyncWriteExt::write_all(&mut client, &[0, 2, 9, 9])
            .await
            .unwrap();
        drop(client);

        let mut input = ChunkedInput::new(server);
        let err = input.read_message().await.unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
    }

    #[tokio::test]
    async fn flush_mid_message_continues_in_new_chunk() {
        let (client, server) = tokio::io::duplex(1024);
        let mut out = ChunkedOutput::new(client);
        out.write(b"abc");
        out.flush().await.unwrap();
        out.write(b"def");
        out.write_message_tail();
        out.flush().await.unwrap();

        let mut input = ChunkedInput::new(server);
        let message = input.read_message().await.unwrap();
        assert_eq!(&message[..], b"abcdef");
    }

    #[tokio::test]
    async fn empty_message_roundtrips() {
        let (client, server) = tokio::io::duplex(64);
        let mut out = ChunkedOutput::new(client);
        out.write_message_tail();
        out.flush().await.unwrap();

        let mut input = ChunkedInput::new(server);
        let message = input.read_message().await.unwrap();
        assert!(message.is_empty());
    }
}
