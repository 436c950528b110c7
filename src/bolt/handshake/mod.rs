//! Bolt handshake.
//!
//! The client opens every connection with a four-byte preamble followed
//! by four 32-bit big-endian version proposals in preference order
//! (unused slots are zero). The server answers with a single 32-bit
//! version, where zero means no proposal was acceptable.

pub mod version;

pub use version::{ProtocolVersion, ServerVersion};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{BoltError, BoltResult};

/// The handshake preamble.
pub const PREAMBLE: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Size of the client's opening: preamble plus four proposals.
pub const HANDSHAKE_SIZE: usize = 20;

/// Size of the server's reply.
pub const HANDSHAKE_RESPONSE_SIZE: usize = 4;

/// Build the client's opening bytes.
pub fn client_handshake() -> [u8; HANDSHAKE_SIZE] {
    let mut buf = [0u8; HANDSHAKE_SIZE];
    buf[0..4].copy_from_slice(&PREAMBLE);
    for (i, version) in ProtocolVersion::PROPOSED.iter().enumerate() {
        let offset = 4 + i * 4;
        buf[offset..offset + 4].copy_from_slice(&version.to_be_bytes());
    }
    buf
}

/// Outcome of a completed handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The server agreed on a version.
    Agreed(ProtocolVersion),
    /// The server answered zero: none of the proposals were acceptable.
    NoCommonVersion,
}

/// Interpret the server's four-byte reply.
pub fn parse_response(reply: [u8; HANDSHAKE_RESPONSE_SIZE]) -> BoltResult<HandshakeOutcome> {
    let raw = u32::from_be_bytes(reply);
    if raw == 0 {
        return Ok(HandshakeOutcome::NoCommonVersion);
    }
    match ProtocolVersion::from_raw(raw) {
        Some(version) => Ok(HandshakeOutcome::Agreed(version)),
        None => Err(BoltError::Protocol(format!(
            "server selected unknown protocol version {}",
            raw
        ))),
    }
}

/// Run the full handshake over a stream: send the preamble and proposals,
/// read and interpret the reply.
pub async fn perform<S>(stream: &mut S) -> BoltResult<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&client_handshake()).await?;
    stream.flush().await?;

    let mut reply = [0u8; HANDSHAKE_RESPONSE_SIZE];
    stream.read_exact(&mut reply).await?;
    parse_response(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_bytes() {
        let buf = client_handshake();
        assert_eq!(&buf[0..4], &PREAMBLE);
        assert_eq!(&buf[4..8], &[0, 0, 0, 1]); // version 1 first
        assert_eq!(&buf[8..20], &[0u8; 12]); // empty slots
    }

    #[test]
    fn parses_agreement() {
        assert_eq!(
            parse_response([0, 0, 0, 1]).unwrap(),
            HandshakeOutcome::Agreed(ProtocolVersion::V1)
        );
    }

    #[test]
    fn parses_rejection() {
        assert_eq!(
            parse_response([0, 0, 0, 0]).unwrap(),
            HandshakeOutcome::NoCommonVersion
        );
    }

    #[test]
    fn unknown_version_is_protocol_error() {
        let err = parse_response([0, 0, 0, 9]).unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
    }

    #[tokio::test]
    async fn perform_exchanges_bytes() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let handshake = tokio::spawn(async move {
            perform(&mut client).await
        });

        let mut opening = [0u8; HANDSHAKE_SIZE];
        server.read_exact(&mut opening).await.unwrap();
        assert_eq!(&opening[0..4], &PREAMBLE);
        server.write_all(&[0, 0, 0, 1]).await.unwrap();

        let outcome = handshake.await.unwrap().unwrap();
        assert_eq!(outcome, HandshakeOutcome::Agreed(ProtocolVersion::V1));
    }
}
