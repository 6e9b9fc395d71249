//! UDP-over-TCP packet framing
//!
//! Once a session is classified as packet-oriented, each datagram travels on
//! the byte stream as one frame:
//! address + length (2 bytes, network order) + CRLF + payload.
//!
//! `PacketStream` turns a byte stream into discrete packet read/write
//! semantics for the UDP relay.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::{Address, DecodeResult, MAX_ADDRESS_LEN};
use crate::error::{Error, Result};

/// Space a caller must reserve in front of a payload to prepend the frame
/// header (address + length + CRLF) without copying.
pub const FRONT_HEADROOM: usize = MAX_ADDRESS_LEN + 4;

const READ_CHUNK: usize = 8 * 1024;

/// One decoded UDP frame.
#[derive(Debug)]
pub struct UdpFrame {
    /// Peer address: destination on the inbound direction, source on the
    /// return direction.
    pub addr: Address,
    /// Datagram payload.
    pub payload: Bytes,
}

impl UdpFrame {
    /// Decode a single frame from the front of `buf`.
    pub fn decode(buf: &[u8]) -> DecodeResult<Self> {
        let (addr, addr_len) = match Address::decode(buf) {
            DecodeResult::Ok(addr, len) => (addr, len),
            DecodeResult::NeedMoreData => return DecodeResult::NeedMoreData,
            DecodeResult::Invalid(msg) => return DecodeResult::Invalid(msg),
        };

        let Some(header) = buf.get(addr_len..addr_len + 4) else {
            return DecodeResult::NeedMoreData;
        };
        let payload_len = u16::from_be_bytes([header[0], header[1]]) as usize;
        if header[2] != b'\r' || header[3] != b'\n' {
            return DecodeResult::Invalid("missing crlf in udp frame");
        }

        let total = addr_len + 4 + payload_len;
        let Some(payload) = buf.get(addr_len + 4..total) else {
            return DecodeResult::NeedMoreData;
        };

        DecodeResult::Ok(
            UdpFrame {
                addr,
                payload: Bytes::copy_from_slice(payload),
            },
            total,
        )
    }

    /// Encode one frame into `buf`.
    pub fn encode<B: BufMut>(addr: &Address, payload: &[u8], buf: &mut B) -> Result<()> {
        let len = u16::try_from(payload.len())
            .map_err(|_| Error::Malformed("udp payload exceeds frame limit"))?;
        addr.encode(buf)?;
        buf.put_u16(len);
        buf.put_slice(b"\r\n");
        buf.put_slice(payload);
        Ok(())
    }
}

/// Packet-oriented adapter over a byte stream.
///
/// A UDP session carried over TCP has no end-of-session signal other than
/// inactivity, so the session layer must impose an idle read deadline on top
/// of whatever deadline the transport already carries; see
/// [`PacketStream::needs_read_deadline`].
pub struct PacketStream<S> {
    stream: S,
    recv_buf: BytesMut,
}

impl<S> PacketStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            recv_buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Whether the session layer must apply an additional idle-read deadline.
    /// Always true for UDP-over-TCP.
    pub fn needs_read_deadline(&self) -> bool {
        true
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PacketStream<S> {
    /// Read one full frame, blocking until it is complete.
    ///
    /// Stream errors propagate as transport errors; an EOF in the middle of a
    /// frame is an unexpected EOF, while an EOF on a frame boundary surfaces
    /// as `UnexpectedEof` with an empty receive buffer (end of session).
    pub async fn read_packet(&mut self) -> Result<(Address, Bytes)> {
        loop {
            if !self.recv_buf.is_empty() {
                match UdpFrame::decode(&self.recv_buf) {
                    DecodeResult::Ok(frame, consumed) => {
                        let _ = self.recv_buf.split_to(consumed);
                        return Ok((frame.addr, frame.payload));
                    }
                    DecodeResult::NeedMoreData => {}
                    DecodeResult::Invalid(msg) => return Err(Error::Malformed(msg)),
                }
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed while reading udp frame",
                )));
            }
            self.recv_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Serialize address + length + payload and write them as one frame.
    pub async fn write_packet(&mut self, payload: &[u8], destination: &Address) -> Result<()> {
        let mut frame = BytesMut::with_capacity(FRONT_HEADROOM + payload.len());
        UdpFrame::encode(destination, payload, &mut frame)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
