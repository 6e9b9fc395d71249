//! Trojan wire protocol primitives
//!
//! Request header layout, consumed once from the start of the stream:
//! - 56-byte credential key (SHA224 of the password, hex encoded)
//! - 2 reserved bytes (CRLF)
//! - command (1 byte: TCP=0x01, UDP=0x03, MUX=0x7f)
//! - destination address (type byte + address + 2-byte port, network order)
//! - 2 reserved bytes (CRLF)

use bytes::BufMut;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Length of the wire-visible credential key.
pub const KEY_LENGTH: usize = 56;

/// The wire-visible authentication token: hex-encoded SHA224 of a password.
pub type CredentialKey = [u8; KEY_LENGTH];

/// Address type constants
const ATYP_IPV4: u8 = 1;
const ATYP_DOMAIN: u8 = 3;
const ATYP_IPV6: u8 = 4;

/// Largest serialized address: type byte + length byte + 255-byte domain + port.
pub const MAX_ADDRESS_LEN: usize = 1 + 1 + 255 + 2;

/// Payload command requested by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Plain TCP relay
    Tcp,
    /// UDP relay carried over the TCP stream
    UdpAssociate,
    /// Multiplexed sub-stream channel
    Mux,
}

impl Command {
    pub const TCP: u8 = 0x01;
    pub const UDP: u8 = 0x03;
    pub const MUX: u8 = 0x7f;

    pub fn as_u8(self) -> u8 {
        match self {
            Command::Tcp => Self::TCP,
            Command::UdpAssociate => Self::UDP,
            Command::Mux => Self::MUX,
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = &'static str;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            Self::TCP => Ok(Command::Tcp),
            Self::UDP => Ok(Command::UdpAssociate),
            Self::MUX => Ok(Command::Mux),
            _ => Err("unknown command"),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Tcp => write!(f, "tcp"),
            Command::UdpAssociate => write!(f, "udp"),
            Command::Mux => write!(f, "mux"),
        }
    }
}

/// Destination address carried in the request header and in UDP frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address
    IPv4([u8; 4], u16),
    /// IPv6 address
    IPv6([u8; 16], u16),
    /// Domain name
    Domain(String, u16),
}

/// Outcome of decoding from a partially filled buffer
#[derive(Debug)]
pub enum DecodeResult<T> {
    /// Successfully decoded, with the number of bytes consumed
    Ok(T, usize),
    /// Buffer does not yet hold a full unit
    NeedMoreData,
    /// Structurally invalid data
    Invalid(&'static str),
}

impl Address {
    /// Decode one serialized address from the front of `buf`.
    pub fn decode(buf: &[u8]) -> DecodeResult<Self> {
        let Some(&atyp) = buf.first() else {
            return DecodeResult::NeedMoreData;
        };
        match atyp {
            ATYP_IPV4 => {
                if buf.len() < 7 {
                    return DecodeResult::NeedMoreData;
                }
                let mut ip = [0u8; 4];
                ip.copy_from_slice(&buf[1..5]);
                DecodeResult::Ok(Address::IPv4(ip, read_port(&buf[5..])), 7)
            }
            ATYP_IPV6 => {
                if buf.len() < 19 {
                    return DecodeResult::NeedMoreData;
                }
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[1..17]);
                DecodeResult::Ok(Address::IPv6(ip, read_port(&buf[17..])), 19)
            }
            ATYP_DOMAIN => {
                let Some(&len) = buf.get(1) else {
                    return DecodeResult::NeedMoreData;
                };
                let total = 2 + len as usize + 2;
                if buf.len() < total {
                    return DecodeResult::NeedMoreData;
                }
                let Ok(domain) = std::str::from_utf8(&buf[2..2 + len as usize]) else {
                    return DecodeResult::Invalid("domain is not valid utf-8");
                };
                let port = read_port(&buf[2 + len as usize..]);
                DecodeResult::Ok(Address::Domain(domain.to_string(), port), total)
            }
            _ => DecodeResult::Invalid("invalid address type"),
        }
    }

    /// Read one serialized address sequentially from the stream.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let atyp = reader.read_u8().await?;
        match atyp {
            ATYP_IPV4 => {
                let mut ip = [0u8; 4];
                reader.read_exact(&mut ip).await?;
                let port = reader.read_u16().await?;
                Ok(Address::IPv4(ip, port))
            }
            ATYP_IPV6 => {
                let mut ip = [0u8; 16];
                reader.read_exact(&mut ip).await?;
                let port = reader.read_u16().await?;
                Ok(Address::IPv6(ip, port))
            }
            ATYP_DOMAIN => {
                let len = reader.read_u8().await? as usize;
                let mut raw = vec![0u8; len];
                reader.read_exact(&mut raw).await?;
                let domain = String::from_utf8(raw)
                    .map_err(|_| Error::Malformed("domain is not valid utf-8"))?;
                let port = reader.read_u16().await?;
                Ok(Address::Domain(domain, port))
            }
            _ => Err(Error::Malformed("invalid address type")),
        }
    }

    /// Serialize into `buf`, returning the number of bytes written.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<usize> {
        match self {
            Address::IPv4(ip, port) => {
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(ip);
                buf.put_u16(*port);
                Ok(7)
            }
            Address::IPv6(ip, port) => {
                buf.put_u8(ATYP_IPV6);
                buf.put_slice(ip);
                buf.put_u16(*port);
                Ok(19)
            }
            Address::Domain(domain, port) => {
                let len = u8::try_from(domain.len())
                    .map_err(|_| Error::Malformed("domain name too long"))?;
                buf.put_u8(ATYP_DOMAIN);
                buf.put_u8(len);
                buf.put_slice(domain.as_bytes());
                buf.put_u16(*port);
                Ok(2 + domain.len() + 2)
            }
        }
    }

    /// Serialized size of this address.
    pub fn encoded_len(&self) -> usize {
        match self {
            Address::IPv4(..) => 7,
            Address::IPv6(..) => 19,
            Address::Domain(domain, _) => 2 + domain.len() + 2,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Address::IPv4(_, port) | Address::IPv6(_, port) | Address::Domain(_, port) => *port,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::IPv4(ip, port) => write!(f, "{}:{}", Ipv4Addr::from(*ip), port),
            Address::IPv6(ip, port) => write!(f, "[{}]:{}", Ipv6Addr::from(*ip), port),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

fn read_port(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}
