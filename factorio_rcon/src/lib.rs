//! A minimal Source RCON client.
//!
//! Factorio exposes its console over the Source RCON protocol: a TCP stream of
//! little-endian framed packets, authenticated once per connection with a
//! password. This crate implements just enough of the protocol to authenticate
//! and execute console commands, returning the server's textual reply. It does
//! not synchronize access; a [`Client`] must be used by one caller at a time.
//!
//! Packet layout on the wire:
//!
//! ```text
//! size: i32 | id: i32 | type: i32 | body: [u8] | 0x00 | 0x00
//! ```
//!
//! where `size` counts every byte after itself.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use bytes::{BufMut, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
};
use tracing::{debug, trace};

/// Largest packet, in bytes, this client will accept from a server.
///
/// Factorio does not split long command replies across packets, so this bound
/// is generous compared to the 4KiB the protocol nominally allows.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// The id, type and trailing null bytes of every packet.
const HEADER_AND_TRAILER: usize = 10;

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Errors produced by [`Client`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrapper for [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The server rejected the supplied password.
    #[error("RCON authentication rejected by server")]
    AuthenticationFailed,
    /// A packet announced a size that is either too small to be valid or
    /// larger than [`MAX_PACKET_SIZE`].
    #[error("RCON packet size {0} outside of permitted bounds")]
    PacketSize(i64),
    /// The command body would not fit in a single packet.
    #[error("RCON command of {0} bytes exceeds the maximum packet size")]
    CommandTooLarge(usize),
    /// The reply body was not valid UTF-8.
    #[error("RCON reply was not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Packet {
    id: i32,
    kind: i32,
    body: Vec<u8>,
}

impl Packet {
    fn encode(&self) -> Result<BytesMut, Error> {
        let size = self.body.len() + HEADER_AND_TRAILER;
        if size > MAX_PACKET_SIZE {
            return Err(Error::CommandTooLarge(self.body.len()));
        }
        let mut buf = BytesMut::with_capacity(size + 4);
        // Bounded by MAX_PACKET_SIZE above, well within i32.
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        buf.put_i32_le(size as i32);
        buf.put_i32_le(self.id);
        buf.put_i32_le(self.kind);
        buf.put_slice(&self.body);
        buf.put_u8(0);
        buf.put_u8(0);
        Ok(buf)
    }

    async fn read_from<R>(reader: &mut R) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin,
    {
        let size = reader.read_i32_le().await?;
        let len = usize::try_from(size).map_err(|_| Error::PacketSize(i64::from(size)))?;
        if !(HEADER_AND_TRAILER..=MAX_PACKET_SIZE).contains(&len) {
            return Err(Error::PacketSize(i64::from(size)));
        }

        let mut buf = vec![0; len];
        reader.read_exact(&mut buf).await?;

        let id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let kind = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        buf.truncate(len - 2);
        let body = buf.split_off(8);

        Ok(Self { id, kind, body })
    }
}

/// An authenticated RCON connection.
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
    next_id: i32,
}

impl Client {
    /// Connect to `addr` and authenticate with `password`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection cannot be established, the
    /// server closes the stream or the password is rejected.
    pub async fn connect<A>(addr: A, password: &str) -> Result<Self, Error>
    where
        A: ToSocketAddrs,
    {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let mut client = Self { stream, next_id: 1 };
        client.authenticate(password).await?;
        Ok(client)
    }

    async fn authenticate(&mut self, password: &str) -> Result<(), Error> {
        let id = self.next_id();
        self.send(&Packet {
            id,
            kind: SERVERDATA_AUTH,
            body: password.as_bytes().to_vec(),
        })
        .await?;

        // Some servers send an empty RESPONSE_VALUE ahead of the auth
        // response, skip anything that isn't the auth response proper.
        loop {
            let packet = Packet::read_from(&mut self.stream).await?;
            if packet.kind != SERVERDATA_AUTH_RESPONSE {
                trace!("skipping packet of type {} during auth", packet.kind);
                continue;
            }
            if packet.id == -1 {
                return Err(Error::AuthenticationFailed);
            }
            if packet.id == id {
                debug!("RCON authentication accepted");
                return Ok(());
            }
        }
    }

    /// Execute `command` on the server and return its reply.
    ///
    /// Replies to earlier, abandoned requests are discarded until the reply
    /// matching this request arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails, the server sends a malformed
    /// packet or the reply is not valid UTF-8. The connection should be
    /// considered unusable after any error.
    pub async fn execute(&mut self, command: &str) -> Result<String, Error> {
        let id = self.next_id();
        self.send(&Packet {
            id,
            kind: SERVERDATA_EXECCOMMAND,
            body: command.as_bytes().to_vec(),
        })
        .await?;

        loop {
            let packet = Packet::read_from(&mut self.stream).await?;
            if packet.kind == SERVERDATA_RESPONSE_VALUE && packet.id == id {
                return Ok(String::from_utf8(packet.body)?);
            }
            trace!(
                "discarding RCON packet id {} type {}, waiting on id {id}",
                packet.id, packet.kind
            );
        }
    }

    async fn send(&mut self, packet: &Packet) -> Result<(), Error> {
        let buf = packet.encode()?;
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    fn next_id(&mut self) -> i32 {
        let id = self.next_id;
        // -1 is reserved by the protocol to signal failed authentication.
        self.next_id = if id == i32::MAX { 1 } else { id + 1 };
        id
    }
}
