//! Byte stream to the belt.
//!
//! The belt speaks the same protocol over a serial line and over Bluetooth
//! RFCOMM; on Linux a bound RFCOMM channel is a serial device node
//! (`/dev/rfcomm0`). A TCP address reaches serial-over-TCP bridges and
//! simulators. [`Transport::from_stream`] accepts any async byte stream.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::constants::DEFAULT_BAUD_RATE;
use crate::error::{BeltError, Result};

/// Any bidirectional stream the belt can be reached through.
pub trait BeltStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> BeltStream for T {}

type BoxedStream = Box<dyn BeltStream>;

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Where to find a belt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BeltAddress {
    /// Serial device, including bound RFCOMM channels
    Serial {
        path: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// `host:port` of a serial-over-TCP bridge
    Tcp { addr: String },
}

impl BeltAddress {
    pub fn serial(path: impl Into<String>) -> Self {
        BeltAddress::Serial {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    pub fn tcp(addr: impl Into<String>) -> Self {
        BeltAddress::Tcp { addr: addr.into() }
    }
}

impl fmt::Display for BeltAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeltAddress::Serial { path, baud_rate } => write!(f, "{path}@{baud_rate}"),
            BeltAddress::Tcp { addr } => write!(f, "tcp://{addr}"),
        }
    }
}

/// Owns one open stream. Writes are serialised by a lock so that frames
/// from concurrent senders never interleave on the wire.
pub struct Transport {
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    reader: Mutex<Option<ReadHalf<BoxedStream>>>,
}

impl Transport {
    pub async fn connect(address: &BeltAddress) -> Result<Self> {
        info!(%address, "Opening belt transport");
        let stream: BoxedStream = match address {
            BeltAddress::Serial { path, baud_rate } => Box::new(tokio_serial::new(path, *baud_rate).open_native_async()?),
            BeltAddress::Tcp { addr } => {
                let stream = TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                Box::new(stream)
            }
        };
        Ok(Self::from_boxed(stream))
    }

    pub fn from_stream<S: BeltStream + 'static>(stream: S) -> Self {
        Self::from_boxed(Box::new(stream))
    }

    fn from_boxed(stream: BoxedStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
        }
    }

    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(BeltError::NotConnected)?;
        debug!(bytes = hex::encode(bytes), "Belt write");
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read whatever is available, at most `max_bytes`. A closed stream is an
    /// error, never an empty read.
    pub async fn receive(&self, max_bytes: usize) -> Result<Bytes> {
        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or(BeltError::NotConnected)?;
        let mut buf = vec![0u8; max_bytes];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(BeltError::Connection(std::io::ErrorKind::UnexpectedEof.into()));
        }
        buf.truncate(n);
        debug!(bytes = hex::encode(&buf), "Belt read");
        Ok(Bytes::from(buf))
    }

    /// Close the stream. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                warn!("Failed to shut down belt stream: {}", e);
            }
        }
        // a reader blocked in `receive` is released when its task stops
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }

    pub async fn is_open(&self) -> bool {
        self.writer.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_send_and_receive() {
        let (local, mut remote) = tokio::io::duplex(64);
        let transport = Transport::from_stream(local);

        transport.send(&[0x90, 0x02, 0xAA, 0xAA, 0xAA, 0x0A]).await.unwrap();
        let mut buf = [0u8; 6];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x90, 0x02, 0xAA, 0xAA, 0xAA, 0x0A]);

        remote.write_all(&[0xD0, 0x02, 0x23]).await.unwrap();
        assert_eq!(transport.receive(128).await.unwrap().as_ref(), &[0xD0, 0x02, 0x23]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_stay_whole() {
        // a tiny pipe forces every write to be split across several polls
        let (local, mut remote) = tokio::io::duplex(3);
        let transport = Arc::new(Transport::from_stream(local));

        let senders: Vec<_> = (0..50u8)
            .map(|i| {
                let transport = Arc::clone(&transport);
                tokio::spawn(async move { transport.send(&[0x87, i, i, i, i, i, 0x0A]).await })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut frame = [0u8; 7];
        for _ in 0..50 {
            remote.read_exact(&mut frame).await.unwrap();
            let i = frame[1];
            assert_eq!(frame, [0x87, i, i, i, i, i, 0x0A], "interleaved write");
            assert!(seen.insert(i), "frame {i} received twice");
        }
        for sender in senders {
            sender.await.unwrap().unwrap();
        }
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn test_closed_stream_is_an_error() {
        let (local, remote) = tokio::io::duplex(64);
        let transport = Transport::from_stream(local);
        drop(remote);
        assert!(matches!(transport.receive(16).await, Err(BeltError::Connection(_))));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (local, _remote) = tokio::io::duplex(64);
        let transport = Transport::from_stream(local);
        assert!(transport.is_open().await);
        transport.disconnect().await;
        transport.disconnect().await;
        assert!(!transport.is_open().await);
        assert!(matches!(transport.send(&[0x01]).await, Err(BeltError::NotConnected)));
    }

    #[test]
    fn test_address_from_json() {
        let address: BeltAddress = serde_json::from_str(r#"{"type": "serial", "path": "/dev/rfcomm0"}"#).unwrap();
        assert_eq!(address, BeltAddress::serial("/dev/rfcomm0"));
        assert_eq!(address.to_string(), "/dev/rfcomm0@115200");

        let address: BeltAddress = serde_json::from_str(r#"{"type": "tcp", "addr": "127.0.0.1:7000"}"#).unwrap();
        assert_eq!(address, BeltAddress::tcp("127.0.0.1:7000"));
    }
}
