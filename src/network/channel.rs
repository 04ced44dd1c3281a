//! Framed duplex transport
//!
//! A channel moves whole text frames. Over TCP a frame is one line of JSON;
//! the in-memory pair is used to run sessions without sockets.

use crate::error::{BlockchainError, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

/// Largest frame accepted from a peer
pub const MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: String) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait FrameStream: Send {
    /// Next frame, or `None` once the remote end has closed
    async fn recv(&mut self) -> Result<Option<String>>;
}

/// The two halves of one connection
pub struct Channel {
    pub remote: String,
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl Channel {
    pub fn tcp(stream: TcpStream, remote: impl Into<String>) -> Channel {
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH));
        let (sink, stream) = framed.split();
        Channel {
            remote: remote.into(),
            sink: Box::new(TcpSink(sink)),
            stream: Box::new(TcpSource(stream)),
        }
    }
}

fn codec_error(e: LinesCodecError) -> BlockchainError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            BlockchainError::Protocol(format!("Frame longer than {MAX_FRAME_LENGTH} bytes"))
        }
        LinesCodecError::Io(e) => BlockchainError::Connection(e.to_string()),
    }
}

type Lines = Framed<TcpStream, LinesCodec>;

struct TcpSink(SplitSink<Lines, String>);

#[async_trait]
impl FrameSink for TcpSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.0.send(frame).await.map_err(codec_error)
    }

    async fn close(&mut self) -> Result<()> {
        SinkExt::close(&mut self.0).await.map_err(codec_error)
    }
}

struct TcpSource(SplitStream<Lines>);

#[async_trait]
impl FrameStream for TcpSource {
    async fn recv(&mut self) -> Result<Option<String>> {
        match self.0.next().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(codec_error(e)),
            None => Ok(None),
        }
    }
}

struct MemorySink(Option<mpsc::UnboundedSender<String>>);

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: String) -> Result<()> {
        let sender = self
            .0
            .as_ref()
            .ok_or_else(|| BlockchainError::Connection("channel closed".to_string()))?;
        sender
            .send(frame)
            .map_err(|_| BlockchainError::Connection("remote end dropped".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.0.take();
        Ok(())
    }
}

struct MemorySource(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl FrameStream for MemorySource {
    async fn recv(&mut self) -> Result<Option<String>> {
        Ok(self.0.recv().await)
    }
}

/// Two connected in-memory channels
pub fn memory_pair() -> (Channel, Channel) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let a = Channel {
        remote: "memory:b".to_string(),
        sink: Box::new(MemorySink(Some(a_tx))),
        stream: Box::new(MemorySource(b_rx)),
    };
    let b = Channel {
        remote: "memory:a".to_string(),
        sink: Box::new(MemorySink(Some(b_tx))),
        stream: Box::new(MemorySource(a_rx)),
    };
    (a, b)
}

/// Opens outbound channels
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Channel>;
}

pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> TcpConnector {
        TcpConnector { timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &str) -> Result<Channel> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(address))
            .await
            .map_err(|_| BlockchainError::Timeout(format!("connecting to {address}")))?
            .map_err(|e| BlockchainError::Connection(format!("Failed to connect to {address}: {e}")))?;
        stream.set_nodelay(true)?;
        Ok(Channel::tcp(stream, address))
    }
}

/// `host:port` with a non-empty host and a non-zero port
pub fn is_well_formed(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty()
                && !host.chars().any(char::is_whitespace)
                && matches!(port.parse::<u16>(), Ok(p) if p != 0)
        }
        None => false,
    }
}
