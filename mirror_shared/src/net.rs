//! Networking primitives.
//!
//! Goals:
//! - Provide a reliable (TCP) channel carrying replicated row changes.
//! - Keep serialization explicit and versionable.
//!
//! Frames are a big-endian `u32` length followed by a JSON `FeedMsg`.
//! A feed is: `Hello` → `Welcome` → one `Snapshot`, then `Change` frames in
//! the order the host applied them, with a `Tick` marker closing each tick.

use anyhow::Context;
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time,
};
use tracing::debug;

use crate::{rows::Row, store::RowChange};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frames larger than this are rejected as corrupt.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn new_unique() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FeedMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
    },
    Welcome {
        client_id: ClientId,
    },

    // ─── Replication ───
    /// Every row the host holds at `tick`.
    Snapshot {
        tick: u64,
        rows: Vec<Row>,
    },
    /// One row change applied during `tick`.
    Change {
        tick: u64,
        change: RowChange,
    },
    /// All changes for `tick` have been sent.
    Tick {
        tick: u64,
        at: DateTime<Utc>,
    },

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// Reliable connection over TCP with length-prefixed frames.
///
/// Incoming bytes are buffered until a whole frame is present, so a receive
/// cancelled by a timeout never loses a partial frame.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
    rx: BytesMut,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            rx: BytesMut::with_capacity(8 * 1024),
        }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        debug!(%addr, "feed connection opened");
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &FeedMsg) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg).context("serialize msg")?;
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(&payload);
        self.stream.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<FeedMsg> {
        loop {
            if let Some(msg) = self.take_frame()? {
                return Ok(msg);
            }
            let n = self
                .stream
                .read_buf(&mut self.rx)
                .await
                .context("tcp read")?;
            if n == 0 {
                anyhow::bail!("connection closed by peer");
            }
        }
    }

    /// Receives one frame, or `None` if nothing arrives within `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> anyhow::Result<Option<FeedMsg>> {
        match time::timeout(timeout, self.recv()).await {
            Ok(msg) => msg.map(Some),
            Err(_) => Ok(None),
        }
    }

    fn take_frame(&mut self) -> anyhow::Result<Option<FeedMsg>> {
        if self.rx.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.rx[0], self.rx[1], self.rx[2], self.rx[3]]) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("frame of {len} bytes exceeds limit");
        }
        if self.rx.len() < 4 + len {
            return Ok(None);
        }
        self.rx.advance(4);
        let payload = self.rx.split_to(len);
        decode_from_bytes(&payload).map(Some)
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }
}

/// TCP feed listener.
pub struct FeedListener {
    listener: TcpListener,
}

impl FeedListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        debug!(peer = %addr, "feed connection accepted");
        Ok((ReliableConn::new(stream), addr))
    }

    /// Accepts a pending connection, or returns `None` after `timeout`.
    pub async fn accept_timeout(
        &self,
        timeout: Duration,
    ) -> anyhow::Result<Option<(ReliableConn, SocketAddr)>> {
        match time::timeout(timeout, self.accept()).await {
            Ok(accepted) => accepted.map(Some),
            Err(_) => Ok(None),
        }
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Destination for outgoing feed frames.
#[async_trait]
pub trait FeedSink: Send {
    async fn deliver(&mut self, msg: &FeedMsg) -> anyhow::Result<()>;
}

#[async_trait]
impl FeedSink for ReliableConn {
    async fn deliver(&mut self, msg: &FeedMsg) -> anyhow::Result<()> {
        self.send(msg).await
    }
}

/// In-process sink; frames go to an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<FeedMsg>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FeedMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl FeedSink for ChannelSink {
    async fn deliver(&mut self, msg: &FeedMsg) -> anyhow::Result<()> {
        self.tx
            .send(msg.clone())
            .map_err(|_| anyhow::anyhow!("feed receiver dropped"))
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &FeedMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<FeedMsg> {
    serde_json::from_slice(b).context("deserialize")
}
