//! Feed client.
//!
//! Connects to a host, performs the handshake, seeds a local `ReplicaCache`
//! from the snapshot and then applies `Change` frames as they arrive. The
//! visual subsystem subscribes to that cache; it never sees the socket.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use chrono::{DateTime, Utc};
use mirror_shared::{
    config::MirrorConfig,
    net::{ClientId, FeedMsg, ReliableConn, PROTOCOL_VERSION},
    store::ReplicaCache,
};
use tracing::{debug, info, warn};

/// Frames drained per `poll` before yielding back to the frame loop.
const MAX_FRAMES_PER_POLL: usize = 4096;

/// Feed connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No feed. Visuals freeze.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Welcomed, waiting for the snapshot.
    Syncing,
    /// Snapshot loaded, applying changes.
    Live,
}

pub struct FeedClient {
    pub client_id: ClientId,
    pub state: ClientState,
    conn: ReliableConn,
    cache: ReplicaCache,
    last_tick: u64,
    last_tick_at: Option<DateTime<Utc>>,
    changes_applied: u64,
}

impl FeedClient {
    /// Connects and syncs: Hello, Welcome, then the snapshot.
    pub async fn connect(cfg: &MirrorConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        Self::connect_to(addr).await
    }

    pub async fn connect_to(addr: SocketAddr) -> anyhow::Result<Self> {
        info!(server = %addr, "Connecting to host");
        let mut conn = ReliableConn::connect(addr).await?;
        conn.send(&FeedMsg::Hello {
            protocol: PROTOCOL_VERSION,
        })
        .await?;

        let client_id = match conn.recv().await? {
            FeedMsg::Welcome { client_id } => client_id,
            FeedMsg::Disconnect { reason } => anyhow::bail!("host refused connection: {reason}"),
            other => anyhow::bail!("expected Welcome, got {other:?}"),
        };
        info!(client_id = ?client_id, "Welcomed by host");

        let mut client = Self {
            client_id,
            state: ClientState::Syncing,
            conn,
            cache: ReplicaCache::new(),
            last_tick: 0,
            last_tick_at: None,
            changes_applied: 0,
        };

        match client.conn.recv().await.context("await snapshot")? {
            FeedMsg::Snapshot { tick, rows } => {
                info!(tick, rows = rows.len(), "Snapshot loaded");
                client.cache.load_rows(rows);
                client.last_tick = tick;
                client.state = ClientState::Live;
            }
            other => anyhow::bail!("expected Snapshot, got {other:?}"),
        }
        Ok(client)
    }

    /// Applies whatever frames arrive within `wait`, then anything already
    /// buffered. Returns the number of row changes applied.
    ///
    /// A broken connection moves the client to `Disconnected`; it is not an
    /// error.
    pub async fn poll(&mut self, wait: Duration) -> anyhow::Result<usize> {
        if self.state == ClientState::Disconnected {
            return Ok(0);
        }
        let mut applied = 0;
        let mut timeout = wait;
        for _ in 0..MAX_FRAMES_PER_POLL {
            match self.conn.recv_timeout(timeout).await {
                Ok(Some(msg)) => {
                    if self.handle(msg) {
                        applied += 1;
                    }
                    if self.state == ClientState::Disconnected {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Feed connection error");
                    self.state = ClientState::Disconnected;
                    break;
                }
            }
            timeout = Duration::ZERO;
        }
        self.changes_applied += applied as u64;
        Ok(applied)
    }

    /// Returns true when `msg` changed a row.
    fn handle(&mut self, msg: FeedMsg) -> bool {
        match msg {
            FeedMsg::Change { change, .. } => {
                self.cache.apply(change);
                return true;
            }
            FeedMsg::Tick { tick, at } => {
                self.last_tick = tick;
                self.last_tick_at = Some(at);
            }
            FeedMsg::Disconnect { reason } => {
                info!(reason = %reason, "Host closed the feed");
                self.state = ClientState::Disconnected;
            }
            other => {
                debug!(?other, "Unexpected feed message");
            }
        }
        false
    }

    /// Tells the host we are leaving.
    pub async fn disconnect(&mut self, reason: &str) -> anyhow::Result<()> {
        if self.state != ClientState::Disconnected {
            self.conn
                .send(&FeedMsg::Disconnect {
                    reason: reason.to_string(),
                })
                .await?;
            self.state = ClientState::Disconnected;
        }
        Ok(())
    }

    pub fn cache(&self) -> &ReplicaCache {
        &self.cache
    }

    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }

    pub fn last_tick_at(&self) -> Option<DateTime<Utc>> {
        self.last_tick_at
    }

    pub fn changes_applied(&self) -> u64 {
        self.changes_applied
    }

    pub fn is_live(&self) -> bool {
        self.state == ClientState::Live
    }

    pub fn server_peer(&self) -> anyhow::Result<SocketAddr> {
        self.conn.peer_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_shared::{
        math::Vec2,
        net::FeedListener,
        rows::{EntityId, EntityRow, Row},
        store::{ReplicaSource, RowChange},
    };

    #[tokio::test]
    async fn handshake_then_changes() {
        let listener = FeedListener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let host = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            assert!(matches!(conn.recv().await.unwrap(), FeedMsg::Hello { .. }));
            conn.send(&FeedMsg::Welcome {
                client_id: ClientId(9),
            })
            .await
            .unwrap();
            conn.send(&FeedMsg::Snapshot {
                tick: 4,
                rows: vec![Row::Entity(EntityRow::at(EntityId(1), Vec2::new(1.0, 2.0)))],
            })
            .await
            .unwrap();
            conn.send(&FeedMsg::Change {
                tick: 5,
                change: RowChange::Insert(Row::Entity(EntityRow::at(EntityId(2), Vec2::ZERO))),
            })
            .await
            .unwrap();
            conn.send(&FeedMsg::Tick { tick: 5, at: Utc::now() })
                .await
                .unwrap();
            conn.send(&FeedMsg::Disconnect {
                reason: "done".into(),
            })
            .await
            .unwrap();
        });

        let mut client = FeedClient::connect_to(addr).await.unwrap();
        assert_eq!(client.client_id, ClientId(9));
        assert!(client.is_live());
        assert_eq!(client.last_tick(), 4);
        assert!(client.cache().find_entity(EntityId(1)).is_some());

        let mut applied = 0;
        while client.state != ClientState::Disconnected {
            applied += client.poll(Duration::from_millis(200)).await.unwrap();
        }
        host.await.unwrap();
        assert_eq!(applied, 1);
        assert_eq!(client.last_tick(), 5);
        assert!(client.cache().find_entity(EntityId(2)).is_some());
    }
}
