//! Replication and failover: forwarding committed changes from a primary to
//! its backup, and the server role state machine.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::server::{LockReply, LockRequest, LockServer};
use crate::utils::{
    safe_tcp_read, safe_tcp_write, tcp_connect_with_retry, DuolockError,
};

use async_trait::async_trait;

use bytes::BytesMut;

use tokio::time::{self, Duration};

/// Role of a lock server process. The only transition is a primary demoting
/// itself to secondary when its backup becomes unreachable.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ServerRole {
    Primary,
    Secondary,
}

impl ServerRole {
    /// Returns the role after a failed forward. Demotion is one-way.
    #[inline]
    pub(crate) fn demote(self) -> Self {
        ServerRole::Secondary
    }

    /// Short logging tag.
    pub fn tag(&self) -> &'static str {
        match self {
            ServerRole::Primary => "p",
            ServerRole::Secondary => "b",
        }
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Link from a primary to its backup. A forward either completes with the
/// backup's reply or fails; any failure means the backup is unreachable.
#[async_trait]
pub trait BackupLink: Send + Sync {
    /// Delivers a request (already marked forwarded) to the backup and waits
    /// for its reply.
    async fn forward(
        &mut self,
        req: &LockRequest,
    ) -> Result<bool, DuolockError>;
}

/// Backup link over TCP. Dials the backup for every forward, like a one-shot
/// RPC call; the whole exchange is bounded by `timeout`.
pub struct TcpBackupLink {
    /// Backup server address.
    addr: SocketAddr,

    /// Bound on one full forwarding round trip.
    timeout: Duration,

    /// Extra connect attempts within one forward.
    connect_retries: u8,
}

impl TcpBackupLink {
    /// Creates a new TCP backup link. Does not connect yet.
    pub fn new(
        addr: SocketAddr,
        timeout: Duration,
        connect_retries: u8,
    ) -> Self {
        TcpBackupLink {
            addr,
            timeout,
            connect_retries,
        }
    }
}

#[async_trait]
impl BackupLink for TcpBackupLink {
    async fn forward(
        &mut self,
        req: &LockRequest,
    ) -> Result<bool, DuolockError> {
        let exchange = async {
            let mut conn =
                tcp_connect_with_retry(self.addr, self.connect_retries).await?;
            safe_tcp_write(&mut conn, req).await?;
            let mut read_buf = BytesMut::with_capacity(8 + 64);
            let reply: LockReply =
                safe_tcp_read(&mut read_buf, &mut conn).await?;
            Ok::<bool, DuolockError>(reply.ok)
        };
        time::timeout(self.timeout, exchange).await?
    }
}

/// In-process backup link that hands requests directly to another
/// `LockServer` in the same process.
pub struct LocalBackupLink {
    backup: Arc<LockServer>,
}

impl LocalBackupLink {
    pub fn new(backup: Arc<LockServer>) -> Self {
        LocalBackupLink { backup }
    }
}

#[async_trait]
impl BackupLink for LocalBackupLink {
    async fn forward(
        &mut self,
        req: &LockRequest,
    ) -> Result<bool, DuolockError> {
        Ok(self.backup.handle(req.clone()).await.ok)
    }
}
