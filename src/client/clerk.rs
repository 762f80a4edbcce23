//! Client-side proxy to a primary/backup lock service pair.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::server::{CallerId, LockArgs, LockReply, LockRequest, Timestamp};
use crate::utils::{
    safe_tcp_read, safe_tcp_write, tcp_connect_with_retry, DuolockError,
};

use bytes::BytesMut;

use rand::Rng;

use serde::Deserialize;

use tokio::time::{self, Duration};

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ClerkConfig {
    /// Bound on one call to a server in millisecs; a call that takes longer
    /// counts as the server being unreachable.
    pub rpc_timeout_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ClerkConfig {
    fn default() -> Self {
        ClerkConfig {
            rpc_timeout_ms: 1000,
        }
    }
}

/// Lock service clerk. Talks to the primary until it fails to get a reply
/// from it once, then talks to the backup for good. Each logical call is
/// stamped once and resent unchanged, so servers can recognize retries.
pub struct Clerk {
    /// My caller ID.
    id: CallerId,

    /// Primary server address.
    primary: SocketAddr,

    /// Backup server address.
    backup: SocketAddr,

    /// Configuration parameters struct.
    config: ClerkConfig,

    /// Last logical timestamp handed out.
    last_ts: Timestamp,

    /// Set once the primary was found unreachable.
    failed_over: bool,
}

impl Clerk {
    /// Creates a clerk with a random nonzero caller ID.
    pub fn new(
        primary: SocketAddr,
        backup: SocketAddr,
        config_str: Option<&str>,
    ) -> Result<Self, DuolockError> {
        let id = rand::thread_rng().gen_range(1..=CallerId::MAX);
        Self::new_with_id(id, primary, backup, config_str)
    }

    /// Creates a clerk with the given caller ID.
    pub fn new_with_id(
        id: CallerId,
        primary: SocketAddr,
        backup: SocketAddr,
        config_str: Option<&str>,
    ) -> Result<Self, DuolockError> {
        let config = parsed_config!(config_str => ClerkConfig;
                                    rpc_timeout_ms)?;
        if config.rpc_timeout_ms == 0 {
            return logged_err!(
                "invalid config.rpc_timeout_ms '{}'",
                config.rpc_timeout_ms
            );
        }

        Ok(Clerk {
            id,
            primary,
            backup,
            config,
            last_ts: 0,
            failed_over: false,
        })
    }

    /// My caller ID.
    pub fn id(&self) -> CallerId {
        self.id
    }

    /// Whether I have switched to the backup.
    pub fn failed_over(&self) -> bool {
        self.failed_over
    }

    /// Acquires the named lock. Returns whether it was granted.
    pub async fn lock(&mut self, name: &str) -> Result<bool, DuolockError> {
        let args = LockArgs::new(name, self.id, self.next_tstamp());
        self.call(LockRequest::Lock(args)).await
    }

    /// Releases the named lock. Returns whether it was released.
    pub async fn unlock(&mut self, name: &str) -> Result<bool, DuolockError> {
        let args = LockArgs::new(name, self.id, self.next_tstamp());
        self.call(LockRequest::Unlock(args)).await
    }

    /// Hands out a timestamp strictly larger than the last one. Wall-clock
    /// microseconds are used as a floor so that independent clerks stay
    /// roughly comparable.
    fn next_tstamp(&mut self) -> Timestamp {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as Timestamp)
            .unwrap_or(0);
        self.last_ts = now.max(self.last_ts + 1);
        self.last_ts
    }

    /// Sends a request to the primary, or to the backup once failed over.
    async fn call(&mut self, req: LockRequest) -> Result<bool, DuolockError> {
        let timeout = Duration::from_millis(self.config.rpc_timeout_ms);

        if !self.failed_over {
            match Self::call_once(self.primary, &req, timeout).await {
                Ok(ok) => return Ok(ok),
                Err(e) => {
                    pf_warn!(
                        "primary '{}' unreachable: {}; failing over",
                        self.primary,
                        e
                    );
                    self.failed_over = true;
                }
            }
        }

        Self::call_once(self.backup, &req, timeout).await
    }

    /// One request-reply exchange on a fresh connection.
    async fn call_once(
        addr: SocketAddr,
        req: &LockRequest,
        timeout: Duration,
    ) -> Result<bool, DuolockError> {
        let exchange = async {
            let mut conn = tcp_connect_with_retry(addr, 0).await?;
            safe_tcp_write(&mut conn, req).await?;
            let mut read_buf = BytesMut::with_capacity(8 + 64);
            let reply: LockReply =
                safe_tcp_read(&mut read_buf, &mut conn).await?;
            Ok::<bool, DuolockError>(reply.ok)
        };
        time::timeout(timeout, exchange).await?
    }
}
