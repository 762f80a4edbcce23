//! Duolock's server functionality modules.

mod handler;
mod messages;
mod replication;
mod rpc;
mod store;

pub use handler::LockServer;
pub use messages::{LockArgs, LockReply, LockRequest};
pub use replication::{
    BackupLink, LocalBackupLink, ServerRole, TcpBackupLink,
};
pub use rpc::RpcHandle;
pub use store::{CallerId, LockRecord, Timestamp};

pub(crate) use store::LockTable;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::utils::DuolockError;

use serde::Deserialize;

use tokio::sync::watch;
use tokio::time::Duration;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bound on one forwarding round trip to the backup in millisecs.
    pub forward_timeout_ms: u64,

    /// Extra connect attempts per forward, all within the timeout.
    pub connect_retries: u8,

    /// How long a deafened connection lingers before being closed, in
    /// millisecs.
    pub deaf_linger_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            forward_timeout_ms: 1000,
            connect_retries: 0,
            deaf_linger_ms: 2000,
        }
    }
}

/// A running lock server process: request handler plus its RPC transport.
pub struct LockReplica {
    /// Role this process started with.
    start_role: ServerRole,

    /// Lock request handler, shared with servant threads.
    server: Arc<LockServer>,

    /// RPC server handle.
    rpc: RpcHandle,
}

impl LockReplica {
    /// Starts a lock server. A primary listens on `primary` and forwards to
    /// `backup`; a secondary listens on `backup`.
    pub async fn new_and_setup(
        primary: SocketAddr,
        backup: SocketAddr,
        am_primary: bool,
        config_str: Option<&str>,
    ) -> Result<Self, DuolockError> {
        let config = parsed_config!(config_str => ServerConfig;
                                    forward_timeout_ms, connect_retries,
                                    deaf_linger_ms)?;
        if config.forward_timeout_ms == 0 {
            return logged_err!(
                "invalid config.forward_timeout_ms '{}'",
                config.forward_timeout_ms
            );
        }
        if config.deaf_linger_ms == 0 {
            return logged_err!(
                "invalid config.deaf_linger_ms '{}'",
                config.deaf_linger_ms
            );
        }

        let (role, me, link) = if am_primary {
            let link: Box<dyn BackupLink> = Box::new(TcpBackupLink::new(
                backup,
                Duration::from_millis(config.forward_timeout_ms),
                config.connect_retries,
            ));
            (ServerRole::Primary, primary, Some(link))
        } else {
            (ServerRole::Secondary, backup, None)
        };

        let server = Arc::new(LockServer::new(role, link));
        let rpc = RpcHandle::new_and_setup(
            me,
            server.clone(),
            Duration::from_millis(config.deaf_linger_ms),
        )
        .await?;
        pf_info!("lock server started as {}", role);

        Ok(LockReplica {
            start_role: role,
            server,
            rpc,
        })
    }

    /// Runs until the termination signal fires or the server dies.
    pub async fn run(
        &mut self,
        mut rx_term: watch::Receiver<bool>,
    ) -> Result<(), DuolockError> {
        tokio::select! {
            _ = rx_term.changed() => {
                pf_warn!("server caught termination signal");
                self.rpc.kill().await?;
            },

            _ = self.rpc.wait_dead() => {
                pf_warn!("server stopped serving");
            }
        }
        Ok(())
    }

    /// Role this process started with.
    pub fn start_role(&self) -> ServerRole {
        self.start_role
    }

    /// Lock request handler.
    pub fn server(&self) -> &Arc<LockServer> {
        &self.server
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.rpc.local_addr()
    }

    /// Test hook: stop serving immediately.
    pub async fn kill(&mut self) -> Result<(), DuolockError> {
        self.rpc.kill().await
    }

    /// Test hook: process the next connection's requests without replying,
    /// then die.
    pub fn deafen(&self) {
        self.rpc.deafen();
    }

    /// Whether the server has stopped serving.
    pub fn is_dead(&self) -> bool {
        self.rpc.is_dead()
    }
}

#[cfg(test)]
mod replica_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reject_bad_config() -> Result<(), DuolockError> {
        let addr: SocketAddr = "127.0.0.1:0".parse()?;
        assert!(LockReplica::new_and_setup(
            addr,
            addr,
            true,
            Some("forward_timeout_ms = 0")
        )
        .await
        .is_err());
        assert!(LockReplica::new_and_setup(
            addr,
            addr,
            false,
            Some("no_such_knob = 1")
        )
        .await
        .is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_both_roles() -> Result<(), DuolockError> {
        let any: SocketAddr = "127.0.0.1:0".parse()?;
        let backup =
            LockReplica::new_and_setup(any, any, false, None).await?;
        let primary = LockReplica::new_and_setup(
            any,
            backup.local_addr(),
            true,
            Some("forward_timeout_ms = 500"),
        )
        .await?;
        assert_eq!(backup.start_role(), ServerRole::Secondary);
        assert_eq!(primary.start_role(), ServerRole::Primary);
        assert_eq!(primary.server().role().await, ServerRole::Primary);
        assert_ne!(primary.local_addr(), backup.local_addr());
        assert!(!primary.is_dead());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_until_term() -> Result<(), DuolockError> {
        let any: SocketAddr = "127.0.0.1:0".parse()?;
        let mut replica =
            LockReplica::new_and_setup(any, any, false, None).await?;
        let (tx_term, rx_term) = watch::channel(false);
        let runner = tokio::spawn(async move {
            replica.run(rx_term).await?;
            Ok::<bool, DuolockError>(replica.is_dead())
        });
        tx_term.send(true)?;
        let dead = tokio::time::timeout(Duration::from_secs(2), runner)
            .await???;
        assert!(dead);
        Ok(())
    }
}
