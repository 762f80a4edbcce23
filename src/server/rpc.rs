//! Lock server RPC transport: TCP acceptor and per-connection servants.
//!
//! Each accepted connection gets its own servant task, which reads framed
//! `LockRequest`s one after another and writes back a `LockReply` for each.
//! Concurrency across connections is bounded only by the handler's critical
//! section.
//!
//! The `kill()` and `deafen()` hooks are for test harnesses: they simulate a
//! crashed primary and a primary that processes a request but whose reply
//! never reaches the client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::server::{LockReply, LockRequest, LockServer};
use crate::utils::{
    safe_tcp_read, safe_tcp_write, tcp_bind_with_retry, DuolockError,
};

use bytes::BytesMut;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

/// Handle to a running RPC server. Dropping the handle stops the server.
pub struct RpcHandle {
    /// Actually bound listening address.
    local_addr: SocketAddr,

    /// If set, the next accepted connection is served without replies.
    dying: Arc<AtomicBool>,

    /// Kill signal sender, shared with the acceptor thread.
    tx_kill: Arc<watch::Sender<bool>>,

    /// Join handle of the acceptor thread.
    acceptor_handle: Option<JoinHandle<()>>,
}

impl RpcHandle {
    /// Binds a listener on `bind_addr` and spawns the acceptor thread that
    /// dispatches requests to `server`.
    pub async fn new_and_setup(
        bind_addr: SocketAddr,
        server: Arc<LockServer>,
        deaf_linger: Duration,
    ) -> Result<Self, DuolockError> {
        let listener = tcp_bind_with_retry(bind_addr, 10).await?;
        let local_addr = listener.local_addr()?;
        pf_info!("accepting lock clients on '{}'", local_addr);

        let dying = Arc::new(AtomicBool::new(false));
        let (tx_kill, rx_kill) = watch::channel(false);
        let tx_kill = Arc::new(tx_kill);

        let acceptor_handle = tokio::spawn(Self::acceptor_thread(
            server,
            listener,
            dying.clone(),
            tx_kill.clone(),
            rx_kill,
            deaf_linger,
        ));

        Ok(RpcHandle {
            local_addr,
            dying,
            tx_kill,
            acceptor_handle: Some(acceptor_handle),
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the server has stopped serving.
    pub fn is_dead(&self) -> bool {
        *self.tx_kill.borrow()
    }

    /// Stops accepting connections and tears down all servants. Returns once
    /// the listener is closed.
    pub async fn kill(&mut self) -> Result<(), DuolockError> {
        self.tx_kill.send_replace(true);
        if let Some(handle) = self.acceptor_handle.take() {
            handle.await?;
        }
        Ok(())
    }

    /// Makes the next accepted connection get its requests processed but its
    /// replies discarded; the server dies afterwards.
    pub fn deafen(&self) {
        self.dying.store(true, Ordering::Release);
    }

    /// Waits until the server has stopped serving.
    pub async fn wait_dead(&self) {
        let mut rx_kill = self.tx_kill.subscribe();
        Self::killed(&mut rx_kill).await;
    }

    /// Resolves once the kill flag is set, including when it was set before
    /// this receiver was created.
    async fn killed(rx_kill: &mut watch::Receiver<bool>) {
        // an error means the sender is gone, which also means dead
        let _ = rx_kill.wait_for(|dead| *dead).await;
    }
}

impl Drop for RpcHandle {
    fn drop(&mut self) {
        self.tx_kill.send_replace(true);
    }
}

// RpcHandle acceptor thread implementation
impl RpcHandle {
    /// Acceptor thread function.
    async fn acceptor_thread(
        server: Arc<LockServer>,
        listener: TcpListener,
        dying: Arc<AtomicBool>,
        tx_kill: Arc<watch::Sender<bool>>,
        mut rx_kill: watch::Receiver<bool>,
        deaf_linger: Duration,
    ) {
        pf_debug!("acceptor thread spawned");
        let mut deaf_conn = None;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            pf_warn!("error accepting connection: {}", e);
                            continue;
                        }
                    };
                    if dying.load(Ordering::Acquire) {
                        deaf_conn = Some((stream, addr));
                        break;
                    }
                    tokio::spawn(Self::servant_thread(
                        server.clone(),
                        stream,
                        addr,
                        tx_kill.subscribe(),
                    ));
                },

                _ = Self::killed(&mut rx_kill) => {
                    break;
                }
            }
        }

        // closes the listening socket
        drop(listener);

        if let Some((stream, addr)) = deaf_conn {
            pf_warn!("serving {} deafly for {:?}", addr, deaf_linger);
            let _ = time::timeout(
                deaf_linger,
                Self::deaf_servant(server, stream),
            )
            .await;
            tx_kill.send_replace(true);
        }

        pf_debug!("acceptor thread exitted");
    }
}

// RpcHandle servant threads implementation
impl RpcHandle {
    /// Request listener and reply sender thread function of one connection.
    async fn servant_thread(
        server: Arc<LockServer>,
        mut conn: TcpStream,
        addr: SocketAddr,
        mut rx_kill: watch::Receiver<bool>,
    ) {
        pf_trace!("servant thread for {} spawned", addr);

        let (mut conn_read, mut conn_write) = conn.split();
        let mut read_buf = BytesMut::with_capacity(8 + 1024);

        loop {
            tokio::select! {
                req = safe_tcp_read::<LockRequest, _>(
                    &mut read_buf,
                    &mut conn_read,
                ) => {
                    let req = match req {
                        Ok(req) => req,
                        Err(e) => {
                            pf_trace!("connection {} ended: {}", addr, e);
                            break;
                        }
                    };
                    let reply = server.handle(req).await;
                    let sent = safe_tcp_write(&mut conn_write, &reply).await;
                    if let Err(e) = sent {
                        pf_warn!("error replying to {}: {}", addr, e);
                        break;
                    }
                },

                _ = Self::killed(&mut rx_kill) => {
                    break;
                }
            }
        }

        pf_trace!("servant thread for {} exitted", addr);
    }

    /// Processes requests from one connection and drops every reply.
    async fn deaf_servant(server: Arc<LockServer>, mut conn: TcpStream) {
        let mut read_buf = BytesMut::with_capacity(8 + 1024);
        while let Ok(req) =
            safe_tcp_read::<LockRequest, _>(&mut read_buf, &mut conn).await
        {
            let LockReply { ok } = server.handle(req).await;
            pf_debug!("discarding reply {}", ok);
        }
    }
}
