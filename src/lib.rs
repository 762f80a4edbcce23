//! Public interface to the Duolock core library, linked by both server and
//! client executables.
//!
//! Duolock is a named-lock service replicated on a primary/backup pair. The
//! primary applies every Lock/Unlock call locally and forwards the applied
//! change to the backup before replying; if the backup cannot be reached,
//! the primary demotes itself and stops forwarding.

#[macro_use]
mod utils;

mod client;
mod server;

// Helper utilities, functions, and macros
pub use crate::utils::{logger_init, DuolockError, ME};

// Server-side lock service
pub use crate::server::{
    BackupLink, CallerId, LocalBackupLink, LockArgs, LockRecord, LockReplica,
    LockReply, LockRequest, LockServer, RpcHandle, ServerConfig, ServerRole,
    TcpBackupLink, Timestamp,
};

// Client-side proxy
pub use crate::client::{Clerk, ClerkConfig};
