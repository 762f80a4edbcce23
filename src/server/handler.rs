//! Lock and Unlock protocol handlers.
//!
//! Every request runs its whole read-decide-mutate-forward sequence inside
//! one critical section per server process, including the round trip to the
//! backup when running as primary. Retransmitted client calls are recognized
//! by comparing `(caller_id, tstamp)` against the recorded holder, releaser,
//! and timestamps, so redelivery never duplicates a side effect.

use crate::server::{
    BackupLink, LockArgs, LockRecord, LockReply, LockRequest, LockTable,
    ServerRole,
};

use tokio::sync::Mutex;

/// Outcome of judging one request against the current lock record.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum Decision {
    /// Valid new transition: mutate the record (and forward if primary).
    Apply,

    /// Duplicate of a call already applied by this caller: reply success,
    /// change nothing.
    Replay,

    /// Lock held by someone else, or request stale/out of order.
    Deny,
}

impl Decision {
    /// Boolean reply seen by the caller.
    #[inline]
    pub(crate) fn ok(self) -> bool {
        !matches!(self, Decision::Deny)
    }
}

/// Judges a Lock call. A call is refused if the lock is held by another
/// caller, or if its timestamp does not come after the latest recorded
/// unlock; the refusal turns into an idempotent success when the caller's
/// own lock was followed only by its own unlock. Re-locking by the current
/// holder with a fresh timestamp is granted again.
pub(crate) fn decide_lock(record: &LockRecord, args: &LockArgs) -> Decision {
    let held_by_other = record.held && args.caller_id != record.holder;
    if held_by_other || args.tstamp <= record.unlock_ts {
        if args.caller_id == record.releaser && args.caller_id == record.holder
        {
            Decision::Replay
        } else {
            Decision::Deny
        }
    } else {
        Decision::Apply
    }
}

/// Judges an Unlock call. A held lock is released by a caller other than the
/// latest releaser whose timestamp is not older than the latest grant; the
/// latest releaser repeating itself gets an idempotent success.
pub(crate) fn decide_unlock(record: &LockRecord, args: &LockArgs) -> Decision {
    if record.held
        && args.caller_id != record.releaser
        && args.tstamp >= record.lock_ts
    {
        Decision::Apply
    } else if args.caller_id == record.releaser {
        Decision::Replay
    } else {
        Decision::Deny
    }
}

/// State guarded by the server's single critical section.
struct ServerState {
    /// Current role; only ever changes from primary to secondary.
    role: ServerRole,

    /// All lock records of this process.
    table: LockTable,

    /// Link to the backup; only used while primary.
    backup: Option<Box<dyn BackupLink>>,
}

impl ServerState {
    /// Forwards an applied request to the backup if I am primary and the
    /// request did not itself come from a primary. Demotes me to secondary
    /// if the backup cannot be reached; the caller's reply is unaffected.
    async fn replicate(&mut self, req: &LockRequest) {
        if self.role != ServerRole::Primary || req.args().forwarded {
            return;
        }

        let fwd = req.to_forwarded();
        let result = match self.backup.as_mut() {
            Some(link) => link.forward(&fwd).await,
            None => Err(crate::DuolockError::msg("no backup configured")),
        };

        match result {
            Ok(true) => {
                pf_trace!("forwarded {}", fwd);
            }
            Ok(false) => {
                pf_warn!("backup refused forwarded {}", fwd);
            }
            Err(e) => {
                pf_warn!("forwarding {} failed: {}", fwd, e);
                self.role = self.role.demote();
                pf_warn!("demoted myself to {}", self.role);
            }
        }
    }
}

/// Lock service request handler of one server process.
pub struct LockServer {
    state: Mutex<ServerState>,
}

impl LockServer {
    /// Creates a lock server with an empty lock table. A primary needs a
    /// backup link; without one it demotes itself on its first forward.
    pub fn new(role: ServerRole, backup: Option<Box<dyn BackupLink>>) -> Self {
        LockServer {
            state: Mutex::new(ServerState {
                role,
                table: LockTable::new(),
                backup,
            }),
        }
    }

    /// Lock RPC handler. Returns whether the lock is granted.
    pub async fn lock(&self, args: LockArgs) -> bool {
        self.handle(LockRequest::Lock(args)).await.ok
    }

    /// Unlock RPC handler. Returns whether the lock is released.
    pub async fn unlock(&self, args: LockArgs) -> bool {
        self.handle(LockRequest::Unlock(args)).await.ok
    }

    /// Dispatches one request through the critical section.
    pub async fn handle(&self, req: LockRequest) -> LockReply {
        let mut state = self.state.lock().await;
        pf_debug!("{} on {}", req, state.role);

        let args = req.args();
        let record = state.table.get(&args.lock_name);
        let decision = match req {
            LockRequest::Lock(_) => decide_lock(&record, args),
            LockRequest::Unlock(_) => decide_unlock(&record, args),
        };

        if decision == Decision::Apply {
            let record = state.table.entry(&args.lock_name);
            match req {
                LockRequest::Lock(_) => {
                    record.held = true;
                    record.holder = args.caller_id;
                    record.lock_ts = args.tstamp;
                    pf_debug!(
                        "LOCKING[{}] for {}",
                        args.lock_name,
                        args.caller_id
                    );
                }
                LockRequest::Unlock(_) => {
                    record.held = false;
                    record.releaser = args.caller_id;
                    record.unlock_ts = args.tstamp;
                    pf_debug!(
                        "UNLOCKING[{}] by {}",
                        args.lock_name,
                        args.caller_id
                    );
                }
            }
            state.replicate(&req).await;
        }

        LockReply { ok: decision.ok() }
    }

    /// Current role of this server.
    pub async fn role(&self) -> ServerRole {
        self.state.lock().await.role
    }

    /// Current record of the named lock.
    pub async fn record(&self, name: &str) -> LockRecord {
        self.state.lock().await.table.get(name)
    }

    /// All touched lock records, sorted by name.
    pub async fn snapshot(&self) -> Vec<(String, LockRecord)> {
        self.state.lock().await.table.snapshot()
    }
}
