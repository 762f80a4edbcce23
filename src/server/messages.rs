//! Lock service RPC message types, shared by servers and clerks.

use std::fmt;

use crate::server::{CallerId, Timestamp};

use serde::{Deserialize, Serialize};

/// Arguments carried by both Lock and Unlock calls.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct LockArgs {
    /// Name of the lock.
    pub lock_name: String,

    /// Identity of the calling client, stable across its retries.
    pub caller_id: CallerId,

    /// Caller's logical timestamp for this attempt.
    pub tstamp: Timestamp,

    /// Set if this call was re-issued by a primary to its backup.
    pub forwarded: bool,
}

impl LockArgs {
    /// Composes arguments of a fresh (non-forwarded) client call.
    pub fn new(
        lock_name: impl Into<String>,
        caller_id: CallerId,
        tstamp: Timestamp,
    ) -> Self {
        LockArgs {
            lock_name: lock_name.into(),
            caller_id,
            tstamp,
            forwarded: false,
        }
    }
}

/// Request sent to a lock server.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum LockRequest {
    /// Acquire the named lock.
    Lock(LockArgs),

    /// Release the named lock.
    Unlock(LockArgs),
}

impl LockRequest {
    /// Returns the arguments of this request.
    pub fn args(&self) -> &LockArgs {
        match self {
            LockRequest::Lock(args) | LockRequest::Unlock(args) => args,
        }
    }

    /// Returns a copy of this request marked as forwarded.
    pub fn to_forwarded(&self) -> Self {
        let mut req = self.clone();
        match req {
            LockRequest::Lock(ref mut args)
            | LockRequest::Unlock(ref mut args) => args.forwarded = true,
        }
        req
    }
}

impl fmt::Display for LockRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (op, args) = match self {
            LockRequest::Lock(args) => ("LOCK", args),
            LockRequest::Unlock(args) => ("UNLOCK", args),
        };
        write!(
            f,
            "{}[{}] from {} at {} fwd {}",
            op, args.lock_name, args.caller_id, args.tstamp, args.forwarded
        )
    }
}

/// Reply to a Lock or Unlock call: `ok` is `granted` for Lock and `released`
/// for Unlock.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct LockReply {
    pub ok: bool,
}

#[cfg(test)]
mod messages_tests {
    use super::*;

    #[test]
    fn forwarded_copy() {
        let req = LockRequest::Unlock(LockArgs::new("A", 4, 17));
        let fwd = req.to_forwarded();
        assert!(!req.args().forwarded);
        assert!(fwd.args().forwarded);
        assert_eq!(fwd.args().lock_name, "A");
        assert_eq!(fwd.args().caller_id, 4);
        assert_eq!(fwd.args().tstamp, 17);
        assert!(matches!(fwd, LockRequest::Unlock(_)));
    }

    #[test]
    fn display_request() {
        let req = LockRequest::Lock(LockArgs::new("A", 1, 10));
        assert_eq!(format!("{}", req), "LOCK[A] from 1 at 10 fwd false");
    }

    #[test]
    fn msgpack_encoding() -> Result<(), crate::DuolockError> {
        let req = LockRequest::Lock(LockArgs::new("printer", 9, 3));
        let bytes = rmp_serde::to_vec(&req)?;
        let decoded: LockRequest = rmp_serde::from_slice(&bytes)?;
        assert_eq!(decoded, req);
        Ok(())
    }
}
