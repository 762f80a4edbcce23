//! End-to-end tests of a primary/backup pair over TCP.

use std::net::SocketAddr;
use std::sync::Arc;

use duolock::{
    Clerk, DuolockError, LocalBackupLink, LockArgs, LockRecord, LockReplica,
    LockServer, ServerRole,
};

use futures::future::join_all;

use rand::Rng;

use tokio::time::{self, Duration};

/// Starts a backup then a primary forwarding to it, both on ephemeral ports.
async fn start_pair(
    primary_config: Option<&str>,
) -> Result<(LockReplica, LockReplica), DuolockError> {
    let any: SocketAddr = "127.0.0.1:0".parse()?;
    let backup = LockReplica::new_and_setup(any, any, false, None).await?;
    let primary = LockReplica::new_and_setup(
        any,
        backup.local_addr(),
        true,
        primary_config,
    )
    .await?;
    Ok((primary, backup))
}

fn new_clerk(
    primary: &LockReplica,
    backup: &LockReplica,
) -> Result<Clerk, DuolockError> {
    Clerk::new(
        primary.local_addr(),
        backup.local_addr(),
        Some("rpc_timeout_ms = 500"),
    )
}

/// Grabs a port nobody is listening on.
async fn dead_addr() -> Result<SocketAddr, DuolockError> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_replicated() -> Result<(), DuolockError> {
    let (primary, backup) = start_pair(None).await?;
    let mut c1 = new_clerk(&primary, &backup)?;
    let mut c2 = new_clerk(&primary, &backup)?;

    assert!(c1.lock("A").await?);
    assert!(!c2.lock("A").await?);
    assert!(c1.unlock("A").await?);
    assert!(c2.lock("A").await?);

    assert!(!c1.failed_over());
    assert_eq!(primary.server().role().await, ServerRole::Primary);
    let record = backup.server().record("A").await;
    assert!(record.held);
    assert_eq!(record.holder, c2.id());
    assert_eq!(record.releaser, c1.id());
    assert_eq!(
        primary.server().snapshot().await,
        backup.server().snapshot().await
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unlock_never_locked() -> Result<(), DuolockError> {
    let (primary, backup) = start_pair(None).await?;
    let mut c1 = new_clerk(&primary, &backup)?;
    assert!(!c1.unlock("A").await?);
    assert!(backup.server().snapshot().await.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn convergence_many_locks() -> Result<(), DuolockError> {
    let (primary, backup) = start_pair(None).await?;
    let mut clerks = vec![];
    for _ in 0..3 {
        clerks.push(new_clerk(&primary, &backup)?);
    }
    let names = ["a", "b", "c", "d"];

    for _ in 0..60 {
        let (ci, ni, lock) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(0..clerks.len()),
                rng.gen_range(0..names.len()),
                rng.gen_bool(0.5),
            )
        };
        let clerk = &mut clerks[ci];
        if lock {
            clerk.lock(names[ni]).await?;
        } else {
            clerk.unlock(names[ni]).await?;
        }
    }

    assert_eq!(primary.server().role().await, ServerRole::Primary);
    assert_eq!(
        primary.server().snapshot().await,
        backup.server().snapshot().await
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_contention() -> Result<(), DuolockError> {
    let (primary, backup) = start_pair(None).await?;
    let mut clerks = vec![];
    for _ in 0..8 {
        clerks.push(new_clerk(&primary, &backup)?);
    }

    let results = join_all(
        clerks
            .iter_mut()
            .map(|clerk| async move { clerk.lock("hot").await }),
    )
    .await;
    let mut granted = 0;
    for result in results {
        if result? {
            granted += 1;
        }
    }
    assert_eq!(granted, 1);
    assert_eq!(
        primary.server().snapshot().await,
        backup.server().snapshot().await
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn demote_when_backup_unreachable() -> Result<(), DuolockError> {
    let any: SocketAddr = "127.0.0.1:0".parse()?;
    let backup_addr = dead_addr().await?;
    let primary = LockReplica::new_and_setup(
        any,
        backup_addr,
        true,
        Some("forward_timeout_ms = 300"),
    )
    .await?;
    let server = primary.server();

    // the locally decided result still reaches the caller
    assert!(server.lock(LockArgs::new("A", 1, 10)).await);
    assert_eq!(server.role().await, ServerRole::Secondary);

    // a backup showing up later gets nothing forwarded anymore
    let late_backup =
        LockReplica::new_and_setup(any, backup_addr, false, None).await?;
    assert!(server.unlock(LockArgs::new("A", 1, 11)).await);
    assert!(late_backup.server().snapshot().await.is_empty());
    assert_eq!(
        server.record("A").await,
        LockRecord {
            held: false,
            holder: 1,
            releaser: 1,
            lock_ts: 10,
            unlock_ts: 11,
        }
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clerk_fails_over_on_kill() -> Result<(), DuolockError> {
    let (mut primary, backup) = start_pair(None).await?;
    let mut c1 = new_clerk(&primary, &backup)?;
    let mut c2 = new_clerk(&primary, &backup)?;

    assert!(c1.lock("A").await?);
    primary.kill().await?;

    // backup already knows c1 holds A
    assert!(!c2.lock("A").await?);
    assert!(c2.failed_over());
    assert!(c1.unlock("A").await?);
    assert!(c1.failed_over());
    assert!(c2.lock("A").await?);
    assert_eq!(backup.server().record("A").await.holder, c2.id());
    assert_eq!(backup.server().role().await, ServerRole::Secondary);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clerk_retries_on_deaf_primary() -> Result<(), DuolockError> {
    let (primary, backup) = start_pair(Some("deaf_linger_ms = 1500")).await?;
    let mut c1 = new_clerk(&primary, &backup)?;
    let mut c2 = new_clerk(&primary, &backup)?;

    assert!(c1.lock("A").await?);
    assert!(c1.unlock("A").await?);

    // primary applies and forwards the lock but the reply never arrives;
    // the retry at the backup is recognized and granted again
    primary.deafen();
    assert!(c2.lock("A").await?);
    assert!(c2.failed_over());
    assert_eq!(backup.server().record("A").await.holder, c2.id());

    // the primary stopped listening, so c1 fails over too
    assert!(!c1.lock("A").await?);
    assert!(c2.unlock("A").await?);
    assert!(!backup.server().record("A").await.held);

    time::sleep(Duration::from_millis(1600)).await;
    assert!(primary.is_dead());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn local_link_convergence() -> Result<(), DuolockError> {
    let backup = Arc::new(LockServer::new(ServerRole::Secondary, None));
    let primary = LockServer::new(
        ServerRole::Primary,
        Some(Box::new(LocalBackupLink::new(backup.clone()))),
    );

    let mut ts = 0;
    for _ in 0..200 {
        let (caller, name, lock) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(1..=3u64),
                ["x", "y"][rng.gen_range(0..2)],
                rng.gen_bool(0.5),
            )
        };
        ts += 1;
        let args = LockArgs::new(name, caller, ts);
        if lock {
            primary.lock(args).await;
        } else {
            primary.unlock(args).await;
        }
    }

    assert_eq!(primary.role().await, ServerRole::Primary);
    assert_eq!(primary.snapshot().await, backup.snapshot().await);
    Ok(())
}
