use std::sync::Arc;
use std::time::Duration;

use rmdb::common::{DbError, Result, Rid};
use rmdb::{LockManager, LockMode, LockObject};

fn row(slot: u32) -> LockObject {
    LockObject::Row(1, Rid::new(1, slot))
}

#[test]
fn test_shared_locks_are_compatible() -> Result<()> {
    let locks = LockManager::new(Duration::from_millis(200));
    locks.lock(1, &row(0), LockMode::S)?;
    locks.lock(2, &row(0), LockMode::S)?;
    locks.unlock_all(1, &[row(0)]);
    locks.unlock_all(2, &[row(0)]);
    Ok(())
}

#[test]
fn test_exclusive_blocks_shared() -> Result<()> {
    let locks = LockManager::new(Duration::from_millis(100));
    locks.lock(1, &row(0), LockMode::X)?;
    assert!(!locks.try_lock(2, &row(0), LockMode::S));
    match locks.lock(2, &row(0), LockMode::S) {
        Err(DbError::LockTimeout) => {}
        other => panic!("expected LockTimeout, got {:?}", other),
    }
    locks.unlock_all(1, &[row(0)]);
    // Released: now grantable.
    locks.lock(2, &row(0), LockMode::S)?;
    locks.unlock_all(2, &[row(0)]);
    Ok(())
}

#[test]
fn test_intent_modes_follow_matrix() -> Result<()> {
    let locks = LockManager::new(Duration::from_millis(100));
    let table = LockObject::Table(1);
    locks.lock(1, &table, LockMode::IS)?;
    locks.lock(2, &table, LockMode::IX)?;
    locks.lock(3, &table, LockMode::IS)?;
    // S is incompatible with a held IX.
    assert!(!locks.try_lock(4, &table, LockMode::S));
    locks.unlock_all(2, &[table.clone()]);
    assert!(locks.try_lock(4, &table, LockMode::S));
    locks.unlock_all(1, &[table.clone()]);
    locks.unlock_all(3, &[table.clone()]);
    locks.unlock_all(4, &[table]);
    Ok(())
}

#[test]
fn test_upgrade_sole_holder() -> Result<()> {
    let locks = LockManager::new(Duration::from_millis(100));
    locks.lock(1, &row(0), LockMode::S)?;
    // Sole holder: S -> X upgrade succeeds immediately.
    locks.lock(1, &row(0), LockMode::X)?;
    assert!(!locks.try_lock(2, &row(0), LockMode::S));
    locks.unlock_all(1, &[row(0)]);
    Ok(())
}

#[test]
fn test_upgrade_waits_for_other_readers() -> Result<()> {
    let locks = Arc::new(LockManager::new(Duration::from_millis(2000)));
    locks.lock(1, &row(0), LockMode::S)?;
    locks.lock(2, &row(0), LockMode::S)?;

    let locks2 = Arc::clone(&locks);
    let upgrader = std::thread::spawn(move || locks2.lock(1, &row(0), LockMode::X));

    std::thread::sleep(Duration::from_millis(100));
    locks.unlock_all(2, &[row(0)]);
    upgrader
        .join()
        .map_err(|_| DbError::Other("thread panicked".to_string()))??;
    locks.unlock_all(1, &[row(0)]);
    Ok(())
}

#[test]
fn test_fifo_no_bypass() -> Result<()> {
    let locks = Arc::new(LockManager::new(Duration::from_millis(2000)));
    locks.lock(1, &row(0), LockMode::S)?;

    // Txn 2 queues an X behind the S; a later S from txn 3 must not jump it.
    let locks2 = Arc::clone(&locks);
    let writer = std::thread::spawn(move || locks2.lock(2, &row(0), LockMode::X));
    std::thread::sleep(Duration::from_millis(100));
    assert!(!locks.try_lock(3, &row(0), LockMode::S));

    locks.unlock_all(1, &[row(0)]);
    writer
        .join()
        .map_err(|_| DbError::Other("thread panicked".to_string()))??;
    locks.unlock_all(2, &[row(0)]);
    Ok(())
}

#[test]
fn test_deadlock_detection_aborts_youngest() -> Result<()> {
    let locks = Arc::new(LockManager::new(Duration::from_millis(5000)));

    locks.lock(1, &row(1), LockMode::X)?;
    locks.lock(2, &row(2), LockMode::X)?;

    // Txn 1 waits for row 2.
    let locks1 = Arc::clone(&locks);
    let t1 = std::thread::spawn(move || {
        let r = locks1.lock(1, &row(2), LockMode::X);
        if r.is_ok() {
            locks1.unlock_all(1, &[row(1), row(2)]);
        }
        r
    });
    std::thread::sleep(Duration::from_millis(100));

    // Txn 2 closes the cycle: it is the youngest, so it is the victim.
    let result = locks.lock(2, &row(1), LockMode::X);
    match result {
        Err(DbError::DeadlockVictim) => {}
        other => panic!("expected DeadlockVictim, got {:?}", other),
    }
    locks.unlock_all(2, &[row(2)]);

    t1.join()
        .map_err(|_| DbError::Other("thread panicked".to_string()))??;
    Ok(())
}
