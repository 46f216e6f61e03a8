//! Quota gate accounting against the sled store

use examgen::quota::{QuotaGate, QuotaStore, SledQuotaStore};
use examgen::types::UserId;
use std::sync::Arc;
use tempfile::TempDir;

fn sled_gate(temp_dir: &TempDir) -> (sled::Db, QuotaGate) {
    let db = sled::open(temp_dir.path().join("db")).unwrap();
    let store: Arc<dyn QuotaStore> = Arc::new(SledQuotaStore::new(&db).unwrap());
    (db, QuotaGate::new(store))
}

#[test]
fn test_consume_stops_at_zero() {
    let temp_dir = TempDir::new().unwrap();
    let (_db, gate) = sled_gate(&temp_dir);
    let user = UserId::new("lee");
    gate.set(&user, 2).unwrap();

    assert!(gate.consume(&user).unwrap());
    assert!(gate.consume(&user).unwrap());
    assert!(!gate.consume(&user).unwrap());
    assert_eq!(gate.check_available(&user).unwrap(), 0);
}

#[test]
fn test_racing_consumers_never_overdraw() {
    let temp_dir = TempDir::new().unwrap();
    let (_db, gate) = sled_gate(&temp_dir);
    let user = UserId::new("max");
    gate.set(&user, 10).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let gate = gate.clone();
            let user = user.clone();
            std::thread::spawn(move || gate.consume(&user).unwrap())
        })
        .collect();
    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|consumed| *consumed)
        .count();

    assert_eq!(successes, 10);
    assert_eq!(gate.check_available(&user).unwrap(), 0);
}

#[test]
fn test_grant_adds_to_balance_and_persists() {
    let temp_dir = TempDir::new().unwrap();
    let user = UserId::new("nia");
    {
        let (db, gate) = sled_gate(&temp_dir);
        assert_eq!(gate.grant(&user, 3).unwrap(), 3);
        assert_eq!(gate.grant(&user, 2).unwrap(), 5);
        db.flush().unwrap();
    }
    let (_db, gate) = sled_gate(&temp_dir);
    assert_eq!(gate.check_available(&user).unwrap(), 5);
}
