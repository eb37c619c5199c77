use serde::{Deserialize, Serialize};

use vigil_store::{load_state, persist_state, StateKey};
use vigil_store_lmdb::LmdbEnvironment;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Schedule {
    last_height_seen: u64,
    ids: Vec<String>,
}

#[test]
fn snapshot_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let schedule = Schedule {
        last_height_seen: 42,
        ids: vec!["a".into(), "b".into()],
    };

    {
        let env = LmdbEnvironment::open(dir.path(), 10 * 1024 * 1024).unwrap();
        persist_state(&env, StateKey::TaskManager, &schedule).unwrap();
    }

    let env = LmdbEnvironment::open(dir.path(), 10 * 1024 * 1024).unwrap();
    let loaded: Option<Schedule> = load_state(&env, StateKey::TaskManager).unwrap();
    assert_eq!(loaded, Some(schedule));
}

#[test]
fn later_snapshot_replaces_earlier() {
    let dir = tempfile::tempdir().unwrap();
    let env = LmdbEnvironment::open(dir.path(), 10 * 1024 * 1024).unwrap();

    persist_state(&env, StateKey::TxWatcher, &1u64).unwrap();
    persist_state(&env, StateKey::TxWatcher, &2u64).unwrap();

    let loaded: Option<u64> = load_state(&env, StateKey::TxWatcher).unwrap();
    assert_eq!(loaded, Some(2));
}
