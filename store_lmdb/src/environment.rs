//! LMDB environment setup.

use std::path::{Path, PathBuf};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};

use vigil_store::{KvStore, ReadTxn, StoreError, WriteTxn};

use crate::LmdbError;

/// Name of the database holding component snapshots.
const STATE_DB: &str = "state";

/// Default map size: 1 GiB.
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// Wraps the LMDB environment and the state database handle.
pub struct LmdbEnvironment {
    env: Env,
    state_db: Database<Bytes, Bytes>,
    path: PathBuf,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment at the given directory.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;
        // SAFETY: the environment is opened once per directory for the lifetime of the node;
        // no other handle in this process maps the same files.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(4)
                .open(path)?
        };
        let mut wtxn = env.write_txn()?;
        let state_db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some(STATE_DB))?;
        wtxn.commit()?;
        tracing::info!(path = %path.display(), map_size, "LMDB environment opened");
        Ok(Self {
            env,
            state_db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct LmdbReadTxn<'a, 'e> {
    txn: &'a RoTxn<'e>,
    db: Database<Bytes, Bytes>,
}

impl ReadTxn for LmdbReadTxn<'_, '_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.db.get(self.txn, key).map_err(LmdbError::from)?;
        Ok(value.map(<[u8]>::to_vec))
    }
}

struct LmdbWriteTxn<'a, 'e> {
    txn: &'a mut RwTxn<'e>,
    db: Database<Bytes, Bytes>,
}

impl ReadTxn for LmdbWriteTxn<'_, '_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.db.get(&*self.txn, key).map_err(LmdbError::from)?;
        Ok(value.map(<[u8]>::to_vec))
    }
}

impl WriteTxn for LmdbWriteTxn<'_, '_> {
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db
            .put(self.txn, key, value)
            .map_err(LmdbError::from)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.db.delete(self.txn, key).map_err(LmdbError::from)?;
        Ok(())
    }
}

impl KvStore for LmdbEnvironment {
    fn view(
        &self,
        f: &mut dyn FnMut(&dyn ReadTxn) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        f(&LmdbReadTxn {
            txn: &rtxn,
            db: self.state_db,
        })
    }

    fn update(
        &self,
        f: &mut dyn FnMut(&mut dyn WriteTxn) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let result = f(&mut LmdbWriteTxn {
            txn: &mut wtxn,
            db: self.state_db,
        });
        match result {
            Ok(()) => {
                wtxn.commit().map_err(LmdbError::from)?;
                Ok(())
            }
            Err(e) => {
                wtxn.abort();
                Err(e)
            }
        }
    }

    fn sync(&self) -> Result<(), StoreError> {
        self.env.force_sync().map_err(LmdbError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_env() -> (tempfile::TempDir, LmdbEnvironment) {
        let dir = tempfile::tempdir().unwrap();
        let env = LmdbEnvironment::open(dir.path(), 10 * 1024 * 1024).unwrap();
        (dir, env)
    }

    fn read(env: &LmdbEnvironment, key: &[u8]) -> Option<Vec<u8>> {
        let mut out = None;
        env.view(&mut |txn| {
            out = txn.get(key)?;
            Ok(())
        })
        .unwrap();
        out
    }

    #[test]
    fn set_get_delete() {
        let (_dir, env) = temp_env();
        env.update(&mut |txn| txn.set(b"k", b"v")).unwrap();
        assert_eq!(read(&env, b"k"), Some(b"v".to_vec()));

        env.update(&mut |txn| txn.delete(b"k")).unwrap();
        assert_eq!(read(&env, b"k"), None);
    }

    #[test]
    fn failed_update_is_rolled_back() {
        let (_dir, env) = temp_env();
        let err = env
            .update(&mut |txn| {
                txn.set(b"k", b"v")?;
                Err(StoreError::Corruption("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Corruption(_)));
        assert_eq!(read(&env, b"k"), None);
    }

    #[test]
    fn write_txn_reads_its_own_writes() {
        let (_dir, env) = temp_env();
        env.update(&mut |txn| {
            txn.set(b"a", b"1")?;
            assert_eq!(txn.get(b"a")?, Some(b"1".to_vec()));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn sync_succeeds() {
        let (_dir, env) = temp_env();
        env.update(&mut |txn| txn.set(b"k", b"v")).unwrap();
        env.sync().unwrap();
    }
}
