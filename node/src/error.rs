use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logging error: {0}")]
    Logging(String),

    #[error("store error: {0}")]
    Store(#[from] vigil_store::StoreError),

    #[error("LMDB error: {0}")]
    Lmdb(#[from] vigil_store_lmdb::LmdbError),

    #[error("watcher error: {0}")]
    Watcher(#[from] vigil_watcher::WatcherError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] vigil_executor::SchedulerError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
