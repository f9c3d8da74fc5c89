//! Serialized write path. One dedicated thread owns all mutations; each job
//! runs inside an immediate transaction, so a multi-statement batch commits
//! or rolls back as a unit and concurrent writers never trip SQLITE_BUSY
//! against each other.

use std::sync::mpsc;
use std::thread;

use diesel::sqlite::SqliteConnection;
use log::error;

use fieldbook_core::StorageError;

use crate::db::DbPool;
use crate::errors::DriverError;

type WriteJob = Box<dyn FnOnce(&mut SqliteConnection) + Send>;

#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::Sender<WriteJob>,
}

/// Start the writer thread. The handle is cheap to clone; dropping every
/// clone shuts the thread down.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, rx) = mpsc::channel::<WriteJob>();
    thread::spawn(move || {
        while let Ok(job) = rx.recv() {
            match pool.get() {
                Ok(mut conn) => job(&mut conn),
                // The job's reply channel drops with it; the caller sees an
                // error rather than a hang.
                Err(err) => error!("Write job dropped, no database connection: {}", err),
            }
        }
    });
    WriteHandle { tx }
}

impl WriteHandle {
    /// Run `job` on the writer thread inside an immediate transaction and
    /// await its result. An `Err` from the job rolls the transaction back.
    pub async fn exec<T, F>(&self, job: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
    {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let boxed: WriteJob = Box::new(move |conn| {
            let result: Result<T, DriverError> =
                conn.immediate_transaction(|tx| job(tx).map_err(DriverError::from));
            let _ = done_tx.send(result.map_err(StorageError::from));
        });
        self.tx
            .send(boxed)
            .map_err(|_| StorageError::backend("database writer has shut down"))?;
        done_rx
            .await
            .map_err(|_| StorageError::backend("database writer dropped the job"))?
    }
}
