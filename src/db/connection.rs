use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::{Connection, Transaction};
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const WORKER_THREAD_NAME: &str = "copilot-db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Request {
    Run(Job),
    Stop,
}

struct Worker {
    requests: mpsc::Sender<Request>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };

        if self.requests.send(Request::Stop).is_err() {
            warn!("Database worker already gone at shutdown");
        }
        if let Err(err) = handle.join() {
            error!("Database worker panicked: {err:?}");
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;

    // Failing pragmas leave a usable connection; only the migrations are fatal.
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("Failed to enable WAL mode: {err}");
    }
    if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
        error!("Failed to enable foreign keys: {err}");
    }
    if let Err(err) = conn.busy_timeout(BUSY_TIMEOUT) {
        error!("Failed to set busy timeout: {err}");
    }

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn serve(mut conn: Connection, requests: mpsc::Receiver<Request>) {
    while let Ok(request) = requests.recv() {
        match request {
            Request::Run(job) => job(&mut conn),
            Request::Stop => break,
        }
    }
    info!("Database worker stopped");
}

/// SQLite handle. A single worker thread owns the connection and runs
/// submitted closures in order; clones share that worker.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and migrates it to
    /// the current schema before returning.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (requests_tx, requests_rx) = mpsc::channel::<Request>();
        let (opened_tx, opened_rx) = mpsc::channel::<Result<()>>();
        let thread_path = path.clone();

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || match open_connection(&thread_path) {
                Ok(conn) => {
                    if opened_tx.send(Ok(())).is_ok() {
                        serve(conn, requests_rx);
                    }
                }
                Err(err) => {
                    let _ = opened_tx.send(Err(err));
                }
            })
            .context("failed to spawn database worker thread")?;

        opened_rx
            .recv()
            .context("database worker exited before opening the connection")??;

        info!("Database ready at {}", path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                requests: requests_tx,
                thread: Mutex::new(Some(thread)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Runs `task` on the worker thread and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let job: Job = Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                warn!("Database caller went away before its result arrived");
            }
        });

        self.worker
            .requests
            .send(Request::Run(job))
            .map_err(|_| anyhow!("database worker is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the request"))?
    }

    /// Like [`execute`](Self::execute), inside a transaction that commits
    /// only when `task` succeeds.
    pub async fn transaction<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to begin transaction")?;
            let value = task(&tx)?;
            tx.commit().context("failed to commit transaction")?;
            Ok(value)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn failed_transaction_rolls_back() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("nested").join("copilot.db")).unwrap();
        assert!(db.path().exists());

        let result: Result<()> = db
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO recovery_flags (key, value, updated_at)
                     VALUES ('scratch', 1, 'now')",
                    [],
                )?;
                Err(anyhow!("abort"))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = db
            .execute(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM recovery_flags", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
