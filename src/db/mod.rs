mod models;
mod task_repository;

use crate::errors::Error;
use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use models::*;
pub use task_repository::*;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    command TEXT NOT NULL,
    working_dir TEXT NOT NULL,
    status TEXT NOT NULL,
    pid INTEGER,
    process_start BIGINT,
    wait_for_id INTEGER,
    created_at BIGINT NOT NULL,
    started_at BIGINT,
    completed_at BIGINT,
    exit_code INTEGER
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status);
CREATE INDEX IF NOT EXISTS idx_tasks_pid ON tasks (pid);
";

/// Per-connection pragmas so independent processes can share the file
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;",
            self.busy_timeout.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[derive(Clone, Debug)]
pub struct Database {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
}

impl Database {
    /// Opens (creating if needed) the task store at `db_path`
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path of the SQLite file
    /// * `busy_timeout` - How long a writer waits on a locked database
    ///
    /// # Errors
    ///
    /// Returns an Error if the pool cannot be built or the schema cannot be created
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self, Error> {
        let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(4)
            .connection_customizer(Box::new(ConnectionOptions { busy_timeout }))
            .build(manager)?;

        let database = Database {
            pool: Arc::new(pool),
        };
        database.get_conn()?.batch_execute(SCHEMA)?;
        debug!("Opened task store at {}", db_path.display());
        Ok(database)
    }

    pub fn get_conn(&self) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, Error> {
        Ok(self.pool.get()?)
    }
}
