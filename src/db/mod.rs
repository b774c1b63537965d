use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tokio::task;

use crate::error::{Result, XkgError};

pub mod migrate;

// WAL lets job-status readers proceed while a pipeline persists a graph.
const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA foreign_keys = ON; \
     PRAGMA temp_store = MEMORY; \
     PRAGMA busy_timeout = 5000;";

/// Database connection wrapper
#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection with the standard pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        open_with_pragmas(&self.path)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = open_with_pragmas(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| XkgError::Persistence(format!("database task failed: {}", e)))?
    }

    /// Apply pending migrations from `migrations_dir`; returns how many ran
    pub async fn migrate(&self, migrations_dir: &Path) -> Result<usize> {
        let dir = migrations_dir.to_path_buf();
        let applied = self
            .with_connection(move |conn| migrate::run_migrations(conn, &dir))
            .await?;
        if applied > 0 {
            log::info!("{} migrations applied to {}", applied, self.path.display());
        }
        Ok(applied)
    }
}

fn open_with_pragmas(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(XkgError::Database)?;
    conn.execute_batch(CONNECTION_PRAGMAS)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_migrate_creates_file_and_is_repeatable() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested.db");
        let db = Db::new(&db_path);
        let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");

        assert_eq!(db.migrate(&migrations).await.unwrap(), 2);
        assert_eq!(db.migrate(&migrations).await.unwrap(), 0);
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_pragmas_set() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("test.db"));

        db.with_connection(|conn| {
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            assert_eq!(journal_mode.to_uppercase(), "WAL");

            let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
            assert_eq!(foreign_keys, 1);

            Ok::<(), XkgError>(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_closure_error_propagates() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("test.db"));

        let result: Result<()> = db
            .with_connection(|_conn| Err(XkgError::Persistence("boom".to_string())))
            .await;

        assert!(matches!(result, Err(XkgError::Persistence(msg)) if msg == "boom"));
    }
}
