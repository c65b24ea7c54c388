use crate::config::Config;
use anyhow::Result;
use libsql::{Builder, Connection, Database as LibsqlDatabase};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[("001_users.sql", include_str!("migrations/001_users.sql"))];

pub struct Database {
    _db: LibsqlDatabase,
    conn: Connection,
    tx_lock: Mutex<()>,
    in_tx: AtomicBool,
}

impl Database {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    pub async fn new(cfg: &Config, data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(cfg.app.get_db());
        tracing::info!(path = ?path, "[db] opening local database");
        let db = Builder::new_local(&path).build().await?;
        Self::setup(db).await
    }

    /// Opens a private in-memory database with all migrations applied.
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::setup(db).await
    }

    async fn setup(db: LibsqlDatabase) -> Result<Self> {
        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;

        for (filename, sql) in SYSTEM_MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        for (filename, sql) in MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        for (filename, sql) in crate::catalog::migrations() {
            Self::run_migration(&conn, filename, sql).await?;
        }

        for (filename, sql) in crate::ledger::migrations() {
            Self::run_migration(&conn, filename, sql).await?;
        }

        Ok(Database {
            _db: db,
            conn,
            tx_lock: Mutex::new(()),
            in_tx: AtomicBool::new(false),
        })
    }

    /// Starts a serialized write transaction.
    ///
    /// Only one unit of work is open at a time. Raw reads on
    /// [`Database::connection`] see whatever the open unit has written so
    /// far; reads through [`Database::snapshot`] do not.
    pub async fn begin(&self) -> Result<UnitOfWork<'_>> {
        let guard = self.tx_lock.lock().await;
        self.discard_abandoned().await;

        self.conn.execute("BEGIN IMMEDIATE", ()).await?;
        self.in_tx.store(true, Ordering::SeqCst);

        Ok(UnitOfWork {
            conn: &self.conn,
            in_tx: &self.in_tx,
            _guard: guard,
        })
    }

    /// Connection view that only sees committed state.
    ///
    /// Waits for any running unit of work and rolls back one whose future
    /// was dropped, so partial writes are never observed. Holding the
    /// snapshot blocks writers; keep it short.
    pub async fn snapshot(&self) -> Snapshot<'_> {
        let guard = self.tx_lock.lock().await;
        self.discard_abandoned().await;
        Snapshot {
            conn: &self.conn,
            _guard: guard,
        }
    }

    /// Must be called with `tx_lock` held.
    async fn discard_abandoned(&self) {
        // a previous unit of work was dropped before it could finish
        if self.in_tx.swap(false, Ordering::SeqCst) {
            tracing::warn!("[db] rolling back abandoned transaction");
            if let Err(e) = self.conn.execute("ROLLBACK", ()).await {
                tracing::warn!(error = %e, "[db] rollback of abandoned transaction failed");
            }
        }
    }
}

pub struct Snapshot<'a> {
    conn: &'a Connection,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> Snapshot<'a> {
    pub fn connection(&self) -> &'a Connection {
        self.conn
    }
}

pub struct UnitOfWork<'a> {
    conn: &'a Connection,
    in_tx: &'a AtomicBool,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> UnitOfWork<'a> {
    pub fn connection(&self) -> &'a Connection {
        self.conn
    }

    pub async fn commit(self) -> Result<()> {
        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            let _ = self.conn.execute("ROLLBACK", ()).await;
            self.in_tx.store(false, Ordering::SeqCst);
            return Err(anyhow::anyhow!("failed to commit: {e}"));
        }
        self.in_tx.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub async fn rollback(self) {
        if let Err(e) = self.conn.execute("ROLLBACK", ()).await {
            tracing::warn!(error = %e, "[db] rollback failed");
        }
        self.in_tx.store(false, Ordering::SeqCst);
    }

    /// Commits when `result` is `Ok`, rolls back otherwise.
    pub async fn finish<T, E>(self, result: std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<anyhow::Error>,
    {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn count(db: &Database, table: &str) -> i64 {
        let mut rows = db
            .connection()
            .query(&format!("SELECT COUNT(*) FROM {table}"), ())
            .await
            .unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    async fn insert_user(conn: &Connection, id: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO users (id, full_name, role) VALUES (?, ?, 'staff')",
            libsql::params![id, "Test User"],
        )
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn migrations_are_recorded_once() {
        let db = Database::open_in_memory().await.unwrap();
        let applied = count(&db, "_migrations").await;
        assert!(applied >= 4);

        for (filename, sql) in MIGRATIONS {
            Database::run_migration(db.connection(), filename, sql).await.unwrap();
        }
        assert_eq!(count(&db, "_migrations").await, applied);
    }

    #[tokio::test]
    async fn finish_commits_on_ok() {
        let db = Database::open_in_memory().await.unwrap();
        let uow = db.begin().await.unwrap();
        let result = insert_user(uow.connection(), "u1").await;
        uow.finish(result).await.unwrap();
        assert_eq!(count(&db, "users").await, 1);
    }

    #[tokio::test]
    async fn finish_rolls_back_on_err() {
        let db = Database::open_in_memory().await.unwrap();
        let uow = db.begin().await.unwrap();
        let result: Result<()> = async {
            insert_user(uow.connection(), "u1").await?;
            Err(anyhow::anyhow!("boom"))
        }
        .await;
        assert!(uow.finish(result).await.is_err());
        assert_eq!(count(&db, "users").await, 0);
    }

    #[tokio::test]
    async fn abandoned_unit_of_work_is_rolled_back() {
        let db = Database::open_in_memory().await.unwrap();
        {
            let uow = db.begin().await.unwrap();
            insert_user(uow.connection(), "ghost").await.unwrap();
        }
        let uow = db.begin().await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(count(&db, "users").await, 0);
    }

    #[tokio::test]
    async fn snapshot_hides_abandoned_writes() {
        let db = Database::open_in_memory().await.unwrap();
        {
            let uow = db.begin().await.unwrap();
            insert_user(uow.connection(), "ghost").await.unwrap();
        }

        let snapshot = db.snapshot().await;
        let mut rows = snapshot
            .connection()
            .query("SELECT COUNT(*) FROM users", ())
            .await
            .unwrap();
        let users: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(users, 0);
        drop(rows);
        drop(snapshot);

        let uow = db.begin().await.unwrap();
        insert_user(uow.connection(), "real").await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(count(&db, "users").await, 1);
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let db = Database::open_in_memory().await.unwrap();
        let result = db
            .connection()
            .execute(
                "INSERT INTO activity_logs (user_id, action, description, timestamp) VALUES ('nobody', 'x', 'y', 'z')",
                (),
            )
            .await;
        assert!(result.is_err());
    }
}
