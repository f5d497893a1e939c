use std::path::Path;

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::db::DriverRunRecord;
use crate::model::{AnalysisResult, HandlerKind};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("stored result is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The database was created with a newer schema version than we support.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

pub type DbResult<T> = Result<T, DbError>;

/// SQLite store of per-driver results across runs.
#[derive(Debug)]
pub struct ResultDb {
    conn: Connection,
}

impl ResultDb {
    /// Open (or create) the database at `path` and migrate it.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Store a run with its paths and comparisons; returns the run id.
    pub fn insert_run(&self, record: &DriverRunRecord, result: &AnalysisResult) -> DbResult<i64> {
        let tx = self.conn.unchecked_transaction()?;
        let result_json = serde_json::to_string(result)?;
        tx.execute(
            r#"
            INSERT INTO driver_runs (driver, driver_hash, ret_code, weight_bonus, handler_type,
                                     handler_count, path_count, started_at, finished_at, result_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.driver,
                record.driver_hash,
                record.ret_code,
                record.weight_bonus,
                record.handler_type.as_str(),
                record.handler_count as i64,
                record.path_count as i64,
                record.started_at,
                record.finished_at,
                result_json,
            ],
        )?;
        let run_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO driver_paths (run_id, kind, idx, name, path)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for (kind, paths) in [("target", &result.target_paths), ("helper", &result.helper_paths)] {
                for (idx, report) in paths.iter().enumerate() {
                    let path = report.path.iter().map(|a| format!("{a:#x}")).collect::<Vec<_>>().join(",");
                    stmt.execute(params![run_id, kind, idx as i64, report.name, path])?;
                }
            }
        }

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO driver_comparisons (run_id, op, val, line)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for cmp in &result.ioctl_comp {
                stmt.execute(params![run_id, cmp.op.as_str(), cmp.val as i64, cmp.line])?;
            }
        }

        tx.commit()?;
        Ok(run_id)
    }

    /// Runs in insertion order, optionally for one driver.
    pub fn list_runs(&self, driver: Option<&str>) -> DbResult<Vec<DriverRunRecord>> {
        fn map_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<DriverRunRecord> {
            let kind: String = row.get(4)?;
            Ok(DriverRunRecord {
                driver: row.get(0)?,
                driver_hash: row.get(1)?,
                ret_code: row.get(2)?,
                weight_bonus: row.get(3)?,
                handler_type: parse_handler_kind(&kind),
                handler_count: row.get::<_, i64>(5)? as usize,
                path_count: row.get::<_, i64>(6)? as usize,
                started_at: row.get(7)?,
                finished_at: row.get(8)?,
            })
        }

        const COLUMNS: &str = "driver, driver_hash, ret_code, weight_bonus, handler_type, \
                               handler_count, path_count, started_at, finished_at";
        let mut out = Vec::new();
        match driver {
            Some(name) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM driver_runs WHERE driver = ?1 ORDER BY id"
                ))?;
                for row in stmt.query_map(params![name], map_run)? {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt =
                    self.conn.prepare(&format!("SELECT {COLUMNS} FROM driver_runs ORDER BY id"))?;
                for row in stmt.query_map([], map_run)? {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    pub fn latest_run_id(&self, driver: &str) -> DbResult<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM driver_runs WHERE driver = ?1 ORDER BY id DESC LIMIT 1")?;
        let mut rows = stmt.query(params![driver])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Result of the most recent run for `driver`.
    pub fn load_result(&self, driver: &str) -> DbResult<Option<AnalysisResult>> {
        let Some(run_id) = self.latest_run_id(driver)? else {
            return Ok(None);
        };
        let json: String = self.conn.query_row(
            "SELECT result_json FROM driver_runs WHERE id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Distinct comparison values seen for `driver` across all runs.
    pub fn comparison_values(&self, driver: &str) -> DbResult<Vec<u64>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT c.val FROM driver_comparisons c
            JOIN driver_runs r ON r.id = c.run_id
            WHERE r.driver = ?1
            ORDER BY c.val
            "#,
        )?;
        let rows = stmt.query_map(params![driver], |row| row.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row? as u64);
        }
        Ok(out)
    }
}

fn parse_handler_kind(text: &str) -> HandlerKind {
    match text {
        "WDM" => HandlerKind::Wdm,
        "WDF" => HandlerKind::Wdf,
        _ => HandlerKind::Unknown,
    }
}

/// Bring the schema to [`CURRENT_SCHEMA_VERSION`] using `PRAGMA user_version`.
///
/// Version map:
/// - 0: no schema
/// - 1: driver_runs, driver_paths
/// - 2: driver_comparisons
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let current_version = current_schema_version(conn)?;

    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version < 1 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS driver_runs (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                driver        TEXT NOT NULL,
                driver_hash   TEXT,
                ret_code      INTEGER NOT NULL,
                weight_bonus  INTEGER NOT NULL DEFAULT 0,
                handler_type  TEXT NOT NULL,
                handler_count INTEGER NOT NULL,
                path_count    INTEGER NOT NULL,
                started_at    TEXT NOT NULL,
                finished_at   TEXT NOT NULL,
                result_json   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_driver_runs_driver ON driver_runs(driver);
            CREATE TABLE IF NOT EXISTS driver_paths (
                run_id INTEGER NOT NULL,
                kind   TEXT NOT NULL,
                idx    INTEGER NOT NULL,
                name   TEXT NOT NULL,
                path   TEXT NOT NULL,
                PRIMARY KEY(run_id, kind, idx)
            );
            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS driver_comparisons (
                run_id INTEGER NOT NULL,
                op     TEXT NOT NULL,
                val    INTEGER NOT NULL,
                line   TEXT NOT NULL,
                PRIMARY KEY(run_id, op, val, line)
            );
            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

/// Read the SQLite schema version from `PRAGMA user_version`.
pub fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}
