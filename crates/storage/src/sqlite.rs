//! SQLite-backed store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use aegis_common::{
    AegisError, AegisResult, BackendHandle, Finding, ScanKind, ScanRecord, ScanStore, Schedule,
    ScheduleStore,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS scans (
        scan_id TEXT PRIMARY KEY NOT NULL,
        target TEXT NOT NULL,
        kind TEXT,
        status TEXT NOT NULL,
        backend_handles TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS findings (
        scan_id TEXT NOT NULL REFERENCES scans(scan_id),
        position INTEGER NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        severity TEXT NOT NULL,
        category TEXT NOT NULL,
        remediation TEXT NOT NULL,
        PRIMARY KEY (scan_id, position)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedules (
        id TEXT PRIMARY KEY NOT NULL,
        target TEXT NOT NULL,
        kind TEXT,
        expression TEXT NOT NULL,
        next_run INTEGER,
        last_run INTEGER,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS scans_created_at ON scans (created_at DESC)",
];

fn storage_err(e: sqlx::Error) -> AegisError {
    AegisError::Storage(e.to_string())
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> AegisResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| AegisError::Storage(format!("invalid timestamp {ms}")))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> AegisResult<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get::<T, _>(name).map_err(storage_err)
}

/// Durable store for scan records and schedules.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if necessary) the database at `url` and apply the schema.
    ///
    /// In-memory URLs are pinned to one connection that never expires so every
    /// query sees the same database.
    pub async fn connect(url: &str) -> AegisResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(storage_err)?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.migrate().await?;
        info!("Opened scan store at {}", url);
        Ok(store)
    }

    async fn migrate(&self) -> AegisResult<()> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn load_findings(&self, scan_id: &str) -> AegisResult<Vec<Finding>> {
        let rows = sqlx::query(
            "SELECT title, description, severity, category, remediation
             FROM findings WHERE scan_id = ? ORDER BY position",
        )
        .bind(scan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|row| -> AegisResult<Finding> {
                Ok(Finding {
                    title: column(row, "title")?,
                    description: column(row, "description")?,
                    severity: column::<String>(row, "severity")?.parse()?,
                    category: column::<String>(row, "category")?.parse()?,
                    remediation: column(row, "remediation")?,
                })
            })
            .collect()
    }

    async fn scan_from_row(&self, row: &SqliteRow) -> AegisResult<ScanRecord> {
        let scan_id: String = column(row, "scan_id")?;
        let handles_json: String = column(row, "backend_handles")?;
        let backend_handles: Vec<BackendHandle> = serde_json::from_str(&handles_json)
            .map_err(|e| AegisError::Storage(format!("corrupt backend handles: {e}")))?;
        let kind = column::<Option<String>>(row, "kind")?
            .map(|k| k.parse::<ScanKind>())
            .transpose()?;
        let findings = self.load_findings(&scan_id).await?;

        Ok(ScanRecord {
            target: column(row, "target")?,
            kind,
            status: column::<String>(row, "status")?.parse()?,
            backend_handles,
            findings,
            created_at: from_millis(column(row, "created_at")?)?,
            updated_at: from_millis(column(row, "updated_at")?)?,
            scan_id,
        })
    }
}

fn schedule_from_row(row: &SqliteRow) -> AegisResult<Schedule> {
    let id: String = column(row, "id")?;
    Ok(Schedule {
        id: Uuid::parse_str(&id)
            .map_err(|e| AegisError::Storage(format!("corrupt schedule id {id}: {e}")))?,
        target: column(row, "target")?,
        kind: column::<Option<String>>(row, "kind")?
            .map(|k| k.parse::<ScanKind>())
            .transpose()?,
        expression: column(row, "expression")?,
        next_run: column::<Option<i64>>(row, "next_run")?
            .map(from_millis)
            .transpose()?,
        last_run: column::<Option<i64>>(row, "last_run")?
            .map(from_millis)
            .transpose()?,
        created_at: from_millis(column(row, "created_at")?)?,
    })
}

#[async_trait]
impl ScanStore for SqliteStore {
    async fn create_scan(&self, record: &ScanRecord) -> AegisResult<()> {
        let handles = serde_json::to_string(&record.backend_handles)
            .map_err(|e| AegisError::Storage(format!("Failed to serialize handles: {e}")))?;

        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        sqlx::query(
            "INSERT INTO scans (scan_id, target, kind, status, backend_handles, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.scan_id)
        .bind(&record.target)
        .bind(record.kind.map(|k| k.as_str()))
        .bind(record.status.as_str())
        .bind(handles)
        .bind(to_millis(record.created_at))
        .bind(to_millis(record.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        insert_findings(&mut tx, record).await?;
        tx.commit().await.map_err(storage_err)?;
        debug!("Created scan record {}", record.scan_id);
        Ok(())
    }

    async fn get_scan(&self, scan_id: &str) -> AegisResult<Option<ScanRecord>> {
        let row = sqlx::query("SELECT * FROM scans WHERE scan_id = ?")
            .bind(scan_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(row) => Ok(Some(self.scan_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn update_scan(&self, record: &ScanRecord) -> AegisResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let updated = sqlx::query("UPDATE scans SET status = ?, updated_at = ? WHERE scan_id = ?")
            .bind(record.status.as_str())
            .bind(to_millis(record.updated_at))
            .bind(&record.scan_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        if updated.rows_affected() == 0 {
            return Err(AegisError::NotFound(format!("scan {}", record.scan_id)));
        }

        sqlx::query("DELETE FROM findings WHERE scan_id = ?")
            .bind(&record.scan_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        insert_findings(&mut tx, record).await?;

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn list_scans(&self) -> AegisResult<Vec<ScanRecord>> {
        let rows = sqlx::query("SELECT * FROM scans ORDER BY created_at DESC, rowid DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(self.scan_from_row(row).await?);
        }
        Ok(records)
    }
}

async fn insert_findings(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    record: &ScanRecord,
) -> AegisResult<()> {
    for (position, finding) in record.findings.iter().enumerate() {
        sqlx::query(
            "INSERT INTO findings (scan_id, position, title, description, severity, category, remediation)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.scan_id)
        .bind(position as i64)
        .bind(&finding.title)
        .bind(&finding.description)
        .bind(finding.severity.as_str())
        .bind(finding.category.as_str())
        .bind(&finding.remediation)
        .execute(&mut **tx)
        .await
        .map_err(storage_err)?;
    }
    Ok(())
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn create_schedule(&self, schedule: &Schedule) -> AegisResult<()> {
        sqlx::query(
            "INSERT INTO schedules (id, target, kind, expression, next_run, last_run, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(schedule.id.to_string())
        .bind(&schedule.target)
        .bind(schedule.kind.map(|k| k.as_str()))
        .bind(&schedule.expression)
        .bind(schedule.next_run.map(to_millis))
        .bind(schedule.last_run.map(to_millis))
        .bind(to_millis(schedule.created_at))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> AegisResult<Option<Schedule>> {
        sqlx::query("SELECT * FROM schedules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .as_ref()
            .map(schedule_from_row)
            .transpose()
    }

    async fn delete_schedule(&self, id: Uuid) -> AegisResult<bool> {
        let deleted = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn list_schedules(&self) -> AegisResult<Vec<Schedule>> {
        sqlx::query("SELECT * FROM schedules ORDER BY created_at, rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?
            .iter()
            .map(schedule_from_row)
            .collect()
    }

    async fn record_schedule_run(
        &self,
        id: Uuid,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) -> AegisResult<()> {
        sqlx::query(
            "UPDATE schedules SET last_run = COALESCE(?, last_run), next_run = ? WHERE id = ?",
        )
        .bind(last_run.map(to_millis))
        .bind(next_run.map(to_millis))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}
