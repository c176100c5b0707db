//! LibSQL storage backend implementation
//!
//! Records live in `wrapped_stats` as JSON text columns. The sanitized tree,
//! metadata and hydration payload are serialized separately so the unlock
//! material can be read without touching the statistics and vice versa.

use crate::error::{Result, WrapError};
use crate::privacy::unlock::UnlockCode;
use crate::storage::StatsStorage;
use crate::tree::StatTree;
use crate::types::{
    Comparison, HydrationPayload, NewRecord, RecordId, RecordMetadata, SanitizedTree,
    StatisticsRecord, UnlockMaterial,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Builder, Connection, Database};
use std::path::Path;
use tracing::{debug, info, warn};

/// Embedded migrations, applied in order and tracked in `_migrations_applied`
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial_schema.sql",
        include_str!("../../migrations/libsql/001_initial_schema.sql"),
    ),
    (
        "002_add_indexes.sql",
        include_str!("../../migrations/libsql/002_add_indexes.sql"),
    ),
];

const RECORD_COLUMNS: &str =
    "id, year, data, user_name, metadata, hydrated_data, unlock_code, created_at, views";

const COMPARISON_COLUMNS: &str = "id, year1_id, year2_id, created_at, views";

/// Parse SQL file into individual statements
fn parse_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();

        // Skip comment-only and empty lines when not building a statement
        if current.is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) {
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        if trimmed.ends_with(';') {
            statements.push(std::mem::take(&mut current));
        }
    }

    if !current.trim().is_empty() {
        statements.push(current);
    }

    statements
}

/// Database connection mode
#[derive(Debug, Clone)]
pub enum ConnectionMode {
    /// Local file-based database
    Local(String),
    /// Local file kept in sync with a remote primary
    EmbeddedReplica {
        path: String,
        url: String,
        token: String,
    },
}

impl ConnectionMode {
    fn local_path(&self) -> &str {
        match self {
            ConnectionMode::Local(path) | ConnectionMode::EmbeddedReplica { path, .. } => path,
        }
    }
}

/// LibSQL storage backend
pub struct LibsqlStorage {
    db: Database,
}

impl LibsqlStorage {
    /// Check that an existing file looks like a SQLite database
    ///
    /// Returns `Ok(false)` when the file is missing and `must_exist` is false.
    fn validate_database_file(db_path: &str, must_exist: bool) -> Result<bool> {
        let path = Path::new(db_path);

        if !path.exists() {
            if must_exist {
                return Err(WrapError::Database(format!(
                    "Database file not found at '{}'. Run 'yearwrap serve' once to create it or check --db-path.",
                    db_path
                )));
            }
            return Ok(false);
        }

        let bytes = std::fs::read(path).map_err(|e| {
            WrapError::Database(format!("Cannot read database file at '{}': {}", db_path, e))
        })?;

        // Freshly created files may still be empty
        if bytes.is_empty() {
            return Ok(true);
        }
        if bytes.len() < 16 || &bytes[0..16] != b"SQLite format 3\0" {
            return Err(WrapError::Database(format!(
                "Database file at '{}' is corrupted or not a valid SQLite database",
                db_path
            )));
        }

        debug!("Database file validation passed: {}", db_path);
        Ok(true)
    }

    /// Open the database, creating it when allowed, and run migrations
    pub async fn new_with_validation(mode: ConnectionMode, create_if_missing: bool) -> Result<Self> {
        info!(
            "Connecting to LibSQL database at {} (create_if_missing: {})",
            mode.local_path(),
            create_if_missing
        );

        let exists = Self::validate_database_file(mode.local_path(), !create_if_missing)?;
        if create_if_missing && !exists {
            if let Some(parent) = Path::new(mode.local_path()).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        WrapError::Database(format!(
                            "Failed to create database directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        let db = match mode {
            ConnectionMode::Local(ref path) => Builder::new_local(path)
                .build()
                .await
                .map_err(|e| WrapError::Database(format!("Failed to create local database: {}", e)))?,
            ConnectionMode::EmbeddedReplica {
                ref path,
                ref url,
                ref token,
            } => {
                let db = Builder::new_remote_replica(path, url.clone(), token.clone())
                    .build()
                    .await
                    .map_err(|e| {
                        WrapError::Database(format!("Failed to create embedded replica: {}", e))
                    })?;
                db.sync()
                    .await
                    .map_err(|e| WrapError::Database(format!("Initial replica sync failed: {}", e)))?;
                db
            }
        };

        info!("LibSQL database connection established");

        let storage = Self { db };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open (creating if needed) a local database file
    pub async fn new_local(path: &str) -> Result<Self> {
        Self::new_with_validation(ConnectionMode::Local(path.to_string()), true).await
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");

        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations_applied (
                migration_name TEXT PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
            params![],
        )
        .await
        .map_err(|e| WrapError::Migration(format!("Failed to create migrations table: {}", e)))?;

        for (migration_name, sql) in MIGRATIONS {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM _migrations_applied WHERE migration_name = ?",
                    params![*migration_name],
                )
                .await?;

            let already_applied = match rows.next().await? {
                Some(row) => row.get::<i64>(0).unwrap_or(0),
                None => 0,
            };
            if already_applied > 0 {
                debug!("Skipping already applied migration: {}", migration_name);
                continue;
            }

            let statements = parse_sql_statements(sql);
            debug!("Parsed {} statements from {}", statements.len(), migration_name);

            let tx = conn.transaction().await?;
            for (i, statement) in statements.iter().enumerate() {
                tx.execute(statement.trim(), params![]).await.map_err(|e| {
                    WrapError::Migration(format!(
                        "Failed to execute statement #{} in {}: {}",
                        i + 1,
                        migration_name,
                        e
                    ))
                })?;
            }
            tx.execute(
                "INSERT INTO _migrations_applied (migration_name, applied_at) VALUES (?, ?)",
                params![*migration_name, Utc::now().timestamp()],
            )
            .await
            .map_err(|e| WrapError::Migration(format!("Failed to record migration: {}", e)))?;
            tx.commit().await?;

            info!("Executed migration: {}", migration_name);
        }

        info!("Database migrations completed");
        Ok(())
    }

    /// Get a connection from the database
    fn get_conn(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| WrapError::Database(format!("Failed to get connection: {}", e)))
    }

    async fn record_by_id(&self, conn: &Connection, id: &RecordId) -> Result<Option<StatisticsRecord>> {
        let sql = format!("SELECT {} FROM wrapped_stats WHERE id = ?", RECORD_COLUMNS);
        let mut rows = conn.query(&sql, params![id.as_str()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| WrapError::Database(format!("Invalid timestamp '{}': {}", raw, e)))
}

fn parse_id(raw: &str) -> Result<RecordId> {
    RecordId::parse(raw).ok_or_else(|| WrapError::Database(format!("Invalid stored id '{}'", raw)))
}

/// Convert a `RECORD_COLUMNS` row to a record
fn row_to_record(row: &libsql::Row) -> Result<StatisticsRecord> {
    let id: String = row.get(0)?;
    let id = parse_id(&id)?;

    let year: i64 = row.get(1)?;

    let data: String = row.get(2)?;
    let statistics: StatTree = serde_json::from_str(&data)?;

    let user_name: Option<String> = row.get(3)?;

    let metadata: String = row.get(4)?;
    let metadata: RecordMetadata = serde_json::from_str(&metadata)?;

    let hydrated: Option<String> = row.get(5)?;
    let hydration = hydrated
        .map(|raw| serde_json::from_str::<HydrationPayload>(&raw))
        .transpose()?;

    let unlock_code: Option<String> = row.get(6)?;
    let unlock_code = unlock_code.and_then(|raw| {
        let parsed = UnlockCode::parse(&raw);
        if parsed.is_none() {
            warn!("Ignoring malformed unlock code stored for {}", id);
        }
        parsed
    });

    let created_at: String = row.get(7)?;
    let views: i64 = row.get(8)?;

    Ok(StatisticsRecord {
        id,
        year: year as i32,
        statistics: SanitizedTree::from_sanitized(statistics),
        user_name,
        metadata,
        created_at: parse_timestamp(&created_at)?,
        views: views.max(0) as u64,
        unlock_code,
        hydration,
    })
}

fn build_comparison(
    id: RecordId,
    created_at: DateTime<Utc>,
    views: u64,
    first: StatisticsRecord,
    second: StatisticsRecord,
) -> Comparison {
    let year1_unlockable = first.unlockable();
    let year2_unlockable = second.unlockable();
    Comparison {
        id,
        year1: first.year,
        year2: second.year,
        year1_id: first.id,
        year2_id: second.id,
        year1_statistics: first.statistics,
        year2_statistics: second.statistics,
        year1_user_name: first.user_name,
        year2_user_name: second.user_name,
        year1_unlockable,
        year2_unlockable,
        created_at,
        views,
    }
}

#[async_trait]
impl StatsStorage for LibsqlStorage {
    async fn create_record(&self, record: &NewRecord) -> Result<RecordId> {
        if record.statistics.as_tree().is_null() {
            return Err(WrapError::Validation("statistics are required".to_string()));
        }
        if record.hydration.is_some() && record.unlock_code.is_none() {
            return Err(WrapError::Validation(
                "a hydration payload requires an unlock code".to_string(),
            ));
        }

        let data = serde_json::to_string(&record.statistics)?;
        let metadata = serde_json::to_string(&record.metadata)?;
        let hydrated = record
            .hydration
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let id = RecordId::generate();
        let conn = self.get_conn()?;

        conn.execute(
            "INSERT INTO wrapped_stats (
                id, year, data, user_name, metadata,
                hydrated_data, unlock_code, created_at, views
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)",
            params![
                id.as_str(),
                record.year as i64,
                data,
                record.user_name.clone(),
                metadata,
                hydrated,
                record.unlock_code.as_ref().map(|code| code.as_str().to_string()),
                Utc::now().to_rfc3339(),
            ],
        )
        .await?;

        info!(
            "Stored record {} for {} (unlockable: {})",
            id,
            record.year,
            record.unlock_code.is_some()
        );
        Ok(id)
    }

    async fn get_record(&self, year: i32, id: &RecordId) -> Result<Option<StatisticsRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM wrapped_stats WHERE id = ? AND year = ?",
            RECORD_COLUMNS
        );
        let mut rows = conn.query(&sql, params![id.as_str(), year as i64]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn view_record(&self, year: i32, id: &RecordId) -> Result<Option<StatisticsRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "UPDATE wrapped_stats SET views = views + 1 WHERE id = ? AND year = ? RETURNING {}",
            RECORD_COLUMNS
        );
        let mut rows = conn.query(&sql, params![id.as_str(), year as i64]).await?;
        match rows.next().await? {
            Some(row) => {
                let record = row_to_record(&row)?;
                debug!("Record {}/{} now at {} views", year, id, record.views);
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn unlock_material(&self, id: &RecordId) -> Result<Option<UnlockMaterial>> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT year, unlock_code, hydrated_data FROM wrapped_stats WHERE id = ?",
                params![id.as_str()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let year: i64 = row.get(0)?;
        let unlock_code: Option<String> = row.get(1)?;
        let hydrated: Option<String> = row.get(2)?;

        Ok(Some(UnlockMaterial {
            year: year as i32,
            unlock_code: unlock_code.as_deref().and_then(UnlockCode::parse),
            hydration: hydrated
                .map(|raw| serde_json::from_str::<HydrationPayload>(&raw))
                .transpose()?,
        }))
    }

    async fn list_records(&self, year: Option<i32>) -> Result<Vec<StatisticsRecord>> {
        let conn = self.get_conn()?;
        let mut rows = match year {
            Some(year) => {
                let sql = format!(
                    "SELECT {} FROM wrapped_stats WHERE year = ? ORDER BY created_at, id",
                    RECORD_COLUMNS
                );
                conn.query(&sql, params![year as i64]).await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM wrapped_stats ORDER BY created_at, id",
                    RECORD_COLUMNS
                );
                conn.query(&sql, params![]).await?
            }
        };

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            match row_to_record(&row) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable record row: {}", e),
            }
        }

        debug!("Listed {} records (year filter: {:?})", records.len(), year);
        Ok(records)
    }

    async fn create_comparison(&self, first: &RecordId, second: &RecordId) -> Result<Comparison> {
        let conn = self.get_conn()?;

        let a = self
            .record_by_id(&conn, first)
            .await?
            .ok_or_else(|| WrapError::NotFound(format!("record {}", first)))?;
        let b = self
            .record_by_id(&conn, second)
            .await?
            .ok_or_else(|| WrapError::NotFound(format!("record {}", second)))?;

        if a.year == b.year {
            return Err(WrapError::Validation(
                "cannot compare two records from the same year".to_string(),
            ));
        }
        let (earlier, later) = if a.year < b.year { (a, b) } else { (b, a) };

        let id = RecordId::generate();
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO wrapped_comparisons (id, year1_id, year2_id, year1, year2, created_at, views)
             VALUES (?, ?, ?, ?, ?, ?, 0)",
            params![
                id.as_str(),
                earlier.id.as_str(),
                later.id.as_str(),
                earlier.year as i64,
                later.year as i64,
                created_at.to_rfc3339(),
            ],
        )
        .await?;

        info!(
            "Created comparison {} ({}-{})",
            id, earlier.year, later.year
        );
        Ok(build_comparison(id, created_at, 0, earlier, later))
    }

    async fn view_comparison(
        &self,
        year1: i32,
        year2: i32,
        id: &RecordId,
    ) -> Result<Option<Comparison>> {
        let (year1, year2) = (year1.min(year2), year1.max(year2));
        let conn = self.get_conn()?;

        let sql = format!(
            "UPDATE wrapped_comparisons SET views = views + 1
             WHERE id = ? AND year1 = ? AND year2 = ?
             RETURNING {}",
            COMPARISON_COLUMNS
        );
        let mut rows = conn
            .query(&sql, params![id.as_str(), year1 as i64, year2 as i64])
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let comparison_id: String = row.get(0)?;
        let year1_id: String = row.get(1)?;
        let year2_id: String = row.get(2)?;
        let created_at: String = row.get(3)?;
        let views: i64 = row.get(4)?;

        let first = self.record_by_id(&conn, &parse_id(&year1_id)?).await?;
        let second = self.record_by_id(&conn, &parse_id(&year2_id)?).await?;
        let (Some(first), Some(second)) = (first, second) else {
            warn!("Comparison {} references a missing record", comparison_id);
            return Ok(None);
        };

        Ok(Some(build_comparison(
            parse_id(&comparison_id)?,
            parse_timestamp(&created_at)?,
            views.max(0) as u64,
            first,
            second,
        )))
    }

    async fn cached_completion(&self, prompt_hash: &str) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT completion FROM llm_cache WHERE prompt_hash = ?",
                params![prompt_hash],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    async fn cache_completion(
        &self,
        prompt_hash: &str,
        prompt: &str,
        completion: &str,
    ) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO llm_cache (prompt_hash, prompt, completion, created_at)
             VALUES (?, ?, ?, ?)",
            params![prompt_hash, prompt, completion, Utc::now().to_rfc3339()],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sql_statements() {
        let sql = "-- header\n\nCREATE TABLE a (\n  id TEXT\n);\n-- note\nCREATE INDEX i ON a(id);\n";
        let statements = parse_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE a"));
        assert_eq!(statements[1], "CREATE INDEX i ON a(id);");
    }

    #[test]
    fn test_parse_sql_keeps_comments_inside_statement() {
        let sql = "CREATE TABLE b (\n  -- primary key\n  id TEXT\n);\nDROP TABLE c;";
        let statements = parse_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("-- primary key"));
        assert!(statements[0].ends_with(");"));
        assert_eq!(statements[1], "DROP TABLE c;");
    }

    #[test]
    fn test_embedded_migrations_parse() {
        for (name, sql) in MIGRATIONS {
            assert!(!parse_sql_statements(sql).is_empty(), "{} is empty", name);
        }
    }

    #[test]
    fn test_validate_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.db");
        let missing = missing.to_str().unwrap();
        assert!(!LibsqlStorage::validate_database_file(missing, false).unwrap());
        assert!(LibsqlStorage::validate_database_file(missing, true).is_err());

        let junk = dir.path().join("junk.db");
        std::fs::write(&junk, b"definitely not sqlite").unwrap();
        assert!(LibsqlStorage::validate_database_file(junk.to_str().unwrap(), false).is_err());
    }
}
