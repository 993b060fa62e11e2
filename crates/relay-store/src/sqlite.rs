//! SQLite-backed record, control-flag and audit stores.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use relay_types::{
    AuditComponent, AuditListOptions, AuditLogEntry, AuditStore, ControlFlag, ControlStore,
    Direction, EventRecord, EventStatus, EventStore, RecordFilter, RecordPatch, ScheduleConfig,
    StagedWrite, StoreError, StoreTransaction, DEFAULT_AUDIT_LIMIT,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use std::path::Path;

const RECORD_COLUMNS: &str = "id, event_id, event_name, description, enabled, status, event_data, \
    event_metadata, field_mappings, schedule_config, retry_count, error_message, created_by, \
    created_at, updated_by, updated_at, modified_at, processed_at, tenant_id";

/// One SQLite database holding the outbox, inbox, audit log and control flags.
pub struct SqliteStore {
    conn: std::sync::Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. Use `":memory:"` for a private in-memory db.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS relay_outbox (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                event_name TEXT NOT NULL,
                description TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                status TEXT NOT NULL,
                event_data TEXT NOT NULL,
                event_metadata TEXT,
                field_mappings TEXT,
                schedule_config TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_by TEXT,
                updated_at TEXT,
                modified_at TEXT NOT NULL,
                processed_at TEXT,
                tenant_id TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS relay_inbox (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                event_name TEXT NOT NULL,
                description TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                status TEXT NOT NULL,
                event_data TEXT NOT NULL,
                event_metadata TEXT,
                field_mappings TEXT,
                schedule_config TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_by TEXT,
                updated_at TEXT,
                modified_at TEXT NOT NULL,
                processed_at TEXT,
                tenant_id TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS relay_audit_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                tenant_id TEXT NOT NULL,
                component TEXT NOT NULL,
                action TEXT NOT NULL,
                actor TEXT NOT NULL,
                event_id TEXT,
                timestamp TEXT NOT NULL,
                details TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS relay_control_flags (
                tenant_id TEXT NOT NULL,
                flag TEXT NOT NULL,
                value INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, flag)
            );

            CREATE INDEX IF NOT EXISTS idx_outbox_tenant ON relay_outbox(tenant_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_inbox_tenant ON relay_inbox(tenant_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_audit_tenant ON relay_audit_log(tenant_id, component);
            "#,
        )
        .map_err(backend)?;

        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Backend(format!("failed to acquire lock: {}", e)))?;
        f(&conn)
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn table(direction: Direction) -> &'static str {
    match direction {
        Direction::Outbox => "relay_outbox",
        Direction::Inbox => "relay_inbox",
    }
}

/// Fixed-width RFC 3339 so string order matches time order.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {:?}: {}", s, e)))
}

fn parse_json(s: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(s).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn to_json(v: &impl serde::Serialize) -> Result<String, StoreError> {
    serde_json::to_string(v).map_err(|e| StoreError::Backend(e.to_string()))
}

fn opt_text(v: Option<String>) -> SqlValue {
    v.map(SqlValue::Text).unwrap_or(SqlValue::Null)
}

fn insert_record(conn: &Connection, record: &EventRecord) -> Result<(), StoreError> {
    let params: Vec<SqlValue> = vec![
        SqlValue::Text(record.id.clone()),
        SqlValue::Text(record.event_id.clone()),
        SqlValue::Text(record.event_name.clone()),
        SqlValue::Text(record.description.clone()),
        SqlValue::Integer(record.enabled as i64),
        SqlValue::Text(record.status.as_str().to_string()),
        SqlValue::Text(to_json(&record.event_data)?),
        opt_text(record.event_metadata.as_ref().map(to_json).transpose()?),
        opt_text(record.field_mappings.as_ref().map(to_json).transpose()?),
        opt_text(record.schedule_config.as_ref().map(to_json).transpose()?),
        SqlValue::Integer(record.retry_count as i64),
        opt_text(record.error_message.clone()),
        SqlValue::Text(record.created_by.clone()),
        SqlValue::Text(ts(record.created_at)),
        opt_text(record.updated_by.clone()),
        opt_text(record.updated_at.map(ts)),
        SqlValue::Text(ts(record.modified_at)),
        opt_text(record.processed_at.map(ts)),
        SqlValue::Text(record.tenant_id.clone()),
    ];
    let sql = format!(
        "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, \
         ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        table(record.direction),
        RECORD_COLUMNS
    );
    conn.execute(&sql, rusqlite::params_from_iter(params))
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref f, _)
                if f.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::Duplicate(record.id.clone())
            }
            other => backend(other),
        })?;
    Ok(())
}

/// Single `UPDATE` touching only the patched columns.
fn update_record(
    conn: &Connection,
    direction: Direction,
    id: &str,
    patch: &RecordPatch,
) -> Result<bool, StoreError> {
    let mut sets: Vec<String> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();
    let mut push = |column: &str, value: SqlValue| {
        params.push(value);
        sets.push(format!("{} = ?{}", column, params.len()));
    };
    if let Some(enabled) = patch.enabled {
        push("enabled", SqlValue::Integer(enabled as i64));
    }
    if let Some(status) = patch.status {
        push("status", SqlValue::Text(status.as_str().to_string()));
    }
    if let Some(ref msg) = patch.error_message {
        push("error_message", opt_text(msg.clone()));
    }
    if let Some(ref mappings) = patch.field_mappings {
        push("field_mappings", SqlValue::Text(to_json(mappings)?));
    }
    if let Some(ref schedule) = patch.schedule_config {
        push("schedule_config", SqlValue::Text(to_json(schedule)?));
    }
    if let Some(ref by) = patch.updated_by {
        push("updated_by", SqlValue::Text(by.clone()));
    }
    if let Some(at) = patch.updated_at {
        push("updated_at", SqlValue::Text(ts(at)));
    }
    if let Some(at) = patch.processed_at {
        push("processed_at", SqlValue::Text(ts(at)));
    }
    push("modified_at", SqlValue::Text(ts(Utc::now())));
    if patch.increment_retry {
        sets.push("retry_count = retry_count + 1".to_string());
    }
    params.push(SqlValue::Text(id.to_string()));
    let mut conditions = vec![format!("id = ?{}", params.len())];
    if let Some(status) = patch.expect_status {
        params.push(SqlValue::Text(status.as_str().to_string()));
        conditions.push(format!("status = ?{}", params.len()));
    }
    if let Some(at) = patch.expect_modified_before {
        params.push(SqlValue::Text(ts(at)));
        conditions.push(format!("modified_at < ?{}", params.len()));
    }
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        table(direction),
        sets.join(", "),
        conditions.join(" AND ")
    );
    let n = conn
        .execute(&sql, rusqlite::params_from_iter(params))
        .map_err(backend)?;
    Ok(n > 0)
}

struct RawRecord {
    id: String,
    event_id: String,
    event_name: String,
    description: String,
    enabled: bool,
    status: String,
    event_data: String,
    event_metadata: Option<String>,
    field_mappings: Option<String>,
    schedule_config: Option<String>,
    retry_count: i64,
    error_message: Option<String>,
    created_by: String,
    created_at: String,
    updated_by: Option<String>,
    updated_at: Option<String>,
    modified_at: String,
    processed_at: Option<String>,
    tenant_id: String,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_id: row.get(1)?,
            event_name: row.get(2)?,
            description: row.get(3)?,
            enabled: row.get(4)?,
            status: row.get(5)?,
            event_data: row.get(6)?,
            event_metadata: row.get(7)?,
            field_mappings: row.get(8)?,
            schedule_config: row.get(9)?,
            retry_count: row.get(10)?,
            error_message: row.get(11)?,
            created_by: row.get(12)?,
            created_at: row.get(13)?,
            updated_by: row.get(14)?,
            updated_at: row.get(15)?,
            modified_at: row.get(16)?,
            processed_at: row.get(17)?,
            tenant_id: row.get(18)?,
        })
    }

    fn into_record(self, direction: Direction) -> Result<EventRecord, StoreError> {
        let status = EventStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status {:?}", self.status)))?;
        let schedule_config = match self.schedule_config {
            Some(s) => Some(
                serde_json::from_str::<ScheduleConfig>(&s)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            ),
            None => None,
        };
        Ok(EventRecord {
            id: self.id,
            direction,
            event_id: self.event_id,
            event_name: self.event_name,
            description: self.description,
            enabled: self.enabled,
            status,
            event_data: parse_json(&self.event_data)?,
            event_metadata: self.event_metadata.as_deref().map(parse_json).transpose()?,
            field_mappings: self.field_mappings.as_deref().map(parse_json).transpose()?,
            schedule_config,
            retry_count: u32::try_from(self.retry_count).unwrap_or(u32::MAX),
            error_message: self.error_message,
            created_by: self.created_by,
            created_at: parse_ts(&self.created_at)?,
            updated_by: self.updated_by,
            updated_at: self.updated_at.as_deref().map(parse_ts).transpose()?,
            modified_at: parse_ts(&self.modified_at)?,
            processed_at: self.processed_at.as_deref().map(parse_ts).transpose()?,
            tenant_id: self.tenant_id,
        })
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn commit(&self, tx: StoreTransaction) -> Result<(), StoreError> {
        let writes = tx.into_writes();
        self.with_conn(|conn| {
            let sql_tx = conn.unchecked_transaction().map_err(backend)?;
            for write in &writes {
                match write {
                    StagedWrite::Create(record) => insert_record(&sql_tx, record)?,
                    StagedWrite::Update {
                        direction,
                        id,
                        patch,
                    } => {
                        if !update_record(&sql_tx, *direction, id, patch)? {
                            return Err(StoreError::Backend(format!(
                                "update of unknown {} record {}",
                                direction, id
                            )));
                        }
                    }
                }
            }
            // An early return drops `sql_tx`, which rolls back.
            sql_tx.commit().map_err(backend)
        })
    }

    async fn get(&self, direction: Direction, id: &str) -> Result<Option<EventRecord>, StoreError> {
        let raw = self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM {} WHERE id = ?1",
                RECORD_COLUMNS,
                table(direction)
            );
            conn.query_row(&sql, [id], RawRecord::from_row)
                .optional()
                .map_err(backend)
        })?;
        raw.map(|r| r.into_record(direction)).transpose()
    }

    async fn update(
        &self,
        direction: Direction,
        id: &str,
        patch: &RecordPatch,
    ) -> Result<bool, StoreError> {
        self.with_conn(|conn| update_record(conn, direction, id, patch))
    }

    async fn list(
        &self,
        direction: Direction,
        filter: &RecordFilter,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let raws = self.with_conn(|conn| {
            let mut clauses: Vec<String> = Vec::new();
            let mut params: Vec<SqlValue> = Vec::new();
            if let Some(ref t) = filter.tenant_id {
                params.push(SqlValue::Text(t.clone()));
                clauses.push(format!("tenant_id = ?{}", params.len()));
            }
            if let Some(enabled) = filter.enabled {
                params.push(SqlValue::Integer(enabled as i64));
                clauses.push(format!("enabled = ?{}", params.len()));
            }
            if let Some(status) = filter.status {
                params.push(SqlValue::Text(status.as_str().to_string()));
                clauses.push(format!("status = ?{}", params.len()));
            }
            if let Some(ref e) = filter.event_id {
                params.push(SqlValue::Text(e.clone()));
                clauses.push(format!("event_id = ?{}", params.len()));
            }
            let where_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", clauses.join(" AND "))
            };
            let sql = format!(
                "SELECT {} FROM {}{} ORDER BY created_at DESC, rowid DESC",
                RECORD_COLUMNS,
                table(direction),
                where_sql
            );
            let mut stmt = conn.prepare(&sql).map_err(backend)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params), RawRecord::from_row)
                .map_err(backend)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(backend)
        })?;
        raws.into_iter().map(|r| r.into_record(direction)).collect()
    }
}

#[async_trait]
impl ControlStore for SqliteStore {
    async fn flag(&self, tenant_id: &str, flag: ControlFlag) -> Result<Option<bool>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM relay_control_flags WHERE tenant_id = ?1 AND flag = ?2",
                rusqlite::params![tenant_id, flag.as_str()],
                |row| row.get::<_, bool>(0),
            )
            .optional()
            .map_err(backend)
        })
    }

    async fn set_flag(
        &self,
        tenant_id: &str,
        flag: ControlFlag,
        value: bool,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO relay_control_flags (tenant_id, flag, value) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(tenant_id, flag) DO UPDATE SET value = excluded.value",
                rusqlite::params![tenant_id, flag.as_str(), value],
            )
            .map_err(backend)?;
            Ok(())
        })
    }

    async fn replace_flag(
        &self,
        tenant_id: &str,
        flag: ControlFlag,
        expected: bool,
        value: bool,
    ) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let n = conn
                .execute(
                    "UPDATE relay_control_flags SET value = ?1 \
                     WHERE tenant_id = ?2 AND flag = ?3 AND value = ?4",
                    rusqlite::params![value, tenant_id, flag.as_str(), expected],
                )
                .map_err(backend)?;
            Ok(n > 0)
        })
    }
}

#[async_trait]
impl AuditStore for SqliteStore {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), StoreError> {
        let details = to_json(&entry.details)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO relay_audit_log \
                 (id, tenant_id, component, action, actor, event_id, timestamp, details) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    entry.id,
                    entry.tenant_id,
                    entry.component.as_str(),
                    entry.action,
                    entry.actor,
                    entry.event_id,
                    ts(entry.timestamp),
                    details,
                ],
            )
            .map_err(backend)?;
            Ok(())
        })
    }

    async fn list(&self, opts: &AuditListOptions) -> Result<Vec<AuditLogEntry>, StoreError> {
        type RawAudit = (
            String,
            String,
            String,
            String,
            String,
            Option<String>,
            String,
            String,
        );
        let raws: Vec<RawAudit> = self.with_conn(|conn| {
            let mut clauses: Vec<String> = Vec::new();
            let mut params: Vec<SqlValue> = Vec::new();
            if let Some(ref t) = opts.tenant_id {
                params.push(SqlValue::Text(t.clone()));
                clauses.push(format!("tenant_id = ?{}", params.len()));
            }
            if let Some(c) = opts.component {
                params.push(SqlValue::Text(c.as_str().to_string()));
                clauses.push(format!("component = ?{}", params.len()));
            }
            if let Some(ref e) = opts.event_id {
                params.push(SqlValue::Text(e.clone()));
                clauses.push(format!("event_id = ?{}", params.len()));
            }
            let where_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", clauses.join(" AND "))
            };
            params.push(SqlValue::Integer(
                opts.limit.unwrap_or(DEFAULT_AUDIT_LIMIT) as i64,
            ));
            let limit_idx = params.len();
            params.push(SqlValue::Integer(opts.offset.unwrap_or(0) as i64));
            let offset_idx = params.len();
            let sql = format!(
                "SELECT id, tenant_id, component, action, actor, event_id, timestamp, details \
                 FROM relay_audit_log{} ORDER BY seq DESC LIMIT ?{} OFFSET ?{}",
                where_sql, limit_idx, offset_idx
            );
            let mut stmt = conn.prepare(&sql).map_err(backend)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params), |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                })
                .map_err(backend)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(backend)
        })?;

        raws.into_iter()
            .map(
                |(id, tenant_id, component, action, actor, event_id, timestamp, details)| {
                    Ok(AuditLogEntry {
                        id,
                        tenant_id,
                        component: AuditComponent::parse(&component).ok_or_else(|| {
                            StoreError::Corrupt(format!("unknown audit component {:?}", component))
                        })?,
                        action,
                        actor,
                        event_id,
                        timestamp: parse_ts(&timestamp)?,
                        details: parse_json(&details)?,
                    })
                },
            )
            .collect()
    }
}
