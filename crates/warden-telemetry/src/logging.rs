//! Durable WARN+ log records in SQLite.
//!
//! Records carry the session `generation` and `identity` when the event, or
//! any span around it, has those fields. That makes it possible to pull up
//! every warning a single session attempt produced after the fact.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        severity INTEGER NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        fields TEXT,
        generation INTEGER,
        identity TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_logs_generation ON logs(generation);
    CREATE INDEX IF NOT EXISTS idx_logs_severity ON logs(severity);
";

const DEFAULT_LIMIT: u32 = 100;

/// A persisted log record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub generation: Option<u64>,
    pub identity: Option<String>,
}

impl LogRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let generation: Option<i64> = row.get("generation")?;
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            level: row.get("level")?,
            target: row.get("target")?,
            message: row.get("message")?,
            fields: row.get("fields")?,
            generation: generation.and_then(|g| u64::try_from(g).ok()),
            identity: row.get("identity")?,
        })
    }
}

/// Filter for [`SqliteLogSink::query`]. Newest records come first.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    /// Only records at least this severe (`ERROR` is more severe than `WARN`).
    pub min_level: Option<Level>,
    /// Substring match on the event target.
    pub target: Option<String>,
    pub generation: Option<u64>,
    pub identity: Option<String>,
    /// RFC 3339 lower bound on the timestamp.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

impl LogQuery {
    fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        let mut push = |clause: &str, value: SqlValue| {
            values.push(value);
            clauses.push(format!("{clause} ?{}", values.len()));
        };

        if let Some(level) = self.min_level {
            push("severity <=", SqlValue::Integer(severity(level)));
        }
        if let Some(target) = &self.target {
            push("target LIKE", SqlValue::Text(format!("%{target}%")));
        }
        if let Some(generation) = self.generation {
            push("generation =", SqlValue::Integer(generation as i64));
        }
        if let Some(identity) = &self.identity {
            push("identity =", SqlValue::Text(identity.clone()));
        }
        if let Some(since) = &self.since {
            push("timestamp >=", SqlValue::Text(since.clone()));
        }

        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, generation, identity FROM logs",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY id DESC LIMIT {}",
            self.limit.unwrap_or(DEFAULT_LIMIT)
        ));
        (sql, values)
    }
}

/// Lower is more severe, so "at least WARN" is `severity <= 2`.
fn severity(level: Level) -> i64 {
    match level {
        Level::ERROR => 1,
        Level::WARN => 2,
        Level::INFO => 3,
        Level::DEBUG => 4,
        Level::TRACE => 5,
    }
}

/// SQLite-backed store for WARN+ tracing events.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            // Connection::open reports the real failure if this didn't work.
            let _ = std::fs::create_dir_all(parent);
        }
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, level: Level, target: &str, tags: Tags) {
        let fields = if tags.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&tags.fields).ok()
        };
        let conn = self.conn.lock();
        // Never log from inside the layer.
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, severity, level, target, message, fields, generation, identity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                Utc::now().to_rfc3339(),
                severity(level),
                level.as_str(),
                target,
                tags.message.unwrap_or_default(),
                fields,
                tags.generation.map(|g| g as i64),
                tags.identity,
            ],
        );
    }

    pub fn query(&self, query: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let (sql, values) = query.to_sql();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), LogRecord::from_row)?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

/// Fields lifted out of an event or span.
#[derive(Clone, Debug, Default)]
struct Tags {
    message: Option<String>,
    generation: Option<u64>,
    identity: Option<String>,
    fields: Map<String, Value>,
}

impl Tags {
    fn put(&mut self, field: &Field, value: Value) {
        match (field.name(), value) {
            ("message", Value::String(s)) => self.message = Some(s),
            ("identity", Value::String(s)) => self.identity = Some(s),
            ("generation", Value::Number(n)) => self.generation = n.as_u64(),
            ("generation", Value::String(s)) => self.generation = s.parse().ok(),
            (name, value) => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }

    /// Fill whatever the event left unset from an enclosing span.
    fn inherit(&mut self, outer: &Tags) {
        if self.generation.is_none() {
            self.generation = outer.generation;
        }
        if self.identity.is_none() {
            self.identity.clone_from(&outer.identity);
        }
    }

    fn has_session(&self) -> bool {
        self.generation.is_some() || self.identity.is_some()
    }
}

impl Visit for Tags {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // Display-formatted fields (`%x`) arrive here too; keep them unquoted.
        let text = format!("{value:?}");
        let text = text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .map(str::to_string)
            .unwrap_or(text);
        self.put(field, Value::String(text));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }
}

/// `tracing` layer feeding a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut tags = Tags::default();
        attrs.record(&mut tags);
        if !tags.has_session() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(tags);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN {
            return;
        }

        let mut tags = Tags::default();
        event.record(&mut tags);
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(outer) = span.extensions().get::<Tags>() {
                    tags.inherit(outer);
                }
            }
        }

        self.sink.insert(*meta.level(), meta.target(), tags);
    }
}
