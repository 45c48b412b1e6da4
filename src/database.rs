use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::admission::AdmissionGate;
use crate::error::{ConflictError, DatabaseError, Result, ValidationError};
use crate::models::{LogEntry, PlanProposal, SequencedEntry, UserProfile};
use crate::store::{activation_time, validate_append, validate_proposal_write, LogStore, PageRequest};

/// SQLite-backed store
///
/// Entries and plans are kept as JSON payloads next to the columns the
/// queries need. A partial unique index guarantees at most one approved plan
/// per user even if two processes share the file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a database at the specified path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())?;
        info!(path = %db_path.as_ref().display(), "Opened store database");
        Self::with_connection(conn)
    }

    /// Private in-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DatabaseError::Poisoned.into())
    }

    /// Initialize database schema with tables and indexes
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        // journal_mode answers with a row, so it cannot go through execute
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                user_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                kind TEXT NOT NULL,
                ts_nanos INTEGER NOT NULL,
                supersedes INTEGER,
                payload TEXT NOT NULL,
                PRIMARY KEY (user_id, sequence)
            );

            CREATE INDEX IF NOT EXISTS idx_entries_user_time
                ON entries(user_id, ts_nanos, sequence);

            CREATE TABLE IF NOT EXISTS proposals (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_proposals_user
                ON proposals(user_id, created_at);

            CREATE UNIQUE INDEX IF NOT EXISTS idx_proposals_one_approved
                ON proposals(user_id) WHERE state = 'approved';
            "#,
        )?;

        debug!("Store schema ready");
        Ok(())
    }

    fn nanos(timestamp: DateTime<Utc>) -> Result<i64> {
        timestamp.timestamp_nanos_opt().ok_or_else(|| {
            ValidationError::new("timestamp", format!("{} is outside the storable range", timestamp))
                .into()
        })
    }

    fn sequence_to_sql(sequence: u64) -> Result<i64> {
        i64::try_from(sequence)
            .map_err(|_| ValidationError::new("sequence", "exceeds the storable range").into())
    }

    fn read_entry(conn: &Connection, user_id: &str, sequence: u64) -> Result<Option<SequencedEntry>> {
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM entries WHERE user_id = ?1 AND sequence = ?2",
                params![user_id, Self::sequence_to_sql(sequence)?],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(json) => Ok(Some(SequencedEntry {
                user_id: user_id.to_string(),
                sequence,
                entry: serde_json::from_str(&json)?,
            })),
            None => Ok(None),
        }
    }

    fn read_proposal(conn: &Connection, plan_id: Uuid) -> Result<Option<PlanProposal>> {
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM proposals WHERE id = ?1",
                params![plan_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match payload {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    fn write_proposal(conn: &Connection, proposal: &PlanProposal) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO proposals (id, user_id, state, created_at, payload)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET state = excluded.state, payload = excluded.payload
            "#,
            params![
                proposal.id.to_string(),
                proposal.user_id,
                proposal.state.as_str(),
                proposal.created_at.to_rfc3339(),
                serde_json::to_string(proposal)?,
            ],
        )?;
        Ok(())
    }

    fn active_plan_id(conn: &Connection, user_id: &str) -> Result<Option<Uuid>> {
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM proposals WHERE user_id = ?1 AND state = 'approved'",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(raw) => Uuid::parse_str(&raw).map(Some).map_err(|e| {
                DatabaseError::NotFound {
                    table: "proposals".to_string(),
                    id: format!("{} ({})", raw, e),
                }
                .into()
            }),
            None => Ok(None),
        }
    }
}

impl LogStore for SqliteStore {
    fn put_profile(&self, profile: &UserProfile) -> Result<()> {
        profile.validate()?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO profiles (user_id, payload, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at
            "#,
            params![
                profile.id,
                serde_json::to_string(profile)?,
                profile.updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match payload {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    fn append(&self, user_id: &str, entry: LogEntry) -> Result<SequencedEntry> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let target = match entry.supersedes() {
            Some(sequence) => Self::read_entry(&tx, user_id, sequence)?,
            None => None,
        };
        validate_append(&entry, target.as_ref())?;

        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM entries WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        let supersedes = entry.supersedes().map(Self::sequence_to_sql).transpose()?;

        tx.execute(
            r#"
            INSERT INTO entries (user_id, sequence, kind, ts_nanos, supersedes, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                user_id,
                next,
                entry.kind(),
                Self::nanos(entry.timestamp())?,
                supersedes,
                serde_json::to_string(&entry)?,
            ],
        )?;
        tx.commit()?;

        Ok(SequencedEntry {
            user_id: user_id.to_string(),
            sequence: next as u64,
            entry,
        })
    }

    fn get_entry(&self, user_id: &str, sequence: u64) -> Result<Option<SequencedEntry>> {
        let conn = self.lock()?;
        let entry = Self::read_entry(&conn, user_id, sequence)?;
        Ok(entry)
    }

    fn query_page(&self, user_id: &str, request: &PageRequest) -> Result<Vec<SequencedEntry>> {
        let (after_nanos, after_sequence) = match request.after {
            Some((timestamp, sequence)) => (Self::nanos(timestamp)?, Self::sequence_to_sql(sequence)?),
            None => (i64::MIN, 0),
        };
        let since = Self::nanos(request.since)?;
        let until = Self::nanos(request.until)?;
        let max_sequence = Self::sequence_to_sql(request.max_sequence)?;
        let limit = i64::try_from(request.limit).unwrap_or(i64::MAX);

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT sequence, payload FROM entries
            WHERE user_id = ?1
              AND ts_nanos >= ?2 AND ts_nanos < ?3
              AND sequence <= ?4
              AND (ts_nanos > ?5 OR (ts_nanos = ?5 AND sequence > ?6))
            ORDER BY ts_nanos, sequence
            LIMIT ?7
            "#,
        )?;

        let rows = stmt.query_map(
            params![user_id, since, until, max_sequence, after_nanos, after_sequence, limit],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )?;

        let mut page = Vec::new();
        for row in rows {
            let (sequence, payload) = row?;
            page.push(SequencedEntry {
                user_id: user_id.to_string(),
                sequence: sequence as u64,
                entry: serde_json::from_str(&payload)?,
            });
        }
        Ok(page)
    }

    fn latest_sequence(&self, user_id: &str) -> Result<u64> {
        let conn = self.lock()?;
        let latest: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence), 0) FROM entries WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(latest as u64)
    }

    fn save_proposal(&self, proposal: &PlanProposal) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let existing = Self::read_proposal(&tx, proposal.id)?;
        validate_proposal_write(proposal, existing.as_ref())?;
        Self::write_proposal(&tx, proposal)?;
        tx.commit()?;
        Ok(())
    }

    fn get_proposal(&self, user_id: &str, plan_id: Uuid) -> Result<Option<PlanProposal>> {
        let conn = self.lock()?;
        Ok(Self::read_proposal(&conn, plan_id)?.filter(|p| p.user_id == user_id))
    }

    fn list_proposals(&self, user_id: &str) -> Result<Vec<PlanProposal>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT payload FROM proposals WHERE user_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;

        let mut proposals = Vec::new();
        for row in rows {
            proposals.push(serde_json::from_str(&row?)?);
        }
        Ok(proposals)
    }

    fn get_active_plan(&self, user_id: &str) -> Result<Option<PlanProposal>> {
        let conn = self.lock()?;
        match Self::active_plan_id(&conn, user_id)? {
            Some(id) => Self::read_proposal(&conn, id),
            None => Ok(None),
        }
    }

    fn set_active_plan(
        &self,
        user_id: &str,
        plan: &PlanProposal,
        expected_active: Option<Uuid>,
    ) -> Result<()> {
        AdmissionGate::ensure_activatable(plan)?;
        if plan.user_id != user_id {
            return Err(ValidationError::new("user_id", "plan belongs to another user").into());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let actual = Self::active_plan_id(&tx, user_id)?;
        if actual != expected_active {
            return Err(ConflictError::ActivePlanChanged {
                expected: expected_active,
                actual,
            }
            .into());
        }

        if let Some(previous_id) = actual {
            let previous = Self::read_proposal(&tx, previous_id)?.ok_or_else(|| {
                DatabaseError::NotFound {
                    table: "proposals".to_string(),
                    id: previous_id.to_string(),
                }
            })?;
            let retired = AdmissionGate::supersede(previous, plan.id, activation_time(plan))?;
            Self::write_proposal(&tx, &retired)?;
        }

        Self::write_proposal(&tx, plan)?;
        tx.commit()?;

        debug!(user_id, plan_id = %plan.id, "Active plan replaced");
        Ok(())
    }
}
