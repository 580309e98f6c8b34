//! SQLite-backed store.
//!
//! One connection behind a mutex is the single writer for every table.
//! Multi-statement updates (an outbox row and its lanes) run inside a
//! transaction so a crash never leaves a row without its lanes.

use crate::error::{Result, StoreError};
use crate::outbox::{Lane, OutboxRow, OutboxStatus, OutboxStore, Transition};
use crate::state::{cursor_is_ahead, CursorStore, EntityStore, PublicationEntry, PublicationQueue};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use waymark_domain::{
    Endorsement, EntityKind, EntityRecord, Envelope, Report, Scope, Transport,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS outbox (
        event_id TEXT PRIMARY KEY,
        envelope TEXT NOT NULL,
        event_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        next_retry_at INTEGER,
        last_error TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox(status, updated_at);

    CREATE TABLE IF NOT EXISTS outbox_lanes (
        event_id TEXT NOT NULL REFERENCES outbox(event_id) ON DELETE CASCADE,
        transport TEXT NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        next_retry_at INTEGER,
        last_error TEXT,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (event_id, transport)
    );
    CREATE INDEX IF NOT EXISTS idx_lanes_due ON outbox_lanes(status, next_retry_at);

    CREATE TABLE IF NOT EXISTS entities (
        entity_id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        fields TEXT NOT NULL,
        author_pubkey TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        retracted INTEGER NOT NULL DEFAULT 0,
        last_event_id TEXT NOT NULL,
        lamport_clock INTEGER NOT NULL DEFAULT 0,
        scope TEXT NOT NULL,
        base_score INTEGER NOT NULL,
        trust_score INTEGER,
        trust_tier INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities(kind);
    CREATE INDEX IF NOT EXISTS idx_entities_author ON entities(author_pubkey);

    CREATE TABLE IF NOT EXISTS endorsements (
        entity_id TEXT NOT NULL,
        actor TEXT NOT NULL,
        score INTEGER NOT NULL,
        comment TEXT,
        created_at INTEGER NOT NULL,
        event_id TEXT NOT NULL,
        authenticated INTEGER NOT NULL,
        PRIMARY KEY (entity_id, actor)
    );

    CREATE TABLE IF NOT EXISTS reports (
        entity_id TEXT NOT NULL,
        actor TEXT NOT NULL,
        reason TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        event_id TEXT NOT NULL,
        authenticated INTEGER NOT NULL,
        PRIMARY KEY (entity_id, actor)
    );

    CREATE TABLE IF NOT EXISTS sync_cursors (
        key TEXT PRIMARY KEY,
        position TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS publication_queue (
        entry_id TEXT PRIMARY KEY,
        entity_id TEXT NOT NULL,
        author_pubkey TEXT NOT NULL,
        photos TEXT NOT NULL,
        queued_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS publication_history (
        entry_id TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        author_pubkey TEXT NOT NULL,
        accepted INTEGER NOT NULL,
        reasons TEXT NOT NULL,
        processed_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_history_author ON publication_history(author_pubkey, processed_at);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a database file in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn, Some(path))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| ":memory:".to_string()),
            "SqliteStore initialized"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn load_row(conn: &Connection, event_id: &str) -> Result<Option<OutboxRow>> {
        let head = conn
            .query_row(
                "SELECT envelope, status, attempts, next_retry_at, last_error, created_at, updated_at
                 FROM outbox WHERE event_id = ?1",
                [event_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((envelope, status, attempts, next_retry_at, last_error, created_at, updated_at)) =
            head
        else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT transport, status, attempts, next_retry_at, last_error, updated_at
             FROM outbox_lanes WHERE event_id = ?1 ORDER BY transport",
        )?;
        let raw_lanes = stmt
            .query_map([event_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut lanes = Vec::with_capacity(raw_lanes.len());
        for (transport, status, attempts, next_retry_at, last_error, updated_at) in raw_lanes {
            lanes.push(Lane {
                transport: parse_transport(&transport)?,
                status: parse_status(&status)?,
                attempts,
                next_retry_at,
                last_error,
                updated_at,
            });
        }

        Ok(Some(OutboxRow {
            event_id: event_id.to_string(),
            envelope: Envelope::from_json(&envelope)?,
            status: parse_status(&status)?,
            attempts,
            next_retry_at,
            last_error,
            created_at,
            updated_at,
            lanes,
        }))
    }

    fn write_row(conn: &mut Connection, row: &OutboxRow) -> Result<()> {
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO outbox
             (event_id, envelope, event_type, entity_id, status, attempts, next_retry_at,
              last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(event_id) DO UPDATE SET
                status = excluded.status,
                attempts = excluded.attempts,
                next_retry_at = excluded.next_retry_at,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at",
            params![
                row.event_id,
                row.envelope.to_json()?,
                row.envelope.event_type.as_str(),
                row.envelope.entity_id,
                row.status.as_str(),
                row.attempts,
                row.next_retry_at,
                row.last_error,
                row.created_at,
                row.updated_at,
            ],
        )?;
        for lane in &row.lanes {
            tx.execute(
                "INSERT INTO outbox_lanes
                 (event_id, transport, status, attempts, next_retry_at, last_error, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(event_id, transport) DO UPDATE SET
                    status = excluded.status,
                    attempts = excluded.attempts,
                    next_retry_at = excluded.next_retry_at,
                    last_error = excluded.last_error,
                    updated_at = excluded.updated_at",
                params![
                    row.event_id,
                    lane.transport.as_str(),
                    lane.status.as_str(),
                    lane.attempts,
                    lane.next_retry_at,
                    lane.last_error,
                    lane.updated_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn read_entity(row: &Row<'_>) -> rusqlite::Result<RawEntity> {
        Ok(RawEntity {
            entity_id: row.get(0)?,
            kind: row.get(1)?,
            fields: row.get(2)?,
            author_pubkey: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            retracted: row.get(6)?,
            last_event_id: row.get(7)?,
            lamport_clock: row.get(8)?,
            scope: row.get(9)?,
            base_score: row.get(10)?,
            trust_score: row.get(11)?,
            trust_tier: row.get(12)?,
        })
    }

    fn query_entities(
        &self,
        filter: &str,
        param: &str,
    ) -> Result<Vec<EntityRecord>> {
        let conn = self.lock()?;
        let sql = format!("{ENTITY_COLUMNS} WHERE {filter} ORDER BY created_at, entity_id");
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map([param], Self::read_entity)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawEntity::into_record).collect()
    }
}

const ENTITY_COLUMNS: &str = "SELECT entity_id, kind, fields, author_pubkey, created_at, updated_at,
    retracted, last_event_id, lamport_clock, scope, base_score, trust_score, trust_tier
    FROM entities";

struct RawEntity {
    entity_id: String,
    kind: String,
    fields: String,
    author_pubkey: String,
    created_at: i64,
    updated_at: i64,
    retracted: bool,
    last_event_id: String,
    lamport_clock: i64,
    scope: String,
    base_score: u8,
    trust_score: Option<u8>,
    trust_tier: u8,
}

impl RawEntity {
    fn into_record(self) -> Result<EntityRecord> {
        Ok(EntityRecord {
            kind: self
                .kind
                .parse::<EntityKind>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            fields: serde_json::from_str(&self.fields)?,
            scope: Scope::parse(&self.scope)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown scope {}", self.scope)))?,
            entity_id: self.entity_id,
            author_pubkey: self.author_pubkey,
            created_at: self.created_at,
            updated_at: self.updated_at,
            retracted: self.retracted,
            last_event_id: self.last_event_id,
            lamport_clock: self.lamport_clock.max(0) as u64,
            base_score: self.base_score,
            trust_score: self.trust_score,
            trust_tier: self.trust_tier,
        })
    }
}

fn parse_status(value: &str) -> Result<OutboxStatus> {
    OutboxStatus::parse(value).ok_or_else(|| StoreError::Corrupt(format!("unknown status {value}")))
}

fn parse_transport(value: &str) -> Result<Transport> {
    Transport::parse(value)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown transport {value}")))
}

impl OutboxStore for SqliteStore {
    fn enqueue(&self, envelope: &Envelope, transports: &[Transport], now: i64) -> Result<bool> {
        let mut conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM outbox WHERE event_id = ?1)",
            [&envelope.event_id],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(false);
        }

        let row = OutboxRow::new(envelope.clone(), transports, now);
        Self::write_row(&mut conn, &row)?;

        if row.status == OutboxStatus::Failed {
            warn!(
                event_id = %row.event_id,
                event_type = %envelope.event_type,
                code = row.last_error.as_deref().unwrap_or_default(),
                "Outbox row created without an eligible transport"
            );
        } else {
            debug!(
                event_id = %row.event_id,
                event_type = %envelope.event_type,
                lanes = row.lanes.len(),
                "Envelope enqueued"
            );
        }
        Ok(true)
    }

    fn load_due(&self, limit: usize, now: i64) -> Result<Vec<OutboxRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT o.event_id FROM outbox o
             WHERE EXISTS (
                SELECT 1 FROM outbox_lanes l
                WHERE l.event_id = o.event_id
                  AND l.status IN ('pending', 'retry')
                  AND (l.next_retry_at IS NULL OR l.next_retry_at <= ?1)
             )
             ORDER BY o.created_at ASC, o.event_id ASC
             LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(params![now, limit as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = Self::load_row(&conn, &id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn get(&self, event_id: &str) -> Result<Option<OutboxRow>> {
        let conn = self.lock()?;
        Self::load_row(&conn, event_id)
    }

    fn transition(
        &self,
        event_id: &str,
        transport: Transport,
        transition: Transition,
        now: i64,
    ) -> Result<OutboxStatus> {
        let mut conn = self.lock()?;
        let mut row = Self::load_row(&conn, event_id)?.ok_or_else(|| StoreError::NotFound {
            event_id: event_id.to_string(),
        })?;

        if !row.apply(transport, &transition, now) {
            warn!(event_id, transport = %transport, "Transition for a transport without a lane ignored");
            return Ok(row.status);
        }
        Self::write_row(&mut conn, &row)?;

        debug!(
            event_id,
            transport = %transport,
            status = %row.status,
            attempts = row.attempts,
            "Outbox lane transitioned"
        );
        Ok(row.status)
    }

    fn fail_all(&self, event_id: &str, code: &str, now: i64) -> Result<()> {
        let mut conn = self.lock()?;
        let mut row = Self::load_row(&conn, event_id)?.ok_or_else(|| StoreError::NotFound {
            event_id: event_id.to_string(),
        })?;
        row.fail_all(code, now);
        Self::write_row(&mut conn, &row)
    }

    fn discard(&self, event_id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM outbox_lanes WHERE event_id = ?1", [event_id])?;
        tx.execute("DELETE FROM outbox WHERE event_id = ?1", [event_id])?;
        tx.commit()?;
        Ok(())
    }

    fn prune_delivered(&self, before: i64) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM outbox_lanes WHERE event_id IN (
                SELECT event_id FROM outbox WHERE status = 'delivered' AND updated_at < ?1
             )",
            [before],
        )?;
        let removed = tx.execute(
            "DELETE FROM outbox WHERE status = 'delivered' AND updated_at < ?1",
            [before],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}

impl EntityStore for SqliteStore {
    fn get_entity(&self, entity_id: &str) -> Result<Option<EntityRecord>> {
        let conn = self.lock()?;
        let sql = format!("{ENTITY_COLUMNS} WHERE entity_id = ?1");
        let raw = conn
            .query_row(&sql, [entity_id], Self::read_entity)
            .optional()?;
        raw.map(RawEntity::into_record).transpose()
    }

    fn put_entity(&self, record: &EntityRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO entities
             (entity_id, kind, fields, author_pubkey, created_at, updated_at, retracted,
              last_event_id, lamport_clock, scope, base_score, trust_score, trust_tier)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.entity_id,
                record.kind.as_str(),
                serde_json::to_string(&record.fields)?,
                record.author_pubkey,
                record.created_at,
                record.updated_at,
                record.retracted,
                record.last_event_id,
                record.lamport_clock.min(i64::MAX as u64) as i64,
                record.scope.as_str(),
                record.base_score,
                record.trust_score,
                record.trust_tier,
            ],
        )?;
        Ok(())
    }

    fn entities_of_kind(&self, kind: EntityKind) -> Result<Vec<EntityRecord>> {
        self.query_entities("kind = ?1", kind.as_str())
    }

    fn entities_by_author(&self, author_pubkey: &str) -> Result<Vec<EntityRecord>> {
        self.query_entities("author_pubkey = ?1", author_pubkey)
    }

    fn get_endorsement(&self, entity_id: &str, actor: &str) -> Result<Option<Endorsement>> {
        let conn = self.lock()?;
        let endorsement = conn
            .query_row(
                "SELECT entity_id, actor, score, comment, created_at, event_id, authenticated
                 FROM endorsements WHERE entity_id = ?1 AND actor = ?2",
                [entity_id, actor],
                read_endorsement,
            )
            .optional()?;
        Ok(endorsement)
    }

    fn put_endorsement(&self, endorsement: &Endorsement) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO endorsements
             (entity_id, actor, score, comment, created_at, event_id, authenticated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                endorsement.entity_id,
                endorsement.actor,
                endorsement.score,
                endorsement.comment,
                endorsement.created_at,
                endorsement.event_id,
                endorsement.authenticated,
            ],
        )?;
        Ok(())
    }

    fn endorsements_for(&self, entity_id: &str) -> Result<Vec<Endorsement>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT entity_id, actor, score, comment, created_at, event_id, authenticated
             FROM endorsements WHERE entity_id = ?1 ORDER BY actor",
        )?;
        let endorsements = stmt
            .query_map([entity_id], read_endorsement)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(endorsements)
    }

    fn get_report(&self, entity_id: &str, actor: &str) -> Result<Option<Report>> {
        let conn = self.lock()?;
        let report = conn
            .query_row(
                "SELECT entity_id, actor, reason, created_at, event_id, authenticated
                 FROM reports WHERE entity_id = ?1 AND actor = ?2",
                [entity_id, actor],
                read_report,
            )
            .optional()?;
        Ok(report)
    }

    fn put_report(&self, report: &Report) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO reports
             (entity_id, actor, reason, created_at, event_id, authenticated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                report.entity_id,
                report.actor,
                report.reason,
                report.created_at,
                report.event_id,
                report.authenticated,
            ],
        )?;
        Ok(())
    }

    fn reports_for(&self, entity_id: &str) -> Result<Vec<Report>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT entity_id, actor, reason, created_at, event_id, authenticated
             FROM reports WHERE entity_id = ?1 ORDER BY actor",
        )?;
        let reports = stmt
            .query_map([entity_id], read_report)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(reports)
    }

    fn max_lamport(&self) -> Result<u64> {
        let conn = self.lock()?;
        let max: Option<i64> =
            conn.query_row("SELECT MAX(lamport_clock) FROM entities", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0).max(0) as u64)
    }
}

fn read_endorsement(row: &Row<'_>) -> rusqlite::Result<Endorsement> {
    Ok(Endorsement {
        entity_id: row.get(0)?,
        actor: row.get(1)?,
        score: row.get(2)?,
        comment: row.get(3)?,
        created_at: row.get(4)?,
        event_id: row.get(5)?,
        authenticated: row.get(6)?,
    })
}

fn read_report(row: &Row<'_>) -> rusqlite::Result<Report> {
    Ok(Report {
        entity_id: row.get(0)?,
        actor: row.get(1)?,
        reason: row.get(2)?,
        created_at: row.get(3)?,
        event_id: row.get(4)?,
        authenticated: row.get(5)?,
    })
}

impl CursorStore for SqliteStore {
    fn get_cursor(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let position = conn
            .query_row(
                "SELECT position FROM sync_cursors WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(position)
    }

    fn advance_cursor(&self, key: &str, position: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current: Option<String> = tx
            .query_row(
                "SELECT position FROM sync_cursors WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        if !cursor_is_ahead(current.as_deref(), position) {
            return Ok(false);
        }
        tx.execute(
            "INSERT OR REPLACE INTO sync_cursors (key, position) VALUES (?1, ?2)",
            [key, position],
        )?;
        tx.commit()?;
        debug!(key, position, "Sync cursor advanced");
        Ok(true)
    }
}

impl PublicationQueue for SqliteStore {
    fn push_publication(&self, entry: &PublicationEntry) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO publication_queue
             (entry_id, entity_id, author_pubkey, photos, queued_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.entry_id,
                entry.entity_id,
                entry.author_pubkey,
                serde_json::to_string(&entry.photos)?,
                entry.queued_at,
            ],
        )?;
        Ok(())
    }

    fn pending_publications(&self, limit: usize) -> Result<Vec<PublicationEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT entry_id, entity_id, author_pubkey, photos, queued_at
             FROM publication_queue ORDER BY queued_at ASC, entry_id ASC LIMIT ?1",
        )?;
        let raw = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(entry_id, entity_id, author_pubkey, photos, queued_at)| {
                Ok(PublicationEntry {
                    entry_id,
                    entity_id,
                    author_pubkey,
                    photos: serde_json::from_str(&photos)?,
                    queued_at,
                })
            })
            .collect()
    }

    fn remove_publication(&self, entry_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM publication_queue WHERE entry_id = ?1",
            [entry_id],
        )?;
        Ok(())
    }

    fn record_publication(
        &self,
        entry: &PublicationEntry,
        accepted: bool,
        reasons: &[String],
        processed_at: i64,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO publication_history
             (entry_id, entity_id, author_pubkey, accepted, reasons, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.entry_id,
                entry.entity_id,
                entry.author_pubkey,
                accepted,
                serde_json::to_string(reasons)?,
                processed_at,
            ],
        )?;
        Ok(())
    }

    fn publications_since(&self, author_pubkey: &str, since: i64) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM publication_history
             WHERE author_pubkey = ?1 AND processed_at >= ?2",
            params![author_pubkey, since],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
