//! SQLite-backed durable queue and record cache.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::{
    op::{PendingRequest, PendingRequestEnvelope, REQUEST_FORMAT_VERSION},
    types::{ResourceId, TimeRange},
};

use super::{DurableStore, PersistError, PersistResult, Table, document_id, document_span_ms};

/// SQLite implementation of [`crate::persist::DurableStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates a SQLite-backed store at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite store.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    fn load_queue(conn: &Connection) -> PersistResult<Vec<PendingRequest>> {
        let mut stmt = conn.prepare("SELECT payload FROM request_queue ORDER BY seq ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(decode_request_payload(&row?)?);
        }
        Ok(out)
    }

    fn write_records(
        &mut self,
        table: Table,
        values: &[Value],
        replace: bool,
    ) -> PersistResult<Vec<Value>> {
        let sql = if replace {
            "INSERT OR REPLACE INTO records(kind, id, start_ms, end_ms, payload) VALUES (?1, ?2, ?3, ?4, ?5)"
        } else {
            "INSERT INTO records(kind, id, start_ms, end_ms, payload) VALUES (?1, ?2, ?3, ?4, ?5)"
        };

        let tx = self.conn.transaction()?;
        {
            let mut exists =
                tx.prepare("SELECT 1 FROM records WHERE kind = ?1 AND id = ?2")?;
            let mut stmt = tx.prepare(sql)?;
            for value in values {
                let id = document_id(value)?;
                if !replace
                    && exists
                        .query_row(params![table.as_str(), id.as_str()], |_| Ok(()))
                        .optional()?
                        .is_some()
                {
                    return Err(PersistError::Duplicate {
                        table: table.as_str(),
                        id: id.to_string(),
                    });
                }
                let span = document_span_ms(value);
                stmt.execute(params![
                    table.as_str(),
                    id.as_str(),
                    span.map(|(start, _)| start),
                    span.map(|(_, end)| end),
                    serde_json::to_vec(value)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(values.to_vec())
    }
}

impl DurableStore for SqliteStore {
    fn enqueue(&mut self, requests: &[PendingRequest]) -> PersistResult<Vec<PendingRequest>> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO request_queue(resource_id, operation_id, http_method, exp_ms, payload) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for request in requests {
                let payload = serde_json::to_vec(&PendingRequestEnvelope::new(request.clone()))?;
                stmt.execute(params![
                    request.resource_id.as_str(),
                    request.operation_id.as_str(),
                    request.http_method.as_str(),
                    request.exp.timestamp_millis(),
                    payload,
                ])?;
            }
        }
        let queue = Self::load_queue(&tx)?;
        tx.commit()?;
        Ok(queue)
    }

    fn dequeue(&mut self) -> PersistResult<Option<PendingRequest>> {
        let tx = self.conn.transaction()?;
        let head: Option<(i64, Vec<u8>)> = tx
            .query_row(
                "SELECT seq, payload FROM request_queue ORDER BY seq ASC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((seq, payload)) = head else {
            return Ok(None);
        };
        tx.execute("DELETE FROM request_queue WHERE seq = ?1", params![seq])?;
        tx.commit()?;

        // An undecodable head is still removed so it cannot wedge the queue.
        decode_request_payload(&payload).map(Some)
    }

    fn clear_queue(&mut self) -> PersistResult<()> {
        self.conn.execute("DELETE FROM request_queue", [])?;
        Ok(())
    }

    fn queued(&self) -> PersistResult<Vec<PendingRequest>> {
        Self::load_queue(&self.conn)
    }

    fn add(&mut self, table: Table, values: &[Value]) -> PersistResult<Vec<Value>> {
        self.write_records(table, values, false)
    }

    fn put(&mut self, table: Table, values: &[Value]) -> PersistResult<Vec<Value>> {
        self.write_records(table, values, true)
    }

    fn delete(&mut self, table: Table, ids: &[ResourceId]) -> PersistResult<Vec<ResourceId>> {
        let tx = self.conn.transaction()?;
        let mut removed = Vec::new();
        {
            let mut stmt = tx.prepare("DELETE FROM records WHERE kind = ?1 AND id = ?2")?;
            for id in ids {
                if stmt.execute(params![table.as_str(), id.as_str()])? > 0 {
                    removed.push(id.clone());
                }
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn find_by_id(&self, table: Table, id: &ResourceId) -> PersistResult<Option<Value>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM records WHERE kind = ?1 AND id = ?2",
                params![table.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|bytes| serde_json::from_slice(&bytes).map_err(PersistError::from))
            .transpose()
    }

    fn find(&self, table: Table, range: &TimeRange) -> PersistResult<Vec<Value>> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM records \
             WHERE kind = ?1 AND start_ms <= ?2 AND end_ms >= ?3 \
             ORDER BY start_ms ASC, id ASC",
        )?;
        let rows = stmt.query_map(
            params![
                table.as_str(),
                range.end.timestamp_millis(),
                range.start.timestamp_millis(),
            ],
            |row| row.get::<_, Vec<u8>>(0),
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_slice(&row?)?);
        }
        Ok(out)
    }

    /// Checkpoints the WAL into the main database file.
    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

fn decode_request_payload(payload: &[u8]) -> PersistResult<PendingRequest> {
    let envelope: PendingRequestEnvelope = serde_json::from_slice(payload)?;
    if envelope.format_version != REQUEST_FORMAT_VERSION {
        return Err(PersistError::Message(format!(
            "unsupported request format version: {}",
            envelope.format_version
        )));
    }
    Ok(envelope.request)
}
