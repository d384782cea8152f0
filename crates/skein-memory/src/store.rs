//! SQLite-backed storage for memory indexing and search.
//!
//! Four logical relations: `meta` (key-value scratchpad), `files`
//! (indexed files, keyed by path+source), `chunks` (text chunks), and
//! `tasks`. A parallel FTS5 virtual table over the chunks provides BM25
//! full-text search; when FTS5 cannot be created the store records
//! `fts_available=false` and search degrades to `LIKE` substring
//! matching with a constant relevance score.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use skein_types::MemoryError;

use crate::types::{
    MemoryChunk, MemoryFile, MemorySearchConfig, MemorySearchResult, MemorySource, MemoryTask,
};

/// Relevance assigned to `LIKE` fallback matches.
const LIKE_FALLBACK_SCORE: f64 = 0.5;

/// Persistent store for memory files, chunks, and tasks.
pub struct MemoryStore {
    conn: Mutex<Connection>,
    fts_available: bool,
    last_error: Mutex<Option<String>>,
}

impl MemoryStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn =
            Connection::open(path).map_err(|e| MemoryError::Storage(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| MemoryError::Storage(e.to_string()))?;

        let mut store = Self {
            conn: Mutex::new(conn),
            fts_available: false,
            last_error: Mutex::new(None),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, MemoryError> {
        let conn =
            Connection::open_in_memory().map_err(|e| MemoryError::Storage(e.to_string()))?;
        let mut store = Self {
            conn: Mutex::new(conn),
            fts_available: false,
            last_error: Mutex::new(None),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Whether the BM25 full-text index is in use.
    pub fn fts_available(&self) -> bool {
        self.fts_available
    }

    /// Most recent storage error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect("last_error poisoned").clone()
    }

    fn record_error(&self, e: rusqlite::Error) -> MemoryError {
        let msg = e.to_string();
        *self.last_error.lock().expect("last_error poisoned") = Some(msg.clone());
        MemoryError::Storage(msg)
    }

    fn ensure_schema(&mut self) -> Result<(), MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
               key TEXT PRIMARY KEY,
               value TEXT
             );
             CREATE TABLE IF NOT EXISTS files (
               path TEXT NOT NULL,
               source TEXT NOT NULL,
               abs_path TEXT,
               hash TEXT,
               mtime INTEGER,
               size INTEGER,
               PRIMARY KEY (path, source)
             );
             CREATE TABLE IF NOT EXISTS chunks (
               id TEXT PRIMARY KEY,
               path TEXT NOT NULL,
               source TEXT NOT NULL,
               start_line INTEGER,
               end_line INTEGER,
               text TEXT,
               hash TEXT,
               updated_at INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path, source);
             CREATE TABLE IF NOT EXISTS tasks (
               id TEXT PRIMARY KEY,
               content TEXT NOT NULL,
               context TEXT,
               channel TEXT,
               user_id TEXT,
               created_at INTEGER,
               due_at INTEGER,
               completed INTEGER DEFAULT 0,
               completed_at INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(due_at);
             CREATE INDEX IF NOT EXISTS idx_tasks_completed ON tasks(completed);",
        )
        .map_err(|e| MemoryError::Storage(e.to_string()))?;

        // The full-text index is best-effort: without FTS5 the store
        // still works with LIKE fallback search.
        let fts = conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
               chunk_id UNINDEXED,
               path UNINDEXED,
               source UNINDEXED,
               text
             )",
        );
        drop(conn);

        self.fts_available = match fts {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "FTS5 unavailable, search degrades to substring matching");
                false
            }
        };
        self.set_meta(
            "fts_available",
            if self.fts_available { "true" } else { "false" },
        )?;
        Ok(())
    }

    // ── Meta ─────────────────────────────────────────────────────────

    /// Set a scratchpad value.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(|e| self.record_error(e))?;
        Ok(())
    }

    /// Get a scratchpad value, or `default` when absent.
    pub fn get_meta(&self, key: &str, default: &str) -> String {
        let conn = self.conn.lock().expect("connection poisoned");
        conn.query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .ok()
        .flatten()
        .unwrap_or_else(|| default.to_string())
    }

    // ── Files ────────────────────────────────────────────────────────

    /// Insert or replace a file row.
    pub fn upsert_file(&self, file: &MemoryFile) -> Result<(), MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO files (path, source, abs_path, hash, mtime, size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file.path,
                file.source.as_str(),
                file.abs_path,
                file.hash,
                file.mtime_ms,
                file.size
            ],
        )
        .map_err(|e| self.record_error(e))?;
        Ok(())
    }

    /// Delete a file row.
    pub fn delete_file(&self, path: &str, source: MemorySource) -> Result<(), MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        conn.execute(
            "DELETE FROM files WHERE path = ?1 AND source = ?2",
            params![path, source.as_str()],
        )
        .map_err(|e| self.record_error(e))?;
        Ok(())
    }

    /// Fetch a file row by primary key.
    pub fn get_file(
        &self,
        path: &str,
        source: MemorySource,
    ) -> Result<Option<MemoryFile>, MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        conn.query_row(
            "SELECT path, source, abs_path, hash, mtime, size
             FROM files WHERE path = ?1 AND source = ?2",
            params![path, source.as_str()],
            |row| {
                Ok(MemoryFile {
                    path: row.get(0)?,
                    source: MemorySource::parse(&row.get::<_, String>(1)?),
                    abs_path: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    hash: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    mtime_ms: row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
                    size: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
                })
            },
        )
        .optional()
        .map_err(|e| self.record_error(e))
    }

    /// All file rows for a source.
    pub fn list_files(&self, source: MemorySource) -> Result<Vec<MemoryFile>, MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT path, source, abs_path, hash, mtime, size
                 FROM files WHERE source = ?1 ORDER BY path",
            )
            .map_err(|e| self.record_error(e))?;
        let rows = stmt
            .query_map(params![source.as_str()], |row| {
                Ok(MemoryFile {
                    path: row.get(0)?,
                    source: MemorySource::parse(&row.get::<_, String>(1)?),
                    abs_path: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    hash: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    mtime_ms: row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
                    size: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
                })
            })
            .map_err(|e| self.record_error(e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.record_error(e))?;
        Ok(rows)
    }

    /// Paths in the `files` table for `source` that are not in `active`.
    pub fn get_stale_paths(
        &self,
        active: &[String],
        source: MemorySource,
    ) -> Result<Vec<String>, MemoryError> {
        let known = self.list_files(source)?;
        Ok(known
            .into_iter()
            .map(|f| f.path)
            .filter(|p| !active.contains(p))
            .collect())
    }

    // ── Chunks ───────────────────────────────────────────────────────

    /// Insert or replace a chunk row and mirror it into the FTS index.
    pub fn upsert_chunk(&self, chunk: &MemoryChunk) -> Result<(), MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO chunks
               (id, path, source, start_line, end_line, text, hash, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                chunk.id,
                chunk.path,
                chunk.source.as_str(),
                chunk.start_line,
                chunk.end_line,
                chunk.text,
                chunk.hash,
                chunk.updated_at
            ],
        )
        .map_err(|e| self.record_error(e))?;

        if self.fts_available {
            conn.execute(
                "DELETE FROM chunks_fts WHERE chunk_id = ?1",
                params![chunk.id],
            )
            .map_err(|e| self.record_error(e))?;
            conn.execute(
                "INSERT INTO chunks_fts (chunk_id, path, source, text) VALUES (?1, ?2, ?3, ?4)",
                params![chunk.id, chunk.path, chunk.source.as_str(), chunk.text],
            )
            .map_err(|e| self.record_error(e))?;
        }
        Ok(())
    }

    /// Delete every chunk belonging to a file.
    pub fn delete_chunks_for_file(
        &self,
        path: &str,
        source: MemorySource,
    ) -> Result<(), MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        if self.fts_available {
            conn.execute(
                "DELETE FROM chunks_fts WHERE path = ?1 AND source = ?2",
                params![path, source.as_str()],
            )
            .map_err(|e| self.record_error(e))?;
        }
        conn.execute(
            "DELETE FROM chunks WHERE path = ?1 AND source = ?2",
            params![path, source.as_str()],
        )
        .map_err(|e| self.record_error(e))?;
        Ok(())
    }

    /// All chunks of a file, ordered by start line.
    pub fn get_chunks_for_file(
        &self,
        path: &str,
        source: MemorySource,
    ) -> Result<Vec<MemoryChunk>, MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT id, path, source, start_line, end_line, text, hash, updated_at
                 FROM chunks WHERE path = ?1 AND source = ?2 ORDER BY start_line",
            )
            .map_err(|e| self.record_error(e))?;
        let rows = stmt
            .query_map(params![path, source.as_str()], |row| {
                Ok(MemoryChunk {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    source: MemorySource::parse(&row.get::<_, String>(2)?),
                    start_line: row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
                    end_line: row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
                    text: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    hash: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    updated_at: row.get::<_, Option<i64>>(7)?.unwrap_or_default(),
                })
            })
            .map_err(|e| self.record_error(e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.record_error(e))?;
        Ok(rows)
    }

    /// Count chunks for a source.
    pub fn count_chunks(&self, source: MemorySource) -> i64 {
        let conn = self.conn.lock().expect("connection poisoned");
        conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE source = ?1",
            params![source.as_str()],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    // ── Search ───────────────────────────────────────────────────────

    /// Quote each whitespace-separated term so punctuation in the user
    /// query cannot be misread as FTS5 syntax.
    fn fts_match_expr(query: &str) -> String {
        query
            .split_whitespace()
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Ranked full-text search over the chunk index.
    ///
    /// BM25 raw scores are negative with lower-is-better; they are mapped
    /// through `1 / (1 - raw)` into `(0, 1]` so `min_score` filters
    /// behave sensibly. The `LIKE` fallback scores a constant 0.5.
    pub fn search(&self, query: &str, config: &MemorySearchConfig) -> Vec<MemorySearchResult> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        if self.fts_available {
            match self.search_fts(query, config) {
                Ok(results) => return results,
                Err(e) => {
                    debug!(error = %e, "FTS search failed, falling back to LIKE");
                }
            }
        }
        self.search_like(query, config).unwrap_or_default()
    }

    fn search_fts(
        &self,
        query: &str,
        config: &MemorySearchConfig,
    ) -> Result<Vec<MemorySearchResult>, MemoryError> {
        let expr = Self::fts_match_expr(query);
        let conn = self.conn.lock().expect("connection poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT f.path, f.source, f.text, bm25(chunks_fts) AS score,
                        c.start_line, c.end_line
                 FROM chunks_fts f
                 LEFT JOIN chunks c ON c.id = f.chunk_id
                 WHERE chunks_fts MATCH ?1
                 ORDER BY score
                 LIMIT ?2",
            )
            .map_err(|e| self.record_error(e))?;
        let rows = stmt
            .query_map(params![expr, config.max_results], |row| {
                let raw: f64 = row.get(3)?;
                Ok(MemorySearchResult {
                    path: row.get(0)?,
                    source: MemorySource::parse(&row.get::<_, String>(1)?),
                    snippet: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    score: 1.0 / (1.0 - raw),
                    start_line: row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
                    end_line: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
                    citation: None,
                })
            })
            .map_err(|e| self.record_error(e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.record_error(e))?;

        Ok(rows
            .into_iter()
            .filter(|r| r.score >= config.min_score)
            .collect())
    }

    fn search_like(
        &self,
        query: &str,
        config: &MemorySearchConfig,
    ) -> Result<Vec<MemorySearchResult>, MemoryError> {
        let pattern = format!("%{query}%");
        let conn = self.conn.lock().expect("connection poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT path, source, start_line, end_line, text
                 FROM chunks WHERE text LIKE ?1 LIMIT ?2",
            )
            .map_err(|e| self.record_error(e))?;
        let rows = stmt
            .query_map(params![pattern, config.max_results], |row| {
                Ok(MemorySearchResult {
                    path: row.get(0)?,
                    source: MemorySource::parse(&row.get::<_, String>(1)?),
                    start_line: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
                    end_line: row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
                    snippet: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    score: LIKE_FALLBACK_SCORE,
                    citation: None,
                })
            })
            .map_err(|e| self.record_error(e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.record_error(e))?;
        Ok(rows)
    }

    // ── Tasks ────────────────────────────────────────────────────────

    /// Insert or replace a task.
    pub fn upsert_task(&self, task: &MemoryTask) -> Result<(), MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO tasks
               (id, content, context, channel, user_id, created_at, due_at, completed, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.id,
                task.content,
                task.context,
                task.channel,
                task.user_id,
                task.created_at,
                task.due_at,
                task.completed as i64,
                task.completed_at
            ],
        )
        .map_err(|e| self.record_error(e))?;
        Ok(())
    }

    /// Delete a task by id.
    pub fn delete_task(&self, id: &str) -> Result<(), MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .map_err(|e| self.record_error(e))?;
        Ok(())
    }

    fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryTask> {
        Ok(MemoryTask {
            id: row.get(0)?,
            content: row.get(1)?,
            context: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            channel: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            user_id: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            created_at: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
            due_at: row.get::<_, Option<i64>>(6)?.unwrap_or_default(),
            completed: row.get::<_, Option<i64>>(7)?.unwrap_or_default() != 0,
            completed_at: row.get::<_, Option<i64>>(8)?.unwrap_or_default(),
        })
    }

    const TASK_COLUMNS: &'static str =
        "id, content, context, channel, user_id, created_at, due_at, completed, completed_at";

    /// Fetch a task by id.
    pub fn get_task(&self, id: &str) -> Result<Option<MemoryTask>, MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", Self::TASK_COLUMNS),
            params![id],
            Self::row_to_task,
        )
        .optional()
        .map_err(|e| self.record_error(e))
    }

    /// All tasks, optionally including completed ones.
    pub fn list_tasks(&self, include_completed: bool) -> Result<Vec<MemoryTask>, MemoryError> {
        let sql = if include_completed {
            format!(
                "SELECT {} FROM tasks ORDER BY due_at, created_at",
                Self::TASK_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM tasks WHERE completed = 0 ORDER BY due_at, created_at",
                Self::TASK_COLUMNS
            )
        };
        let conn = self.conn.lock().expect("connection poisoned");
        let mut stmt = conn.prepare(&sql).map_err(|e| self.record_error(e))?;
        let rows = stmt
            .query_map([], Self::row_to_task)
            .map_err(|e| self.record_error(e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.record_error(e))?;
        Ok(rows)
    }

    /// Pending tasks ordered by (due_at, created_at).
    pub fn get_pending_tasks(&self) -> Result<Vec<MemoryTask>, MemoryError> {
        self.list_tasks(false)
    }

    /// Pending tasks with a due date at or before `timestamp_ms`.
    pub fn get_tasks_due_before(
        &self,
        timestamp_ms: i64,
    ) -> Result<Vec<MemoryTask>, MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM tasks
                 WHERE completed = 0 AND due_at != 0 AND due_at <= ?1
                 ORDER BY due_at, created_at",
                Self::TASK_COLUMNS
            ))
            .map_err(|e| self.record_error(e))?;
        let rows = stmt
            .query_map(params![timestamp_ms], Self::row_to_task)
            .map_err(|e| self.record_error(e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.record_error(e))?;
        Ok(rows)
    }

    /// Mark a task completed. Returns whether a row changed.
    pub fn complete_task(&self, id: &str, completed_at_ms: i64) -> Result<bool, MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        let changed = conn
            .execute(
                "UPDATE tasks SET completed = 1, completed_at = ?2 WHERE id = ?1",
                params![id, completed_at_ms],
            )
            .map_err(|e| self.record_error(e))?;
        Ok(changed > 0)
    }

    /// Update a task's due date. Returns whether a row changed.
    pub fn update_task_due(&self, id: &str, due_at_ms: i64) -> Result<bool, MemoryError> {
        let conn = self.conn.lock().expect("connection poisoned");
        let changed = conn
            .execute(
                "UPDATE tasks SET due_at = ?2 WHERE id = ?1",
                params![id, due_at_ms],
            )
            .map_err(|e| self.record_error(e))?;
        Ok(changed > 0)
    }
}
