//! High-level memory operations.
//!
//! The manager owns file discovery, hash-based change detection,
//! chunking, session-transcript extraction, search decoration, and the
//! task API. It holds no chunk state in memory between operations; the
//! store rows are the single source of truth.

use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use skein_types::MemoryError;

use crate::store::MemoryStore;
use crate::types::{
    CitationMode, MemoryChunk, MemoryConfig, MemoryFile, MemorySearchConfig, MemorySearchResult,
    MemorySource, MemoryTask,
};

/// File name of the primary memory document.
const PRIMARY_MEMORY_FILE: &str = "MEMORY.md";

/// High-level interface over the memory store.
pub struct MemoryManager {
    config: MemoryConfig,
    store: MemoryStore,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Largest suffix of `s` at most `max_bytes` long, starting on a char
/// boundary.
fn char_boundary_suffix(s: &str, max_bytes: usize) -> &str {
    let mut start = s.len().saturating_sub(max_bytes);
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

impl MemoryManager {
    /// Open the store at the configured path.
    pub fn new(config: MemoryConfig) -> Result<Self, MemoryError> {
        let store = MemoryStore::open(&config.db_path)?;
        info!(
            db = %config.db_path.display(),
            fts = store.fts_available(),
            "memory store opened"
        );
        Ok(Self { config, store })
    }

    /// The active configuration.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Most recent storage error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.store.last_error()
    }

    // ── Sync ─────────────────────────────────────────────────────────

    /// Scan memory sources and re-index anything whose content hash
    /// changed. Unchanged files are skipped; files that disappeared have
    /// their chunks and rows deleted. A sync over an unchanged tree is a
    /// no-op.
    pub fn sync(&self) -> Result<(), MemoryError> {
        if self.config.has_source(MemorySource::Memory) {
            self.sync_source(self.discover_memory_files(), MemorySource::Memory, false)?;
        }
        if self.config.has_source(MemorySource::Sessions) {
            self.sync_source(self.discover_session_files(), MemorySource::Sessions, true)?;
        }
        Ok(())
    }

    fn sync_source(
        &self,
        files: Vec<(String, PathBuf)>,
        source: MemorySource,
        extract_transcript: bool,
    ) -> Result<(), MemoryError> {
        let mut active: Vec<String> = Vec::with_capacity(files.len());

        for (rel, abs) in files {
            active.push(rel.clone());

            let content = match std::fs::read_to_string(&abs) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %abs.display(), error = %e, "failed to read memory file");
                    continue;
                }
            };
            let hash = sha256_hex(content.as_bytes());

            let unchanged = self
                .store
                .get_file(&rel, source)?
                .map(|f| f.hash == hash)
                .unwrap_or(false);
            if unchanged {
                continue;
            }

            debug!(path = %rel, source = source.as_str(), "re-indexing memory file");
            self.store.delete_chunks_for_file(&rel, source)?;

            let text = if extract_transcript {
                normalize_session_text(&extract_session_text(&content))
            } else {
                content.clone()
            };
            for chunk in self.chunk_content(&text, &rel, source) {
                self.store.upsert_chunk(&chunk)?;
            }

            let meta = std::fs::metadata(&abs).ok();
            self.store.upsert_file(&MemoryFile {
                path: rel,
                abs_path: abs.to_string_lossy().into_owned(),
                source,
                hash,
                mtime_ms: meta
                    .as_ref()
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0),
                size: meta.map(|m| m.len() as i64).unwrap_or(0),
            })?;
        }

        for stale in self.store.get_stale_paths(&active, source)? {
            debug!(path = %stale, source = source.as_str(), "removing stale memory file");
            self.store.delete_chunks_for_file(&stale, source)?;
            self.store.delete_file(&stale, source)?;
        }
        Ok(())
    }

    /// Memory files in indexing order: the root `MEMORY.md`
    /// (case-insensitive, first match wins), then every `*.md` under
    /// `<workspace>/memory/`.
    fn discover_memory_files(&self) -> Vec<(String, PathBuf)> {
        let mut files = Vec::new();

        if let Ok(entries) = std::fs::read_dir(&self.config.workspace_dir) {
            let mut roots: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file()
                        && p.file_name()
                            .and_then(|n| n.to_str())
                            .map(|n| n.eq_ignore_ascii_case(PRIMARY_MEMORY_FILE))
                            .unwrap_or(false)
                })
                .collect();
            roots.sort();
            if let Some(primary) = roots.into_iter().next() {
                files.push((self.rel_path(&primary), primary));
            }
        }

        let memory_dir = self.config.workspace_dir.join("memory");
        let mut extra: Vec<PathBuf> = WalkDir::new(&memory_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().map(|x| x == "md").unwrap_or(false))
            .collect();
        extra.sort();
        for path in extra {
            files.push((self.rel_path(&path), path));
        }
        files
    }

    /// Session transcripts: `*.jsonl` under `<workspace>/.skein/sessions/`.
    fn discover_session_files(&self) -> Vec<(String, PathBuf)> {
        let dir = self.config.workspace_dir.join(".skein").join("sessions");
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().map(|x| x == "jsonl").unwrap_or(false))
            .collect();
        paths.sort();
        paths
            .into_iter()
            .map(|p| (self.rel_path(&p), p))
            .collect()
    }

    fn rel_path(&self, abs: &Path) -> String {
        abs.strip_prefix(&self.config.workspace_dir)
            .unwrap_or(abs)
            .to_string_lossy()
            .into_owned()
    }

    // ── Chunking ─────────────────────────────────────────────────────

    /// Split text on blank lines and greedily pack paragraphs into
    /// chunks of at most `max_chars`, carrying `overlap_chars` of the
    /// previous chunk into the next. Line ranges are tracked across the
    /// consumed paragraphs.
    pub fn chunk_content(
        &self,
        content: &str,
        path: &str,
        source: MemorySource,
    ) -> Vec<MemoryChunk> {
        let max_chars = self.config.chunking.max_chars();
        let overlap_chars = self.config.chunking.overlap_chars();
        let paragraphs = split_paragraphs(content);

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut chunk_start_line: i64 = 1;
        let mut line_count: i64 = 1;

        let mut push_chunk = |text: &str, start: i64, end: i64| {
            chunks.push(MemoryChunk {
                id: Uuid::new_v4().to_string(),
                path: path.to_string(),
                source,
                start_line: start,
                end_line: end.max(start),
                text: text.to_string(),
                hash: sha256_hex(text.as_bytes()),
                updated_at: now_ms(),
            });
        };

        for para in &paragraphs {
            let para_lines = para.matches('\n').count() as i64 + 1;

            if !current.is_empty() && current.len() + para.len() > max_chars {
                push_chunk(&current, chunk_start_line, line_count - 1);
                if overlap_chars > 0 && current.len() > overlap_chars {
                    current = char_boundary_suffix(&current, overlap_chars).to_string();
                } else {
                    current.clear();
                }
                chunk_start_line = line_count;
            }

            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(para);
            line_count += para_lines;
        }

        if !current.is_empty() {
            push_chunk(&current, chunk_start_line, line_count);
        }
        chunks
    }

    // ── Memory file operations ───────────────────────────────────────

    /// Resolve a workspace-relative path, rejecting absolute paths and
    /// any traversal outside the workspace.
    fn resolve_in_workspace(&self, rel: &str) -> Result<PathBuf, MemoryError> {
        let candidate = Path::new(rel);
        if candidate.is_absolute() {
            return Err(MemoryError::InvalidPath(rel.to_string()));
        }
        for component in candidate.components() {
            if matches!(component, Component::ParentDir) {
                return Err(MemoryError::InvalidPath(rel.to_string()));
            }
        }
        Ok(self.config.workspace_dir.join(candidate))
    }

    /// Overwrite a memory file (default `MEMORY.md`) and re-sync.
    pub fn save_memory(&self, content: &str, filename: Option<&str>) -> Result<(), MemoryError> {
        let path = self.resolve_in_workspace(filename.unwrap_or(PRIMARY_MEMORY_FILE))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        self.sync()
    }

    /// Write today's daily memory file, `memory/YYYY-MM-DD.md` (UTC).
    pub fn save_daily_memory(&self, content: &str) -> Result<String, MemoryError> {
        let filename = format!("memory/{}.md", Utc::now().format("%Y-%m-%d"));
        self.save_memory(content, Some(&filename))?;
        Ok(filename)
    }

    /// Append to a memory file with a separating newline, then re-sync.
    pub fn append_to_memory(&self, content: &str, filename: &str) -> Result<(), MemoryError> {
        let path = self.resolve_in_workspace(filename)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut existing = std::fs::read_to_string(&path).unwrap_or_default();
        if !existing.is_empty() && !existing.ends_with('\n') {
            existing.push('\n');
        }
        existing.push('\n');
        existing.push_str(content);
        std::fs::write(&path, existing)?;
        self.sync()
    }

    /// Read a memory file's content by workspace-relative path.
    pub fn get_memory_content(&self, rel: &str) -> Result<String, MemoryError> {
        let path = self.resolve_in_workspace(rel)?;
        std::fs::read_to_string(path).map_err(MemoryError::from)
    }

    /// Workspace-relative paths of all discovered memory files.
    pub fn list_memory_files(&self) -> Vec<String> {
        self.discover_memory_files()
            .into_iter()
            .map(|(rel, _)| rel)
            .collect()
    }

    // ── Search ───────────────────────────────────────────────────────

    /// Search with the configured defaults.
    pub fn search(&self, query: &str, chat_type: Option<&str>) -> Vec<MemorySearchResult> {
        self.search_with(query, &self.config.search, chat_type)
    }

    /// Search with explicit parameters, decorating results with
    /// citations per the citation mode.
    pub fn search_with(
        &self,
        query: &str,
        search: &MemorySearchConfig,
        chat_type: Option<&str>,
    ) -> Vec<MemorySearchResult> {
        let include_citations = match search.citation_mode {
            CitationMode::On => true,
            CitationMode::Off => false,
            CitationMode::Auto => chat_type
                .map(|ct| self.config.citation_chat_types.iter().any(|t| t == ct))
                .unwrap_or(false),
        };

        let mut results = self.store.search(query, search);
        if include_citations {
            for r in &mut results {
                if r.start_line > 0 {
                    r.citation = Some(r.format_citation());
                }
            }
        }
        results
    }

    // ── Tasks ────────────────────────────────────────────────────────

    /// Create a task; returns its id.
    pub fn create_task(
        &self,
        content: &str,
        context: &str,
        channel: &str,
        user_id: &str,
        due_at_ms: i64,
    ) -> Result<String, MemoryError> {
        let task = MemoryTask {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            context: context.to_string(),
            channel: channel.to_string(),
            user_id: user_id.to_string(),
            created_at: now_ms(),
            due_at: due_at_ms,
            completed: false,
            completed_at: 0,
        };
        self.store.upsert_task(&task)?;
        Ok(task.id)
    }

    /// Mark a task completed; returns whether it existed.
    pub fn complete_task(&self, id: &str) -> Result<bool, MemoryError> {
        self.store.complete_task(id, now_ms())
    }

    /// All tasks, optionally including completed ones.
    pub fn list_tasks(&self, include_completed: bool) -> Result<Vec<MemoryTask>, MemoryError> {
        self.store.list_tasks(include_completed)
    }

    /// Pending tasks ordered by (due_at, created_at).
    pub fn get_pending_tasks(&self) -> Result<Vec<MemoryTask>, MemoryError> {
        self.store.get_pending_tasks()
    }

    /// Pending tasks due within the next `hours`.
    pub fn get_tasks_due_soon(&self, hours: i64) -> Result<Vec<MemoryTask>, MemoryError> {
        self.store
            .get_tasks_due_before(now_ms() + hours * 3_600_000)
    }

    /// Change a task's due date; returns whether it existed.
    pub fn update_task_due(&self, id: &str, due_at_ms: i64) -> Result<bool, MemoryError> {
        self.store.update_task_due(id, due_at_ms)
    }
}

/// Split text into paragraphs on blank (or whitespace-only) lines.
fn split_paragraphs(content: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

/// Extract conversation text from a JSONL session transcript.
///
/// Keeps records with `role` of `user` or `assistant` and non-empty
/// string `content`, formatted as `[role]: content` joined by blank
/// lines. Unparseable lines are skipped.
fn extract_session_text(content: &str) -> String {
    let mut out = String::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        let role = record.get("role").and_then(|v| v.as_str()).unwrap_or("");
        if role != "user" && role != "assistant" {
            continue;
        }
        let Some(text) = record.get("content").and_then(|v| v.as_str()) else {
            continue;
        };
        if text.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push('[');
        out.push_str(role);
        out.push_str("]: ");
        out.push_str(text);
    }
    out
}

/// Collapse runs of blank lines down to a single blank line.
fn normalize_session_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push('\n');
        } else {
            blank_run = 0;
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkingConfig;

    fn manager_in(dir: &Path) -> MemoryManager {
        let mut config = MemoryConfig::for_workspace(dir);
        config.chunking = ChunkingConfig {
            target_tokens: 30,
            overlap_tokens: 5,
            chars_per_token: 4,
        };
        MemoryManager::new(config).unwrap()
    }

    #[test]
    fn split_paragraphs_on_blank_lines() {
        let paras = split_paragraphs("one\ntwo\n\n  \nthree\n");
        assert_eq!(paras, vec!["one\ntwo".to_string(), "three".to_string()]);
        assert!(split_paragraphs("").is_empty());
    }

    #[test]
    fn chunking_splits_with_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());

        // Two 120-char paragraphs; max_chars = 120, overlap = 20.
        let p1: String = "a".repeat(110) + "0123456789";
        let p2: String = "b".repeat(120);
        let content = format!("{p1}\n\n{p2}");

        let chunks = mgr.chunk_content(&content, "MEMORY.md", MemorySource::Memory);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, p1);
        let overlap = &p1[p1.len() - 20..];
        assert!(chunks[1].text.starts_with(overlap));
        assert!(chunks[1].text.ends_with(&p2));
        assert!(chunks.iter().all(|c| !c.text.is_empty()));
        assert!(chunks.iter().all(|c| c.start_line <= c.end_line));
    }

    #[test]
    fn chunking_zero_budget_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MemoryConfig::for_workspace(dir.path());
        config.chunking = ChunkingConfig {
            target_tokens: 0,
            overlap_tokens: 0,
            chars_per_token: 4,
        };
        let mgr = MemoryManager::new(config).unwrap();
        let chunks = mgr.chunk_content("alpha\n\nbeta\n\ngamma", "f.md", MemorySource::Memory);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn chunking_multibyte_overlap_respects_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());
        let p1 = "é".repeat(70); // 140 bytes
        let p2 = "x".repeat(100);
        let chunks = mgr.chunk_content(
            &format!("{p1}\n\n{p2}"),
            "f.md",
            MemorySource::Memory,
        );
        assert!(chunks.len() >= 2);
        // No panic is the main assertion; the overlap prefix is valid UTF-8.
        assert!(!chunks[1].text.is_empty());
    }

    #[test]
    fn chunks_reconstruct_content_modulo_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());

        let paragraphs: Vec<String> = (0..6)
            .map(|i| format!("paragraph-{i} {}", "x".repeat(60)))
            .collect();
        let content = paragraphs.join("\n\n");
        let chunks = mgr.chunk_content(&content, "f.md", MemorySource::Memory);
        assert!(chunks.len() > 1);

        // Dropping each chunk's leading overlap (carried from its
        // predecessor) and rejoining reproduces the original text.
        let overlap = mgr.config().chunking.overlap_chars();
        let mut rebuilt = chunks[0].text.clone();
        for pair in chunks.windows(2) {
            let prev = &pair[0].text;
            let carried = char_boundary_suffix(prev, overlap);
            let tail = pair[1]
                .text
                .strip_prefix(carried)
                .expect("chunk starts with predecessor overlap");
            rebuilt.push_str(tail);
        }
        assert_eq!(rebuilt, content);
    }

    #[test]
    fn sync_indexes_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = format!("P1-first-word {}", "a".repeat(106));
        let p2 = "b".repeat(120);
        std::fs::write(dir.path().join("MEMORY.md"), format!("{p1}\n\n{p2}")).unwrap();

        let mgr = manager_in(dir.path());
        mgr.sync().unwrap();

        let chunks = mgr
            .store()
            .get_chunks_for_file("MEMORY.md", MemorySource::Memory)
            .unwrap();
        assert_eq!(chunks.len(), 2);
        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        // Second chunk begins with the 20-char overlap of the first.
        let tail = &chunks[0].text[chunks[0].text.len() - 20..];
        assert!(chunks[1].text.starts_with(tail));

        let hits = mgr.search("P1-first-word", None);
        assert!(!hits.is_empty());
        assert!(hits[0].snippet.contains("P1-first-word"));

        // No change on disk: uuids survive a re-sync.
        mgr.sync().unwrap();
        let again = mgr
            .store()
            .get_chunks_for_file("MEMORY.md", MemorySource::Memory)
            .unwrap();
        assert_eq!(
            again.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
            ids
        );
    }

    #[test]
    fn sync_reindexes_on_change_and_drops_stale() {
        let dir = tempfile::tempdir().unwrap();
        let memory_dir = dir.path().join("memory");
        std::fs::create_dir_all(&memory_dir).unwrap();
        std::fs::write(memory_dir.join("notes.md"), "first version").unwrap();

        let mgr = manager_in(dir.path());
        mgr.sync().unwrap();
        assert_eq!(mgr.store().count_chunks(MemorySource::Memory), 1);

        std::fs::write(memory_dir.join("notes.md"), "second version entirely").unwrap();
        mgr.sync().unwrap();
        let chunks = mgr
            .store()
            .get_chunks_for_file("memory/notes.md", MemorySource::Memory)
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("second version"));

        std::fs::remove_file(memory_dir.join("notes.md")).unwrap();
        mgr.sync().unwrap();
        assert_eq!(mgr.store().count_chunks(MemorySource::Memory), 0);
        assert!(mgr
            .store()
            .get_file("memory/notes.md", MemorySource::Memory)
            .unwrap()
            .is_none());
    }

    #[test]
    fn save_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());

        mgr.save_memory("remember this", None).unwrap();
        assert_eq!(
            mgr.get_memory_content("MEMORY.md").unwrap(),
            "remember this"
        );

        mgr.append_to_memory("and this too", "MEMORY.md").unwrap();
        let content = mgr.get_memory_content("MEMORY.md").unwrap();
        assert!(content.starts_with("remember this"));
        assert!(content.ends_with("and this too"));
    }

    #[test]
    fn daily_memory_uses_utc_date() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());
        let filename = mgr.save_daily_memory("daily note").unwrap();
        let expected = format!("memory/{}.md", Utc::now().format("%Y-%m-%d"));
        assert_eq!(filename, expected);
        assert_eq!(mgr.get_memory_content(&filename).unwrap(), "daily note");
    }

    #[test]
    fn path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());
        assert!(mgr.get_memory_content("../secrets.md").is_err());
        assert!(mgr.get_memory_content("/etc/passwd").is_err());
        assert!(mgr.save_memory("x", Some("../../escape.md")).is_err());
    }

    #[test]
    fn session_extraction_filters_roles() {
        let jsonl = concat!(
            r#"{"role":"user","content":"hello there"}"#,
            "\n",
            r#"{"role":"system","content":"ignored"}"#,
            "\n",
            "not json at all\n",
            r#"{"role":"assistant","content":"hi, how can I help?"}"#,
            "\n",
            r#"{"role":"assistant","content":""}"#,
            "\n",
        );
        let text = extract_session_text(jsonl);
        assert_eq!(
            text,
            "[user]: hello there\n\n[assistant]: hi, how can I help?"
        );
    }

    #[test]
    fn normalize_collapses_blank_runs() {
        let text = "a\n\n\n\nb\n\nc";
        assert_eq!(normalize_session_text(text), "a\n\nb\n\nc");
    }

    #[test]
    fn session_transcripts_indexed_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = dir.path().join(".skein").join("sessions");
        std::fs::create_dir_all(&sessions).unwrap();
        std::fs::write(
            sessions.join("chat1.jsonl"),
            concat!(
                r#"{"role":"user","content":"what is the capital of France?"}"#,
                "\n",
                r#"{"role":"assistant","content":"Paris."}"#,
                "\n",
            ),
        )
        .unwrap();

        let mut config = MemoryConfig::for_workspace(dir.path());
        config.sources = vec![MemorySource::Memory, MemorySource::Sessions];
        let mgr = MemoryManager::new(config).unwrap();
        mgr.sync().unwrap();

        assert!(mgr.store().count_chunks(MemorySource::Sessions) > 0);
        let hits = mgr.search("capital France", None);
        assert!(hits.iter().any(|h| h.source == MemorySource::Sessions));
    }

    #[test]
    fn citation_modes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("MEMORY.md"), "the launch code is blue").unwrap();
        let mgr = manager_in(dir.path());
        mgr.sync().unwrap();

        let mut on = MemorySearchConfig::default();
        on.citation_mode = CitationMode::On;
        let hits = mgr.search_with("launch code", &on, None);
        assert!(hits[0].citation.as_deref().unwrap().starts_with("MEMORY.md#L"));

        let mut off = MemorySearchConfig::default();
        off.citation_mode = CitationMode::Off;
        assert!(mgr.search_with("launch code", &off, Some("direct"))[0]
            .citation
            .is_none());

        // Auto: only chat types in the allow-list get citations.
        let auto = MemorySearchConfig::default();
        assert!(mgr.search_with("launch code", &auto, Some("direct"))[0]
            .citation
            .is_some());
        assert!(mgr.search_with("launch code", &auto, Some("group"))[0]
            .citation
            .is_none());
        assert!(mgr.search_with("launch code", &auto, None)[0].citation.is_none());
    }

    #[test]
    fn task_api_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());

        let id = mgr
            .create_task("buy milk", "grocery run", "telegram", "u1", 0)
            .unwrap();
        assert!(!id.is_empty());
        assert_eq!(mgr.get_pending_tasks().unwrap().len(), 1);

        let soon = now_ms() + 3_600_000;
        let id2 = mgr.create_task("call back", "", "telegram", "u1", soon).unwrap();
        let due = mgr.get_tasks_due_soon(2).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id2);

        assert!(mgr.complete_task(&id).unwrap());
        assert_eq!(mgr.get_pending_tasks().unwrap().len(), 1);
        assert_eq!(mgr.list_tasks(true).unwrap().len(), 2);

        assert!(mgr.update_task_due(&id2, 0).unwrap());
        assert!(mgr.get_tasks_due_soon(2).unwrap().is_empty());
    }
}
