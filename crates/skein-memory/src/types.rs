//! Data types for the memory subsystem.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use skein_types::Config;

/// Where a piece of memory content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    /// `MEMORY.md` or `memory/*.md`.
    #[default]
    Memory,
    /// Session transcripts.
    Sessions,
    /// The task/reminder system.
    Task,
}

impl MemorySource {
    /// Stable lowercase name used in database rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::Memory => "memory",
            MemorySource::Sessions => "sessions",
            MemorySource::Task => "task",
        }
    }

    /// Parse a database value; unknown strings map to `Memory`.
    pub fn parse(s: &str) -> Self {
        match s {
            "sessions" => MemorySource::Sessions,
            "task" => MemorySource::Task,
            _ => MemorySource::Memory,
        }
    }
}

/// A file tracked by the memory index. Primary key: `(path, source)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryFile {
    /// Workspace-relative path.
    pub path: String,
    /// Absolute path on disk.
    pub abs_path: String,
    /// Where the file came from.
    pub source: MemorySource,
    /// SHA-256 of the file content (hex).
    pub hash: String,
    /// Modification time, unix milliseconds.
    pub mtime_ms: i64,
    /// File size in bytes.
    pub size: i64,
}

/// A paragraph-bounded slice of a memory file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryChunk {
    /// Unique chunk id (uuid).
    pub id: String,
    /// Parent file path.
    pub path: String,
    /// Parent file source.
    pub source: MemorySource,
    /// 1-indexed inclusive start line.
    pub start_line: i64,
    /// 1-indexed inclusive end line.
    pub end_line: i64,
    /// Chunk text.
    pub text: String,
    /// SHA-256 of the text (hex).
    pub hash: String,
    /// Last update, unix milliseconds.
    pub updated_at: i64,
}

/// One ranked result from a memory search.
#[derive(Debug, Clone)]
pub struct MemorySearchResult {
    pub path: String,
    pub source: MemorySource,
    pub start_line: i64,
    pub end_line: i64,
    /// Relevance in `[0, 1]`.
    pub score: f64,
    /// Matching chunk text.
    pub snippet: String,
    /// `path#Lstart[-Lend]` marker, when citations are enabled.
    pub citation: Option<String>,
}

impl MemorySearchResult {
    /// Render the citation marker for this result.
    pub fn format_citation(&self) -> String {
        if self.start_line == self.end_line {
            format!("{}#L{}", self.path, self.start_line)
        } else {
            format!("{}#L{}-L{}", self.path, self.start_line, self.end_line)
        }
    }
}

/// A task or reminder stored in memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryTask {
    pub id: String,
    pub content: String,
    pub context: String,
    pub channel: String,
    pub user_id: String,
    /// Creation time, unix milliseconds.
    pub created_at: i64,
    /// Due time, unix milliseconds; 0 means no due date.
    pub due_at: i64,
    pub completed: bool,
    /// Completion time, unix milliseconds; 0 until completed.
    pub completed_at: i64,
}

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub target_tokens: i64,
    pub overlap_tokens: i64,
    pub chars_per_token: i64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: 400,
            overlap_tokens: 80,
            chars_per_token: 4,
        }
    }
}

impl ChunkingConfig {
    /// Maximum characters per chunk; never below 1 so chunking always
    /// makes progress.
    pub fn max_chars(&self) -> usize {
        (self.target_tokens * self.chars_per_token).max(1) as usize
    }

    /// Characters of overlap carried between adjacent chunks.
    pub fn overlap_chars(&self) -> usize {
        (self.overlap_tokens * self.chars_per_token).max(0) as usize
    }
}

/// How search results carry citations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CitationMode {
    /// Cite when the requesting chat type is in the configured allow-list.
    #[default]
    Auto,
    /// Always cite.
    On,
    /// Never cite.
    Off,
}

impl CitationMode {
    /// Parse a config value; unknown strings map to `Auto`.
    pub fn parse(s: &str) -> Self {
        match s {
            "on" => CitationMode::On,
            "off" => CitationMode::Off,
            _ => CitationMode::Auto,
        }
    }
}

/// Search parameters.
#[derive(Debug, Clone)]
pub struct MemorySearchConfig {
    pub max_results: i64,
    pub min_score: f64,
    pub citation_mode: CitationMode,
}

impl Default for MemorySearchConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            min_score: 0.1,
            citation_mode: CitationMode::Auto,
        }
    }
}

/// Overall memory configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Agent workspace directory.
    pub workspace_dir: PathBuf,
    /// Database location; defaults to `<workspace>/.skein/memory.db`.
    pub db_path: PathBuf,
    /// Chunk sizing.
    pub chunking: ChunkingConfig,
    /// Search defaults.
    pub search: MemorySearchConfig,
    /// Enabled sources.
    pub sources: Vec<MemorySource>,
    /// Chat types that receive citations under [`CitationMode::Auto`].
    pub citation_chat_types: Vec<String>,
}

impl MemoryConfig {
    /// Config rooted at a workspace with defaults everywhere else.
    pub fn for_workspace(workspace_dir: impl Into<PathBuf>) -> Self {
        let workspace_dir = workspace_dir.into();
        let db_path = workspace_dir.join(".skein").join("memory.db");
        Self {
            workspace_dir,
            db_path,
            chunking: ChunkingConfig::default(),
            search: MemorySearchConfig::default(),
            sources: vec![MemorySource::Memory],
            citation_chat_types: vec!["direct".into()],
        }
    }

    /// Read the memory settings from the application config.
    pub fn from_config(cfg: &Config) -> Self {
        let workspace = cfg.get_str("workspace_dir", ".");
        let mut mc = Self::for_workspace(workspace);

        let db_override = cfg.get_str("memory_db_path", "");
        if !db_override.is_empty() {
            mc.db_path = PathBuf::from(db_override);
        }
        mc.chunking.target_tokens = cfg.get_i64("memory_chunk_tokens", mc.chunking.target_tokens);
        mc.chunking.overlap_tokens =
            cfg.get_i64("memory_chunk_overlap", mc.chunking.overlap_tokens);
        mc.search.max_results = cfg.get_i64("memory_max_results", mc.search.max_results);
        mc.search.min_score = cfg.get_f64("memory_min_score", mc.search.min_score);
        mc.search.citation_mode = CitationMode::parse(&cfg.get_str("memory_citation_mode", "auto"));

        if let Some(sources) = cfg.get_section("memory_sources").as_array() {
            mc.sources = sources
                .iter()
                .filter_map(|v| v.as_str())
                .map(MemorySource::parse)
                .collect();
        }
        if let Some(types) = cfg.get_section("memory_citation_chat_types").as_array() {
            mc.citation_chat_types = types
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect();
        }
        mc
    }

    /// Whether a source is enabled.
    pub fn has_source(&self, source: MemorySource) -> bool {
        self.sources.contains(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_roundtrip() {
        for s in [
            MemorySource::Memory,
            MemorySource::Sessions,
            MemorySource::Task,
        ] {
            assert_eq!(MemorySource::parse(s.as_str()), s);
        }
        assert_eq!(MemorySource::parse("unknown"), MemorySource::Memory);
    }

    #[test]
    fn chunking_defaults() {
        let c = ChunkingConfig::default();
        assert_eq!(c.max_chars(), 1600);
        assert_eq!(c.overlap_chars(), 320);
    }

    #[test]
    fn chunking_zero_budget_clamps_to_one() {
        let c = ChunkingConfig {
            target_tokens: 0,
            overlap_tokens: 0,
            chars_per_token: 4,
        };
        assert_eq!(c.max_chars(), 1);
        assert_eq!(c.overlap_chars(), 0);
    }

    #[test]
    fn citation_formats() {
        let mut r = MemorySearchResult {
            path: "MEMORY.md".into(),
            source: MemorySource::Memory,
            start_line: 3,
            end_line: 3,
            score: 0.9,
            snippet: String::new(),
            citation: None,
        };
        assert_eq!(r.format_citation(), "MEMORY.md#L3");
        r.end_line = 7;
        assert_eq!(r.format_citation(), "MEMORY.md#L3-L7");
    }

    #[test]
    fn citation_mode_parse() {
        assert_eq!(CitationMode::parse("on"), CitationMode::On);
        assert_eq!(CitationMode::parse("off"), CitationMode::Off);
        assert_eq!(CitationMode::parse("auto"), CitationMode::Auto);
        assert_eq!(CitationMode::parse("bogus"), CitationMode::Auto);
    }

    #[test]
    fn memory_config_from_app_config() {
        let cfg = Config::load_str(
            r#"{
                "workspace_dir": "/tmp/ws",
                "memory_chunk_tokens": 30,
                "memory_chunk_overlap": 5,
                "memory_max_results": 3,
                "memory_citation_mode": "on",
                "memory_sources": ["memory", "sessions"]
            }"#,
        )
        .unwrap();
        let mc = MemoryConfig::from_config(&cfg);
        assert_eq!(mc.workspace_dir, PathBuf::from("/tmp/ws"));
        assert_eq!(mc.db_path, PathBuf::from("/tmp/ws/.skein/memory.db"));
        assert_eq!(mc.chunking.target_tokens, 30);
        assert_eq!(mc.search.max_results, 3);
        assert_eq!(mc.search.citation_mode, CitationMode::On);
        assert!(mc.has_source(MemorySource::Sessions));
        assert!(!mc.has_source(MemorySource::Task));
    }
}
