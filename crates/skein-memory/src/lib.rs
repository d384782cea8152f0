//! Persistent memory for skein agents.
//!
//! [`MemoryStore`] wraps a local SQLite database holding indexed files,
//! text chunks, tasks, and a key-value scratchpad, with an FTS5 full-text
//! index (BM25 ranking) over the chunks. [`MemoryManager`] layers file
//! discovery, hash-based change detection, paragraph-aware chunking,
//! session-transcript extraction, and citation decoration on top.
//!
//! The store takes a mutex around its connection internally, so callers
//! may invoke it freely from worker tasks; long operations should hop to
//! the blocking pool.

pub mod manager;
pub mod store;
pub mod types;

pub use manager::MemoryManager;
pub use store::MemoryStore;
pub use types::{
    ChunkingConfig, CitationMode, MemoryChunk, MemoryConfig, MemoryFile, MemorySearchConfig,
    MemorySearchResult, MemorySource, MemoryTask,
};
