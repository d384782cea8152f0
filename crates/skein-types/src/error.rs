//! Error types for the skein runtime.
//!
//! [`SkeinError`] is the top-level error; channel, tool, and memory
//! subsystems have their own enums that convert into it. All are
//! non-exhaustive so new variants can be added without breaking
//! downstream crates.

use thiserror::Error;

/// Top-level error type for the skein runtime.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SkeinError {
    /// Configuration is missing or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A plugin could not be loaded or initialized.
    #[error("plugin error: {plugin}: {reason}")]
    Plugin {
        /// Name or path of the plugin.
        plugin: String,
        /// What went wrong.
        reason: String,
    },

    /// A provider (AI backend) returned an error.
    #[error("provider error: {message}")]
    Provider {
        /// Provider-supplied error message.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Human-readable name of the operation that timed out.
        operation: String,
    },

    /// A channel-layer error bubbled up.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A tool-layer error bubbled up.
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    /// A memory-layer error bubbled up.
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Channel-specific error type.
///
/// Used by transport implementations (Telegram, WhatsApp, gateway) to
/// report failures in connecting, authenticating, or exchanging messages.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChannelError {
    /// Failed to establish a connection to the channel backend.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication / authorization was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Sending a message failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receiving a message failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The channel is not currently connected.
    #[error("not connected")]
    NotConnected,

    /// Catch-all for errors that do not fit other variants.
    #[error("{0}")]
    Other(String),
}

/// Tool execution error type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ToolError {
    /// The requested tool was not found.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The tool does not implement the requested action.
    #[error("tool {tool} does not support action: {action}")]
    UnsupportedAction {
        /// Tool identifier.
        tool: String,
        /// The action that was requested.
        action: String,
    },

    /// The arguments provided to the tool are invalid.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The tool execution failed at runtime.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A filesystem path is invalid or escapes the workspace.
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Memory subsystem error type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MemoryError {
    /// The backing database reported an error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The memory subsystem was used before initialization.
    #[error("memory not initialized")]
    NotInitialized,

    /// A path escapes the workspace or does not exist.
    #[error("invalid memory path: {0}")]
    InvalidPath(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, SkeinError>;
