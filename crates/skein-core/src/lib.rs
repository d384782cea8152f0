//! Core runtime for skein: session routing, rate limiting, the worker
//! pool, the AI process monitor, the agentic tool-execution loop, the
//! message handler, skills, polls, built-in commands, and the
//! application orchestrator.

pub mod agent;
pub mod app;
pub mod commands;
pub mod handler;
pub mod monitor;
pub mod polls;
pub mod pool;
pub mod ratelimit;
pub mod session;
pub mod session_key;
pub mod skills;

pub use agent::{AgentLoop, AgentOutcome, ToolCallRecord};
pub use app::Application;
pub use handler::MessageHandler;
pub use monitor::AiMonitor;
pub use pool::WorkerPool;
pub use session::{Session, SessionStore};
pub use session_key::{DmScope, PeerKind, RoutePeer, SessionKey};
