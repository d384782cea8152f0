//! AI process monitor.
//!
//! Tracks active AI sessions in a heartbeat table. A background task
//! ticks once a second: it fires the typing-indicator callback for each
//! active session whose throttle allows it, and logs sessions whose
//! last heartbeat is older than twice the heartbeat interval as hung.
//! The task respects a cancellation token and joins cleanly on stop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ratelimit::TypingIndicator;

/// Tick cadence of the monitor loop.
const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Default heartbeat interval; sessions are hung past twice this.
pub const DEFAULT_HEARTBEAT_SECS: i64 = 30;

/// Callback dispatching a typing indicator: `(channel, chat_id)`.
pub type TypingCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Debug, Clone)]
struct ActiveSession {
    channel: String,
    chat_id: String,
    started_ms: i64,
    last_heartbeat_ms: i64,
}

#[derive(Default)]
struct MonitorState {
    sessions: HashMap<String, ActiveSession>,
    typing: TypingIndicator,
}

/// Heartbeat table for active AI sessions plus the typing-indicator
/// background loop.
pub struct AiMonitor {
    state: Arc<Mutex<MonitorState>>,
    heartbeat_secs: i64,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl Default for AiMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_SECS)
    }
}

impl AiMonitor {
    /// Monitor with the given heartbeat interval.
    pub fn new(heartbeat_secs: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MonitorState::default())),
            heartbeat_secs: heartbeat_secs.max(1),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Mark an AI session as active for a chat.
    pub fn begin(&self, session_id: &str, channel: &str, chat_id: &str) {
        let now = now_ms();
        let mut state = self.state.lock().expect("monitor state poisoned");
        state.sessions.insert(
            session_id.to_string(),
            ActiveSession {
                channel: channel.to_string(),
                chat_id: chat_id.to_string(),
                started_ms: now,
                last_heartbeat_ms: now,
            },
        );
        state.typing.start_typing(chat_id);
        debug!(session_id, channel, chat_id, "ai session active");
    }

    /// Refresh the heartbeat of an active session.
    pub fn heartbeat(&self, session_id: &str) {
        let mut state = self.state.lock().expect("monitor state poisoned");
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.last_heartbeat_ms = now_ms();
        }
    }

    /// Mark an AI session as finished.
    pub fn end(&self, session_id: &str) {
        let mut state = self.state.lock().expect("monitor state poisoned");
        if let Some(session) = state.sessions.remove(session_id) {
            let held = state
                .sessions
                .values()
                .any(|s| s.chat_id == session.chat_id);
            if !held {
                state.typing.stop_typing(&session.chat_id);
            }
            debug!(
                session_id,
                elapsed_ms = now_ms() - session.started_ms,
                "ai session finished"
            );
        }
    }

    /// Number of active sessions.
    pub fn active_count(&self) -> usize {
        self.state
            .lock()
            .expect("monitor state poisoned")
            .sessions
            .len()
    }

    /// Session ids whose last heartbeat exceeds twice the interval.
    pub fn hung_sessions(&self) -> Vec<String> {
        let threshold = 2 * self.heartbeat_secs * 1000;
        let now = now_ms();
        self.state
            .lock()
            .expect("monitor state poisoned")
            .sessions
            .iter()
            .filter(|(_, s)| now - s.last_heartbeat_ms > threshold)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Start the background loop, dispatching typing indicators through
    /// `on_typing`. Calling start twice replaces nothing; the second
    /// call is ignored.
    pub fn start(&self, on_typing: TypingCallback) {
        let mut handle = self.handle.lock().expect("monitor handle poisoned");
        if handle.is_some() {
            return;
        }

        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let heartbeat_secs = self.heartbeat_secs;
        *handle = Some(tokio::spawn(async move {
            info!("ai monitor started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(TICK_INTERVAL) => {}
                }

                let (to_type, hung) = {
                    let mut state = state.lock().expect("monitor state poisoned");
                    let now = now_ms();
                    let threshold = 2 * heartbeat_secs * 1000;

                    let hung: Vec<String> = state
                        .sessions
                        .iter()
                        .filter(|(_, s)| now - s.last_heartbeat_ms > threshold)
                        .map(|(id, _)| id.clone())
                        .collect();

                    let candidates: Vec<(String, String)> = state
                        .sessions
                        .values()
                        .map(|s| (s.channel.clone(), s.chat_id.clone()))
                        .collect();
                    let mut to_type = Vec::new();
                    for (channel, chat_id) in candidates {
                        if state.typing.should_send_typing(&chat_id) {
                            to_type.push((channel, chat_id));
                        }
                    }
                    (to_type, hung)
                };

                for session_id in hung {
                    warn!(session_id, "ai session heartbeat overdue, possible hang");
                }
                for (channel, chat_id) in to_type {
                    on_typing(&channel, &chat_id);
                }
            }
            info!("ai monitor stopped");
        }));
    }

    /// Cancel the background loop and join it.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().expect("monitor handle poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn begin_heartbeat_end_lifecycle() {
        let monitor = AiMonitor::new(30);
        monitor.begin("s1", "telegram", "c1");
        assert_eq!(monitor.active_count(), 1);
        assert!(monitor.hung_sessions().is_empty());

        monitor.heartbeat("s1");
        monitor.end("s1");
        assert_eq!(monitor.active_count(), 0);
    }

    #[test]
    fn end_unknown_session_is_noop() {
        let monitor = AiMonitor::new(30);
        monitor.end("ghost");
        assert_eq!(monitor.active_count(), 0);
    }

    #[test]
    fn hang_detection_uses_double_interval() {
        let monitor = AiMonitor::new(1);
        monitor.begin("s1", "telegram", "c1");

        // Backdate the heartbeat past the 2s threshold.
        {
            let mut state = monitor.state.lock().unwrap();
            state.sessions.get_mut("s1").unwrap().last_heartbeat_ms = now_ms() - 2500;
        }
        assert_eq!(monitor.hung_sessions(), vec!["s1".to_string()]);

        monitor.heartbeat("s1");
        assert!(monitor.hung_sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_loop_fires_typing_and_joins() {
        let monitor = AiMonitor::new(30);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();

        monitor.begin("s1", "telegram", "c1");
        monitor.start(Arc::new(move |channel, chat| {
            assert_eq!(channel, "telegram");
            assert_eq!(chat, "c1");
            fired2.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::advance(Duration::from_millis(1100)).await;
        tokio::task::yield_now().await;
        // Give the spawned loop a chance to run its tick.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        monitor.stop().await;
        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn stop_without_start_is_clean() {
        let monitor = AiMonitor::new(30);
        monitor.stop().await;
    }
}
