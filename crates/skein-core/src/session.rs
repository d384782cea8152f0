//! Per-conversation sessions and the session store.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use skein_types::{ConversationMessage, Message};

use crate::session_key::{DmScope, RoutePeer, SessionKey};

/// Default cap on per-session history length.
pub const DEFAULT_MAX_HISTORY: usize = 20;

/// A user session: ordered conversation history plus scratch data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Canonical session key.
    pub key: String,
    /// Agent this session belongs to.
    #[serde(default)]
    pub agent_id: String,
    /// Channel the session is bound to.
    #[serde(default)]
    pub channel: String,
    /// Peer id the session is bound to.
    #[serde(default)]
    pub peer_id: String,
    /// Ordered conversation history.
    #[serde(default)]
    pub history: Vec<ConversationMessage>,
    /// Last activity, unix seconds.
    #[serde(default)]
    pub last_activity: i64,
    /// String scratch map (last writer wins).
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl Session {
    /// New empty session with the given key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            agent_id: String::new(),
            channel: String::new(),
            peer_id: String::new(),
            history: Vec::new(),
            last_activity: Utc::now().timestamp(),
            data: HashMap::new(),
        }
    }

    /// Append a message and trim to the most recent `max_history`.
    pub fn add_message(&mut self, msg: ConversationMessage, max_history: usize) {
        self.history.push(msg);
        self.limit_history(max_history);
        self.touch();
    }

    /// Drop all but the most recent `max` messages.
    pub fn limit_history(&mut self, max: usize) {
        if self.history.len() > max {
            let excess = self.history.len() - max;
            self.history.drain(..excess);
        }
    }

    /// Clear the conversation history.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.touch();
    }

    /// Refresh the last-activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now().timestamp();
    }

    /// Set a scratch value.
    pub fn set_data(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }

    /// Get a scratch value, or `default` when absent.
    pub fn get_data(&self, key: &str, default: &str) -> String {
        self.data
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

/// In-memory store of all active sessions.
///
/// Sessions are created lazily on first access; every access refreshes
/// last-activity. Access goes through a map-level lock, so contended
/// sessions simply queue.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    dm_scope: DmScope,
    max_history: usize,
}

impl SessionStore {
    /// Store with the given scope and history cap.
    pub fn new(dm_scope: DmScope, max_history: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            dm_scope,
            max_history,
        }
    }

    /// The configured scope.
    pub fn dm_scope(&self) -> DmScope {
        self.dm_scope
    }

    /// The configured history cap.
    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Session key for a transport message under the configured scope.
    pub fn key_for_message(&self, msg: &Message, agent_id: &str) -> String {
        let peer = RoutePeer::from_message(msg);
        SessionKey::build(agent_id, &msg.channel, "", Some(&peer), self.dm_scope)
    }

    /// Run `f` against the session for `key`, creating it first if
    /// needed. The access refreshes last-activity.
    pub fn with_session<R>(&self, key: &str, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key));
        session.touch();
        f(session)
    }

    /// Append a message to a session's history, trimming to the cap.
    pub fn add_message(&self, key: &str, msg: ConversationMessage) {
        let max = self.max_history;
        self.with_session(key, |s| s.add_message(msg, max));
    }

    /// Snapshot a session's history (empty for unknown sessions; does
    /// not create one).
    pub fn history(&self, key: &str) -> Vec<ConversationMessage> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .get(key)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    /// Snapshot a full session (does not create one).
    pub fn snapshot(&self, key: &str) -> Option<Session> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .get(key)
            .cloned()
    }

    /// Whether a session exists.
    pub fn has_session(&self, key: &str) -> bool {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .contains_key(key)
    }

    /// Remove a session.
    pub fn remove_session(&self, key: &str) {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .remove(key);
    }

    /// Remove everything.
    pub fn clear_all(&self) {
        self.sessions.lock().expect("session map poisoned").clear();
    }

    /// All session keys.
    pub fn session_keys(&self) -> Vec<String> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session map poisoned").len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions whose last activity is older than the threshold.
    /// Returns how many were removed.
    pub fn cleanup_inactive(&self, max_age_seconds: i64) -> usize {
        let cutoff = Utc::now().timestamp() - max_age_seconds;
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        let before = sessions.len();
        sessions.retain(|_, s| s.last_activity >= cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "cleaned up inactive sessions");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_types::ChatType;

    #[test]
    fn history_never_exceeds_cap() {
        let mut s = Session::new("k");
        for i in 0..50 {
            s.add_message(ConversationMessage::user(format!("m{i}")), 20);
            assert!(s.history.len() <= 20, "after append {i}");
        }
        // Oldest entries were trimmed, newest kept.
        assert_eq!(s.history.first().unwrap().content, "m30");
        assert_eq!(s.history.last().unwrap().content, "m49");
    }

    #[test]
    fn clear_history_resets() {
        let mut s = Session::new("k");
        s.add_message(ConversationMessage::user("x"), 20);
        s.clear_history();
        assert!(s.history.is_empty());
    }

    #[test]
    fn scratch_data_last_writer_wins() {
        let mut s = Session::new("k");
        s.set_data("mode", "a");
        s.set_data("mode", "b");
        assert_eq!(s.get_data("mode", ""), "b");
        assert_eq!(s.get_data("missing", "dflt"), "dflt");
    }

    #[test]
    fn store_creates_lazily_and_touches() {
        let store = SessionStore::new(DmScope::Main, 20);
        assert!(!store.has_session("agent:default:main"));

        let before = Utc::now().timestamp();
        store.with_session("agent:default:main", |s| {
            assert!(s.last_activity >= before);
        });
        assert!(store.has_session("agent:default:main"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn key_for_message_main_scope() {
        let store = SessionStore::new(DmScope::Main, 20);

        let dm = |from: &str| Message {
            channel: "test".into(),
            from: from.into(),
            to: from.into(),
            chat_type: ChatType::Direct,
            ..Message::default()
        };
        let key1 = store.key_for_message(&dm("u1"), "");
        let key2 = store.key_for_message(&dm("u2"), "");
        assert_eq!(key1, "agent:default:main");
        assert_eq!(key1, key2);

        let group = Message {
            channel: "test".into(),
            from: "u1".into(),
            to: "g1".into(),
            chat_type: ChatType::Group,
            ..Message::default()
        };
        assert_eq!(
            store.key_for_message(&group, ""),
            "agent:default:test:group:g1"
        );
    }

    #[test]
    fn rebuild_after_remove_starts_empty() {
        let store = SessionStore::new(DmScope::Main, 20);
        let msg = Message {
            channel: "test".into(),
            from: "u1".into(),
            to: "u1".into(),
            chat_type: ChatType::Direct,
            ..Message::default()
        };
        let key = store.key_for_message(&msg, "");
        store.add_message(&key, ConversationMessage::user("hello"));
        assert_eq!(store.history(&key).len(), 1);

        store.remove_session(&key);
        let rebuilt = store.key_for_message(&msg, "");
        assert_eq!(rebuilt, key);
        assert!(store.history(&rebuilt).is_empty());
    }

    #[test]
    fn cleanup_inactive_drops_old_sessions() {
        let store = SessionStore::new(DmScope::Main, 20);
        store.with_session("agent:default:old", |s| {
            s.last_activity = Utc::now().timestamp() - 1000;
        });
        store.with_session("agent:default:fresh", |_| {});

        assert_eq!(store.cleanup_inactive(500), 1);
        assert!(store.has_session("agent:default:fresh"));
        assert!(!store.has_session("agent:default:old"));
        assert_eq!(store.cleanup_inactive(500), 0);
    }

    #[test]
    fn store_add_message_trims() {
        let store = SessionStore::new(DmScope::Main, 3);
        for i in 0..10 {
            store.add_message(
                "agent:default:main",
                ConversationMessage::user(format!("m{i}")),
            );
        }
        let history = store.history("agent:default:main");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "m7");
    }
}
