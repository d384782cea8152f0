//! Session key construction and parsing.
//!
//! A session key canonically looks like `agent:<agent>:<rest>`, where
//! `<rest>` is derived from (channel, account, peer, scope). All
//! components are lowercased; agent ids are sanitized to `[a-z0-9_-]`
//! with `"default"` substituted when nothing survives.

use skein_types::{ChatType, Message};

/// Fallback agent id when sanitization leaves nothing.
pub const DEFAULT_AGENT_ID: &str = "default";
/// Suffix of the shared main session.
pub const MAIN_KEY_SUFFIX: &str = "main";

/// Scope rule deciding how peer identity maps to a session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DmScope {
    /// All direct messages collapse into one session; groups and
    /// channels get per-id sessions.
    #[default]
    Main,
    /// Separate session per peer across all channels.
    PerPeer,
    /// Separate session per channel+peer.
    PerChannelPeer,
    /// Separate session per account+channel+peer.
    PerAccountPeer,
}

impl DmScope {
    /// Parse a config value; unknown strings map to `Main`.
    pub fn parse(s: &str) -> Self {
        match s {
            "per_peer" => DmScope::PerPeer,
            "per_channel_peer" => DmScope::PerChannelPeer,
            "per_account_peer" => DmScope::PerAccountPeer,
            _ => DmScope::Main,
        }
    }
}

/// Kind of peer a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    Dm,
    Group,
    Channel,
}

impl PeerKind {
    fn as_str(&self) -> &'static str {
        match self {
            PeerKind::Dm => "dm",
            PeerKind::Group => "group",
            PeerKind::Channel => "channel",
        }
    }

    /// Map a transport chat type onto a peer kind.
    pub fn from_chat_type(chat_type: ChatType) -> Self {
        match chat_type {
            ChatType::Direct => PeerKind::Dm,
            ChatType::Group => PeerKind::Group,
            ChatType::Channel => PeerKind::Channel,
        }
    }
}

/// A peer (contact or chat) for routing purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePeer {
    pub kind: PeerKind,
    pub id: String,
}

impl RoutePeer {
    pub fn dm(id: impl Into<String>) -> Self {
        Self {
            kind: PeerKind::Dm,
            id: id.into(),
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            kind: PeerKind::Group,
            id: id.into(),
        }
    }

    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            kind: PeerKind::Channel,
            id: id.into(),
        }
    }

    /// Classify the peer of a transport message: the sender for direct
    /// messages, the chat id for groups and channels.
    pub fn from_message(msg: &Message) -> Self {
        let id = match msg.chat_type {
            ChatType::Direct => msg.from.clone(),
            _ if msg.to.is_empty() => msg.from.clone(),
            _ => msg.to.clone(),
        };
        Self {
            kind: PeerKind::from_chat_type(msg.chat_type),
            id,
        }
    }
}

/// Session key construction and parsing.
pub struct SessionKey;

impl SessionKey {
    /// Sanitize an agent id: trim, lowercase, strip everything outside
    /// `[a-z0-9_-]`; `"default"` when nothing remains.
    pub fn sanitize_agent_id(agent_id: &str) -> String {
        let cleaned: String = agent_id
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
            .collect();
        if cleaned.is_empty() {
            DEFAULT_AGENT_ID.to_string()
        } else {
            cleaned
        }
    }

    /// The agent's shared main session key.
    pub fn build_main(agent_id: &str) -> String {
        format!(
            "agent:{}:{}",
            Self::sanitize_agent_id(agent_id),
            MAIN_KEY_SUFFIX
        )
    }

    /// Build a session key from its components under the given scope.
    pub fn build(
        agent_id: &str,
        channel: &str,
        account_id: &str,
        peer: Option<&RoutePeer>,
        scope: DmScope,
    ) -> String {
        let agent = Self::sanitize_agent_id(agent_id);
        let Some(peer) = peer else {
            return Self::build_main(&agent);
        };

        let channel = channel.to_lowercase();
        let account = account_id.to_lowercase();
        let peer_id = peer.id.to_lowercase();
        let kind = peer.kind.as_str();

        match (scope, peer.kind) {
            // Under MAIN, direct messages collapse into the shared
            // session; groups and channels stay separate per id.
            (DmScope::Main, PeerKind::Dm) => Self::build_main(&agent),
            (DmScope::Main, _) => format!("agent:{agent}:{channel}:{kind}:{peer_id}"),
            (DmScope::PerPeer, _) => format!("agent:{agent}:{kind}:{peer_id}"),
            (DmScope::PerChannelPeer, _) => {
                format!("agent:{agent}:{channel}:{kind}:{peer_id}")
            }
            (DmScope::PerAccountPeer, _) => {
                format!("agent:{agent}:{account}:{channel}:{kind}:{peer_id}")
            }
        }
    }

    /// Parse a canonical key into `(agent_id, rest)`.
    pub fn parse(key: &str) -> Option<(String, String)> {
        let rest = key.strip_prefix("agent:")?;
        let (agent, remainder) = rest.split_once(':')?;
        if agent.is_empty() || remainder.is_empty() {
            return None;
        }
        Some((agent.to_string(), remainder.to_string()))
    }
}
