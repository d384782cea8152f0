//! Rate-limit primitives: token bucket, sliding window, per-key
//! limiter, typing indicator, message debouncer, throttler, and the
//! heartbeat table backing the AI monitor.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Milliseconds until the next request would be allowed.
    pub retry_after_ms: i64,
    /// Remaining requests in the current window.
    pub remaining: i64,
    /// Total limit per window.
    pub limit: i64,
}

impl RateLimitResult {
    fn allow(remaining: i64, limit: i64) -> Self {
        Self {
            allowed: true,
            retry_after_ms: 0,
            remaining,
            limit,
        }
    }

    fn deny(retry_after_ms: i64, limit: i64) -> Self {
        Self {
            allowed: false,
            retry_after_ms,
            remaining: 0,
            limit,
        }
    }
}

/// Token bucket with lazy refill.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    max_tokens: i64,
    refill_rate: f64,
    tokens: f64,
    last_refill_ms: i64,
}

impl TokenBucket {
    /// Bucket starting full, refilling `refill_rate_per_second` tokens
    /// per second up to `max_tokens`.
    pub fn new(max_tokens: i64, refill_rate_per_second: f64) -> Self {
        Self {
            max_tokens,
            refill_rate: refill_rate_per_second.max(f64::MIN_POSITIVE),
            tokens: max_tokens as f64,
            last_refill_ms: now_ms(),
        }
    }

    fn refill(&mut self) {
        let now = now_ms();
        let elapsed_ms = (now - self.last_refill_ms).max(0);
        self.tokens = (self.tokens + elapsed_ms as f64 / 1000.0 * self.refill_rate)
            .min(self.max_tokens as f64);
        self.last_refill_ms = now;
    }

    /// Consume one token if available.
    pub fn try_acquire(&mut self) -> RateLimitResult {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            RateLimitResult::allow(self.tokens as i64, self.max_tokens)
        } else {
            let retry = ((1.0 - self.tokens) / self.refill_rate * 1000.0).ceil() as i64;
            RateLimitResult::deny(retry.max(1), self.max_tokens)
        }
    }

    /// Whether a token is currently available (without consuming).
    pub fn would_allow(&mut self) -> bool {
        self.refill();
        self.tokens >= 1.0
    }

    /// Current whole tokens.
    pub fn available_tokens(&mut self) -> i64 {
        self.refill();
        self.tokens as i64
    }

    /// Restore full capacity.
    pub fn reset(&mut self) {
        self.tokens = self.max_tokens as f64;
        self.last_refill_ms = now_ms();
    }
}

/// Sliding window over request timestamps.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    max_requests: i64,
    window_ms: i64,
    timestamps: VecDeque<i64>,
}

impl SlidingWindow {
    pub fn new(max_requests: i64, window_seconds: i64) -> Self {
        Self {
            max_requests,
            window_ms: window_seconds * 1000,
            timestamps: VecDeque::new(),
        }
    }

    fn evict(&mut self, now: i64) {
        while let Some(&oldest) = self.timestamps.front() {
            if now - oldest >= self.window_ms {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record a request if the window has room.
    pub fn try_acquire(&mut self) -> RateLimitResult {
        let now = now_ms();
        self.evict(now);
        if (self.timestamps.len() as i64) < self.max_requests {
            self.timestamps.push_back(now);
            RateLimitResult::allow(
                self.max_requests - self.timestamps.len() as i64,
                self.max_requests,
            )
        } else {
            let oldest = *self.timestamps.front().unwrap_or(&now);
            RateLimitResult::deny((oldest + self.window_ms - now).max(1), self.max_requests)
        }
    }

    /// Current count inside the window. Evicting with an empty history
    /// is a no-op.
    pub fn current_count(&mut self) -> i64 {
        self.evict(now_ms());
        self.timestamps.len() as i64
    }

    /// Forget all recorded requests.
    pub fn reset(&mut self) {
        self.timestamps.clear();
    }
}

/// Which limiter flavor a [`KeyedLimiter`] instantiates per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterKind {
    TokenBucket,
    SlidingWindow,
}

enum KeyedEntry {
    Bucket(TokenBucket),
    Window(SlidingWindow),
}

/// Per-key rate limiter (e.g. per user or per chat) with lazy
/// instantiation and LRU-by-age cleanup.
pub struct KeyedLimiter {
    kind: LimiterKind,
    limit: i64,
    window_or_rate: i64,
    entries: HashMap<String, KeyedEntry>,
    last_activity: HashMap<String, i64>,
}

impl KeyedLimiter {
    /// `window_or_rate` is the refill rate (tokens/second) for buckets,
    /// or the window length in seconds for sliding windows.
    pub fn new(kind: LimiterKind, limit: i64, window_or_rate: i64) -> Self {
        Self {
            kind,
            limit,
            window_or_rate,
            entries: HashMap::new(),
            last_activity: HashMap::new(),
        }
    }

    /// Check the limit for a key, creating its limiter on first access.
    pub fn check(&mut self, key: &str) -> RateLimitResult {
        self.last_activity.insert(key.to_string(), now_ms());
        let (kind, limit, window_or_rate) = (self.kind, self.limit, self.window_or_rate);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| match kind {
                LimiterKind::TokenBucket => {
                    KeyedEntry::Bucket(TokenBucket::new(limit, window_or_rate as f64))
                }
                LimiterKind::SlidingWindow => {
                    KeyedEntry::Window(SlidingWindow::new(limit, window_or_rate))
                }
            });
        match entry {
            KeyedEntry::Bucket(b) => b.try_acquire(),
            KeyedEntry::Window(w) => w.try_acquire(),
        }
    }

    /// Reset one key.
    pub fn reset(&mut self, key: &str) {
        match self.entries.get_mut(key) {
            Some(KeyedEntry::Bucket(b)) => b.reset(),
            Some(KeyedEntry::Window(w)) => w.reset(),
            None => {}
        }
    }

    /// Reset every key.
    pub fn reset_all(&mut self) {
        self.entries.clear();
        self.last_activity.clear();
    }

    /// Drop keys inactive for longer than `max_age_seconds`. Returns how
    /// many were removed; an empty history is a no-op.
    pub fn cleanup(&mut self, max_age_seconds: i64) -> usize {
        let cutoff = now_ms() - max_age_seconds * 1000;
        let stale: Vec<String> = self
            .last_activity
            .iter()
            .filter(|(_, &ts)| ts < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            self.entries.remove(key);
            self.last_activity.remove(key);
        }
        stale.len()
    }

    /// Number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }
}

/// Per-chat typing-indicator state with send throttling.
pub struct TypingIndicator {
    interval_ms: i64,
    is_typing: HashMap<String, bool>,
    last_sent: HashMap<String, i64>,
}

impl Default for TypingIndicator {
    fn default() -> Self {
        Self::new(5000)
    }
}

impl TypingIndicator {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms,
            is_typing: HashMap::new(),
            last_sent: HashMap::new(),
        }
    }

    /// Mark a chat as actively typing.
    pub fn start_typing(&mut self, chat_id: &str) {
        self.is_typing.insert(chat_id.to_string(), true);
    }

    /// Mark a chat as done typing.
    pub fn stop_typing(&mut self, chat_id: &str) {
        self.is_typing.insert(chat_id.to_string(), false);
    }

    /// Whether a typing indicator should go out now: the chat is active
    /// and the last send is at least one interval old. A `true` result
    /// records the send.
    pub fn should_send_typing(&mut self, chat_id: &str) -> bool {
        if !self.is_typing.get(chat_id).copied().unwrap_or(false) {
            return false;
        }
        let now = now_ms();
        let last = self.last_sent.get(chat_id).copied().unwrap_or(0);
        if now - last >= self.interval_ms {
            self.last_sent.insert(chat_id.to_string(), now);
            true
        } else {
            false
        }
    }

    /// Chats currently marked typing.
    pub fn active_chats(&self) -> Vec<String> {
        self.is_typing
            .iter()
            .filter(|(_, &v)| v)
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Deduplicates messages by id within a time window, to tolerate
/// transport retries.
pub struct MessageDebouncer {
    window_seconds: i64,
    seen: HashMap<String, i64>,
}

impl MessageDebouncer {
    pub fn new(window_seconds: i64) -> Self {
        Self {
            window_seconds,
            seen: HashMap::new(),
        }
    }

    /// Whether a message id should be processed; duplicates within the
    /// window return false.
    pub fn should_process(&mut self, message_id: &str) -> bool {
        if message_id.is_empty() {
            return true;
        }
        let now = now_ms();
        let window = self.window_seconds * 1000;
        match self.seen.get(message_id) {
            Some(&ts) if now - ts < window => false,
            _ => {
                self.seen.insert(message_id.to_string(), now);
                true
            }
        }
    }

    /// Drop entries older than the window.
    pub fn cleanup(&mut self) {
        let cutoff = now_ms() - self.window_seconds * 1000;
        self.seen.retain(|_, &mut ts| ts >= cutoff);
    }
}

/// Spaces repeated actions out to a minimum interval.
pub struct Throttler {
    min_interval_ms: i64,
    last_action_ms: i64,
}

impl Throttler {
    pub fn new(min_interval_ms: i64) -> Self {
        Self {
            min_interval_ms,
            last_action_ms: 0,
        }
    }

    /// Whether the action may proceed now; a `true` result records it.
    pub fn should_proceed(&mut self) -> bool {
        let now = now_ms();
        if now - self.last_action_ms >= self.min_interval_ms {
            self.last_action_ms = now;
            true
        } else {
            false
        }
    }

    /// Milliseconds until the next action is allowed.
    pub fn wait_remaining_ms(&self) -> i64 {
        (self.last_action_ms + self.min_interval_ms - now_ms()).max(0)
    }

    /// Forget the last action.
    pub fn reset(&mut self) {
        self.last_action_ms = 0;
    }
}

struct HeartbeatTarget {
    interval_seconds: i64,
    last_sent: i64,
    last_received: i64,
}

/// Heartbeat bookkeeping for registered targets.
///
/// A target is healthy while a heartbeat was received within twice its
/// interval.
#[derive(Default)]
pub struct HeartbeatManager {
    targets: HashMap<String, HeartbeatTarget>,
}

impl HeartbeatManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a target with the given heartbeat interval.
    pub fn register_target(&mut self, target_id: &str, interval_seconds: i64) {
        let now = now_ms();
        self.targets.insert(
            target_id.to_string(),
            HeartbeatTarget {
                interval_seconds: interval_seconds.max(1),
                last_sent: 0,
                last_received: now,
            },
        );
    }

    /// Stop tracking a target.
    pub fn unregister_target(&mut self, target_id: &str) {
        self.targets.remove(target_id);
    }

    /// Targets whose last send is at least one interval old.
    pub fn targets_due(&self) -> Vec<String> {
        let now = now_ms();
        self.targets
            .iter()
            .filter(|(_, t)| now - t.last_sent >= t.interval_seconds * 1000)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Record an outgoing heartbeat.
    pub fn mark_sent(&mut self, target_id: &str) {
        if let Some(t) = self.targets.get_mut(target_id) {
            t.last_sent = now_ms();
        }
    }

    /// Record an incoming heartbeat.
    pub fn mark_received(&mut self, target_id: &str) {
        if let Some(t) = self.targets.get_mut(target_id) {
            t.last_received = now_ms();
        }
    }

    /// Whether a target received a heartbeat within 2x its interval.
    pub fn is_healthy(&self, target_id: &str) -> bool {
        self.targets
            .get(target_id)
            .map(|t| now_ms() - t.last_received <= 2 * t.interval_seconds * 1000)
            .unwrap_or(false)
    }

    /// Targets that missed their heartbeat window.
    pub fn unhealthy_targets(&self) -> Vec<String> {
        self.targets
            .keys()
            .filter(|k| !self.is_healthy(k))
            .cloned()
            .collect()
    }

    /// Number of tracked targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_exhausts_then_denies() {
        let mut bucket = TokenBucket::new(3, 1.0);

        for expected_remaining in [2, 1, 0] {
            let r = bucket.try_acquire();
            assert!(r.allowed);
            assert_eq!(r.remaining, expected_remaining);
            assert_eq!(r.limit, 3);
        }

        let denied = bucket.try_acquire();
        assert!(!denied.allowed);
        assert!(
            denied.retry_after_ms > 0 && denied.retry_after_ms <= 1000,
            "retry_after_ms = {}",
            denied.retry_after_ms
        );
    }

    #[test]
    fn token_bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(1, 1000.0); // 1 token per ms
        assert!(bucket.try_acquire().allowed);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(bucket.try_acquire().allowed);
    }

    #[test]
    fn token_bucket_reset_restores_capacity() {
        let mut bucket = TokenBucket::new(2, 0.001);
        bucket.try_acquire();
        bucket.try_acquire();
        assert!(!bucket.try_acquire().allowed);
        bucket.reset();
        assert!(bucket.try_acquire().allowed);
    }

    #[test]
    fn sliding_window_denies_with_retry() {
        let mut window = SlidingWindow::new(2, 60);
        assert!(window.try_acquire().allowed);
        assert!(window.try_acquire().allowed);
        let denied = window.try_acquire();
        assert!(!denied.allowed);
        assert!(denied.retry_after_ms > 0 && denied.retry_after_ms <= 60_000);
        assert_eq!(window.current_count(), 2);

        window.reset();
        assert_eq!(window.current_count(), 0);
        assert!(window.try_acquire().allowed);
    }

    #[test]
    fn sliding_window_empty_cleanup_noop() {
        let mut window = SlidingWindow::new(2, 60);
        assert_eq!(window.current_count(), 0);
    }

    #[test]
    fn keyed_limiter_isolates_keys() {
        let mut limiter = KeyedLimiter::new(LimiterKind::TokenBucket, 1, 1);
        assert!(limiter.check("alice").allowed);
        assert!(!limiter.check("alice").allowed);
        assert!(limiter.check("bob").allowed);
        assert_eq!(limiter.key_count(), 2);

        limiter.reset("alice");
        assert!(limiter.check("alice").allowed);
    }

    #[test]
    fn keyed_limiter_cleanup() {
        let mut limiter = KeyedLimiter::new(LimiterKind::SlidingWindow, 5, 60);
        assert_eq!(limiter.cleanup(60), 0); // empty history is a no-op
        limiter.check("a");
        limiter.check("b");
        // Nothing is old enough yet.
        assert_eq!(limiter.cleanup(60), 0);
        // Everything is older than a zero-second threshold after a beat.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(limiter.cleanup(0), 2);
        assert_eq!(limiter.key_count(), 0);
    }

    #[test]
    fn typing_indicator_throttles() {
        let mut typing = TypingIndicator::new(5000);
        assert!(!typing.should_send_typing("c1")); // not typing yet

        typing.start_typing("c1");
        assert!(typing.should_send_typing("c1"));
        assert!(!typing.should_send_typing("c1")); // throttled

        typing.stop_typing("c1");
        assert!(!typing.should_send_typing("c1"));
        assert!(typing.active_chats().is_empty());
    }

    #[test]
    fn typing_indicator_zero_interval_always_sends_while_active() {
        let mut typing = TypingIndicator::new(0);
        typing.start_typing("c1");
        assert!(typing.should_send_typing("c1"));
        assert!(typing.should_send_typing("c1"));
    }

    #[test]
    fn debouncer_suppresses_duplicates() {
        let mut debouncer = MessageDebouncer::new(5);
        assert!(debouncer.should_process("m1"));
        assert!(!debouncer.should_process("m1"));
        assert!(debouncer.should_process("m2"));
        // Messages without ids are never suppressed.
        assert!(debouncer.should_process(""));
        assert!(debouncer.should_process(""));
    }

    #[test]
    fn debouncer_cleanup_retains_fresh() {
        let mut debouncer = MessageDebouncer::new(5);
        debouncer.should_process("m1");
        debouncer.cleanup();
        assert!(!debouncer.should_process("m1"));
    }

    #[test]
    fn throttler_spacing() {
        let mut throttler = Throttler::new(60_000);
        assert!(throttler.should_proceed());
        assert!(!throttler.should_proceed());
        assert!(throttler.wait_remaining_ms() > 0);
        throttler.reset();
        assert!(throttler.should_proceed());
    }

    #[test]
    fn heartbeat_health_tracking() {
        let mut hb = HeartbeatManager::new();
        hb.register_target("session-1", 30);
        assert!(hb.is_healthy("session-1"));
        assert!(hb.unhealthy_targets().is_empty());
        assert!(hb.targets_due().contains(&"session-1".to_string()));

        hb.mark_sent("session-1");
        assert!(!hb.targets_due().contains(&"session-1".to_string()));

        hb.mark_received("session-1");
        assert!(hb.is_healthy("session-1"));

        hb.unregister_target("session-1");
        assert!(!hb.is_healthy("session-1"));
        assert!(hb.is_empty());
    }
}
