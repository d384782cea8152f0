//! Poll normalization, voting, and the in-memory poll manager.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

/// Poll validation and vote errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// The question is empty after trimming.
    #[error("poll question must not be empty")]
    EmptyQuestion,

    /// Fewer than two distinct options remain after normalization.
    #[error("poll needs at least 2 options")]
    TooFewOptions,

    /// More options than the configured maximum.
    #[error("poll allows at most {0} options")]
    TooManyOptions(usize),

    /// The poll id is unknown.
    #[error("poll not found: {0}")]
    NotFound(String),

    /// The vote is invalid for this poll.
    #[error("invalid vote: {0}")]
    InvalidVote(String),
}

/// Raw poll input before normalization.
#[derive(Debug, Clone, Default)]
pub struct PollInput {
    pub question: String,
    pub options: Vec<String>,
    /// 0 = unspecified (defaults to 1).
    pub max_selections: i32,
    /// 0 = unspecified (uses the default duration).
    pub duration_hours: i32,
}

/// A normalized, active poll.
#[derive(Debug, Clone)]
pub struct Poll {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub max_selections: i32,
    pub duration_hours: i32,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds; 0 = no expiry.
    pub expires_at: i64,
    pub is_closed: bool,
}

impl Poll {
    /// Whether the expiry time has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at != 0 && Utc::now().timestamp() >= self.expires_at
    }

    /// Open and not expired.
    pub fn is_active(&self) -> bool {
        !self.is_closed && !self.is_expired()
    }

    /// Seconds until expiry (0 once expired or when never expiring).
    pub fn time_remaining(&self) -> i64 {
        if self.expires_at == 0 {
            return 0;
        }
        (self.expires_at - Utc::now().timestamp()).max(0)
    }
}

/// One voter's selections.
#[derive(Debug, Clone)]
pub struct PollVote {
    pub poll_id: String,
    pub voter_id: String,
    pub selected_options: Vec<usize>,
    pub voted_at: i64,
}

/// Aggregated results of a poll.
#[derive(Debug, Clone, Default)]
pub struct PollResults {
    pub poll_id: String,
    pub vote_counts: Vec<usize>,
    pub total_votes: usize,
}

impl PollResults {
    /// Percentage of voters who picked an option (0-100).
    pub fn percentage(&self, option_index: usize) -> f64 {
        if self.total_votes == 0 {
            return 0.0;
        }
        let count = self.vote_counts.get(option_index).copied().unwrap_or(0);
        count as f64 * 100.0 / self.total_votes as f64
    }

    /// Index of the winning option, or `None` on a tie or no votes.
    pub fn winning_option(&self) -> Option<usize> {
        let max = *self.vote_counts.iter().max()?;
        if max == 0 {
            return None;
        }
        let mut winners = self
            .vote_counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == max);
        let first = winners.next()?.0;
        if winners.next().is_some() {
            None
        } else {
            Some(first)
        }
    }
}

/// Normalization bounds.
#[derive(Debug, Clone, Copy)]
pub struct PollNormalizeOptions {
    pub max_options: usize,
    pub default_hours: i32,
    pub max_hours: i32,
}

impl Default for PollNormalizeOptions {
    fn default() -> Self {
        Self {
            max_options: 10,
            default_hours: 24,
            max_hours: 168,
        }
    }
}

/// Clamp a poll duration into `[1, max_hours]`, defaulting when
/// unspecified.
pub fn normalize_poll_duration(duration_hours: i32, default_hours: i32, max_hours: i32) -> i32 {
    let hours = if duration_hours == 0 {
        default_hours
    } else {
        duration_hours
    };
    hours.clamp(1, max_hours)
}

/// Validate and normalize a poll. Trims the question, drops blank and
/// duplicate options, requires 2..=max options, clamps the duration,
/// and bounds max_selections by the option count. Normalization is
/// idempotent.
pub fn normalize_poll(
    input: &PollInput,
    options: &PollNormalizeOptions,
) -> Result<Poll, PollError> {
    let question = input.question.trim().to_string();
    if question.is_empty() {
        return Err(PollError::EmptyQuestion);
    }

    let mut seen = Vec::new();
    for option in &input.options {
        let trimmed = option.trim();
        if trimmed.is_empty() || seen.iter().any(|s: &String| s == trimmed) {
            continue;
        }
        seen.push(trimmed.to_string());
    }
    if seen.len() < 2 {
        return Err(PollError::TooFewOptions);
    }
    if seen.len() > options.max_options {
        return Err(PollError::TooManyOptions(options.max_options));
    }

    let duration_hours =
        normalize_poll_duration(input.duration_hours, options.default_hours, options.max_hours);
    let max_selections = input.max_selections.max(1).min(seen.len() as i32);

    let created_at = Utc::now().timestamp();
    Ok(Poll {
        id: Uuid::new_v4().to_string(),
        question,
        options: seen,
        max_selections,
        duration_hours,
        created_at,
        expires_at: created_at + duration_hours as i64 * 3600,
        is_closed: false,
    })
}

/// Check a vote against a poll. `Ok` means valid.
pub fn validate_vote(poll: &Poll, selected_options: &[usize]) -> Result<(), PollError> {
    if !poll.is_active() {
        return Err(PollError::InvalidVote("poll is closed".into()));
    }
    if selected_options.is_empty() {
        return Err(PollError::InvalidVote("no options selected".into()));
    }
    if selected_options.len() > poll.max_selections as usize {
        return Err(PollError::InvalidVote(format!(
            "at most {} selections allowed",
            poll.max_selections
        )));
    }
    let mut sorted = selected_options.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() != selected_options.len() {
        return Err(PollError::InvalidVote("duplicate selections".into()));
    }
    for &index in selected_options {
        if index >= poll.options.len() {
            return Err(PollError::InvalidVote(format!(
                "option index {index} out of range"
            )));
        }
    }
    Ok(())
}

/// In-memory manager of polls and their votes.
#[derive(Default)]
pub struct PollManager {
    inner: Mutex<PollManagerInner>,
}

#[derive(Default)]
struct PollManagerInner {
    polls: HashMap<String, Poll>,
    // poll_id -> voter_id -> vote
    votes: HashMap<String, HashMap<String, PollVote>>,
}

impl PollManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize and store a new poll; returns it.
    pub fn create_poll(
        &self,
        input: &PollInput,
        options: &PollNormalizeOptions,
    ) -> Result<Poll, PollError> {
        let poll = normalize_poll(input, options)?;
        let mut inner = self.inner.lock().expect("poll state poisoned");
        inner.polls.insert(poll.id.clone(), poll.clone());
        inner.votes.insert(poll.id.clone(), HashMap::new());
        Ok(poll)
    }

    /// Fetch a poll by id.
    pub fn get_poll(&self, poll_id: &str) -> Option<Poll> {
        self.inner
            .lock()
            .expect("poll state poisoned")
            .polls
            .get(poll_id)
            .cloned()
    }

    /// Whether a poll exists.
    pub fn has_poll(&self, poll_id: &str) -> bool {
        self.inner
            .lock()
            .expect("poll state poisoned")
            .polls
            .contains_key(poll_id)
    }

    /// Stop accepting votes on a poll.
    pub fn close_poll(&self, poll_id: &str) -> Result<(), PollError> {
        let mut inner = self.inner.lock().expect("poll state poisoned");
        let poll = inner
            .polls
            .get_mut(poll_id)
            .ok_or_else(|| PollError::NotFound(poll_id.to_string()))?;
        poll.is_closed = true;
        Ok(())
    }

    /// Record (or replace) a voter's selections.
    pub fn vote(
        &self,
        poll_id: &str,
        voter_id: &str,
        selected_options: Vec<usize>,
    ) -> Result<(), PollError> {
        let mut inner = self.inner.lock().expect("poll state poisoned");
        let poll = inner
            .polls
            .get(poll_id)
            .ok_or_else(|| PollError::NotFound(poll_id.to_string()))?;
        validate_vote(poll, &selected_options)?;

        inner
            .votes
            .entry(poll_id.to_string())
            .or_default()
            .insert(
                voter_id.to_string(),
                PollVote {
                    poll_id: poll_id.to_string(),
                    voter_id: voter_id.to_string(),
                    selected_options,
                    voted_at: Utc::now().timestamp(),
                },
            );
        Ok(())
    }

    /// Tally results for a poll.
    pub fn results(&self, poll_id: &str) -> Result<PollResults, PollError> {
        let inner = self.inner.lock().expect("poll state poisoned");
        let poll = inner
            .polls
            .get(poll_id)
            .ok_or_else(|| PollError::NotFound(poll_id.to_string()))?;

        let mut results = PollResults {
            poll_id: poll_id.to_string(),
            vote_counts: vec![0; poll.options.len()],
            total_votes: 0,
        };
        if let Some(votes) = inner.votes.get(poll_id) {
            results.total_votes = votes.len();
            for vote in votes.values() {
                for &index in &vote.selected_options {
                    if let Some(count) = results.vote_counts.get_mut(index) {
                        *count += 1;
                    }
                }
            }
        }
        Ok(results)
    }

    /// Close every poll whose expiry time has passed; returns how many.
    pub fn expire_polls(&self) -> usize {
        let mut inner = self.inner.lock().expect("poll state poisoned");
        let mut expired = 0;
        for poll in inner.polls.values_mut() {
            if !poll.is_closed && poll.is_expired() {
                poll.is_closed = true;
                expired += 1;
            }
        }
        expired
    }

    /// Number of stored polls.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("poll state poisoned").polls.len()
    }

    /// Whether no polls exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(question: &str, options: &[&str]) -> PollInput {
        PollInput {
            question: question.into(),
            options: options.iter().map(|s| s.to_string()).collect(),
            max_selections: 0,
            duration_hours: 0,
        }
    }

    #[test]
    fn normalize_happy_path() {
        let poll = normalize_poll(
            &input("Lunch?", &["pizza", "sushi", "tacos"]),
            &PollNormalizeOptions::default(),
        )
        .unwrap();
        assert_eq!(poll.question, "Lunch?");
        assert_eq!(poll.options.len(), 3);
        assert_eq!(poll.max_selections, 1);
        assert_eq!(poll.duration_hours, 24);
        assert!(poll.is_active());
        assert!(poll.time_remaining() > 0);
    }

    #[test]
    fn normalize_rejects_too_few_options() {
        let err = normalize_poll(&input("Q?", &["only"]), &PollNormalizeOptions::default())
            .unwrap_err();
        assert_eq!(err, PollError::TooFewOptions);
        assert!(err.to_string().contains("at least 2 options"));

        // Blank/duplicate options collapse before the count check.
        let err = normalize_poll(
            &input("Q?", &["a", "  a ", "", "a"]),
            &PollNormalizeOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, PollError::TooFewOptions);
    }

    #[test]
    fn normalize_rejects_too_many_options() {
        let options: Vec<String> = (0..11).map(|i| format!("opt{i}")).collect();
        let refs: Vec<&str> = options.iter().map(String::as_str).collect();
        let err = normalize_poll(&input("Q?", &refs), &PollNormalizeOptions::default())
            .unwrap_err();
        assert_eq!(err, PollError::TooManyOptions(10));
    }

    #[test]
    fn duration_clamped_into_bounds() {
        assert_eq!(normalize_poll_duration(0, 24, 168), 24);
        assert_eq!(normalize_poll_duration(-5, 24, 168), 1);
        assert_eq!(normalize_poll_duration(500, 24, 168), 168);
        assert_eq!(normalize_poll_duration(48, 24, 168), 48);
    }

    #[test]
    fn max_selections_bounded_by_option_count() {
        let mut raw = input("Q?", &["a", "b"]);
        raw.max_selections = 9;
        let poll = normalize_poll(&raw, &PollNormalizeOptions::default()).unwrap();
        assert_eq!(poll.max_selections, 2);
    }

    #[test]
    fn normalize_is_idempotent() {
        let poll = normalize_poll(
            &input("  Lunch?  ", &["pizza ", " sushi"]),
            &PollNormalizeOptions::default(),
        )
        .unwrap();
        let again = normalize_poll(
            &PollInput {
                question: poll.question.clone(),
                options: poll.options.clone(),
                max_selections: poll.max_selections,
                duration_hours: poll.duration_hours,
            },
            &PollNormalizeOptions::default(),
        )
        .unwrap();
        assert_eq!(again.question, poll.question);
        assert_eq!(again.options, poll.options);
        assert_eq!(again.max_selections, poll.max_selections);
        assert_eq!(again.duration_hours, poll.duration_hours);
    }

    #[test]
    fn vote_and_results() {
        let manager = PollManager::new();
        let poll = manager
            .create_poll(
                &input("Lunch?", &["pizza", "sushi"]),
                &PollNormalizeOptions::default(),
            )
            .unwrap();

        manager.vote(&poll.id, "alice", vec![0]).unwrap();
        manager.vote(&poll.id, "bob", vec![1]).unwrap();
        manager.vote(&poll.id, "carol", vec![0]).unwrap();

        let results = manager.results(&poll.id).unwrap();
        assert_eq!(results.total_votes, 3);
        assert_eq!(results.vote_counts, vec![2, 1]);
        assert_eq!(results.winning_option(), Some(0));
        assert!((results.percentage(0) - 66.666).abs() < 0.01);

        // Revoting replaces the old vote.
        manager.vote(&poll.id, "alice", vec![1]).unwrap();
        let results = manager.results(&poll.id).unwrap();
        assert_eq!(results.vote_counts, vec![1, 2]);
    }

    #[test]
    fn vote_validation_paths() {
        let manager = PollManager::new();
        let poll = manager
            .create_poll(
                &input("Q?", &["a", "b", "c"]),
                &PollNormalizeOptions::default(),
            )
            .unwrap();

        assert!(manager.vote(&poll.id, "v", vec![]).is_err());
        assert!(manager.vote(&poll.id, "v", vec![7]).is_err());
        assert!(manager.vote(&poll.id, "v", vec![0, 1]).is_err()); // max 1
        assert!(manager.vote("missing", "v", vec![0]).is_err());

        manager.close_poll(&poll.id).unwrap();
        assert!(manager.vote(&poll.id, "v", vec![0]).is_err());
    }

    #[test]
    fn winning_option_tie_is_none() {
        let results = PollResults {
            poll_id: "p".into(),
            vote_counts: vec![2, 2, 1],
            total_votes: 5,
        };
        assert_eq!(results.winning_option(), None);

        let empty = PollResults {
            poll_id: "p".into(),
            vote_counts: vec![0, 0],
            total_votes: 0,
        };
        assert_eq!(empty.winning_option(), None);
    }

    #[test]
    fn expire_closes_overdue_polls() {
        let manager = PollManager::new();
        let poll = manager
            .create_poll(&input("Q?", &["a", "b"]), &PollNormalizeOptions::default())
            .unwrap();

        {
            let mut inner = manager.inner.lock().unwrap();
            inner.polls.get_mut(&poll.id).unwrap().expires_at = Utc::now().timestamp() - 10;
        }
        assert_eq!(manager.expire_polls(), 1);
        assert!(!manager.get_poll(&poll.id).unwrap().is_active());
        assert_eq!(manager.expire_polls(), 0);
    }
}
